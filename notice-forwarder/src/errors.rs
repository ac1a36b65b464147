use crate::store::StoreError;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ForwarderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("correlation store error: {0}")]
    Store(#[from] StoreError),
}
