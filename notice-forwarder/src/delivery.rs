use crate::outcome::Outcome;
use reqwest::{RequestBuilder, StatusCode};
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl DeliveryError {
    pub fn outcome(&self) -> Outcome {
        match self {
            DeliveryError::Timeout(_) => Outcome::Timeout,
            DeliveryError::Transport(e) if e.is_timeout() => Outcome::Timeout,
            DeliveryError::Transport(_) => Outcome::TransportError,
        }
    }
}

/// A fully read backend reply.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
    pub elapsed: Duration,
}

/// Sends `request` and reads the whole reply body.
///
/// `timeout_duration` bounds the entire exchange: connecting, sending the body,
/// receiving the headers and collecting the reply. When it elapses the in-flight
/// request is dropped, which aborts the connection.
pub async fn send(
    request: RequestBuilder,
    timeout_duration: Duration,
) -> Result<Reply, DeliveryError> {
    let started = Instant::now();

    let exchange = async {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };

    let (status, body) = timeout(timeout_duration, exchange)
        .await
        // Outer error: the deadline elapsed before the exchange finished
        .map_err(|_| DeliveryError::Timeout(timeout_duration))??;

    Ok(Reply {
        status,
        body,
        elapsed: started.elapsed(),
    })
}
