//! Correlation store: maps tokens handed to clients onto the ids backends assign.
//!
//! All records live in one hash. The field `{token}` holds `"null"` once the
//! token has been issued. Each backend that stores the notice records its id
//! under its own field, `{token}:airbrake` or `{token}:sentry`, so a second
//! successful backend never overwrites the first one's id.

use crate::config::StoreConfig;
use crate::outcome::Backend;
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;

/// Value stored for a token that has been issued but not resolved.
pub const PENDING: &str = "null";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Hash-field access to the shared store.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn get(&self, field: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, field: &str, value: &str) -> Result<(), StoreError>;
}

pub struct RedisStore {
    connection: ConnectionManager,
    key: String,
}

impl RedisStore {
    /// Connects to Redis. Records are kept in the hash `{prefix}:uuid`.
    pub async fn connect(host: &str, port: u16, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(format!("redis://{host}:{port}/"))?;
        let connection = ConnectionManager::new(client).await?;

        Ok(RedisStore {
            connection,
            key: format!("{prefix}:uuid"),
        })
    }
}

#[async_trait]
impl CorrelationStore for RedisStore {
    async fn get(&self, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        Ok(conn.hget(&self.key, field).await?)
    }

    async fn set(&self, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.hset(&self.key, field, value).await?;
        Ok(())
    }
}

/// Process-local store, only visible to the worker that owns it.
#[derive(Default)]
pub struct MemoryStore {
    fields: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn get(&self, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.fields.read().get(field).cloned())
    }

    async fn set(&self, field: &str, value: &str) -> Result<(), StoreError> {
        self.fields
            .write()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }
}

/// Opens the store described by `config`.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CorrelationStore>, StoreError> {
    match config {
        StoreConfig::Redis { host, port, prefix } => {
            let store = RedisStore::connect(host, *port, prefix).await?;
            Ok(Arc::new(store))
        }
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Token lifecycle operations on top of a [`CorrelationStore`].
#[derive(Clone)]
pub struct Correlations {
    store: Arc<dyn CorrelationStore>,
}

impl Correlations {
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }

    pub fn pending_field(token: &str) -> String {
        token.to_string()
    }

    pub fn resolved_field(token: &str, backend: Backend) -> String {
        format!("{token}:{backend}")
    }

    pub async fn open(&self, token: &str) -> Result<(), StoreError> {
        self.store.set(&Self::pending_field(token), PENDING).await
    }

    pub async fn resolve(&self, token: &str, backend: Backend, id: &str) -> Result<(), StoreError> {
        self.store
            .set(&Self::resolved_field(token, backend), id)
            .await
    }

    /// Returns the first id recorded for `token`, checking backends in `order`.
    pub async fn locate(
        &self,
        token: &str,
        order: &[Backend],
    ) -> Result<Option<String>, StoreError> {
        for backend in order {
            let value = self
                .store
                .get(&Self::resolved_field(token, *backend))
                .await?;

            if let Some(id) = value.filter(|id| !id.is_empty() && id != PENDING) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0f1e2d3c-4b5a-4978-8695-a4b3c2d1e0f9";

    fn correlations() -> (Arc<MemoryStore>, Correlations) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Correlations::new(store))
    }

    #[tokio::test]
    async fn test_open_writes_pending_record() {
        let (store, correlations) = correlations();
        correlations.open(TOKEN).await.unwrap();

        assert_eq!(store.get(TOKEN).await.unwrap().as_deref(), Some(PENDING));
        assert_eq!(
            correlations
                .locate(TOKEN, &[Backend::Airbrake, Backend::Sentry])
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_connect_memory_store() {
        let store = connect(&StoreConfig::Memory).await.unwrap();
        store.set(TOKEN, PENDING).await.unwrap();
        assert_eq!(store.get(TOKEN).await.unwrap().as_deref(), Some(PENDING));
    }

    #[tokio::test]
    async fn test_locate_unknown_token() {
        let (_store, correlations) = correlations();
        assert_eq!(
            correlations.locate("missing", &[Backend::Airbrake]).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_locate_follows_order() {
        let (store, correlations) = correlations();
        correlations.open(TOKEN).await.unwrap();
        correlations
            .resolve(TOKEN, Backend::Sentry, "sentry-id")
            .await
            .unwrap();

        assert_eq!(
            correlations
                .locate(TOKEN, &[Backend::Airbrake, Backend::Sentry])
                .await
                .unwrap()
                .as_deref(),
            Some("sentry-id")
        );

        correlations
            .resolve(TOKEN, Backend::Airbrake, "airbrake-id")
            .await
            .unwrap();

        // Both ids are kept
        assert_eq!(store.len(), 3);
        assert_eq!(
            correlations
                .locate(TOKEN, &[Backend::Airbrake, Backend::Sentry])
                .await
                .unwrap()
                .as_deref(),
            Some("airbrake-id")
        );
        assert_eq!(
            correlations
                .locate(TOKEN, &[Backend::Sentry, Backend::Airbrake])
                .await
                .unwrap()
                .as_deref(),
            Some("sentry-id")
        );
    }

    #[tokio::test]
    async fn test_locate_skips_backends_not_in_order() {
        let (_store, correlations) = correlations();
        correlations
            .resolve(TOKEN, Backend::Sentry, "sentry-id")
            .await
            .unwrap();

        assert_eq!(
            correlations.locate(TOKEN, &[Backend::Airbrake]).await.unwrap(),
            None
        );
    }
}
