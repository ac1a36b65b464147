pub mod airbrake;
pub mod backtrace;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod ingress;
pub mod metrics_defs;
pub mod notice;
pub mod outcome;
pub mod sentry;
pub mod store;
pub mod translate;

#[cfg(test)]
mod testutils;

use errors::ForwarderError;
use ingress::IngressService;
use shared::http::serve_listener;
use tokio::net::TcpListener;

/// Connects to the configured store and serves notices from `listener` until it fails.
///
/// Each caller gets its own store connection and HTTP client.
pub async fn run(listener: TcpListener, config: config::Config) -> Result<(), ForwarderError> {
    let store = store::connect(&config.store).await?;
    tracing::info!(address = ?listener.local_addr()?, "Notice forwarder listening");

    let service = IngressService::new(config, store);
    serve_listener(listener, service).await
}
