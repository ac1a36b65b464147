use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError, StatsdRecorder};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LEVEL: &str = "info";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Recorder(String),
}

/// Installs the global tracing subscriber.
///
/// The returned guard flushes pending Sentry events when dropped and must be
/// held for the lifetime of the process.
pub fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let level = config.map_or(DEFAULT_LEVEL, |c| c.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let guard = config
        .and_then(|c| c.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

/// Installs a statsd recorder behind the `metrics` facade.
///
/// Without one every metric is a no-op.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), TelemetryError> {
    let recorder = build_recorder(config)?;

    metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Recorder(e.to_string()))?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        prefix = %config.prefix,
        "Reporting metrics to statsd"
    );
    Ok(())
}

/// Histograms are sent as statsd timings (`|ms`).
fn build_recorder(config: &MetricsConfig) -> Result<StatsdRecorder, StatsdError> {
    StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .histogram_is_timer()
        .build(Some(config.prefix.as_str()))
}
