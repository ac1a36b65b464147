use notice_forwarder::config::Config as ForwarderConfig;
use serde::Deserialize;
use std::fs::File;

fn default_statsd_host() -> String {
    "127.0.0.1".into()
}

fn default_statsd_port() -> u16 {
    8125
}

fn default_prefix() -> String {
    "airbrakeproxy".into()
}

fn default_level() -> String {
    "info".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_statsd_host")]
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
    /// Prepended to every metric name
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
    /// Reports the bridge's own errors to Sentry when set
    pub sentry_dsn: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    #[serde(flatten)]
    pub forwarder: ForwarderConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
