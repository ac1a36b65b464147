use crate::outcome::Backend;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Worker count cannot be 0")]
    NoWorkers,

    #[error("Hosted Sentry project has no project config: {0}")]
    UnknownHostedProject(String),

    #[error("Resolution order cannot be empty")]
    EmptyResolutionOrder,

    #[error("Neither airbrake nor sentry is configured")]
    NoBackend,

    #[error("Timeout cannot be 0")]
    InvalidTimeout,
}

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_locate_url() -> Url {
    Url::parse("https://airbrake.io/locate").expect("static URL is valid")
}

fn default_airbrake_url() -> Url {
    Url::parse("https://api.airbrake.io").expect("static URL is valid")
}

fn default_hosted_sentry_url() -> Url {
    Url::parse("https://app.getsentry.com").expect("static URL is valid")
}

fn default_notice_path() -> String {
    "/notifier_api/v2/notices".into()
}

fn default_resolution_order() -> Vec<Backend> {
    vec![Backend::Airbrake, Backend::Sentry]
}

fn default_platform() -> String {
    "node".into()
}

fn default_redis_host() -> String {
    "127.0.0.1".into()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_prefix() -> String {
    "airbrakeproxy".into()
}

/// Notice forwarder configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for notices and locate requests
    #[serde(default)]
    pub listener: Listener,
    /// Base of the URL clients are redirected to once a notice is stored
    #[serde(default = "default_locate_url")]
    pub locate_url: Url,
    /// Which backend's id a locate request resolves to when several stored the notice
    #[serde(default = "default_resolution_order")]
    pub resolution_order: Vec<Backend>,
    #[serde(default)]
    pub store: StoreConfig,
    /// Airbrake passthrough. Notices are not sent to Airbrake if absent.
    pub airbrake: Option<AirbrakeConfig>,
    /// Sentry translation. Notices are not sent to Sentry if absent.
    pub sentry: Option<SentryConfig>,
}

impl Config {
    /// Validates the forwarder configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.resolution_order.is_empty() {
            return Err(ValidationError::EmptyResolutionOrder);
        }

        if self.airbrake.is_none() && self.sentry.is_none() {
            return Err(ValidationError::NoBackend);
        }

        if let Some(airbrake) = &self.airbrake
            && airbrake.timeout_ms == 0
        {
            return Err(ValidationError::InvalidTimeout);
        }

        if let Some(sentry) = &self.sentry {
            sentry.validate()?;
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Public host name used in the locate URL handed to clients
    pub hostname: String,
    /// Number of workers sharing the socket. Defaults to the CPU count.
    pub workers: Option<usize>,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 6633,
            hostname: "localhost".into(),
            workers: None,
        }
    }
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.workers == Some(0) {
            return Err(ValidationError::NoWorkers);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    Redis {
        #[serde(default = "default_redis_host")]
        host: String,
        #[serde(default = "default_redis_port")]
        port: u16,
        /// Records are kept in the hash `{prefix}:uuid`
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
    /// Per-worker in-process store, for local testing only
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis {
            host: default_redis_host(),
            port: default_redis_port(),
            prefix: default_redis_prefix(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AirbrakeConfig {
    #[serde(default = "default_airbrake_url")]
    pub url: Url,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_notice_path")]
    pub notice_path: String,
    /// Post to the path the notice was received on instead of `notice_path`
    #[serde(default)]
    pub forward_request_path: bool,
}

impl AirbrakeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AirbrakeConfig {
    fn default() -> Self {
        AirbrakeConfig {
            url: default_airbrake_url(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            notice_path: default_notice_path(),
            forward_request_path: false,
        }
    }
}

/// Credentials and routing for one Sentry project, keyed by Airbrake API key.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub id: u64,
    #[serde(default = "default_platform")]
    pub platform: String,
    pub key: String,
    pub secret: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SentryConfig {
    /// Self-hosted Sentry. Projects that are not hosted are dropped if absent.
    pub url: Option<Url>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maps Airbrake API keys to Sentry projects
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
    #[serde(default)]
    pub hosted: HostedSentryConfig,
}

impl SentryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 || self.hosted.timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        for api_key in &self.hosted.projects {
            if !self.projects.contains_key(api_key) {
                return Err(ValidationError::UnknownHostedProject(api_key.clone()));
            }
        }

        Ok(())
    }
}

/// Multi-tenant hosted Sentry and the API keys routed to it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostedSentryConfig {
    pub url: Url,
    pub timeout_ms: u64,
    pub projects: HashSet<String>,
}

impl HostedSentryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HostedSentryConfig {
    fn default() -> Self {
        HostedSentryConfig {
            url: default_hosted_sentry_url(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            projects: HashSet::new(),
        }
    }
}
