use crate::metrics_defs::{
    AIRBRAKE_REQUEST_FAIL_ERROR, AIRBRAKE_REQUEST_FAIL_RATELIMITED, AIRBRAKE_REQUEST_FAIL_TIMEOUT,
    AIRBRAKE_REQUEST_FAIL_XML, AIRBRAKE_REQUEST_SUCCESS, SENTRY_REQUEST_FAIL_COMPRESSION,
    SENTRY_REQUEST_FAIL_ERROR, SENTRY_REQUEST_FAIL_JSON, SENTRY_REQUEST_FAIL_TIMEOUT,
    SENTRY_REQUEST_SUCCESS,
};
use serde::Deserialize;
use shared::metrics_defs::MetricDef;
use std::fmt;

/// A downstream error tracking service notices are relayed to.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Airbrake,
    Sentry,
}

impl Backend {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Backend::Airbrake => "airbrake",
            Backend::Sentry => "sentry",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a single delivery attempt to one backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The backend stored the notice under this id.
    Success(String),
    /// The backend rejected the notice because the project is over its rate limit.
    RateLimited,
    /// The backend replied, but the reply did not carry an id.
    InvalidResponse,
    /// The event could not be encoded; nothing was sent.
    CompressionError,
    /// The request did not complete within the configured timeout and was aborted.
    Timeout,
    /// The connection failed before a reply was received.
    TransportError,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The counter incremented when `backend` produces this outcome.
    ///
    /// Returns `None` for combinations a backend never produces.
    pub fn metric(&self, backend: Backend) -> Option<MetricDef> {
        let def = match (backend, self) {
            (Backend::Airbrake, Outcome::Success(_)) => AIRBRAKE_REQUEST_SUCCESS,
            (Backend::Airbrake, Outcome::RateLimited) => AIRBRAKE_REQUEST_FAIL_RATELIMITED,
            (Backend::Airbrake, Outcome::InvalidResponse) => AIRBRAKE_REQUEST_FAIL_XML,
            (Backend::Airbrake, Outcome::Timeout) => AIRBRAKE_REQUEST_FAIL_TIMEOUT,
            (Backend::Airbrake, Outcome::TransportError) => AIRBRAKE_REQUEST_FAIL_ERROR,
            (Backend::Airbrake, Outcome::CompressionError) => return None,
            (Backend::Sentry, Outcome::Success(_)) => SENTRY_REQUEST_SUCCESS,
            (Backend::Sentry, Outcome::InvalidResponse) => SENTRY_REQUEST_FAIL_JSON,
            (Backend::Sentry, Outcome::CompressionError) => SENTRY_REQUEST_FAIL_COMPRESSION,
            (Backend::Sentry, Outcome::Timeout) => SENTRY_REQUEST_FAIL_TIMEOUT,
            (Backend::Sentry, Outcome::TransportError) => SENTRY_REQUEST_FAIL_ERROR,
            (Backend::Sentry, Outcome::RateLimited) => return None,
        };
        Some(def)
    }

    pub fn record(&self, backend: Backend) {
        if let Some(def) = self.metric(backend) {
            def.increment();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_metrics_are_distinct() {
        let outcomes = [
            Outcome::Success("1".into()),
            Outcome::RateLimited,
            Outcome::InvalidResponse,
            Outcome::CompressionError,
            Outcome::Timeout,
            Outcome::TransportError,
        ];

        for backend in [Backend::Airbrake, Backend::Sentry] {
            let names: Vec<&str> = outcomes
                .iter()
                .filter_map(|o| o.metric(backend))
                .map(|def| def.name)
                .collect();
            let unique: std::collections::HashSet<_> = names.iter().collect();
            assert_eq!(names.len(), unique.len());
            assert!(names.iter().all(|n| n.starts_with(backend.as_str())));
        }
    }

    #[test]
    fn test_rate_limited_metric() {
        assert_eq!(
            Outcome::RateLimited.metric(Backend::Airbrake).unwrap().name,
            "airbrake.request.fail.ratelimited"
        );
        assert!(Outcome::RateLimited.metric(Backend::Sentry).is_none());
    }

    #[test]
    fn test_backend_deserialization() {
        assert_eq!(
            serde_yaml::from_str::<Backend>("airbrake").unwrap(),
            Backend::Airbrake
        );
        assert_eq!(
            serde_yaml::from_str::<Backend>("sentry").unwrap(),
            Backend::Sentry
        );
        assert!(serde_yaml::from_str::<Backend>("raygun").is_err());
    }
}
