//! Passthrough of notices to Airbrake.

use crate::config::AirbrakeConfig;
use crate::delivery;
use crate::metrics_defs::{AIRBRAKE_REQUEST, STORE_WRITE_FAIL};
use crate::outcome::{Backend, Outcome};
use crate::store::Correlations;
use hyper::body::Bytes;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use url::Url;

/// Error text Airbrake replies with when a project exceeds its notice quota.
pub const RATE_LIMITED_MESSAGE: &str = "Project is rate limited";

/// Either `<notice><id>..</id></notice>` or `<errors><error>..</error></errors>`.
#[derive(Deserialize)]
struct AirbrakeReply {
    id: Option<String>,
    #[serde(rename = "error", default)]
    errors: Vec<String>,
}

pub fn classify_reply(body: &str) -> Outcome {
    let Ok(reply) = quick_xml::de::from_str::<AirbrakeReply>(body) else {
        return Outcome::InvalidResponse;
    };

    if let Some(id) = reply.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return Outcome::Success(id.to_string());
    }

    if reply
        .errors
        .iter()
        .any(|error| error.contains(RATE_LIMITED_MESSAGE))
    {
        Outcome::RateLimited
    } else {
        Outcome::InvalidResponse
    }
}

#[derive(Clone)]
pub struct AirbrakeForwarder {
    client: reqwest::Client,
    config: AirbrakeConfig,
    correlations: Correlations,
}

impl AirbrakeForwarder {
    pub fn new(client: reqwest::Client, config: AirbrakeConfig, correlations: Correlations) -> Self {
        Self {
            client,
            config,
            correlations,
        }
    }

    fn notice_url(&self, request_path: &str) -> Result<Url, url::ParseError> {
        if self.config.forward_request_path {
            self.config.url.join(request_path)
        } else {
            self.config.url.join(&self.config.notice_path)
        }
    }

    /// Posts the unmodified notice to Airbrake and records the notice id under `token`.
    pub async fn forward(&self, token: &str, body: Bytes, request_path: &str) -> Outcome {
        let host = self.config.url.host_str().unwrap_or_default();
        let port = self.config.url.port_or_known_default().unwrap_or_default();

        let url = match self.notice_url(request_path) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(token = %token, path = %request_path, error = %e, "Invalid Airbrake notice URL");
                let outcome = Outcome::TransportError;
                outcome.record(Backend::Airbrake);
                return outcome;
            }
        };

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml")
            .header(CONNECTION, "close")
            .header(CONTENT_LENGTH, body.len())
            .body(body);

        let outcome = match delivery::send(request, self.config.timeout()).await {
            Ok(reply) => {
                AIRBRAKE_REQUEST.record_duration(reply.elapsed);

                let outcome = classify_reply(&reply.body);
                match &outcome {
                    Outcome::Success(id) => {
                        if let Err(e) = self.correlations.resolve(token, Backend::Airbrake, id).await {
                            STORE_WRITE_FAIL.increment();
                            tracing::error!(token = %token, id = %id, error = %e, "Could not record Airbrake notice id");
                        }
                    }
                    Outcome::RateLimited => {
                        tracing::warn!(
                            host = %host,
                            port,
                            token = %token,
                            response = %reply.body,
                            "Airbrake project is rate limited, notice dropped"
                        );
                    }
                    _ => {
                        tracing::warn!(
                            host = %host,
                            port,
                            token = %token,
                            status = %reply.status,
                            response = %reply.body,
                            "Invalid XML returned from Airbrake"
                        );
                    }
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    host = %host,
                    port,
                    token = %token,
                    error = %e,
                    "Failed sending notice to Airbrake, notice lost"
                );
                e.outcome()
            }
        };

        outcome.record(Backend::Airbrake);
        outcome
    }
}
