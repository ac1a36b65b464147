//! Delivery of translated events to Sentry.

use crate::config::ProjectConfig;
use crate::delivery;
use crate::metrics_defs::{SENTRY_REQUEST, STORE_WRITE_FAIL};
use crate::outcome::{Backend, Outcome};
use crate::store::Correlations;
use crate::translate::{BackendTarget, TranslatedEvent};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use std::io::Write;

pub const AUTH_HEADER: &str = "X-Sentry-Auth";
const PROTOCOL_VERSION: u8 = 5;
const CLIENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("could not serialize event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not compress event: {0}")]
    Compression(#[from] std::io::Error),
}

/// Serializes, zlib-deflates and base64-encodes an event.
pub fn encode_event(event: &TranslatedEvent) -> Result<String, EncodeError> {
    let json = event.to_json()?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Value of the `X-Sentry-Auth` header for `project` at `now`.
pub fn auth_header(project: &ProjectConfig, now: DateTime<Utc>) -> String {
    format!(
        "Sentry sentry_version={}, sentry_timestamp={}000, sentry_client={}, sentry_key={}, sentry_secret={}",
        PROTOCOL_VERSION,
        now.timestamp_millis(),
        CLIENT,
        project.key,
        project.secret
    )
}

#[derive(Deserialize)]
struct SentryReply {
    id: Option<String>,
}

pub fn classify_reply(body: &str) -> Outcome {
    match serde_json::from_str::<SentryReply>(body) {
        Ok(SentryReply { id: Some(id) }) if !id.is_empty() => Outcome::Success(id),
        _ => Outcome::InvalidResponse,
    }
}

#[derive(Clone)]
pub struct SentryForwarder {
    client: reqwest::Client,
    correlations: Correlations,
}

impl SentryForwarder {
    pub fn new(client: reqwest::Client, correlations: Correlations) -> Self {
        Self {
            client,
            correlations,
        }
    }

    /// Posts `event` to `target` and records the event id under `token`.
    pub async fn forward(&self, token: &str, event: &TranslatedEvent, target: &BackendTarget) -> Outcome {
        let outcome = self.deliver(token, event, target).await;
        outcome.record(Backend::Sentry);
        outcome
    }

    async fn deliver(&self, token: &str, event: &TranslatedEvent, target: &BackendTarget) -> Outcome {
        let endpoint = target.endpoint();
        let host = endpoint.url.host_str().unwrap_or_default();
        let port = endpoint.url.port_or_known_default().unwrap_or_default();

        let body = match encode_event(event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(token = %token, event_id = %event.event_id, error = %e, "Could not encode event for Sentry");
                return Outcome::CompressionError;
            }
        };

        let request = self
            .client
            .post(endpoint.url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONNECTION, "close")
            .header(CONTENT_LENGTH, body.len())
            .header(AUTH_HEADER, auth_header(&endpoint.project, Utc::now()))
            .body(body);

        let reply = match delivery::send(request, endpoint.timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    host = %host,
                    port,
                    target = target.kind(),
                    token = %token,
                    error = %e,
                    "Failed sending event to Sentry, event lost"
                );
                return e.outcome();
            }
        };

        SENTRY_REQUEST.record_duration(reply.elapsed);

        let outcome = classify_reply(&reply.body);
        match &outcome {
            Outcome::Success(id) => {
                if let Err(e) = self.correlations.resolve(token, Backend::Sentry, id).await {
                    STORE_WRITE_FAIL.increment();
                    tracing::error!(token = %token, id = %id, error = %e, "Could not record Sentry event id");
                }
            }
            _ => {
                tracing::warn!(
                    host = %host,
                    port,
                    target = target.kind(),
                    token = %token,
                    status = %reply.status,
                    response = %reply.body,
                    "Invalid JSON returned from Sentry"
                );
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice;
    use crate::store::{CorrelationStore, MemoryStore};
    use crate::testutils::{NOTICE_XML, TestBackend, closed_port_url, counters};
    use crate::translate::{SentryEndpoint, translate};
    use chrono::TimeZone;
    use flate2::read::ZlibDecoder;
    use hyper::StatusCode;
    use metrics_util::debugging::DebuggingRecorder;
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    const TOKEN: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

    fn project() -> ProjectConfig {
        ProjectConfig {
            id: 42,
            platform: "node".into(),
            key: "public".into(),
            secret: "secret".into(),
        }
    }

    fn event() -> TranslatedEvent {
        let notice = notice::parse(NOTICE_XML.as_bytes()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        translate(&notice, &project(), now).unwrap()
    }

    fn self_hosted(base: &Url, timeout: Duration) -> BackendTarget {
        BackendTarget::SelfHosted(SentryEndpoint {
            url: base.join("/api/store/").unwrap(),
            timeout,
            project: project(),
        })
    }

    fn forwarder() -> (Arc<MemoryStore>, SentryForwarder) {
        let store = Arc::new(MemoryStore::new());
        let forwarder = SentryForwarder::new(reqwest::Client::new(), Correlations::new(store.clone()));
        (store, forwarder)
    }

    fn decode(body: &[u8]) -> serde_json::Value {
        let compressed = STANDARD.decode(body).unwrap();
        let mut json = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[test]
    fn test_encode_event() {
        let event = event();
        let decoded = decode(encode_event(&event).unwrap().as_bytes());

        assert_eq!(decoded["event_id"], event.event_id.as_str());
        assert_eq!(decoded["exception"]["type"], "TypeError");
        assert_eq!(decoded["stacktrace"]["frames"][2]["module"], "exception");
    }

    #[test]
    fn test_auth_header() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            auth_header(&project(), now),
            format!(
                "Sentry sentry_version=5, sentry_timestamp=1700000000123000, sentry_client=notice-forwarder/{}, sentry_key=public, sentry_secret=secret",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[test]
    fn test_classify_reply() {
        assert_eq!(
            classify_reply(r#"{"id": "abc123"}"#),
            Outcome::Success("abc123".into())
        );
        assert_eq!(classify_reply(r#"{"error": "bad"}"#), Outcome::InvalidResponse);
        assert_eq!(classify_reply(r#"{"id": ""}"#), Outcome::InvalidResponse);
        assert_eq!(classify_reply("<html>oops</html>"), Outcome::InvalidResponse);
    }

    #[tokio::test]
    async fn test_forward_success() {
        let backend =
            TestBackend::spawn(StatusCode::OK, r#"{"id": "e3b0c44298fc1c149afbf4c8996fb924"}"#).await;
        let (store, forwarder) = forwarder();
        let event = event();

        let outcome = forwarder
            .forward(TOKEN, &event, &self_hosted(&backend.url, Duration::from_secs(5)))
            .await;

        assert_eq!(
            outcome,
            Outcome::Success("e3b0c44298fc1c149afbf4c8996fb924".into())
        );
        assert_eq!(
            store
                .get(&format!("{TOKEN}:sentry"))
                .await
                .unwrap()
                .as_deref(),
            Some("e3b0c44298fc1c149afbf4c8996fb924")
        );

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.path, "/api/store/");
        assert_eq!(request.headers["content-type"], "application/octet-stream");
        let auth = request.headers["x-sentry-auth"].to_str().unwrap();
        assert!(auth.starts_with("Sentry sentry_version=5, sentry_timestamp="));
        assert!(auth.ends_with("sentry_key=public, sentry_secret=secret"));

        let decoded = decode(&request.body);
        assert_eq!(decoded["event_id"], event.event_id.as_str());
        assert_eq!(decoded["project"], "42");
    }

    #[tokio::test]
    async fn test_forward_invalid_reply() {
        let backend = TestBackend::spawn(StatusCode::BAD_REQUEST, "Invalid api key").await;
        let (store, forwarder) = forwarder();

        let outcome = forwarder
            .forward(TOKEN, &event(), &self_hosted(&backend.url, Duration::from_secs(5)))
            .await;

        assert_eq!(outcome, Outcome::InvalidResponse);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_outcome_counters() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let backend = TestBackend::spawn(StatusCode::BAD_REQUEST, "Invalid api key").await;
        let (_store, forwarder) = forwarder();
        forwarder
            .forward(TOKEN, &event(), &self_hosted(&backend.url, Duration::from_secs(5)))
            .await;
        assert_eq!(
            counters(&snapshotter),
            HashMap::from([("sentry.request.fail.json".to_string(), 1)])
        );

        let url = closed_port_url().await;
        forwarder
            .forward(TOKEN, &event(), &self_hosted(&url, Duration::from_secs(5)))
            .await;
        assert_eq!(
            counters(&snapshotter),
            HashMap::from([
                ("sentry.request.fail.json".to_string(), 1),
                ("sentry.request.fail.error".to_string(), 1),
            ])
        );
    }

    #[tokio::test]
    async fn test_forward_timeout() {
        let backend = TestBackend::spawn_with_delay(
            StatusCode::OK,
            r#"{"id": "late"}"#,
            Duration::from_secs(5),
        )
        .await;
        let (store, forwarder) = forwarder();

        let outcome = forwarder
            .forward(TOKEN, &event(), &self_hosted(&backend.url, Duration::from_millis(100)))
            .await;

        assert_eq!(outcome, Outcome::Timeout);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_forward_connection_refused() {
        let url = closed_port_url().await;
        let (store, forwarder) = forwarder();

        let outcome = forwarder
            .forward(TOKEN, &event(), &self_hosted(&url, Duration::from_secs(5)))
            .await;

        assert_eq!(outcome, Outcome::TransportError);
        assert!(store.is_empty());
    }
}
