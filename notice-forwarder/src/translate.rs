//! Translation of Airbrake notices into Sentry (protocol v5) events.
//!
//! The event id is a content hash of the serialized event, so serialization
//! must be reproducible: fields are emitted in declaration order and request
//! variables keep the order they had in the notice.

use crate::backtrace::{self, BacktraceError, Frame};
use crate::config::{ProjectConfig, SentryConfig};
use crate::notice::Notice;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Reported as the server name when the notice does not carry a hostname.
const UNKNOWN_SERVER_NAME: &str = "None";

#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
    #[error("no Sentry project configured for API key {0}")]
    UnknownProject(String),
    #[error("no {0} Sentry deployment is configured")]
    TargetNotConfigured(&'static str),
    #[error("invalid Sentry URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Backtrace(#[from] BacktraceError),
    #[error("could not serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventException {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventRequest {
    pub url: String,
    pub data: IndexMap<String, String>,
    pub env: IndexMap<String, String>,
}

/// Everything in an event except its id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventBody {
    pub message: String,
    pub exception: EventException,
    pub stacktrace: Stacktrace,
    pub culprit: String,
    pub server_name: String,
    pub extra: IndexMap<String, String>,
    pub logger: String,
    pub timestamp: String,
    pub project: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<EventRequest>,
}

impl EventBody {
    /// 128-bit hash of the serialized body as 32 lowercase hex characters.
    pub fn content_id(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&canonical);
        Ok(hex::encode(&digest[..16]))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranslatedEvent {
    pub event_id: String,
    #[serde(flatten)]
    pub body: EventBody,
}

impl TranslatedEvent {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Builds the Sentry event for `notice`, stamped with `now`.
pub fn translate(
    notice: &Notice,
    project: &ProjectConfig,
    now: DateTime<Utc>,
) -> Result<TranslatedEvent, TranslateError> {
    let env = &notice.server_environment;
    let reduced = backtrace::reduce(&notice.backtrace_lines, env.project_root.as_deref())?;
    let culprit = culprit(&reduced.final_frame);

    let body = EventBody {
        message: notice.error_message.clone(),
        exception: EventException {
            kind: notice.error_class.clone(),
            value: notice.error_message.clone(),
        },
        stacktrace: Stacktrace {
            frames: reduced.into_frames(),
        },
        culprit,
        server_name: env
            .hostname
            .clone()
            .unwrap_or_else(|| UNKNOWN_SERVER_NAME.to_string()),
        extra: IndexMap::new(),
        logger: String::new(),
        timestamp: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        project: project.id.to_string(),
        platform: project.platform.clone(),
        environment: env.environment_name.clone(),
        request: notice.request_info.as_ref().map(|request| EventRequest {
            url: request.url.clone(),
            data: request.params.clone(),
            env: request.cgi_data.clone(),
        }),
    };

    Ok(TranslatedEvent {
        event_id: body.content_id()?,
        body,
    })
}

fn culprit(frame: &Frame) -> String {
    let function = if frame.function.is_empty() {
        "?"
    } else {
        frame.function.as_str()
    };
    format!("{} at {}", frame.filename, function)
}

/// Where and how a translated event is delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct SentryEndpoint {
    /// Full store URL
    pub url: Url,
    pub timeout: Duration,
    pub project: ProjectConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendTarget {
    /// Multi-tenant Sentry, addressed per project: `/api/{project id}/store/`
    Hosted(SentryEndpoint),
    /// Self-hosted Sentry, where the key identifies the project: `/api/store/`
    SelfHosted(SentryEndpoint),
}

impl BackendTarget {
    pub fn endpoint(&self) -> &SentryEndpoint {
        match self {
            BackendTarget::Hosted(endpoint) | BackendTarget::SelfHosted(endpoint) => endpoint,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendTarget::Hosted(_) => "hosted",
            BackendTarget::SelfHosted(_) => "self-hosted",
        }
    }
}

/// Picks the Sentry deployment and project for an Airbrake API key.
pub fn resolve_target(api_key: &str, config: &SentryConfig) -> Result<BackendTarget, TranslateError> {
    let project = config
        .projects
        .get(api_key)
        .ok_or_else(|| TranslateError::UnknownProject(api_key.to_string()))?;

    if config.hosted.projects.contains(api_key) {
        let url = config
            .hosted
            .url
            .join(&format!("/api/{}/store/", project.id))?;

        return Ok(BackendTarget::Hosted(SentryEndpoint {
            url,
            timeout: config.hosted.timeout(),
            project: project.clone(),
        }));
    }

    let base = config
        .url
        .as_ref()
        .ok_or(TranslateError::TargetNotConfigured("self-hosted"))?;

    Ok(BackendTarget::SelfHosted(SentryEndpoint {
        url: base.join("/api/store/")?,
        timeout: config.timeout(),
        project: project.clone(),
    }))
}
