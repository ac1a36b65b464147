//! Parsing of Airbrake v2 XML notices.

use indexmap::IndexMap;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum NoticeError {
    #[error("notice is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("malformed notice XML: {0}")]
    Malformed(#[from] quick_xml::DeError),
    #[error("notice has no error element")]
    MissingError,
    #[error("notice error has an empty backtrace")]
    EmptyBacktrace,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub api_key: String,
    pub error_class: String,
    pub error_message: String,
    pub backtrace_lines: Vec<BacktraceLine>,
    pub server_environment: ServerEnvironment,
    pub request_info: Option<RequestInfo>,
}

/// One `<line>` of a backtrace. Attributes that are missing or empty are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BacktraceLine {
    pub file: Option<String>,
    pub line_number: Option<String>,
    pub method: Option<String>,
}

impl BacktraceLine {
    pub fn is_complete(&self) -> bool {
        self.file.is_some() && self.line_number.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerEnvironment {
    pub hostname: Option<String>,
    pub project_root: Option<String>,
    pub environment_name: Option<String>,
}

/// The `<request>` element. Variable maps keep document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestInfo {
    pub url: String,
    pub cgi_data: IndexMap<String, String>,
    pub params: IndexMap<String, String>,
}

#[derive(Deserialize)]
struct RawNotice {
    #[serde(rename = "api-key", default)]
    api_key: String,
    error: Option<RawError>,
    request: Option<RawRequest>,
    #[serde(rename = "server-environment")]
    server_environment: Option<RawServerEnvironment>,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    class: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    backtrace: RawBacktrace,
}

#[derive(Deserialize, Default)]
struct RawBacktrace {
    #[serde(rename = "line", default)]
    lines: Vec<RawLine>,
}

#[derive(Deserialize)]
struct RawLine {
    #[serde(rename = "@file")]
    file: Option<String>,
    #[serde(rename = "@number")]
    number: Option<String>,
    #[serde(rename = "@method")]
    method: Option<String>,
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    params: RawVars,
    #[serde(rename = "cgi-data", default)]
    cgi_data: RawVars,
}

#[derive(Deserialize, Default)]
struct RawVars {
    #[serde(rename = "var", default)]
    vars: Vec<RawVar>,
}

#[derive(Deserialize)]
struct RawVar {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct RawServerEnvironment {
    #[serde(rename = "project-root")]
    project_root: Option<String>,
    #[serde(rename = "environment-name")]
    environment_name: Option<String>,
    hostname: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl RawVars {
    fn flatten(self) -> IndexMap<String, String> {
        self.vars
            .into_iter()
            .map(|var| (var.key, var.value.unwrap_or_default()))
            .collect()
    }
}

/// Parses an Airbrake v2 notice document.
pub fn parse(xml: &[u8]) -> Result<Notice, NoticeError> {
    let text = std::str::from_utf8(xml)?;
    let raw: RawNotice = quick_xml::de::from_str(text)?;

    let error = raw.error.ok_or(NoticeError::MissingError)?;
    if error.backtrace.lines.is_empty() {
        return Err(NoticeError::EmptyBacktrace);
    }

    let backtrace_lines = error
        .backtrace
        .lines
        .into_iter()
        .map(|line| BacktraceLine {
            file: non_empty(line.file),
            line_number: non_empty(line.number),
            method: non_empty(line.method),
        })
        .collect();

    let server_environment = raw
        .server_environment
        .map(|env| ServerEnvironment {
            hostname: non_empty(env.hostname),
            project_root: non_empty(env.project_root),
            environment_name: non_empty(env.environment_name),
        })
        .unwrap_or_default();

    let request_info = raw.request.map(|request| RequestInfo {
        url: request.url,
        cgi_data: request.cgi_data.flatten(),
        params: request.params.flatten(),
    });

    Ok(Notice {
        api_key: raw.api_key,
        error_class: error.class,
        error_message: error.message,
        backtrace_lines,
        server_environment,
        request_info,
    })
}
