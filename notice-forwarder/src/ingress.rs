//! HTTP front end: accepts notices and answers locate requests.
//!
//! A notice is acknowledged before anything else happens to it. The pending
//! record is written and the forwarders are started only once the connection
//! has finished with the acknowledgement body.

use crate::airbrake::AirbrakeForwarder;
use crate::config::{Config, SentryConfig};
use crate::errors::ForwarderError;
use crate::metrics_defs::{HTTP_REQUEST, NOTICE_PARSE_FAIL, STORE_WRITE_FAIL};
use crate::notice;
use crate::sentry::SentryForwarder;
use crate::store::{CorrelationStore, Correlations};
use crate::translate::{self, BackendTarget, TranslateError, TranslatedEvent};
use chrono::Utc;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame, Incoming, SizeHint};
use hyper::header::{CONNECTION, CONTENT_TYPE, HeaderValue, LOCATION};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::make_error_response;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use uuid::Uuid;

const LOCATE_PREFIX: &str = "/locate/";
const TOKEN_LENGTH: usize = 36;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Extracts the token from a locate path.
///
/// Every `/locate/` and then every `/` is removed and the result is cut to
/// the length of a token. No further validation is done.
pub fn token_from_path(path: &str) -> String {
    path.replace(LOCATE_PREFIX, "")
        .replace('/', "")
        .chars()
        .take(TOKEN_LENGTH)
        .collect()
}

/// The acknowledgement returned for every accepted notice.
pub fn ack_body(token: &str, hostname: &str, port: u16) -> String {
    format!(
        r#"<?xml version="1.0"?><notice><id>{token}</id><url>http://{hostname}:{port}/locate/{token}</url></notice>"#
    )
}

/// Response body that notifies its owner once it is dropped, i.e. once the
/// connection has written it out or given up on it.
struct AckBody {
    inner: Full<Bytes>,
    released: Option<oneshot::Sender<()>>,
}

impl AckBody {
    fn new(content: String) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let body = AckBody {
            inner: Full::new(Bytes::from(content)),
            released: Some(tx),
        };
        (body, rx)
    }
}

impl Body for AckBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for AckBody {
    fn drop(&mut self) {
        if let Some(tx) = self.released.take() {
            let _ = tx.send(());
        }
    }
}

struct IngressState {
    config: Config,
    correlations: Correlations,
    airbrake: Option<AirbrakeForwarder>,
    sentry: Option<SentryForwarder>,
}

#[derive(Clone)]
pub struct IngressService {
    state: Arc<IngressState>,
}

impl IngressService {
    pub fn new(config: Config, store: Arc<dyn CorrelationStore>) -> Self {
        let correlations = Correlations::new(store);
        let client = reqwest::Client::new();

        let airbrake = config
            .airbrake
            .clone()
            .map(|airbrake| AirbrakeForwarder::new(client.clone(), airbrake, correlations.clone()));
        let sentry = config
            .sentry
            .as_ref()
            .map(|_| SentryForwarder::new(client.clone(), correlations.clone()));

        IngressService {
            state: Arc::new(IngressState {
                config,
                correlations,
                airbrake,
                sentry,
            }),
        }
    }

    /// GET requests are locate lookups. Any other method submits a notice.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Display,
    {
        let started = Instant::now();

        let response = if request.method() == Method::GET {
            let path = request.uri().path().to_string();
            self.handle_read(&path).await
        } else {
            self.handle_write(request).await
        };

        HTTP_REQUEST.record_duration(started.elapsed());
        response
    }

    async fn handle_read(&self, path: &str) -> Response<ResponseBody> {
        let token = token_from_path(path);
        let state = &self.state;

        let id = match state
            .correlations
            .locate(&token, &state.config.resolution_order)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(token = %token, error = %e, "Failed reading correlation store");
                None
            }
        };

        let Some(id) = id else {
            return respond(StatusCode::NOT_FOUND, empty());
        };

        let location = format!(
            "{}/{}",
            state.config.locate_url.as_str().trim_end_matches('/'),
            id
        );
        match HeaderValue::from_str(&location) {
            Ok(location) => {
                let mut response = respond(StatusCode::SEE_OTHER, empty());
                response.headers_mut().insert(LOCATION, location);
                response
            }
            Err(e) => {
                tracing::error!(token = %token, id = %id, error = %e, "Stored id is not a valid location");
                respond(StatusCode::NOT_FOUND, empty())
            }
        }
    }

    async fn handle_write<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Display,
    {
        let path = request.uri().path().to_string();
        let body = match request.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed reading notice body");
                return close_connection(make_error_response(StatusCode::BAD_REQUEST));
            }
        };

        let token = Uuid::new_v4().to_string();
        let listener = &self.state.config.listener;
        let (ack, released) = AckBody::new(ack_body(&token, &listener.hostname, listener.port));

        tracing::debug!(token = %token, path = %path, bytes = body.len(), "Notice accepted");
        self.dispatch(token, body, path, released);

        let mut response = respond(StatusCode::OK, ack.boxed());
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        response
    }

    /// Waits for the acknowledgement to be released, then records the token
    /// and hands the notice to every configured backend.
    fn dispatch(&self, token: String, body: Bytes, path: String, released: oneshot::Receiver<()>) {
        let state = self.state.clone();

        tokio::spawn(async move {
            let _ = released.await;

            if let Err(e) = state.correlations.open(&token).await {
                STORE_WRITE_FAIL.increment();
                tracing::error!(token = %token, error = %e, "Failed writing pending record");
            }

            if let Some(airbrake) = state.airbrake.clone() {
                let token = token.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    airbrake.forward(&token, body, &path).await;
                });
            }

            if let (Some(sentry), Some(config)) = (state.sentry.clone(), &state.config.sentry)
                && let Some((event, target)) = prepare_event(&token, &body, config)
            {
                tokio::spawn(async move {
                    sentry.forward(&token, &event, &target).await;
                });
            }
        });
    }
}

/// Parses and translates a notice for Sentry. `None` means nothing is sent.
fn prepare_event(
    token: &str,
    body: &[u8],
    config: &SentryConfig,
) -> Option<(TranslatedEvent, BackendTarget)> {
    let notice = match notice::parse(body) {
        Ok(notice) => notice,
        Err(e) => {
            NOTICE_PARSE_FAIL.increment();
            tracing::warn!(token = %token, error = %e, "Could not parse notice for Sentry");
            return None;
        }
    };

    let target = match translate::resolve_target(&notice.api_key, config) {
        Ok(target) => target,
        Err(TranslateError::UnknownProject(api_key)) => {
            tracing::info!(token = %token, api_key = %api_key, "No Sentry project for API key, skipping");
            return None;
        }
        Err(e) => {
            tracing::warn!(token = %token, api_key = %notice.api_key, error = %e, "Could not route notice to Sentry");
            return None;
        }
    };

    match translate::translate(&notice, &target.endpoint().project, Utc::now()) {
        Ok(event) => Some((event, target)),
        Err(e) => {
            NOTICE_PARSE_FAIL.increment();
            tracing::warn!(token = %token, error = %e, "Could not translate notice for Sentry");
            None
        }
    }
}

fn empty() -> ResponseBody {
    Full::new(Bytes::new()).boxed()
}

fn respond(status: StatusCode, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    close_connection(response)
}

/// Marks the response as the last one on its connection.
fn close_connection(mut response: Response<ResponseBody>) -> Response<ResponseBody> {
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

impl Service<Request<Incoming>> for IngressService {
    type Response = Response<ResponseBody>;
    type Error = ForwarderError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
