use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderMap;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use metrics_util::debugging::{DebugValue, Snapshotter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Local HTTP server that answers every request with a canned reply and
/// records what it received.
pub struct TestBackend {
    pub url: Url,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestBackend {
    pub async fn spawn(status: StatusCode, body: &'static str) -> Self {
        Self::start(status, body, None).await
    }

    pub async fn spawn_with_delay(status: StatusCode, body: &'static str, delay: Duration) -> Self {
        Self::start(status, body, Some(delay)).await
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Polls until `count` requests were received or two seconds pass.
    pub async fn wait_for_requests(&self, count: usize) -> Vec<RecordedRequest> {
        for _ in 0..200 {
            if self.requests.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests()
    }

    async fn start(status: StatusCode, body: &'static str, delay: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let recorded = recorded.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move {
                            let (parts, req_body) = req.into_parts();
                            let bytes = req_body
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_else(|_| Bytes::new());

                            recorded.lock().push(RecordedRequest {
                                method: parts.method,
                                path: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body: bytes,
                            });

                            if let Some(delay) = delay {
                                tokio::time::sleep(delay).await;
                            }

                            let response = Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from_static(body.as_bytes())))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        TestBackend {
            url: Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
            requests,
        }
    }
}

/// Every counter the snapshotter's recorder has seen, by name.
pub fn counters(snapshotter: &Snapshotter) -> HashMap<String, u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((key.key().name().to_string(), count)),
            _ => None,
        })
        .collect()
}

/// A URL on a local port nothing listens on.
pub async fn closed_port_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}

/// A well formed Airbrake v2 notice.
pub const NOTICE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<notice version="2.0">
  <api-key>76fdb93ab2cf276ec080671a8b3d3866</api-key>
  <notifier>
    <name>airbrake</name>
    <version>2.2.0</version>
    <url>https://github.com/airbrake/node-airbrake</url>
  </notifier>
  <error>
    <class>TypeError</class>
    <message>TypeError: undefined is not a function</message>
    <backtrace>
      <line method="Object.handler" file="[PROJECT_ROOT]/lib/handler.js" number="12"/>
      <line method="Server.emit" file="events.js" number="67"/>
      <line method="process" file="[PROJECT_ROOT]/app.js" number="5"/>
    </backtrace>
  </error>
  <request>
    <url>http://example.com/orders/1</url>
    <component/>
    <action/>
    <params>
      <var key="id">1</var>
      <var key="empty"/>
    </params>
    <cgi-data>
      <var key="SERVER_NAME">example.com</var>
      <var key="HTTP_USER_AGENT">curl/8.0</var>
    </cgi-data>
  </request>
  <server-environment>
    <project-root>/srv/app</project-root>
    <environment-name>production</environment-name>
    <hostname>web-1</hostname>
  </server-environment>
</notice>"#;
