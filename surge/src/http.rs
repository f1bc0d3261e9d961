//! The HTTP collaborator virtual users drive.
//!
//! The engine only depends on [`HttpClient`]; [`ReqwestClient`] is the production implementation
//! and tests substitute scripted clients.
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use surge_core::Method;
use thiserror::Error;
use tokio::time::Instant;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            headers: vec![],
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Time from sending the request until the body was fully read.
    pub duration: Duration,
}

impl HttpResponse {
    pub fn new(status: u16, duration: Duration) -> Self {
        Self {
            status,
            headers: vec![],
            body: String::new(),
            duration,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A request which never produced a response. Recorded as a failed sample, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

pub trait HttpClient: Send + Sync + 'static {
    /// Issue `request`, giving up after `timeout`.
    fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("surge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestClient {
    fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            let start = Instant::now();

            let mut builder = self
                .client
                .request(reqwest_method(request.method), &request.url)
                .timeout(timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|err| classify(err, timeout))?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response.text().await.map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Body(err.to_string())
                }
            })?;

            Ok(HttpResponse {
                status,
                headers,
                body,
                duration: start.elapsed(),
            })
        })
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let mut response = HttpResponse::new(200, Duration::from_millis(3));
        response
            .headers
            .push(("content-type".to_string(), "application/json".to_string()));
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn timeout_reason_is_readable() {
        let err = TransportError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "request timed out after 30s");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let client = ReqwestClient::new().unwrap();
        // Port 9 (discard) on loopback is closed on any sane test machine.
        let res = client
            .send(HttpRequest::get("http://127.0.0.1:9/"), Duration::from_secs(2))
            .await;
        assert!(matches!(
            res,
            Err(TransportError::Connect(_)) | Err(TransportError::Request(_))
        ));
    }
}
