//! HTTP transport abstraction.
//!
//! Sessions talk to the wire through the [`Transport`] trait so that tests
//! can script responses without a network. [`ReqwestTransport`] is the
//! production implementation.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

/// A request as the session driver builds it.
///
/// Plain owned parts rather than a client-specific builder: the recovery
/// interceptor must be able to rewrite a request in place between retry
/// attempts.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }
}

/// A response as the session driver classifies it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket-level failure from a custom transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cancelled")]
    Cancelled,
}

/// Sends one HTTP request and returns the response.
///
/// Implementations must be safe for concurrent use; sessions share one
/// transport. Cancellation aborts an in-flight send with
/// [`TransportError::Cancelled`].
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}

/// Production transport backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    ///
    /// Redirects are disabled: 308 is the protocol's resume-incomplete
    /// signal and must reach the session driver untouched.
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client (connection pool, timeouts, proxies are the
    /// caller's business).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|_| TransportError::InvalidRequest(format!(
                    "bad HTTP method {:?}",
                    request.method
                )))?;

            let mut builder = self.http.request(method, &request.url);
            for (name, value) in &request.headers {
                // reqwest derives Content-Length from the body itself.
                if name.eq_ignore_ascii_case("content-length") {
                    continue;
                }
                builder = builder.header(name, value);
            }
            builder = builder.body(request.body.clone());

            let exchange = async {
                let response = builder.send().await?;
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                let body = response.bytes().await?.to_vec();
                Ok(HttpResponse {
                    status,
                    headers,
                    body,
                })
            };

            tokio::select! {
                result = exchange => result,
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
            }
        })
    }
}
