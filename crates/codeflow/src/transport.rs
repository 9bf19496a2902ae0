//! HTTP collaborator used for the token exchange.
//!
//! The client depends only on [`HttpTransport`], a minimal request/response
//! contract. A reqwest-backed implementation is available behind the
//! `reqwest-transport` feature.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// An outgoing HTTP request.
#[derive(Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl TransportRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// The body of a token request carries the client secret.
impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// A response received from the server.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Create a response with the given status and body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Failure to complete a request or to read its response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The response arrived but its body could not be interpreted.
    #[error("malformed response (status {status}): {message}")]
    MalformedResponse {
        /// HTTP status of the response.
        status: StatusCode,
        /// What went wrong.
        message: String,
    },

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// Executes HTTP requests on behalf of the client.
///
/// Implementations decide timeouts, retries and which runtime the request
/// runs on. The returned future must be `Send`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute a request and return the full response.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        (**self).execute(request).await
    }
}

#[cfg(feature = "reqwest-transport")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest-transport")]
mod reqwest_transport {
    use super::*;
    use std::time::Duration;

    /// [`HttpTransport`] backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Default request timeout.
        pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

        /// Build a transport with the default timeout.
        pub fn new() -> Result<Self, TransportError> {
            Self::with_timeout(Self::DEFAULT_TIMEOUT)
        }

        /// Build a transport with a custom timeout.
        pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| TransportError::Other(e.to_string()))?;
            Ok(Self { client })
        }

        /// Wrap an existing reqwest client.
        pub fn from_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn map_error(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn execute(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let mut builder = self.client.request(request.method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.body(request.body).send().await.map_err(map_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(map_error)?;

            tracing::debug!(status = %status, body_len = body.len(), "token endpoint responded");

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_debug_hides_body() {
        let request = TransportRequest::new(Method::POST, "https://auth.example.com/token")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("client_secret=hunter2");

        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("body_len: 21"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = TransportRequest::new(Method::POST, "https://auth.example.com/token")
            .header("Accept", "application/json");

        assert_eq!(request.header_value("accept"), Some("application/json"));
        assert_eq!(request.header_value("content-type"), None);
    }
}
