use super::matcher::RequestMatcher;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde_json::json;

/// A canned answer for requests accepted by a matcher, with a call budget
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: RequestMatcher,
    pub(crate) response: MockResponse,
    pub(crate) times: Times,
    pub(crate) call_count: usize,
}

impl Expectation {
    /// Answer matching requests with an empty 200, expected once
    pub fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            response: MockResponse::default(),
            times: Times::Once,
            call_count: 0,
        }
    }

    /// Whether the observed call count fits the budget
    pub fn is_satisfied(&self) -> bool {
        self.times.admits(self.call_count)
    }
}

/// How many calls an expectation should see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Once,
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Any,
}

impl Times {
    pub fn admits(self, calls: usize) -> bool {
        match self {
            Times::Once => calls == 1,
            Times::Exactly(n) => calls == n,
            Times::AtLeast(min) => calls >= min,
            Times::AtMost(max) => calls <= max,
            Times::Any => true,
        }
    }
}

/// What the mock token endpoint sends back
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A successful token response with a bearer token
    pub fn token(access_token: &str) -> Self {
        Self::new().json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600,
        }))
    }

    /// A `400 Bad Request` OAuth error response
    pub fn oauth_error(error: &str) -> Self {
        Self::new()
            .status(StatusCode::BAD_REQUEST)
            .json(json!({ "error": error }))
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Panics if `key` or `value` is not a valid header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(
            http::header::HeaderName::from_bytes(key.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = body.to_string().into();
        self
    }

    pub(crate) fn to_http(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}
