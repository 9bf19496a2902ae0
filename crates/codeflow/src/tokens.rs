//! Access tokens and token endpoint response parsing.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use http::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{FlowError, OAuthError};
use crate::transport::{TransportError, TransportResponse};

const MASK_PREFIX_LEN: usize = 6;
const MASK_SUFFIX_LEN: usize = 4;

/// An access token issued by the token endpoint.
#[derive(Clone)]
pub struct AccessToken {
    access_token: String,
    token_type: String,
    expires_at: Option<Instant>,
    refresh_token: Option<String>,
    scopes: Option<Vec<String>>,
}

impl AccessToken {
    /// Create a token of the given type.
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: None,
            refresh_token: None,
            scopes: None,
        }
    }

    /// Set the lifetime reported by the server. A lifetime too large to
    /// represent is treated as no expiry.
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_at = Instant::now().checked_add(expires_in);
        self
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the granted scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// The access token string.
    pub fn secret(&self) -> &str {
        &self.access_token
    }

    /// The token type, `Bearer` unless the server said otherwise.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// The refresh token, if one was issued. Refreshing is left to the caller.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Scopes granted, if the server reported them.
    pub fn scopes(&self) -> Option<&[String]> {
        self.scopes.as_deref()
    }

    /// Time left before the token expires.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_at
            .and_then(|exp| exp.checked_duration_since(Instant::now()))
    }

    /// Whether the reported lifetime has elapsed. Tokens without a lifetime
    /// never expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() >= expires_at,
            None => false,
        }
    }

    /// Value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &mask_token(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Mask a credential for logging, keeping a short prefix and suffix.
pub(crate) fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    let len = trimmed.len();
    if len == 0 {
        return String::new();
    }
    if len <= MASK_PREFIX_LEN + MASK_SUFFIX_LEN || !trimmed.is_ascii() {
        return "*".repeat(len.min(8));
    }
    format!(
        "{}...{}",
        &trimmed[..MASK_PREFIX_LEN],
        &trimmed[len - MASK_SUFFIX_LEN..]
    )
}

/// Random CSRF `state` value for an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfState(String);

impl CsrfState {
    /// Generate a new random state.
    pub fn generate() -> Self {
        use rand::{rngs::OsRng, RngCore};

        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an existing state value.
    pub fn new(state: impl Into<String>) -> Self {
        Self(state.into())
    }

    /// The state value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against the `state` received on the callback.
    pub fn verify(&self, received: &str) -> bool {
        let expected = self.0.as_bytes();
        let received = received.as_bytes();
        if expected.len() != received.len() {
            return false;
        }
        expected
            .iter()
            .zip(received)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Display for CsrfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn str_field<'a>(json: &'a Value, key: &str) -> Option<&'a str> {
    json.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_expires_in(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a token endpoint response.
///
/// An `error` field wins over everything else, whatever the status. A 2xx
/// body with a non-empty `access_token` is a success. Anything else that is
/// valid JSON is reported as a protocol failure with the generic code; a body
/// that is not a JSON object is a malformed response.
pub(crate) fn parse_token_response(response: &TransportResponse) -> Result<AccessToken, FlowError> {
    let status = response.status;
    let json: Value = match serde_json::from_slice(&response.body) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) => {
            return Err(TransportError::MalformedResponse {
                status,
                message: "expected a JSON object".to_string(),
            }
            .into())
        }
        Err(e) => {
            return Err(TransportError::MalformedResponse {
                status,
                message: e.to_string(),
            }
            .into())
        }
    };

    if let Some(error) = json.get("error") {
        let mut err = OAuthError::new(error.as_str().unwrap_or_default()).with_status(status);
        if let Some(description) = str_field(&json, "error_description") {
            err = err.with_description(description);
        }
        if let Some(uri) = str_field(&json, "error_uri") {
            err = err.with_uri(uri);
        }
        return Err(err.into());
    }

    if !status.is_success() {
        return Err(unexpected_payload(status, "unsuccessful status without an error field"));
    }

    let access_token = str_field(&json, "access_token")
        .ok_or_else(|| unexpected_payload(status, "missing access_token"))?;
    let token_type = str_field(&json, "token_type").unwrap_or("Bearer");

    let mut token = AccessToken::new(access_token, token_type);

    if let Some(expires_in) = json.get("expires_in").and_then(parse_expires_in) {
        token = token.with_expires_in(Duration::from_secs(expires_in));
    }

    if let Some(refresh) = str_field(&json, "refresh_token") {
        token = token.with_refresh_token(refresh);
    }

    if let Some(scope) = str_field(&json, "scope") {
        token = token.with_scopes(scope.split_whitespace().map(String::from).collect());
    }

    Ok(token)
}

fn unexpected_payload(status: StatusCode, description: &str) -> FlowError {
    OAuthError::new("request_error")
        .with_description(description)
        .with_status(status)
        .into()
}
