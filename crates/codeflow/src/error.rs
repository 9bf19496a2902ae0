//! Error types for the authorization code flow.
//!
//! Two classes of failure exist. Caller mistakes (bad configuration, calling
//! the exchange without a code) are returned synchronously as [`ClientError`].
//! Everything that happens after the token request has been dispatched is
//! reported to the listener as a [`FlowError`] and never returned.

use http::StatusCode;
use std::fmt;
use thiserror::Error;

use crate::transport::TransportError;

/// Internal error codes for token exchange failures.
///
/// The numeric values are stable and may be persisted or shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The authorization code was invalid, expired, or already used.
    InvalidGrant,
    /// The client is not authorized to use this grant type.
    UnauthorizedClient,
    /// Client authentication failed.
    InvalidClient,
    /// The request was missing a parameter or was otherwise malformed.
    InvalidRequest,
    /// The authorization server does not support the grant type.
    UnsupportedGrantType,
    /// The requested scope is invalid or exceeds what was granted.
    InvalidScope,
    /// Any other failure, including transport errors and malformed responses.
    RequestError,
}

impl ErrorCode {
    /// Map an RFC 6749 `error` value to an internal code.
    pub fn from_oauth_error(value: &str) -> Self {
        match value {
            "invalid_grant" => Self::InvalidGrant,
            "unauthorized_client" => Self::UnauthorizedClient,
            "invalid_client" => Self::InvalidClient,
            "invalid_request" => Self::InvalidRequest,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_scope" => Self::InvalidScope,
            _ => Self::RequestError,
        }
    }

    /// The numeric code (3001..=3007).
    pub fn as_u16(self) -> u16 {
        match self {
            Self::InvalidGrant => 3001,
            Self::UnauthorizedClient => 3002,
            Self::InvalidClient => 3003,
            Self::InvalidRequest => 3004,
            Self::UnsupportedGrantType => 3005,
            Self::InvalidScope => 3006,
            Self::RequestError => 3007,
        }
    }

    /// The RFC 6749 error value, or `None` for [`ErrorCode::RequestError`].
    pub fn oauth_error(self) -> Option<&'static str> {
        match self {
            Self::InvalidGrant => Some("invalid_grant"),
            Self::UnauthorizedClient => Some("unauthorized_client"),
            Self::InvalidClient => Some("invalid_client"),
            Self::InvalidRequest => Some("invalid_request"),
            Self::UnsupportedGrantType => Some("unsupported_grant_type"),
            Self::InvalidScope => Some("invalid_scope"),
            Self::RequestError => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.oauth_error() {
            Some(name) => write!(f, "{} ({})", self.as_u16(), name),
            None => write!(f, "{} (request_error)", self.as_u16()),
        }
    }
}

/// An error reported by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthError {
    code: ErrorCode,
    error: String,
    description: Option<String>,
    uri: Option<String>,
    status: Option<StatusCode>,
}

impl OAuthError {
    /// Create an error from the raw `error` value returned by the server.
    pub fn new(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            code: ErrorCode::from_oauth_error(&error),
            error,
            description: None,
            uri: None,
            status: None,
        }
    }

    /// Set the human-readable `error_description`.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the `error_uri`.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the HTTP status the error arrived with.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// The internal error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The raw `error` value as sent by the server.
    pub fn error(&self) -> &str {
        &self.error
    }

    /// The `error_description`, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The `error_uri`, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// The HTTP status of the response, if known.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token endpoint returned {}", self.error)?;
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

impl std::error::Error for OAuthError {}

/// Failure of a dispatched token exchange, as delivered to the listener.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// The token endpoint answered with an OAuth error, or with a payload
    /// that carried neither a token nor an error.
    #[error(transparent)]
    Protocol(#[from] OAuthError),

    /// The request could not be completed or the response could not be read.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FlowError {
    /// The internal error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            FlowError::Protocol(err) => err.code(),
            FlowError::Transport(_) => ErrorCode::RequestError,
        }
    }
}

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A URL field could not be parsed.
    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        /// The offending field.
        field: &'static str,
        /// The parse failure.
        #[source]
        source: url::ParseError,
    },

    /// An endpoint URL used a scheme other than http or https.
    #[error("unsupported URL scheme for {field}: {scheme}")]
    UnsupportedScheme {
        /// The offending field.
        field: &'static str,
        /// The scheme found.
        scheme: String,
    },

    /// Environment variable deserialization failed.
    #[cfg(feature = "env")]
    #[error("environment configuration error: {0}")]
    Env(#[from] envy::Error),
}

/// A method was called in a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// The token exchange requires an authorization code.
    #[error("no authorization code has been set")]
    MissingAuthorizationCode,

    /// Another token exchange is already running on this client.
    #[error("a token exchange is already in flight")]
    ExchangeInFlight,
}

/// Errors returned synchronously to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The call is not allowed in the current state.
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// The default transport could not be built.
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Result alias for synchronous client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
