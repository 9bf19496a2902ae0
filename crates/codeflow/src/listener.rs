//! Observer interface for token exchange outcomes.

use tokio::sync::mpsc;

use crate::client::OAuth2Client;
use crate::error::{ErrorCode, FlowError, OAuthError};
use crate::transport::{TransportError, TransportRequest};

/// Receives the outcome of token exchanges.
///
/// Two hooks are required. The others default to doing nothing, so a listener
/// only overrides what it cares about. On failure the specific hook for the
/// error code runs first, then [`did_fail_with_error`] always runs as well, so
/// a listener that only implements the generic hook still sees every failure.
///
/// The client holds its listener through a `Weak` reference: keep the `Arc`
/// alive for as long as callbacks are wanted.
///
/// [`did_fail_with_error`]: ClientListener::did_fail_with_error
pub trait ClientListener: Send + Sync {
    /// A new access token was acquired.
    fn did_acquire_access_token(&self, client: &OAuth2Client, token: &str);

    /// The authorization code was rejected (`invalid_grant`, 3001).
    fn did_fail_with_invalid_grant_error(&self, client: &OAuth2Client, error: &OAuthError);

    /// `unauthorized_client` (3002).
    fn did_fail_with_unauthorized_client_error(&self, _client: &OAuth2Client, _error: &OAuthError) {}

    /// `invalid_client` (3003).
    fn did_fail_with_invalid_client_error(&self, _client: &OAuth2Client, _error: &OAuthError) {}

    /// `invalid_request` (3004).
    fn did_fail_with_invalid_request_error(&self, _client: &OAuth2Client, _error: &OAuthError) {}

    /// `unsupported_grant_type` (3005).
    fn did_fail_with_unsupported_grant_type_error(
        &self,
        _client: &OAuth2Client,
        _error: &OAuthError,
    ) {
    }

    /// `invalid_scope` (3006).
    fn did_fail_with_invalid_scope_error(&self, _client: &OAuth2Client, _error: &OAuthError) {}

    /// Any failure, sent after the specific hook.
    fn did_fail_with_error(&self, _client: &OAuth2Client, _error: &FlowError) {}

    /// The request could not be completed or its response could not be read.
    fn did_fail_loading_request(
        &self,
        _client: &OAuth2Client,
        _request: &TransportRequest,
        _error: &TransportError,
    ) {
    }
}

/// Deliver a failure: the specific hook first, then the generic one.
pub(crate) fn notify_failure(
    listener: &dyn ClientListener,
    client: &OAuth2Client,
    request: &TransportRequest,
    error: &FlowError,
) {
    match error {
        FlowError::Protocol(oauth) => match oauth.code() {
            ErrorCode::InvalidGrant => listener.did_fail_with_invalid_grant_error(client, oauth),
            ErrorCode::UnauthorizedClient => {
                listener.did_fail_with_unauthorized_client_error(client, oauth)
            }
            ErrorCode::InvalidClient => listener.did_fail_with_invalid_client_error(client, oauth),
            ErrorCode::InvalidRequest => listener.did_fail_with_invalid_request_error(client, oauth),
            ErrorCode::UnsupportedGrantType => {
                listener.did_fail_with_unsupported_grant_type_error(client, oauth)
            }
            ErrorCode::InvalidScope => listener.did_fail_with_invalid_scope_error(client, oauth),
            ErrorCode::RequestError => {}
        },
        FlowError::Transport(transport) => {
            listener.did_fail_loading_request(client, request, transport)
        }
    }

    listener.did_fail_with_error(client, error);
}

/// Listener callbacks as values.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// `did_acquire_access_token`.
    AccessTokenAcquired {
        /// The new access token.
        token: String,
    },
    /// One of the taxonomy-specific hooks; the error's code tells which.
    OAuthFailure(OAuthError),
    /// `did_fail_loading_request`.
    RequestFailed {
        /// The request that failed.
        request: TransportRequest,
        /// The underlying error.
        error: TransportError,
    },
    /// `did_fail_with_error`.
    Failed(FlowError),
}

/// A listener that forwards every callback into a channel as a [`ClientEvent`].
///
/// ```
/// use codeflow::ChannelListener;
///
/// let (listener, mut events) = ChannelListener::channel();
/// // client.set_listener(&listener);
/// # drop(listener);
/// # assert!(events.try_recv().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    pub fn channel() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (std::sync::Arc::new(Self { tx }), rx)
    }

    fn send(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped, discarding client event");
        }
    }
}

impl ClientListener for ChannelListener {
    fn did_acquire_access_token(&self, _client: &OAuth2Client, token: &str) {
        self.send(ClientEvent::AccessTokenAcquired {
            token: token.to_string(),
        });
    }

    fn did_fail_with_invalid_grant_error(&self, _client: &OAuth2Client, error: &OAuthError) {
        self.send(ClientEvent::OAuthFailure(error.clone()));
    }

    fn did_fail_with_unauthorized_client_error(&self, _client: &OAuth2Client, error: &OAuthError) {
        self.send(ClientEvent::OAuthFailure(error.clone()));
    }

    fn did_fail_with_invalid_client_error(&self, _client: &OAuth2Client, error: &OAuthError) {
        self.send(ClientEvent::OAuthFailure(error.clone()));
    }

    fn did_fail_with_invalid_request_error(&self, _client: &OAuth2Client, error: &OAuthError) {
        self.send(ClientEvent::OAuthFailure(error.clone()));
    }

    fn did_fail_with_unsupported_grant_type_error(
        &self,
        _client: &OAuth2Client,
        error: &OAuthError,
    ) {
        self.send(ClientEvent::OAuthFailure(error.clone()));
    }

    fn did_fail_with_invalid_scope_error(&self, _client: &OAuth2Client, error: &OAuthError) {
        self.send(ClientEvent::OAuthFailure(error.clone()));
    }

    fn did_fail_with_error(&self, _client: &OAuth2Client, error: &FlowError) {
        self.send(ClientEvent::Failed(error.clone()));
    }

    fn did_fail_loading_request(
        &self,
        _client: &OAuth2Client,
        request: &TransportRequest,
        error: &TransportError,
    ) {
        self.send(ClientEvent::RequestFailed {
            request: request.clone(),
            error: error.clone(),
        });
    }
}
