//! OAuth2 authorization code flow client.

use http::Method;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::task::JoinHandle;
use url::Url;

use crate::callback::parse_callback;
use crate::config::{parse_redirect_url, ClientConfig};
use crate::error::{FlowError, PreconditionError, Result};
use crate::listener::{notify_failure, ClientListener};
use crate::tokens::{mask_token, parse_token_response, AccessToken, CsrfState};
use crate::transport::{HttpTransport, TransportRequest};

/// Query parameters the client sets itself on the authorization URL.
const RESERVED_AUTHORIZE_PARAMS: &[&str] =
    &["response_type", "client_id", "redirect_uri", "scope", "state"];

/// Where the client is in the authorization code flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Constructed, no authorization code yet.
    Configured,
    /// An authorization code is available.
    CodeReceived,
    /// A token exchange is running.
    TokenRequestInFlight,
    /// The last exchange produced an access token.
    Authorized,
    /// The last exchange failed. Supply a new code to try again.
    Failed,
}

struct FlowState {
    redirect_url: Option<Url>,
    authorization_code: Option<String>,
    code_generation: u64,
    access_token: Option<AccessToken>,
    pending_state: Option<CsrfState>,
    last_failure: Option<FlowError>,
    phase: FlowPhase,
}

/// Marks an exchange as running until dropped, including when the exchange
/// future is cancelled.
struct ExchangeTicket {
    in_flight: Arc<AtomicBool>,
    request: TransportRequest,
    code_generation: u64,
}

impl Drop for ExchangeTicket {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Authorization URL together with the CSRF state it carries.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// The URL to send the end user to.
    pub url: Url,
    /// The `state` parameter included in the URL.
    pub csrf_state: CsrfState,
}

impl AuthorizationRequest {
    /// The authorization URL as a string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

/// OAuth 2.0 client for the authorization code flow.
///
/// The client is driven by its owner: feed it the redirect URL the user lands
/// on with [`extract_authorization_code`], then call
/// [`validate_authorization_code`] to exchange the code for an access token.
/// The outcome of the exchange is reported to the [`ClientListener`];
/// only caller mistakes are returned as errors.
///
/// At most one exchange runs at a time. The client is `Send + Sync` and can be
/// shared through an `Arc`.
///
/// [`extract_authorization_code`]: OAuth2Client::extract_authorization_code
/// [`validate_authorization_code`]: OAuth2Client::validate_authorization_code
pub struct OAuth2Client {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<FlowState>,
    in_flight: Arc<AtomicBool>,
    listener: RwLock<Option<Weak<dyn ClientListener>>>,
}

impl OAuth2Client {
    /// Create a client with the default reqwest transport.
    #[cfg(feature = "reqwest-transport")]
    pub fn create(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorize_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        let config = ClientConfig::new(client_id, client_secret, authorize_url, token_url)?;
        Self::new(config)
    }

    /// Create a client from a configuration with the default reqwest transport.
    #[cfg(feature = "reqwest-transport")]
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = crate::transport::ReqwestTransport::new()?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client that sends requests through `transport`.
    pub fn with_transport<T>(mut config: ClientConfig, transport: T) -> Self
    where
        T: HttpTransport + 'static,
    {
        let redirect_url = config.redirect_url.take();
        Self {
            config,
            transport: Arc::new(transport),
            state: Mutex::new(FlowState {
                redirect_url,
                authorization_code: None,
                code_generation: 0,
                access_token: None,
                pending_state: None,
                last_failure: None,
                phase: FlowPhase::Configured,
            }),
            in_flight: Arc::new(AtomicBool::new(false)),
            listener: RwLock::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The client identifier.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// The authorization endpoint.
    pub fn authorize_url(&self) -> &Url {
        &self.config.authorize_url
    }

    /// The token endpoint.
    pub fn token_url(&self) -> &Url {
        &self.config.token_url
    }

    /// The redirect URL, if configured.
    pub fn redirect_url(&self) -> Option<Url> {
        self.state().redirect_url.clone()
    }

    /// Set or replace the redirect URL.
    pub fn set_redirect_url(&self, redirect_url: impl AsRef<str>) -> Result<()> {
        let url = parse_redirect_url(redirect_url.as_ref())?;
        self.state().redirect_url = Some(url);
        Ok(())
    }

    /// Register the listener. Only a weak reference is kept.
    pub fn set_listener<L>(&self, listener: &Arc<L>)
    where
        L: ClientListener + 'static,
    {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn ClientListener> = weak;
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(weak);
    }

    /// Remove the listener.
    pub fn clear_listener(&self) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn listener(&self) -> Option<Arc<dyn ClientListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// The current authorization code.
    pub fn authorization_code(&self) -> Option<String> {
        self.state().authorization_code.clone()
    }

    /// The access token string from the last successful exchange.
    pub fn access_token(&self) -> Option<String> {
        self.state()
            .access_token
            .as_ref()
            .map(|token| token.secret().to_string())
    }

    /// Full details of the last acquired token.
    pub fn token(&self) -> Option<AccessToken> {
        self.state().access_token.clone()
    }

    /// The failure of the last exchange, cleared by a successful one.
    pub fn last_failure(&self) -> Option<FlowError> {
        self.state().last_failure.clone()
    }

    /// The current phase of the flow.
    pub fn phase(&self) -> FlowPhase {
        if self.in_flight.load(Ordering::Acquire) {
            return FlowPhase::TokenRequestInFlight;
        }
        self.state().phase
    }

    /// Build the URL the end user visits to grant access.
    ///
    /// A fresh CSRF state is generated and remembered; until a callback
    /// carrying it arrives, callbacks with a different `state` are ignored.
    /// The client secret is never part of the URL.
    pub fn authorization_url(&self, additional_parameters: &[(&str, &str)]) -> AuthorizationRequest {
        let csrf_state = CsrfState::generate();
        let mut url = self.config.authorize_url.clone();

        {
            let mut state = self.state();
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id);
            if let Some(redirect) = &state.redirect_url {
                query.append_pair("redirect_uri", redirect.as_str());
            }
            if !self.config.scopes.is_empty() {
                let scope = self
                    .config
                    .scopes
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                query.append_pair("scope", &scope);
            }
            query.append_pair("state", csrf_state.as_str());

            for (key, value) in additional_parameters {
                if RESERVED_AUTHORIZE_PARAMS.contains(key) {
                    tracing::debug!(param = %key, "ignoring reserved authorization parameter");
                    continue;
                }
                query.append_pair(key, value);
            }
            drop(query);

            state.pending_state = Some(csrf_state.clone());
        }

        AuthorizationRequest { url, csrf_state }
    }

    /// Capture the authorization code from a redirect callback URL.
    ///
    /// The URL must match the configured redirect URL (scheme, host, port and
    /// path) and carry a non-empty `code`. Anything else leaves the client
    /// untouched, so this can be called on every navigation event. Returns
    /// whether a code was captured.
    pub fn extract_authorization_code(&self, callback_url: impl AsRef<str>) -> bool {
        let mut state = self.state();
        let Some(redirect) = state.redirect_url.as_ref() else {
            tracing::trace!("no redirect URL configured, ignoring callback");
            return false;
        };
        let Some(params) = parse_callback(redirect, callback_url.as_ref()) else {
            return false;
        };
        let Some(code) = params.code else {
            tracing::debug!("redirect callback carried no authorization code");
            return false;
        };

        if let Some(expected) = &state.pending_state {
            let received = params.state.as_deref().unwrap_or_default();
            if !expected.verify(received) {
                tracing::warn!("redirect callback state mismatch, ignoring authorization code");
                return false;
            }
        }

        tracing::debug!(code = %mask_token(&code), "authorization code received");
        state.pending_state = None;
        store_code(&mut state, code);
        true
    }

    /// Set the authorization code directly. Blank codes are ignored.
    pub fn set_authorization_code(&self, code: impl Into<String>) -> bool {
        let code = code.into();
        let code = code.trim();
        if code.is_empty() {
            return false;
        }
        store_code(&mut self.state(), code.to_string());
        true
    }

    /// Forget the authorization code, access token and pending CSRF state.
    ///
    /// Fails while an exchange is in flight.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state();
        if self.in_flight.load(Ordering::Acquire) {
            return Err(PreconditionError::ExchangeInFlight.into());
        }
        state.authorization_code = None;
        state.code_generation += 1;
        state.access_token = None;
        state.pending_state = None;
        state.last_failure = None;
        state.phase = FlowPhase::Configured;
        tracing::debug!(client_id = %self.config.client_id, "client state reset");
        Ok(())
    }

    /// Exchange the authorization code for an access token.
    ///
    /// Returns an error only when no authorization code is set or another
    /// exchange is already running; no request is sent in that case. The
    /// outcome of the exchange itself goes to the listener.
    pub async fn validate_authorization_code(&self) -> Result<()> {
        let ticket = self.begin_exchange()?;
        self.complete_exchange(ticket).await;
        Ok(())
    }

    /// Check the preconditions now and run the exchange on a background task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_validate_authorization_code(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let ticket = self.begin_exchange()?;
        let client = Arc::clone(self);
        Ok(tokio::spawn(async move {
            client.complete_exchange(ticket).await;
        }))
    }

    fn begin_exchange(&self) -> Result<ExchangeTicket> {
        let state = self.state();
        let code = state
            .authorization_code
            .clone()
            .ok_or(PreconditionError::MissingAuthorizationCode)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PreconditionError::ExchangeInFlight.into());
        }

        let request = self.token_request(&code, state.redirect_url.as_ref());
        Ok(ExchangeTicket {
            in_flight: Arc::clone(&self.in_flight),
            request,
            code_generation: state.code_generation,
        })
    }

    fn token_request(&self, code: &str, redirect_url: Option<&Url>) -> TransportRequest {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(redirect) = redirect_url {
            params.push(("redirect_uri", redirect.as_str()));
        }

        let form_data = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        TransportRequest::new(Method::POST, self.config.token_url.as_str())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(form_data)
    }

    #[tracing::instrument(skip_all, fields(client_id = %self.config.client_id, token_url = %self.config.token_url))]
    async fn complete_exchange(&self, ticket: ExchangeTicket) {
        tracing::debug!("sending token request");
        let result = match self.transport.execute(ticket.request.clone()).await {
            Ok(response) => parse_token_response(&response),
            Err(err) => Err(FlowError::from(err)),
        };

        {
            let mut state = self.state();
            let superseded = state.code_generation != ticket.code_generation;
            match &result {
                Ok(token) => {
                    state.access_token = Some(token.clone());
                    state.last_failure = None;
                    state.phase = if superseded {
                        FlowPhase::CodeReceived
                    } else {
                        FlowPhase::Authorized
                    };
                }
                Err(err) => {
                    state.last_failure = Some(err.clone());
                    state.phase = if superseded {
                        FlowPhase::CodeReceived
                    } else {
                        FlowPhase::Failed
                    };
                }
            }
        }

        let request = ticket.request.clone();
        // Listeners may start the next exchange from inside a callback.
        drop(ticket);

        match &result {
            Ok(token) => tracing::info!(
                access_token = %mask_token(token.secret()),
                token_type = %token.token_type(),
                "access token acquired"
            ),
            Err(err) => tracing::warn!(code = err.code().as_u16(), error = %err, "token exchange failed"),
        }

        let Some(listener) = self.listener() else {
            tracing::debug!("no live listener, skipping callbacks");
            return;
        };

        match &result {
            Ok(token) => listener.did_acquire_access_token(self, token.secret()),
            Err(err) => notify_failure(listener.as_ref(), self, &request, err),
        }
    }
}

fn store_code(state: &mut FlowState, code: String) {
    state.authorization_code = Some(code);
    state.code_generation += 1;
    state.phase = FlowPhase::CodeReceived;
}

impl fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("config", &self.config)
            .field("redirect_url", &self.redirect_url().map(String::from))
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, ErrorCode, OAuthError};
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use http::StatusCode;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Notify;

    type Reply = std::result::Result<TransportResponse, TransportError>;

    /// Replays queued replies and records every request.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<TransportRequest>>,
        gate: Option<Arc<Notify>>,
        received: Arc<Notify>,
    }

    impl ScriptedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                gate: Some(gate),
                ..Self::default()
            })
        }

        fn reply_json(&self, status: u16, body: serde_json::Value) {
            self.replies.lock().unwrap().push_back(Ok(TransportResponse::new(
                StatusCode::from_u16(status).unwrap(),
                body.to_string(),
            )));
        }

        fn reply_error(&self, err: TransportError) {
            self.replies.lock().unwrap().push_back(Err(err));
        }

        fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: TransportRequest) -> Reply {
            self.requests.lock().unwrap().push(request);
            self.received.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("no scripted reply".into())))
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ClientListener for RecordingListener {
        fn did_acquire_access_token(&self, client: &OAuth2Client, token: &str) {
            // The client must be readable from inside a callback.
            assert_eq!(client.access_token().as_deref(), Some(token));
            self.push(format!("acquired:{token}"));
        }

        fn did_fail_with_invalid_grant_error(&self, _client: &OAuth2Client, _error: &OAuthError) {
            self.push("invalid_grant");
        }

        fn did_fail_with_unauthorized_client_error(&self, _: &OAuth2Client, _: &OAuthError) {
            self.push("unauthorized_client");
        }

        fn did_fail_with_invalid_client_error(&self, _: &OAuth2Client, _: &OAuthError) {
            self.push("invalid_client");
        }

        fn did_fail_with_invalid_request_error(&self, _: &OAuth2Client, _: &OAuthError) {
            self.push("invalid_request");
        }

        fn did_fail_with_unsupported_grant_type_error(&self, _: &OAuth2Client, _: &OAuthError) {
            self.push("unsupported_grant_type");
        }

        fn did_fail_with_invalid_scope_error(&self, _: &OAuth2Client, _: &OAuthError) {
            self.push("invalid_scope");
        }

        fn did_fail_with_error(&self, _client: &OAuth2Client, error: &FlowError) {
            self.push(format!("failed:{}", error.code().as_u16()));
        }

        fn did_fail_loading_request(
            &self,
            _client: &OAuth2Client,
            request: &TransportRequest,
            _error: &TransportError,
        ) {
            self.push(format!("loading_failed:{}", request.url));
        }
    }

    /// Implements only the required hooks.
    #[derive(Default)]
    struct MinimalListener {
        acquired: Mutex<Vec<String>>,
    }

    impl ClientListener for MinimalListener {
        fn did_acquire_access_token(&self, _client: &OAuth2Client, token: &str) {
            self.acquired.lock().unwrap().push(token.to_string());
        }

        fn did_fail_with_invalid_grant_error(&self, _client: &OAuth2Client, _error: &OAuthError) {}
    }

    fn config() -> ClientConfig {
        ClientConfig::new(
            "my_client",
            "my_secret",
            "https://auth.example.com/authorize",
            "https://auth.example.com/token",
        )
        .unwrap()
        .redirect_url("https://app.example.com/callback")
        .unwrap()
    }

    fn client_with(transport: &Arc<ScriptedTransport>) -> (Arc<OAuth2Client>, Arc<RecordingListener>) {
        let client = Arc::new(OAuth2Client::with_transport(config(), Arc::clone(transport)));
        let listener = Arc::new(RecordingListener::default());
        client.set_listener(&listener);
        (client, listener)
    }

    fn form(request: &TransportRequest) -> Vec<(String, String)> {
        url::form_urlencoded::parse(&request.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_new_client_has_no_token() {
        let transport = ScriptedTransport::new();
        let (client, _) = client_with(&transport);

        assert!(client.access_token().is_none());
        assert!(client.authorization_code().is_none());
        assert_eq!(client.phase(), FlowPhase::Configured);
    }

    #[tokio::test]
    async fn test_validate_without_code_is_precondition_error() {
        let transport = ScriptedTransport::new();
        let (client, listener) = client_with(&transport);

        let err = client.validate_authorization_code().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Precondition(PreconditionError::MissingAuthorizationCode)
        ));
        assert!(transport.requests().is_empty());
        assert!(listener.events().is_empty());

        assert!(client.spawn_validate_authorization_code().is_err());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let transport = ScriptedTransport::new();
        transport.reply_json(200, serde_json::json!({"access_token": "T1", "expires_in": 3600}));
        let (client, listener) = client_with(&transport);

        assert!(client.extract_authorization_code("https://app.example.com/callback?code=ABC123"));
        assert_eq!(client.phase(), FlowPhase::CodeReceived);

        client.validate_authorization_code().await.unwrap();

        assert_eq!(listener.events(), vec!["acquired:T1"]);
        assert_eq!(client.access_token().as_deref(), Some("T1"));
        assert_eq!(client.phase(), FlowPhase::Authorized);
        assert!(client.token().unwrap().expires_in().is_some());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "https://auth.example.com/token");
        assert_eq!(
            request.header_value("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            form(request),
            vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("code".to_string(), "ABC123".to_string()),
                ("client_id".to_string(), "my_client".to_string()),
                ("client_secret".to_string(), "my_secret".to_string()),
                (
                    "redirect_uri".to_string(),
                    "https://app.example.com/callback".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_lifetime_still_reaches_listener() {
        let transport = ScriptedTransport::new();
        transport.reply_json(
            200,
            serde_json::json!({"access_token": "T1", "expires_in": u64::MAX}),
        );
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        client
            .spawn_validate_authorization_code()
            .unwrap()
            .await
            .unwrap();

        assert_eq!(listener.events(), vec!["acquired:T1"]);
        assert!(client.token().unwrap().expires_in().is_none());
    }

    #[tokio::test]
    async fn test_redirect_uri_omitted_without_redirect_url() {
        let transport = ScriptedTransport::new();
        transport.reply_json(200, serde_json::json!({"access_token": "T1"}));
        let mut config = config();
        config.redirect_url = None;
        let client = OAuth2Client::with_transport(config, Arc::clone(&transport));

        client.set_authorization_code("code-1");
        client.validate_authorization_code().await.unwrap();

        let form = form(&transport.requests()[0]);
        assert!(form.iter().all(|(k, _)| k != "redirect_uri"));
    }

    #[tokio::test]
    async fn test_invalid_grant_fires_specific_and_generic() {
        let transport = ScriptedTransport::new();
        transport.reply_json(400, serde_json::json!({"error": "invalid_grant"}));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("stale");
        client.validate_authorization_code().await.unwrap();

        assert_eq!(listener.events(), vec!["invalid_grant", "failed:3001"]);
        assert!(client.access_token().is_none());
        assert_eq!(client.phase(), FlowPhase::Failed);
        assert_eq!(
            client.last_failure().map(|e| e.code()),
            Some(ErrorCode::InvalidGrant)
        );
    }

    #[tokio::test]
    async fn test_each_error_code_reaches_its_hook() {
        let cases = [
            ("unauthorized_client", "failed:3002"),
            ("invalid_client", "failed:3003"),
            ("invalid_request", "failed:3004"),
            ("unsupported_grant_type", "failed:3005"),
            ("invalid_scope", "failed:3006"),
        ];

        for (error, generic) in cases {
            let transport = ScriptedTransport::new();
            transport.reply_json(400, serde_json::json!({"error": error}));
            let (client, listener) = client_with(&transport);

            client.set_authorization_code("code");
            client.validate_authorization_code().await.unwrap();

            assert_eq!(listener.events(), vec![error, generic]);
        }
    }

    #[tokio::test]
    async fn test_unknown_error_only_fires_generic() {
        let transport = ScriptedTransport::new();
        transport.reply_json(400, serde_json::json!({"error": "access_denied"}));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();

        assert_eq!(listener.events(), vec!["failed:3007"]);
    }

    #[tokio::test]
    async fn test_error_on_success_status_keeps_previous_token() {
        let transport = ScriptedTransport::new();
        transport.reply_json(200, serde_json::json!({"access_token": "T1"}));
        transport.reply_json(200, serde_json::json!({"error": "invalid_grant"}));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();
        client.validate_authorization_code().await.unwrap();

        assert_eq!(
            listener.events(),
            vec!["acquired:T1", "invalid_grant", "failed:3001"]
        );
        assert_eq!(client.access_token().as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_transport_failure_fires_loading_hook() {
        let transport = ScriptedTransport::new();
        transport.reply_error(TransportError::Connect("connection refused".into()));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();

        assert_eq!(
            listener.events(),
            vec![
                "loading_failed:https://auth.example.com/token",
                "failed:3007"
            ]
        );
        assert_eq!(client.phase(), FlowPhase::Failed);
    }

    #[tokio::test]
    async fn test_malformed_body_fires_loading_hook() {
        let transport = ScriptedTransport::new();
        transport
            .replies
            .lock()
            .unwrap()
            .push_back(Ok(TransportResponse::new(StatusCode::OK, "not json")));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();

        assert_eq!(
            listener.events(),
            vec![
                "loading_failed:https://auth.example.com/token",
                "failed:3007"
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_with_new_code_after_invalid_grant() {
        let transport = ScriptedTransport::new();
        transport.reply_json(400, serde_json::json!({"error": "invalid_grant"}));
        transport.reply_json(200, serde_json::json!({"access_token": "T2"}));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("old");
        client.validate_authorization_code().await.unwrap();
        assert_eq!(client.phase(), FlowPhase::Failed);

        assert!(client.extract_authorization_code("https://app.example.com/callback?code=new"));
        assert_eq!(client.phase(), FlowPhase::CodeReceived);
        client.validate_authorization_code().await.unwrap();

        assert_eq!(client.access_token().as_deref(), Some("T2"));
        assert_eq!(client.phase(), FlowPhase::Authorized);
        assert!(client.last_failure().is_none());
        assert_eq!(
            listener.events(),
            vec!["invalid_grant", "failed:3001", "acquired:T2"]
        );
        assert_eq!(form(&transport.requests()[1])[1].1, "new");
    }

    #[tokio::test]
    async fn test_minimal_listener_sees_success_and_ignores_optional_failures() {
        let transport = ScriptedTransport::new();
        transport.reply_json(400, serde_json::json!({"error": "invalid_scope"}));
        transport.reply_json(200, serde_json::json!({"access_token": "T1"}));
        let client = OAuth2Client::with_transport(config(), Arc::clone(&transport));
        let listener = Arc::new(MinimalListener::default());
        client.set_listener(&listener);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();
        client.validate_authorization_code().await.unwrap();

        assert_eq!(*listener.acquired.lock().unwrap(), vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn test_released_listener_is_skipped() {
        let transport = ScriptedTransport::new();
        transport.reply_json(200, serde_json::json!({"access_token": "T1"}));
        let (client, listener) = client_with(&transport);
        drop(listener);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();

        assert_eq!(client.access_token().as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_concurrent_exchange_is_rejected() {
        let gate = Arc::new(Notify::new());
        let transport = ScriptedTransport::gated(Arc::clone(&gate));
        transport.reply_json(200, serde_json::json!({"access_token": "T1"}));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        let handle = client.spawn_validate_authorization_code().unwrap();
        transport.received.notified().await;

        assert_eq!(client.phase(), FlowPhase::TokenRequestInFlight);
        let err = client.validate_authorization_code().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Precondition(PreconditionError::ExchangeInFlight)
        ));
        assert!(matches!(
            client.reset(),
            Err(ClientError::Precondition(PreconditionError::ExchangeInFlight))
        ));

        gate.notify_one();
        handle.await.unwrap();

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(listener.events(), vec!["acquired:T1"]);
        assert_eq!(client.phase(), FlowPhase::Authorized);
    }

    #[tokio::test]
    async fn test_cancelled_exchange_releases_in_flight() {
        let gate = Arc::new(Notify::new());
        let transport = ScriptedTransport::gated(Arc::clone(&gate));
        let (client, listener) = client_with(&transport);

        client.set_authorization_code("code");
        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            client.validate_authorization_code(),
        )
        .await;
        assert!(attempt.is_err());

        assert_eq!(client.phase(), FlowPhase::CodeReceived);
        assert!(listener.events().is_empty());
        assert!(client.reset().is_ok());
    }

    #[tokio::test]
    async fn test_code_replaced_mid_flight() {
        let gate = Arc::new(Notify::new());
        let transport = ScriptedTransport::gated(Arc::clone(&gate));
        transport.reply_json(400, serde_json::json!({"error": "invalid_grant"}));
        let (client, _listener) = client_with(&transport);

        client.set_authorization_code("first");
        let handle = client.spawn_validate_authorization_code().unwrap();
        transport.received.notified().await;

        client.set_authorization_code("second");
        gate.notify_one();
        handle.await.unwrap();

        assert_eq!(client.phase(), FlowPhase::CodeReceived);
        assert_eq!(client.authorization_code().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_reset_returns_to_configured() {
        let transport = ScriptedTransport::new();
        transport.reply_json(200, serde_json::json!({"access_token": "T1"}));
        let (client, _listener) = client_with(&transport);

        client.set_authorization_code("code");
        client.validate_authorization_code().await.unwrap();
        client.reset().unwrap();

        assert!(client.access_token().is_none());
        assert!(client.authorization_code().is_none());
        assert_eq!(client.phase(), FlowPhase::Configured);
        assert!(client.validate_authorization_code().await.is_err());
    }

    #[test]
    fn test_extract_ignores_foreign_urls() {
        let transport = ScriptedTransport::new();
        let (client, _) = client_with(&transport);
        client.set_authorization_code("kept");

        assert!(!client.extract_authorization_code("https://evil.example.com/callback?code=X"));
        assert!(!client.extract_authorization_code("https://app.example.com/callback?state=1"));
        assert!(!client.extract_authorization_code("::not a url::"));
        assert_eq!(client.authorization_code().as_deref(), Some("kept"));
    }

    #[test]
    fn test_extract_without_redirect_url_is_noop() {
        let mut config = config();
        config.redirect_url = None;
        let client = OAuth2Client::with_transport(config, ScriptedTransport::new());

        assert!(!client.extract_authorization_code("https://app.example.com/callback?code=X"));
        assert!(client.authorization_code().is_none());

        client.set_redirect_url("https://app.example.com/callback").unwrap();
        assert!(client.extract_authorization_code("https://app.example.com/callback?code=X"));
    }

    #[test]
    fn test_authorization_url() {
        let transport = ScriptedTransport::new();
        let client = OAuth2Client::with_transport(config().scope("profile"), Arc::clone(&transport));

        let request = client.authorization_url(&[
            ("prompt", "consent"),
            ("client_id", "spoofed"),
            ("scope", "admin"),
        ]);
        let pairs: Vec<(String, String)> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(request.url().starts_with("https://auth.example.com/authorize?"));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("client_id".into(), "my_client".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "https://app.example.com/callback".into()
        )));
        assert!(pairs.contains(&("scope".into(), "profile".into())));
        assert!(pairs.contains(&("prompt".into(), "consent".into())));
        assert!(pairs.contains(&("state".into(), request.csrf_state.to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "client_id").count(), 1);
        assert_eq!(pairs.iter().filter(|(k, _)| k == "scope").count(), 1);
        assert!(!request.url().contains("my_secret"));
    }

    #[test]
    fn test_callback_state_is_enforced_after_authorization_url() {
        let transport = ScriptedTransport::new();
        let (client, _) = client_with(&transport);
        let request = client.authorization_url(&[]);

        assert!(!client.extract_authorization_code(
            "https://app.example.com/callback?code=X&state=forged"
        ));
        assert!(!client.extract_authorization_code("https://app.example.com/callback?code=X"));
        assert!(client.authorization_code().is_none());

        let callback = format!(
            "https://app.example.com/callback?code=X&state={}",
            request.csrf_state
        );
        assert!(client.extract_authorization_code(&callback));
        assert_eq!(client.authorization_code().as_deref(), Some("X"));
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let client = OAuth2Client::with_transport(config(), ScriptedTransport::new());
        let debug = format!("{:?}", client);
        assert!(!debug.contains("my_secret"));
    }
}
