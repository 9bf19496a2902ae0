//! # codeflow
//!
//! OAuth 2.0 Authorization Code Flow client.
//!
//! The client keeps the credentials and endpoints of an OAuth application,
//! captures the authorization code from the redirect callback, exchanges it
//! for an access token through a pluggable [`HttpTransport`], and reports the
//! outcome to a [`ClientListener`].
//!
//! ## Features
//!
//! - `reqwest-transport` (default) - [`ReqwestTransport`] and [`OAuth2Client::create`]
//! - `env` - load a [`ClientConfig`] from environment variables and `.env` files
//! - `full` - all features enabled
//!
//! ## Example
//!
//! ```rust,no_run
//! use codeflow::{ClientListener, FlowError, OAuth2Client, OAuthError};
//! use std::sync::Arc;
//!
//! struct Login;
//!
//! impl ClientListener for Login {
//!     fn did_acquire_access_token(&self, _client: &OAuth2Client, token: &str) {
//!         println!("signed in, token length {}", token.len());
//!     }
//!
//!     fn did_fail_with_invalid_grant_error(&self, _client: &OAuth2Client, error: &OAuthError) {
//!         println!("code rejected: {error}");
//!     }
//!
//!     fn did_fail_with_error(&self, _client: &OAuth2Client, error: &FlowError) {
//!         println!("sign-in failed with {}", error.code());
//!     }
//! }
//!
//! # async fn run() -> codeflow::Result<()> {
//! let client = OAuth2Client::create(
//!     "client_id",
//!     "client_secret",
//!     "https://auth.example.com/authorize",
//!     "https://auth.example.com/token",
//! )?;
//! client.set_redirect_url("myapp://oauth/callback")?;
//!
//! let login = Arc::new(Login);
//! client.set_listener(&login);
//!
//! // Send the user to the authorization page...
//! let request = client.authorization_url(&[]);
//! println!("open {}", request.url());
//!
//! // ...and hand every URL the browser navigates to back to the client.
//! if client.extract_authorization_code("myapp://oauth/callback?code=abc&state=...") {
//!     client.validate_authorization_code().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod callback;
mod client;
mod config;
mod error;
mod listener;
mod tokens;
pub mod transport;

pub use client::{AuthorizationRequest, FlowPhase, OAuth2Client};
pub use config::ClientConfig;
#[cfg(feature = "env")]
pub use config::{load_dotenv, load_dotenv_from};
pub use error::{
    ClientError, ConfigError, ErrorCode, FlowError, OAuthError, PreconditionError, Result,
};
pub use listener::{ChannelListener, ClientEvent, ClientListener};
pub use tokens::{AccessToken, CsrfState};
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
pub use transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
