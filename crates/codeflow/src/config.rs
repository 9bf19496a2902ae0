//! Client configuration.

use std::collections::BTreeSet;
use std::fmt;
use url::Url;

use crate::error::ConfigError;

/// Credentials and endpoints of an OAuth 2.0 client.
///
/// The four mandatory fields are validated on construction; the redirect URL
/// and scopes are added with the builder methods.
///
/// ```
/// use codeflow::ClientConfig;
///
/// let config = ClientConfig::new(
///     "my_client",
///     "my_secret",
///     "https://auth.example.com/authorize",
///     "https://auth.example.com/token",
/// )?
/// .redirect_url("myapp://oauth/callback")?
/// .scope("profile");
///
/// assert_eq!(config.client_id(), "my_client");
/// # Ok::<(), codeflow::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) authorize_url: Url,
    pub(crate) token_url: Url,
    pub(crate) redirect_url: Option<Url>,
    pub(crate) scopes: BTreeSet<String>,
}

impl ClientConfig {
    /// Create a configuration from the client credentials and endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorize_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self, ConfigError> {
        let client_id = required("client_id", client_id.into().trim().to_string())?;
        let client_secret = required("client_secret", client_secret.into())?;
        let authorize_url = endpoint_url("authorize_url", authorize_url.as_ref())?;
        let token_url = endpoint_url("token_url", token_url.as_ref())?;

        Ok(Self {
            client_id,
            client_secret,
            authorize_url,
            token_url,
            redirect_url: None,
            scopes: BTreeSet::new(),
        })
    }

    /// Set the redirect URL. Custom schemes such as `myapp://callback` are
    /// accepted.
    pub fn redirect_url(mut self, redirect_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        self.redirect_url = Some(parse_redirect_url(redirect_url.as_ref())?);
        Ok(self)
    }

    /// Add a scope to request.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    /// Set multiple scopes (replaces existing).
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// The client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The authorization endpoint.
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    /// The token endpoint.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The redirect URL, if configured.
    pub fn get_redirect_url(&self) -> Option<&Url> {
        self.redirect_url.as_ref()
    }

    /// The configured scopes.
    pub fn get_scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("authorize_url", &self.authorize_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_url", &self.redirect_url.as_ref().map(Url::as_str))
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn required(field: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(value)
}

fn endpoint_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme {
            field,
            scheme: other.to_string(),
        }),
    }
}

pub(crate) fn parse_redirect_url(value: &str) -> Result<Url, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingField("redirect_url"));
    }
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field: "redirect_url",
        source,
    })
}

#[cfg(feature = "env")]
pub use self::env::{load_dotenv, load_dotenv_from};

#[cfg(feature = "env")]
mod env {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct EnvConfig {
        client_id: String,
        client_secret: String,
        authorize_url: String,
        token_url: String,
        #[serde(default)]
        redirect_url: Option<String>,
        #[serde(default)]
        scopes: Option<String>,
    }

    impl ClientConfig {
        /// Load the configuration from `CLIENT_ID`, `CLIENT_SECRET`,
        /// `AUTHORIZE_URL`, `TOKEN_URL`, and optionally `REDIRECT_URL` and
        /// `SCOPES` (space separated).
        pub fn from_env() -> Result<Self, ConfigError> {
            Self::from_env_config(envy::from_env::<EnvConfig>()?)
        }

        /// Like [`ClientConfig::from_env`], reading `{PREFIX}_CLIENT_ID` and so on.
        pub fn from_env_prefixed(prefix: &str) -> Result<Self, ConfigError> {
            let raw = envy::prefixed(format!("{}_", prefix)).from_env::<EnvConfig>()?;
            Self::from_env_config(raw)
        }

        fn from_env_config(raw: EnvConfig) -> Result<Self, ConfigError> {
            let mut config = Self::new(
                raw.client_id,
                raw.client_secret,
                raw.authorize_url,
                raw.token_url,
            )?;
            if let Some(redirect) = raw.redirect_url.filter(|v| !v.trim().is_empty()) {
                config = config.redirect_url(redirect)?;
            }
            if let Some(scopes) = raw.scopes {
                config = config.scopes(scopes.split_whitespace());
            }
            Ok(config)
        }
    }

    /// Load variables from `.env` in the current directory, if present.
    /// Existing variables are not overridden.
    pub fn load_dotenv() {
        let _ = dotenvy::dotenv();
    }

    /// Load variables from a specific file, if present.
    pub fn load_dotenv_from<P: AsRef<std::path::Path>>(path: P) {
        let _ = dotenvy::from_path(path);
    }
}
