//! Client configuration.
//!
//! A [`ClientConfig`] is built once and never changes afterwards. It can be
//! assembled with [`ClientConfig::builder`] or loaded from the environment
//! with [`ClientConfig::from_env`].
//!
//! ## Environment Variables
//!
//! - `DISCORD_CLIENT_ID`: application id (required)
//! - `DISCORD_CLIENT_SECRET`: OAuth2 client secret
//! - `DISCORD_REDIRECT_URI`: OAuth2 redirect URI
//! - `DISCORD_TOKEN`: bot token, needed to read or register the metadata schema
//! - `COOKIE_SECRET`: fixed OAuth2 `state` value
//! - `DISCORD_PROXY`: proxy URL for all requests
//! - `DISCORD_SCOPES`: space or comma separated OAuth2 scopes, defaults to
//!   `identify role_connections.write`

use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::OAuth2Scope;

pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Proxy settings applied to every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Backoff for transient connection failures.
///
/// Attempt `n` (starting at 0) waits `base_delay + step * n`, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.base_delay + self.step * attempt).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            step: Duration::from_secs(2),
            max_delay: Duration::from_secs(9),
        }
    }
}

/// Configuration for one Discord application
#[derive(Debug, Clone)]
pub struct ClientConfig {
    application_id: String,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    bot_token: Option<String>,
    scopes: Vec<OAuth2Scope>,
    state: Option<String>,
    proxy: Option<ProxyConfig>,
    api_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl ClientConfig {
    #[must_use]
    pub fn builder(application_id: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(application_id)
    }

    /// Load configuration from environment variables.
    ///
    /// Scopes default to `identify` and `role_connections.write` when
    /// `DISCORD_SCOPES` is unset.
    pub fn from_env() -> Result<Self> {
        let var = |name| std::env::var(name).ok().filter(|v: &String| !v.is_empty());

        let application_id =
            var("DISCORD_CLIENT_ID").ok_or(Error::MissingConfig("DISCORD_CLIENT_ID"))?;
        let scopes = match var("DISCORD_SCOPES") {
            Some(scopes) => parse_scopes(&scopes)?,
            None => vec![OAuth2Scope::Identify, OAuth2Scope::RoleConnectionsWrite],
        };
        let mut builder = Self::builder(application_id).scopes(scopes);

        if let Some(secret) = var("DISCORD_CLIENT_SECRET") {
            builder = builder.client_secret(secret);
        }
        if let Some(uri) = var("DISCORD_REDIRECT_URI") {
            builder = builder.redirect_uri(uri);
        }
        if let Some(token) = var("DISCORD_TOKEN") {
            builder = builder.bot_token(token);
        }
        if let Some(state) = var("COOKIE_SECRET") {
            builder = builder.state(state);
        }
        if let Some(proxy) = var("DISCORD_PROXY") {
            builder = builder.proxy(ProxyConfig::new(proxy));
        }

        builder.build()
    }

    #[must_use]
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    #[must_use]
    pub fn bot_token(&self) -> Option<&str> {
        self.bot_token.as_deref()
    }

    #[must_use]
    pub fn scopes(&self) -> &[OAuth2Scope] {
        &self.scopes
    }

    #[must_use]
    pub fn has_scope(&self, scope: OAuth2Scope) -> bool {
        self.scopes.contains(&scope)
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    #[must_use]
    pub const fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    fn new(application_id: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                application_id: application_id.into(),
                client_secret: None,
                redirect_uri: None,
                bot_token: None,
                scopes: Vec::new(),
                state: None,
                proxy: None,
                api_url: DEFAULT_API_URL.to_string(),
                timeout: Duration::from_secs(30),
                retry: RetryConfig::default(),
            },
        }
    }

    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    /// Validated in [`build`](Self::build).
    #[must_use]
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.redirect_uri = Some(uri.into());
        self
    }

    /// Bot token, with or without the `Bot ` prefix
    #[must_use]
    pub fn bot_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.strip_prefix("Bot ").map_or(token.clone(), str::to_string);
        self.config.bot_token = Some(token);
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = OAuth2Scope>) -> Self {
        self.config.scopes = Vec::new();
        for scope in scopes {
            if !self.config.scopes.contains(&scope) {
                self.config.scopes.push(scope);
            }
        }
        self
    }

    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.config.state = Some(state.into());
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Override the REST base URL, e.g. to point at a mock server
    #[must_use]
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(mut self) -> Result<ClientConfig> {
        self.config.redirect_uri = self
            .config
            .redirect_uri
            .take()
            .map(validate_redirect_uri)
            .transpose()?;

        for scope in [OAuth2Scope::Identify, OAuth2Scope::RoleConnectionsWrite] {
            if !self.config.has_scope(scope) {
                warn!("You must specify the {} scope", scope);
            }
        }

        Ok(self.config)
    }
}

/// Parse a scope list such as `identify role_connections.write`.
///
/// Scopes may be separated by spaces or commas.
pub fn parse_scopes(value: &str) -> Result<Vec<OAuth2Scope>> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|scope| !scope.is_empty())
        .map(|scope| {
            OAuth2Scope::parse(scope).ok_or_else(|| Error::UnknownScope(scope.to_string()))
        })
        .collect()
}

/// `localhost...` gains an `http://` prefix; anything else must be an
/// http(s) URL.
pub fn validate_redirect_uri(uri: String) -> Result<String> {
    if uri.starts_with("localhost") {
        return Ok(format!("http://{uri}"));
    }

    let rest = uri
        .strip_prefix("https://")
        .or_else(|| uri.strip_prefix("http://"));

    match rest {
        Some(rest) if !rest.is_empty() => Ok(uri),
        _ => Err(Error::InvalidRedirectUri(uri)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_redirect_uri() {
        assert_eq!(
            validate_redirect_uri("localhost:8000/callback".into()).unwrap(),
            "http://localhost:8000/callback"
        );
        assert_eq!(
            validate_redirect_uri("https://example.com/cb".into()).unwrap(),
            "https://example.com/cb"
        );
        assert!(validate_redirect_uri("ftp://example.com".into()).is_err());
        assert!(validate_redirect_uri("https://".into()).is_err());
        assert!(validate_redirect_uri("example.com".into()).is_err());
    }

    #[test]
    fn test_parse_scopes() {
        assert_eq!(
            parse_scopes("identify role_connections.write").unwrap(),
            vec![OAuth2Scope::Identify, OAuth2Scope::RoleConnectionsWrite]
        );
        assert_eq!(
            parse_scopes(" email,guilds ,  identify").unwrap(),
            vec![OAuth2Scope::Email, OAuth2Scope::Guilds, OAuth2Scope::Identify]
        );
        assert!(parse_scopes("").unwrap().is_empty());
        assert!(matches!(
            parse_scopes("identify bot"),
            Err(Error::UnknownScope(scope)) if scope == "bot"
        ));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder("1234")
            .client_secret("secret")
            .redirect_uri("localhost:3000")
            .bot_token("Bot abc")
            .scopes([
                OAuth2Scope::Identify,
                OAuth2Scope::Identify,
                OAuth2Scope::RoleConnectionsWrite,
            ])
            .api_url("http://127.0.0.1:9000/")
            .build()
            .unwrap();

        assert_eq!(config.application_id(), "1234");
        assert_eq!(config.redirect_uri(), Some("http://localhost:3000"));
        assert_eq!(config.bot_token(), Some("abc"));
        assert_eq!(config.scopes().len(), 2);
        assert_eq!(config.api_url(), "http://127.0.0.1:9000");
        assert!(config.has_scope(OAuth2Scope::RoleConnectionsWrite));
    }

    #[test]
    fn test_invalid_redirect_fails_build() {
        let result = ClientConfig::builder("1234").redirect_uri("nope").build();
        assert!(matches!(result, Err(Error::InvalidRedirectUri(_))));
    }

    #[test]
    fn test_retry_delays() {
        let retry = RetryConfig::default();
        let delays: Vec<u64> = (0..5).map(|n| retry.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 3, 5, 7, 9]);

        let capped = RetryConfig {
            max_delay: Duration::from_secs(4),
            ..RetryConfig::default()
        };
        assert_eq!(capped.delay_for(10), Duration::from_secs(4));
    }
}
