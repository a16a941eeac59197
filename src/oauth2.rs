//! OAuth2 token pair with expiry tracking and single-flight refresh.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::http::HttpClient;
use crate::models::TokenResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenState {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    expires_at: DateTime<Utc>,
}

impl TokenState {
    // Lifetimes too large for chrono saturate at the latest representable
    // instant.
    fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let expires_at = Duration::try_seconds(response.expires_in)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            expires_at,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        }
    }
}

/// An OAuth2 access/refresh token pair.
///
/// The pair is replaced as a whole on refresh. Refreshes are serialized by a
/// per-token guard, so concurrent callers never interleave partial updates
/// and a lazy refresh happens at most once per expiry. Clones share the same
/// pair.
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    http: HttpClient,
    state: RwLock<TokenState>,
    refresh_guard: Mutex<()>,
}

impl Token {
    pub(crate) fn new(http: HttpClient, response: TokenResponse) -> Self {
        Self::issued_at(http, response, Utc::now())
    }

    pub(crate) fn issued_at(
        http: HttpClient,
        response: TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                http,
                state: RwLock::new(TokenState::from_response(response, issued_at)),
                refresh_guard: Mutex::new(()),
            }),
        }
    }

    fn snapshot(&self) -> TokenState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn access_token(&self) -> String {
        self.snapshot().access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> String {
        self.snapshot().refresh_token
    }

    #[must_use]
    pub fn expires_in(&self) -> i64 {
        self.snapshot().expires_in
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.snapshot().expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Exchange the refresh token for a new pair.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.inner.refresh_guard.lock().await;
        self.refresh_locked().await
    }

    /// Refresh only if the token is expired once the guard is held.
    ///
    /// Callers racing on an expired token share a single refresh.
    pub async fn refresh_if_expired(&self) -> Result<()> {
        if !self.is_expired() {
            return Ok(());
        }

        let _guard = self.inner.refresh_guard.lock().await;
        if self.is_expired() {
            self.refresh_locked().await?;
        }
        Ok(())
    }

    async fn refresh_locked(&self) -> Result<()> {
        let refresh_token = self.refresh_token();
        let response = self.inner.http.refresh_token(&refresh_token).await?;
        let state = TokenState::from_response(response, Utc::now());

        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
        debug!("OAuth2 token refreshed");
        Ok(())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("Token")
            .field("expires_in", &state.expires_in)
            .field("expires_at", &state.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn http() -> HttpClient {
        HttpClient::new(ClientConfig::builder("1234").build().unwrap())
    }

    fn response(expires_in: i64) -> TokenResponse {
        TokenResponse {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_in,
            token_type: Some("Bearer".into()),
            scope: None,
        }
    }

    #[test]
    fn test_fresh_token_is_not_expired() {
        let token = Token::new(http(), response(604_800));
        assert!(!token.is_expired());
        assert_eq!(token.access_token(), "access");
        assert_eq!(token.expires_in(), 604_800);
    }

    #[test]
    fn test_token_expires_once_clock_passes_expires_at() {
        let issued = Utc::now();
        let token = Token::issued_at(http(), response(60), issued);

        assert_eq!(token.expires_at(), issued + Duration::seconds(60));
        assert!(!token.is_expired_at(issued + Duration::seconds(59)));
        assert!(token.is_expired_at(issued + Duration::seconds(60)));
        assert!(token.is_expired_at(issued + Duration::seconds(61)));
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let token = Token::new(http(), response(i64::MAX));
        assert_eq!(token.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!token.is_expired());

        let token = Token::new(http(), response(9_000_000_000_000));
        assert_eq!(token.expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_clones_share_the_pair() {
        let token = Token::new(http(), response(60));
        let clone = token.clone();
        *token.inner.state.write().unwrap() =
            TokenState::from_response(response(120), Utc::now());
        assert_eq!(clone.expires_in(), 120);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let token = Token::new(http(), response(60));
        let debug = format!("{token:?}");
        assert!(!debug.contains("access"));
        assert!(!debug.contains("refresh"));
    }
}
