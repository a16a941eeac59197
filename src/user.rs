//! Discord users fetched through an OAuth2 token.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::debug;

use crate::client::ClientInner;
use crate::error::{Error, Result};
use crate::models::{OAuth2Scope, RoleConnection, UserPayload};
use crate::oauth2::Token;

const CDN_URL: &str = "https://cdn.discordapp.com";

/// A Discord user together with their token and last known role connection.
///
/// Users are handed out by [`Client::fetch_user`](crate::Client::fetch_user)
/// and stay cached by the client until it is cleared. Clones share state.
#[derive(Clone)]
pub struct User {
    inner: Arc<UserInner>,
}

struct UserInner {
    profile: UserPayload,
    token: Token,
    // weak so the client's user registry does not keep itself alive
    client: Weak<ClientInner>,
    role_connection: RwLock<Option<RoleConnection>>,
}

impl User {
    pub(crate) fn new(client: &Arc<ClientInner>, profile: UserPayload, token: Token) -> Self {
        Self {
            inner: Arc::new(UserInner {
                profile,
                token,
                client: Arc::downgrade(client),
                role_connection: RwLock::new(None),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.profile.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.inner.profile.username
    }

    #[must_use]
    pub fn discriminator(&self) -> &str {
        &self.inner.profile.discriminator
    }

    #[must_use]
    pub fn global_name(&self) -> Option<&str> {
        self.inner.profile.global_name.as_deref()
    }

    #[must_use]
    pub fn bot(&self) -> bool {
        self.inner.profile.bot.unwrap_or(false)
    }

    #[must_use]
    pub fn system(&self) -> bool {
        self.inner.profile.system.unwrap_or(false)
    }

    #[must_use]
    pub fn accent_color(&self) -> Option<u32> {
        self.inner.profile.accent_color
    }

    /// The full `/users/@me` payload
    #[must_use]
    pub fn profile(&self) -> &UserPayload {
        &self.inner.profile
    }

    #[must_use]
    pub fn token(&self) -> &Token {
        &self.inner.token
    }

    #[must_use]
    pub fn avatar_url(&self) -> Option<String> {
        let avatar = self.inner.profile.avatar.as_deref()?;
        Some(format!("{CDN_URL}/avatars/{}/{avatar}.png?size=1024", self.id()))
    }

    /// Animated banners (`a_` hashes) are served as gif.
    #[must_use]
    pub fn banner_url(&self) -> Option<String> {
        let banner = self.inner.profile.banner.as_deref()?;
        let format = if banner.starts_with("a_") { "gif" } else { "png" };
        Some(format!(
            "{CDN_URL}/banners/{}/{banner}.{format}?size=1024",
            self.id()
        ))
    }

    /// Last role connection fetched or pushed, without network I/O
    #[must_use]
    pub fn role_connection(&self) -> Option<RoleConnection> {
        self.inner
            .role_connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn client(&self) -> Result<Arc<ClientInner>> {
        self.inner.client.upgrade().ok_or(Error::Closed)
    }

    fn cache(&self, connection: RoleConnection) -> Option<RoleConnection> {
        self.inner
            .role_connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(connection)
    }

    /// Fetch the role connection Discord stores for this user.
    ///
    /// Fails with [`Error::RoleConnectionNotFound`] when the user has none.
    pub async fn fetch_role_connection(&self) -> Result<RoleConnection> {
        let client = self.client()?;
        client.http.require_scope(OAuth2Scope::RoleConnectionsWrite)?;
        self.inner.token.refresh_if_expired().await?;

        let payload = match client
            .http
            .user_role_connection(&self.inner.token.access_token())
            .await
        {
            Ok(payload) if !payload.is_empty() => payload,
            Ok(_) | Err(Error::NotFound { .. }) => return Err(Error::RoleConnectionNotFound),
            Err(err) => return Err(err),
        };

        let connection = client.decode_connection(&payload)?;
        self.cache(connection.clone());
        debug!(user_id = self.id(), "Fetched role connection");
        Ok(connection)
    }

    /// The cached role connection, fetching it on first use.
    pub async fn get_or_fetch_role_connection(&self) -> Result<RoleConnection> {
        match self.role_connection() {
            Some(connection) => Ok(connection),
            None => self.fetch_role_connection().await,
        }
    }

    /// Refresh the token, then fetch the role connection again.
    pub async fn refresh_role_connection(&self) -> Result<RoleConnection> {
        let client = self.client()?;
        client.http.require_scope(OAuth2Scope::RoleConnectionsWrite)?;
        self.inner.token.refresh().await?;
        self.fetch_role_connection().await
    }

    /// Push a new role connection for this user.
    ///
    /// When the client knows the application's schema, every key must be
    /// registered and every value must match its record's data type; this is
    /// checked before any request is made. On success the cached connection is
    /// replaced and the client's update hook is notified.
    pub async fn edit_role_connection(
        &self,
        connection: &RoleConnection,
    ) -> Result<RoleConnection> {
        let client = self.client()?;
        client.http.require_scope(OAuth2Scope::RoleConnectionsWrite)?;
        client.validate_connection(connection)?;
        self.inner.token.refresh_if_expired().await?;

        let payload = client
            .http
            .put_user_role_connection(&self.inner.token.access_token(), &connection.to_payload())
            .await?;
        let after = client.decode_connection(&payload)?;

        let before = self.cache(after.clone()).unwrap_or_else(|| after.clone());
        debug!(user_id = self.id(), "Updated role connection");
        client.dispatch_update(self.clone(), before, after.clone());

        Ok(after)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id())
            .field("username", &self.username())
            .field("discriminator", &self.discriminator())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.username(), self.discriminator())
    }
}
