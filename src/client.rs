//! The linked roles client facade.
//!
//! [`Client`] owns the configuration, the HTTP transport, the application's
//! metadata schema and the registry of fetched users. It moves through three
//! states: [`ClientState::Created`], [`ClientState::Started`] and
//! [`ClientState::Closed`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::models::{MetadataRecord, OAuth2Scope, RoleConnection, RoleConnectionPayload};
use crate::oauth2::Token;
use crate::user::User;

/// Called after every successful role connection update.
///
/// The hook runs in a background task on the runtime the client was started
/// on. Errors it returns are logged and never reach the caller that pushed
/// the update.
#[async_trait]
pub trait RoleConnectionUpdateHook: Send + Sync {
    /// `before` is the previously cached connection, or `after` when the user
    /// had none cached.
    async fn on_role_connection_update(
        &self,
        _user: &User,
        _before: &RoleConnection,
        _after: &RoleConnection,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl RoleConnectionUpdateHook for NoopHook {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Started,
    Closed,
}

pub(crate) struct ClientInner {
    pub(crate) http: HttpClient,
    schema: RwLock<HashMap<String, MetadataRecord>>,
    schema_fetched: AtomicBool,
    users: RwLock<HashMap<u64, User>>,
    state: Mutex<ClientState>,
    runtime: RwLock<Option<Handle>>,
    hook: Arc<dyn RoleConnectionUpdateHook>,
}

impl ClientInner {
    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> ClientState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check a connection against the schema, when the schema is known.
    pub(crate) fn validate_connection(&self, connection: &RoleConnection) -> Result<()> {
        if !self.schema_fetched.load(Ordering::Acquire) {
            return Ok(());
        }
        let schema = self.schema.read().unwrap_or_else(PoisonError::into_inner);
        connection.validate_against(&schema)
    }

    /// Decode a connection from Discord, typed by the schema when known.
    pub(crate) fn decode_connection(
        &self,
        payload: &RoleConnectionPayload,
    ) -> Result<RoleConnection> {
        if self.schema_fetched.load(Ordering::Acquire) {
            let schema = self.schema.read().unwrap_or_else(PoisonError::into_inner);
            RoleConnection::from_payload_with_schema(payload, &schema)
        } else {
            RoleConnection::from_payload(payload)
        }
    }

    /// Run the update hook in the background.
    pub(crate) fn dispatch_update(
        &self,
        user: User,
        before: RoleConnection,
        after: RoleConnection,
    ) {
        let runtime = self
            .runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(runtime) = runtime else {
            warn!(user_id = user.id(), "Client not running, skipping role connection update hook");
            return;
        };

        let hook = Arc::clone(&self.hook);
        runtime.spawn(async move {
            if let Err(err) = hook.on_role_connection_update(&user, &before, &after).await {
                error!(user_id = user.id(), "Role connection update hook failed: {err:#}");
            }
        });
    }
}

/// Client for one Discord application's linked roles.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_hook(config, NoopHook)
    }

    /// Build a client that calls `hook` after every role connection update.
    #[must_use]
    pub fn with_hook(config: ClientConfig, hook: impl RoleConnectionUpdateHook + 'static) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http: HttpClient::new(config),
                schema: RwLock::new(HashMap::new()),
                schema_fetched: AtomicBool::new(false),
                users: RwLock::new(HashMap::new()),
                state: Mutex::new(ClientState::Created),
                runtime: RwLock::new(None),
                hook: Arc::new(hook),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.inner.http.config()
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ClientState::Closed
    }

    #[must_use]
    pub fn is_schema_fetched(&self) -> bool {
        self.inner.schema_fetched.load(Ordering::Acquire)
    }

    /// Open the transport and, with a bot token, fetch the metadata schema.
    ///
    /// Starting a started client does nothing; a closed client has to be
    /// [`clear`](Self::clear)ed first.
    pub async fn start(&self) -> Result<()> {
        match self.state() {
            ClientState::Closed => return Err(Error::Closed),
            ClientState::Started => return Ok(()),
            ClientState::Created => {}
        }

        *self
            .inner
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Handle::current());
        self.inner.http.start()?;
        self.inner.set_state(ClientState::Started);

        if self.config().bot_token().is_some() {
            self.fetch_schema().await?;
        }

        info!(
            application_id = self.config().application_id(),
            "Linked roles client started"
        );
        Ok(())
    }

    /// Close the transport. Safe to call more than once, or before starting.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.set_state(ClientState::Closed);
        self.inner.http.close();
        self.inner
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Linked roles client closed");
    }

    /// Drop the cached schema and users.
    ///
    /// A closed client goes back to [`ClientState::Created`].
    pub fn clear(&self) {
        self.inner
            .schema
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.schema_fetched.store(false, Ordering::Release);
        self.inner
            .users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.http.clear();

        if self.is_closed() {
            self.inner.set_state(ClientState::Created);
        }
    }

    /// URL to send the user to for authorization
    #[must_use]
    pub fn oauth_url(&self) -> String {
        self.inner.http.oauth_url()
    }

    pub async fn exchange_code(&self, code: &str) -> Result<Token> {
        let response = self.inner.http.exchange_code(code).await?;
        Ok(Token::new(self.inner.http.clone(), response))
    }

    /// Fetch the token owner's identity and remember the user by id.
    pub async fn fetch_user(&self, token: &Token) -> Result<User> {
        self.inner.http.require_scope(OAuth2Scope::Identify)?;
        token.refresh_if_expired().await?;

        let payload = self.inner.http.current_user(&token.access_token()).await?;
        let user = User::new(&self.inner, payload, token.clone());

        self.inner
            .users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id(), user.clone());
        Ok(user)
    }

    /// Cached user lookup, never touches the network.
    #[must_use]
    pub fn user(&self, id: u64) -> Option<User> {
        self.inner
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn try_user(&self, id: u64) -> Result<User> {
        self.user(id).ok_or(Error::UserNotFound(id))
    }

    /// Fetch the application's metadata schema, replacing the cached one.
    pub async fn fetch_schema(&self) -> Result<Vec<MetadataRecord>> {
        let records = self.inner.http.role_connection_schema().await?;

        {
            let mut schema = self
                .inner
                .schema
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            schema.clear();
            for record in &records {
                schema.insert(record.key().to_string(), record.clone());
            }
        }
        self.inner.schema_fetched.store(true, Ordering::Release);

        info!(count = records.len(), "Fetched role connection metadata schema");
        Ok(records)
    }

    /// Push metadata records to Discord.
    ///
    /// Without `force`, every record must already be part of the cached
    /// schema, so new keys are never pushed by accident. Returns the records
    /// Discord confirmed.
    pub async fn register_schema(
        &self,
        records: Vec<MetadataRecord>,
        force: bool,
    ) -> Result<Vec<MetadataRecord>> {
        if !force {
            let schema = self
                .inner
                .schema
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = records.iter().find(|r| !schema.contains_key(r.key())) {
                return Err(Error::SchemaNotRegistered(record.key().to_string()));
            }
        }

        let confirmed = self.inner.http.put_role_connection_schema(&records).await?;

        let mut schema = self
            .inner
            .schema
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for record in &confirmed {
            schema.insert(record.key().to_string(), record.clone());
        }

        info!(count = confirmed.len(), "Registered role connection metadata");
        Ok(confirmed)
    }

    #[must_use]
    pub fn schema_record(&self, key: &str) -> Option<MetadataRecord> {
        self.inner
            .schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All cached schema records, ordered by key
    #[must_use]
    pub fn schema(&self) -> Vec<MetadataRecord> {
        let schema = self
            .inner
            .schema
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = schema.values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(b.key()));
        records
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    /// Whether Discord still accepts the token. A 401 means `false`.
    pub async fn is_authenticated(&self, token: &Token) -> Result<bool> {
        self.is_access_token_valid(&token.access_token()).await
    }

    /// Like [`is_authenticated`](Self::is_authenticated), for a stored raw
    /// access token.
    pub async fn is_access_token_valid(&self, access_token: &str) -> Result<bool> {
        match self.inner.http.current_user(access_token).await {
            Ok(_) => Ok(true),
            Err(Error::Unauthorized { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("application_id", &self.config().application_id())
            .field("state", &self.state())
            .field("schema_fetched", &self.is_schema_fetched())
            .finish_non_exhaustive()
    }
}
