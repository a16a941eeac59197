//! # Discord REST Transport
//!
//! This module turns linked roles operations into authenticated HTTP requests
//! against Discord's REST API and normalizes every failure into
//! [`Error`](crate::Error).
//!
//! ## Features
//!
//! - **Routes**: every endpoint is a [`Route`] under the configured API base
//! - **Authentication**: bearer tokens for user endpoints, `Bot` tokens for the
//!   application schema, client credentials in the token form body
//! - **Scope Checks**: endpoints that need an OAuth2 scope fail locally with
//!   `ScopeMissing` before anything is sent
//! - **Retries**: connection resets are retried with linear backoff
//! - **Error Mapping**: 401, 404, 429 and 5xx map to dedicated error variants
//!
//! ## Endpoints
//!
//! | Operation | Method & Path | Auth |
//! |---|---|---|
//! | Token exchange/refresh | POST `/oauth2/token` | client credentials |
//! | Current user | GET `/users/@me` | Bearer |
//! | Metadata schema | GET/PUT `/applications/{id}/role-connections/metadata` | Bot |
//! | User role connection | GET/PUT `/users/@me/applications/{id}/role-connection` | Bearer |
//!
//! ## Lifecycle
//!
//! The connection pool only exists between [`HttpClient::start`] and
//! [`HttpClient::close`]. Closing wakes every in-flight request and backoff
//! sleep, which then fail with `Closed`.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rand::RngCore;
use rand::rngs::OsRng;
use reqwest::header::{self, HeaderMap};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{
    MetadataRecord, OAuth2Scope, RoleConnectionPayload, TokenResponse, UserPayload,
};

const AUTHORIZE_URL: &str = "https://discord.com/api/oauth2/authorize";
const USER_AGENT: &str = concat!("linked-roles/", env!("CARGO_PKG_VERSION"));

/// A response body: JSON when Discord says so, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
}

impl ResponseBody {
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    fn deserialize<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Json(value) => Ok(serde_json::from_value(value)?),
            Self::Text(text) => Ok(serde_json::from_str(&text)?),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// An HTTP route relative to the API base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    path: String,
}

impl Route {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    fn application_schema(method: Method, application_id: &str) -> Self {
        Self::new(
            method,
            format!(
                "/applications/{}/role-connections/metadata",
                urlencoding::encode(application_id)
            ),
        )
    }

    fn user_role_connection(method: Method, application_id: &str) -> Self {
        Self::new(
            method,
            format!(
                "/users/@me/applications/{}/role-connection",
                urlencoding::encode(application_id)
            ),
        )
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn url(&self, base: &str) -> String {
        format!("{base}{}", self.path)
    }
}

#[derive(Debug, Clone, Copy)]
enum Auth<'a> {
    None,
    Bearer(&'a str),
    Bot(&'a str),
}

#[derive(Debug)]
enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(&'static str, String)>),
}

/// HTTP client for the linked roles endpoints.
///
/// Cloning is cheap: clones share the connection pool and the open/closed
/// state.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    config: ClientConfig,
    session: RwLock<Option<reqwest::Client>>,
    /// `true` once closed
    closed: watch::Sender<bool>,
}

impl HttpClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(HttpInner {
                config,
                session: RwLock::new(None),
                closed,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the connection pool.
    pub fn start(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT);

        if let Some(proxy) = config.proxy() {
            let mut reqwest_proxy = reqwest::Proxy::all(&proxy.url)?;
            if let Some(username) = &proxy.username {
                reqwest_proxy =
                    reqwest_proxy.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(reqwest_proxy);
        }

        let session = builder.build()?;
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session);
        self.inner.closed.send_replace(false);

        debug!("HTTP session opened");
        Ok(())
    }

    /// Release the connection pool and fail outstanding requests.
    pub fn close(&self) {
        self.inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.closed.send_replace(true);
        debug!("HTTP session closed");
    }

    /// Return a closed client to the not-started state so it can start again.
    pub fn clear(&self) {
        if self.is_closed() {
            self.inner.closed.send_replace(false);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    fn session(&self) -> Result<reqwest::Client> {
        let session = self
            .inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match session {
            Some(session) => Ok(session),
            None if self.is_closed() => Err(Error::Closed),
            None => Err(Error::NotStarted),
        }
    }

    pub(crate) fn require_scope(&self, scope: OAuth2Scope) -> Result<()> {
        if self.inner.config.has_scope(scope) {
            Ok(())
        } else {
            Err(Error::ScopeMissing(scope))
        }
    }

    fn bot_token(&self) -> Result<&str> {
        self.inner
            .config
            .bot_token()
            .ok_or(Error::MissingConfig("bot_token"))
    }

    fn client_secret(&self) -> Result<&str> {
        self.inner
            .config
            .client_secret()
            .ok_or(Error::MissingConfig("client_secret"))
    }

    /// Send a request, retrying connection resets.
    async fn request(&self, route: &Route, auth: Auth<'_>, body: &Body) -> Result<ResponseBody> {
        let url = route.url(self.inner.config.api_url());
        let retry = self.inner.config.retry();
        let mut closed = self.inner.closed.subscribe();
        let mut attempt = 0;

        loop {
            let session = self.session()?;
            let request = build_request(&session, route, &url, auth, body);

            let outcome = tokio::select! {
                () = wait_closed(&mut closed) => return Err(Error::Closed),
                outcome = send(request) => outcome,
            };

            match outcome {
                Ok((status, headers, data)) => {
                    debug!(
                        method = %route.method,
                        url = %url,
                        status = status.as_u16(),
                        "Discord API request completed"
                    );
                    return map_response(status, &headers, data);
                }
                Err(err) if is_connection_reset(&err) => {
                    attempt += 1;
                    if attempt >= retry.max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = retry.delay_for(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Connection reset, retrying Discord API request"
                    );

                    tokio::select! {
                        () = wait_closed(&mut closed) => return Err(Error::Closed),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(Error::Transport(err)),
            }
        }
    }

    /// Authorization URL to redirect the user to.
    ///
    /// Uses the configured `state`, or a random one when none is set.
    #[must_use]
    pub fn oauth_url(&self) -> String {
        let config = &self.inner.config;
        let state = config.state().map_or_else(random_state, str::to_string);
        let scope = config
            .scopes()
            .iter()
            .map(|scope| scope.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut params = vec![("client_id", config.application_id().to_string())];
        if let Some(redirect_uri) = config.redirect_uri() {
            params.push(("redirect_uri", redirect_uri.to_string()));
        }
        params.push(("response_type", "code".to_string()));
        params.push(("scope", scope));
        params.push(("prompt", "consent".to_string()));
        params.push(("state", state));

        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{AUTHORIZE_URL}?{query}")
    }

    /// Exchange an authorization code for a token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let config = &self.inner.config;
        let client_secret = self.client_secret()?;
        let redirect_uri = config
            .redirect_uri()
            .ok_or(Error::MissingConfig("redirect_uri"))?;

        let form = Body::Form(vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("client_id", config.application_id().to_string()),
            ("client_secret", client_secret.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ]);

        self.request(&Route::new(Method::POST, "/oauth2/token"), Auth::None, &form)
            .await?
            .deserialize()
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let config = &self.inner.config;
        let client_secret = self.client_secret()?;

        let form = Body::Form(vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", config.application_id().to_string()),
            ("client_secret", client_secret.to_string()),
        ]);

        self.request(&Route::new(Method::POST, "/oauth2/token"), Auth::None, &form)
            .await?
            .deserialize()
    }

    pub async fn current_user(&self, access_token: &str) -> Result<UserPayload> {
        self.require_scope(OAuth2Scope::Identify)?;

        self.request(
            &Route::new(Method::GET, "/users/@me"),
            Auth::Bearer(access_token),
            &Body::Empty,
        )
        .await?
        .deserialize()
    }

    pub async fn role_connection_schema(&self) -> Result<Vec<MetadataRecord>> {
        let token = self.bot_token()?;
        let route = Route::application_schema(Method::GET, self.inner.config.application_id());

        self.request(&route, Auth::Bot(token), &Body::Empty)
            .await?
            .deserialize()
    }

    /// Replace the application's metadata schema.
    pub async fn put_role_connection_schema(
        &self,
        records: &[MetadataRecord],
    ) -> Result<Vec<MetadataRecord>> {
        let token = self.bot_token()?;
        let route = Route::application_schema(Method::PUT, self.inner.config.application_id());
        let body = Body::Json(serde_json::to_value(records)?);

        info!(count = records.len(), "Registering role connection metadata");
        self.request(&route, Auth::Bot(token), &body)
            .await?
            .deserialize()
    }

    pub async fn user_role_connection(&self, access_token: &str) -> Result<RoleConnectionPayload> {
        self.require_scope(OAuth2Scope::RoleConnectionsWrite)?;
        let route =
            Route::user_role_connection(Method::GET, self.inner.config.application_id());

        self.request(&route, Auth::Bearer(access_token), &Body::Empty)
            .await?
            .deserialize()
    }

    pub async fn put_user_role_connection(
        &self,
        access_token: &str,
        payload: &RoleConnectionPayload,
    ) -> Result<RoleConnectionPayload> {
        self.require_scope(OAuth2Scope::RoleConnectionsWrite)?;
        let route =
            Route::user_role_connection(Method::PUT, self.inner.config.application_id());
        let body = Body::Json(serde_json::to_value(payload)?);

        self.request(&route, Auth::Bearer(access_token), &body)
            .await?
            .deserialize()
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("application_id", &self.inner.config.application_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn build_request(
    session: &reqwest::Client,
    route: &Route,
    url: &str,
    auth: Auth<'_>,
    body: &Body,
) -> RequestBuilder {
    let request = session.request(route.method.clone(), url);

    let request = match auth {
        Auth::None => request,
        Auth::Bearer(token) => request.bearer_auth(token),
        Auth::Bot(token) => request.header(header::AUTHORIZATION, format!("Bot {token}")),
    };

    match body {
        Body::Empty => request,
        Body::Json(value) => request.json(value),
        Body::Form(fields) => request.form(fields),
    }
}

async fn send(request: RequestBuilder) -> reqwest::Result<(StatusCode, HeaderMap, ResponseBody)> {
    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let text = response.text().await?;
    if is_json && let Ok(value) = serde_json::from_str(&text) {
        return Ok((status, headers, ResponseBody::Json(value)));
    }

    Ok((status, headers, ResponseBody::Text(text)))
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Map a status code to the body or a typed error.
fn map_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: ResponseBody,
) -> Result<ResponseBody> {
    if status.is_success() {
        return Ok(body);
    }

    match status.as_u16() {
        429 => Err(rate_limit_error(headers, body)),
        401 => Err(Error::Unauthorized { body }),
        404 => Err(Error::NotFound { body }),
        code if code >= 500 => Err(Error::InternalServerError { status: code, body }),
        code => Err(Error::Http { status: code, body }),
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

// Discord's own 429s are JSON and pass through its edge (`Via`); anything else
// is an upstream block, most likely Cloudflare.
fn rate_limit_error(headers: &HeaderMap, body: ResponseBody) -> Error {
    let parsed = body
        .as_json()
        .and_then(|value| serde_json::from_value::<RateLimitBody>(value.clone()).ok());

    match parsed {
        Some(limit) if limit.retry_after.is_some() || headers.contains_key(header::VIA) => {
            let retry_after = limit
                .retry_after
                .or_else(|| {
                    headers
                        .get(header::RETRY_AFTER)
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| value.parse().ok())
                })
                .filter(|value: &f64| value.is_finite())
                .unwrap_or(0.0);

            warn!(retry_after, global = limit.global, "Rate limited by Discord");
            Error::RateLimited {
                retry_after,
                global: limit.global,
                body,
            }
        }
        _ => Error::Http { status: 429, body },
    }
}

fn is_connection_reset(err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            )
        {
            return true;
        }
        source = cause.source();
    }

    false
}

fn random_state() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
