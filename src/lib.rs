//! # Linked Roles
//!
//! Client library for Discord's Linked Roles: the OAuth2 authorization code
//! flow, the application's role connection metadata schema, and per-user role
//! connections.
//!
//! ```no_run
//! use linked_roles::{Client, ClientConfig, RoleConnection};
//!
//! # async fn run(code: &str) -> linked_roles::Result<()> {
//! let client = Client::new(ClientConfig::from_env()?);
//! client.start().await?;
//!
//! let token = client.exchange_code(code).await?;
//! let user = client.fetch_user(&token).await?;
//!
//! let mut connection = RoleConnection::new("Valorant", user.username())?;
//! connection.add_metadata("matches", 5000)?;
//! user.edit_role_connection(&connection).await?;
//!
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod oauth2;
pub mod user;

pub use client::{Client, ClientState, NoopHook, RoleConnectionUpdateHook};
pub use config::{ClientConfig, ClientConfigBuilder, ProxyConfig, RetryConfig};
pub use error::{Error, Result};
pub use models::{
    MAX_METADATA, MetadataDataType, MetadataRecord, MetadataType, MetadataValue, OAuth2Scope,
    RoleConnection, RoleMetadata, RolePlatform, UserPayload,
};
pub use oauth2::Token;
pub use user::User;
