//! Data models for Discord OAuth2 payloads and role connection metadata

mod metadata;
mod role;
mod user;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use metadata::{
    MetadataDataType, MetadataRecord, MetadataType, MetadataValue, RoleMetadata,
    validate_metadata_key,
};
pub use role::{MAX_METADATA, RoleConnection, RoleConnectionPayload, RolePlatform};
pub use user::UserPayload;

/// OAuth2 scopes understood by the linked roles flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuth2Scope {
    #[serde(rename = "identify")]
    Identify,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "guilds")]
    Guilds,
    #[serde(rename = "role_connections.write")]
    RoleConnectionsWrite,
}

impl OAuth2Scope {
    /// The scope name as sent to Discord
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Email => "email",
            Self::Guilds => "guilds",
            Self::RoleConnectionsWrite => "role_connections.write",
        }
    }

    /// Parse a scope name, returning `None` for scopes this crate does not use
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "identify" => Some(Self::Identify),
            "email" => Some(Self::Email),
            "guilds" => Some(Self::Guilds),
            "role_connections.write" => Some(Self::RoleConnectionsWrite),
            _ => None,
        }
    }
}

impl fmt::Display for OAuth2Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token pair returned by `/oauth2/token`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}
