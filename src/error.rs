//! Error types for the linked roles client.

use thiserror::Error;

use crate::http::ResponseBody;
use crate::models::{MetadataDataType, OAuth2Scope};

/// Errors returned by the linked roles client.
#[derive(Error, Debug)]
pub enum Error {
    /// Discord answered 401.
    #[error("401 Unauthorized: {body}")]
    Unauthorized { body: ResponseBody },

    /// Discord answered 404.
    #[error("404 Not Found: {body}")]
    NotFound { body: ResponseBody },

    /// Discord answered with a 5xx status.
    #[error("{status} Internal Server Error: {body}")]
    InternalServerError { status: u16, body: ResponseBody },

    /// Discord rate limited the request.
    #[error("Rate limited, retry after {retry_after} seconds")]
    RateLimited {
        retry_after: f64,
        global: bool,
        body: ResponseBody,
    },

    /// Any other non-2xx answer, including proxy blocks on 429.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: ResponseBody },

    /// The operation needs an OAuth2 scope the client was not configured with.
    #[error("Scope is missing: {0}")]
    ScopeMissing(OAuth2Scope),

    #[error("Unknown OAuth2 scope {0:?}")]
    UnknownScope(String),

    /// The operation needs a configuration value that was not supplied.
    #[error("Missing configuration value: {0}")]
    MissingConfig(&'static str),

    #[error("{0:?} must be a valid http or https url")]
    InvalidRedirectUri(String),

    #[error("Invalid metadata key {key:?}: {reason}")]
    InvalidMetadataKey { key: String, reason: &'static str },

    #[error("Metadata key {0:?} already exists")]
    MetadataKeyExists(String),

    #[error("Metadata key {0:?} does not exist")]
    MetadataKeyNotFound(String),

    #[error("A role connection can hold at most {limit} metadata values")]
    MetadataLimitExceeded { limit: usize },

    #[error("{field} must be at most {max} characters")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("{0} is not a valid role metadata type")]
    UnknownMetadataType(u8),

    #[error("Invalid value for metadata key {key:?}: {value}")]
    InvalidMetadataValue {
        key: String,
        value: serde_json::Value,
    },

    /// A metadata key is not part of the application's registered schema.
    #[error("Role metadata {0:?} is not registered")]
    UnregisteredMetadata(String),

    /// Registering a key that is not yet known requires `force`.
    #[error("Role metadata {0:?} is not registered yet, pass force to overwrite the schema")]
    SchemaNotRegistered(String),

    /// A metadata value does not match the data type of its schema record.
    #[error("Role metadata {key:?} value must be {expected}, got {found}")]
    MetadataTypeMismatch {
        key: String,
        expected: MetadataDataType,
        found: &'static str,
    },

    #[error("User {0} not found")]
    UserNotFound(u64),

    /// Discord has no role connection stored for the user.
    #[error("Role connection not found")]
    RoleConnectionNotFound,

    #[error("Client has not been started")]
    NotStarted,

    #[error("Client is closed")]
    Closed,

    #[error("Request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status code when the error came from a Discord response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::InternalServerError { status, .. } | Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Suggested delay before retrying, for rate limited requests.
    #[must_use]
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited { retry_after, .. } if retry_after.is_finite() => Some(
                std::time::Duration::from_secs_f64(retry_after.clamp(0.0, 3600.0)),
            ),
            _ => None,
        }
    }
}

/// Result type for linked roles operations.
pub type Result<T> = std::result::Result<T, Error>;
