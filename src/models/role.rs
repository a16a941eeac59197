//! The role connection container pushed to a user's profile

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::metadata::{MetadataRecord, MetadataValue, RoleMetadata, validate_metadata_key};
use crate::error::{Error, Result};

/// Discord accepts at most five metadata values per platform.
pub const MAX_METADATA: usize = 5;

const MAX_PLATFORM_NAME_LEN: usize = 50;
const MAX_PLATFORM_USERNAME_LEN: usize = 100;

/// Wire form of a user's role connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleConnectionPayload {
    #[serde(default)]
    pub platform_name: Option<String>,
    #[serde(default)]
    pub platform_username: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RoleConnectionPayload {
    /// Discord answers with an empty connection when the user never linked one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platform_name.as_deref().is_none_or(str::is_empty)
            && self.platform_username.as_deref().is_none_or(str::is_empty)
            && self.metadata.is_empty()
    }
}

/// A user's link to an external platform, with up to five metadata values.
///
/// Strict operations ([`add_metadata`](Self::add_metadata),
/// [`edit_metadata`](Self::edit_metadata)) fail on a duplicate or missing
/// key; [`add_or_edit_metadata`](Self::add_or_edit_metadata) upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleConnection {
    platform_name: String,
    platform_username: String,
    metadata: BTreeMap<String, MetadataValue>,
}

/// Older name for [`RoleConnection`].
pub type RolePlatform = RoleConnection;

impl RoleConnection {
    pub fn new(
        platform_name: impl Into<String>,
        platform_username: impl Into<String>,
    ) -> Result<Self> {
        let platform_name = platform_name.into();
        if platform_name.chars().count() > MAX_PLATFORM_NAME_LEN {
            return Err(Error::FieldTooLong {
                field: "Platform name",
                max: MAX_PLATFORM_NAME_LEN,
            });
        }

        let platform_username = platform_username.into();
        if platform_username.chars().count() > MAX_PLATFORM_USERNAME_LEN {
            return Err(Error::FieldTooLong {
                field: "Platform username",
                max: MAX_PLATFORM_USERNAME_LEN,
            });
        }

        Ok(Self {
            platform_name,
            platform_username,
            metadata: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    #[must_use]
    pub fn platform_username(&self) -> &str {
        &self.platform_username
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }

    /// All metadata entries, ordered by key
    #[must_use]
    pub fn metadata(&self) -> Vec<RoleMetadata> {
        self.metadata
            .iter()
            .map(|(key, value)| RoleMetadata {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Insert a new metadata value.
    ///
    /// Fails if the key already exists or the connection is full.
    pub fn add_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<&mut Self> {
        let entry = RoleMetadata::new(key, value)?;
        if self.metadata.contains_key(&entry.key) {
            return Err(Error::MetadataKeyExists(entry.key));
        }
        if self.metadata.len() >= MAX_METADATA {
            return Err(Error::MetadataLimitExceeded {
                limit: MAX_METADATA,
            });
        }
        self.metadata.insert(entry.key, entry.value);
        Ok(self)
    }

    /// Replace the value of an existing key. Never creates a key.
    pub fn edit_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<&mut Self> {
        let entry = RoleMetadata::new(key, value)?;
        match self.metadata.get_mut(&entry.key) {
            Some(slot) => *slot = entry.value,
            None => return Err(Error::MetadataKeyNotFound(entry.key)),
        }
        Ok(self)
    }

    pub fn add_or_edit_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<&mut Self> {
        let key = key.into();
        if self.metadata.contains_key(&key) {
            self.edit_metadata(key, value)
        } else {
            self.add_metadata(key, value)
        }
    }

    /// Removing an absent key is a no-op.
    pub fn remove_metadata(&mut self, key: &str) -> &mut Self {
        self.metadata.remove(key);
        self
    }

    pub fn clear_metadata(&mut self) -> &mut Self {
        self.metadata.clear();
        self
    }

    /// Independent deep copy, for edit-then-diff workflows
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn to_payload(&self) -> RoleConnectionPayload {
        RoleConnectionPayload {
            platform_name: Some(self.platform_name.clone()),
            platform_username: Some(self.platform_username.clone()),
            metadata: self
                .metadata
                .iter()
                .map(|(key, value)| (key.clone(), value.to_wire()))
                .collect(),
        }
    }

    /// Rebuild a connection from its wire form.
    ///
    /// Values are decoded with [`MetadataValue::from_wire`], so digit strings
    /// become integers.
    pub fn from_payload(payload: &RoleConnectionPayload) -> Result<Self> {
        Self::decode(payload, |key, value| MetadataValue::from_wire(key, value))
    }

    /// Rebuild a connection, decoding each value into the data type of its
    /// schema record. Keys missing from the schema use the plain heuristic.
    pub fn from_payload_with_schema(
        payload: &RoleConnectionPayload,
        schema: &HashMap<String, MetadataRecord>,
    ) -> Result<Self> {
        Self::decode(payload, |key, value| match schema.get(key) {
            Some(record) => MetadataValue::from_wire_typed(key, value, record.data_type()),
            None => MetadataValue::from_wire(key, value),
        })
    }

    fn decode<F>(payload: &RoleConnectionPayload, mut decode_value: F) -> Result<Self>
    where
        F: FnMut(&str, &serde_json::Value) -> Result<MetadataValue>,
    {
        let mut connection = Self::new(
            payload.platform_name.clone().unwrap_or_default(),
            payload.platform_username.clone().unwrap_or_default(),
        )?;
        for (key, value) in &payload.metadata {
            let value = decode_value(key, value)?;
            connection.add_metadata(key.clone(), value)?;
        }
        Ok(connection)
    }

    /// Check every key against the registered schema and every value
    /// against its record's data type.
    pub fn validate_against(&self, schema: &HashMap<String, MetadataRecord>) -> Result<()> {
        for (key, value) in &self.metadata {
            validate_metadata_key(key)?;
            let record = schema
                .get(key)
                .ok_or_else(|| Error::UnregisteredMetadata(key.clone()))?;

            if value.data_type() != Some(record.data_type()) {
                return Err(Error::MetadataTypeMismatch {
                    key: key.clone(),
                    expected: record.data_type(),
                    found: value.type_name(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataType;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn schema() -> HashMap<String, MetadataRecord> {
        [
            ("matches", MetadataType::IntegerGreaterThanOrEqual),
            ("last_update", MetadataType::DatetimeLessThanOrEqual),
            ("verified", MetadataType::BooleanEqual),
        ]
        .into_iter()
        .map(|(key, kind)| {
            let record = MetadataRecord::new(key, key, None, kind).unwrap();
            (key.to_string(), record)
        })
        .collect()
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut connection = RoleConnection::new("Valorant", "player#0001").unwrap();
        connection.add_metadata("matches", 10).unwrap();
        assert!(matches!(
            connection.add_metadata("matches", 20),
            Err(Error::MetadataKeyExists(key)) if key == "matches"
        ));

        connection.edit_metadata("matches", 20).unwrap();
        assert_eq!(connection.len(), 1);
        assert_eq!(
            connection.get_metadata("matches"),
            Some(&MetadataValue::Integer(20))
        );
    }

    #[test]
    fn test_sixth_metadata_value_fails() {
        let mut connection = RoleConnection::new("Valorant", "player").unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            connection.add_metadata(key, 1).unwrap();
        }
        assert!(matches!(
            connection.add_metadata("f", 1),
            Err(Error::MetadataLimitExceeded { limit: 5 })
        ));
        assert!(connection.add_or_edit_metadata("f", 1).is_err());
        assert_eq!(connection.len(), MAX_METADATA);

        // upserting an existing key is still fine when full
        connection.add_or_edit_metadata("a", 2).unwrap();
        assert_eq!(connection.get_metadata("a"), Some(&MetadataValue::Integer(2)));
    }

    #[test]
    fn test_edit_never_creates_keys() {
        let mut connection = RoleConnection::new("Valorant", "player").unwrap();
        assert!(matches!(
            connection.edit_metadata("matches", 1),
            Err(Error::MetadataKeyNotFound(_))
        ));
        assert!(connection.is_empty());
    }

    #[test]
    fn test_remove_and_clear_are_idempotent() {
        let mut connection = RoleConnection::new("Valorant", "player").unwrap();
        connection.remove_metadata("missing");
        connection.clear_metadata().clear_metadata();
        connection.add_metadata("matches", 1).unwrap();
        connection.remove_metadata("matches").remove_metadata("matches");
        assert!(connection.is_empty());
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut connection = RoleConnection::new("Valorant", "player").unwrap();
        assert!(matches!(
            connection.add_metadata("Matches", 1),
            Err(Error::InvalidMetadataKey { .. })
        ));
    }

    #[test]
    fn test_field_lengths() {
        assert!(RoleConnection::new("p".repeat(51), "user").is_err());
        assert!(RoleConnection::new("platform", "u".repeat(101)).is_err());
        assert!(RoleConnection::new("p".repeat(50), "u".repeat(100)).is_ok());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = RoleConnection::new("Valorant", "player").unwrap();
        original.add_metadata("matches", 10).unwrap();

        let mut copy = original.copy();
        assert_eq!(copy, original);

        copy.edit_metadata("matches", 11).unwrap();
        copy.add_metadata("verified", true).unwrap();
        assert_eq!(
            original.get_metadata("matches"),
            Some(&MetadataValue::Integer(10))
        );
        assert_eq!(original.len(), 1);
    }

    #[test]
    fn test_payload_encoding() {
        let ts = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        let mut connection = RoleConnection::new("Valorant", "player#0001").unwrap();
        connection
            .add_metadata("matches", 5000)
            .unwrap()
            .add_metadata("verified", true)
            .unwrap()
            .add_metadata("last_update", ts)
            .unwrap();

        let payload = serde_json::to_value(connection.to_payload()).unwrap();
        assert_eq!(
            payload,
            json!({
                "platform_name": "Valorant",
                "platform_username": "player#0001",
                "metadata": {
                    "matches": 5000,
                    "verified": 1,
                    "last_update": "2023-03-01T00:00:00+00:00"
                }
            })
        );
    }

    #[test]
    fn test_payload_round_trip() {
        let payload: RoleConnectionPayload = serde_json::from_value(json!({
            "platform_name": "Valorant",
            "platform_username": "player",
            "metadata": {"matches": 12, "rank": "gold"}
        }))
        .unwrap();

        let connection = RoleConnection::from_payload(&payload).unwrap();
        assert_eq!(connection.to_payload(), payload);
    }

    #[test]
    fn test_from_payload_coerces_digit_strings() {
        let payload: RoleConnectionPayload = serde_json::from_value(json!({
            "platform_name": "Valorant",
            "platform_username": "player",
            "metadata": {"matches": "5000"}
        }))
        .unwrap();

        let connection = RoleConnection::from_payload(&payload).unwrap();
        assert_eq!(
            connection.get_metadata("matches"),
            Some(&MetadataValue::Integer(5000))
        );
    }

    #[test]
    fn test_from_payload_with_schema_keeps_types() {
        let payload: RoleConnectionPayload = serde_json::from_value(json!({
            "platform_name": "Valorant",
            "platform_username": "player",
            "metadata": {
                "matches": "5000",
                "verified": "1",
                "last_update": "2023-03-01T00:00:00+00:00"
            }
        }))
        .unwrap();

        let connection = RoleConnection::from_payload_with_schema(&payload, &schema()).unwrap();
        assert_eq!(
            connection.get_metadata("verified"),
            Some(&MetadataValue::Boolean(true))
        );
        assert_eq!(
            connection.get_metadata("last_update"),
            Some(&MetadataValue::Timestamp(
                Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap()
            ))
        );
        connection.validate_against(&schema()).unwrap();
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = schema();

        let mut connection = RoleConnection::new("Valorant", "player").unwrap();
        connection.add_metadata("matches", "5000").unwrap();
        assert!(matches!(
            connection.validate_against(&schema),
            Err(Error::MetadataTypeMismatch { ref key, .. }) if key == "matches"
        ));

        connection.edit_metadata("matches", 5000).unwrap();
        connection.validate_against(&schema).unwrap();

        connection.add_metadata("unknown", 1).unwrap();
        assert!(matches!(
            connection.validate_against(&schema),
            Err(Error::UnregisteredMetadata(key)) if key == "unknown"
        ));
    }

    #[test]
    fn test_empty_payload() {
        let payload: RoleConnectionPayload =
            serde_json::from_value(json!({"platform_name": null, "metadata": {}})).unwrap();
        assert!(payload.is_empty());
        assert!(!RoleConnection::new("Valorant", "").unwrap().to_payload().is_empty());
    }
}
