//! Role connection metadata schema records and values

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::{Error, Result};

const MAX_KEY_LEN: usize = 50;
const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 200;
const DEFAULT_DESCRIPTION: &str = "...";

/// Validate a metadata key.
///
/// Keys are 1-50 characters of `[a-z0-9_]`. The key is returned unchanged
/// when valid.
pub fn validate_metadata_key(key: &str) -> Result<&str> {
    let invalid = |reason| Error::InvalidMetadataKey {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(invalid("must be at most 50 characters"));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("must only contain letters, numbers, and underscores"));
    }
    if key.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(invalid("must be lowercase"));
    }

    Ok(key)
}

/// Comparison a linked role applies to a metadata value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MetadataType {
    IntegerLessThanOrEqual = 1,
    IntegerGreaterThanOrEqual = 2,
    IntegerEqual = 3,
    IntegerNotEqual = 4,
    DatetimeLessThanOrEqual = 5,
    DatetimeGreaterThanOrEqual = 6,
    BooleanEqual = 7,
    BooleanNotEqual = 8,
}

impl MetadataType {
    /// The value domain this comparison operates on
    #[must_use]
    pub const fn data_type(self) -> MetadataDataType {
        match self {
            Self::IntegerLessThanOrEqual
            | Self::IntegerGreaterThanOrEqual
            | Self::IntegerEqual
            | Self::IntegerNotEqual => MetadataDataType::Integer,
            Self::DatetimeLessThanOrEqual | Self::DatetimeGreaterThanOrEqual => {
                MetadataDataType::DateTime
            }
            Self::BooleanEqual | Self::BooleanNotEqual => MetadataDataType::Boolean,
        }
    }
}

impl TryFrom<u8> for MetadataType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => Self::IntegerLessThanOrEqual,
            2 => Self::IntegerGreaterThanOrEqual,
            3 => Self::IntegerEqual,
            4 => Self::IntegerNotEqual,
            5 => Self::DatetimeLessThanOrEqual,
            6 => Self::DatetimeGreaterThanOrEqual,
            7 => Self::BooleanEqual,
            8 => Self::BooleanNotEqual,
            other => return Err(Error::UnknownMetadataType(other)),
        })
    }
}

/// Value domain of a metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataDataType {
    Integer,
    DateTime,
    Boolean,
}

impl fmt::Display for MetadataDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Integer => "integer",
            Self::DateTime => "datetime",
            Self::Boolean => "boolean",
        })
    }
}

/// A metadata record of an application's role connection schema.
///
/// Records are immutable once built; replace a record to change it. Two
/// records are equal when their keys are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MetadataRecordPayload", into = "MetadataRecordPayload")]
pub struct MetadataRecord {
    key: String,
    name: String,
    description: String,
    kind: MetadataType,
    name_localizations: Option<BTreeMap<String, String>>,
    description_localizations: Option<BTreeMap<String, String>>,
}

impl MetadataRecord {
    /// Build a record, validating the key and field lengths.
    ///
    /// A missing description defaults to `"..."` since Discord requires one.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        kind: MetadataType,
    ) -> Result<Self> {
        let key = key.into();
        validate_metadata_key(&key)?;

        let name = name.into();
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::FieldTooLong {
                field: "Metadata name",
                max: MAX_NAME_LEN,
            });
        }

        let description = description.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::FieldTooLong {
                field: "Metadata description",
                max: MAX_DESCRIPTION_LEN,
            });
        }

        Ok(Self {
            key,
            name,
            description,
            kind,
            name_localizations: None,
            description_localizations: None,
        })
    }

    #[must_use]
    pub fn with_name_localizations(mut self, localizations: BTreeMap<String, String>) -> Self {
        self.name_localizations = Some(localizations);
        self
    }

    #[must_use]
    pub fn with_description_localizations(
        mut self,
        localizations: BTreeMap<String, String>,
    ) -> Self {
        self.description_localizations = Some(localizations);
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn kind(&self) -> MetadataType {
        self.kind
    }

    #[must_use]
    pub const fn name_localizations(&self) -> Option<&BTreeMap<String, String>> {
        self.name_localizations.as_ref()
    }

    #[must_use]
    pub const fn description_localizations(&self) -> Option<&BTreeMap<String, String>> {
        self.description_localizations.as_ref()
    }

    /// The value domain accepted for this record's key
    #[must_use]
    pub const fn data_type(&self) -> MetadataDataType {
        self.kind.data_type()
    }
}

impl PartialEq for MetadataRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for MetadataRecord {}

/// Wire form of a metadata record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataRecordPayload {
    key: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name_localizations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description_localizations: Option<BTreeMap<String, String>>,
}

impl TryFrom<MetadataRecordPayload> for MetadataRecord {
    type Error = Error;

    fn try_from(payload: MetadataRecordPayload) -> Result<Self> {
        let kind = MetadataType::try_from(payload.kind)?;
        let mut record = Self::new(payload.key, payload.name, payload.description, kind)?;
        record.name_localizations = payload.name_localizations;
        record.description_localizations = payload.description_localizations;
        Ok(record)
    }
}

impl From<MetadataRecord> for MetadataRecordPayload {
    fn from(record: MetadataRecord) -> Self {
        Self {
            key: record.key,
            name: record.name,
            description: Some(record.description),
            kind: record.kind as u8,
            name_localizations: record.name_localizations,
            description_localizations: record.description_localizations,
        }
    }
}

/// A value stored under a metadata key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl MetadataValue {
    /// The record data type this value satisfies, if any.
    ///
    /// Plain strings satisfy no record type.
    #[must_use]
    pub const fn data_type(&self) -> Option<MetadataDataType> {
        match self {
            Self::String(_) => None,
            Self::Integer(_) => Some(MetadataDataType::Integer),
            Self::Boolean(_) => Some(MetadataDataType::Boolean),
            Self::Timestamp(_) => Some(MetadataDataType::DateTime),
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "datetime",
        }
    }

    /// Discord's wire representation: timestamps as RFC 3339 strings and
    /// booleans as `0`/`1`.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Boolean(b) => serde_json::Value::from(i64::from(*b)),
            Self::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }

    /// Decode a wire value without schema information.
    ///
    /// Digit strings become integers. This is a heuristic: a string value
    /// that merely looks numeric is coerced too, and booleans sent as `0`/`1`
    /// come back as integers.
    pub fn from_wire(key: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(s
                .parse::<i64>()
                .map_or_else(|_| Self::String(s.clone()), Self::Integer)),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Integer).ok_or_else(|| {
                Error::InvalidMetadataValue {
                    key: key.to_string(),
                    value: value.clone(),
                }
            }),
            serde_json::Value::Bool(b) => Ok(Self::Boolean(*b)),
            _ => Err(Error::InvalidMetadataValue {
                key: key.to_string(),
                value: value.clone(),
            }),
        }
    }

    /// Decode a wire value into the data type declared by its schema record,
    /// falling back to [`MetadataValue::from_wire`] when the value does not
    /// fit.
    pub fn from_wire_typed(
        key: &str,
        value: &serde_json::Value,
        data_type: MetadataDataType,
    ) -> Result<Self> {
        let typed = match (data_type, value) {
            (MetadataDataType::Boolean, serde_json::Value::Bool(b)) => Some(Self::Boolean(*b)),
            (MetadataDataType::Boolean, serde_json::Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Self::Boolean(false)),
                Some(1) => Some(Self::Boolean(true)),
                _ => None,
            },
            (MetadataDataType::Boolean, serde_json::Value::String(s)) => match s.as_str() {
                "0" | "false" => Some(Self::Boolean(false)),
                "1" | "true" => Some(Self::Boolean(true)),
                _ => None,
            },
            (MetadataDataType::DateTime, serde_json::Value::String(s)) => {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|ts| Self::Timestamp(ts.with_timezone(&Utc)))
            }
            _ => None,
        };

        match typed {
            Some(value) => Ok(value),
            None => Self::from_wire(key, value),
        }
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// A validated key paired with its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMetadata {
    pub key: String,
    pub value: MetadataValue,
}

impl RoleMetadata {
    pub fn new(key: impl Into<String>, value: impl Into<MetadataValue>) -> Result<Self> {
        let key = key.into();
        validate_metadata_key(&key)?;
        Ok(Self {
            key,
            value: value.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_validate_metadata_key() {
        let longest = "k".repeat(50);
        for key in ["matches", "combat_score", "a", "x1_y2", longest.as_str()] {
            assert_eq!(validate_metadata_key(key).unwrap(), key);
        }

        let too_long = "k".repeat(51);
        for key in ["", "Matches", "win-rate", "with space", "ключ", too_long.as_str()] {
            match validate_metadata_key(key) {
                Err(Error::InvalidMetadataKey { key: offending, .. }) => {
                    assert_eq!(offending, key);
                }
                other => panic!("expected key error for {key:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_metadata_type_data_type() {
        assert_eq!(
            MetadataType::IntegerNotEqual.data_type(),
            MetadataDataType::Integer
        );
        assert_eq!(
            MetadataType::DatetimeGreaterThanOrEqual.data_type(),
            MetadataDataType::DateTime
        );
        assert_eq!(
            MetadataType::BooleanNotEqual.data_type(),
            MetadataDataType::Boolean
        );
        assert!(matches!(
            MetadataType::try_from(9),
            Err(Error::UnknownMetadataType(9))
        ));
    }

    #[test]
    fn test_record_from_discord_payload() {
        let record: MetadataRecord = serde_json::from_value(json!({
            "key": "matches",
            "name": "Matches",
            "description": "Number of matches this season",
            "type": 2,
            "name_localizations": {"fr": "Matchs"}
        }))
        .unwrap();

        assert_eq!(record.key(), "matches");
        assert_eq!(record.kind(), MetadataType::IntegerGreaterThanOrEqual);
        assert_eq!(record.data_type(), MetadataDataType::Integer);
        assert_eq!(
            record.name_localizations().unwrap().get("fr").map(String::as_str),
            Some("Matchs")
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!(2));
        assert!(value.get("description_localizations").is_none());
    }

    #[test]
    fn test_record_validation() {
        assert!(
            MetadataRecord::new("verified", "x".repeat(101), None, MetadataType::BooleanEqual)
                .is_err()
        );
        assert!(
            MetadataRecord::new(
                "verified",
                "Verified",
                Some("d".repeat(201)),
                MetadataType::BooleanEqual
            )
            .is_err()
        );

        let record =
            MetadataRecord::new("verified", "Verified", None, MetadataType::BooleanEqual).unwrap();
        assert_eq!(record.description(), "...");

        let bad: std::result::Result<MetadataRecord, _> = serde_json::from_value(json!({
            "key": "matches", "name": "Matches", "description": "", "type": 12
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_wire_encoding() {
        let ts = Utc.with_ymd_and_hms(2023, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(MetadataValue::Boolean(true).to_wire(), json!(1));
        assert_eq!(MetadataValue::Boolean(false).to_wire(), json!(0));
        assert_eq!(
            MetadataValue::Timestamp(ts).to_wire(),
            json!("2023-03-01T12:00:00+00:00")
        );
        assert_eq!(MetadataValue::Integer(42).to_wire(), json!(42));
    }

    #[test]
    fn test_wire_decoding_heuristic() {
        assert_eq!(
            MetadataValue::from_wire("m", &json!("5000")).unwrap(),
            MetadataValue::Integer(5000)
        );
        assert_eq!(
            MetadataValue::from_wire("m", &json!("gold")).unwrap(),
            MetadataValue::String("gold".into())
        );
        assert!(MetadataValue::from_wire("m", &json!(1.5)).is_err());
        assert!(MetadataValue::from_wire("m", &json!(null)).is_err());
    }

    #[test]
    fn test_wire_decoding_with_data_type() {
        let ts = Utc.with_ymd_and_hms(2023, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            MetadataValue::from_wire_typed("v", &json!("1"), MetadataDataType::Boolean).unwrap(),
            MetadataValue::Boolean(true)
        );
        assert_eq!(
            MetadataValue::from_wire_typed(
                "t",
                &json!("2023-03-01T12:00:00+00:00"),
                MetadataDataType::DateTime
            )
            .unwrap(),
            MetadataValue::Timestamp(ts)
        );
        assert_eq!(
            MetadataValue::from_wire_typed("m", &json!("12"), MetadataDataType::Integer).unwrap(),
            MetadataValue::Integer(12)
        );
    }
}
