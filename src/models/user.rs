use serde::{Deserialize, Deserializer, Serialize};

/// The `/users/@me` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
    #[serde(default)]
    pub system: Option<bool>,
    #[serde(default)]
    pub accent_color: Option<u32>,
    #[serde(default)]
    pub mfa_enabled: Option<bool>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub flags: Option<u64>,
    #[serde(default)]
    pub premium_type: Option<u8>,
    #[serde(default)]
    pub public_flags: Option<u64>,
}

// Discord sends snowflakes as strings
fn snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Int(i) => Ok(i),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_payload_parses_string_snowflake() {
        let user: UserPayload = serde_json::from_value(json!({
            "id": "80351110224678912",
            "username": "Nelly",
            "discriminator": "1337",
            "avatar": "8342729096ea3675442027381ff50dfe",
            "verified": true,
            "email": "nelly@discord.com",
            "flags": 64,
            "banner": "06c16474723fe537c283b8efa61a30c8",
            "accent_color": 16_711_680,
            "premium_type": 1,
            "public_flags": 64
        }))
        .unwrap();

        assert_eq!(user.id, 80_351_110_224_678_912);
        assert_eq!(user.accent_color, Some(16_711_680));
        assert_eq!(user.bot, None);
    }

    #[test]
    fn test_user_payload_rejects_bad_snowflake() {
        let result: Result<UserPayload, _> =
            serde_json::from_value(json!({"id": "abc", "username": "x"}));
        assert!(result.is_err());
    }
}
