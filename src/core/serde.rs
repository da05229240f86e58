use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Serializes an EUI-64 as a colon-separated hex string
pub fn serialize_eui64<S>(bytes: &[u8; 8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    super::LinkAddr(*bytes).to_string().serialize(serializer)
}

/// Deserializes an EUI-64 from a colon-separated hex string
pub fn deserialize_eui64<'de, D>(deserializer: D) -> Result<[u8; 8], D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    text.parse::<super::LinkAddr>()
        .map(|addr| addr.0)
        .map_err(serde::de::Error::custom)
}
