//! Lenient deserializers for control-plane JSON
//!
//! The control plane is not strict about scalar types: identifiers show up as
//! strings or numbers and timestamps as RFC 3339 text, zone-less local time or
//! epoch milliseconds. These helpers normalise them at the edge.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{DeserializeOwned, Error};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl RawScalar {
    fn into_text(self) -> String {
        match self {
            RawScalar::Text(s) => s.trim().to_string(),
            RawScalar::Signed(n) => n.to_string(),
            RawScalar::Unsigned(n) => n.to_string(),
        }
    }
}

/// Deserializes a string or integer into a `String`
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawScalar::deserialize(deserializer)?.into_text())
}

/// Deserializes an optional string or integer; blank strings become `None`
pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawScalar>::deserialize(deserializer)?
        .map(RawScalar::into_text)
        .filter(|s| !s.is_empty()))
}

/// Deserializes an optional timestamp
///
/// Accepts epoch milliseconds, RFC 3339, or `YYYY-MM-DDTHH:MM:SS[.fff]`
/// without an offset (read as UTC).
pub fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawScalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawScalar::Signed(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
        Some(RawScalar::Unsigned(ms)) => i64::try_from(ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
        Some(RawScalar::Text(text)) => parse_timestamp(&text).map(Some).map_err(D::Error::custom),
    }
}

/// Like [`opt_timestamp`], but an unreadable value becomes `None`
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(opt_timestamp(value).unwrap_or(None))
}

/// Deserializes `T`, falling back to its default when the value does not fit
pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Deserializes an optional TCP port given as a number or numeric string
///
/// Blank strings become `None`; anything outside `0..=65535` is an error.
pub fn opt_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<RawScalar>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let text = raw.into_text();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<u16>()
        .map(Some)
        .map_err(|_| D::Error::custom(format!("invalid port: {}", text)))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))
}
