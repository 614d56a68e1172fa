//! Clock-time parsing and ISO-8601 record timestamps.
//!
//! Encoder progress arrives as `HH:MM:SS.micro` clock strings, and job
//! records carry ISO-8601 timestamps. Records written by older deployments
//! store naive local timestamps without an offset, so deserialization
//! accepts both forms and reads naive values as UTC.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Parse a clock string to total seconds.
///
/// Supports formats:
/// - `HH:MM:SS` or `HH:MM:SS.micro`
/// - `MM:SS` or `MM:SS.mmm`
/// - `SS` or `SS.mmm`
///
/// # Examples
/// ```
/// use rescale_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    let mut total = 0.0;
    let names: &[&'static str] = match parts.len() {
        1 => &["seconds"],
        2 => &["minutes", "seconds"],
        3 => &["hours", "minutes", "seconds"],
        _ => return Err(TimestampError::InvalidFormat(ts.to_string())),
    };

    for (part, name) in parts.iter().zip(names) {
        let value: f64 = part
            .parse()
            .map_err(|_| TimestampError::InvalidValue(*name, part.to_string()))?;
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total = total * 60.0 + value;
    }

    Ok(total)
}

/// Current time at the precision records are written with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parse an ISO-8601 timestamp, with or without an offset.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| TimestampError::InvalidFormat(value.to_string()))
}

/// Serde adapter for required record timestamps.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, false))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_iso8601(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional record timestamps.
pub mod iso8601_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => super::iso8601::serialize(dt, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => super::parse_iso8601(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,
    #[error("Timestamp cannot be negative")]
    Negative,
    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),
    #[error("Invalid timestamp format '{0}'")]
    InvalidFormat(String),
}
