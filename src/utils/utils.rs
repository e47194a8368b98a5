use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Wall-clock format used for every timestamp we persist or render.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical form of a mailbox address used as a store key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

/// Local wall time truncated to whole seconds, matching what gets persisted.
pub fn local_now() -> DateTime<Local> {
    let now = Local::now();
    DateTime::<Utc>::from_timestamp(now.timestamp(), 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or(now)
}

/// Decodes RFC 2047 encoded words in a single header value.
///
/// Falls back to the raw text when the value is not a parseable header.
pub fn decode_header_value(name: &str, raw: &str) -> String {
    let line = format!("{}: {}", name, raw);
    match mailparse::parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => raw.to_string(),
    }
}

/// Serde adapter for `NaiveDateTime` in `YYYY-MM-DD HH:MM:SS` form.
pub mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
