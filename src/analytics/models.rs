//! Data models for analytics

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Country sentinel used when no country could be resolved
pub const UNKNOWN_COUNTRY: &str = "XX";

/// Date format used for log file names and summary keys
pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn unknown_country() -> String {
    UNKNOWN_COUNTRY.to_string()
}

/// One observed ping, as stored in the daily event log
///
/// Serialized as `{"ts": <int>, "uid": "<string>", "country": "<code>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unix timestamp (seconds)
    #[serde(rename = "ts")]
    pub timestamp: i64,

    /// Anonymous or trusted identifier
    #[serde(rename = "uid", default)]
    pub identifier: String,

    /// Two-letter country code or "XX"
    #[serde(default = "unknown_country")]
    pub country: String,
}

/// Identifier produced by the identity resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub id: String,

    /// True when the id was supplied by the device itself
    pub trusted: bool,
}

/// Result of a single ingestion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Event appended to the log
    Recorded { new_lifetime_user: bool },
    /// Identifier was already counted inside the dedup window
    Suppressed,
}

/// Aggregated statistics for one calendar day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub unique_users: u64,

    /// Country → unique users, ordered by descending count
    pub countries: IndexMap<String, u64>,
}

impl DailySummary {
    /// Top `n` countries in summary order
    pub fn top_countries(&self, n: usize) -> impl Iterator<Item = (&str, u64)> {
        self.countries
            .iter()
            .take(n)
            .map(|(code, count)| (code.as_str(), *count))
    }
}

/// Date (`YYYY-MM-DD`) → daily summary, newest first
pub type Summary = IndexMap<String, DailySummary>;

/// Format a date the way log files and summary keys name it
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` key
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = Event {
            timestamp: 1_700_000_000,
            identifier: "dev123".to_string(),
            country: "NL".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"ts":1700000000,"uid":"dev123","country":"NL"}"#);
    }

    #[test]
    fn test_event_missing_fields_use_defaults() {
        let event: Event = serde_json::from_str(r#"{"ts": 5}"#).unwrap();
        assert_eq!(event.identifier, "");
        assert_eq!(event.country, UNKNOWN_COUNTRY);
    }

    #[test]
    fn test_date_key_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 25).unwrap();
        assert_eq!(date_key(date), "2026-02-25");
        assert_eq!(parse_date_key("2026-02-25"), Some(date));
        assert_eq!(parse_date_key("summary"), None);
    }
}
