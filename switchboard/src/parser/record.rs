//! Event records as written to, and read back from, the event file.

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One line of the event file.
///
/// Each label key maps to the capture groups its filter extracted; a filter
/// without groups records an empty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Host capture time taken from the log line header.
    #[serde(with = "system_timestamp")]
    pub system_timestamp: NaiveDateTime,

    /// Log line with the host header removed.
    pub raw_log_line: String,

    /// Log file the line was captured into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filename: Option<String>,

    /// Host time the filter matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_timestamp: Option<String>,

    #[serde(flatten)]
    pub labels: IndexMap<String, Vec<String>>,
}

impl EventRecord {
    /// Create a record with no labels.
    pub fn new(system_timestamp: NaiveDateTime, raw_log_line: impl Into<String>) -> Self {
        Self {
            system_timestamp,
            raw_log_line: raw_log_line.into(),
            log_filename: None,
            matched_timestamp: None,
            labels: IndexMap::new(),
        }
    }

    /// Add a label and its capture groups.
    pub fn with_label(mut self, label: impl Into<String>, groups: Vec<String>) -> Self {
        self.labels.insert(label.into(), groups);
        self
    }

    /// Capture groups recorded for `label`.
    pub fn groups(&self, label: &str) -> Option<&[String]> {
        self.labels.get(label).map(Vec::as_slice)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains_key(label)
    }

    pub fn has_any_label<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        labels.iter().any(|l| self.has_label(l.as_ref()))
    }

    /// Copy of this record restricted to `labels`.
    pub fn only<S: AsRef<str>>(&self, labels: &[S]) -> Self {
        let mut filtered = Self {
            labels: IndexMap::new(),
            ..self.clone()
        };
        for label in labels {
            if let Some(groups) = self.labels.get(label.as_ref()) {
                filtered.labels.insert(label.as_ref().to_string(), groups.clone());
            }
        }
        filtered
    }
}

/// Result of an event query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserResult {
    /// The event file did not appear, or the scan did not finish, in time.
    pub timed_out: bool,

    /// Matching events, most recent first.
    pub results: Vec<EventRecord>,

    /// Number of matching events. For count queries `results` is empty.
    pub count: usize,
}

impl ParserResult {
    pub(crate) fn from_records(results: Vec<EventRecord>, timed_out: bool) -> Self {
        Self {
            timed_out,
            count: results.len(),
            results,
        }
    }
}

/// Parse a host timestamp, with or without fraction or UTC offset.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

mod system_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::config::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(text: &str) -> NaiveDateTime {
        parse_timestamp(text).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2018-02-02 12:02:18.121948").is_some());
        assert!(parse_timestamp("2018-02-02 12:02:18").is_some());
        assert!(parse_timestamp("2018-02-02 12:02:18.121948 +0000").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_record_json_layout() {
        let record = EventRecord::new(ts("2018-02-02 12:02:18.121948"), "power:OFF")
            .with_label("power.state", vec!["OFF".into()]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["system_timestamp"], "2018-02-02 12:02:18.121948");
        assert_eq!(json["raw_log_line"], "power:OFF");
        assert_eq!(json["power.state"][0], "OFF");
        assert!(json.get("log_filename").is_none());
    }

    #[test]
    fn test_reads_multi_label_objects() {
        let record: EventRecord = serde_json::from_str(
            r#"{"basic.reboot_trigger": [], "basic.state": ["rebooting"],
                "raw_log_line": "rebooting now",
                "system_timestamp": "2018-06-18 15:13:48.011747",
                "log_filename": "dut.txt"}"#,
        )
        .unwrap();
        assert_eq!(record.labels.len(), 2);
        assert_eq!(record.groups("basic.state").unwrap(), ["rebooting"]);
        assert_eq!(record.log_filename.as_deref(), Some("dut.txt"));

        let only = record.only(&["basic.state"]);
        assert!(!only.has_label("basic.reboot_trigger"));
        assert_eq!(only.raw_log_line, "rebooting now");
    }
}
