//! The event parser: applies filters to captured lines and answers event
//! queries from the event file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use indexmap::IndexMap;
use log::{debug, info, warn};
use regex::Regex;
use tokio::time::Instant;

use super::filter::{self, Filter};
use super::record::{parse_timestamp, EventRecord, ParserResult};
use crate::config::TIMESTAMP_FORMAT;
use crate::error::ParserError;

/// Poll interval while waiting for the event file or for labels.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on the history reads behind the cause/effect queries.
const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Event file that accompanies the log at `log_path`.
pub fn event_file_path_for(log_path: &Path) -> PathBuf {
    let mut path = log_path.with_extension("").into_os_string();
    path.push("-events.txt");
    PathBuf::from(path)
}

/// Applies loaded filters to log lines and queries the resulting events.
///
/// Filters are keyed by event label in load order. Matches are appended to
/// the event file as JSON lines; the most recent record per label is also
/// kept in memory so `get_last_event` rarely touches the file.
#[derive(Debug)]
pub struct EventParser {
    device_name: String,
    filters: RwLock<IndexMap<String, Filter>>,
    event_file_path: RwLock<PathBuf>,
    event_file: Mutex<Option<File>>,
    last_events: RwLock<HashMap<String, EventRecord>>,
    latest: RwLock<Option<EventRecord>>,
}

impl EventParser {
    /// Create a parser with no filters.
    pub fn new(device_name: impl Into<String>, event_file_path: impl Into<PathBuf>) -> Self {
        Self {
            device_name: device_name.into(),
            filters: RwLock::new(IndexMap::new()),
            event_file_path: RwLock::new(event_file_path.into()),
            event_file: Mutex::new(None),
            last_events: RwLock::new(HashMap::new()),
            latest: RwLock::new(None),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn event_file_path(&self) -> PathBuf {
        read(&self.event_file_path).clone()
    }

    /// Write further events to `path`. Cached last events are dropped.
    pub fn set_event_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("{} event file is now {}", self.device_name, path.display());
        *lock(&self.event_file) = None;
        *write(&self.event_file_path) = path;
        write(&self.last_events).clear();
        *write(&self.latest) = None;
    }

    /// Load one filter file. Either every filter in the file is added or none.
    ///
    /// Returns the number of filters added.
    pub fn load_filter_file(&self, path: impl AsRef<Path>) -> Result<usize, ParserError> {
        let path = path.as_ref();
        debug!("Adding filter file {}", path.display());
        let loaded = filter::read_filter_file(path)?;

        let mut filters = write(&self.filters);
        if let Some(dup) = loaded.iter().find(|f| filters.contains_key(&f.label)) {
            return Err(ParserError::DuplicateFilter {
                path: path.to_path_buf(),
                label: dup.label.clone(),
            });
        }
        let count = loaded.len();
        for f in loaded {
            debug!("Added filter {} from filter file {}", f.label, path.display());
            filters.insert(f.label.clone(), f);
        }
        Ok(count)
    }

    /// Load filter files and directories of filter files.
    ///
    /// A failing file does not stop the others from loading; all failures
    /// are reported together afterwards.
    pub fn load_filters<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), ParserError> {
        let mut failures = Vec::new();
        for path in paths {
            let files = match filter::filter_files(path.as_ref()) {
                Ok(files) => files,
                Err(e) => {
                    failures.push(e);
                    continue;
                }
            };
            for file in files {
                if let Err(e) = self.load_filter_file(&file) {
                    warn!("{}: {}", self.device_name, e);
                    failures.push(e);
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ParserError::FilterLoad { failures })
        }
    }

    pub fn filter_count(&self) -> usize {
        read(&self.filters).len()
    }

    /// Match `raw_line` against every filter.
    ///
    /// The first `header_length` bytes are the host header; the timestamp is
    /// read from bytes 1..27 of it. Each matching filter yields its own record.
    pub fn match_line(
        &self,
        raw_line: &str,
        header_length: usize,
        log_filename: Option<&str>,
    ) -> Vec<EventRecord> {
        let body = raw_line.trim_end().get(header_length..).unwrap_or("");
        let filters = read(&self.filters);
        let matches: Vec<(String, Vec<String>)> = filters
            .values()
            .filter_map(|f| f.apply(body).map(|groups| (f.label.clone(), groups)))
            .collect();
        if matches.is_empty() {
            return Vec::new();
        }

        let system_timestamp = raw_line
            .get(1..27)
            .and_then(parse_timestamp)
            .unwrap_or_else(|| Local::now().naive_local());
        let matched_timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        matches
            .into_iter()
            .map(|(label, groups)| {
                let mut record = EventRecord::new(system_timestamp, body).with_label(label, groups);
                record.log_filename = log_filename.map(str::to_string);
                record.matched_timestamp = Some(matched_timestamp.clone());
                record
            })
            .collect()
    }

    /// Match `raw_line` and append the resulting records to the event file.
    pub fn process_line(
        &self,
        raw_line: &str,
        header_length: usize,
        log_filename: Option<&str>,
    ) -> Result<usize, ParserError> {
        let records = self.match_line(raw_line, header_length, log_filename);
        if records.is_empty() {
            return Ok(0);
        }
        let path = self.event_file_path();
        let mut guard = lock(&self.event_file);
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| ParserError::EventFile {
                    path: path.clone(),
                    source,
                })?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            write_records(file, &records)
                .map_err(|source| ParserError::EventFile { path, source })?;
        }
        drop(guard);
        self.remember(&records);
        Ok(records.len())
    }

    /// Match `raw_line` and append the resulting records to `event_file`.
    pub fn process_line_into<W: Write>(
        &self,
        event_file: &mut W,
        raw_line: &str,
        header_length: usize,
        log_filename: Option<&str>,
    ) -> std::io::Result<usize> {
        let records = self.match_line(raw_line, header_length, log_filename);
        if !records.is_empty() {
            write_records(event_file, &records)?;
            self.remember(&records);
        }
        Ok(records.len())
    }

    fn remember(&self, records: &[EventRecord]) {
        let mut last_events = write(&self.last_events);
        for record in records {
            for label in record.labels.keys() {
                last_events.insert(label.clone(), record.clone());
            }
        }
        if let Some(record) = records.last() {
            *write(&self.latest) = Some(record.clone());
        }
    }

    /// Most recent event for each label, or the most recent event of any
    /// label when `labels` is empty.
    pub async fn get_last_event(
        &self,
        labels: &[&str],
        timeout: Duration,
    ) -> Result<ParserResult, ParserError> {
        self.verify_event_labels(labels)?;

        if labels.is_empty() {
            if let Some(record) = read(&self.latest).clone() {
                return Ok(ParserResult::from_records(vec![record], false));
            }
            let (events, timed_out) = self.read_events(timeout).await?;
            let results = events.into_iter().last().into_iter().collect();
            return Ok(ParserResult::from_records(results, timed_out));
        }

        let mut results = Vec::with_capacity(labels.len());
        let mut missing = Vec::new();
        {
            let last_events = read(&self.last_events);
            for label in labels {
                match last_events.get(*label) {
                    Some(record) => results.push(record.only(&[label])),
                    None => missing.push(*label),
                }
            }
        }
        if missing.is_empty() {
            return Ok(ParserResult::from_records(results, false));
        }

        let (events, timed_out) = self.read_events(timeout).await?;
        for label in missing {
            if let Some(record) = events.iter().rev().find(|r| r.has_label(label)) {
                results.push(record.only(&[label]));
            }
        }
        Ok(ParserResult::from_records(results, timed_out))
    }

    /// Events carrying any of `labels` (all events when empty), most recent
    /// first, at most `count` of them.
    pub async fn get_event_history(
        &self,
        labels: &[&str],
        count: Option<usize>,
        timeout: Duration,
    ) -> Result<ParserResult, ParserError> {
        self.verify_event_labels(labels)?;
        let (events, timed_out) = self.read_events(timeout).await?;
        let limit = count.unwrap_or(usize::MAX);
        let results = events
            .iter()
            .rev()
            .filter(|r| labels.is_empty() || r.has_any_label(labels))
            .take(limit)
            .map(|r| if labels.is_empty() { r.clone() } else { r.only(labels) })
            .collect();
        Ok(ParserResult::from_records(results, timed_out))
    }

    /// Number of events carrying `label`.
    pub async fn get_event_history_count(
        &self,
        label: &str,
        timeout: Duration,
    ) -> Result<ParserResult, ParserError> {
        self.verify_event_labels(&[label])?;
        let (events, timed_out) = self.read_events(timeout).await?;
        Ok(ParserResult {
            timed_out,
            results: Vec::new(),
            count: events.iter().filter(|r| r.has_label(label)).count(),
        })
    }

    /// Capture group `group_index` of the most recent `label` event.
    ///
    /// When the event has not been seen, or has fewer groups, this fails if
    /// `raise_error` is set and otherwise logs a warning and returns "".
    pub async fn get_last_event_state(
        &self,
        label: &str,
        group_index: usize,
        raise_error: bool,
        timeout: Duration,
    ) -> Result<String, ParserError> {
        let result = self.get_last_event(&[label], timeout).await?;
        let err = match result.results.first().and_then(|r| r.groups(label)) {
            None => ParserError::NotYetSeen {
                device: self.device_name.clone(),
                label: label.to_string(),
            },
            Some(groups) => match groups.get(group_index) {
                Some(state) => return Ok(state.clone()),
                None => ParserError::GroupIndex {
                    device: self.device_name.clone(),
                    index: group_index,
                    groups: groups.to_vec(),
                },
            },
        };
        if raise_error {
            Err(err)
        } else {
            warn!("{}", err);
            Ok(String::new())
        }
    }

    /// Pair cause events with effect events in time order.
    ///
    /// A cause is matched by the first effect after it. A cause followed by
    /// another cause is unmatched, as is an effect with no pending cause.
    /// Returns `(unmatched causes, unmatched effects)`, most recent first.
    pub async fn get_unmatched_events(
        &self,
        cause_label: &str,
        effect_label: &str,
    ) -> Result<(Vec<EventRecord>, Vec<EventRecord>), ParserError> {
        let causes = self
            .get_event_history(&[cause_label], None, HISTORY_TIMEOUT)
            .await?;
        let effects = self
            .get_event_history(&[effect_label], None, HISTORY_TIMEOUT)
            .await?;
        let causes = if causes.timed_out { Vec::new() } else { causes.results };
        let effects = if effects.timed_out { Vec::new() } else { effects.results };

        let mut timeline: Vec<(NaiveDateTime, bool, EventRecord)> = causes
            .into_iter()
            .map(|r| (r.system_timestamp, true, r))
            .chain(effects.into_iter().map(|r| (r.system_timestamp, false, r)))
            .collect();
        // Stable sort; a cause sorts before an effect with the same timestamp
        timeline.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut unmatched_causes = Vec::new();
        let mut unmatched_effects = Vec::new();
        let mut pending: Option<EventRecord> = None;
        for (_, is_cause, record) in timeline {
            if is_cause {
                if let Some(previous) = pending.replace(record) {
                    unmatched_causes.push(previous);
                }
            } else if pending.take().is_none() {
                unmatched_effects.push(record);
            }
        }
        unmatched_causes.extend(pending);
        unmatched_causes.reverse();
        unmatched_effects.reverse();
        Ok((unmatched_causes, unmatched_effects))
    }

    /// Bootups that no host-triggered reboot accounts for.
    pub async fn get_unexpected_reboots(&self) -> Result<Vec<EventRecord>, ParserError> {
        let (_, bootups) = self
            .get_unmatched_events("basic.reboot_trigger", "basic.bootup")
            .await?;
        Ok(bootups)
    }

    /// Wait until every label has an event at or after `start` (now when
    /// `None`).
    pub async fn wait_for_event_labels(
        &self,
        labels: &[&str],
        timeout: Duration,
        raise_error: bool,
        start: Option<NaiveDateTime>,
    ) -> Result<bool, ParserError> {
        self.verify_event_labels(labels)?;
        info!(
            "{} waiting up to {:?} for the following labels: {:?}.",
            self.device_name, timeout, labels
        );
        let start = start.unwrap_or_else(|| Local::now().naive_local());
        let deadline = Instant::now() + timeout;

        let (found, missed) = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = self.get_last_event(labels, remaining).await?;
            let (found, missed): (Vec<String>, Vec<String>) =
                labels.iter().map(|l| l.to_string()).partition(|label| {
                    result
                        .results
                        .iter()
                        .any(|r| r.has_label(label) && r.system_timestamp >= start)
                });
            if missed.is_empty() && !result.timed_out {
                return Ok(true);
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                break (found, missed);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let err = ParserError::EventsNotFound {
            device: self.device_name.clone(),
            timeout,
            found,
            missed,
        };
        if raise_error {
            Err(err)
        } else {
            warn!("{}", err);
            Ok(false)
        }
    }

    /// Loaded labels, optionally only those matching `pattern` at their start.
    pub fn get_event_labels(&self, pattern: Option<&str>) -> Result<Vec<String>, ParserError> {
        Ok(self.get_event_label_dict(pattern)?.into_keys().collect())
    }

    /// Loaded labels mapped to their regex, optionally only those matching
    /// `pattern` at their start.
    pub fn get_event_label_dict(
        &self,
        pattern: Option<&str>,
    ) -> Result<IndexMap<String, String>, ParserError> {
        let matcher = pattern
            .map(|p| {
                Regex::new(&format!(r"\A(?:{})", p)).map_err(|source| ParserError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(read(&self.filters)
            .iter()
            .filter(|(label, _)| matcher.as_ref().is_none_or(|m| m.is_match(label)))
            .map(|(label, f)| (label.clone(), f.pattern().to_string()))
            .collect())
    }

    /// Fail with `UnknownLabel` if any label is not loaded.
    pub fn verify_event_labels(&self, labels: &[&str]) -> Result<(), ParserError> {
        let filters = read(&self.filters);
        match labels.iter().find(|l| !filters.contains_key(**l)) {
            None => Ok(()),
            Some(label) => Err(ParserError::UnknownLabel {
                device: self.device_name.clone(),
                label: label.to_string(),
                available: filters.keys().cloned().collect(),
            }),
        }
    }

    /// All records of the event file in file order, waiting up to `timeout`
    /// for the file to exist. The flag reports whether the wait expired.
    async fn read_events(&self, timeout: Duration) -> Result<(Vec<EventRecord>, bool), ParserError> {
        let path = self.event_file_path();
        let deadline = Instant::now() + timeout;
        loop {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                break;
            }
            if Instant::now() >= deadline {
                return Ok((Vec::new(), true));
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }

        let text = match tokio::time::timeout_at(deadline, tokio::fs::read_to_string(&path)).await {
            Ok(read) => read.map_err(|source| ParserError::EventFile {
                path: path.clone(),
                source,
            })?,
            Err(_) => return Ok((Vec::new(), true)),
        };
        let events = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<EventRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    info!("Failed to parse event log line; skipping. Err: {}", e);
                    None
                }
            })
            .collect();
        Ok((events, false))
    }
}

/// Serialize records as JSON lines and append them in one write.
fn write_records<W: Write>(writer: &mut W, records: &[EventRecord]) -> std::io::Result<()> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    writer.write_all(&buf)?;
    writer.flush()
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{HOST_TIMESTAMP_LENGTH, LOG_LINE_HEADER_LENGTH};

    const HEADER: usize = HOST_TIMESTAMP_LENGTH + LOG_LINE_HEADER_LENGTH;

    const POWER: &str = r#"{
        "version": {"major": 1, "minor": 0},
        "filters": [
            {"name": "state", "regex_match": "power:(\\w+)"},
            {"name": "lost", "regex_match": "power lost"},
            {"name": "restored", "regex_match": "power restored"}
        ]
    }"#;

    const BASIC: &str = r#"{
        "version": {"major": 1, "minor": 0},
        "filters": [
            {"name": "reboot_trigger", "regex_match": "Note: GDM triggered reboot"},
            {"name": "bootup", "regex_match": "Welcome to"}
        ]
    }"#;

    fn logged(ts: &str, text: &str) -> String {
        format!("<{}> GDM-0: {}\n", ts, text)
    }

    fn setup() -> (tempfile::TempDir, EventParser) {
        let dir = tempfile::tempdir().unwrap();
        let filters = dir.path().join("filters");
        std::fs::create_dir(&filters).unwrap();
        std::fs::write(filters.join("power.json"), POWER).unwrap();
        std::fs::write(filters.join("basic.json"), BASIC).unwrap();
        let parser = EventParser::new("dut-1", dir.path().join("dut-1-events.txt"));
        parser.load_filters(&[filters]).unwrap();
        (dir, parser)
    }

    #[test]
    fn test_event_file_path_for_log() {
        assert_eq!(
            event_file_path_for(Path::new("/tmp/logs/dut-1.txt")),
            PathBuf::from("/tmp/logs/dut-1-events.txt")
        );
    }

    #[test]
    fn test_load_filters_reports_failures_and_keeps_others() {
        let (dir, parser) = setup();
        assert_eq!(parser.filter_count(), 5);

        let bad = dir.path().join("broken.json");
        std::fs::write(&bad, "{").unwrap();
        let extra = dir.path().join("extra.json");
        std::fs::write(
            &extra,
            r#"{"version": {"major": 1, "minor": 0}, "filters": [{"name": "x", "regex_match": "x"}]}"#,
        )
        .unwrap();
        let err = parser
            .load_filters(&[bad, extra, dir.path().join("missing.json")])
            .unwrap_err();
        match err {
            ParserError::FilterLoad { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(parser.filter_count(), 6);
    }

    #[test]
    fn test_duplicate_file_is_rejected_whole() {
        let (dir, parser) = setup();
        let again = dir.path().join("power.json");
        std::fs::write(&again, POWER).unwrap();
        assert!(matches!(
            parser.load_filter_file(&again).unwrap_err(),
            ParserError::DuplicateFilter { .. }
        ));
        assert_eq!(parser.filter_count(), 5);
    }

    #[test]
    fn test_match_line_is_deterministic() {
        let (_dir, parser) = setup();
        let line = logged("2018-02-02 12:00:57.154328", "power lost, power:OFF");
        let first = parser.match_line(&line, HEADER, None);
        let second = parser.match_line(&line, HEADER, None);
        assert_eq!(first.len(), 2);
        let labels = |records: &[EventRecord]| {
            records
                .iter()
                .flat_map(|r| r.labels.keys().cloned())
                .collect::<Vec<_>>()
        };
        assert_eq!(labels(&first), labels(&second));
        assert_eq!(first[0].raw_log_line, "power lost, power:OFF");
        assert!(parser.match_line("no header", HEADER, None).is_empty());
    }

    #[test]
    fn test_process_line_into_writer() {
        let (_dir, parser) = setup();
        let mut out = Vec::new();
        let line = logged("2018-02-02 12:00:57.154328", "power:OFF");
        assert_eq!(
            parser
                .process_line_into(&mut out, &line, HEADER, Some("dut-1.txt"))
                .unwrap(),
            1
        );
        let text = String::from_utf8(out).unwrap();
        let record: EventRecord = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(record.groups("power.state").unwrap(), ["OFF"]);
        assert_eq!(record.log_filename.as_deref(), Some("dut-1.txt"));
        assert!(record.matched_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_last_event_is_most_recent() {
        let (dir, parser) = setup();
        parser
            .process_line(&logged("2018-02-02 12:00:57.154328", "power:OFF"), HEADER, None)
            .unwrap();
        parser
            .process_line(&logged("2018-02-02 12:01:22.122824", "power:ON"), HEADER, None)
            .unwrap();

        let result = parser
            .get_last_event(&["power.state"], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.results[0].groups("power.state").unwrap(), ["ON"]);

        // A second parser has an empty cache and reads the file
        let reader = EventParser::new("dut-1", parser.event_file_path());
        reader.load_filters(&[dir.path().join("filters")]).unwrap();
        let result = reader
            .get_last_event(&["power.state"], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.results[0].groups("power.state").unwrap(), ["ON"]);

        let state = reader
            .get_last_event_state("power.state", 0, true, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(state, "ON");
    }

    #[tokio::test]
    async fn test_history_most_recent_first_with_count() {
        let (_dir, parser) = setup();
        for ts in [
            "2018-02-02 12:00:57.154328",
            "2018-02-02 12:02:18.121948",
            "2018-02-02 12:05:00.000001",
        ] {
            parser
                .process_line(&logged(ts, "[APPL] Spoke: power lost, powering down"), HEADER, None)
                .unwrap();
        }
        parser
            .process_line(&logged("2018-02-02 12:06:00.000000", "power restored"), HEADER, None)
            .unwrap();

        let result = parser
            .get_event_history(&["power.lost"], Some(2), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(
            result.results[0].system_timestamp,
            parse_timestamp("2018-02-02 12:05:00.000001").unwrap()
        );
        assert_eq!(
            result.results[1].system_timestamp,
            parse_timestamp("2018-02-02 12:02:18.121948").unwrap()
        );
        assert!(result.results.iter().all(|r| !r.has_label("power.restored")));

        let all = parser
            .get_event_history(&[], None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(all.count, 4);

        let count = parser
            .get_event_history_count("power.lost", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(count.count, 3);
        assert!(count.results.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_reboot_trigger() {
        let (_dir, parser) = setup();
        parser
            .process_line(
                &logged("2018-06-18 15:13:48.011747", "Note: GDM triggered reboot"),
                HEADER,
                None,
            )
            .unwrap();
        parser
            .process_line(
                &logged("2018-06-18 15:13:52.825231", "Note: GDM triggered reboot"),
                HEADER,
                None,
            )
            .unwrap();
        parser
            .process_line(
                &logged("2018-06-18 15:13:58.540417", "[APPL] Welcome to Lock App"),
                HEADER,
                None,
            )
            .unwrap();

        let (causes, effects) = parser
            .get_unmatched_events("basic.reboot_trigger", "basic.bootup")
            .await
            .unwrap();
        assert_eq!(causes.len(), 1);
        assert_eq!(
            causes[0].system_timestamp,
            parse_timestamp("2018-06-18 15:13:48.011747").unwrap()
        );
        assert!(effects.is_empty());
        assert!(parser.get_unexpected_reboots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_bootup() {
        let (_dir, parser) = setup();
        parser
            .process_line(&logged("2018-06-18 15:13:58.540417", "Welcome to Lock App"), HEADER, None)
            .unwrap();
        let reboots = parser.get_unexpected_reboots().await.unwrap();
        assert_eq!(reboots.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_event_labels() {
        let (_dir, parser) = setup();
        let parser = Arc::new(parser);
        let writer = parser.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
            writer.process_line(&logged(&now, "power:ON"), HEADER, None).unwrap();
        });
        let found = parser
            .wait_for_event_labels(&["power.state"], Duration::from_secs(3), true, None)
            .await
            .unwrap();
        assert!(found);

        let found = parser
            .wait_for_event_labels(&["power.lost"], Duration::from_millis(300), false, None)
            .await
            .unwrap();
        assert!(!found);

        let err = parser
            .wait_for_event_labels(&["power.lost"], Duration::from_millis(200), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ParserError::EventsNotFound { ref missed, .. } if missed == &["power.lost"]));
    }

    #[tokio::test]
    async fn test_state_errors() {
        let (_dir, parser) = setup();
        let err = parser
            .get_last_event_state("power.state", 0, true, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ParserError::NotYetSeen { .. }));

        parser
            .process_line(&logged("2018-02-02 12:00:57.154328", "power lost"), HEADER, None)
            .unwrap();
        let err = parser
            .get_last_event_state("power.lost", 0, true, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ParserError::GroupIndex { index: 0, .. }));
        let state = parser
            .get_last_event_state("power.lost", 0, false, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(state, "");
    }

    #[tokio::test]
    async fn test_missing_event_file_times_out() {
        let (_dir, parser) = setup();
        let result = parser
            .get_event_history(&["power.state"], None, Duration::from_millis(150))
            .await
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_labels_and_verification() {
        let (_dir, parser) = setup();
        let labels = parser.get_event_labels(Some("power")).unwrap();
        assert_eq!(labels, vec!["power.state", "power.lost", "power.restored"]);
        assert!(parser.get_event_labels(Some("state")).unwrap().is_empty());
        assert_eq!(parser.get_event_labels(None).unwrap().len(), 5);

        let dict = parser.get_event_label_dict(Some(r"basic\.boot")).unwrap();
        assert_eq!(dict.get("basic.bootup").map(String::as_str), Some("Welcome to"));

        assert!(matches!(
            parser.get_event_labels(Some("(")).unwrap_err(),
            ParserError::InvalidPattern { .. }
        ));
        assert!(matches!(
            parser.verify_event_labels(&["power.nope"]).unwrap_err(),
            ParserError::UnknownLabel { .. }
        ));
    }

    #[tokio::test]
    async fn test_set_event_file_drops_cache() {
        let (dir, parser) = setup();
        parser
            .process_line(&logged("2018-02-02 12:00:57.154328", "power:OFF"), HEADER, None)
            .unwrap();
        parser.set_event_file(dir.path().join("next-events.txt"));
        let result = parser
            .get_last_event(&["power.state"], Duration::from_millis(50))
            .await
            .unwrap();
        assert!(result.results.is_empty());
        assert!(result.timed_out);
    }
}
