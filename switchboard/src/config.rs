//! Switchboard configuration.
//!
//! Every field has a default so a config document only needs to name what it
//! changes. Durations are written as fractional seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::transport::TransportSpec;

/// Width of the host timestamp header `<YYYY-MM-DD HH:MM:SS.ffffff>`.
pub const HOST_TIMESTAMP_LENGTH: usize = 28;

/// Width of the `" GDM-N: "` tag that follows the timestamp.
pub const LOG_LINE_HEADER_LENGTH: usize = 8;

/// Header width `process_line` assumes when the caller does not give one.
pub const DEFAULT_HEADER_LENGTH: usize = 29;

/// Host timestamp format used in log headers and event records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Default expect search window.
pub const SEARCH_WINDOW_SIZE: usize = 2000;

/// Top-level switchboard configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Device name used in logs and error messages.
    pub device_name: String,

    /// Directory that receives the device log and event file.
    pub log_directory: PathBuf,

    /// Log file name; `<device_name>.txt` when empty.
    pub log_filename: Option<String>,

    /// Filter files or directories loaded at startup.
    pub filter_paths: Vec<PathBuf>,

    /// Ports in index order.
    pub ports: Vec<PortConfig>,

    /// Expect search window in bytes.
    pub search_window_size: usize,

    /// Poll interval for a single transport read.
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Largest read requested from a transport.
    pub max_read_bytes: usize,

    /// Largest single write handed to a transport.
    pub max_write_bytes: usize,

    /// How long an unterminated line is held before it is published.
    #[serde(with = "duration_secs")]
    pub partial_line_timeout: Duration,

    /// Attempts for one write before it surfaces as a device error.
    pub write_attempts: usize,

    /// Pause between write attempts.
    #[serde(with = "duration_secs")]
    pub write_backoff: Duration,

    /// Interval between readiness probes while a port is opening.
    #[serde(with = "duration_secs")]
    pub ready_poll_interval: Duration,

    /// Bound on `open_transport`.
    #[serde(with = "duration_secs")]
    pub open_timeout: Duration,

    /// Failed opens tolerated within `reopen_window` before the port is
    /// declared disconnected.
    pub reopen_failure_limit: usize,

    #[serde(with = "duration_secs")]
    pub reopen_window: Duration,

    /// Lines kept per port for `read_new_lines`.
    pub history_lines: usize,

    /// Rotate the log when it reaches this size. Zero disables rotation.
    pub max_log_size: u64,

    /// Strip ANSI escape sequences from captured lines.
    pub strip_ansi: bool,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            device_name: "device".to_string(),
            log_directory: PathBuf::from("."),
            log_filename: None,
            filter_paths: Vec::new(),
            ports: Vec::new(),
            search_window_size: SEARCH_WINDOW_SIZE,
            read_timeout: Duration::from_millis(10),
            max_read_bytes: 11520,
            max_write_bytes: 32,
            partial_line_timeout: Duration::from_millis(100),
            write_attempts: 3,
            write_backoff: Duration::from_millis(100),
            ready_poll_interval: Duration::from_secs(2),
            open_timeout: Duration::from_secs(30),
            reopen_failure_limit: 30,
            reopen_window: Duration::from_secs(120),
            history_lines: 1000,
            max_log_size: 0,
            strip_ansi: false,
        }
    }
}

impl SwitchboardConfig {
    /// Create a configuration for the named device.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    /// Load a configuration document from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::InvalidArgument {
            device: "switchboard".into(),
            message: format!("unable to read config {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::InvalidArgument {
            device: "switchboard".into(),
            message: format!("invalid config {}: {}", path.display(), e),
        })
    }

    /// Full path of the device log.
    pub fn log_path(&self) -> PathBuf {
        let name = match &self.log_filename {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}.txt", self.device_name),
        };
        self.log_directory.join(name)
    }
}

/// One port of a device.
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    /// Transport used by this port.
    pub transport: TransportSpec,

    /// Reopen the transport after an unexpected failure.
    #[serde(default = "default_true")]
    pub auto_reopen: bool,

    /// Open the transport when the switchboard starts.
    #[serde(default = "default_true")]
    pub open_on_start: bool,
}

impl PortConfig {
    /// Create a port that opens on start and reopens after failures.
    pub fn new(transport: TransportSpec) -> Self {
        Self {
            transport,
            auto_reopen: true,
            open_on_start: true,
        }
    }

    /// Set auto reopen.
    pub fn auto_reopen(mut self, auto_reopen: bool) -> Self {
        self.auto_reopen = auto_reopen;
        self
    }

    /// Set open on start.
    pub fn open_on_start(mut self, open_on_start: bool) -> Self {
        self.open_on_start = open_on_start;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Serde helper for durations given as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwitchboardConfig::new("pixel-7");
        assert_eq!(config.search_window_size, 2000);
        assert_eq!(config.max_write_bytes, 32);
        assert_eq!(config.read_timeout, Duration::from_millis(10));
        assert_eq!(config.log_path(), PathBuf::from("./pixel-7.txt"));
    }

    #[test]
    fn test_header_widths() {
        assert_eq!(HOST_TIMESTAMP_LENGTH + LOG_LINE_HEADER_LENGTH, 36);
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: SwitchboardConfig = serde_json::from_str(
            r#"{
                "device_name": "rpi-01",
                "log_filename": "rpi.txt",
                "write_backoff": 0.25,
                "ports": [
                    {"transport": {"kind": "socket", "host": "127.0.0.1", "port": 4000},
                     "auto_reopen": false}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.device_name, "rpi-01");
        assert_eq!(config.write_backoff, Duration::from_millis(250));
        assert_eq!(config.open_timeout, Duration::from_secs(30));
        assert_eq!(config.ports.len(), 1);
        assert!(!config.ports[0].auto_reopen);
        assert!(config.ports[0].open_on_start);
        assert!(config.log_path().ends_with("rpi.txt"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sb.json");
        std::fs::write(&path, r#"{"device_name": "dut", "max_log_size": 4096}"#).unwrap();
        let config = SwitchboardConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_log_size, 4096);

        std::fs::write(&path, "not json").unwrap();
        assert!(SwitchboardConfig::from_json_file(&path).is_err());
    }
}
