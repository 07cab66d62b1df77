//! The device log file.
//!
//! Every captured line and host note is written as one record:
//!
//! ```text
//! <2024-05-02 10:14:07.123456> GDM-0: [    2.100000] usb 1-1: new device
//! <2024-05-02 10:14:07.200011> GDM-M: Note: wrote command "reboot\n" to port 0
//! ```
//!
//! Records are appended with a single write and flushed immediately, then
//! handed to the event parser under the same lock so the event file follows
//! log order.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use log::{info, warn};

use crate::config::{HOST_TIMESTAMP_LENGTH, LOG_LINE_HEADER_LENGTH};
use crate::parser::{event_file_path_for, EventParser};

const CHANGE_MAX_LOG_SIZE: &str = "Changing max_log_size";
const NEW_LOG_FILE_MESSAGE: &str = "Starting new log file at";
const ROTATE_LOG_MESSAGE: &str = "Rotating from log file";

/// Where a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Output captured from a port.
    Port(usize),
    /// A host-side note. Tagged `M` in the log.
    Host,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Port(index) => write!(f, "{}", index),
            LogSource::Host => f.write_str("M"),
        }
    }
}

/// Prefix `line` with the host timestamp and source tag.
///
/// Lines without a trailing newline get `[NO EOL]\n` so every record ends
/// a line in the file.
pub fn format_log_record(source: LogSource, line: &str) -> String {
    let mut record = format!(
        "{} GDM-{}: {}",
        Local::now().format("<%Y-%m-%d %H:%M:%S%.6f>"),
        source,
        line
    );
    if !record.ends_with('\n') {
        record.push_str("[NO EOL]\n");
    }
    record
}

/// Next file in a rotation: `dut.txt` -> `dut.00001.txt` -> `dut.00002.txt`.
pub fn next_log_path(current: &Path) -> PathBuf {
    let stem = current
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = current
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let (base, counter) = match stem.rsplit_once('.') {
        Some((base, digits)) if digits.len() == 5 && digits.bytes().all(|b| b.is_ascii_digit()) => {
            (base.to_string(), digits.parse::<u32>().unwrap_or(0))
        }
        _ => (stem, 0),
    };
    current.with_file_name(format!("{}.{:05}{}", base, counter + 1, ext))
}

struct LogFile {
    path: PathBuf,
    file: File,
    size: u64,
    max_log_size: u64,
}

impl LogFile {
    fn open(path: &Path, max_log_size: u64) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            max_log_size,
        })
    }

    fn append(&mut self, record: &str) -> io::Result<()> {
        self.file.write_all(record.as_bytes())?;
        self.file.flush()?;
        self.size += record.len() as u64;
        Ok(())
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Single writer of the device log.
pub struct LogWriter {
    device_name: String,
    log: Mutex<LogFile>,
    parser: Arc<EventParser>,
}

impl LogWriter {
    /// Open (appending to) the log at `path`, creating its directory.
    pub fn open(
        device_name: impl Into<String>,
        path: impl AsRef<Path>,
        max_log_size: u64,
        parser: Arc<EventParser>,
    ) -> io::Result<Self> {
        Ok(Self {
            device_name: device_name.into(),
            log: Mutex::new(LogFile::open(path.as_ref(), max_log_size)?),
            parser,
        })
    }

    /// Current log file.
    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    pub fn parser(&self) -> &Arc<EventParser> {
        &self.parser
    }

    /// Append one line, run it through the event parser, and rotate if the
    /// file reached its size limit.
    pub fn write_line(&self, source: LogSource, line: &str) -> io::Result<()> {
        // Stamp under the lock so records land in timestamp order
        let mut log = self.lock();
        self.append_and_parse(&mut log, &format_log_record(source, line))?;

        if log.max_log_size > 0 && log.size >= log.max_log_size {
            let next = next_log_path(&log.path);
            let note = format!(
                "{} {} to {}\n",
                ROTATE_LOG_MESSAGE,
                log.file_name(),
                next.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            );
            self.append_and_parse(&mut log, &format_log_record(LogSource::Host, &note))?;
            info!("{} rotating log to {}", self.device_name, next.display());
            let max = log.max_log_size;
            *log = LogFile::open(&next, max)?;
        }
        Ok(())
    }

    /// Append a host note (`Note: <text>`).
    pub fn add_note(&self, note: &str) -> io::Result<()> {
        let mut line = format!("Note: {}", note);
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.write_line(LogSource::Host, &line)
    }

    /// Change the rotation threshold. Zero disables rotation.
    pub fn set_max_log_size(&self, max_log_size: u64) -> io::Result<()> {
        let mut log = self.lock();
        let note = format!("{} from {} to {}\n", CHANGE_MAX_LOG_SIZE, log.max_log_size, max_log_size);
        self.append_and_parse(&mut log, &format_log_record(LogSource::Host, &note))?;
        log.max_log_size = max_log_size;
        Ok(())
    }

    /// Continue logging in `path`, with events going to the matching event
    /// file.
    pub fn start_new_log(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        let mut log = self.lock();
        let note = format!("{} {}\n", NEW_LOG_FILE_MESSAGE, path.display());
        self.append_and_parse(&mut log, &format_log_record(LogSource::Host, &note))?;
        let max = log.max_log_size;
        *log = LogFile::open(path, max)?;
        self.parser.set_event_file(event_file_path_for(path));
        info!("{} started new log file {}", self.device_name, path.display());
        Ok(())
    }

    fn append_and_parse(&self, log: &mut LogFile, record: &str) -> io::Result<()> {
        log.append(record)?;
        let file_name = log.file_name();
        if let Err(e) = self.parser.process_line(
            record,
            HOST_TIMESTAMP_LENGTH + LOG_LINE_HEADER_LENGTH,
            Some(&file_name),
        ) {
            warn!("{}: {}", self.device_name, e);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogFile> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("device_name", &self.device_name)
            .field("path", &self.path())
            .finish()
    }
}
