//! Error types for switchboard.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for switchboard operations.
///
/// Every device-facing variant carries the device name so that logs from a
/// multi-device test run stay attributable.
#[derive(Error, Debug)]
pub enum Error {
    /// The port's transport is not open (or was closed while waiting).
    #[error("{device}: transport for port {port} is not available while {action}")]
    TransportNotAvailable {
        device: String,
        port: usize,
        action: String,
    },

    /// An expect, call or open bound expired.
    #[error("{device}: {action} timed out after {timeout:?}")]
    CommunicationTimeout {
        device: String,
        action: String,
        timeout: Duration,
    },

    /// Transport I/O failed after all retries were exhausted.
    #[error("{device}: {command:?} failed: {source}")]
    Device {
        device: String,
        command: String,
        #[source]
        source: TransportError,
    },

    /// The capture loop gave up reopening the port.
    #[error("{device}: port {port} is disconnected")]
    Disconnected { device: String, port: usize },

    /// Another expect is already waiting on this port.
    #[error("{device}: an expect is already active on port {port}")]
    ExpectBusy { device: String, port: usize },

    /// Caller supplied an invalid argument.
    #[error("{device}: {message}")]
    InvalidArgument { device: String, message: String },

    /// Filter or event file errors.
    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    /// The device log could not be opened or written.
    #[error("{device}: log file error: {source}")]
    Log {
        device: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Whether the error means a port's transport is closed or gone.
    pub fn is_not_available(&self) -> bool {
        match self {
            Error::TransportNotAvailable { .. } | Error::Disconnected { .. } => true,
            Error::Device { source, .. } => matches!(source, TransportError::NotOpen { .. }),
            _ => false,
        }
    }
}

/// Transport layer errors (serial, SSH, subprocess, socket, framing).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Serial port error
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key differs from the one in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host not present in known_hosts under strict checking
    #[error("Host {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Transport is not open
    #[error("Transport {address} is not open")]
    NotOpen { address: String },

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Child process behind the transport exited
    #[error("Process '{program}' exited with {status}")]
    ProcessExited { program: String, status: String },

    /// Operation not supported by this transport kind
    #[error("{operation} is not supported by {kind} transports")]
    Unsupported {
        kind: &'static str,
        operation: &'static str,
    },

    /// Malformed frame or RPC packet
    #[error("Frame error: {0}")]
    Frame(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether a failed write should be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Timeout(_) | TransportError::Serial(_)
        )
    }

    /// Whether the channel itself is gone and must be reopened.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected
                | TransportError::ProcessExited { .. }
                | TransportError::NotOpen { .. }
                | TransportError::Ssh(_)
        ) || matches!(self, TransportError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof
            || e.kind() == io::ErrorKind::BrokenPipe
            || e.kind() == io::ErrorKind::ConnectionReset)
    }
}

/// Filter file and event file errors.
#[derive(Error, Debug)]
pub enum ParserError {
    /// Path could not be opened or listed
    #[error("Unable to access filter path '{path}': {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Filter file is not valid JSON
    #[error("Unable to parse filter file {path} as a json file: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Required key is absent
    #[error("Loading filter-file {path} failed. Missing '{key}' key.")]
    MissingKey { path: PathBuf, key: String },

    /// Key holds a value of the wrong type
    #[error("Loading filter-file {path} failed. Expecting {expected} for '{key}'.")]
    WrongType {
        path: PathBuf,
        key: String,
        expected: &'static str,
    },

    /// Filter file major version is not supported
    #[error("Loading filter-file {path} failed. Found unexpected major version {major}.")]
    UnsupportedVersion { path: PathBuf, major: i64 },

    /// Two filters resolve to the same event label
    #[error("Loading filter-file {path} failed. Filter named {label} already exists.")]
    DuplicateFilter { path: PathBuf, label: String },

    /// A filter's regex_match does not compile
    #[error("Loading filter-file {path} failed. Unable to compile regular expression '{pattern}': {source}")]
    InvalidRegex {
        path: PathBuf,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Label pattern passed to a label query does not compile
    #[error("Compiling regular expression pattern {pattern} failed: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// One or more files failed while loading a set of filter paths
    #[error("{} filter file(s) failed to load: {}", failures.len(), failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; "))]
    FilterLoad { failures: Vec<ParserError> },

    /// Event label is not loaded
    #[error("{device}: label {label} not available. Choose from: {available:?}")]
    UnknownLabel {
        device: String,
        label: String,
        available: Vec<String>,
    },

    /// Event file could not be read or written
    #[error("Event file {path} error: {source}")]
    EventFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Event label has not been seen yet
    #[error("{device} get event state failed. {label} not yet seen in logs")]
    NotYetSeen { device: String, label: String },

    /// Requested match group does not exist
    #[error("{device} get event state failed. Group index ({index}) is greater than number of match groups ({groups:?})")]
    GroupIndex {
        device: String,
        index: usize,
        groups: Vec<String>,
    },

    /// wait_for_event_labels expired
    #[error("{device}: not all events corresponding to labels were found in {timeout:?}. Found labels: {found:?}. Missed labels: {missed:?}.")]
    EventsNotFound {
        device: String,
        timeout: Duration,
        found: Vec<String>,
        missed: Vec<String>,
    },
}

/// Result type alias using switchboard's Error.
pub type Result<T> = std::result::Result<T, Error>;
