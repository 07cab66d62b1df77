//! Continuous capture of device output.
//!
//! One task per port reads its transport, writes every line to the device
//! log (which feeds the event parser), and publishes it to expect waiters.

mod log_writer;
mod port;

use chrono::{DateTime, Local};

pub use log_writer::{format_log_record, next_log_path, LogSource, LogWriter};
pub(crate) use port::{PortCommand, PortHandle, PortShared, PortTask};

/// A line captured from a port.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedLine {
    /// Port index.
    pub port: usize,
    /// Per-port sequence number, starting at zero.
    pub seq: u64,
    /// Host time the line was published.
    pub timestamp: DateTime<Local>,
    /// Line text, including its trailing newline when it had one.
    pub text: String,
}
