//! Transport layer.
//!
//! A transport is a byte channel to one port of a device: a serial node, an
//! SSH session, an `adb shell`, a raw TCP socket, or an HDLC framed RPC link
//! layered over one of those. Transports are owned by their port task and are
//! only ever driven from that task.

mod adb;
pub mod config;
pub mod hdlc;
mod process;
pub mod rpc;
mod serial;
mod socket;
mod ssh;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::TransportError;

pub use adb::AdbTransport;
pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use process::ProcessTransport;
pub use rpc::{FramedRpcTransport, RpcDispatcher, RpcReply};
pub use serial::SerialTransport;
pub use socket::SocketTransport;
pub use ssh::SshTransport;

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Kind of channel behind a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    Ssh,
    AdbShell,
    Socket,
    FramedRpc,
}

impl TransportKind {
    /// Short lowercase name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Serial => "serial",
            TransportKind::Ssh => "ssh",
            TransportKind::AdbShell => "adb",
            TransportKind::Socket => "socket",
            TransportKind::FramedRpc => "framed-rpc",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a port's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Closed on request, or never opened.
    #[default]
    Closed,
    /// Waiting for the device to become ready, or reopening after a fault.
    Opening,
    /// Open and being captured.
    Open,
    /// Closed after an unrecoverable error.
    Errored,
}

impl TransportState {
    /// Whether a waiter on this port can still expect output.
    pub fn is_available(&self) -> bool {
        matches!(self, TransportState::Open | TransportState::Opening)
    }
}

/// Line controls only a serial port supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialControl {
    /// Flush, switch the baud rate, flush again.
    SetBaudRate(u32),
    /// Flow control XON byte (`0x11`).
    Xon,
    /// Flow control XOFF byte (`0x13`).
    Xoff,
    /// Ctrl-C byte (`0x03`). Not the UART break condition.
    BreakByte,
}

impl fmt::Display for SerialControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialControl::SetBaudRate(rate) => write!(f, "baudrate {}", rate),
            SerialControl::Xon => f.write_str("XON"),
            SerialControl::Xoff => f.write_str("XOFF"),
            SerialControl::BreakByte => f.write_str("break"),
        }
    }
}

/// A byte channel to one device port.
///
/// `read` must never block past `timeout`; an empty buffer means nothing
/// arrived in time.
#[async_trait]
pub trait Transport: Send {
    /// Kind of channel.
    fn kind(&self) -> TransportKind;

    /// Human readable address (device node, `host:port`, adb serial).
    fn address(&self) -> &str;

    /// Open the channel.
    async fn open(&mut self) -> TransportResult<()>;

    /// Close the channel. Closing a closed transport is a no-op.
    async fn close(&mut self) -> TransportResult<()>;

    /// Whether the channel is open.
    fn is_open(&self) -> bool;

    /// Read up to `max_size` bytes, waiting at most `timeout`.
    async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes>;

    /// Write bytes, returning how many were accepted.
    async fn write(&mut self, data: &[u8]) -> TransportResult<usize>;

    /// Write one frame to an address. Only framed transports support this.
    async fn write_frame(&mut self, _address: u64, _payload: &[u8]) -> TransportResult<()> {
        Err(TransportError::Unsupported {
            kind: self.kind().as_str(),
            operation: "write_frame",
        })
    }

    /// Apply a serial line control. Only serial transports support this.
    async fn serial_control(&mut self, _control: SerialControl) -> TransportResult<()> {
        Err(TransportError::Unsupported {
            kind: self.kind().as_str(),
            operation: "serial_control",
        })
    }

    /// Liveness probe consulted before every open attempt.
    async fn is_ready_to_open(&mut self) -> bool {
        true
    }

    /// Reply dispatcher for transports that carry RPC traffic.
    fn rpc_dispatcher(&self) -> Option<Arc<RpcDispatcher>> {
        None
    }
}

/// Serializable description of a transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSpec {
    /// Serial device node.
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// SSH shell, or an exec'd log command.
    Ssh {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        key_path: Option<PathBuf>,
        #[serde(default)]
        log_cmd: Option<String>,
        #[serde(default)]
        strict_host_key_checking: bool,
    },
    /// `adb -s <serial> shell [command]`.
    AdbShell {
        serial: String,
        #[serde(default)]
        command: Option<String>,
        #[serde(default = "default_adb_path")]
        adb_path: String,
    },
    /// Raw TCP socket.
    Socket { host: String, port: u16 },
    /// HDLC framed RPC over another transport.
    FramedRpc { inner: Box<TransportSpec> },
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_ssh_port() -> u16 {
    22
}

fn default_adb_path() -> String {
    "adb".to_string()
}

impl TransportSpec {
    /// Construct the described transport. Nothing is opened.
    pub fn build(&self) -> Box<dyn Transport> {
        match self {
            TransportSpec::Serial { path, baud_rate } => {
                Box::new(SerialTransport::new(path.clone(), *baud_rate))
            }
            TransportSpec::Ssh {
                host,
                port,
                username,
                password,
                key_path,
                log_cmd,
                strict_host_key_checking,
            } => {
                let auth = match (password, key_path) {
                    (_, Some(path)) => AuthMethod::PrivateKey {
                        path: path.clone(),
                        passphrase: None,
                    },
                    (Some(password), None) => AuthMethod::Password(password.clone().into()),
                    (None, None) => AuthMethod::None,
                };
                let mut config = SshConfig::new(host.clone(), username.clone())
                    .port(*port)
                    .auth(auth);
                if *strict_host_key_checking {
                    config = config.host_key_verification(HostKeyVerification::Strict);
                }
                if let Some(cmd) = log_cmd {
                    config = config.log_cmd(cmd.clone());
                }
                Box::new(SshTransport::new(config))
            }
            TransportSpec::AdbShell {
                serial,
                command,
                adb_path,
            } => Box::new(AdbTransport::new(
                adb_path.clone(),
                serial.clone(),
                command.clone(),
            )),
            TransportSpec::Socket { host, port } => {
                Box::new(SocketTransport::new(host.clone(), *port))
            }
            TransportSpec::FramedRpc { inner } => {
                Box::new(FramedRpcTransport::new(inner.build()))
            }
        }
    }
}

/// Read from an async reader, returning an empty buffer when `timeout` expires.
///
/// End of stream is reported as `TransportError::Disconnected`.
pub(crate) async fn read_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    timeout: Duration,
) -> TransportResult<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(max_size.max(1));
    match tokio::time::timeout(timeout, reader.read(&mut buf)).await {
        Err(_) => Ok(Bytes::new()),
        Ok(Ok(0)) => Err(TransportError::Disconnected),
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(buf.freeze())
        }
        Ok(Err(e)) => Err(TransportError::Io(e)),
    }
}

/// In-memory transports for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;

    /// Transport over one end of a `tokio::io::duplex` pipe.
    pub struct PipeTransport {
        stream: DuplexStream,
        open: bool,
        ready: Arc<AtomicBool>,
        serial: bool,
        controls: Arc<Mutex<Vec<SerialControl>>>,
    }

    /// Returns the transport and the device end of the pipe.
    pub fn pipe() -> (PipeTransport, DuplexStream) {
        let (host, device) = tokio::io::duplex(64 * 1024);
        (
            PipeTransport {
                stream: host,
                open: false,
                ready: Arc::new(AtomicBool::new(true)),
                serial: false,
                controls: Arc::default(),
            },
            device,
        )
    }

    /// Like [`pipe`], reporting itself as a serial port and recording the
    /// serial controls it is given.
    pub fn serial_pipe() -> (PipeTransport, DuplexStream) {
        let (mut transport, device) = pipe();
        transport.serial = true;
        (transport, device)
    }

    impl PipeTransport {
        /// Flag controlling `is_ready_to_open`.
        pub fn ready_flag(&self) -> Arc<AtomicBool> {
            self.ready.clone()
        }

        /// Serial controls applied so far.
        pub fn controls(&self) -> Arc<Mutex<Vec<SerialControl>>> {
            self.controls.clone()
        }
    }

    #[async_trait]
    impl Transport for PipeTransport {
        fn kind(&self) -> TransportKind {
            if self.serial { TransportKind::Serial } else { TransportKind::Socket }
        }

        fn address(&self) -> &str {
            "pipe"
        }

        async fn open(&mut self) -> TransportResult<()> {
            self.open = true;
            Ok(())
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
            if !self.open {
                return Err(TransportError::NotOpen {
                    address: "pipe".into(),
                });
            }
            let result = read_with_timeout(&mut self.stream, max_size, timeout).await;
            if result.is_err() {
                self.open = false;
            }
            result
        }

        async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
            if !self.open {
                return Err(TransportError::NotOpen {
                    address: "pipe".into(),
                });
            }
            self.stream.write_all(data).await?;
            Ok(data.len())
        }

        async fn serial_control(&mut self, control: SerialControl) -> TransportResult<()> {
            if !self.serial {
                return Err(TransportError::Unsupported {
                    kind: self.kind().as_str(),
                    operation: "serial_control",
                });
            }
            self.controls.lock().unwrap().push(control);
            Ok(())
        }

        async fn is_ready_to_open(&mut self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }
}
