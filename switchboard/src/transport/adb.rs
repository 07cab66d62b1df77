//! ADB shell transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use tokio::process::Command;

use super::process::ProcessTransport;
use super::{Transport, TransportKind, TransportResult};

const GET_STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// `adb -s <serial> shell [command]` as a device channel.
///
/// Without a command this is an interactive shell; with one (typically
/// `logcat`) the transport captures that command's output until it exits.
pub struct AdbTransport {
    adb_path: String,
    serial: String,
    inner: ProcessTransport,
}

impl AdbTransport {
    pub fn new(adb_path: impl Into<String>, serial: impl Into<String>, command: Option<String>) -> Self {
        let adb_path = adb_path.into();
        let serial = serial.into();
        let mut args = vec!["-s".to_string(), serial.clone(), "shell".to_string()];
        args.extend(command);
        let inner = ProcessTransport::new(adb_path.clone(), args)
            .with_identity(TransportKind::AdbShell, serial.clone());
        Self {
            adb_path,
            serial,
            inner,
        }
    }

    /// Output of `adb -s <serial> get-state`, trimmed.
    pub async fn get_state(&self) -> Option<String> {
        let output = tokio::time::timeout(
            GET_STATE_TIMEOUT,
            Command::new(&self.adb_path)
                .args(["-s", &self.serial, "get-state"])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .ok()?
        .ok()?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        trace!("adb {} state {:?}", self.serial, state);
        Some(state)
    }
}

#[async_trait]
impl Transport for AdbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::AdbShell
    }

    fn address(&self) -> &str {
        &self.serial
    }

    async fn open(&mut self) -> TransportResult<()> {
        self.inner.open().await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
        self.inner.read(max_size, timeout).await
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        self.inner.write(data).await
    }

    async fn is_ready_to_open(&mut self) -> bool {
        self.get_state().await.as_deref() == Some("device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity() {
        let transport = AdbTransport::new("adb", "R58M123", Some("logcat".into()));
        assert_eq!(transport.kind(), TransportKind::AdbShell);
        assert_eq!(transport.address(), "R58M123");
    }

    #[tokio::test]
    async fn test_missing_adb_binary_is_not_ready() {
        let mut transport = AdbTransport::new("/nonexistent/adb", "R58M123", None);
        assert!(!transport.is_ready_to_open().await);
        assert!(transport.open().await.is_err());
    }
}
