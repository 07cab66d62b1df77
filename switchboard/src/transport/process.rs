//! Subprocess transport: a child process whose stdio is the device channel.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::{Transport, TransportKind, TransportResult};
use crate::error::TransportError;

/// Transport backed by a child process. stdout and stderr are both captured.
pub struct ProcessTransport {
    kind: TransportKind,
    address: String,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessTransport {
    /// Create a transport that runs `program args...` on open.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            kind: TransportKind::AdbShell,
            address: program.clone(),
            program,
            args,
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Report a different kind and address (used by wrappers such as adb).
    pub(crate) fn with_identity(mut self, kind: TransportKind, address: impl Into<String>) -> Self {
        self.kind = kind;
        self.address = address.into();
        self
    }

    fn exit_error(&mut self) -> TransportError {
        let status = self
            .child
            .as_mut()
            .and_then(|c| c.try_wait().ok().flatten())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "closed stdout".to_string());
        self.release();
        TransportError::ProcessExited {
            program: self.program.clone(),
            status,
        }
    }

    fn release(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.child = None;
    }
}

async fn read_optional<R>(reader: Option<&mut R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&mut self) -> TransportResult<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();
        debug!("spawned {} {:?} (pid {:?})", self.program, self.args, child.id());
        self.child = Some(child);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.release();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.child.is_some()
    }

    async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
        let Self {
            stdout,
            stderr,
            address,
            ..
        } = &mut *self;
        let Some(stdout) = stdout.as_mut() else {
            return Err(TransportError::NotOpen {
                address: address.clone(),
            });
        };

        let mut out = vec![0u8; max_size.max(1)];
        let mut err = vec![0u8; max_size.max(1)];
        let read = tokio::time::timeout(timeout, async {
            tokio::select! {
                r = stdout.read(&mut out) => (r, true),
                r = read_optional(stderr.as_mut(), &mut err) => (r, false),
            }
        })
        .await;

        match read {
            Err(_) => Ok(Bytes::new()),
            Ok((Ok(0), true)) => Err(self.exit_error()),
            Ok((Ok(0), false)) => {
                self.stderr = None;
                Ok(Bytes::new())
            }
            Ok((Ok(n), true)) => {
                out.truncate(n);
                Ok(Bytes::from(out))
            }
            Ok((Ok(n), false)) => {
                err.truncate(n);
                Ok(Bytes::from(err))
            }
            Ok((Err(e), _)) => Err(TransportError::Io(e)),
        }
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let stdin = self.stdin.as_mut().ok_or_else(|| TransportError::NotOpen {
            address: self.address.clone(),
        })?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_until(transport: &mut ProcessTransport, needle: &[u8]) -> Vec<u8> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match transport.read(256, Duration::from_millis(50)).await {
                Ok(data) => seen.extend_from_slice(&data),
                Err(_) => break,
            }
            if seen.windows(needle.len()).any(|w| w == needle) {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_cat_echoes_input() {
        let mut transport = ProcessTransport::new("cat", vec![]);
        transport.open().await.unwrap();
        transport.write(b"hello device\n").await.unwrap();
        let seen = read_until(&mut transport, b"hello device\n").await;
        assert_eq!(seen, b"hello device\n");
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_reports_process_exited() {
        let mut transport =
            ProcessTransport::new("sh", vec!["-c".into(), "echo bye; echo oops >&2".into()]);
        transport.open().await.unwrap();

        let mut seen = Vec::new();
        let err = loop {
            match transport.read(256, Duration::from_millis(200)).await {
                Ok(data) => seen.extend_from_slice(&data),
                Err(e) => break e,
            }
        };
        let text = String::from_utf8_lossy(&seen);
        assert!(text.contains("bye"));
        assert!(matches!(err, TransportError::ProcessExited { .. }));
        assert!(!transport.is_open());
    }
}
