//! Raw TCP socket transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{Transport, TransportKind, TransportResult, read_with_timeout};
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP socket to a console server, emulator or RPC bridge.
pub struct SocketTransport {
    host: String,
    port: u16,
    address: String,
    stream: Option<TcpStream>,
}

impl SocketTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            address: format!("{}:{}", host, port),
            host,
            port,
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&mut self) -> TransportResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout(CONNECT_TIMEOUT))?
        .map_err(|source| TransportError::ConnectionFailed {
            host: self.host.clone(),
            port: self.port,
            source,
        })?;
        stream.set_nodelay(true)?;
        debug!("socket {} open", self.address);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
        let stream = self.stream.as_mut().ok_or_else(|| TransportError::NotOpen {
            address: self.address.clone(),
        })?;
        let result = read_with_timeout(stream, max_size, timeout).await;
        if matches!(result, Err(TransportError::Disconnected)) {
            self.stream = None;
        }
        result
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let stream = self.stream.as_mut().ok_or_else(|| TransportError::NotOpen {
            address: self.address.clone(),
        })?;
        stream.write_all(data).await?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_socket_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping\n");
            sock.write_all(b"pong\n").await.unwrap();
        });

        let mut transport = SocketTransport::new("127.0.0.1", port);
        transport.open().await.unwrap();
        assert!(transport.is_open());
        transport.write(b"ping\n").await.unwrap();

        let data = transport.read(64, Duration::from_secs(2)).await.unwrap();
        assert_eq!(&data[..], b"pong\n");
        server.await.unwrap();

        // Peer closed its side
        let err = transport.read(64, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut transport = SocketTransport::new("127.0.0.1", port);
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }));
    }
}
