//! Serial device transport.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use super::{SerialControl, Transport, TransportKind, TransportResult, read_with_timeout};
use crate::error::TransportError;

const XON: u8 = 0x11;
const XOFF: u8 = 0x13;
const BREAK_BYTE: u8 = 0x03;

/// Serial console on a local device node (e.g. `/dev/ttyUSB0`).
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            stream: None,
        }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn address(&self) -> &str {
        &self.path
    }

    async fn open(&mut self) -> TransportResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio_serial::new(&self.path, self.baud_rate).open_native_async()?;
        debug!("serial {} open at {} baud", self.path, self.baud_rate);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        // Dropping the stream releases the device node
        self.stream = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
        let stream = self.stream.as_mut().ok_or_else(|| TransportError::NotOpen {
            address: self.path.clone(),
        })?;
        read_with_timeout(stream, max_size, timeout).await
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let stream = self.stream.as_mut().ok_or_else(|| TransportError::NotOpen {
            address: self.path.clone(),
        })?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(data.len())
    }

    async fn serial_control(&mut self, control: SerialControl) -> TransportResult<()> {
        let byte = match control {
            SerialControl::SetBaudRate(rate) => {
                // A closed port picks the rate up on its next open
                if let Some(stream) = self.stream.as_mut() {
                    stream.flush().await?;
                    stream.clear(ClearBuffer::All)?;
                    stream.set_baud_rate(rate)?;
                    stream.clear(ClearBuffer::All)?;
                }
                debug!("serial {} baud rate {} -> {}", self.path, self.baud_rate, rate);
                self.baud_rate = rate;
                return Ok(());
            }
            SerialControl::Xon => XON,
            SerialControl::Xoff => XOFF,
            SerialControl::BreakByte => BREAK_BYTE,
        };
        self.write(&[byte]).await.map(|_| ())
    }

    async fn is_ready_to_open(&mut self) -> bool {
        Path::new(&self.path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_device_not_ready() {
        let mut transport = SerialTransport::new("/dev/does-not-exist-ttyUSB9", 115_200);
        assert!(!transport.is_ready_to_open().await);
        assert!(transport.open().await.is_err());
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_serial_controls_on_closed_port() {
        let mut transport = SerialTransport::new("/dev/ttyUSB0", 115_200);
        transport
            .serial_control(SerialControl::SetBaudRate(921_600))
            .await
            .unwrap();
        assert_eq!(transport.baud_rate(), 921_600);
        for control in [SerialControl::Xon, SerialControl::Xoff, SerialControl::BreakByte] {
            let err = transport.serial_control(control).await.unwrap_err();
            assert!(matches!(err, TransportError::NotOpen { .. }));
        }
    }

    #[tokio::test]
    async fn test_write_requires_open() {
        let mut transport = SerialTransport::new("/dev/ttyUSB0", 9600);
        let err = transport.write(b"reboot\n").await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen { .. }));
    }
}
