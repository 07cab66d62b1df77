//! Framed RPC transport.
//!
//! Wraps a byte transport and runs an HDLC decoder over everything it reads.
//! Stdout frames become log lines; RPC frames are handed to the
//! [`RpcDispatcher`], which completes the pending call with the matching id.
//!
//! RPC packets:
//!
//! ```text
//! request: [0x00][call_id: u32 LE][len][service][len][method][payload ...]
//! reply:   [0x01 ack | 0x02 nack][call_id: u32 LE][payload ...]
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};
use tokio::sync::oneshot;

use super::hdlc::{self, HdlcDecoder};
use super::{Transport, TransportKind, TransportResult};
use crate::error::TransportError;

const PACKET_REQUEST: u8 = 0x00;
const PACKET_ACK: u8 = 0x01;
const PACKET_NACK: u8 = 0x02;

const RAW_READ_SIZE: usize = 4096;

/// Reply to one RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    pub ack: bool,
    pub payload: Bytes,
}

/// Matches RPC replies to outstanding calls by call id.
#[derive(Debug, Default)]
pub struct RpcDispatcher {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<RpcReply>>>,
}

impl RpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<RpcReply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a call id and the receiver its reply will arrive on.
    pub fn register(&self) -> (u32, oneshot::Receiver<RpcReply>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        (id, rx)
    }

    /// Forget a call that timed out.
    pub fn cancel(&self, call_id: u32) {
        self.pending().remove(&call_id);
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending().len()
    }

    /// Drop every pending call; their receivers observe a closed channel.
    pub fn fail_all(&self) {
        let dropped = std::mem::take(&mut *self.pending());
        if !dropped.is_empty() {
            debug!("failing {} pending rpc call(s)", dropped.len());
        }
    }

    /// Encode a request packet.
    pub fn encode_request(
        call_id: u32,
        service: &str,
        method: &str,
        payload: &[u8],
    ) -> TransportResult<Bytes> {
        let service_len = u8::try_from(service.len())
            .map_err(|_| TransportError::Frame(format!("service name too long: {}", service)))?;
        let method_len = u8::try_from(method.len())
            .map_err(|_| TransportError::Frame(format!("method name too long: {}", method)))?;

        let mut packet = BytesMut::with_capacity(7 + service.len() + method.len() + payload.len());
        packet.put_u8(PACKET_REQUEST);
        packet.put_u32_le(call_id);
        packet.put_u8(service_len);
        packet.put_slice(service.as_bytes());
        packet.put_u8(method_len);
        packet.put_slice(method.as_bytes());
        packet.put_slice(payload);
        Ok(packet.freeze())
    }

    /// Complete the call a reply packet belongs to.
    pub fn handle_packet(&self, packet: &[u8]) -> TransportResult<()> {
        if packet.len() < 5 {
            return Err(TransportError::Frame(format!(
                "rpc packet of {} bytes is too short",
                packet.len()
            )));
        }
        let ack = match packet[0] {
            PACKET_ACK => true,
            PACKET_NACK => false,
            other => {
                return Err(TransportError::Frame(format!(
                    "unexpected rpc packet type {:#04x}",
                    other
                )));
            }
        };
        let call_id = u32::from_le_bytes([packet[1], packet[2], packet[3], packet[4]]);
        let reply = RpcReply {
            ack,
            payload: Bytes::copy_from_slice(&packet[5..]),
        };

        match self.pending().remove(&call_id) {
            Some(tx) => {
                // Receiver may have timed out already
                let _ = tx.send(reply);
                Ok(())
            }
            None => Err(TransportError::Frame(format!(
                "reply for unknown call id {}",
                call_id
            ))),
        }
    }
}

/// HDLC framed transport carrying device stdout and RPC traffic.
pub struct FramedRpcTransport {
    inner: Box<dyn Transport>,
    decoder: HdlcDecoder,
    dispatcher: Arc<RpcDispatcher>,
    log: BytesMut,
}

impl FramedRpcTransport {
    pub fn new(inner: Box<dyn Transport>) -> Self {
        Self {
            inner,
            decoder: HdlcDecoder::new(),
            dispatcher: Arc::new(RpcDispatcher::new()),
            log: BytesMut::new(),
        }
    }

    fn route(&mut self, raw: &[u8]) {
        for frame in self.decoder.process(raw) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("{}: dropping malformed frame: {}", self.inner.address(), e);
                    continue;
                }
            };
            match frame.address {
                hdlc::STDOUT_ADDRESS => {
                    self.log.put_slice(&frame.data);
                    self.log.put_u8(b'\n');
                }
                hdlc::RPC_ADDRESS => {
                    if let Err(e) = self.dispatcher.handle_packet(&frame.data) {
                        warn!("{}: dropping rpc packet: {}", self.inner.address(), e);
                    }
                }
                other => warn!(
                    "{}: unhandled frame for address {}",
                    self.inner.address(),
                    other
                ),
            }
        }
    }
}

#[async_trait]
impl Transport for FramedRpcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::FramedRpc
    }

    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn open(&mut self) -> TransportResult<()> {
        self.decoder = HdlcDecoder::new();
        self.log.clear();
        self.inner.open().await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.dispatcher.fail_all();
        self.log.clear();
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn read(&mut self, max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.log.is_empty() {
                let n = self.log.len().min(max_size.max(1));
                return Ok(self.log.split_to(n).freeze());
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(Bytes::new());
            }
            let raw = match self.inner.read(RAW_READ_SIZE, remaining).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.dispatcher.fail_all();
                    return Err(e);
                }
            };
            if raw.is_empty() {
                return Ok(Bytes::new());
            }
            self.route(&raw);
        }
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let frame = hdlc::encode_ui_frame(hdlc::STDOUT_ADDRESS, data);
        self.inner.write(&frame).await?;
        Ok(data.len())
    }

    async fn write_frame(&mut self, address: u64, payload: &[u8]) -> TransportResult<()> {
        let frame = hdlc::encode_ui_frame(address, payload);
        self.inner.write(&frame).await?;
        Ok(())
    }

    async fn is_ready_to_open(&mut self) -> bool {
        self.inner.is_ready_to_open().await
    }

    fn rpc_dispatcher(&self) -> Option<Arc<RpcDispatcher>> {
        Some(self.dispatcher.clone())
    }
}
