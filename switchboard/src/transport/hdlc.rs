//! HDLC UI framing as used by Pigweed RPC links.
//!
//! Frame layout between flags:
//!
//! ```text
//! [address (extended, LSB terminated)][control 0x03][data ...][FCS: CRC-32 LE]
//! ```
//!
//! `0x7E` and `0x7D` inside a frame are escaped as `0x7D, byte ^ 0x20`.

use bytes::{BufMut, Bytes, BytesMut};
use crc::{CRC_32_ISO_HDLC, Crc};

use crate::error::TransportError;

pub const FLAG: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// Unnumbered information frame control byte.
pub const UI_CONTROL: u8 = 0x03;

/// Address carrying device stdout (and console input).
pub const STDOUT_ADDRESS: u64 = 1;

/// Address carrying RPC packets.
pub const RPC_ADDRESS: u64 = b'R' as u64;

const FCS_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 8192;

static FCS: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A decoded, FCS-checked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u64,
    pub control: u8,
    pub data: Bytes,
}

fn push_escaped(out: &mut BytesMut, byte: u8) {
    if byte == FLAG || byte == ESCAPE {
        out.put_u8(ESCAPE);
        out.put_u8(byte ^ ESCAPE_XOR);
    } else {
        out.put_u8(byte);
    }
}

fn encode_address(mut address: u64, out: &mut Vec<u8>) {
    loop {
        let bits = ((address & 0x7F) as u8) << 1;
        address >>= 7;
        if address == 0 {
            out.push(bits | 1);
            return;
        }
        out.push(bits);
    }
}

/// Encode a UI frame carrying `payload` to `address`.
pub fn encode_ui_frame(address: u64, payload: &[u8]) -> Bytes {
    let mut body = Vec::with_capacity(payload.len() + 8);
    encode_address(address, &mut body);
    body.push(UI_CONTROL);
    body.extend_from_slice(payload);
    let fcs = FCS.checksum(&body);
    body.extend_from_slice(&fcs.to_le_bytes());

    let mut out = BytesMut::with_capacity(body.len() * 2 + 2);
    out.put_u8(FLAG);
    for &byte in &body {
        push_escaped(&mut out, byte);
    }
    out.put_u8(FLAG);
    out.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Interframe,
    Frame,
    FrameEscape,
}

/// Incremental frame decoder. Bytes outside frames are discarded.
#[derive(Debug)]
pub struct HdlcDecoder {
    state: State,
    buffer: Vec<u8>,
    overflow: bool,
}

impl Default for HdlcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HdlcDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Interframe,
            buffer: Vec::with_capacity(256),
            overflow: false,
        }
    }

    /// Feed raw bytes. Returns every frame completed by this chunk, valid or not.
    pub fn process(&mut self, data: &[u8]) -> Vec<Result<Frame, TransportError>> {
        let mut frames = Vec::new();
        for &byte in data {
            match (self.state, byte) {
                (_, FLAG) => {
                    if self.state != State::Interframe && (!self.buffer.is_empty() || self.overflow) {
                        frames.push(self.finish());
                    }
                    self.buffer.clear();
                    self.overflow = false;
                    self.state = State::Frame;
                }
                (State::Interframe, _) => {}
                (State::Frame, ESCAPE) => self.state = State::FrameEscape,
                (State::Frame, _) => self.push(byte),
                (State::FrameEscape, _) => {
                    self.push(byte ^ ESCAPE_XOR);
                    self.state = State::Frame;
                }
            }
        }
        frames
    }

    fn push(&mut self, byte: u8) {
        if self.buffer.len() >= MAX_FRAME_LEN {
            self.overflow = true;
        } else {
            self.buffer.push(byte);
        }
    }

    fn finish(&mut self) -> Result<Frame, TransportError> {
        if self.overflow {
            return Err(TransportError::Frame(format!(
                "frame exceeds {} bytes",
                MAX_FRAME_LEN
            )));
        }
        if self.state == State::FrameEscape {
            return Err(TransportError::Frame("frame ends in escape".into()));
        }
        let raw = &self.buffer;
        if raw.len() < 2 + FCS_LEN {
            return Err(TransportError::Frame(format!(
                "short frame of {} bytes",
                raw.len()
            )));
        }

        let (body, fcs) = raw.split_at(raw.len() - FCS_LEN);
        let expected = u32::from_le_bytes([fcs[0], fcs[1], fcs[2], fcs[3]]);
        let actual = FCS.checksum(body);
        if expected != actual {
            return Err(TransportError::Frame(format!(
                "bad FCS {:#010x}, computed {:#010x}",
                expected, actual
            )));
        }

        let mut address = 0u64;
        let mut consumed = None;
        for (i, &byte) in body.iter().enumerate().take(10) {
            address |= u64::from(byte >> 1) << (7 * i);
            if byte & 1 == 1 {
                consumed = Some(i + 1);
                break;
            }
        }
        let Some(consumed) = consumed else {
            return Err(TransportError::Frame("unterminated address".into()));
        };
        if consumed >= body.len() {
            return Err(TransportError::Frame("missing control byte".into()));
        }

        Ok(Frame {
            address,
            control: body[consumed],
            data: Bytes::copy_from_slice(&body[consumed + 1..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_escapes_flag_bytes() {
        let frame = encode_ui_frame(STDOUT_ADDRESS, &[0x7E, 0x41, 0x7D]);
        assert_eq!(frame[0], FLAG);
        assert_eq!(frame[frame.len() - 1], FLAG);
        // No unescaped flag inside the frame
        assert!(!frame[1..frame.len() - 1].contains(&FLAG));
        assert_eq!(&frame[1..3], &[0x03, 0x03]);
        assert_eq!(&frame[3..5], &[ESCAPE, 0x5E]);
    }

    #[test]
    fn test_decode_split_across_chunks() {
        let frame = encode_ui_frame(RPC_ADDRESS, b"packet");
        let mut decoder = HdlcDecoder::new();
        let (a, b) = frame.split_at(5);
        assert!(decoder.process(a).is_empty());
        let frames = decoder.process(b);
        assert_eq!(frames.len(), 1);
        let decoded = frames[0].as_ref().unwrap();
        assert_eq!(decoded.address, RPC_ADDRESS);
        assert_eq!(decoded.control, UI_CONTROL);
        assert_eq!(&decoded.data[..], b"packet");
    }

    #[test]
    fn test_garbage_before_frame_ignored() {
        let mut data = b"boot noise".to_vec();
        data.extend_from_slice(&encode_ui_frame(STDOUT_ADDRESS, b"I (1) app: hi"));
        let frames = HdlcDecoder::new().process(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].as_ref().unwrap().data[..], b"I (1) app: hi");
    }

    #[test]
    fn test_corrupted_fcs_rejected_and_next_frame_decodes() {
        let mut bad = encode_ui_frame(STDOUT_ADDRESS, b"hello").to_vec();
        let n = bad.len();
        bad[n - 3] ^= 0xFF;
        bad.extend_from_slice(&encode_ui_frame(STDOUT_ADDRESS, b"world"));

        let frames = HdlcDecoder::new().process(&bad);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(TransportError::Frame(_))));
        assert_eq!(&frames[1].as_ref().unwrap().data[..], b"world");
    }

    #[test]
    fn test_short_frame_rejected() {
        let frames = HdlcDecoder::new().process(&[FLAG, 0x03, 0x03, FLAG]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
    }

    #[test]
    fn test_multibyte_address() {
        let frame = encode_ui_frame(300, b"x");
        let frames = HdlcDecoder::new().process(&frame);
        assert_eq!(frames[0].as_ref().unwrap().address, 300);
    }
}
