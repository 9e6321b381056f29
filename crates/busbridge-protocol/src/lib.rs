//! Wire protocol for the remote bus-access channel.
//!
//! A host-side bus master forwards memory-mapped load/store transactions to a
//! remote peer process and blocks until the matching completion returns. This
//! crate defines the frames exchanged on that channel and nothing else:
//! - endian-stable (little-endian), length-prefixed payloads
//! - caller provides/receives byte buffers; no transport assumptions
//! - easy to implement on the peer side in any language
//!
//! Host → peer traffic is always a [`RequestFrame`]. Peer → host traffic is a
//! [`PeerMessage`]: either the completion of an outstanding request or a
//! one-way asynchronous notification (interrupt level change, peer log line)
//! that the host consumes when it drains the channel.

use core::fmt;

/// Transaction direction of a [`RequestFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCommand {
    Read,
    Write,
}

/// One memory-mapped transaction, host → peer.
///
/// `size` doubles as the stream width on the wire (no burst support): encode
/// always emits `stream_width == size` and decode rejects anything else.
/// Write frames carry exactly `size` payload bytes after the header; read
/// frames carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub cmd: BusCommand,
    /// Transaction id, unique among outstanding requests on the channel.
    pub id: u32,
    /// Device index on the remote peer.
    pub dev: u16,
    /// Normalized virtual-clock sample taken when the frame was encoded.
    pub clk: u64,
    /// Identity of the requesting bus master.
    pub master_id: u16,
    pub addr: u64,
    /// Combined attribute word (device defaults OR'd with per-access bits).
    pub attr: u32,
    pub size: u32,
    /// Write data (`size` bytes); empty for reads.
    pub payload: Vec<u8>,
}

/// Completion status: the peer decoded and performed the access.
pub const STATUS_OK: u8 = 0;
/// The address fell outside the peer's mapped region.
pub const STATUS_ADDRESS_ERROR: u8 = 1;
/// Any other failure. Finer-grained peer error detail is deliberately not
/// preserved on the wire.
pub const STATUS_ERROR: u8 = 2;

/// Completion of one outstanding request, peer → host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionFrame {
    /// Id of the request this completes.
    pub id: u32,
    /// One of the `STATUS_*` codes. Unknown codes are carried through and
    /// collapsed to a generic error by the correlation layer.
    pub status: u8,
    /// Read data on success; empty otherwise.
    pub payload: Vec<u8>,
}

/// Severity of a [`PeerMessage::Log`] notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_u8(self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
        }
    }

    fn from_u8(v: u8) -> Result<Self, DecodeError> {
        Ok(match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => return Err(DecodeError::InvalidEnum),
        })
    }
}

/// Any frame the peer may send to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Response to an outstanding [`RequestFrame`].
    Completion(CompletionFrame),

    /// Interrupt line level changed on the peer. One-way; carries no id.
    IrqLevel { line: u16, level: bool },

    /// Log record emitted by the peer (UTF-8). One-way; carries no id.
    Log { level: LogLevel, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    InvalidEnum,
    InvalidUtf8,
    UnknownTag,
    OversizedPayload,
    /// `stream_width` did not equal `size` (burst transfers are unsupported).
    StreamWidthMismatch,
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected EOF"),
            DecodeError::InvalidEnum => write!(f, "invalid enum value"),
            DecodeError::InvalidUtf8 => write!(f, "invalid UTF-8"),
            DecodeError::UnknownTag => write!(f, "unknown tag"),
            DecodeError::OversizedPayload => write!(f, "payload too large"),
            DecodeError::StreamWidthMismatch => write!(f, "stream width != size"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after frame"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Defensive maximum frame size (bytes) for decode. The bus layer caps
/// transaction payloads at 4096 bytes, so anything near this is corrupt.
pub const MAX_FRAME_BYTES: usize = 1 << 16; // 64 KiB

const REQ_TAG_READ: u16 = 0x0010;
const REQ_TAG_WRITE: u16 = 0x0011;

const MSG_TAG_COMPLETION: u16 = 0x0100;
const MSG_TAG_IRQ_LEVEL: u16 = 0x0200;
const MSG_TAG_LOG: u16 = 0x0201;

pub fn encode_request(req: &RequestFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(38 + req.payload.len());
    encode_request_into(req, &mut out);
    out
}

pub fn encode_request_into(req: &RequestFrame, out: &mut Vec<u8>) {
    let tag = match req.cmd {
        BusCommand::Read => REQ_TAG_READ,
        BusCommand::Write => REQ_TAG_WRITE,
    };
    push_u16(out, tag);
    push_u32(out, req.id);
    push_u16(out, req.dev);
    push_u64(out, req.clk);
    push_u16(out, req.master_id);
    push_u64(out, req.addr);
    push_u32(out, req.attr);
    push_u32(out, req.size);
    push_u32(out, req.size); // stream_width, always == size
    if req.cmd == BusCommand::Write {
        out.extend_from_slice(&req.payload);
    }
}

pub fn encode_message(msg: &PeerMessage) -> Vec<u8> {
    let mut out = Vec::new();
    encode_message_into(msg, &mut out);
    out
}

pub fn encode_message_into(msg: &PeerMessage, out: &mut Vec<u8>) {
    match msg {
        PeerMessage::Completion(c) => {
            push_u16(out, MSG_TAG_COMPLETION);
            push_u32(out, c.id);
            out.push(c.status);
            push_u32(out, c.payload.len() as u32);
            out.extend_from_slice(&c.payload);
        }
        PeerMessage::IrqLevel { line, level } => {
            push_u16(out, MSG_TAG_IRQ_LEVEL);
            push_u16(out, *line);
            out.push(u8::from(*level));
        }
        PeerMessage::Log { level, message } => {
            push_u16(out, MSG_TAG_LOG);
            out.push(level.to_u8());
            let msg = message.as_bytes();
            push_u32(out, msg.len() as u32);
            out.extend_from_slice(msg);
        }
    }
}

pub fn decode_request(bytes: &[u8]) -> Result<RequestFrame, DecodeError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(DecodeError::OversizedPayload);
    }
    let mut r = Reader::new(bytes);
    let tag = r.read_u16()?;
    let cmd = match tag {
        REQ_TAG_READ => BusCommand::Read,
        REQ_TAG_WRITE => BusCommand::Write,
        _ => return Err(DecodeError::UnknownTag),
    };
    let id = r.read_u32()?;
    let dev = r.read_u16()?;
    let clk = r.read_u64()?;
    let master_id = r.read_u16()?;
    let addr = r.read_u64()?;
    let attr = r.read_u32()?;
    let size = r.read_u32()?;
    let stream_width = r.read_u32()?;
    if stream_width != size {
        return Err(DecodeError::StreamWidthMismatch);
    }
    let payload = match cmd {
        BusCommand::Write => r.read_bytes(size as usize)?.to_vec(),
        BusCommand::Read => Vec::new(),
    };
    if r.remaining() != 0 {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(RequestFrame {
        cmd,
        id,
        dev,
        clk,
        master_id,
        addr,
        attr,
        size,
        payload,
    })
}

pub fn decode_message(bytes: &[u8]) -> Result<PeerMessage, DecodeError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(DecodeError::OversizedPayload);
    }
    let mut r = Reader::new(bytes);
    let tag = r.read_u16()?;
    let msg = match tag {
        MSG_TAG_COMPLETION => {
            let id = r.read_u32()?;
            let status = r.read_u8()?;
            let len = r.read_u32()? as usize;
            let payload = r.read_bytes(len)?.to_vec();
            PeerMessage::Completion(CompletionFrame {
                id,
                status,
                payload,
            })
        }
        MSG_TAG_IRQ_LEVEL => {
            let line = r.read_u16()?;
            let level = match r.read_u8()? {
                0 => false,
                1 => true,
                _ => return Err(DecodeError::InvalidEnum),
            };
            PeerMessage::IrqLevel { line, level }
        }
        MSG_TAG_LOG => {
            let level = LogLevel::from_u8(r.read_u8()?)?;
            let len = r.read_u32()? as usize;
            let msg = r.read_bytes(len)?;
            let message = core::str::from_utf8(msg).map_err(|_| DecodeError::InvalidUtf8)?;
            PeerMessage::Log {
                level,
                message: message.to_string(),
            }
        }
        _ => return Err(DecodeError::UnknownTag),
    };
    if r.remaining() != 0 {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(msg)
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_write() -> RequestFrame {
        RequestFrame {
            cmd: BusCommand::Write,
            id: 7,
            dev: 2,
            clk: 0x1234_5678_9abc,
            master_id: 0x11,
            addr: 0xdead_beef_0000,
            attr: 0x8000_0001,
            size: 8,
            payload: vec![1, 2, 3, 4, 5, 6, 7, 8],
        }
    }

    #[test]
    fn request_round_trip() {
        let write = sample_write();
        assert_eq!(decode_request(&encode_request(&write)).unwrap(), write);

        let read = RequestFrame {
            cmd: BusCommand::Read,
            size: 16,
            payload: Vec::new(),
            ..write
        };
        assert_eq!(decode_request(&encode_request(&read)).unwrap(), read);
    }

    #[test]
    fn message_round_trip() {
        let msgs = [
            PeerMessage::Completion(CompletionFrame {
                id: 9,
                status: STATUS_OK,
                payload: vec![0xaa; 4],
            }),
            PeerMessage::Completion(CompletionFrame {
                id: 10,
                status: STATUS_ADDRESS_ERROR,
                payload: Vec::new(),
            }),
            PeerMessage::IrqLevel {
                line: 3,
                level: true,
            },
            PeerMessage::Log {
                level: LogLevel::Warn,
                message: "peer reset".to_string(),
            },
        ];
        for msg in &msgs {
            assert_eq!(decode_message(&encode_message(msg)).unwrap(), *msg);
        }
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let bytes = encode_request(&sample_write());
        for len in 0..bytes.len() {
            assert_eq!(
                decode_request(&bytes[..len]),
                Err(DecodeError::UnexpectedEof),
                "prefix of {len} bytes should not decode"
            );
        }
    }

    #[test]
    fn stream_width_must_equal_size() {
        let mut bytes = encode_request(&sample_write());
        // stream_width is the last header field, directly before the payload.
        let sw_off = bytes.len() - 8 - 4;
        bytes[sw_off..sw_off + 4].copy_from_slice(&4u32.to_le_bytes());
        assert_eq!(
            decode_request(&bytes),
            Err(DecodeError::StreamWidthMismatch)
        );
    }

    #[test]
    fn unknown_tags_and_trailing_bytes_are_rejected() {
        assert_eq!(
            decode_message(&0xffffu16.to_le_bytes()),
            Err(DecodeError::UnknownTag)
        );

        let mut bytes = encode_message(&PeerMessage::IrqLevel {
            line: 0,
            level: false,
        });
        bytes.push(0);
        assert_eq!(decode_message(&bytes), Err(DecodeError::TrailingBytes));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Decoders must reject arbitrary byte soup without panicking.
            #[test]
            fn decode_never_panics_on_garbage(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode_request(&bytes);
                let _ = decode_message(&bytes);
            }
        }
    }

    #[test]
    fn bogus_irq_level_is_rejected() {
        let mut bytes = encode_message(&PeerMessage::IrqLevel {
            line: 1,
            level: true,
        });
        *bytes.last_mut().unwrap() = 2;
        assert_eq!(decode_message(&bytes), Err(DecodeError::InvalidEnum));
    }
}
