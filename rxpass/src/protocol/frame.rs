//! MAVLink frame encoding and streaming decoding.
//!
//! ## Frame Format (MAVLink 2)
//!
//! ```text
//! +------+-----+--------+--------+-----+--------+--------+--------+---------+-------+
//! | STX  | LEN | INCOMP | COMPAT | SEQ | SYSID  | COMPID | MSGID  | PAYLOAD | CRC16 |
//! +------+-----+--------+--------+-----+--------+--------+--------+---------+-------+
//! | 0xFD | 1   | 1      | 1      | 1   | 1      | 1      | 3 (LE) | LEN     | 2 (LE)|
//! +------+-----+--------+--------+-----+--------+--------+--------+---------+-------+
//! ```
//!
//! The checksum covers everything after STX plus the message's CRC_EXTRA
//! byte. Trailing zero bytes of the payload are truncated on send. MAVLink 1
//! frames (STX 0xFE, 6 byte header, 1 byte message id) are accepted on receive.

use {
    super::{
        crc::{crc16_mcrf4xx, crc_accumulate},
        message::{Message, MessageKind},
    },
    byteorder::{LittleEndian, WriteBytesExt},
    log::trace,
};

/// MAVLink 2 start-of-frame marker.
pub const STX_V2: u8 = 0xFD;

/// MAVLink 1 start-of-frame marker.
pub const STX_V1: u8 = 0xFE;

/// Incompatibility flag: frame carries a 13 byte signature.
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

const HEADER_LEN_V2: usize = 10;
const HEADER_LEN_V1: usize = 6;
const CRC_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;

/// Upper bound on buffered bytes while waiting for a frame to complete.
const MAX_BUFFERED: usize = 4096;

/// Sender identity and sequence number of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Packet sequence number.
    pub sequence: u8,
    /// Sending system id.
    pub system_id: u8,
    /// Sending component id.
    pub component_id: u8,
}

/// A checksum-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender identity.
    pub header: Header,
    /// Numeric message id.
    pub message_id: u32,
    /// Raw (possibly truncated) payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Decode the payload into a typed message.
    pub fn message(&self) -> Option<Message> {
        Message::decode(self.message_id, &self.payload)
    }
}

/// Build a MAVLink 2 frame for `message`.
///
/// Returns `None` for [`Message::Unknown`], which cannot be serialized.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode(header: Header, message: &Message) -> Option<Vec<u8>> {
    let kind = message.kind()?;

    let mut payload = message.encode_payload();
    while payload.len() > 1 && payload.last() == Some(&0) {
        payload.pop();
    }

    let mut buf = Vec::with_capacity(HEADER_LEN_V2 + payload.len() + CRC_LEN);
    buf.push(STX_V2);
    // Safe cast: modelled payloads are at most 33 bytes
    buf.push(payload.len() as u8);
    buf.push(0); // incompat flags
    buf.push(0); // compat flags
    buf.push(header.sequence);
    buf.push(header.system_id);
    buf.push(header.component_id);
    buf.write_u24::<LittleEndian>(kind.id())
        .unwrap();
    buf.extend_from_slice(&payload);

    let crc = crc_accumulate(kind.crc_extra(), crc16_mcrf4xx(&buf[1..]));
    buf.write_u16::<LittleEndian>(crc)
        .unwrap();

    Some(buf)
}

/// Outcome of looking at the head of the receive buffer.
enum Scan {
    /// A complete, valid frame of the given total length.
    Frame(Frame, usize),
    /// Bytes to throw away (garbage, bad checksum, unknown message).
    Skip(usize),
    /// Not enough data yet.
    Incomplete,
}

/// Incremental frame decoder.
///
/// Bytes arrive in arbitrary chunks; complete frames are returned in order.
/// Noise and corrupted frames are discarded and counted, never surfaced.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    dropped: usize,
}

impl FrameParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf
            .extend_from_slice(data);
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - MAX_BUFFERED;
            self.buf
                .drain(..excess);
            self.dropped += excess;
        }
    }

    /// Number of bytes discarded as noise or corrupted frames.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Number of bytes waiting to be parsed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Forget all buffered bytes.
    pub fn clear(&mut self) {
        self.buf
            .clear();
    }

    /// Extract the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            // Resynchronize on the next start marker
            match self
                .buf
                .iter()
                .position(|&b| b == STX_V2 || b == STX_V1)
            {
                Some(0) => {},
                Some(pos) => {
                    self.discard(pos);
                },
                None => {
                    let len = self.buf.len();
                    self.discard(len);
                    return None;
                },
            }

            let scan = if self.buf[0] == STX_V2 {
                self.scan_v2()
            } else {
                self.scan_v1()
            };

            match scan {
                Scan::Frame(frame, len) => {
                    self.buf
                        .drain(..len);
                    return Some(frame);
                },
                Scan::Skip(len) => self.discard(len),
                Scan::Incomplete => return None,
            }
        }
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            trace!("Discarding {n} bytes");
            self.buf
                .drain(..n);
            self.dropped += n;
        }
    }

    fn scan_v2(&self) -> Scan {
        let buf = &self.buf;
        if buf.len() < HEADER_LEN_V2 {
            return Scan::Incomplete;
        }

        let payload_len = usize::from(buf[1]);
        let incompat = buf[2];
        if incompat & !INCOMPAT_FLAG_SIGNED != 0 {
            // Unknown incompatibility flags: not a frame we can parse
            return Scan::Skip(1);
        }

        let signature = if incompat & INCOMPAT_FLAG_SIGNED != 0 {
            SIGNATURE_LEN
        } else {
            0
        };
        let total = HEADER_LEN_V2 + payload_len + CRC_LEN + signature;
        if buf.len() < total {
            return Scan::Incomplete;
        }

        let message_id = u32::from_le_bytes([buf[7], buf[8], buf[9], 0]);
        let crc_end = HEADER_LEN_V2 + payload_len;
        let header = Header {
            sequence: buf[4],
            system_id: buf[5],
            component_id: buf[6],
        };
        Self::verify(
            header,
            message_id,
            &buf[1..crc_end],
            &buf[HEADER_LEN_V2..crc_end],
            [buf[crc_end], buf[crc_end + 1]],
            total,
        )
    }

    fn scan_v1(&self) -> Scan {
        let buf = &self.buf;
        if buf.len() < HEADER_LEN_V1 {
            return Scan::Incomplete;
        }

        let payload_len = usize::from(buf[1]);
        let total = HEADER_LEN_V1 + payload_len + CRC_LEN;
        if buf.len() < total {
            return Scan::Incomplete;
        }

        let crc_end = HEADER_LEN_V1 + payload_len;
        let header = Header {
            sequence: buf[2],
            system_id: buf[3],
            component_id: buf[4],
        };
        Self::verify(
            header,
            u32::from(buf[5]),
            &buf[1..crc_end],
            &buf[HEADER_LEN_V1..crc_end],
            [buf[crc_end], buf[crc_end + 1]],
            total,
        )
    }

    fn verify(
        header: Header,
        message_id: u32,
        checked: &[u8],
        payload: &[u8],
        crc_bytes: [u8; 2],
        total: usize,
    ) -> Scan {
        let Some(kind) = MessageKind::from_id(message_id) else {
            // No CRC_EXTRA for this id, so it cannot be verified. Skip the
            // whole frame rather than resyncing inside its payload.
            trace!("Skipping unmodelled message #{message_id}");
            return Scan::Skip(total);
        };

        let crc = crc_accumulate(kind.crc_extra(), crc16_mcrf4xx(checked));
        if crc != u16::from_le_bytes(crc_bytes) {
            trace!("Bad checksum on {kind} frame");
            return Scan::Skip(1);
        }

        Scan::Frame(
            Frame {
                header,
                message_id,
                payload: payload.to_vec(),
            },
            total,
        )
    }
}
