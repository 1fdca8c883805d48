//! Frame codec: magic-number synchronisation and frame extraction
//!
//! [`decode`] is pure. It scans a byte slice for frames laid out according to a
//! [`HeaderLayout`], returns every complete frame in order, and reports how many
//! leading bytes were consumed. Bytes after `consumed` belong to a frame that has
//! not fully arrived and must be kept for the next read.

use thiserror::Error;

use super::format::{
    MAX_PAYLOAD_LEN, PING_INDICATOR, PING_REPLY_LEN, PING_REQUEST_LEN, RX_HEADER_SIZE, RX_MAGIC,
    TELEMETRY_HEADER_SIZE, TX_HEADER_SIZE, TX_MAGIC, TelemetryHeader, parse_i16_be, parse_u16_be,
    parse_u32_be,
};
use crate::types::{DataFrame, Frame, PayloadKind, ScanlinePayload};

/// Base header geometry for one direction of the modem link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub magic: u16,
    pub header_len: usize,
    /// Offset of the 16-bit length field inside the base header
    pub length_offset: usize,
}

impl HeaderLayout {
    /// Frames delivered by the modem ([`RxHeader`](super::RxHeader)).
    pub const INBOUND: Self = Self { magic: RX_MAGIC, header_len: RX_HEADER_SIZE, length_offset: 36 };

    /// Frames written to the modem ([`TxHeader`](super::TxHeader)).
    pub const OUTBOUND: Self =
        Self { magic: TX_MAGIC, header_len: TX_HEADER_SIZE, length_offset: 48 };

    pub fn magic_bytes(&self) -> [u8; 2] {
        self.magic.to_be_bytes()
    }
}

/// Non-fatal problems found while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeWarning {
    #[error("unrecognized payload indicator {indicator:04x?} in frame at offset {offset}")]
    UnknownIndicator { offset: usize, indicator: Option<u16> },

    #[error("ping indicator after telemetry header in frame at offset {offset}")]
    StrayPing { offset: usize },

    #[error("magic at offset {offset} declares impossible length {declared_len}, resyncing")]
    FalseSync { offset: usize, declared_len: u16 },

    #[error("malformed frame at offset {offset}: {details}")]
    Malformed { offset: usize, details: String },
}

/// Output of one [`decode`] pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Decoded {
    pub frames: Vec<Frame>,
    pub warnings: Vec<DecodeWarning>,
    /// Leading bytes fully accounted for (frames plus skipped noise)
    pub consumed: usize,
}

impl Decoded {
    /// Unconsumed tail of `buf`, if any.
    pub fn trailing_incomplete<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        buf.get(self.consumed..).filter(|rest| !rest.is_empty())
    }
}

enum Step {
    Frame(Frame, usize),
    Incomplete,
    Resync(DecodeWarning),
}

/// Decode every complete frame in `buf`.
///
/// Scanning is byte-wise: any byte that does not start the layout's magic is
/// skipped, and a magic whose declared length is impossible is treated as payload
/// noise. Decoding stops at the first frame that has not fully arrived.
pub fn decode(buf: &[u8], layout: &HeaderLayout) -> Decoded {
    let magic = layout.magic_bytes();
    let mut out = Decoded::default();
    let mut cursor = 0;

    while cursor < buf.len() {
        let rest = &buf[cursor..];
        if rest[0] != magic[0] {
            cursor += 1;
            continue;
        }
        match rest.get(1) {
            None => break,
            Some(&second) if second != magic[1] => {
                cursor += 1;
                continue;
            }
            Some(_) => {}
        }

        match decode_at(rest, cursor, layout) {
            Step::Frame(frame, len) => {
                if let Frame::Data(DataFrame { indicator, .. }) = &frame {
                    match *indicator {
                        PayloadKind::Video => {}
                        kind if kind.is_stray_ping() => {
                            out.warnings.push(DecodeWarning::StrayPing { offset: cursor });
                        }
                        PayloadKind::Unknown(raw) => {
                            out.warnings.push(DecodeWarning::UnknownIndicator { offset: cursor, indicator: raw });
                        }
                    }
                }
                out.frames.push(frame);
                cursor += len;
            }
            Step::Incomplete => break,
            Step::Resync(warning) => {
                out.warnings.push(warning);
                cursor += 1;
            }
        }
    }

    out.consumed = cursor;
    out
}

fn decode_at(rest: &[u8], offset: usize, layout: &HeaderLayout) -> Step {
    let header_len = layout.header_len;
    if rest.len() < header_len + 2 {
        return Step::Incomplete;
    }

    let declared = match parse_u16_be(rest, layout.length_offset) {
        Ok(len) => len,
        Err(e) => return Step::Resync(malformed(offset, e)),
    };
    let is_ping = parse_u16_be(rest, header_len).is_ok_and(|ind| ind == PING_INDICATOR);
    let body_len = declared as usize;

    let plausible = if is_ping {
        body_len == PING_REQUEST_LEN || body_len == PING_REPLY_LEN
    } else {
        (TELEMETRY_HEADER_SIZE..=MAX_PAYLOAD_LEN).contains(&body_len)
    };
    if !plausible {
        return Step::Resync(DecodeWarning::FalseSync { offset, declared_len: declared });
    }

    let total = header_len + body_len;
    if rest.len() < total {
        return Step::Incomplete;
    }
    let body = &rest[header_len..total];

    let parsed = if is_ping { parse_ping(body) } else { parse_data(body) };
    match parsed {
        Ok(frame) => Step::Frame(frame, total),
        Err(e) => Step::Resync(malformed(offset, e)),
    }
}

fn parse_ping(body: &[u8]) -> crate::Result<Frame> {
    let receiver_send_time = parse_u32_be(body, 2)?;
    if body.len() == PING_REQUEST_LEN {
        return Ok(Frame::PingRequest { receiver_send_time });
    }
    Ok(Frame::Ping {
        receiver_send_time,
        sender_recv_time: parse_u32_be(body, 6)?,
        sender_send_time: parse_u32_be(body, 10)?,
    })
}

fn parse_data(body: &[u8]) -> crate::Result<Frame> {
    let telemetry = TelemetryHeader::parse(body)?;
    let payload = &body[TELEMETRY_HEADER_SIZE..];

    let indicator = PayloadKind::from_indicator(parse_u16_be(payload, 0).ok());
    let (sequence, scanline) = match indicator {
        PayloadKind::Video => {
            let sequence = parse_u32_be(payload, 2).ok();
            let scanline = parse_i16_be(payload, 6)
                .ok()
                .map(|row| ScanlinePayload::new(row, &payload[8..]));
            (sequence, scanline)
        }
        PayloadKind::Unknown(_) => (None, None),
    };

    Ok(Frame::Data(DataFrame {
        sender_position: telemetry.position(),
        telemetry,
        indicator,
        sequence,
        scanline,
    }))
}

fn malformed(offset: usize, err: crate::LinkError) -> DecodeWarning {
    DecodeWarning::Malformed { offset, details: err.to_string() }
}
