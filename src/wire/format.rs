//! Wire header structures and byte-level parsing
//!
//! Defines the fixed-layout headers used on the modem stream and provides
//! bounds-checked big-endian encode/parse routines for each.
//!
//! ## Frame Structure
//!
//! Every frame starts with a base header followed by a 2-byte payload indicator:
//!
//! 1. **Base Header** - [`TxHeader`] (50 bytes) on frames a client writes to the modem,
//!    [`RxHeader`] (38 bytes) on frames the modem delivers from the air
//! 2. **Telemetry Header** - [`TelemetryHeader`] (54 bytes), data frames only
//! 3. **Payload** - indicator plus sub-message body
//!
//! The base header's `length` field counts every byte after the base header.

use crate::types::Position;
use crate::{LinkError, Result};
use tracing::trace;

/// Magic number opening every frame written to the modem.
pub const TX_MAGIC: u16 = 0xF2F2;

/// Magic number opening every frame the modem delivers.
pub const RX_MAGIC: u16 = 0xF3F2;

/// First two bytes of the modem's reply to [`CAPABILITY_REQUEST`].
pub const ACK_MAGIC: [u8; 2] = [0xF1, 0xF2];

/// Fixed capability request sent once after connecting.
pub const CAPABILITY_REQUEST: [u8; 16] =
    [0xF1, 0xF1, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x97, 0x00, 0x00, 0x00, 0x00];

/// Payload indicator for a video scanline data unit.
pub const VIDEO_INDICATOR: u16 = 0x0301;

/// Payload indicator for a latency probe.
pub const PING_INDICATOR: u16 = 0x0302;

/// Bytes after the base header in a ping request (indicator + send time).
pub const PING_REQUEST_LEN: usize = 6;

/// Bytes after the base header in a ping reply (indicator + three times).
pub const PING_REPLY_LEN: usize = 14;

/// Largest value the base header `length` field may carry.
pub const MAX_PAYLOAD_LEN: usize = 2302;

/// Scale applied to coordinates stored in the telemetry header.
pub const COORDINATE_SCALE: f64 = 1_000_000.0;

pub const TX_HEADER_SIZE: usize = 50;
pub const RX_HEADER_SIZE: usize = 38;
pub const TELEMETRY_HEADER_SIZE: usize = 54;

/// A base header that can be written in front of a frame body.
pub trait BaseHeader: Copy + Send + Sync + 'static {
    const SIZE: usize;

    /// Encode this header with its length field set to `length`.
    fn encode_with_length(&self, length: u16, out: &mut Vec<u8>);
}

impl BaseHeader for TxHeader {
    const SIZE: usize = TX_HEADER_SIZE;

    fn encode_with_length(&self, length: u16, out: &mut Vec<u8>) {
        self.with_length(length).encode_into(out);
    }
}

impl BaseHeader for RxHeader {
    const SIZE: usize = RX_HEADER_SIZE;

    fn encode_with_length(&self, length: u16, out: &mut Vec<u8>) {
        self.with_length(length).encode_into(out);
    }
}

/// Header written in front of every outbound frame (V2X TxPDU)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    pub magic: u16,
    pub version: u16,
    pub psid: u32,
    pub comm_type: u8,
    pub payload_type: u8,
    pub elements_indicator: u8,
    pub tx_power: u8,
    pub signer_id: u8,
    pub priority: u8,
    pub channel_load: u8,
    pub reserved1: u8,
    pub expiry_time: u64,
    pub transmitter_profile_id: u32,
    pub peer_l2id: u32,
    pub reserved2: u32,
    pub reserved3: u64,
    pub crc: u32,
    /// Bytes following this header (1-2302)
    pub length: u16,
}

impl Default for TxHeader {
    fn default() -> Self {
        Self {
            magic: TX_MAGIC,
            version: 1,
            psid: 5271,
            comm_type: 0,
            payload_type: 4,
            elements_indicator: 0,
            tx_power: 20,
            signer_id: 0,
            priority: 0,
            channel_load: 0,
            reserved1: 0,
            expiry_time: 0,
            transmitter_profile_id: 100,
            peer_l2id: 0,
            reserved2: 0,
            reserved3: 0,
            crc: 0,
            length: 0,
        }
    }
}

impl TxHeader {
    /// Copy of this header with `length` replaced.
    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.psid.to_be_bytes());
        out.extend_from_slice(&[
            self.comm_type,
            self.payload_type,
            self.elements_indicator,
            self.tx_power,
            self.signer_id,
            self.priority,
            self.channel_load,
            self.reserved1,
        ]);
        out.extend_from_slice(&self.expiry_time.to_be_bytes());
        out.extend_from_slice(&self.transmitter_profile_id.to_be_bytes());
        out.extend_from_slice(&self.peer_l2id.to_be_bytes());
        out.extend_from_slice(&self.reserved2.to_be_bytes());
        out.extend_from_slice(&self.reserved3.to_be_bytes());
        out.extend_from_slice(&self.crc.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "TxHeader")?;
        trace!("Parsing TxHeader ({} bytes)", Self::SIZE);

        Ok(Self {
            magic: parse_u16_be(data, 0)?,
            version: parse_u16_be(data, 2)?,
            psid: parse_u32_be(data, 4)?,
            comm_type: data[8],
            payload_type: data[9],
            elements_indicator: data[10],
            tx_power: data[11],
            signer_id: data[12],
            priority: data[13],
            channel_load: data[14],
            reserved1: data[15],
            expiry_time: parse_u64_be(data, 16)?,
            transmitter_profile_id: parse_u32_be(data, 24)?,
            peer_l2id: parse_u32_be(data, 28)?,
            reserved2: parse_u32_be(data, 32)?,
            reserved3: parse_u64_be(data, 36)?,
            crc: parse_u32_be(data, 44)?,
            length: parse_u16_be(data, 48)?,
        })
    }
}

/// Header the modem places in front of every delivered frame.
///
/// The modem reports per-reception link metadata between the service ID and the
/// length field; it is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxHeader {
    pub magic: u16,
    pub version: u16,
    pub psid: u32,
    pub link_info: [u8; 28],
    pub length: u16,
}

impl Default for RxHeader {
    fn default() -> Self {
        Self { magic: RX_MAGIC, version: 1, psid: 5271, link_info: [0; 28], length: 0 }
    }
}

impl RxHeader {
    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.psid.to_be_bytes());
        out.extend_from_slice(&self.link_info);
        out.extend_from_slice(&self.length.to_be_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "RxHeader")?;
        let mut link_info = [0u8; 28];
        link_info.copy_from_slice(&data[8..36]);

        Ok(Self {
            magic: parse_u16_be(data, 0)?,
            version: parse_u16_be(data, 2)?,
            psid: parse_u32_be(data, 4)?,
            link_info,
            length: parse_u16_be(data, 36)?,
        })
    }
}

/// Common service header carried by every data frame (DB V2X)
///
/// `payload_length` and `payload_crc32` carry the sender's latitude and
/// longitude scaled by 1e6 as signed integers; see [`TelemetryHeader::position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHeader {
    pub device_type: u32,
    pub telecomm_type: u32,
    pub device_id: u32,
    pub timestamp: u64,
    pub service_id: u32,
    pub action_type: u32,
    pub region_id: u32,
    pub payload_type: u32,
    pub comm_id: u32,
    pub db_version: u16,
    pub hw_version: u16,
    pub sw_version: u16,
    pub payload_length: u32,
    pub payload_crc32: u32,
}

impl Default for TelemetryHeader {
    /// Field values used by deployed senders.
    ///
    /// The enumerations are stored in host (little-endian) byte order by those
    /// senders, so the defaults are byte-swapped to stay wire compatible.
    fn default() -> Self {
        Self {
            device_type: 0x0001u32.swap_bytes(),
            telecomm_type: 0x0002u32.swap_bytes(),
            device_id: 0,
            timestamp: 0,
            service_id: 0x0005u32.swap_bytes(),
            action_type: 0x0001u32.swap_bytes(),
            region_id: 0x0004u32.swap_bytes(),
            payload_type: 0x000bu32.swap_bytes(),
            comm_id: 0x0001u32.swap_bytes(),
            db_version: 0x0001,
            hw_version: 0x0111,
            sw_version: 0x0001,
            payload_length: 0,
            payload_crc32: 0,
        }
    }
}

impl TelemetryHeader {
    pub const SIZE: usize = TELEMETRY_HEADER_SIZE;

    /// Sender position decoded from the two coordinate slots.
    pub fn position(&self) -> Position {
        Position::new(
            self.payload_length as i32 as f64 / COORDINATE_SCALE,
            self.payload_crc32 as i32 as f64 / COORDINATE_SCALE,
        )
    }

    /// Copy of this header with the coordinate slots set to `position`.
    ///
    /// Coordinates are scaled by 1e6 and truncated toward zero.
    pub fn with_position(mut self, position: Position) -> Self {
        self.payload_length = (position.latitude * COORDINATE_SCALE) as i32 as u32;
        self.payload_crc32 = (position.longitude * COORDINATE_SCALE) as i32 as u32;
        self
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.device_type.to_be_bytes());
        out.extend_from_slice(&self.telecomm_type.to_be_bytes());
        out.extend_from_slice(&self.device_id.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.service_id.to_be_bytes());
        out.extend_from_slice(&self.action_type.to_be_bytes());
        out.extend_from_slice(&self.region_id.to_be_bytes());
        out.extend_from_slice(&self.payload_type.to_be_bytes());
        out.extend_from_slice(&self.comm_id.to_be_bytes());
        out.extend_from_slice(&self.db_version.to_be_bytes());
        out.extend_from_slice(&self.hw_version.to_be_bytes());
        out.extend_from_slice(&self.sw_version.to_be_bytes());
        out.extend_from_slice(&self.payload_length.to_be_bytes());
        out.extend_from_slice(&self.payload_crc32.to_be_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "TelemetryHeader")?;

        // device_type     offset 0
        // telecomm_type   offset 4
        // device_id       offset 8
        // timestamp       offset 12 (u64)
        // service_id      offset 20
        // action_type     offset 24
        // region_id       offset 28
        // payload_type    offset 32
        // comm_id         offset 36
        // db/hw/sw ver    offset 40, 42, 44 (u16)
        // payload_length  offset 46
        // payload_crc32   offset 50
        Ok(Self {
            device_type: parse_u32_be(data, 0)?,
            telecomm_type: parse_u32_be(data, 4)?,
            device_id: parse_u32_be(data, 8)?,
            timestamp: parse_u64_be(data, 12)?,
            service_id: parse_u32_be(data, 20)?,
            action_type: parse_u32_be(data, 24)?,
            region_id: parse_u32_be(data, 28)?,
            payload_type: parse_u32_be(data, 32)?,
            comm_id: parse_u32_be(data, 36)?,
            db_version: parse_u16_be(data, 40)?,
            hw_version: parse_u16_be(data, 42)?,
            sw_version: parse_u16_be(data, 44)?,
            payload_length: parse_u32_be(data, 46)?,
            payload_crc32: parse_u32_be(data, 50)?,
        })
    }
}

fn ensure_len(data: &[u8], size: usize, context: &str) -> Result<()> {
    if data.len() < size {
        return Err(LinkError::framing(
            context,
            format!("need {} bytes, have {}", size, data.len()),
        ));
    }
    Ok(())
}

fn field<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            LinkError::framing(
                "field extraction",
                format!("{}-byte read at offset {} exceeds buffer of {}", N, offset, data.len()),
            )
        })
}

/// Read a big-endian u16 at `offset`.
pub fn parse_u16_be(data: &[u8], offset: usize) -> Result<u16> {
    field::<2>(data, offset).map(u16::from_be_bytes)
}

/// Read a big-endian u32 at `offset`.
pub fn parse_u32_be(data: &[u8], offset: usize) -> Result<u32> {
    field::<4>(data, offset).map(u32::from_be_bytes)
}

pub fn parse_i16_be(data: &[u8], offset: usize) -> Result<i16> {
    field::<2>(data, offset).map(i16::from_be_bytes)
}

pub fn parse_u64_be(data: &[u8], offset: usize) -> Result<u64> {
    field::<8>(data, offset).map(u64::from_be_bytes)
}
