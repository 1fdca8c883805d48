//! Frame builder for the transmit side
//!
//! Serialises typed inputs into frames whose base-header `length` always equals
//! the number of bytes that follow it.

use super::format::{
    BaseHeader, MAX_PAYLOAD_LEN, PING_INDICATOR, PING_REPLY_LEN, PING_REQUEST_LEN,
    TELEMETRY_HEADER_SIZE, TelemetryHeader, VIDEO_INDICATOR,
};
use crate::types::Position;
use crate::{LinkError, Result};

/// Sequence numbers wrap at this modulus.
pub const SEQUENCE_WRAP: u32 = 1_000_000;

/// Inputs for one data frame.
#[derive(Debug, Clone)]
pub struct DataUnit<'a> {
    pub telemetry: TelemetryHeader,
    /// Written into the telemetry coordinate slots
    pub position: Position,
    pub indicator: u16,
    pub sequence: Option<u32>,
    pub scanline_index: Option<i16>,
    pub scanline: &'a [u8],
}

impl<'a> DataUnit<'a> {
    /// Video scanline unit using the default telemetry fields.
    pub fn scanline(position: Position, sequence: u32, row: i16, pixels: &'a [u8]) -> Self {
        Self {
            telemetry: TelemetryHeader::default(),
            position,
            indicator: VIDEO_INDICATOR,
            sequence: Some(sequence),
            scanline_index: Some(row),
            scanline: pixels,
        }
    }

    fn payload_len(&self) -> usize {
        2 + self.sequence.map_or(0, |_| 4) + self.scanline_index.map_or(0, |_| 2) + self.scanline.len()
    }
}

/// Serialise a data frame behind `header`.
///
/// Fails with a validation error when the frame body would exceed the
/// 2302-byte limit of the length field.
pub fn build_data_frame<H: BaseHeader>(header: &H, unit: &DataUnit<'_>) -> Result<Vec<u8>> {
    let body_len = TELEMETRY_HEADER_SIZE + unit.payload_len();
    if body_len > MAX_PAYLOAD_LEN {
        return Err(LinkError::validation(
            "payload",
            format!("frame body of {} bytes exceeds {} byte limit", body_len, MAX_PAYLOAD_LEN),
        ));
    }

    let mut out = Vec::with_capacity(H::SIZE + body_len);
    header.encode_with_length(body_len as u16, &mut out);
    unit.telemetry.with_position(unit.position).encode_into(&mut out);
    out.extend_from_slice(&unit.indicator.to_be_bytes());
    if let Some(sequence) = unit.sequence {
        out.extend_from_slice(&sequence.to_be_bytes());
    }
    if let Some(row) = unit.scanline_index {
        out.extend_from_slice(&row.to_be_bytes());
    }
    out.extend_from_slice(unit.scanline);

    debug_assert_eq!(out.len(), H::SIZE + body_len);
    Ok(out)
}

/// Ping request carrying the sender's minute-relative send time.
pub fn build_ping_request<H: BaseHeader>(header: &H, send_time: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(H::SIZE + PING_REQUEST_LEN);
    header.encode_with_length(PING_REQUEST_LEN as u16, &mut out);
    out.extend_from_slice(&PING_INDICATOR.to_be_bytes());
    out.extend_from_slice(&send_time.to_be_bytes());
    out
}

/// Ping reply echoing the request time and adding local receive/send times.
pub fn build_ping_reply<H: BaseHeader>(header: &H, echoed: u32, recv_time: u32, send_time: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(H::SIZE + PING_REPLY_LEN);
    header.encode_with_length(PING_REPLY_LEN as u16, &mut out);
    out.extend_from_slice(&PING_INDICATOR.to_be_bytes());
    out.extend_from_slice(&echoed.to_be_bytes());
    out.extend_from_slice(&recv_time.to_be_bytes());
    out.extend_from_slice(&send_time.to_be_bytes());
    out
}

/// Monotonic video sequence counter, wrapping at [`SEQUENCE_WRAP`].
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    pub fn starting_at(next: u32) -> Self {
        Self { next: next % SEQUENCE_WRAP }
    }

    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Take the current number and advance.
    pub fn advance(&mut self) -> u32 {
        let current = self.next;
        self.next = (self.next + 1) % SEQUENCE_WRAP;
        current
    }
}

/// Stateful builder holding the header template and the sequence counter.
#[derive(Debug, Clone)]
pub struct FrameBuilder<H: BaseHeader> {
    header: H,
    telemetry: TelemetryHeader,
    sequence: SequenceCounter,
}

impl<H: BaseHeader> FrameBuilder<H> {
    pub fn new(header: H, telemetry: TelemetryHeader) -> Self {
        Self { header, telemetry, sequence: SequenceCounter::default() }
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    pub fn next_sequence(&self) -> u32 {
        self.sequence.peek()
    }

    /// Build a sequenced scanline frame.
    ///
    /// The sequence number is only consumed when the frame builds.
    pub fn scanline(&mut self, position: Position, row: i16, pixels: &[u8]) -> Result<Vec<u8>> {
        let mut unit = DataUnit::scanline(position, self.sequence.peek(), row, pixels);
        unit.telemetry = self.telemetry;
        let frame = build_data_frame(&self.header, &unit)?;
        self.sequence.advance();
        Ok(frame)
    }

    pub fn ping_request(&self, send_time: u32) -> Vec<u8> {
        build_ping_request(&self.header, send_time)
    }

    pub fn ping_reply(&self, echoed: u32, recv_time: u32, send_time: u32) -> Vec<u8> {
        build_ping_reply(&self.header, echoed, recv_time, send_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Frame, PayloadKind};
    use crate::wire::{HeaderLayout, RxHeader, TxHeader, decode};
    use proptest::prelude::*;

    #[test]
    fn declared_length_matches_body() {
        let unit = DataUnit::scanline(Position::new(37.5, 127.0), 42, 7, &[1u8; 900]);
        let frame = build_data_frame(&TxHeader::default(), &unit).unwrap();
        let header = TxHeader::parse(&frame).unwrap();
        assert_eq!(header.length as usize, frame.len() - TxHeader::SIZE);
        assert_eq!(header.length as usize, 54 + 2 + 4 + 2 + 900);
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let pixels = vec![0u8; MAX_PAYLOAD_LEN];
        let unit = DataUnit::scanline(Position::default(), 0, 0, &pixels);
        let err = build_data_frame(&TxHeader::default(), &unit).unwrap_err();
        assert!(matches!(err, LinkError::Validation { .. }));
    }

    #[test]
    fn largest_payload_fits_exactly() {
        let pixels = vec![0u8; MAX_PAYLOAD_LEN - TELEMETRY_HEADER_SIZE - 8];
        let unit = DataUnit::scanline(Position::default(), 0, 0, &pixels);
        let frame = build_data_frame(&TxHeader::default(), &unit).unwrap();
        assert_eq!(frame.len(), TxHeader::SIZE + MAX_PAYLOAD_LEN);
    }

    #[test]
    fn ping_frames_have_fixed_sizes() {
        let request = build_ping_request(&TxHeader::default(), 123);
        let reply = build_ping_reply(&TxHeader::default(), 123, 456, 789);
        assert_eq!(request.len(), TxHeader::SIZE + PING_REQUEST_LEN);
        assert_eq!(reply.len(), TxHeader::SIZE + PING_REPLY_LEN);
        assert_eq!(&request[48..50], &[0, 6]);
        assert_eq!(&reply[48..50], &[0, 14]);
    }

    #[test]
    fn sequence_counter_wraps() {
        let mut counter = SequenceCounter::starting_at(SEQUENCE_WRAP - 1);
        assert_eq!(counter.advance(), SEQUENCE_WRAP - 1);
        assert_eq!(counter.advance(), 0);
        assert_eq!(counter.advance(), 1);
    }

    #[test]
    fn failed_build_does_not_consume_sequence() {
        let mut builder = FrameBuilder::new(TxHeader::default(), TelemetryHeader::default());
        assert!(builder.scanline(Position::default(), 0, &[0u8; 4096]).is_err());
        assert_eq!(builder.next_sequence(), 0);
        builder.scanline(Position::default(), 0, &[0u8; 10]).unwrap();
        assert_eq!(builder.next_sequence(), 1);
    }

    #[test]
    fn inbound_header_builds_decodable_frames() {
        let mut builder = FrameBuilder::new(RxHeader::default(), TelemetryHeader::default());
        let frame = builder.scanline(Position::new(1.0, 2.0), 5, &[3u8; 30]).unwrap();
        let decoded = decode(&frame, &HeaderLayout::INBOUND);
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.consumed, frame.len());
    }

    proptest! {
        #[test]
        fn built_frames_decode_to_their_inputs(
            lat in -90.0f64..90.0,
            lon in -180.0f64..180.0,
            device_id in any::<u32>(),
            timestamp in any::<u64>(),
            sequence in 0u32..SEQUENCE_WRAP,
            row in any::<i16>(),
            pixels in prop::collection::vec(any::<u8>(), 0..1200),
        ) {
            let telemetry = TelemetryHeader { device_id, timestamp, ..TelemetryHeader::default() };
            let unit = DataUnit {
                telemetry,
                position: Position::new(lat, lon),
                indicator: VIDEO_INDICATOR,
                sequence: Some(sequence),
                scanline_index: Some(row),
                scanline: &pixels,
            };
            let frame = build_data_frame(&TxHeader::default(), &unit).unwrap();
            let decoded = decode(&frame, &HeaderLayout::OUTBOUND);
            prop_assert_eq!(decoded.consumed, frame.len());
            prop_assert_eq!(decoded.frames.len(), 1);

            match &decoded.frames[0] {
                Frame::Data(data) => {
                    prop_assert_eq!(data.telemetry, telemetry.with_position(unit.position));
                    prop_assert_eq!(data.indicator, PayloadKind::Video);
                    prop_assert_eq!(data.sequence, Some(sequence));
                    let scanline = data.scanline.as_ref().unwrap();
                    prop_assert_eq!(scanline.row, row);
                    prop_assert_eq!(scanline.pixels.as_ref(), pixels.as_slice());
                    prop_assert!((data.sender_position.latitude - lat).abs() < 1e-6);
                    prop_assert!((data.sender_position.longitude - lon).abs() < 1e-6);
                }
                other => prop_assert!(false, "expected data frame, got {:?}", other),
            }
        }
    }
}
