//! Decoded frame types

use std::sync::Arc;

use super::Position;
use crate::wire::{PING_INDICATOR, TelemetryHeader, VIDEO_INDICATOR};

/// One message extracted from the stream.
///
/// Frames are constructed per decode and never borrow from the receive buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Latency probe answered by the far end.
    ///
    /// All three times are minute-relative tick counters.
    Ping { receiver_send_time: u32, sender_recv_time: u32, sender_send_time: u32 },

    /// Latency probe awaiting an answer.
    PingRequest { receiver_send_time: u32 },

    /// Telemetry header plus a classified payload.
    Data(DataFrame),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Ping { .. } => "ping",
            Frame::PingRequest { .. } => "ping-request",
            Frame::Data(_) => "data",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub telemetry: TelemetryHeader,
    /// Sender position carried in the telemetry coordinate slots
    pub sender_position: Position,
    pub indicator: PayloadKind,
    /// Video sequence number, present when the payload is long enough
    pub sequence: Option<u32>,
    pub scanline: Option<ScanlinePayload>,
}

/// Classification of a data frame payload by its leading indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Video,
    /// Indicator not recognised, or `None` when the payload is shorter than two bytes
    Unknown(Option<u16>),
}

impl PayloadKind {
    pub fn from_indicator(indicator: Option<u16>) -> Self {
        match indicator {
            Some(VIDEO_INDICATOR) => PayloadKind::Video,
            other => PayloadKind::Unknown(other),
        }
    }

    /// True for a ping indicator found after a telemetry header.
    pub fn is_stray_ping(&self) -> bool {
        matches!(self, PayloadKind::Unknown(Some(PING_INDICATOR)))
    }
}

/// One row of a video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanlinePayload {
    /// Row index within the frame (signed on the wire)
    pub row: i16,
    /// Raw pixel bytes for the row
    pub pixels: Arc<[u8]>,
}

impl ScanlinePayload {
    pub fn new(row: i16, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self { row, pixels: pixels.into() }
    }
}
