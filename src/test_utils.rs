//! Synthetic frames and in-memory transports for tests and benchmarks
//!
//! Frames are built with the public builder against the modem's inbound
//! header, so fixtures look exactly like what a receiver reads off the socket.

#![cfg(any(test, feature = "benchmark"))]

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use crate::transport::Connector;
use crate::types::Position;
use crate::wire::{
    ACK_MAGIC, CAPABILITY_REQUEST, DataUnit, RxHeader, TelemetryHeader, build_data_frame,
    build_ping_reply, build_ping_request,
};
use crate::{LinkError, Result};

/// Sender position used by every fixture.
pub const FIXTURE_POSITION: Position = Position::new(37.570286, 126.983610);

/// Inbound data frame with an arbitrary indicator and raw payload bytes.
pub fn inbound_data_frame(indicator: u16, body: &[u8]) -> Vec<u8> {
    let unit = DataUnit {
        telemetry: TelemetryHeader::default(),
        position: FIXTURE_POSITION,
        indicator,
        sequence: None,
        scanline_index: None,
        scanline: body,
    };
    build_data_frame(&RxHeader::default(), &unit).expect("fixture payload fits in a frame")
}

/// Inbound video scanline frame.
pub fn inbound_video_frame(sequence: u32, row: i16, pixels: &[u8]) -> Vec<u8> {
    let unit = DataUnit::scanline(FIXTURE_POSITION, sequence, row, pixels);
    build_data_frame(&RxHeader::default(), &unit).expect("fixture payload fits in a frame")
}

/// Inbound ping reply.
pub fn inbound_ping_reply(receiver_send: u32, sender_recv: u32, sender_send: u32) -> Vec<u8> {
    build_ping_reply(&RxHeader::default(), receiver_send, sender_recv, sender_send)
}

/// Inbound ping request.
pub fn inbound_ping_request(send_time: u32) -> Vec<u8> {
    build_ping_request(&RxHeader::default(), send_time)
}

/// A stream of `frames` full-size video frames with a ping reply after every
/// tenth frame and a few noise bytes after every `noise_every`th (0 for none).
pub fn interleaved_stream(frames: usize, noise_every: usize) -> Vec<u8> {
    let pixels = [0x5Au8; 900];
    let mut stream = Vec::new();
    for i in 0..frames {
        stream.extend(inbound_video_frame(i as u32, (i % 300) as i16, &pixels));
        if i % 10 == 9 {
            stream.extend(inbound_ping_reply(i as u32, i as u32 + 10, i as u32 + 20));
        }
        if noise_every > 0 && i % noise_every == 0 {
            stream.extend_from_slice(&[0x00, 0xF3, 0x17, 0xF2]);
        }
    }
    stream
}

/// Connector handing out in-memory streams
///
/// Each successful `connect` sends the modem end of a fresh duplex pipe through
/// the receiver returned by [`DuplexConnector::new`].
pub struct DuplexConnector {
    modems: mpsc::UnboundedSender<DuplexStream>,
    refusals: usize,
    capacity: usize,
}

impl DuplexConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (modems, rx) = mpsc::unbounded_channel();
        (Self { modems, refusals: 0, capacity: 64 * 1024 }, rx)
    }

    /// Refuse the first `refusals` connection attempts.
    pub fn with_refusals(mut self, refusals: usize) -> Self {
        self.refusals = refusals;
        self
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&mut self) -> Result<DuplexStream> {
        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(LinkError::connection_failed("refused by test connector"));
        }
        let (client, modem) = tokio::io::duplex(self.capacity);
        self.modems.send(modem).map_err(|_| LinkError::channel_closed("modems"))?;
        Ok(client)
    }

    fn peer(&self) -> String {
        "duplex".to_string()
    }
}

/// Play the modem side of the handshake.
pub async fn accept_handshake(modem: &mut DuplexStream) -> std::io::Result<()> {
    let mut request = [0u8; CAPABILITY_REQUEST.len()];
    modem.read_exact(&mut request).await?;
    assert_eq!(request, CAPABILITY_REQUEST, "unexpected capability request");
    modem.write_all(&ACK_MAGIC).await
}
