//! Transmitting end: sends video scanlines and answers latency probes

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::LinkControl;
use crate::config::LinkConfig;
use crate::driver::{ArrivalContext, FrameHandler, LinkState, StreamDriver};
use crate::metrics::SharedByteCounter;
use crate::transport::{Connector, TcpConnector};
use crate::types::clock::now_ticks;
use crate::types::{Frame, Position};
use crate::wire::{FrameBuilder, TelemetryHeader, TxHeader, build_ping_reply};
use crate::{LinkError, Result};

/// Frame handler for the transmitting end
///
/// Answers every ping request with a reply carrying the arrival tick and the
/// tick at which the reply is built.
#[derive(Debug, Default)]
pub struct TransmitterDispatch {
    header: TxHeader,
    answered: u64,
}

impl FrameHandler for TransmitterDispatch {
    fn handle(&mut self, frame: Frame, arrival: &ArrivalContext) -> Option<Vec<u8>> {
        match frame {
            Frame::PingRequest { receiver_send_time } => {
                self.answered += 1;
                trace!("Answering ping #{} sent at tick {}", self.answered, receiver_send_time);
                Some(build_ping_reply(&self.header, receiver_send_time, arrival.ticks, now_ticks()))
            }
            other => {
                trace!("Ignoring {} frame on transmit side", other.kind());
                None
            }
        }
    }
}

/// Live transmitting connection
pub struct TransmitterConnection {
    control: LinkControl,
    outbound: mpsc::Sender<Vec<u8>>,
    builder: FrameBuilder<TxHeader>,
    position: watch::Sender<Position>,
    counter: SharedByteCounter,
    cancel: CancellationToken,
}

impl TransmitterConnection {
    pub async fn connect(config: &LinkConfig) -> Result<Self> {
        info!("Connecting transmitter to {}", config.device_addr);
        Self::with_connector(TcpConnector::new(&config.device_addr), config)
    }

    pub fn with_connector<C: Connector>(connector: C, config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let counter = SharedByteCounter::new();

        let channels = StreamDriver::spawn(
            connector,
            TransmitterDispatch::default(),
            config.driver_settings(),
            counter.clone(),
            cancel.clone(),
        );
        let (position, _) = watch::channel(config.initial_position);

        Ok(Self {
            control: LinkControl::new(&channels),
            outbound: channels.outbound,
            builder: FrameBuilder::new(TxHeader::default(), TelemetryHeader::default()),
            position,
            counter,
            cancel,
        })
    }

    pub fn start(&self) {
        self.control.start();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn state(&self) -> LinkState {
        self.control.state()
    }

    pub fn control(&self) -> &LinkControl {
        &self.control
    }

    pub async fn wait_for_state(&self, target: LinkState, timeout: Duration) -> Result<()> {
        self.control.wait_for_state(target, timeout).await
    }

    /// Position stamped into outgoing telemetry headers.
    pub fn set_position(&self, position: Position) {
        if position.is_valid() {
            self.position.send_replace(position);
        } else {
            debug!("Ignoring invalid position {:?}", position);
        }
    }

    pub fn position(&self) -> Position {
        *self.position.borrow()
    }

    /// Sequence number the next scanline will carry.
    pub fn next_sequence(&self) -> u32 {
        self.builder.next_sequence()
    }

    /// Bytes received from the modem so far.
    pub fn received_bytes(&self) -> u64 {
        self.counter.total()
    }

    /// Queue one frame of video, split into rows of `row_bytes`.
    ///
    /// Each row becomes a scanline frame with the next sequence number. Returns
    /// the number of frames queued. Fails unless the link is streaming.
    pub async fn send_video_frame(&mut self, pixels: &[u8], row_bytes: usize) -> Result<usize> {
        if self.state() != LinkState::Streaming {
            return Err(LinkError::connection_failed("link is not streaming"));
        }
        if row_bytes == 0 {
            return Err(LinkError::validation("row_bytes", "must be greater than zero"));
        }

        let position = self.position();
        let mut queued = 0;
        for (row, line) in pixels.chunks(row_bytes).enumerate() {
            let row = i16::try_from(row)
                .map_err(|_| LinkError::validation("pixels", format!("more than {} rows", i16::MAX)))?;
            let frame = self.builder.scanline(position, row, line)?;
            self.outbound.send(frame).await.map_err(|_| LinkError::channel_closed("outbound"))?;
            queued += 1;
        }
        trace!("Queued {} scanlines, next sequence {}", queued, self.builder.next_sequence());
        Ok(queued)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
    }
}

impl Drop for TransmitterConnection {
    fn drop(&mut self) {
        debug!("Dropping transmitter connection");
        self.cancel.cancel();
    }
}
