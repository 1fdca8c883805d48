//! Stream driver: owns the socket, the reassembly buffer and the read loop

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::metrics::SharedByteCounter;
use crate::transport::{Connector, handshake};
use crate::types::Frame;
use crate::types::clock::minute_ticks;
use crate::wire::{DecodeWarning, HeaderLayout, ReassemblyBuffer};
use crate::{LinkError, Result};

/// Lifecycle of the modem link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No socket; connecting or backing off
    Idle,
    /// Handshake done, waiting for a start command; inbound bytes are discarded
    Connected,
    /// Reading and decoding
    Streaming,
    /// Flushing queued writes before releasing the socket
    Draining,
}

/// When and at what tick a chunk of bytes arrived.
#[derive(Debug, Clone, Copy)]
pub struct ArrivalContext {
    pub at: DateTime<Local>,
    /// Minute-relative tick of `at`
    pub ticks: u32,
}

impl ArrivalContext {
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    pub fn at(at: DateTime<Local>) -> Self {
        Self { at, ticks: minute_ticks(&at) }
    }
}

/// Consumer of decoded frames
///
/// Called on the driver task in arrival order, so implementations must not
/// block. A returned byte vector is written back to the modem before the next
/// frame is handled.
pub trait FrameHandler: Send + 'static {
    fn handle(&mut self, frame: Frame, arrival: &ArrivalContext) -> Option<Vec<u8>>;

    fn on_warning(&mut self, warning: &DecodeWarning) {
        warn!("Decode warning: {}", warning);
    }
}

/// Driver timing and framing settings
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub layout: HeaderLayout,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub read_buffer_size: usize,
    pub outbound_capacity: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            layout: HeaderLayout::INBOUND,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(3),
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(5),
            read_buffer_size: 12 * 1024,
            outbound_capacity: 256,
        }
    }
}

impl DriverSettings {
    /// Backoff before retry number `failures` (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1 << exponent).min(self.backoff_max)
    }
}

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Current link state
    pub state: watch::Receiver<LinkState>,
    /// Start (`true`) or stop (`false`) streaming
    pub streaming: watch::Sender<bool>,
    /// Frames to write to the modem while streaming
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

enum SessionEnd {
    /// Stop command honoured; reconnect and wait in Connected
    Released,
    Cancelled,
    Failed(LinkError),
}

enum StreamEnd {
    Stopped,
    Cancelled,
    Failed(LinkError),
}

struct Session<'a, C: Connector, H> {
    reader: ReadHalf<C::Stream>,
    writer: WriteHalf<C::Stream>,
    buffer: &'a mut ReassemblyBuffer,
    handler: &'a mut H,
    settings: &'a DriverSettings,
    counter: &'a SharedByteCounter,
    state_tx: &'a watch::Sender<LinkState>,
    streaming_rx: &'a mut watch::Receiver<bool>,
    outbound_rx: &'a mut mpsc::Receiver<Vec<u8>>,
    cancel: &'a CancellationToken,
}

/// Stream driver spawns and manages the socket task
///
/// The task owns the connector, the socket, the reassembly buffer and the
/// frame handler. Transport failures move the link back to Idle and trigger a
/// reconnect with bounded exponential backoff; the loop only exits on
/// cancellation.
pub struct StreamDriver;

impl StreamDriver {
    /// Spawn the driver task.
    ///
    /// Received byte counts are added to `counter`.
    pub fn spawn<C, H>(
        connector: C,
        handler: H,
        settings: DriverSettings,
        counter: SharedByteCounter,
        cancel: CancellationToken,
    ) -> DriverChannels
    where
        C: Connector,
        H: FrameHandler,
    {
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let (streaming_tx, streaming_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_capacity.max(1));

        let cancel_driver = cancel.clone();
        tokio::spawn(async move {
            Self::driver_task(
                connector,
                handler,
                settings,
                counter,
                state_tx,
                streaming_rx,
                outbound_rx,
                cancel_driver,
            )
            .await;
        });

        DriverChannels { state: state_rx, streaming: streaming_tx, outbound: outbound_tx, cancel }
    }

    #[allow(clippy::too_many_arguments)]
    async fn driver_task<C, H>(
        mut connector: C,
        mut handler: H,
        settings: DriverSettings,
        counter: SharedByteCounter,
        state_tx: watch::Sender<LinkState>,
        mut streaming_rx: watch::Receiver<bool>,
        mut outbound_rx: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) where
        C: Connector,
        H: FrameHandler,
    {
        info!("Stream driver started for {}", connector.peer());
        let mut buffer = ReassemblyBuffer::with_capacity(settings.read_buffer_size * 2);
        let mut failures = 0u32;
        let mut sessions = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            set_state(&state_tx, LinkState::Idle);

            let established = tokio::select! {
                _ = cancel.cancelled() => break,
                result = Self::establish(&mut connector, &settings) => result,
            };

            let end = match established {
                Ok(stream) => {
                    failures = 0;
                    sessions += 1;
                    buffer.clear();
                    set_state(&state_tx, LinkState::Connected);

                    let (reader, writer) = tokio::io::split(stream);
                    let session = Session::<C, H> {
                        reader,
                        writer,
                        buffer: &mut buffer,
                        handler: &mut handler,
                        settings: &settings,
                        counter: &counter,
                        state_tx: &state_tx,
                        streaming_rx: &mut streaming_rx,
                        outbound_rx: &mut outbound_rx,
                        cancel: &cancel,
                    };
                    session.run().await
                }
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Released => debug!("Socket released after stop"),
                SessionEnd::Cancelled => break,
                SessionEnd::Failed(e) => {
                    failures += 1;
                    let backoff = settings.backoff(failures);
                    warn!("Link failure #{}: {} (retrying in {:?})", failures, e, backoff);
                    set_state(&state_tx, LinkState::Idle);

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        set_state(&state_tx, LinkState::Idle);
        info!("Stream driver ended ({} sessions)", sessions);
    }

    async fn establish<C: Connector>(connector: &mut C, settings: &DriverSettings) -> Result<C::Stream> {
        let mut stream = tokio::time::timeout(settings.connect_timeout, connector.connect())
            .await
            .map_err(|_| LinkError::timeout("connect", settings.connect_timeout))??;
        handshake(&mut stream, settings.handshake_timeout).await?;
        info!("Handshake complete with {}", connector.peer());
        Ok(stream)
    }
}

impl<C: Connector, H: FrameHandler> Session<'_, C, H> {
    async fn run(mut self) -> SessionEnd {
        let mut scratch = vec![0u8; self.settings.read_buffer_size.max(1)];
        loop {
            // Connected: wait for a start command while watching the socket
            while !*self.streaming_rx.borrow_and_update() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.release().await;
                        return SessionEnd::Cancelled;
                    }
                    changed = self.streaming_rx.changed() => {
                        if changed.is_err() {
                            self.release().await;
                            return SessionEnd::Cancelled;
                        }
                    }
                    read = self.reader.read(&mut scratch) => match read {
                        Ok(0) => {
                            return SessionEnd::Failed(LinkError::connection_failed(
                                "modem closed the stream before streaming started",
                            ));
                        }
                        Ok(n) => {
                            // Counted for throughput but never decoded
                            self.counter.add(n);
                            self.buffer.clear();
                            trace!("Discarded {} bytes received before start", n);
                        }
                        Err(e) => return SessionEnd::Failed(e.into()),
                    },
                }
            }

            set_state(self.state_tx, LinkState::Streaming);
            match self.stream().await {
                StreamEnd::Stopped => {
                    set_state(self.state_tx, LinkState::Draining);
                    self.release().await;
                    return SessionEnd::Released;
                }
                StreamEnd::Cancelled => {
                    set_state(self.state_tx, LinkState::Draining);
                    self.release().await;
                    return SessionEnd::Cancelled;
                }
                StreamEnd::Failed(e) => return SessionEnd::Failed(e),
            }
        }
    }

    async fn stream(&mut self) -> StreamEnd {
        let mut chunk = vec![0u8; self.settings.read_buffer_size.max(1)];
        let mut frames = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                changed = self.streaming_rx.changed() => {
                    if changed.is_err() {
                        return StreamEnd::Cancelled;
                    }
                    if !*self.streaming_rx.borrow_and_update() {
                        info!("Stop requested after {} frames", frames);
                        return StreamEnd::Stopped;
                    }
                }
                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = self.writer.write_all(&frame).await {
                        return StreamEnd::Failed(e.into());
                    }
                }
                read = self.reader.read(&mut chunk) => match read {
                    Ok(0) => return StreamEnd::Failed(LinkError::connection_failed("modem closed the stream")),
                    Ok(n) => {
                        self.counter.add(n);
                        match self.dispatch(&chunk[..n]).await {
                            Ok(count) => frames += count,
                            Err(e) => return StreamEnd::Failed(e),
                        }
                    }
                    Err(e) => return StreamEnd::Failed(e.into()),
                },
            }
        }
    }

    /// Decode one received chunk and hand every frame to the handler.
    async fn dispatch(&mut self, chunk: &[u8]) -> Result<u64> {
        let arrival = ArrivalContext::now();
        let decoded = self.buffer.feed(chunk, &self.settings.layout);
        trace!(
            "Read {} bytes: {} frames, {} retained",
            chunk.len(),
            decoded.frames.len(),
            self.buffer.len()
        );

        for warning in &decoded.warnings {
            self.handler.on_warning(warning);
        }

        let count = decoded.frames.len() as u64;
        for frame in decoded.frames {
            if let Some(reply) = self.handler.handle(frame, &arrival) {
                self.writer.write_all(&reply).await?;
            }
        }
        Ok(count)
    }

    /// Write whatever is queued, then shut the socket down.
    async fn release(&mut self) {
        let mut flushed = 0usize;
        while let Ok(frame) = self.outbound_rx.try_recv() {
            if let Err(e) = self.writer.write_all(&frame).await {
                debug!("Dropping queued frames during drain: {}", e);
                break;
            }
            flushed += 1;
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!("Socket shutdown failed: {}", e);
        }
        debug!("Released socket ({} queued frames flushed)", flushed);
    }
}

fn set_state(state_tx: &watch::Sender<LinkState>, state: LinkState) {
    let previous = state_tx.send_replace(state);
    if previous != state {
        info!("Link state {:?} -> {:?}", previous, state);
    }
}
