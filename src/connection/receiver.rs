//! Receiving end: decodes the modem stream and derives link metrics

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::LinkControl;
use crate::config::LinkConfig;
use crate::driver::{ArrivalContext, FrameHandler, LinkState, StreamDriver};
use crate::logbook::{LogBook, LogRecord};
use crate::metrics::{
    CounterSource, InterfaceCounter, MetricInputs, MetricsChannels, MetricsEngine, SharedByteCounter,
    one_way_latency_ms,
};
use crate::sink::{CanvasFrame, FrameSink, ScanlineCanvas};
use crate::transport::{Connector, TcpConnector};
use crate::types::clock::now_ticks;
use crate::types::{ConditionCodes, Frame, MetricSample, PayloadKind, Position};
use crate::Result;
use crate::wire::{TxHeader, build_ping_request};

/// Frame handler for the receiving end
///
/// Ping replies update the latency estimate, video frames feed the PDR window
/// and the sender position, and every data frame is handed to the log book and
/// the scanline sink.
pub struct ReceiverDispatch<S> {
    latency: watch::Sender<f64>,
    sequences: mpsc::UnboundedSender<u32>,
    sender_position: watch::Sender<Option<Position>>,
    local_position: watch::Receiver<Position>,
    conditions: watch::Receiver<ConditionCodes>,
    latest: watch::Receiver<Option<Arc<MetricSample>>>,
    records: Option<mpsc::UnboundedSender<LogRecord>>,
    sink: S,
}

impl<S: FrameSink> FrameHandler for ReceiverDispatch<S> {
    fn handle(&mut self, frame: Frame, arrival: &ArrivalContext) -> Option<Vec<u8>> {
        match frame {
            Frame::Ping { receiver_send_time, sender_recv_time, sender_send_time } => {
                let latency =
                    one_way_latency_ms(receiver_send_time, sender_recv_time, sender_send_time, arrival.ticks);
                trace!("Ping reply: {:.3} ms", latency);
                self.latency.send_replace(latency);
            }
            Frame::PingRequest { receiver_send_time } => {
                trace!("Ignoring ping request sent at tick {}", receiver_send_time);
            }
            Frame::Data(data) => {
                if let (PayloadKind::Video, Some(sequence)) = (data.indicator, data.sequence) {
                    // Engine gone means shutdown is underway
                    let _ = self.sequences.send(sequence);
                }
                self.sender_position.send_replace(Some(data.sender_position));

                if let Some(records) = &self.records {
                    let sample = self.latest.borrow().clone();
                    let record = LogRecord::new(
                        data.telemetry,
                        *self.conditions.borrow(),
                        sample.as_deref(),
                        *self.local_position.borrow(),
                        arrival.at,
                    );
                    if records.send(record).is_err() {
                        warn!("Log book closed; further records are dropped");
                        self.records = None;
                    }
                }

                if let Some(scanline) = &data.scanline {
                    self.sink.on_scanline(scanline);
                }
            }
        }
        None
    }
}

/// Live receiving connection
///
/// Owns the stream driver, the metrics engine, the ping emitter and, when
/// enabled, the log book. Dropping the connection cancels all of them.
pub struct ReceiverConnection {
    control: LinkControl,
    metrics: MetricsChannels,
    local_position: watch::Sender<Position>,
    conditions: watch::Sender<ConditionCodes>,
    frames: Option<watch::Receiver<Option<Arc<CanvasFrame>>>>,
    logbook: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ReceiverConnection {
    /// Connect to the modem at `config.device_addr` and assemble video scanlines
    /// into frames available through [`ReceiverConnection::frames`].
    pub async fn connect(config: &LinkConfig) -> Result<Self> {
        info!("Connecting receiver to {}", config.device_addr);
        let (canvas, frames) =
            ScanlineCanvas::new(ScanlineCanvas::DEFAULT_ROWS, ScanlineCanvas::DEFAULT_ROW_BYTES);
        let mut connection = Self::with_connector(TcpConnector::new(&config.device_addr), canvas, config)?;
        connection.frames = Some(frames);
        Ok(connection)
    }

    /// Spawn every receiver task over an arbitrary transport and sink.
    ///
    /// The driver starts connecting immediately; streaming begins on
    /// [`ReceiverConnection::start`].
    pub fn with_connector<C, S>(connector: C, sink: S, config: &LinkConfig) -> Result<Self>
    where
        C: Connector,
        S: FrameSink,
    {
        config.validate()?;
        let cancel = CancellationToken::new();

        let (sequences_tx, sequences_rx) = mpsc::unbounded_channel();
        let (latency_tx, latency_rx) = watch::channel(0.0);
        let (sender_position_tx, sender_position_rx) = watch::channel(None);
        let (local_position_tx, local_position_rx) = watch::channel(config.initial_position);
        let (conditions_tx, conditions_rx) = watch::channel(ConditionCodes::default());

        let socket_counter = SharedByteCounter::new();
        let counter = match &config.interface {
            Some(interface) => CounterSource::Interface(InterfaceCounter::new(interface)),
            None => CounterSource::Socket(socket_counter.clone()),
        };

        let inputs = MetricInputs {
            sequences: sequences_rx,
            latency: latency_rx,
            sender_position: sender_position_rx,
            local_position: local_position_rx.clone(),
        };
        let metrics = MetricsEngine::spawn(inputs, counter, config.metrics_settings(), cancel.clone());

        let (records, logbook) = if config.log.enabled {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(LogBook::spawn(config.log.clone(), rx, cancel.clone())))
        } else {
            (None, None)
        };

        let dispatch = ReceiverDispatch {
            latency: latency_tx,
            sequences: sequences_tx,
            sender_position: sender_position_tx,
            local_position: local_position_rx,
            conditions: conditions_rx,
            latest: metrics.latest.clone(),
            records,
            sink,
        };
        let channels = StreamDriver::spawn(
            connector,
            dispatch,
            config.driver_settings(),
            socket_counter,
            cancel.clone(),
        );

        tokio::spawn(ping_task(
            channels.outbound.clone(),
            channels.state.clone(),
            config.ping_interval(),
            cancel.clone(),
        ));

        Ok(Self {
            control: LinkControl::new(&channels),
            metrics,
            local_position: local_position_tx,
            conditions: conditions_tx,
            frames: None,
            logbook,
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

    /// Most recent metric sample, if one has been produced.
    pub fn latest_sample(&self) -> Option<Arc<MetricSample>> {
        self.metrics.latest.borrow().clone()
    }

    /// Metric samples as they are produced.
    ///
    /// Yields the current sample first when one exists.
    pub fn samples(&self) -> impl Stream<Item = Arc<MetricSample>> + 'static {
        WatchStream::new(self.metrics.latest.clone()).filter_map(|sample| async move { sample })
    }

    /// Rolling sample history, oldest first.
    pub fn history(&self) -> Arc<[MetricSample]> {
        self.metrics.history.borrow().clone()
    }

    /// Per-metric watch receivers.
    pub fn metrics(&self) -> &MetricsChannels {
        &self.metrics
    }

    /// Update the receiver position (from the GPS collaborator).
    pub fn set_position(&self, position: Position) {
        if position.is_valid() {
            self.local_position.send_replace(position);
        } else {
            debug!("Ignoring invalid position {:?}", position);
        }
    }

    /// Update the road and weather codes recorded with each log row.
    pub fn set_conditions(&self, conditions: ConditionCodes) {
        self.conditions.send_replace(conditions);
    }

    /// Completed video frames, when the connection assembles them.
    pub fn frames(&self) -> Option<impl Stream<Item = Arc<CanvasFrame>> + 'static> {
        let frames = self.frames.clone()?;
        Some(WatchStream::new(frames).filter_map(|frame| async move { frame }))
    }

    /// Cancel every task and wait for the log book to flush.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(logbook) = self.logbook.take() {
            if let Err(e) = logbook.await {
                warn!("Log book task failed: {}", e);
            }
        }
    }
}

impl Drop for ReceiverConnection {
    fn drop(&mut self) {
        debug!("Dropping receiver connection");
        self.cancel.cancel();
    }
}

/// Queue a ping request every `period` while the link is streaming.
async fn ping_task(
    outbound: mpsc::Sender<Vec<u8>>,
    state: watch::Receiver<LinkState>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let header = TxHeader::default();
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if *state.borrow() != LinkState::Streaming {
                    continue;
                }
                match outbound.try_send(build_ping_request(&header, now_ticks())) {
                    Ok(()) => sent += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => debug!("Outbound queue full; ping skipped"),
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    debug!("Ping emitter ended ({} requests)", sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use crate::test_utils::{DuplexConnector, accept_handshake, inbound_ping_reply, inbound_video_frame};
    use crate::wire::{HeaderLayout, PING_INDICATOR, TX_MAGIC, decode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> LinkConfig {
        let mut config = LinkConfig {
            metrics_interval_ms: 50,
            ping_interval_ms: 20,
            backoff_base_ms: 10,
            backoff_max_ms: 50,
            ..LinkConfig::default()
        };
        config.log.enabled = false;
        config
    }

    #[tokio::test]
    async fn video_frames_drive_pdr_and_distance() {
        let (connector, mut modems) = DuplexConnector::new();
        let connection = ReceiverConnection::with_connector(connector, NullSink, &test_config()).unwrap();

        let mut modem = modems.recv().await.unwrap();
        accept_handshake(&mut modem).await.unwrap();
        connection.wait_for_state(LinkState::Connected, Duration::from_secs(1)).await.unwrap();
        connection.start();
        connection.wait_for_state(LinkState::Streaming, Duration::from_secs(1)).await.unwrap();

        let mut stream = Vec::new();
        for sequence in [100, 101, 103] {
            stream.extend(inbound_video_frame(sequence, 0, &[0u8; 900]));
        }
        modem.write_all(&stream).await.unwrap();

        let mut pdr = connection.metrics().pdr.clone();
        let pdr = tokio::time::timeout(Duration::from_secs(2), pdr.wait_for(|p| *p > 0.0))
            .await
            .expect("pdr never published")
            .map(|p| *p)
            .unwrap();
        assert_eq!(pdr, 75.0);

        let mut distance = connection.metrics().distance.clone();
        tokio::time::timeout(Duration::from_secs(2), distance.wait_for(|d| *d > 0.0))
            .await
            .expect("distance never published")
            .unwrap();
    }

    #[tokio::test]
    async fn pings_are_emitted_and_replies_set_latency() {
        let (connector, mut modems) = DuplexConnector::new();
        let connection = ReceiverConnection::with_connector(connector, NullSink, &test_config()).unwrap();

        let mut modem = modems.recv().await.unwrap();
        accept_handshake(&mut modem).await.unwrap();
        connection.start();
        connection.wait_for_state(LinkState::Streaming, Duration::from_secs(1)).await.unwrap();

        let mut request = vec![0u8; 50 + 6];
        tokio::time::timeout(Duration::from_secs(2), modem.read_exact(&mut request))
            .await
            .expect("no ping request")
            .unwrap();
        let decoded = decode(&request, &HeaderLayout::OUTBOUND);
        assert_eq!(&request[..2], &TX_MAGIC.to_be_bytes());
        assert_eq!(&request[50..52], &PING_INDICATOR.to_be_bytes());
        let Frame::PingRequest { receiver_send_time } = decoded.frames[0] else {
            panic!("expected ping request, got {:?}", decoded.frames);
        };

        modem
            .write_all(&inbound_ping_reply(receiver_send_time, 1_000, 1_000))
            .await
            .unwrap();
        let mut latency = connection.metrics().latest.clone();
        tokio::time::timeout(
            Duration::from_secs(2),
            latency.wait_for(|s| s.as_ref().is_some_and(|s| s.latency_ms != 0.0)),
        )
        .await
        .expect("latency never sampled")
        .unwrap();
    }

    #[tokio::test]
    async fn samples_stream_yields_after_first_tick() {
        let (connector, _modems) = DuplexConnector::new();
        let connection = ReceiverConnection::with_connector(connector, NullSink, &test_config()).unwrap();
        let mut samples = Box::pin(connection.samples());
        let sample = tokio::time::timeout(Duration::from_secs(2), samples.next())
            .await
            .expect("no sample")
            .unwrap();
        assert_eq!(sample.pdr, 0.0);
        assert_eq!(sample.position, LinkConfig::default().initial_position);
    }

    #[tokio::test]
    async fn invalid_position_is_ignored() {
        let (connector, _modems) = DuplexConnector::new();
        let connection = ReceiverConnection::with_connector(connector, NullSink, &test_config()).unwrap();
        connection.set_position(Position::new(91.0, 0.0));
        assert_eq!(*connection.local_position.borrow(), LinkConfig::default().initial_position);
        connection.set_position(Position::new(37.0, 127.0));
        assert_eq!(*connection.local_position.borrow(), Position::new(37.0, 127.0));
    }

    #[tokio::test]
    async fn data_frames_are_logged_with_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.log.enabled = true;
        config.log.dir = dir.path().to_path_buf();
        config.log.rotate_secs = 3600;

        let (connector, mut modems) = DuplexConnector::new();
        let connection = ReceiverConnection::with_connector(connector, NullSink, &config).unwrap();
        connection.set_conditions(ConditionCodes { road: 3, weather: 1 });

        let mut modem = modems.recv().await.unwrap();
        accept_handshake(&mut modem).await.unwrap();
        connection.start();
        connection.wait_for_state(LinkState::Streaming, Duration::from_secs(1)).await.unwrap();

        modem.write_all(&inbound_video_frame(1, 0, &[1u8; 900])).await.unwrap();
        modem.write_all(&inbound_video_frame(2, 1, &[1u8; 900])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        connection.shutdown().await;

        let day = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        let file = std::fs::read_dir(&day).unwrap().next().unwrap().unwrap().path();
        let mut reader = csv::Reader::from_path(&file).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][15], "3");
        assert_eq!(&rows[0][16], "1");
    }
}
