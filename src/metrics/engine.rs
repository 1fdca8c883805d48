//! Metrics engine: independent derivation tasks plus a sample assembler
//!
//! Each derivation runs in its own task on the configured cadence and publishes
//! its latest value through a `watch` channel. The sampler task combines the
//! latest values into a [`MetricSample`] each tick and keeps a bounded history.
//! No task waits on another, so a stalled input only freezes its own metric.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::pdr::PdrWindow;
use super::throughput::{ByteCounter, throughput_mbps};
use crate::types::{MetricSample, Position};

/// Engine cadence and history settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSettings {
    pub interval: Duration,
    pub history_len: usize,
    pub pdr_clamp: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { interval: Duration::from_secs(1), history_len: 60, pdr_clamp: false }
    }
}

/// Values the engine consumes; all are produced elsewhere.
pub struct MetricInputs {
    /// Video sequence numbers in arrival order
    pub sequences: mpsc::UnboundedReceiver<u32>,
    /// Latest latency estimate from ping replies
    pub latency: watch::Receiver<f64>,
    /// Most recently observed sender position
    pub sender_position: watch::Receiver<Option<Position>>,
    /// Local (receiver) position
    pub local_position: watch::Receiver<Position>,
}

/// Result of spawning the engine tasks
#[derive(Debug, Clone)]
pub struct MetricsChannels {
    pub pdr: watch::Receiver<f64>,
    pub throughput: watch::Receiver<f64>,
    pub distance: watch::Receiver<f64>,
    /// Most recent assembled sample
    pub latest: watch::Receiver<Option<Arc<MetricSample>>>,
    /// Rolling history, oldest first
    pub history: watch::Receiver<Arc<[MetricSample]>>,
}

pub struct MetricsEngine;

impl MetricsEngine {
    /// Spawn the derivation and sampler tasks.
    ///
    /// Tasks run until `cancel` fires.
    pub fn spawn<C>(
        inputs: MetricInputs,
        counter: C,
        settings: MetricsSettings,
        cancel: CancellationToken,
    ) -> MetricsChannels
    where
        C: ByteCounter,
    {
        let (pdr_tx, pdr_rx) = watch::channel(0.0);
        let (throughput_tx, throughput_rx) = watch::channel(0.0);
        let (distance_tx, distance_rx) = watch::channel(0.0);
        let (latest_tx, latest_rx) = watch::channel(None);
        let (history_tx, history_rx) = watch::channel::<Arc<[MetricSample]>>(Arc::from(Vec::new()));

        let MetricInputs { sequences, latency, sender_position, local_position } = inputs;

        tokio::spawn(Self::pdr_task(sequences, pdr_tx, settings, cancel.clone()));
        tokio::spawn(Self::throughput_task(counter, throughput_tx, settings, cancel.clone()));
        tokio::spawn(Self::distance_task(
            sender_position,
            local_position.clone(),
            distance_tx,
            settings,
            cancel.clone(),
        ));

        let sources = SampleSources {
            pdr: pdr_rx.clone(),
            throughput: throughput_rx.clone(),
            latency,
            distance: distance_rx.clone(),
            position: local_position,
        };
        tokio::spawn(Self::sampler_task(sources, latest_tx, history_tx, settings, cancel));

        info!(
            "Metrics engine started (interval {:?}, history {})",
            settings.interval, settings.history_len
        );

        MetricsChannels {
            pdr: pdr_rx,
            throughput: throughput_rx,
            distance: distance_rx,
            latest: latest_rx,
            history: history_rx,
        }
    }

    async fn pdr_task(
        mut sequences: mpsc::UnboundedReceiver<u32>,
        pdr_tx: watch::Sender<f64>,
        settings: MetricsSettings,
        cancel: CancellationToken,
    ) {
        let mut window = PdrWindow::default();
        let mut ticker = ticker(settings.interval);
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let count = window.count();
                    let pdr = window.take(settings.pdr_clamp);
                    trace!("PDR {:.3}% over {} packets", pdr, count);
                    pdr_tx.send_replace(pdr);
                }
                sequence = sequences.recv(), if open => match sequence {
                    Some(sequence) => window.record(sequence),
                    None => {
                        debug!("Sequence feed closed");
                        open = false;
                    }
                },
            }
        }
        debug!("PDR task ended");
    }

    async fn throughput_task<C: ByteCounter>(
        counter: C,
        throughput_tx: watch::Sender<f64>,
        settings: MetricsSettings,
        cancel: CancellationToken,
    ) {
        let mut ticker = ticker(settings.interval);
        let seconds = settings.interval.as_secs_f64();
        let mut previous = read_counter(&counter).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let current = read_counter(&counter).await;
                    let mbps = match (previous, current) {
                        (Some(start), Some(end)) => throughput_mbps(start, end) / seconds,
                        _ => 0.0,
                    };
                    trace!("Throughput {:.3} Mbps", mbps);
                    throughput_tx.send_replace(mbps);
                    previous = current;
                }
            }
        }
        debug!("Throughput task ended");
    }

    async fn distance_task(
        sender_position: watch::Receiver<Option<Position>>,
        local_position: watch::Receiver<Position>,
        distance_tx: watch::Sender<f64>,
        settings: MetricsSettings,
        cancel: CancellationToken,
    ) {
        let mut ticker = ticker(settings.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sender = *sender_position.borrow();
                    let local = *local_position.borrow();
                    let distance = sender.map_or(0.0, |sender| local.haversine_m(&sender));
                    trace!("Distance {:.1} m", distance);
                    distance_tx.send_replace(distance);
                }
            }
        }
        debug!("Distance task ended");
    }

    async fn sampler_task(
        sources: SampleSources,
        latest_tx: watch::Sender<Option<Arc<MetricSample>>>,
        history_tx: watch::Sender<Arc<[MetricSample]>>,
        settings: MetricsSettings,
        cancel: CancellationToken,
    ) {
        let mut ticker = ticker(settings.interval);
        let mut history = VecDeque::with_capacity(settings.history_len);
        let mut produced = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = sources.snapshot();
                    produced += 1;

                    if settings.history_len > 0 {
                        if history.len() == settings.history_len {
                            history.pop_front();
                        }
                        history.push_back(sample.clone());
                        history_tx.send_replace(history.iter().cloned().collect());
                    }
                    latest_tx.send_replace(Some(Arc::new(sample)));
                }
            }
        }
        info!("Sampler task ended ({} samples)", produced);
    }
}

struct SampleSources {
    pdr: watch::Receiver<f64>,
    throughput: watch::Receiver<f64>,
    latency: watch::Receiver<f64>,
    distance: watch::Receiver<f64>,
    position: watch::Receiver<Position>,
}

impl SampleSources {
    fn snapshot(&self) -> MetricSample {
        MetricSample {
            pdr: *self.pdr.borrow(),
            throughput_mbps: *self.throughput.borrow(),
            latency_ms: *self.latency.borrow(),
            distance_m: *self.distance.borrow(),
            position: *self.position.borrow(),
            timestamp: Local::now(),
        }
    }
}

/// Interval whose first tick is one period from now.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn read_counter<C: ByteCounter>(counter: &C) -> Option<u64> {
    let counter = counter.clone();
    tokio::task::spawn_blocking(move || counter.received_bytes()).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SharedByteCounter;

    struct Harness {
        sequences: mpsc::UnboundedSender<u32>,
        _latency: watch::Sender<f64>,
        sender_position: watch::Sender<Option<Position>>,
        _local: watch::Sender<Position>,
        channels: MetricsChannels,
        cancel: CancellationToken,
    }

    fn spawn_engine(counter: SharedByteCounter, history_len: usize) -> Harness {
        let (seq_tx, seq_rx) = mpsc::unbounded_channel();
        let (latency_tx, latency_rx) = watch::channel(12.5);
        let (sender_tx, sender_rx) = watch::channel(None);
        let (local_tx, local_rx) = watch::channel(Position::new(37.0, 127.0));
        let cancel = CancellationToken::new();

        let settings =
            MetricsSettings { interval: Duration::from_millis(100), history_len, pdr_clamp: false };
        let inputs = MetricInputs {
            sequences: seq_rx,
            latency: latency_rx,
            sender_position: sender_rx,
            local_position: local_rx,
        };
        let channels = MetricsEngine::spawn(inputs, counter, settings, cancel.clone());

        Harness {
            sequences: seq_tx,
            _latency: latency_tx,
            sender_position: sender_tx,
            _local: local_tx,
            channels,
            cancel,
        }
    }

    #[tokio::test]
    async fn pdr_is_published_per_interval() {
        let mut harness = spawn_engine(SharedByteCounter::new(), 4);
        for sequence in [10, 11, 13] {
            harness.sequences.send(sequence).unwrap();
        }

        let pdr = tokio::time::timeout(
            Duration::from_secs(2),
            harness.channels.pdr.wait_for(|pdr| *pdr > 0.0),
        )
        .await
        .expect("pdr never published")
        .map(|pdr| *pdr)
        .unwrap();
        assert_eq!(pdr, 75.0);
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn distance_requires_a_sender_fix() {
        let mut harness = spawn_engine(SharedByteCounter::new(), 4);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*harness.channels.distance.borrow(), 0.0);

        harness.sender_position.send_replace(Some(Position::new(37.0, 127.001)));
        let distance = tokio::time::timeout(
            Duration::from_secs(2),
            harness.channels.distance.wait_for(|d| *d > 0.0),
        )
        .await
        .expect("distance never published")
        .map(|d| *d)
        .unwrap();
        assert!((distance - 88.8).abs() < 1.0, "unexpected distance {}", distance);
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn throughput_follows_counter() {
        let counter = SharedByteCounter::new();
        let mut harness = spawn_engine(counter.clone(), 4);

        let feeder = tokio::spawn(async move {
            loop {
                counter.add(12_500);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            harness.channels.throughput.wait_for(|mbps| *mbps > 0.0),
        )
        .await;
        feeder.abort();
        assert!(result.is_ok(), "throughput never rose above zero");
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let mut harness = spawn_engine(SharedByteCounter::new(), 3);
        let history = tokio::time::timeout(
            Duration::from_secs(3),
            harness.channels.history.wait_for(|h| h.len() == 3),
        )
        .await
        .expect("history never filled")
        .map(|h| Arc::clone(&h))
        .unwrap();
        assert!(history.iter().all(|s| s.latency_ms == 12.5));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(harness.channels.history.borrow().len(), 3);
        assert!(harness.channels.latest.borrow().is_some());
        harness.cancel.cancel();
    }
}
