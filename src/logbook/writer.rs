//! Rotating CSV writer for received data frames

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::LogConfig;
use crate::types::{ConditionCodes, MetricSample, Position};
use crate::wire::TelemetryHeader;
use crate::{LinkError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One retained data frame together with the link state at arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub telemetry: TelemetryHeader,
    pub conditions: ConditionCodes,
    pub pdr: f64,
    pub throughput_mbps: f64,
    pub latency_ms: f64,
    pub distance_m: f64,
    /// Receiver position
    pub position: Position,
    pub arrived_at: DateTime<Local>,
}

impl LogRecord {
    /// Record for a frame that arrived at `arrived_at`, using the most recent
    /// metric sample (or zeros before the first one).
    pub fn new(
        telemetry: TelemetryHeader,
        conditions: ConditionCodes,
        sample: Option<&MetricSample>,
        position: Position,
        arrived_at: DateTime<Local>,
    ) -> Self {
        let (pdr, throughput_mbps, latency_ms, distance_m) = sample
            .map(|s| (s.pdr, s.throughput_mbps, s.latency_ms, s.distance_m))
            .unwrap_or_default();
        Self {
            telemetry,
            conditions,
            pdr,
            throughput_mbps,
            latency_ms,
            distance_m,
            position,
            arrived_at,
        }
    }
}

/// CSV row layout. Enumerations are written as signed integers.
#[derive(Debug, Serialize)]
struct LogRow {
    #[serde(rename = "No.")]
    index: usize,
    #[serde(rename = "eDeviceType")]
    device_type: i32,
    #[serde(rename = "eTeleCommType")]
    telecomm_type: i32,
    #[serde(rename = "unDeviceId")]
    device_id: i32,
    #[serde(rename = "ulTimeStamp")]
    timestamp: String,
    #[serde(rename = "eServiceId")]
    service_id: i32,
    #[serde(rename = "eActionType")]
    action_type: i32,
    #[serde(rename = "eRegionId")]
    region_id: i32,
    #[serde(rename = "ePayloadType")]
    payload_type: i32,
    #[serde(rename = "eCommId")]
    comm_id: i32,
    #[serde(rename = "usDbVer")]
    db_version: u16,
    #[serde(rename = "usHwVer")]
    hw_version: u16,
    #[serde(rename = "usSwVer")]
    sw_version: u16,
    #[serde(rename = "ulPayloadLength")]
    payload_length: i32,
    #[serde(rename = "ulPayloadCrc32")]
    payload_crc32: i32,
    #[serde(rename = "Road Condition")]
    road: i32,
    #[serde(rename = "Weather Condition")]
    weather: i32,
    #[serde(rename = "PDR")]
    pdr: f64,
    #[serde(rename = "Throughput")]
    throughput: f64,
    #[serde(rename = "Latency")]
    latency: f64,
    #[serde(rename = "Distance")]
    distance: f64,
    rx_latitude: f64,
    rx_longitude: f64,
    #[serde(rename = "Mileage")]
    mileage: f64,
}

impl LogRow {
    fn new(index: usize, record: &LogRecord, mileage: f64) -> Self {
        let t = &record.telemetry;
        Self {
            index,
            device_type: t.device_type as i32,
            telecomm_type: t.telecomm_type as i32,
            device_id: t.device_id as i32,
            timestamp: record.arrived_at.format(TIMESTAMP_FORMAT).to_string(),
            service_id: t.service_id as i32,
            action_type: t.action_type as i32,
            region_id: t.region_id as i32,
            payload_type: t.payload_type as i32,
            comm_id: t.comm_id as i32,
            db_version: t.db_version,
            hw_version: t.hw_version,
            sw_version: t.sw_version,
            payload_length: t.payload_length as i32,
            payload_crc32: t.payload_crc32 as i32,
            road: record.conditions.road,
            weather: record.conditions.weather,
            pdr: record.pdr,
            throughput: record.throughput_mbps,
            latency: record.latency_ms,
            distance: record.distance_m,
            rx_latitude: record.position.latitude,
            rx_longitude: record.position.longitude,
            mileage,
        }
    }
}

/// Write `records` to a new CSV file at `path`, creating parent directories.
///
/// Row numbers and mileage both start at zero for each file. Returns the
/// total mileage in meters.
pub fn write_log_file(path: &Path, records: &[LogRecord]) -> Result<f64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LinkError::persistence(path, e))?;
    }

    let mut wtr = csv::Writer::from_path(path).map_err(|e| LinkError::persistence(path, e))?;
    let mut mileage = 0.0;
    let mut previous: Option<Position> = None;

    for (index, record) in records.iter().enumerate() {
        if let Some(previous) = previous {
            mileage += previous.haversine_m(&record.position);
        }
        previous = Some(record.position);
        wtr.serialize(LogRow::new(index, record, mileage))
            .map_err(|e| LinkError::persistence(path, e))?;
    }
    wtr.flush().map_err(|e| LinkError::persistence(path, e))?;
    Ok(mileage)
}

/// File for the window `start..end`, inside a directory named after `end`'s date.
pub fn log_path(config: &LogConfig, start: DateTime<Local>, end: DateTime<Local>) -> PathBuf {
    let name = format!(
        "{}_{}_{}_{}seconds.csv",
        config.prefix,
        start.format("%Y.%m.%d.%H.%M"),
        end.format("%Y.%m.%d.%H.%M"),
        config.rotate_secs
    );
    config.dir.join(end.format("%Y.%m.%d").to_string()).join(name)
}

/// Background writer that rotates the log file on a fixed interval
///
/// Records collected during a window are written when the window closes. A
/// failed write is reported and the batch is kept, so the next file covers the
/// longer window. Pending records are flushed when the token is cancelled.
pub struct LogBook;

impl LogBook {
    pub fn spawn(
        config: LogConfig,
        records: mpsc::UnboundedReceiver<LogRecord>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::writer_task(config, records, cancel))
    }

    async fn writer_task(
        config: LogConfig,
        mut records: mpsc::UnboundedReceiver<LogRecord>,
        cancel: CancellationToken,
    ) {
        info!("Log book writing to {} every {}s", config.dir.display(), config.rotate_secs);
        let period = config.rotate_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut window_start = Local::now();
        let mut pending = Vec::new();
        let mut windows = 0u64;
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Local::now();
                    if Self::rotate(&config, &mut pending, window_start, now).await {
                        window_start = now;
                        windows += 1;
                    }
                }
                record = records.recv(), if open => match record {
                    Some(record) => pending.push(record),
                    None => {
                        debug!("Log record feed closed");
                        open = false;
                    }
                },
            }
        }

        while let Ok(record) = records.try_recv() {
            pending.push(record);
        }
        if Self::rotate(&config, &mut pending, window_start, Local::now()).await {
            windows += 1;
        }
        info!("Log book stopped ({} windows closed)", windows);
    }

    /// Write every pending record that arrived by `now`.
    ///
    /// Returns true when the window was closed, either by a successful write or
    /// because there was nothing to write.
    async fn rotate(
        config: &LogConfig,
        pending: &mut Vec<LogRecord>,
        start: DateTime<Local>,
        now: DateTime<Local>,
    ) -> bool {
        let split = pending.partition_point(|r| r.arrived_at <= now);
        if split == 0 {
            trace!("No log records in window");
            return true;
        }

        let batch: Vec<LogRecord> = pending.drain(..split).collect();
        let path = log_path(config, start, now);
        let task_path = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            let result = write_log_file(&task_path, &batch);
            (batch, result)
        })
        .await;

        match written {
            Ok((batch, Ok(mileage))) => {
                debug!("Wrote {} rows to {} ({:.1} m)", batch.len(), path.display(), mileage);
                true
            }
            Ok((mut batch, Err(e))) => {
                error!("{} ({} rows kept for retry): {:?}", e, batch.len(), e.recovery_suggestions());
                batch.append(pending);
                *pending = batch;
                false
            }
            Err(e) => {
                error!("Log book write task failed for {}: {}", path.display(), e);
                false
            }
        }
    }
}
