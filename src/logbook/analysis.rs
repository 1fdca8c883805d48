//! Offline analysis of recorded log books
//!
//! Logs are loaded, rows with negative metrics dropped, statistical outliers
//! removed, and the remainder optionally averaged down for display. Metric values
//! can then be graded into ten equal bands for colouring a route.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::types::Position;
use crate::{LinkError, Result};

/// Number of grade bands.
pub const GRADE_BANDS: u8 = 10;

/// Metric columns of one log row.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LoggedMetrics {
    #[serde(rename = "PDR")]
    pub pdr: f64,
    #[serde(rename = "Latency")]
    pub latency: f64,
    #[serde(rename = "Throughput")]
    pub throughput: f64,
    #[serde(rename = "Distance")]
    pub distance: f64,
    pub rx_latitude: f64,
    pub rx_longitude: f64,
}

impl LoggedMetrics {
    pub fn position(&self) -> Position {
        Position::new(self.rx_latitude, self.rx_longitude)
    }
}

/// Analysis pipeline settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSettings {
    /// Rows whose latency, throughput or distance z-score reaches this are dropped
    pub z_threshold: f64,
    /// Rows averaged per output row; 0 or 1 disables downsampling
    pub window: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self { z_threshold: 3.0, window: 0 }
    }
}

/// Aggregate view of an analysed log set.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSummary {
    pub loaded: usize,
    pub kept: usize,
    pub mean_pdr: f64,
    pub mean_latency: f64,
    pub mean_throughput: f64,
    pub max_distance: f64,
    /// Haversine length of the route through the kept rows, meters
    pub route_length: f64,
}

/// Load and concatenate the metric columns of every file, in order.
pub fn load_logs<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<LoggedMetrics>> {
    let mut rows = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path).map_err(|e| LinkError::persistence(path, e))?;
        let before = rows.len();
        for row in reader.deserialize() {
            rows.push(row.map_err(|e| LinkError::persistence(path, e))?);
        }
        debug!("Loaded {} rows from {}", rows.len() - before, path.display());
    }
    Ok(rows)
}

/// Keep rows whose PDR, latency and throughput are all non-negative.
pub fn drop_negative(rows: &[LoggedMetrics]) -> Vec<LoggedMetrics> {
    rows.iter()
        .filter(|r| r.pdr >= 0.0 && r.latency >= 0.0 && r.throughput >= 0.0)
        .copied()
        .collect()
}

/// Keep rows whose latency, throughput and distance z-scores are all below
/// `threshold` in magnitude.
///
/// A column with fewer than two rows or zero spread contributes a z-score of 0.
pub fn remove_anomalies(rows: &[LoggedMetrics], threshold: f64) -> Vec<LoggedMetrics> {
    let latency = z_scores(rows.iter().map(|r| r.latency));
    let throughput = z_scores(rows.iter().map(|r| r.throughput));
    let distance = z_scores(rows.iter().map(|r| r.distance));

    rows.iter()
        .enumerate()
        .filter(|(i, _)| {
            latency[*i].abs() < threshold
                && throughput[*i].abs() < threshold
                && distance[*i].abs() < threshold
        })
        .map(|(_, r)| *r)
        .collect()
}

fn z_scores(values: impl Iterator<Item = f64> + Clone) -> Vec<f64> {
    let n = values.clone().count();
    if n < 2 {
        return vec![0.0; n];
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.clone().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return vec![0.0; n];
    }
    values.map(|v| (v - mean) / std_dev).collect()
}

/// Average consecutive runs of `window` rows into one row.
///
/// The position of each output row is the last position of its run; a short
/// final run is averaged over its own length.
pub fn downsample(rows: &[LoggedMetrics], window: usize) -> Vec<LoggedMetrics> {
    if window <= 1 {
        return rows.to_vec();
    }
    rows.chunks(window)
        .filter_map(|chunk| {
            let last = chunk.last()?;
            let n = chunk.len() as f64;
            let mean = |f: fn(&LoggedMetrics) -> f64| chunk.iter().map(f).sum::<f64>() / n;
            Some(LoggedMetrics {
                pdr: mean(|r| r.pdr),
                latency: mean(|r| r.latency),
                throughput: mean(|r| r.throughput),
                distance: mean(|r| r.distance),
                rx_latitude: last.rx_latitude,
                rx_longitude: last.rx_longitude,
            })
        })
        .collect()
}

/// Band index `0..GRADE_BANDS` of `value` on the scale `0..max`.
///
/// Band `i` covers `[i * max / 10, (i + 1) * max / 10)`; negative values land
/// in band 0 and values at or above the top of band 8 in band 9.
pub fn grade(value: f64, max: f64) -> u8 {
    if max <= 0.0 || value.is_nan() {
        return 0;
    }
    let band = (value / (max / GRADE_BANDS as f64)).floor();
    band.clamp(0.0, (GRADE_BANDS - 1) as f64) as u8
}

/// Lower and upper bounds of every grade band.
pub fn grade_bands(max: f64) -> Vec<(f64, f64)> {
    (0..GRADE_BANDS)
        .map(|i| {
            let step = max / GRADE_BANDS as f64;
            (i as f64 * step, (i + 1) as f64 * step)
        })
        .collect()
}

pub fn summarize(loaded: usize, rows: &[LoggedMetrics]) -> LogSummary {
    let kept = rows.len();
    let mean = |f: fn(&LoggedMetrics) -> f64| {
        if kept == 0 { 0.0 } else { rows.iter().map(f).sum::<f64>() / kept as f64 }
    };
    let route_length = rows
        .windows(2)
        .map(|pair| pair[0].position().haversine_m(&pair[1].position()))
        .sum();

    LogSummary {
        loaded,
        kept,
        mean_pdr: mean(|r| r.pdr),
        mean_latency: mean(|r| r.latency),
        mean_throughput: mean(|r| r.throughput),
        max_distance: rows.iter().map(|r| r.distance).fold(0.0, f64::max),
        route_length,
    }
}

/// Run the full pipeline over `paths`.
pub fn analyze<P: AsRef<Path>>(
    paths: &[P],
    settings: &AnalysisSettings,
) -> Result<(Vec<LoggedMetrics>, LogSummary)> {
    let loaded = load_logs(paths)?;
    let rows = drop_negative(&loaded);
    let rows = remove_anomalies(&rows, settings.z_threshold);
    let rows = downsample(&rows, settings.window);
    let summary = summarize(loaded.len(), &rows);
    info!("Analysed {} files: {} of {} rows kept", paths.len(), summary.kept, summary.loaded);
    Ok((rows, summary))
}
