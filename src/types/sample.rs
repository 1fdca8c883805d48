//! Metric samples and externally supplied condition codes

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::Position;

/// One tick's worth of derived link metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Packet delivery ratio in percent (0 when nothing arrived)
    pub pdr: f64,
    pub throughput_mbps: f64,
    /// Most recent one-way latency estimate (0 until the first ping reply)
    pub latency_ms: f64,
    /// Distance to the sender in meters
    pub distance_m: f64,
    /// Receiver position at sampling time
    pub position: Position,
    pub timestamp: DateTime<Local>,
}

impl MetricSample {
    /// Sample with every metric at its sentinel value.
    pub fn empty(position: Position, timestamp: DateTime<Local>) -> Self {
        Self { pdr: 0.0, throughput_mbps: 0.0, latency_ms: 0.0, distance_m: 0.0, position, timestamp }
    }
}

/// Road surface and weather codes from the external condition services.
///
/// Weather uses the precipitation-type code (0 none, 1 rain, 2 rain/snow, 3 snow,
/// 5 drizzle, 6 drizzle/snow flurries, 7 snow flurries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConditionCodes {
    pub road: i32,
    pub weather: i32,
}
