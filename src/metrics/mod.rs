//! Link metric derivations.
//!
//! The pure functions here ([`packet_delivery_ratio`], [`one_way_latency_ms`],
//! [`throughput_mbps`]) hold the arithmetic; [`MetricsEngine`] runs them on a
//! cadence over already-decoded inputs.

mod engine;
mod latency;
mod pdr;
mod throughput;

pub use engine::{MetricInputs, MetricsChannels, MetricsEngine, MetricsSettings};
pub use latency::one_way_latency_ms;
pub use pdr::{PdrWindow, packet_delivery_ratio};
pub use throughput::{
    BYTES_PER_MEGABIT, ByteCounter, CounterSource, InterfaceCounter, SharedByteCounter,
    throughput_mbps,
};
