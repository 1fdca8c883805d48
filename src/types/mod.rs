//! Core types for link data representation.
//!
//! ## Architecture
//!
//! - [`Frame`] is the closed set of messages the codec can produce
//! - [`DataFrame`] carries the telemetry header and a classified payload
//! - [`Position`] provides haversine distance between two fixes
//! - [`MetricSample`] is one tick of derived link metrics
//! - [`clock`] converts wall-clock time to the minute-relative ticks used by pings
//!
//! ## Usage Example
//!
//! ```rust
//! use sensorlink::types::{Frame, Position};
//!
//! let frame = Frame::Ping {
//!     receiver_send_time: 1_000,
//!     sender_recv_time: 2_000,
//!     sender_send_time: 2_000,
//! };
//! assert_eq!(frame.kind(), "ping");
//!
//! let seoul = Position::new(37.5665, 126.9780);
//! assert!(seoul.is_valid());
//! ```

pub mod clock;
mod frame;
mod position;
mod sample;

pub use frame::{DataFrame, Frame, PayloadKind, ScanlinePayload};
pub use position::{EARTH_RADIUS_M, Position};
pub use sample::{ConditionCodes, MetricSample};
