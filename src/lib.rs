//! V2X sensor link: frame codec and telemetry derivation for a modem-relayed
//! video and telemetry stream.
//!
//! Sensorlink decodes the byte stream a V2X modem delivers, derives link
//! quality metrics from it, and builds the frames a transmitter sends.
//!
//! # Features
//!
//! - **Frame Codec**: resynchronising decoder for the modem's framed stream
//! - **Frame Builder**: video scanline and ping frames for the transmit side
//! - **Metrics**: packet delivery ratio, throughput, one-way latency and distance
//! - **Stream Driver**: reconnecting socket loop with a start/stop lifecycle
//! - **Log Book**: rotating CSV records and offline analysis
//!
//! ## Example (receiver)
//!
//! ```rust,no_run
//! use sensorlink::{LinkConfig, SensorLink};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> sensorlink::Result<()> {
//!     let config = LinkConfig::from_file("link.yaml")?;
//!     let connection = SensorLink::receive(&config).await?;
//!     connection.start();
//!
//!     let mut samples = Box::pin(connection.samples());
//!     while let Some(sample) = samples.next().await {
//!         println!("PDR {:.1}% latency {:.2} ms", sample.pdr, sample.latency_ms);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod wire;

// Link runtime
pub mod config;
pub mod connection;
pub mod driver;
pub mod metrics;
pub mod sink;
pub mod transport;

// Collaborator-facing helpers
pub mod gps;
pub mod logbook;

pub use error::*;
pub use types::*;

pub use config::{LinkConfig, LogConfig, StreamLayout};
pub use connection::{LinkControl, ReceiverConnection, TransmitterConnection};
pub use driver::LinkState;

/// Unified entry point for modem connections.
///
/// # Examples
///
/// ```rust,no_run
/// use sensorlink::{LinkConfig, SensorLink};
///
/// # #[tokio::main]
/// # async fn main() -> sensorlink::Result<()> {
/// let transmitter = SensorLink::transmit(&LinkConfig::default()).await?;
/// transmitter.start();
/// # Ok(())
/// # }
/// ```
pub struct SensorLink;

impl SensorLink {
    /// Open a receiving connection to the modem in `config`.
    ///
    /// The connection keeps reconnecting in the background; call
    /// [`ReceiverConnection::start`] to begin streaming once connected.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub async fn receive(config: &LinkConfig) -> Result<ReceiverConnection> {
        ReceiverConnection::connect(config).await
    }

    /// Open a transmitting connection to the modem in `config`.
    pub async fn transmit(config: &LinkConfig) -> Result<TransmitterConnection> {
        TransmitterConnection::connect(config).await
    }
}
