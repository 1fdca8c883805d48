//! Received-byte counters and throughput derivation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sysinfo::Networks;
use tracing::trace;

/// Bytes per second that make one megabit per second.
pub const BYTES_PER_MEGABIT: f64 = 125_000.0;

/// Throughput in Mbps between two readings one second apart.
///
/// A counter that went backwards (interface reset, reconnect) yields 0.
pub fn throughput_mbps(start: u64, end: u64) -> f64 {
    end.checked_sub(start).map_or(0.0, |delta| delta as f64 / BYTES_PER_MEGABIT)
}

/// Source of a cumulative received-byte count.
///
/// Implementations may block briefly; the engine reads them off the runtime
/// threads.
pub trait ByteCounter: Clone + Send + Sync + 'static {
    /// Cumulative bytes received, or `None` when the source is unavailable.
    fn received_bytes(&self) -> Option<u64>;
}

/// Counter fed directly by the stream driver.
#[derive(Debug, Clone, Default)]
pub struct SharedByteCounter(Arc<AtomicU64>);

impl SharedByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl ByteCounter for SharedByteCounter {
    fn received_bytes(&self) -> Option<u64> {
        Some(self.total())
    }
}

/// Per-interface receive counter read through `sysinfo`.
#[derive(Clone)]
pub struct InterfaceCounter {
    interface: String,
    networks: Arc<Mutex<Networks>>,
}

impl InterfaceCounter {
    pub fn new(interface: impl Into<String>) -> Self {
        let networks = Networks::new_with_refreshed_list();
        Self { interface: interface.into(), networks: Arc::new(Mutex::new(networks)) }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Names of the interfaces currently visible to the host.
    pub fn available() -> Vec<String> {
        Networks::new_with_refreshed_list().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl std::fmt::Debug for InterfaceCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceCounter").field("interface", &self.interface).finish()
    }
}

impl ByteCounter for InterfaceCounter {
    fn received_bytes(&self) -> Option<u64> {
        let mut networks = self.networks.lock().ok()?;
        if networks.iter().any(|(name, _)| name.as_str() == self.interface) {
            networks.refresh();
        } else {
            // Interface may have come up after the counter was created
            networks.refresh_list();
        }
        let bytes = networks
            .iter()
            .find(|(name, _)| name.as_str() == self.interface)
            .map(|(_, data)| data.total_received());
        trace!("{} rx bytes: {:?}", self.interface, bytes);
        bytes
    }
}

/// Either counter source, chosen from configuration.
#[derive(Debug, Clone)]
pub enum CounterSource {
    Socket(SharedByteCounter),
    Interface(InterfaceCounter),
}

impl ByteCounter for CounterSource {
    fn received_bytes(&self) -> Option<u64> {
        match self {
            CounterSource::Socket(counter) => counter.received_bytes(),
            CounterSource::Interface(counter) => counter.received_bytes(),
        }
    }
}
