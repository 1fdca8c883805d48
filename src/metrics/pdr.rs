//! Packet delivery ratio over one sampling interval

use crate::wire::SEQUENCE_WRAP;

/// PDR for the sequence numbers seen during one interval, in arrival order.
///
/// `count * 100 / (last - first + 1)`, with `last` unwrapped by one sequence
/// period when it is smaller than `first`. No samples yields 0. Duplicates and
/// reordering are counted as-is, so the raw value can exceed 100 unless `clamp`
/// is set.
pub fn packet_delivery_ratio(sequences: &[u32], clamp: bool) -> f64 {
    let mut window = PdrWindow::default();
    for &sequence in sequences {
        window.record(sequence);
    }
    window.ratio(clamp)
}

/// Running first/last/count for an interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdrWindow {
    first: Option<u32>,
    last: u32,
    count: u64,
}

impl PdrWindow {
    pub fn record(&mut self, sequence: u32) {
        if self.first.is_none() {
            self.first = Some(sequence);
        }
        self.last = sequence;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn ratio(&self, clamp: bool) -> f64 {
        let Some(first) = self.first else {
            return 0.0;
        };
        let mut last = self.last as i64;
        if last < first as i64 {
            last += SEQUENCE_WRAP as i64;
        }
        let span = last - first as i64 + 1;
        if span <= 0 {
            return 0.0;
        }

        let pdr = self.count as f64 * 100.0 / span as f64;
        if clamp { pdr.clamp(0.0, 100.0) } else { pdr }
    }

    /// Ratio for the closed interval, resetting for the next one.
    pub fn take(&mut self, clamp: bool) -> f64 {
        let pdr = self.ratio(clamp);
        *self = Self::default();
        pdr
    }
}
