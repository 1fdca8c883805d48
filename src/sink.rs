//! Payload sinks fed by the receive path

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::types::ScanlinePayload;

/// Consumer of decoded video scanlines
///
/// Runs on the driver task; must not block.
pub trait FrameSink: Send + 'static {
    fn on_scanline(&mut self, scanline: &ScanlinePayload);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn on_scanline(&mut self, _scanline: &ScanlinePayload) {}
}

/// A completed video frame assembled from scanlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasFrame {
    pub rows: usize,
    pub row_bytes: usize,
    /// Row-major pixel bytes, `rows * row_bytes` long
    pub pixels: Arc<[u8]>,
}

impl CanvasFrame {
    pub fn row(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.row_bytes)?;
        self.pixels.get(start..start + self.row_bytes)
    }
}

/// Assembles scanlines into frames.
///
/// Rows overwrite their slot in a working canvas. When a row index arrives that
/// is not greater than the previous one the sender has started a new frame, so
/// the working canvas is published. Rows outside the canvas are ignored.
pub struct ScanlineCanvas {
    rows: usize,
    row_bytes: usize,
    working: Vec<u8>,
    last_row: Option<i16>,
    frames: watch::Sender<Option<Arc<CanvasFrame>>>,
}

impl ScanlineCanvas {
    /// 300x300 RGB, the sender's capture size.
    pub const DEFAULT_ROWS: usize = 300;
    pub const DEFAULT_ROW_BYTES: usize = 300 * 3;

    pub fn new(rows: usize, row_bytes: usize) -> (Self, watch::Receiver<Option<Arc<CanvasFrame>>>) {
        let (frames, rx) = watch::channel(None);
        let canvas =
            Self { rows, row_bytes, working: vec![0; rows * row_bytes], last_row: None, frames };
        (canvas, rx)
    }

    fn publish(&mut self) {
        let frame = CanvasFrame {
            rows: self.rows,
            row_bytes: self.row_bytes,
            pixels: Arc::from(self.working.as_slice()),
        };
        self.frames.send_replace(Some(Arc::new(frame)));
        trace!("Canvas frame published");
    }
}

impl FrameSink for ScanlineCanvas {
    fn on_scanline(&mut self, scanline: &ScanlinePayload) {
        if self.last_row.is_some_and(|last| scanline.row <= last) {
            self.publish();
        }
        self.last_row = Some(scanline.row);

        let Ok(row) = usize::try_from(scanline.row) else {
            return;
        };
        if row >= self.rows {
            return;
        }
        let start = row * self.row_bytes;
        let len = scanline.pixels.len().min(self.row_bytes);
        self.working[start..start + len].copy_from_slice(&scanline.pixels[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_published_when_rows_wrap() {
        let (mut canvas, rx) = ScanlineCanvas::new(3, 2);
        canvas.on_scanline(&ScanlinePayload::new(0, vec![1, 1]));
        canvas.on_scanline(&ScanlinePayload::new(1, vec![2, 2]));
        canvas.on_scanline(&ScanlinePayload::new(2, vec![3, 3]));
        assert!(rx.borrow().is_none());

        canvas.on_scanline(&ScanlinePayload::new(0, vec![4, 4]));
        let frame = rx.borrow().clone().unwrap();
        assert_eq!(frame.pixels.as_ref(), &[1, 1, 2, 2, 3, 3]);
        assert_eq!(frame.row(1), Some(&[2u8, 2][..]));
        assert_eq!(frame.row(3), None);
    }

    #[test]
    fn out_of_range_and_oversized_rows_are_contained() {
        let (mut canvas, rx) = ScanlineCanvas::new(2, 2);
        canvas.on_scanline(&ScanlinePayload::new(-1, vec![9, 9]));
        canvas.on_scanline(&ScanlinePayload::new(0, vec![5, 6, 7, 8]));
        canvas.on_scanline(&ScanlinePayload::new(7, vec![9, 9]));
        canvas.on_scanline(&ScanlinePayload::new(1, vec![1]));

        let frame = rx.borrow().clone().unwrap();
        assert_eq!(frame.pixels.as_ref(), &[5, 6, 0, 0]);
    }
}
