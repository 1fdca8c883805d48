//! Reassembly buffer for frames split across socket reads

use super::codec::{Decoded, HeaderLayout, decode};

/// Bytes held between reads.
///
/// Holds exactly the unconsumed tail of the previous decode. Consuming only
/// advances a read offset; storage is compacted lazily on the next append.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    data: Vec<u8>,
    start: usize,
}

impl ReassemblyBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), start: 0 }
    }

    /// Append a received chunk behind any retained bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.data.drain(..self.start);
            self.start = 0;
        }
        self.data.extend_from_slice(chunk);
    }

    /// Bytes not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.start..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.data.len());
    }

    /// Forget everything, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Append `chunk`, decode, and keep only the incomplete tail.
    pub fn feed(&mut self, chunk: &[u8], layout: &HeaderLayout) -> Decoded {
        self.extend(chunk);
        let decoded = decode(self.pending(), layout);
        self.consume(decoded.consumed);
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{inbound_ping_reply, inbound_video_frame};

    #[test]
    fn split_frame_is_completed_by_next_chunk() {
        let frame = inbound_video_frame(11, 2, &[0xAB; 300]);
        let mut buffer = ReassemblyBuffer::default();

        let first = buffer.feed(&frame[..10], &HeaderLayout::INBOUND);
        assert!(first.frames.is_empty());
        assert_eq!(buffer.pending(), &frame[..10]);

        let second = buffer.feed(&frame[10..], &HeaderLayout::INBOUND);
        assert_eq!(second.frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn tail_of_one_read_prefixes_the_next() {
        let a = inbound_ping_reply(1, 2, 3);
        let b = inbound_ping_reply(4, 5, 6);
        let mut stream = a.clone();
        stream.extend(&b);

        let cut = a.len() + 5;
        let mut buffer = ReassemblyBuffer::with_capacity(64);
        assert_eq!(buffer.feed(&stream[..cut], &HeaderLayout::INBOUND).frames.len(), 1);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.feed(&stream[cut..], &HeaderLayout::INBOUND).frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn clear_discards_retained_bytes() {
        let mut buffer = ReassemblyBuffer::default();
        buffer.extend(&[0xF3, 0xF2, 0x00]);
        buffer.consume(1);
        assert_eq!(buffer.pending(), &[0xF2, 0x00]);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.consume(10);
        assert!(buffer.is_empty());
    }
}
