//! Partial-write producer for an encoded frame.

use bytes::Bytes;

/// Hands out an encoded frame in pieces no larger than the transport's
/// current send window, resuming where the previous piece ended.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    data: Bytes,
    offset: usize,
}

impl FrameWriter {
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Next piece of at most `window` bytes, or `None` once everything has
    /// been handed out (or the window is closed).
    pub fn next_chunk(&mut self, window: usize) -> Option<Bytes> {
        let n = window.min(self.remaining());
        if n == 0 {
            return None;
        }
        let chunk = self.data.slice(self.offset..self.offset + n);
        self.offset += n;
        Some(chunk)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn written(&self) -> usize {
        self.offset
    }

    pub fn is_finished(&self) -> bool {
        self.offset == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pieces_preserve_order_without_repeats() {
        let mut writer = FrameWriter::new(Bytes::from_static(b"GET /mpd HTTP/1.1\r\n\r\n"));
        let mut out = Vec::new();
        let windows = [3usize, 0, 5, 1, 100];
        for w in windows {
            if let Some(chunk) = writer.next_chunk(w) {
                assert!(chunk.len() <= w);
                out.extend_from_slice(&chunk);
            }
        }
        assert_eq!(out, b"GET /mpd HTTP/1.1\r\n\r\n");
        assert!(writer.is_finished());
        assert_eq!(writer.next_chunk(10), None);
    }

    #[test]
    fn test_closed_window_yields_nothing() {
        let mut writer = FrameWriter::new(Bytes::from_static(b"abc"));
        assert_eq!(writer.next_chunk(0), None);
        assert_eq!(writer.written(), 0);
        assert_eq!(writer.remaining(), 3);
    }
}
