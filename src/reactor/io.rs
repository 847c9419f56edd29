//! Byte buffers owned by each stream.
//!
//! The outbound side is a FIFO queue: writes append at the back and the
//! multiplexer consumes from the front as the socket accepts bytes. The
//! inbound side accumulates raw bytes and hands out complete lines.

/// Growable byte queue with a consumption cursor.
///
/// Consumed bytes are only compacted away once they make up at least half of
/// the allocation, so draining in small steps stays linear.
#[derive(Debug, Default)]
pub(crate) struct Buffer {
    data: Vec<u8>,
    start: usize,
    scanned: usize,
}

impl Buffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconsumed bytes, front first.
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Drops `count` bytes from the front.
    pub(crate) fn consume(&mut self, count: usize) {
        let count = count.min(self.len());
        self.start += count;
        self.scanned = self.scanned.saturating_sub(count);

        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        } else if self.start >= self.data.len() / 2 {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
        self.scanned = 0;
    }

    /// Removes the next `\n`-terminated line and returns it without its
    /// terminator (a trailing `\r` is stripped as well).
    ///
    /// Returns `None` while only a partial line is buffered; the fragment stays
    /// in place for the next read.
    pub(crate) fn take_line(&mut self) -> Option<Vec<u8>> {
        let pending = &self.data[self.start..];
        let Some(offset) = pending[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.data.len() - self.start;
            return None;
        };

        let end = self.scanned + offset;
        let mut line = pending[..end].to_vec();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        self.scanned = 0;
        self.consume(end + 1);

        Some(line)
    }
}
