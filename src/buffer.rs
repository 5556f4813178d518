//! Growable byte buffers owned by a connection.
//!
//! Each control connection owns two of these: one for bytes received from the
//! peer and one for replies waiting to be delivered. Bytes are appended at the
//! tail and consumed from the head; `drain` is the only way the read position
//! moves, so no caller ever does offset bookkeeping of its own.

use bytes::{Buf, Bytes, BytesMut};

/// Default initial capacity for connection buffers.
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Append-at-tail, drain-from-head byte buffer.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes at the tail.
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Move every byte of `other` to the tail of this buffer.
    ///
    /// `other` is left empty.
    pub fn append_buffer(&mut self, other: &mut ByteBuffer) {
        let moved = other.inner.split();
        self.inner.unsplit(moved);
    }

    /// View the buffered bytes from the current head.
    pub fn peek(&self) -> &[u8] {
        &self.inner
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Discard `n` bytes from the head.
    ///
    /// Draining more than `len()` empties the buffer.
    pub fn drain(&mut self, n: usize) {
        let n = n.min(self.inner.len());
        self.inner.advance(n);
    }

    /// Remove every trailing occurrence of `byte` from the tail.
    pub fn trim_end(&mut self, byte: u8) {
        let keep = self
            .inner
            .iter()
            .rposition(|&b| b != byte)
            .map_or(0, |i| i + 1);
        self.inner.truncate(keep);
    }

    /// Take the whole contents, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.inner.split().freeze()
    }

    /// Tail region for tokio's `read_buf` to fill.
    pub(crate) fn read_target(&mut self) -> &mut BytesMut {
        &mut self.inner
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_drain() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.peek(), b"hello world");

        buf.drain(6);
        assert_eq!(buf.peek(), b"world");

        buf.drain(100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_append_buffer_empties_source() {
        let mut out = ByteBuffer::from(&b"head:"[..]);
        let mut body = ByteBuffer::new();
        body.append(b"one ");
        body.append(b"two");

        out.append_buffer(&mut body);
        assert_eq!(out.peek(), b"head:one two");
        assert!(body.is_empty());

        // Source stays usable after the move
        body.append(b"three");
        assert_eq!(body.peek(), b"three");
    }

    #[test]
    fn test_trim_end() {
        let mut buf = ByteBuffer::from(&b"a\nb\n\n\n"[..]);
        buf.trim_end(b'\n');
        assert_eq!(buf.peek(), b"a\nb");

        buf.trim_end(b'\n');
        assert_eq!(buf.peek(), b"a\nb");

        let mut only = ByteBuffer::from(&b"\n\n"[..]);
        only.trim_end(b'\n');
        assert!(only.is_empty());
    }

    #[test]
    fn test_take() {
        let mut buf = ByteBuffer::from(&b"reply\n"[..]);
        let data = buf.take();
        assert_eq!(&data[..], b"reply\n");
        assert!(buf.is_empty());
    }
}
