//! Reusable byte buffer for rendered wire lines.

use std::ops::Deref;

use bytes::BytesMut;

use crate::pool::Scrub;

/// A growable byte buffer holding one rendered IRC line.
///
/// Buffers are pooled ([`crate::pool::BUFFERS`]); clearing keeps the backing
/// allocation so steady-state rendering does not allocate.
#[derive(Debug, Default)]
pub struct LineBuffer {
    bytes: BytesMut,
}

impl LineBuffer {
    /// Append a string slice.
    pub fn push_str(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
    }

    /// Append a single byte.
    pub fn push_byte(&mut self, b: u8) {
        self.bytes.extend_from_slice(&[b]);
    }

    /// Append raw bytes.
    pub fn push_slice(&mut self, s: &[u8]) {
        self.bytes.extend_from_slice(s);
    }

    /// Number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The buffer contents as text, for log lines.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl Deref for LineBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Scrub for LineBuffer {
    fn scrub(&mut self) {
        self.bytes.clear();
    }
}
