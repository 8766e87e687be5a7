//! Append-only output buffer for interactive sessions

mod ansi;

pub use ansi::{strip_ansi, AnsiStripper};

use bytes::BytesMut;

/// Initial capacity reserved for a session's output
const INITIAL_CAPACITY: usize = 8192;

/// Accumulates everything a remote shell has written.
///
/// The buffer only grows. Readers remember the length at the point they
/// care about and later ask for everything written since that offset, so
/// output that arrives between a send and the following wait is never lost.
#[derive(Debug)]
pub struct OutputBuffer {
    buffer: BytesMut,
    stripper: Option<AnsiStripper>,
}

impl OutputBuffer {
    /// Create an empty buffer, optionally stripping ANSI escape sequences
    pub fn new(strip_ansi: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            stripper: strip_ansi.then(AnsiStripper::new),
        }
    }

    /// Append a chunk read from the channel; returns the bytes actually stored
    pub fn append(&mut self, data: &[u8]) -> usize {
        match &mut self.stripper {
            Some(stripper) => {
                let clean = stripper.feed(data);
                self.buffer.extend_from_slice(&clean);
                clean.len()
            }
            None => {
                self.buffer.extend_from_slice(data);
                data.len()
            }
        }
    }

    /// Current length, usable as an offset for [`OutputBuffer::since`]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes appended at or after `offset`
    pub fn since(&self, offset: usize) -> &[u8] {
        &self.buffer[offset.min(self.buffer.len())..]
    }

    /// Text appended at or after `offset`, invalid UTF-8 replaced
    pub fn text_since(&self, offset: usize) -> String {
        String::from_utf8_lossy(self.since(offset)).into_owned()
    }

    /// Text appended in `start..end`; both ends are clamped to the buffer
    pub fn text_between(&self, start: usize, end: usize) -> String {
        let end = end.min(self.buffer.len());
        String::from_utf8_lossy(&self.buffer[start.min(end)..end]).into_owned()
    }

    /// The entire accumulated output as text
    pub fn text(&self) -> String {
        self.text_since(0)
    }
}
