//! Line buffering for flush-on-enter sends

use bytes::{Bytes, BytesMut};

/// Byte that flushes a pending line
pub const LINE_TERMINATOR: u8 = b'\r';

/// Outbound bytes held back until the user presses Enter
#[derive(Debug, Default)]
pub struct PendingLine {
    buf: BytesMut,
}

impl PendingLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data`. Returns the whole line, terminator included, when
    /// `data` is exactly the terminator; the buffer is then empty again.
    ///
    /// A terminator embedded in a longer chunk (a paste) does not flush.
    pub fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(data);
        if data == [LINE_TERMINATOR] {
            Some(self.buf.split().freeze())
        } else {
            None
        }
    }

    /// Drop whatever is pending
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
