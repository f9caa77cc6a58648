//! Receive buffer for the scanner wire protocol.
//!
//! The decoder never assumes a whole record is available, so the buffer
//! exposes "take a line" and "take a delimited field" operations that either
//! consume a complete unit or leave the bytes untouched. Unconsumed partial
//! data stays at the logical front so fresh reads append contiguously.

use bytes::{Buf, BytesMut};

use super::{FIELD_SEPARATOR, ProtocolError};

/// How a field was terminated on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEnd {
    /// The ` <|> ` separator.
    Separator,
    /// A record-closing newline.
    Newline,
}

/// One delimited field taken off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub text: String,
    pub end: FieldEnd,
}

/// Fixed-capacity receive buffer with front compaction.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append freshly read bytes. A single field larger than the whole
    /// buffer can never complete, so overflow is a protocol error rather
    /// than a resize.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.buf.len() + data.len() > self.capacity {
            return Err(ProtocolError::BufferOverflow {
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take one `\n`-terminated line, without the terminator. Trailing `\r`
    /// is stripped. Returns `None` when no full line is buffered yet.
    pub fn take_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(end);
        self.buf.advance(1);
        let mut text = String::from_utf8_lossy(&line).into_owned();
        if text.ends_with('\r') {
            text.pop();
        }
        Some(text)
    }

    /// Take one field, terminated by either the ` <|> ` separator or a
    /// newline. Returns `None` when neither terminator is buffered, leaving
    /// the partial field in place.
    pub fn take_field(&mut self) -> Option<Field> {
        let sep = find(&self.buf, FIELD_SEPARATOR.as_bytes());
        let nl = self.buf.iter().position(|&b| b == b'\n');

        let (end, len, kind) = match (sep, nl) {
            (Some(s), Some(n)) if s < n => (s, FIELD_SEPARATOR.len(), FieldEnd::Separator),
            (Some(s), None) => (s, FIELD_SEPARATOR.len(), FieldEnd::Separator),
            (_, Some(n)) => (n, 1, FieldEnd::Newline),
            (None, None) => return None,
        };

        let raw = self.buf.split_to(end);
        self.buf.advance(len);
        let mut text = String::from_utf8_lossy(&raw).into_owned();
        if kind == FieldEnd::Newline && text.ends_with('\r') {
            text.pop();
        }
        Some(Field { text, end: kind })
    }

}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
