//! A fixed-capacity byte ring buffer.
//!
//! The buffer never reallocates during a session. `read_pos == write_pos` is
//! ambiguous between empty and full, so a separate `full` flag disambiguates.

use std::borrow::Cow;

use crate::ProtocolError;
use conduit_utils::codec::VarInt;

/// A saved read position, used to rewind after a partial frame.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    read_pos: usize,
    full: bool,
}

/// A fixed-capacity byte ring buffer with wrap-around reads and writes.
pub struct RingBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    full: bool,
}

impl RingBuffer {
    /// Creates a ring buffer with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            full: false,
        }
    }

    /// The total capacity of the buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The number of buffered bytes not yet consumed.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        if self.write_pos > self.read_pos {
            self.write_pos - self.read_pos
        } else if self.read_pos == self.write_pos {
            if self.full { self.capacity() } else { 0 }
        } else {
            self.capacity() - self.read_pos + self.write_pos
        }
    }

    /// The number of bytes that can still be written.
    #[must_use]
    pub fn bytes_free(&self) -> usize {
        self.capacity() - self.bytes_used()
    }

    /// Whether the buffer is completely full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes_used() == 0
    }

    /// The contiguous writable region starting at the write position.
    ///
    /// Empty when the buffer is full. Bytes written here become visible only
    /// after [`Self::commit`].
    pub fn writable_window(&mut self) -> &mut [u8] {
        if self.full {
            return &mut [];
        }
        if self.read_pos > self.write_pos {
            &mut self.buf[self.write_pos..self.read_pos]
        } else {
            &mut self.buf[self.write_pos..]
        }
    }

    /// Commits `n` bytes written into the writable window.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.capacity() - self.bytes_used());
        self.write_pos = (self.write_pos + n) % self.capacity();
        if n > 0 && self.write_pos == self.read_pos {
            self.full = true;
        }
    }

    /// Copies `data` into the buffer, wrapping as needed.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > self.bytes_free() {
            return Err(ProtocolError::BufferOverflow);
        }
        let cap = self.capacity();
        let first = (cap - self.write_pos).min(data.len());
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..]);
        }
        self.write_pos = (self.write_pos + data.len()) % cap;
        if !data.is_empty() && self.write_pos == self.read_pos {
            self.full = true;
        }
        Ok(())
    }

    /// Saves the read position so an incomplete frame can be rewound.
    #[must_use]
    pub fn mark(&self) -> Mark {
        Mark {
            read_pos: self.read_pos,
            full: self.full,
        }
    }

    /// Restores a previously saved read position.
    pub fn rewind(&mut self, mark: Mark) {
        self.read_pos = mark.read_pos;
        self.full = mark.full;
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        if offset >= self.bytes_used() {
            return None;
        }
        Some(self.buf[(self.read_pos + offset) % self.capacity()])
    }

    fn advance(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n) % self.capacity();
        if n > 0 {
            self.full = false;
        }
    }

    /// Reads a varint off the front of the buffer, returning the value and
    /// the number of bytes it occupied.
    ///
    /// Does not consume anything when fewer bytes are buffered than the
    /// encoding needs; that case is [`ProtocolError::PartialFrame`].
    pub fn read_varint(&mut self) -> Result<(i32, usize), ProtocolError> {
        let mut val = 0i32;
        for i in 0..VarInt::MAX_SIZE {
            let Some(byte) = self.peek_at(i) else {
                return Err(ProtocolError::PartialFrame);
            };
            val |= (i32::from(byte) & 0x7F) << (i * 7);
            if byte & 0x80 == 0 {
                self.advance(i + 1);
                return Ok((val, i + 1));
            }
        }
        Err(ProtocolError::MalformedVarInt)
    }

    /// Takes `n` bytes off the front of the buffer.
    ///
    /// When the range wraps around the end of the buffer the bytes are
    /// materialized into a contiguous copy.
    pub fn take(&mut self, n: usize) -> Result<Cow<'_, [u8]>, ProtocolError> {
        if n > self.bytes_used() {
            return Err(ProtocolError::PartialFrame);
        }
        let start = self.read_pos;
        self.advance(n);
        if start + n <= self.capacity() {
            Ok(Cow::Borrowed(&self.buf[start..start + n]))
        } else {
            let mut out = Vec::with_capacity(n);
            out.extend_from_slice(&self.buf[start..]);
            out.extend_from_slice(&self.buf[..self.read_pos]);
            Ok(Cow::Owned(out))
        }
    }
}
