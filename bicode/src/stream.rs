//! Growable, cursor-addressed byte buffer backing every encode/decode call.
//!
//! A stream tracks three quantities: the cursor (`offset`), the high-water
//! mark (`len`, the reachable region) and the allocation (`capacity`).
//! Invariant: `offset <= len <= capacity`. Writes past `len` extend it and
//! grow the allocation geometrically; reads past `len` fail with
//! [`DecodeError::UnexpectedEof`].

use crate::error::DecodeError;

#[derive(Debug, Default)]
pub struct ByteStream {
    buffer: Vec<u8>,
    offset: usize,
    len: usize,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing buffer for decoding. The cursor starts at 0 and the
    /// reachable region is the whole input.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buffer = bytes.into();
        let len = buffer.len();
        Self {
            buffer,
            offset: 0,
            len,
        }
    }

    fn ensure_capacity(&mut self, needed: usize) {
        if needed > self.buffer.len() {
            let mut new_capacity = (self.buffer.len() * 2).max(1);
            while new_capacity < needed {
                new_capacity *= 2;
            }
            self.buffer.resize(new_capacity, 0);
        }
    }

    fn extend_to(&mut self, new_offset: usize) {
        if new_offset > self.len {
            self.ensure_capacity(new_offset);
            self.len = new_offset;
        }
    }

    pub fn write_byte(&mut self, value: u8) {
        self.extend_to(self.offset + 1);
        self.buffer[self.offset] = value;
        self.offset += 1;
    }

    pub fn write_buffer(&mut self, bytes: &[u8]) {
        let new_offset = self.offset + bytes.len();
        self.extend_to(new_offset);
        self.buffer[self.offset..new_offset].copy_from_slice(bytes);
        self.offset = new_offset;
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        if self.offset + 1 > self.len {
            return Err(DecodeError::UnexpectedEof);
        }
        let value = self.buffer[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn read_buffer(&mut self, count: usize) -> Result<&[u8], DecodeError> {
        let new_offset = self
            .offset
            .checked_add(count)
            .ok_or(DecodeError::UnexpectedEof)?;
        if new_offset > self.len {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buffer[self.offset..new_offset];
        self.offset = new_offset;
        Ok(slice)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the cursor. Seeking beyond the reachable region pre-grows the
    /// allocation without extending it, so a subsequent write lands in place.
    pub fn set_offset(&mut self, offset: usize) {
        self.ensure_capacity(offset);
        self.offset = offset;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The written region `[0, len)` only, not the full allocation.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buffer.truncate(self.len);
        self.buffer
    }
}
