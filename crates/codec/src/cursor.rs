//! Bounds-checked byte cursors
//!
//! All payload access goes through these two cursors; raw offsets never leave
//! the codec. Every read checks bounds against the enclosing buffer before
//! touching it, so a corrupt length field surfaces as a
//! [`FormatError::UnexpectedEof`] instead of reading foreign bytes.

use stow_core::error::{FormatError, Result};
use stow_core::types::ObjectId;

/// Bounds-checked reader over a borrowed byte buffer.
///
/// The reader tracks a position and refuses any read that would cross the end
/// of the buffer. All integers are little-endian.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current position from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True if the cursor has consumed the whole buffer.
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(FormatError::UnexpectedEof {
                needed: n,
                offset: self.pos,
                available: self.remaining(),
            }
            .into());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Read a little-endian f64.
    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Read a bool stored as one byte (0 = false, anything else = true).
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read a length-prefixed byte span (`u32` length + bytes).
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 text span.
    pub fn read_text(&mut self) -> Result<&'a str> {
        let bytes = self.read_var_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8.into())
    }

    /// Read a reference slot: an inline 8-byte object id.
    ///
    /// Decoding a reference never resolves it; resolution is deferred to the
    /// load session.
    pub fn read_reference(&mut self) -> Result<ObjectId> {
        Ok(ObjectId::new(self.read_u64()?))
    }
}

/// Appending little-endian writer over an owned buffer.
///
/// Appends cannot overflow (the buffer grows); only in-place patches are
/// bounds-checked, for fixing up a header after the payload size is known.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Borrow the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Append one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian f64.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a bool as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a length-prefixed byte span (`u32` length + bytes).
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    /// Append a length-prefixed UTF-8 text span.
    pub fn write_text(&mut self, text: &str) {
        self.write_var_bytes(text.as_bytes());
    }

    /// Append a reference slot: the object id, 8 bytes inline.
    pub fn write_reference(&mut self, oid: ObjectId) {
        self.write_u64(oid.as_u64());
    }

    /// Overwrite 8 bytes at `offset` with a little-endian u64.
    ///
    /// Used to fix up a length field once the payload size is known.
    pub fn patch_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        if offset + 8 > self.buf.len() {
            return Err(FormatError::WriteOverflow {
                needed: 8,
                offset,
                capacity: self.buf.len(),
            }
            .into());
        }
        self.buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
