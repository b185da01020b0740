//! Entity record framing
//!
//! One record is one stored instance state:
//!
//! ```text
//! [length: u64][type_id: u64][object_id: u64][payload: length - 24 bytes]
//! ```
//!
//! `length` covers header plus payload. A buffer whose size disagrees with
//! its declared length is corrupt and rejected up front, before any payload
//! is touched.

use crate::cursor::{ByteReader, ByteWriter};
use stow_core::error::{FormatError, Result};
use stow_core::types::{ObjectId, TypeId};

/// Size of the record header in bytes: length + type id + object id.
pub const HEADER_LEN: usize = 24;

/// Decoded entity record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Exact byte count of header plus payload.
    pub length: u64,
    /// Schema of the payload.
    pub type_id: TypeId,
    /// Identity of the stored instance.
    pub object_id: ObjectId,
}

impl RecordHeader {
    /// Payload byte count implied by the header.
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LEN)
    }
}

/// Writer for one entity record.
///
/// The header is reserved up front and patched on [`RecordWriter::finish`],
/// once the payload size is known. Payload fields are written through the
/// embedded [`ByteWriter`].
#[derive(Debug)]
pub struct RecordWriter {
    writer: ByteWriter,
}

impl RecordWriter {
    /// Start a record for the given type and object id.
    pub fn new(type_id: TypeId, object_id: ObjectId) -> Self {
        let mut writer = ByteWriter::with_capacity(64);
        writer.write_u64(0); // length, patched in finish()
        writer.write_u64(type_id.as_u64());
        writer.write_u64(object_id.as_u64());
        Self { writer }
    }

    /// Payload writer.
    pub fn payload(&mut self) -> &mut ByteWriter {
        &mut self.writer
    }

    /// Finalize the record: patch the length field and return the bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let total = self.writer.len() as u64;
        self.writer.patch_u64(0, total)?;
        Ok(self.writer.into_bytes())
    }
}

/// A parsed view over one entity record.
///
/// Parsing validates the framing only; payload interpretation is up to the
/// type handler resolved from the header's type id.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    /// Decoded header.
    pub header: RecordHeader,
    payload: &'a [u8],
}

impl<'a> RecordView<'a> {
    /// Parse a buffer holding exactly one record.
    ///
    /// Fails if the buffer is shorter than a header or its size disagrees
    /// with the declared length.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(FormatError::UnexpectedEof {
                needed: HEADER_LEN,
                offset: 0,
                available: buf.len(),
            }
            .into());
        }

        let mut reader = ByteReader::new(buf);
        let length = reader.read_u64()?;
        let type_id = TypeId::new(reader.read_u64()?);
        let object_id = ObjectId::new(reader.read_u64()?);

        if length as usize != buf.len() || length < HEADER_LEN as u64 {
            return Err(FormatError::InvalidLength {
                declared: length,
                actual: buf.len(),
            }
            .into());
        }

        Ok(Self {
            header: RecordHeader {
                length,
                type_id,
                object_id,
            },
            payload: &buf[HEADER_LEN..],
        })
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// A bounds-checked reader over the payload.
    pub fn payload_reader(&self) -> ByteReader<'a> {
        ByteReader::new(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stow_core::error::Error;

    #[test]
    fn test_record_roundtrip() {
        let mut record = RecordWriter::new(TypeId::new(17), ObjectId::new(1_000_001));
        record.payload().write_i64(-5);
        record.payload().write_text("name");
        let bytes = record.finish().unwrap();

        let view = RecordView::parse(&bytes).unwrap();
        assert_eq!(view.header.length as usize, bytes.len());
        assert_eq!(view.header.type_id, TypeId::new(17));
        assert_eq!(view.header.object_id, ObjectId::new(1_000_001));

        let mut reader = view.payload_reader();
        assert_eq!(reader.read_i64().unwrap(), -5);
        assert_eq!(reader.read_text().unwrap(), "name");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_empty_payload() {
        let record = RecordWriter::new(TypeId::new(1), ObjectId::new(2));
        let bytes = record.finish().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);

        let view = RecordView::parse(&bytes).unwrap();
        assert_eq!(view.header.payload_len(), 0);
        assert!(view.payload().is_empty());
    }

    #[test]
    fn test_parse_short_buffer() {
        let err = RecordView::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_parse_truncated_record() {
        let mut record = RecordWriter::new(TypeId::new(1), ObjectId::new(2));
        record.payload().write_text("payload data");
        let mut bytes = record.finish().unwrap();
        bytes.truncate(bytes.len() - 4);

        let err = RecordView::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_parse_inflated_length() {
        let mut record = RecordWriter::new(TypeId::new(1), ObjectId::new(2));
        record.payload().write_u64(9);
        let mut bytes = record.finish().unwrap();
        // Corrupt the length field upward.
        let inflated = bytes.len() as u64 + 100;
        bytes[0..8].copy_from_slice(&inflated.to_le_bytes());

        assert!(RecordView::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_length_below_header() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0..8].copy_from_slice(&8u64.to_le_bytes());
        // Buffer length (24) disagrees with declared length (8).
        assert!(RecordView::parse(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn prop_record_framing_roundtrip(type_id: u64, oid: u64, payload: Vec<u8>) {
            let mut record = RecordWriter::new(TypeId::new(type_id), ObjectId::new(oid));
            record.payload().write_bytes(&payload);
            let bytes = record.finish().unwrap();

            let view = RecordView::parse(&bytes).unwrap();
            prop_assert_eq!(view.header.type_id.as_u64(), type_id);
            prop_assert_eq!(view.header.object_id.as_u64(), oid);
            prop_assert_eq!(view.payload(), &payload[..]);
        }

        #[test]
        fn prop_parse_never_panics(data: Vec<u8>) {
            let _ = RecordView::parse(&data);
        }
    }
}
