//! Binary record codec for stowdb
//!
//! Defines the wire layout of one serialized entity and the primitive
//! read/write operations over a byte cursor:
//! - ByteReader / ByteWriter: bounds-checked little-endian cursors
//! - RecordHeader / RecordView: entity record framing
//!
//! # Binary Format
//!
//! One entity record is `[length: u64][type_id: u64][object_id: u64][payload]`
//! where `length` is the exact byte count of header plus payload. All
//! integers are little-endian. Variable-length values are length-prefixed
//! (4-byte length + bytes); reference slots are an inline 8-byte object id.
//! Readers never read past `length`; a truncated or overrun record is a
//! fatal format error, never retried.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod record;

pub use cursor::{ByteReader, ByteWriter};
pub use record::{RecordHeader, RecordView, RecordWriter, HEADER_LEN};
