//! Type descriptors
//!
//! A TypeDescriptor is the ordered list of named, typed fields that defines
//! one type's payload layout. Field order is part of the schema: a TypeId is
//! bound to exactly one descriptor and never reused for a different one.

use crate::object::Obj;
use stow_codec::cursor::{ByteReader, ByteWriter};
use stow_core::error::{Error, Result};
use stow_core::types::ObjectId;
use std::fmt;

/// Kind of one field slot in a payload.
///
/// Fixed-size kinds are written inline; `Text` and `Bytes` are
/// length-prefixed; `Reference` is an inline 8-byte object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// 64-bit signed integer, 8 bytes inline.
    I64,
    /// 64-bit float, 8 bytes inline.
    F64,
    /// One byte, 0 or 1.
    Bool,
    /// Length-prefixed UTF-8 text.
    Text,
    /// Length-prefixed raw bytes.
    Bytes,
    /// Inline object id of a referenced object.
    Reference,
}

impl FieldKind {
    /// Dictionary token for this kind.
    pub fn token(self) -> &'static str {
        match self {
            FieldKind::I64 => "i64",
            FieldKind::F64 => "f64",
            FieldKind::Bool => "bool",
            FieldKind::Text => "text",
            FieldKind::Bytes => "bytes",
            FieldKind::Reference => "reference",
        }
    }

    /// Parse a dictionary token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "i64" => Some(FieldKind::I64),
            "f64" => Some(FieldKind::F64),
            "bool" => Some(FieldKind::Bool),
            "text" => Some(FieldKind::Text),
            "bytes" => Some(FieldKind::Bytes),
            "reference" => Some(FieldKind::Reference),
            _ => None,
        }
    }

    /// Default value applied to a current field that legacy mapping left
    /// unmapped.
    pub fn default_value(self) -> FieldValue {
        match self {
            FieldKind::I64 => FieldValue::I64(0),
            FieldKind::F64 => FieldValue::F64(0.0),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Bytes => FieldValue::Bytes(Vec::new()),
            FieldKind::Reference => FieldValue::Reference(None),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One named, typed field of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Field name, unique within its descriptor.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Create a field descriptor.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Ordered field schema of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Fully qualified type name as persisted in the dictionary.
    pub type_name: String,
    /// Fields in payload order.
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Create a descriptor.
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    /// True if both descriptors define the same schema (name, field names,
    /// kinds and order).
    pub fn same_schema(&self, other: &TypeDescriptor) -> bool {
        self == other
    }

    /// One-line rendering used in schema diffs and error messages.
    pub fn signature(&self) -> String {
        let fields: Vec<String> = self.fields.iter().map(|f| f.to_string()).collect();
        format!("{} {{ {} }}", self.type_name, fields.join(", "))
    }
}

/// Runtime value for one field slot, references as live objects.
///
/// This is what accessor pairs produce and consume; the reference variant
/// holds the in-memory side of a swizzled slot.
#[derive(Clone)]
pub enum FieldValue {
    /// Integer value.
    I64(i64),
    /// Float value.
    F64(f64),
    /// Boolean value.
    Bool(bool),
    /// Text value.
    Text(String),
    /// Raw bytes value.
    Bytes(Vec<u8>),
    /// Reference to another graph node, `None` for a persisted null.
    Reference(Option<Obj>),
}

impl FieldValue {
    /// Kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::I64(_) => FieldKind::I64,
            FieldValue::F64(_) => FieldKind::F64,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Bytes(_) => FieldKind::Bytes,
            FieldValue::Reference(_) => FieldKind::Reference,
        }
    }

    /// Extract an integer, erroring on kind mismatch.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            FieldValue::I64(v) => Ok(*v),
            other => Err(kind_mismatch(FieldKind::I64, other.kind())),
        }
    }

    /// Extract a float, erroring on kind mismatch.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            FieldValue::F64(v) => Ok(*v),
            other => Err(kind_mismatch(FieldKind::F64, other.kind())),
        }
    }

    /// Extract a bool, erroring on kind mismatch.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            FieldValue::Bool(v) => Ok(*v),
            other => Err(kind_mismatch(FieldKind::Bool, other.kind())),
        }
    }

    /// Extract text, erroring on kind mismatch.
    pub fn into_text(self) -> Result<String> {
        match self {
            FieldValue::Text(v) => Ok(v),
            other => Err(kind_mismatch(FieldKind::Text, other.kind())),
        }
    }

    /// Extract bytes, erroring on kind mismatch.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            FieldValue::Bytes(v) => Ok(v),
            other => Err(kind_mismatch(FieldKind::Bytes, other.kind())),
        }
    }

    /// Extract a reference, erroring on kind mismatch.
    pub fn into_reference(self) -> Result<Option<Obj>> {
        match self {
            FieldValue::Reference(v) => Ok(v),
            other => Err(kind_mismatch(FieldKind::Reference, other.kind())),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::I64(v) => write!(f, "I64({v})"),
            FieldValue::F64(v) => write!(f, "F64({v})"),
            FieldValue::Bool(v) => write!(f, "Bool({v})"),
            FieldValue::Text(v) => write!(f, "Text({v:?})"),
            FieldValue::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            FieldValue::Reference(Some(obj)) => write!(f, "Reference({})", obj.type_name()),
            FieldValue::Reference(None) => write!(f, "Reference(null)"),
        }
    }
}

fn kind_mismatch(expected: FieldKind, actual: FieldKind) -> Error {
    Error::Corruption(format!(
        "field value kind mismatch: expected {expected}, got {actual}"
    ))
}

/// Wire-level value of one field slot, references as raw object ids.
///
/// This is the swizzled form: what a payload actually holds before the load
/// session resolves reference slots into live objects.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Integer value.
    I64(i64),
    /// Float value.
    F64(f64),
    /// Boolean value.
    Bool(bool),
    /// Text value.
    Text(String),
    /// Raw bytes value.
    Bytes(Vec<u8>),
    /// Object id of a referenced object, null sentinel for none.
    Reference(ObjectId),
}

impl WireValue {
    /// Decode one field slot of the given kind from a payload reader.
    pub fn decode(reader: &mut ByteReader<'_>, kind: FieldKind) -> Result<Self> {
        Ok(match kind {
            FieldKind::I64 => WireValue::I64(reader.read_i64()?),
            FieldKind::F64 => WireValue::F64(reader.read_f64()?),
            FieldKind::Bool => WireValue::Bool(reader.read_bool()?),
            FieldKind::Text => WireValue::Text(reader.read_text()?.to_string()),
            FieldKind::Bytes => WireValue::Bytes(reader.read_var_bytes()?.to_vec()),
            FieldKind::Reference => WireValue::Reference(reader.read_reference()?),
        })
    }

    /// Encode this value into a payload writer.
    pub fn encode(&self, writer: &mut ByteWriter) {
        match self {
            WireValue::I64(v) => writer.write_i64(*v),
            WireValue::F64(v) => writer.write_f64(*v),
            WireValue::Bool(v) => writer.write_bool(*v),
            WireValue::Text(v) => writer.write_text(v),
            WireValue::Bytes(v) => writer.write_var_bytes(v),
            WireValue::Reference(oid) => writer.write_reference(*oid),
        }
    }

    /// Convert to the target kind, widening numerics where the similarity
    /// table allows it. Returns `None` for unconvertible pairs.
    pub fn convert_to(self, kind: FieldKind) -> Option<WireValue> {
        if self.kind() == kind {
            return Some(self);
        }
        match (self, kind) {
            (WireValue::I64(v), FieldKind::F64) => Some(WireValue::F64(v as f64)),
            (WireValue::F64(v), FieldKind::I64) => Some(WireValue::I64(v as i64)),
            _ => None,
        }
    }

    /// Kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            WireValue::I64(_) => FieldKind::I64,
            WireValue::F64(_) => FieldKind::F64,
            WireValue::Bool(_) => FieldKind::Bool,
            WireValue::Text(_) => FieldKind::Text,
            WireValue::Bytes(_) => FieldKind::Bytes,
            WireValue::Reference(_) => FieldKind::Reference,
        }
    }

    /// Canonical rendering used for validation state strings.
    ///
    /// References render by presence only: the instance side of a validation
    /// check cannot know object ids.
    pub fn render(&self) -> String {
        match self {
            WireValue::I64(v) => v.to_string(),
            WireValue::F64(v) => format!("{v:.6}"),
            WireValue::Bool(v) => v.to_string(),
            WireValue::Text(v) => v.clone(),
            WireValue::Bytes(v) => format!("<{} bytes>", v.len()),
            WireValue::Reference(oid) => {
                if oid.is_null() {
                    "ref:null".to_string()
                } else {
                    "ref:present".to_string()
                }
            }
        }
    }
}
