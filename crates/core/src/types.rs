//! Core identifier types
//!
//! This module defines the two stable identifiers of the engine:
//! - ObjectId: identifies one logical object instance across store/load cycles
//! - TypeId: identifies one exact binary schema of one type

use std::fmt;

/// Stable 64-bit handle identifying one logical persisted object instance.
///
/// An ObjectId is globally unique within a persistence store. It is assigned
/// exactly once per distinct live object identity and never changes. The zero
/// value is reserved as the "no object" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Sentinel marking "no object" or "not yet resolved".
    pub const NULL: ObjectId = ObjectId(0);

    /// Create an ObjectId from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True if this is the null sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide unique identifier for one concrete type's binary schema.
///
/// A TypeId is bound to exactly one field list (names, kinds, order) at
/// registration time and is never reused for a different schema. Dictionaries
/// built in different registration order across store and load therefore do
/// not interoperate; resolving an id the current dictionary never assigned is
/// a [`crate::error::TypeResolutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u64);

impl TypeId {
    /// Sentinel for "no type" (never assigned by a dictionary).
    pub const NULL: TypeId = TypeId(0);

    /// Create a TypeId from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True if this is the null sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
