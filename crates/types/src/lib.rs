//! Type system for stowdb
//!
//! This crate defines everything the engine knows about types:
//! - Persistent / Obj: the type-erased object model handled by the engine
//! - FieldKind / TypeDescriptor: one type's binary schema
//! - TypeHandler: the per-type encode/decode contract
//! - HandlerRegistry + TypeDictionary: type id assignment and resolution
//! - Legacy mapping: field-similarity matching for schema evolution

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod dictionary;
pub mod handler;
pub mod legacy;
pub mod object;
pub mod registry;
pub mod similarity;

pub use descriptor::{FieldDescriptor, FieldKind, FieldValue, TypeDescriptor, WireValue};
pub use dictionary::TypeDictionary;
pub use handler::{
    FieldAccessor, GenericTypeHandler, GenericTypeHandlerBuilder, LoadContext, StoreContext,
    TypeHandler,
};
pub use legacy::{FieldMapping, LegacyTypeHandler, LegacyTypeMapper, MatchValidator, ThresholdValidator};
pub use object::{downcast_arc, obj_addr, Obj, Persistent};
pub use registry::HandlerRegistry;
