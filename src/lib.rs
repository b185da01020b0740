//! stowdb - embedded object-graph persistence engine
//!
//! stowdb converts live in-memory object graphs into a compact binary form
//! and reconstructs them later, preserving reference identity, supporting
//! lazy materialization of sub-graphs and tolerating schema evolution
//! between the stored graph and the types available at load time.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stowdb::{GraphStore, MemoryBlobStore, GenericTypeHandler, FieldKind, FieldValue, Obj};
//!
//! let store = GraphStore::open(Arc::new(MemoryBlobStore::new()))?;
//! store.register(Arc::new(
//!     GenericTypeHandler::builder("app.Counter", || Counter::default())
//!         .field("count", FieldKind::I64, get_count, set_count)
//!         .build(),
//! ))?;
//!
//! let oid = store.store(&(Arc::new(Counter::default()) as Obj))?;
//! let again = store.load(oid)?;
//! ```
//!
//! # Architecture
//!
//! - `stow-core`: identifiers, error taxonomy, config, blob-store traits
//! - `stow-codec`: the binary record format and byte cursors
//! - `stow-types`: descriptors, type handlers, dictionary, legacy mapping
//! - `stow-engine`: identity registry, store/load sessions, lazy
//!   references, entity layering, the [`GraphStore`] facade

pub use stow_core::{
    BlobStore, ConfigError, EngineConfig, EntityError, Error, FileBlobStore, FormatError,
    LazyError, LegacyMappingError, MemoryBlobStore, ObjectId, Result, TypeId,
    TypeResolutionError,
};

pub use stow_codec::{ByteReader, ByteWriter, RecordHeader, RecordView, RecordWriter, HEADER_LEN};

pub use stow_types::{
    downcast_arc, FieldDescriptor, FieldKind, FieldValue, GenericTypeHandler, HandlerRegistry,
    LegacyTypeMapper, MatchValidator, Obj, Persistent, ThresholdValidator, TypeDescriptor,
    TypeDictionary, TypeHandler,
};

pub use stow_engine::{
    Entity, EntityBuilder, EntityData, EntityLayer, GraphStore, GraphStoreBuilder,
    KeepLastCleaner, Lazy, LazyReferenceManager, LazyTyped, LoggingLayer, ObjectRegistry,
    ReferenceLoader, VersionCleaner, VersionContext, VersioningLayer,
};
