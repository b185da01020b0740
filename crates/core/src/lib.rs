//! Core types and traits for stowdb
//!
//! This crate defines the foundational pieces used throughout the system:
//! - ObjectId: stable 64-bit handle identifying one persisted object instance
//! - TypeId: stable identifier bound to one exact field schema of one type
//! - Error: error type hierarchy shared by all crates
//! - EngineConfig: tunables consumed from a key/value accessor
//! - BlobStore: the byte source/sink collaborator records are written to

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod config;
pub mod error;
pub mod types;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use config::EngineConfig;
pub use error::{
    ConfigError, EntityError, Error, FormatError, LazyError, LegacyMappingError, Result,
    TypeResolutionError,
};
pub use types::{ObjectId, TypeId};
