//! Graph persistence engine for stowdb
//!
//! Orchestrates everything around the codec and type system:
//! - ObjectRegistry: OID <-> live instance bijection (identity, swizzling)
//! - Storer / Loader: one store or load operation over a graph
//! - Lazy + LazyReferenceManager: deferred sub-graph loading with a
//!   background sweeper bounding memory use
//! - Entity layering: identity / versioning / logging around immutable
//!   data snapshots
//! - GraphStore: the explicit context object binding all of the above to a
//!   blob store (no global singletons)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod identity;
pub mod lazy;
pub mod loader;
pub mod store;
pub mod storer;
pub mod sweeper;

pub use entity::{
    Entity, EntityBuilder, EntityData, EntityLayer, KeepLastCleaner, LoggingLayer, VersionCleaner,
    VersionContext, VersioningLayer,
};
pub use identity::{ObjectIdProvider, ObjectRegistry};
pub use lazy::{Lazy, LazyHandler, LazyTyped, ReferenceLoader};
pub use loader::{LegacyResolver, Loader};
pub use store::{GraphStore, GraphStoreBuilder};
pub use storer::Storer;
pub use sweeper::LazyReferenceManager;
