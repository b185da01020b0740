//! Type handler registry
//!
//! Maps both directions a session needs:
//! - persistent TypeId -> handler (load path)
//! - Rust runtime type -> handler (store path)
//!
//! Registration assigns the TypeId through the shared [`TypeDictionary`] and
//! is permanent for the registry's lifetime. An unknown id at load time is
//! the dominant real-world failure (dictionaries built in inconsistent
//! registration order across store and load) and is reported with the
//! offending id.

use crate::dictionary::TypeDictionary;
use crate::handler::TypeHandler;
use crate::object::Obj;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::TypeId as RuntimeTypeId;
use std::sync::Arc;
use stow_core::error::{Error, Result, TypeResolutionError};
use stow_core::types::TypeId;

/// Registry of type handlers for one store.
///
/// # Thread Safety
///
/// Lookup maps are behind `RwLock` and handlers are shared `Arc`s; the
/// registry is shared freely between concurrent sessions.
pub struct HandlerRegistry {
    dictionary: Arc<TypeDictionary>,
    by_type_id: RwLock<FxHashMap<TypeId, Arc<dyn TypeHandler>>>,
    by_runtime: RwLock<FxHashMap<RuntimeTypeId, Arc<dyn TypeHandler>>>,
}

impl HandlerRegistry {
    /// Create a registry bound to a dictionary.
    pub fn new(dictionary: Arc<TypeDictionary>) -> Self {
        Self {
            dictionary,
            by_type_id: RwLock::new(FxHashMap::default()),
            by_runtime: RwLock::new(FxHashMap::default()),
        }
    }

    /// The dictionary ids are assigned through.
    pub fn dictionary(&self) -> &Arc<TypeDictionary> {
        &self.dictionary
    }

    /// Register a handler, assigning (or re-resolving) its TypeId.
    ///
    /// Fails if the handler's type name is already bound to a different
    /// schema. Registration is permanent; there is no unregister.
    pub fn register(&self, handler: Arc<dyn TypeHandler>) -> Result<TypeId> {
        let type_id = self.dictionary.register(handler.descriptor())?;

        self.by_type_id.write().insert(type_id, Arc::clone(&handler));
        self.by_runtime
            .write()
            .insert(handler.runtime_type(), handler);
        Ok(type_id)
    }

    /// Resolve the handler for a stored type id.
    pub fn resolve(&self, type_id: TypeId) -> Result<Arc<dyn TypeHandler>> {
        self.by_type_id
            .read()
            .get(&type_id)
            .cloned()
            .ok_or_else(|| TypeResolutionError::UnhandledTypeId(type_id).into())
    }

    /// Resolve the handler for an object's runtime type, with its TypeId.
    ///
    /// An unregistered runtime type is fatal at store time and names the
    /// offending type.
    pub fn resolve_object(&self, obj: &Obj) -> Result<(TypeId, Arc<dyn TypeHandler>)> {
        let handler = self
            .by_runtime
            .read()
            .get(&obj.as_any().type_id())
            .cloned()
            .ok_or_else(|| Error::NotPersistable {
                type_name: obj.type_name().to_string(),
                reason: "no type handler registered for this runtime type".to_string(),
            })?;

        let (type_id, _) = self
            .dictionary
            .lookup_by_name(handler.type_name())
            .ok_or_else(|| Error::Corruption(format!(
                "handler {} registered but absent from dictionary",
                handler.type_name()
            )))?;
        Ok((type_id, handler))
    }

    /// True if a handler is registered for the id.
    pub fn is_registered(&self, type_id: TypeId) -> bool {
        self.by_type_id.read().contains_key(&type_id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.by_type_id.read().len()
    }

    /// True if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.by_type_id.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.len())
            .finish()
    }
}
