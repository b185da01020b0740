//! Load session
//!
//! One load operation: reads a record, resolves its type (directly or
//! through legacy mapping against the stored dictionary), and reconstructs
//! the instance. Cycle safety comes from registering every freshly created
//! instance *before* populating it, so a back-reference inside the sub-graph
//! finds the instance mid-construction instead of recursing forever.
//!
//! Completion hooks run after the whole operation, innermost objects first,
//! once all directly and transitively required state is in place.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use stow_codec::record::RecordView;
use stow_core::blob::BlobStore;
use stow_core::error::{Error, LazyError, Result};
use stow_core::types::{ObjectId, TypeId};
use stow_types::descriptor::TypeDescriptor;
use stow_types::dictionary::TypeDictionary;
use stow_types::handler::{LoadContext, TypeHandler};
use stow_types::legacy::{LegacyTypeHandler, LegacyTypeMapper};
use stow_types::object::{obj_addr, Obj};
use stow_types::registry::HandlerRegistry;
use tracing::{debug, trace};

/// Resolves handlers for type ids the current registry does not know,
/// using the dictionary persisted alongside the data.
///
/// The stored dictionary is read once per resolver; constructed legacy
/// handlers are cached per old type id.
pub struct LegacyResolver {
    mapper: LegacyTypeMapper,
    stored: RwLock<Option<FxHashMap<TypeId, TypeDescriptor>>>,
    handlers: RwLock<FxHashMap<TypeId, Arc<dyn TypeHandler>>>,
}

impl LegacyResolver {
    /// Create a resolver around a mapper.
    pub fn new(mapper: LegacyTypeMapper) -> Self {
        Self {
            mapper,
            stored: RwLock::new(None),
            handlers: RwLock::new(FxHashMap::default()),
        }
    }

    /// Try to build (or fetch) a legacy handler for a stored type id.
    ///
    /// Returns `None` when the stored dictionary has no descriptor for the
    /// id, or no current type carries the stored type name; the caller
    /// falls back to its unhandled-type-id error.
    pub fn resolve(
        &self,
        type_id: TypeId,
        registry: &HandlerRegistry,
        blob: &dyn BlobStore,
    ) -> Result<Option<Arc<dyn TypeHandler>>> {
        if let Some(handler) = self.handlers.read().get(&type_id) {
            return Ok(Some(Arc::clone(handler)));
        }

        self.ensure_stored_dictionary(blob)?;
        let old_descriptor = {
            let stored = self.stored.read();
            match stored.as_ref().and_then(|map| map.get(&type_id)) {
                Some(descriptor) => descriptor.clone(),
                None => return Ok(None),
            }
        };

        let Some((current_id, current_descriptor)) = registry
            .dictionary()
            .lookup_by_name(&old_descriptor.type_name)
        else {
            return Ok(None);
        };
        let current_handler = registry.resolve(current_id)?;

        let mapping = self.mapper.map(&old_descriptor, &current_descriptor)?;
        debug!(
            type_name = %old_descriptor.type_name,
            old_type_id = %type_id,
            current_type_id = %current_id,
            matched = mapping.matched.len(),
            dropped = mapping.dropped_old.len(),
            "legacy type mapping resolved"
        );

        let handler: Arc<dyn TypeHandler> =
            Arc::new(LegacyTypeHandler::new(old_descriptor, mapping, current_handler));
        self.handlers.write().insert(type_id, Arc::clone(&handler));
        Ok(Some(handler))
    }

    fn ensure_stored_dictionary(&self, blob: &dyn BlobStore) -> Result<()> {
        if self.stored.read().is_some() {
            return Ok(());
        }
        let text = blob.get_dictionary()?.unwrap_or_default();
        let entries = TypeDictionary::compile(&text)?;
        let map: FxHashMap<TypeId, TypeDescriptor> = entries.into_iter().collect();
        *self.stored.write() = Some(map);
        Ok(())
    }
}

impl std::fmt::Debug for LegacyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyResolver")
            .field("cached_handlers", &self.handlers.read().len())
            .field("dictionary_loaded", &self.stored.read().is_some())
            .finish()
    }
}

/// One load operation against a shared registry pair.
pub struct Loader<'a> {
    registry: &'a HandlerRegistry,
    identity: &'a crate::identity::ObjectRegistry,
    blob: &'a dyn BlobStore,
    legacy: &'a LegacyResolver,
    completions: Vec<(Obj, Arc<dyn TypeHandler>)>,
    depth: usize,
}

impl<'a> Loader<'a> {
    /// Start a load session.
    pub fn new(
        registry: &'a HandlerRegistry,
        identity: &'a crate::identity::ObjectRegistry,
        blob: &'a dyn BlobStore,
        legacy: &'a LegacyResolver,
    ) -> Self {
        Self {
            registry,
            identity,
            blob,
            legacy,
            completions: Vec::new(),
            depth: 0,
        }
    }

    /// Load the object stored under `oid`, reusing the live instance if the
    /// identity registry already holds one.
    pub fn load(&mut self, oid: ObjectId) -> Result<Obj> {
        if let Some(existing) = self.identity.lookup_object(oid) {
            return Ok(existing);
        }

        let bytes = self
            .blob
            .get(oid)?
            .ok_or(LazyError::ReferentUnavailable(oid))?;
        let view = RecordView::parse(&bytes)?;
        if view.header.object_id != oid {
            return Err(Error::Corruption(format!(
                "record stored under oid {} declares oid {}",
                oid, view.header.object_id
            )));
        }

        let handler = self.resolve_handler(view.header.type_id)?;
        let obj = handler.create(&view)?;

        // Register before populating: a cycle back to this oid must find
        // the instance under construction.
        let canonical = self.identity.register(oid, &obj)?;
        if obj_addr(&canonical) != obj_addr(&obj) {
            // A concurrent session created the instance first; use it.
            return Ok(canonical);
        }

        trace!(oid = %oid, type_name = handler.type_name(), "instance created");

        self.depth += 1;
        let populated = handler.update_state(&obj, &view, self);
        self.depth -= 1;
        populated?;

        self.completions.push((Obj::clone(&obj), handler));
        if self.depth == 0 {
            self.run_completions()?;
        }
        Ok(obj)
    }

    fn resolve_handler(&self, type_id: TypeId) -> Result<Arc<dyn TypeHandler>> {
        match self.registry.resolve(type_id) {
            Ok(handler) => Ok(handler),
            Err(unhandled) => match self.legacy.resolve(type_id, self.registry, self.blob)? {
                Some(handler) => Ok(handler),
                None => Err(unhandled),
            },
        }
    }

    fn run_completions(&mut self) -> Result<()> {
        // Children were pushed before their parents; completing in push
        // order keeps the innermost-first contract.
        for (obj, handler) in std::mem::take(&mut self.completions) {
            handler.complete(&obj)?;
        }
        Ok(())
    }
}

impl LoadContext for Loader<'_> {
    fn resolve_reference(&mut self, oid: ObjectId) -> Result<Option<Obj>> {
        if oid.is_null() {
            return Ok(None);
        }
        Ok(Some(self.load(oid)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ObjectRegistry;
    use crate::storer::Storer;
    use parking_lot::RwLock as PlRwLock;
    use stow_core::blob::MemoryBlobStore;
    use stow_types::descriptor::{FieldKind, FieldValue};
    use stow_types::handler::GenericTypeHandler;
    use stow_types::legacy::ThresholdValidator;

    struct Node {
        label: PlRwLock<String>,
        next: PlRwLock<Option<Obj>>,
    }

    fn node(label: &str) -> Arc<Node> {
        Arc::new(Node {
            label: PlRwLock::new(label.to_string()),
            next: PlRwLock::new(None),
        })
    }

    fn node_handler() -> Arc<GenericTypeHandler> {
        Arc::new(
            GenericTypeHandler::builder("test.Node", || Node {
                label: PlRwLock::new(String::new()),
                next: PlRwLock::new(None),
            })
            .field(
                "label",
                FieldKind::Text,
                |n: &Node| FieldValue::Text(n.label.read().clone()),
                |n: &Node, v| {
                    *n.label.write() = v.into_text()?;
                    Ok(())
                },
            )
            .field(
                "next",
                FieldKind::Reference,
                |n: &Node| FieldValue::Reference(n.next.read().clone()),
                |n: &Node, v| {
                    *n.next.write() = v.into_reference()?;
                    Ok(())
                },
            )
            .build(),
        )
    }

    fn resolver() -> LegacyResolver {
        LegacyResolver::new(LegacyTypeMapper::new(Arc::new(ThresholdValidator::new(0.6))))
    }

    fn store_list(blob: &MemoryBlobStore) -> (HandlerRegistry, ObjectId) {
        let registry = HandlerRegistry::new(Arc::new(TypeDictionary::new()));
        registry.register(node_handler()).unwrap();
        let identity = ObjectRegistry::new(1_000_000);

        let tail = node("tail");
        let head = node("head");
        *head.next.write() = Some(tail as Obj);

        let mut storer = Storer::new(&registry, &identity);
        let oid = storer.store(&(head as Obj)).unwrap();
        storer.commit(registry.dictionary(), blob).unwrap();
        (registry, oid)
    }

    #[test]
    fn test_load_roundtrip() {
        let blob = MemoryBlobStore::new();
        let (registry, root_oid) = store_list(&blob);

        // Fresh identity registry: a separate loading "process".
        let identity = ObjectRegistry::new(1_000_000);
        let legacy = resolver();
        let mut loader = Loader::new(&registry, &identity, &blob, &legacy);

        let root = loader.load(root_oid).unwrap();
        let head = root.as_any().downcast_ref::<Node>().unwrap();
        assert_eq!(*head.label.read(), "head");

        let next = head.next.read().clone().unwrap();
        let tail = next.as_any().downcast_ref::<Node>().unwrap();
        assert_eq!(*tail.label.read(), "tail");
        assert!(tail.next.read().is_none());
    }

    #[test]
    fn test_load_same_oid_yields_same_instance() {
        let blob = MemoryBlobStore::new();
        let (registry, root_oid) = store_list(&blob);

        let identity = ObjectRegistry::new(1_000_000);
        let legacy = resolver();

        let first = Loader::new(&registry, &identity, &blob, &legacy)
            .load(root_oid)
            .unwrap();
        let second = Loader::new(&registry, &identity, &blob, &legacy)
            .load(root_oid)
            .unwrap();
        assert_eq!(obj_addr(&first), obj_addr(&second));
    }

    #[test]
    fn test_load_cycle_shares_instances() {
        let blob = MemoryBlobStore::new();
        let registry = HandlerRegistry::new(Arc::new(TypeDictionary::new()));
        registry.register(node_handler()).unwrap();
        let identity = ObjectRegistry::new(1_000_000);

        let a = node("a");
        let b = node("b");
        *a.next.write() = Some(b.clone() as Obj);
        *b.next.write() = Some(a.clone() as Obj);

        let mut storer = Storer::new(&registry, &identity);
        let a_oid = storer.store(&(a as Obj)).unwrap();
        storer.commit(registry.dictionary(), &blob).unwrap();

        let load_identity = ObjectRegistry::new(1_000_000);
        let legacy = resolver();
        let mut loader = Loader::new(&registry, &load_identity, &blob, &legacy);
        let loaded_a = loader.load(a_oid).unwrap();

        let a_ref = loaded_a.as_any().downcast_ref::<Node>().unwrap();
        let loaded_b = a_ref.next.read().clone().unwrap();
        let b_ref = loaded_b.as_any().downcast_ref::<Node>().unwrap();
        let back = b_ref.next.read().clone().unwrap();

        // b.next must be the very same instance as a.
        assert_eq!(obj_addr(&back), obj_addr(&loaded_a));
    }

    #[test]
    fn test_load_missing_oid_is_referent_unavailable() {
        let blob = MemoryBlobStore::new();
        let (registry, _) = store_list(&blob);

        let identity = ObjectRegistry::new(1_000_000);
        let legacy = resolver();
        let mut loader = Loader::new(&registry, &identity, &blob, &legacy);

        let err = loader.load(ObjectId::new(999_999_999)).unwrap_err();
        assert!(matches!(
            err,
            Error::Lazy(LazyError::ReferentUnavailable(oid)) if oid == ObjectId::new(999_999_999)
        ));
    }

    #[test]
    fn test_load_unknown_type_id_names_it() {
        let blob = MemoryBlobStore::new();
        let (_, root_oid) = store_list(&blob);
        // Dictionary text removed: no legacy fallback possible.
        blob.put_dictionary("").unwrap();

        // A registry that never registered test.Node.
        let empty_registry = HandlerRegistry::new(Arc::new(TypeDictionary::new()));
        let identity = ObjectRegistry::new(1_000_000);
        let legacy = resolver();
        let mut loader = Loader::new(&empty_registry, &identity, &blob, &legacy);

        let err = loader.load(root_oid).unwrap_err();
        assert!(err.to_string().contains("unhandled type id"));
    }

    #[test]
    fn test_seeded_dictionary_survives_registration_order_change() {
        // Store with one registration order, load with another: seeding from
        // the persisted dictionary keeps ids stable, so records still
        // resolve to the right handler.
        let blob = MemoryBlobStore::new();
        let (_, root_oid) = store_list(&blob);

        let dictionary = Arc::new(TypeDictionary::new());
        dictionary.seed(
            TypeDictionary::compile(&blob.get_dictionary().unwrap().unwrap()).unwrap(),
        );

        let registry = HandlerRegistry::new(dictionary);
        // An extra registration first would shift test.Node's id without
        // the seed.
        registry
            .register(Arc::new(
                GenericTypeHandler::builder("test.Other", || 0i64).build(),
            ))
            .unwrap();
        registry.register(node_handler()).unwrap();

        let identity = ObjectRegistry::new(1_000_000);
        let legacy = resolver();
        let mut loader = Loader::new(&registry, &identity, &blob, &legacy);

        let root = loader.load(root_oid).unwrap();
        let head = root.as_any().downcast_ref::<Node>().unwrap();
        assert_eq!(*head.label.read(), "head");
    }
}
