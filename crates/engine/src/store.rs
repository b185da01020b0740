//! Graph store facade
//!
//! [`GraphStore`] is the explicit context object binding the handler
//! registry, type dictionary, object identity registry, legacy resolver,
//! lazy sweeper and the blob store collaborator. There is no ambient global
//! state: construct one per store, pass it around, shut it down.

use crate::identity::ObjectRegistry;
use crate::lazy::{Lazy, LazyHandler, ReferenceLoader};
use crate::loader::{LegacyResolver, Loader};
use crate::storer::Storer;
use crate::sweeper::LazyReferenceManager;
use std::sync::{Arc, Weak};
use stow_core::blob::BlobStore;
use stow_core::config::EngineConfig;
use stow_core::error::{LazyError, Result};
use stow_core::types::{ObjectId, TypeId};
use stow_types::dictionary::TypeDictionary;
use stow_types::handler::TypeHandler;
use stow_types::legacy::{LegacyTypeMapper, MatchValidator, ThresholdValidator};
use stow_types::object::Obj;
use stow_types::registry::HandlerRegistry;
use tracing::debug;

struct StoreInner {
    dictionary: Arc<TypeDictionary>,
    handlers: HandlerRegistry,
    identity: ObjectRegistry,
    blob: Arc<dyn BlobStore>,
    legacy: LegacyResolver,
    sweeper: Arc<LazyReferenceManager>,
}

/// An embedded object-graph store.
///
/// Cloning shares the store. Dropping the last handle stops the sweeper.
#[derive(Clone)]
pub struct GraphStore {
    inner: Arc<StoreInner>,
}

impl GraphStore {
    /// Open a store over a blob provider with default configuration.
    pub fn open(blob: Arc<dyn BlobStore>) -> Result<Self> {
        Self::builder(blob).build()
    }

    /// Start building a store with explicit configuration.
    pub fn builder(blob: Arc<dyn BlobStore>) -> GraphStoreBuilder {
        GraphStoreBuilder {
            blob,
            config: EngineConfig::default(),
            validator: ValidatorChoice::Default,
            start_sweeper: true,
        }
    }

    /// Register a type handler; its TypeId is assigned (or re-adopted from
    /// the persisted dictionary) here.
    pub fn register(&self, handler: Arc<dyn TypeHandler>) -> Result<TypeId> {
        self.inner.handlers.register(handler)
    }

    /// Store the graph reachable from `root`; returns the root's object id.
    pub fn store(&self, root: &Obj) -> Result<ObjectId> {
        let mut storer = Storer::new(&self.inner.handlers, &self.inner.identity);
        let oid = storer.store(root)?;
        storer.commit(&self.inner.dictionary, self.inner.blob.as_ref())?;
        Ok(oid)
    }

    /// Load the object stored under `oid`, reusing live instances.
    pub fn load(&self, oid: ObjectId) -> Result<Obj> {
        let mut loader = Loader::new(
            &self.inner.handlers,
            &self.inner.identity,
            self.inner.blob.as_ref(),
            &self.inner.legacy,
        );
        loader.load(oid)
    }

    /// Wrap a live value in a supervised lazy reference.
    pub fn lazy(&self, referent: Obj) -> Lazy {
        let lazy = Lazy::from_value(referent);
        self.inner.sweeper.track(&lazy);
        lazy
    }

    /// Render the current type dictionary as persistable text.
    pub fn export_type_dictionary(&self) -> String {
        self.inner.dictionary.assemble()
    }

    /// The object identity registry (shared across sessions).
    pub fn identity(&self) -> &ObjectRegistry {
        &self.inner.identity
    }

    /// The lazy reference sweeper.
    pub fn sweeper(&self) -> &LazyReferenceManager {
        &self.inner.sweeper
    }

    /// Stop background work; further store/load calls still succeed.
    pub fn shutdown(&self) {
        self.inner.sweeper.stop();
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("types", &self.inner.dictionary.len())
            .field("identity", &self.inner.identity)
            .finish()
    }
}

enum ValidatorChoice {
    Default,
    Custom(Arc<dyn MatchValidator>),
    None,
}

/// Builder for [`GraphStore`].
pub struct GraphStoreBuilder {
    blob: Arc<dyn BlobStore>,
    config: EngineConfig,
    validator: ValidatorChoice,
    start_sweeper: bool,
}

impl GraphStoreBuilder {
    /// Use the given engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a custom legacy match validator.
    pub fn match_validator(mut self, validator: Arc<dyn MatchValidator>) -> Self {
        self.validator = ValidatorChoice::Custom(validator);
        self
    }

    /// Disable the legacy match validator: only exact-name field matches
    /// bind during legacy mapping, similarity candidates are dropped.
    pub fn without_match_validator(mut self) -> Self {
        self.validator = ValidatorChoice::None;
        self
    }

    /// Do not start the background sweeper (sweeps can still be run
    /// manually through [`GraphStore::sweeper`]).
    pub fn manual_sweeping(mut self) -> Self {
        self.start_sweeper = false;
        self
    }

    /// Open the store: seed the dictionary from the persisted one, install
    /// the built-in lazy handler, start the sweeper.
    pub fn build(self) -> Result<GraphStore> {
        let dictionary = Arc::new(TypeDictionary::new());
        if let Some(text) = self.blob.get_dictionary()? {
            let entries = TypeDictionary::compile(&text)?;
            debug!(types = entries.len(), "seeding dictionary from persisted store");
            dictionary.seed(entries);
        }

        let mapper = match self.validator {
            ValidatorChoice::Default => LegacyTypeMapper::new(Arc::new(ThresholdValidator::new(
                self.config.legacy_match_threshold,
            ))),
            ValidatorChoice::Custom(validator) => LegacyTypeMapper::new(validator),
            ValidatorChoice::None => LegacyTypeMapper::without_validator(),
        };

        let sweeper = Arc::new(LazyReferenceManager::new(
            self.config.lazy_idle_timeout,
            self.config.sweep_interval,
        ));

        let inner = Arc::new(StoreInner {
            dictionary: Arc::clone(&dictionary),
            handlers: HandlerRegistry::new(dictionary),
            identity: ObjectRegistry::new(self.config.oid_base),
            blob: self.blob,
            legacy: LegacyResolver::new(mapper),
            sweeper: Arc::clone(&sweeper),
        });

        let store = GraphStore { inner };

        // The lazy handler loads referents through the store itself; the
        // weak handle keeps handler registration from pinning the store.
        let loader: Arc<dyn ReferenceLoader> = Arc::new(StoreLoaderHandle {
            inner: Arc::downgrade(&store.inner),
        });
        store
            .inner
            .handlers
            .register(Arc::new(LazyHandler::new(loader, sweeper)))?;

        if self.start_sweeper {
            store.inner.sweeper.start();
        }
        Ok(store)
    }
}

/// Loader capability handed to lazy references: runs a load session against
/// the owning store.
struct StoreLoaderHandle {
    inner: Weak<StoreInner>,
}

impl ReferenceLoader for StoreLoaderHandle {
    fn load_reference(&self, oid: ObjectId) -> Result<Obj> {
        let inner = self
            .inner
            .upgrade()
            .ok_or(LazyError::ReferentUnavailable(oid))?;
        let mut loader = Loader::new(
            &inner.handlers,
            &inner.identity,
            inner.blob.as_ref(),
            &inner.legacy,
        );
        loader.load(oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use stow_core::blob::MemoryBlobStore;
    use stow_types::descriptor::{FieldKind, FieldValue};
    use stow_types::handler::GenericTypeHandler;

    struct Doc {
        title: RwLock<String>,
        attachment: RwLock<Option<Obj>>,
    }

    fn doc_handler() -> Arc<GenericTypeHandler> {
        Arc::new(
            GenericTypeHandler::builder("test.Doc", || Doc {
                title: RwLock::new(String::new()),
                attachment: RwLock::new(None),
            })
            .field(
                "title",
                FieldKind::Text,
                |d: &Doc| FieldValue::Text(d.title.read().clone()),
                |d: &Doc, v| {
                    *d.title.write() = v.into_text()?;
                    Ok(())
                },
            )
            .field(
                "attachment",
                FieldKind::Reference,
                |d: &Doc| FieldValue::Reference(d.attachment.read().clone()),
                |d: &Doc, v| {
                    *d.attachment.write() = v.into_reference()?;
                    Ok(())
                },
            )
            .build(),
        )
    }

    fn open_store() -> GraphStore {
        let store = GraphStore::builder(Arc::new(MemoryBlobStore::new()))
            .manual_sweeping()
            .build()
            .unwrap();
        store.register(doc_handler()).unwrap();
        store
    }

    #[test]
    fn test_store_and_load_through_facade() {
        let store = open_store();

        let doc = Arc::new(Doc {
            title: RwLock::new("report".to_string()),
            attachment: RwLock::new(None),
        });
        let oid = store.store(&(doc as Obj)).unwrap();

        let loaded = store.load(oid).unwrap();
        let loaded_doc = loaded.as_any().downcast_ref::<Doc>().unwrap();
        assert_eq!(*loaded_doc.title.read(), "report");
    }

    #[test]
    fn test_lazy_subgraph_roundtrip() {
        let blob = Arc::new(MemoryBlobStore::new());
        let oid;
        {
            let store = GraphStore::builder(Arc::clone(&blob) as Arc<dyn BlobStore>)
                .manual_sweeping()
                .build()
                .unwrap();
            store.register(doc_handler()).unwrap();

            let attachment = Arc::new(Doc {
                title: RwLock::new("appendix".to_string()),
                attachment: RwLock::new(None),
            });
            let root = Arc::new(Doc {
                title: RwLock::new("main".to_string()),
                attachment: RwLock::new(Some(Arc::new(store.lazy(attachment as Obj)) as Obj)),
            });
            oid = store.store(&(root as Obj)).unwrap();
            store.shutdown();
        }

        // A fresh store over the same blobs: the lazy arrives unresolved.
        let store = GraphStore::builder(blob as Arc<dyn BlobStore>)
            .manual_sweeping()
            .build()
            .unwrap();
        store.register(doc_handler()).unwrap();

        let root = store.load(oid).unwrap();
        let root_doc = root.as_any().downcast_ref::<Doc>().unwrap();
        assert_eq!(*root_doc.title.read(), "main");

        let lazy_obj = root_doc.attachment.read().clone().unwrap();
        let lazy = lazy_obj.as_any().downcast_ref::<Lazy>().unwrap();
        assert_eq!(lazy.state_name(), "unresolved");

        let referent = lazy.get().unwrap().unwrap();
        let attachment = referent.as_any().downcast_ref::<Doc>().unwrap();
        assert_eq!(*attachment.title.read(), "appendix");
        assert!(lazy.is_loaded());
    }

    #[test]
    fn test_dictionary_export_contains_registered_types() {
        let store = open_store();
        let text = store.export_type_dictionary();
        assert!(text.contains("test.Doc"));
        assert!(text.contains("stow.Lazy"));
    }

    #[test]
    fn test_wrapping_value_in_lazy_is_tracked() {
        let store = open_store();
        let lazy = store.lazy(Arc::new(1i64));
        assert!(lazy.is_loaded());
        assert_eq!(store.sweeper().tracked_count(), 1);
    }
}
