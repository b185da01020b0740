//! Store session
//!
//! One store operation: a breadth-first traversal from a root object that
//! writes every reachable object exactly once. References reported by each
//! handler are swizzled into object ids and enqueued; objects already
//! written in this operation are skipped (cycle and shared-reference
//! safety).
//!
//! Records are buffered and hit the blob store only at commit, after the
//! type dictionary, so every type id referenced by a record is available
//! before any record referencing it is readable.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use stow_codec::record::{RecordView, RecordWriter};
use stow_core::blob::BlobStore;
use stow_core::error::{Error, Result};
use stow_core::types::ObjectId;
use stow_types::dictionary::TypeDictionary;
use stow_types::handler::StoreContext;
use stow_types::object::{obj_addr, Obj};
use stow_types::registry::HandlerRegistry;
use tracing::{debug, trace};

/// One store operation against a shared registry pair.
pub struct Storer<'a> {
    registry: &'a HandlerRegistry,
    identity: &'a crate::identity::ObjectRegistry,
    /// Session-local fast path: addresses this session already resolved,
    /// so the shared registry is hit once per object.
    local_ids: FxHashMap<usize, ObjectId>,
    /// Objects fully written in this operation (at-most-once per operation).
    written: FxHashSet<ObjectId>,
    pending: VecDeque<Obj>,
    records: Vec<(ObjectId, Vec<u8>)>,
}

impl<'a> Storer<'a> {
    /// Start a store session.
    pub fn new(
        registry: &'a HandlerRegistry,
        identity: &'a crate::identity::ObjectRegistry,
    ) -> Self {
        Self {
            registry,
            identity,
            local_ids: FxHashMap::default(),
            written: FxHashSet::default(),
            pending: VecDeque::new(),
            records: Vec::new(),
        }
    }

    /// Traverse and serialize the graph reachable from `root`.
    ///
    /// May be called for several roots before [`Storer::commit`]; shared
    /// sub-graphs are still written once.
    pub fn store(&mut self, root: &Obj) -> Result<ObjectId> {
        let root_oid = session_oid(self.identity, &mut self.local_ids, root);
        self.pending.push_back(Obj::clone(root));

        while let Some(obj) = self.pending.pop_front() {
            self.write_object(obj)?;
        }
        Ok(root_oid)
    }

    fn write_object(&mut self, obj: Obj) -> Result<()> {
        let oid = session_oid(self.identity, &mut self.local_ids, &obj);
        if !self.written.insert(oid) {
            return Ok(());
        }

        let (type_id, handler) = self.registry.resolve_object(&obj)?;

        let mut record = RecordWriter::new(type_id, oid);
        {
            let mut ctx = StorerCtx {
                identity: self.identity,
                local_ids: &mut self.local_ids,
                pending: &mut self.pending,
            };
            handler.store(&obj, record.payload(), &mut ctx)?;
        }
        let bytes = record.finish()?;

        // Validation contract: re-derive state from the freshly written
        // bytes and compare against the live instance.
        if let Some(instance_state) = handler.validation_state(&obj)? {
            let view = RecordView::parse(&bytes)?;
            let binary_state = handler.binary_state(view.payload())?.unwrap_or_default();
            if instance_state != binary_state {
                return Err(Error::Validation {
                    instance_state,
                    binary_state,
                });
            }
        }

        trace!(oid = %oid, type_name = handler.type_name(), bytes = bytes.len(), "record buffered");
        self.records.push((oid, bytes));
        Ok(())
    }

    /// Records buffered so far.
    pub fn pending_record_count(&self) -> usize {
        self.records.len()
    }

    /// Write the dictionary and all buffered records, then flush.
    ///
    /// Returns the number of records committed.
    pub fn commit(self, dictionary: &TypeDictionary, blob: &dyn BlobStore) -> Result<usize> {
        // Dictionary first: a reader must be able to resolve every type id
        // any visible record carries.
        blob.put_dictionary(&dictionary.assemble())?;

        let count = self.records.len();
        for (oid, bytes) in &self.records {
            blob.put(*oid, bytes)?;
        }
        blob.flush()?;
        debug!(records = count, "store committed");
        Ok(count)
    }
}

fn session_oid(
    identity: &crate::identity::ObjectRegistry,
    local_ids: &mut FxHashMap<usize, ObjectId>,
    obj: &Obj,
) -> ObjectId {
    let addr = obj_addr(obj);
    if let Some(&oid) = local_ids.get(&addr) {
        return oid;
    }
    let oid = identity.ensure_id(obj);
    local_ids.insert(addr, oid);
    oid
}

struct StorerCtx<'s> {
    identity: &'s crate::identity::ObjectRegistry,
    local_ids: &'s mut FxHashMap<usize, ObjectId>,
    pending: &'s mut VecDeque<Obj>,
}

impl StoreContext for StorerCtx<'_> {
    fn reference_oid(&mut self, obj: &Obj) -> Result<ObjectId> {
        let oid = session_oid(self.identity, self.local_ids, obj);
        // Duplicates are cheap; the written set filters them at pop time.
        self.pending.push_back(Obj::clone(obj));
        Ok(oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ObjectRegistry;
    use parking_lot::RwLock;
    use std::sync::Arc;
    use stow_core::blob::MemoryBlobStore;
    use stow_types::descriptor::{FieldKind, FieldValue};
    use stow_types::handler::GenericTypeHandler;

    struct Node {
        label: RwLock<String>,
        next: RwLock<Option<Obj>>,
    }

    fn node(label: &str) -> Arc<Node> {
        Arc::new(Node {
            label: RwLock::new(label.to_string()),
            next: RwLock::new(None),
        })
    }

    fn node_handler() -> Arc<GenericTypeHandler> {
        Arc::new(
            GenericTypeHandler::builder("test.Node", || Node {
                label: RwLock::new(String::new()),
                next: RwLock::new(None),
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

    fn setup() -> (HandlerRegistry, ObjectRegistry) {
        let registry = HandlerRegistry::new(Arc::new(TypeDictionary::new()));
        registry.register(node_handler()).unwrap();
        (registry, ObjectRegistry::new(1_000_000))
    }

    #[test]
    fn test_store_single_object() {
        let (registry, identity) = setup();
        let blob = MemoryBlobStore::new();

        let mut storer = Storer::new(&registry, &identity);
        let root: Obj = node("solo");
        let oid = storer.store(&root).unwrap();
        assert_eq!(storer.pending_record_count(), 1);

        let count = storer.commit(registry.dictionary(), &blob).unwrap();
        assert_eq!(count, 1);
        assert!(blob.contains(oid).unwrap());
        assert!(blob.get_dictionary().unwrap().is_some());
    }

    #[test]
    fn test_store_reaches_references() {
        let (registry, identity) = setup();
        let blob = MemoryBlobStore::new();

        let child = node("child");
        let parent = node("parent");
        *parent.next.write() = Some(child.clone() as Obj);

        let mut storer = Storer::new(&registry, &identity);
        let root: Obj = parent;
        storer.store(&root).unwrap();
        assert_eq!(storer.pending_record_count(), 2);
        storer.commit(registry.dictionary(), &blob).unwrap();
        assert_eq!(blob.len(), 2);
    }

    #[test]
    fn test_cycle_is_written_once_each() {
        let (registry, identity) = setup();

        let a = node("a");
        let b = node("b");
        *a.next.write() = Some(b.clone() as Obj);
        *b.next.write() = Some(a.clone() as Obj);

        let mut storer = Storer::new(&registry, &identity);
        let root: Obj = a;
        storer.store(&root).unwrap();
        assert_eq!(storer.pending_record_count(), 2);
    }

    #[test]
    fn test_shared_reference_written_once() {
        let (registry, identity) = setup();

        let shared = node("shared");
        let left = node("left");
        let right = node("right");
        *left.next.write() = Some(shared.clone() as Obj);
        *right.next.write() = Some(shared.clone() as Obj);

        let mut storer = Storer::new(&registry, &identity);
        storer.store(&(left as Obj)).unwrap();
        storer.store(&(right as Obj)).unwrap();
        // left, right, shared; shared only once across both roots.
        assert_eq!(storer.pending_record_count(), 3);
    }

    #[test]
    fn test_oid_stable_across_stores_in_session() {
        let (registry, identity) = setup();

        let root: Obj = node("stable");
        let mut storer = Storer::new(&registry, &identity);
        let first = storer.store(&root).unwrap();
        let second = storer.store(&root).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unregistered_type_is_not_persistable() {
        let (registry, identity) = setup();

        let parent = node("parent");
        // String has no handler; reaching it must name the type.
        *parent.next.write() = Some(Arc::new(String::from("stray")) as Obj);

        let mut storer = Storer::new(&registry, &identity);
        let err = storer.store(&(parent as Obj)).unwrap_err();
        match err {
            Error::NotPersistable { type_name, .. } => assert!(type_name.contains("String")),
            other => panic!("expected NotPersistable, got {other}"),
        }
    }
}
