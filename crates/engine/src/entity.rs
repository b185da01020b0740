//! Entity layering
//!
//! An [`Entity`] wraps one immutable data snapshot behind an ordered stack
//! of layers, each contributing one orthogonal concern: the entity itself is
//! the identity (external references and equality point at it, never at its
//! data), a versioning layer keeps a keyed history of snapshots, a logging
//! layer emits events around every access. Updating an entity swaps the
//! snapshot pointer; data content is never mutated in place, so in-flight
//! readers keep a consistent view.
//!
//! Layers are composed as an explicit list sharing one read/update/created
//! contract, not an inheritance chain.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stow_core::error::{EntityError, Result};
use tracing::debug;

/// Source of entity identity numbers, for diagnostics and snapshot tagging.
static NEXT_ENTITY_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// One layer of an entity's behavior stack.
///
/// Default implementations are transparent; a layer overrides only the
/// hooks for its concern. Reads always run through the full stack so every
/// layer observes every access.
pub trait EntityLayer<D, K>: Send + Sync {
    /// Observe the initial snapshot when the entity is created.
    fn created(&self, _data: &Arc<D>) {}

    /// Observe (and possibly substitute) the snapshot on read.
    fn read(&self, data: Arc<D>) -> Result<Arc<D>> {
        Ok(data)
    }

    /// Observe an update; return false to veto the pointer swap.
    fn updated(&self, _old: &Arc<D>, _new: &Arc<D>) -> Result<bool> {
        Ok(true)
    }
}

/// A data snapshot bound to the entity identity it was created for.
///
/// Guards against applying a snapshot to the wrong entity: snapshots are
/// minted by [`Entity::new_data`] and carry their entity's identity.
pub struct EntityData<D> {
    identity: u64,
    value: Arc<D>,
}

impl<D> EntityData<D> {
    /// The wrapped snapshot.
    pub fn value(&self) -> &Arc<D> {
        &self.value
    }
}

struct EntityInner<D, K> {
    identity: u64,
    data: RwLock<Arc<D>>,
    layers: Vec<Box<dyn EntityLayer<D, K>>>,
    // Serializes updates per identity: one pointer swap in flight at a time.
    update_lock: Mutex<()>,
}

/// An entity identity wrapping an immutable data snapshot.
///
/// Cloning shares the identity; equality and hashing follow the identity,
/// never the data.
pub struct Entity<D, K = String> {
    inner: Arc<EntityInner<D, K>>,
}

impl<D, K> Clone for Entity<D, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Send + Sync + 'static, K: Send + Sync + 'static> Entity<D, K> {
    /// Create an entity with no extra layers.
    pub fn new(data: D) -> Self {
        EntityBuilder::new(data).build()
    }

    /// Start building an entity with layers.
    pub fn builder(data: D) -> EntityBuilder<D, K> {
        EntityBuilder::new(data)
    }

    /// Stable identity number of this entity.
    pub fn identity(&self) -> u64 {
        self.inner.identity
    }

    /// True if both handles denote the same entity identity.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.inner.identity == other.inner.identity
    }

    /// Read the current snapshot through the full layer stack.
    pub fn data(&self) -> Result<Arc<D>> {
        let mut snapshot = Arc::clone(&self.inner.data.read());
        for layer in &self.inner.layers {
            snapshot = layer.read(snapshot)?;
        }
        Ok(snapshot)
    }

    /// Mint a snapshot bound to this entity's identity.
    pub fn new_data(&self, value: D) -> EntityData<D> {
        EntityData {
            identity: self.inner.identity,
            value: Arc::new(value),
        }
    }

    /// Replace the snapshot, running the full layer stack.
    ///
    /// Returns whether the update was accepted (a layer may veto). Applying
    /// a snapshot minted for a different entity is an
    /// [`EntityError::IdentityMismatch`]. Updates on one identity are
    /// serialized; the data content itself is never mutated.
    pub fn update_data(&self, data: EntityData<D>) -> Result<bool> {
        if data.identity != self.inner.identity {
            return Err(EntityError::IdentityMismatch {
                snapshot_identity: data.identity,
                entity_identity: self.inner.identity,
            }
            .into());
        }

        let _guard = self.inner.update_lock.lock();
        let old = Arc::clone(&self.inner.data.read());

        for layer in &self.inner.layers {
            if !layer.updated(&old, &data.value)? {
                return Ok(false);
            }
        }

        *self.inner.data.write() = data.value;
        Ok(true)
    }
}

impl<D, K> PartialEq for Entity<D, K> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.identity == other.inner.identity
    }
}

impl<D, K> Eq for Entity<D, K> {}

impl<D, K> Hash for Entity<D, K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.identity.hash(state);
    }
}

impl<D, K> fmt::Debug for Entity<D, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("identity", &self.inner.identity)
            .field("layers", &self.inner.layers.len())
            .finish()
    }
}

/// Builder assembling an entity's layer stack in order.
pub struct EntityBuilder<D, K = String> {
    data: Arc<D>,
    layers: Vec<Box<dyn EntityLayer<D, K>>>,
}

impl<D: Send + Sync + 'static, K: Send + Sync + 'static> EntityBuilder<D, K> {
    fn new(data: D) -> Self {
        Self {
            data: Arc::new(data),
            layers: Vec::new(),
        }
    }

    /// Append a layer; layers run in the order they were added.
    pub fn layer(mut self, layer: impl EntityLayer<D, K> + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Finish the entity; every layer observes the initial snapshot.
    pub fn build(self) -> Entity<D, K> {
        let identity = NEXT_ENTITY_IDENTITY.fetch_add(1, Ordering::Relaxed);
        for layer in &self.layers {
            layer.created(&self.data);
        }
        Entity {
            inner: Arc::new(EntityInner {
                identity,
                data: RwLock::new(self.data),
                layers: self.layers,
                update_lock: Mutex::new(()),
            }),
        }
    }
}

/// Prunes a version history after each update.
pub trait VersionCleaner<K, D>: Send + Sync {
    /// Trim `versions` in place (insertion order, oldest first).
    fn clean(&self, versions: &mut Vec<(K, Arc<D>)>);
}

/// Keep only the most recent N versions.
pub struct KeepLastCleaner {
    keep: usize,
}

impl KeepLastCleaner {
    /// Create a cleaner keeping the last `keep` versions.
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }
}

impl<K: Send + Sync, D: Send + Sync> VersionCleaner<K, D> for KeepLastCleaner {
    fn clean(&self, versions: &mut Vec<(K, Arc<D>)>) {
        if versions.len() > self.keep {
            let excess = versions.len() - self.keep;
            versions.drain(..excess);
        }
    }
}

/// Shared version-key context for one or more versioned entities.
///
/// The current key selects which snapshot reads observe; updates are stored
/// under it. With no key set, the versioning layer is transparent.
pub struct VersionContext<K> {
    current: RwLock<Option<K>>,
}

impl<K: Clone> VersionContext<K> {
    /// Create a context with no current version key.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(None),
        })
    }

    /// Set the current version key.
    pub fn set_version(&self, key: K) {
        *self.current.write() = Some(key);
    }

    /// Clear the current version key; reads see the live snapshot again.
    pub fn clear_version(&self) {
        *self.current.write() = None;
    }

    /// The current version key, if any.
    pub fn current(&self) -> Option<K> {
        self.current.read().clone()
    }
}

/// Versioning layer: keyed history of snapshots with pluggable cleanup.
pub struct VersioningLayer<D, K = String> {
    context: Arc<VersionContext<K>>,
    versions: Mutex<Vec<(K, Arc<D>)>>,
    cleaner: Option<Box<dyn VersionCleaner<K, D>>>,
}

impl<D: Send + Sync, K: Clone + Eq + fmt::Debug + Send + Sync> VersioningLayer<D, K> {
    /// Create a versioning layer bound to a context, with no cleaner.
    pub fn new(context: Arc<VersionContext<K>>) -> Self {
        Self {
            context,
            versions: Mutex::new(Vec::new()),
            cleaner: None,
        }
    }

    /// Attach a cleanup policy, run after each versioned update.
    pub fn with_cleaner(mut self, cleaner: impl VersionCleaner<K, D> + 'static) -> Self {
        self.cleaner = Some(Box::new(cleaner));
        self
    }

    /// Number of stored version snapshots.
    pub fn version_count(&self) -> usize {
        self.versions.lock().len()
    }

    fn put_version(&self, key: K, data: Arc<D>) {
        let mut versions = self.versions.lock();
        if let Some(slot) = versions.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = data;
        } else {
            versions.push((key, data));
        }
        if let Some(cleaner) = &self.cleaner {
            cleaner.clean(&mut versions);
        }
    }
}

impl<D: Send + Sync, K: Clone + Eq + fmt::Debug + Send + Sync> EntityLayer<D, K>
    for VersioningLayer<D, K>
{
    fn created(&self, data: &Arc<D>) {
        if let Some(key) = self.context.current() {
            self.put_version(key, Arc::clone(data));
        }
    }

    fn read(&self, data: Arc<D>) -> Result<Arc<D>> {
        let Some(key) = self.context.current() else {
            return Ok(data);
        };
        let versions = self.versions.lock();
        versions
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, snapshot)| Arc::clone(snapshot))
            .ok_or_else(|| {
                EntityError::MissingVersion {
                    version_key: format!("{key:?}"),
                }
                .into()
            })
    }

    fn updated(&self, _old: &Arc<D>, new: &Arc<D>) -> Result<bool> {
        if let Some(key) = self.context.current() {
            self.put_version(key, Arc::clone(new));
        }
        Ok(true)
    }
}

/// Logging layer: emits a structured event around every create, read and
/// update. Never alters data.
pub struct LoggingLayer {
    label: String,
}

impl LoggingLayer {
    /// Create a layer logging under the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl<D, K> EntityLayer<D, K> for LoggingLayer
where
    D: Send + Sync,
    K: Send + Sync,
{
    fn created(&self, _data: &Arc<D>) {
        debug!(entity = %self.label, "entity created");
    }

    fn read(&self, data: Arc<D>) -> Result<Arc<D>> {
        debug!(entity = %self.label, "entity data read");
        Ok(data)
    }

    fn updated(&self, _old: &Arc<D>, _new: &Arc<D>) -> Result<bool> {
        debug!(entity = %self.label, "entity data updated");
        Ok(true)
    }
}
