//! Lazy references
//!
//! A [`Lazy`] stands in a graph slot where eager loading is undesirable. It
//! retains the referent's object id and a loader capability; the referent is
//! materialized on first access and may be released again by the sweeper
//! ([`crate::sweeper::LazyReferenceManager`]) when idle, which never
//! affects correctness, only memory footprint.
//!
//! States: *Unresolved* (id known, nothing materialized) -> *Loaded*
//! (referent strongly held) -> *Unloaded* (referent released, id retained,
//! reloadable). A lazy with no id and no referent is a persisted null,
//! tracked as its own terminal state so "no object" is never confused with
//! "not yet loaded".
//!
//! # Thread Safety
//!
//! Resolution and unloading on one reference are mutually exclusive through
//! the per-reference state lock. Resolution is a blocking call on the
//! touching thread, never an asynchronous task.

use parking_lot::{Mutex, RwLock};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use stow_codec::cursor::ByteWriter;
use stow_codec::record::RecordView;
use stow_core::error::{Error, LazyError, Result};
use stow_core::types::ObjectId;
use stow_types::descriptor::{FieldDescriptor, FieldKind, TypeDescriptor};
use stow_types::handler::{LoadContext, StoreContext, TypeHandler};
use stow_types::object::{downcast_arc, Obj};
use tracing::trace;

/// Loads a referent for a retained object id on demand.
pub trait ReferenceLoader: Send + Sync {
    /// Materialize the object stored under `oid`.
    ///
    /// An unreachable id must fail with
    /// [`LazyError::ReferentUnavailable`], never silently produce nothing.
    fn load_reference(&self, oid: ObjectId) -> Result<Obj>;
}

pub(crate) enum LazyState {
    Unresolved,
    Loaded { referent: Obj, last_touch: Instant },
    Unloaded,
    Null,
}

impl LazyState {
    fn name(&self) -> &'static str {
        match self {
            LazyState::Unresolved => "unresolved",
            LazyState::Loaded { .. } => "loaded",
            LazyState::Unloaded => "unloaded",
            LazyState::Null => "null",
        }
    }
}

pub(crate) struct LazyInner {
    oid: AtomicU64,
    loader: RwLock<Option<Arc<dyn ReferenceLoader>>>,
    // Guards every state transition; resolution and unloading exclude each
    // other here.
    state: Mutex<LazyState>,
}

/// A lazy reference to one persisted object.
///
/// Cloning shares the reference; all clones observe the same state.
#[derive(Clone)]
pub struct Lazy {
    inner: Arc<LazyInner>,
}

impl Lazy {
    /// A persisted null: no object id, no referent, terminal.
    pub fn null() -> Self {
        Self::build(ObjectId::NULL, None, LazyState::Null)
    }

    /// Wrap an already-live value. The object id and loader are attached
    /// when the lazy is first stored.
    pub fn from_value(referent: Obj) -> Self {
        Self::build(
            ObjectId::NULL,
            None,
            LazyState::Loaded {
                referent,
                last_touch: Instant::now(),
            },
        )
    }

    /// An unresolved reference to a stored object.
    pub fn unresolved(oid: ObjectId, loader: Arc<dyn ReferenceLoader>) -> Self {
        Self::build(oid, Some(loader), LazyState::Unresolved)
    }

    fn build(
        oid: ObjectId,
        loader: Option<Arc<dyn ReferenceLoader>>,
        state: LazyState,
    ) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                oid: AtomicU64::new(oid.as_u64()),
                loader: RwLock::new(loader),
                state: Mutex::new(state),
            }),
        }
    }

    /// The retained object id, null until first stored.
    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(self.inner.oid.load(Ordering::Acquire))
    }

    /// Resolve and return the referent, `None` for a persisted null.
    ///
    /// First access after construction or unloading invokes the loader;
    /// afterwards the cached referent is returned directly. Every access
    /// touches the idle clock.
    pub fn get(&self) -> Result<Option<Obj>> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            LazyState::Null => Ok(None),
            LazyState::Loaded {
                referent,
                last_touch,
            } => {
                *last_touch = Instant::now();
                Ok(Some(Obj::clone(referent)))
            }
            LazyState::Unresolved | LazyState::Unloaded => {
                let oid = self.object_id();
                if oid.is_null() {
                    return Err(LazyError::NoObjectId.into());
                }
                let loader = self
                    .inner
                    .loader
                    .read()
                    .clone()
                    .ok_or(LazyError::ReferentUnavailable(oid))?;
                let referent = loader.load_reference(oid)?;
                trace!(oid = %oid, "lazy reference resolved");
                *state = LazyState::Loaded {
                    referent: Obj::clone(&referent),
                    last_touch: Instant::now(),
                };
                Ok(Some(referent))
            }
        }
    }

    /// The referent if currently loaded; never triggers the loader and does
    /// not touch the idle clock.
    pub fn peek(&self) -> Option<Obj> {
        match &*self.inner.state.lock() {
            LazyState::Loaded { referent, .. } => Some(Obj::clone(referent)),
            _ => None,
        }
    }

    /// True if the referent is currently materialized.
    pub fn is_loaded(&self) -> bool {
        matches!(&*self.inner.state.lock(), LazyState::Loaded { .. })
    }

    /// True for the persisted-null terminal state.
    pub fn is_null(&self) -> bool {
        matches!(&*self.inner.state.lock(), LazyState::Null)
    }

    /// Current state name, for diagnostics.
    pub fn state_name(&self) -> &'static str {
        self.inner.state.lock().name()
    }

    /// Release the strong referent, keeping id and loader for reload.
    ///
    /// Returns false when there is nothing to unload or the reference could
    /// not be reloaded afterwards (no id or loader yet).
    pub fn unload(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(&*state, LazyState::Loaded { .. }) {
            return false;
        }
        if self.object_id().is_null() || self.inner.loader.read().is_none() {
            return false;
        }
        *state = LazyState::Unloaded;
        true
    }

    /// Sweeper entry point: unload only if idle past `idle_timeout` and the
    /// referent is not strongly held anywhere else.
    pub(crate) fn try_unload_idle(&self, idle_timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        let LazyState::Loaded {
            referent,
            last_touch,
        } = &*state
        else {
            return false;
        };
        if last_touch.elapsed() < idle_timeout {
            return false;
        }
        if self.object_id().is_null() || self.inner.loader.read().is_none() {
            return false;
        }
        // One strong count is our own hold; more means the referent is
        // reachable elsewhere and unloading would buy nothing.
        if Arc::strong_count(referent) > 1 {
            return false;
        }
        trace!(oid = %self.object_id(), "idle lazy reference unloaded");
        *state = LazyState::Unloaded;
        true
    }

    /// Attach persistence identity, called when the lazy is stored.
    pub(crate) fn set_persistence(&self, oid: ObjectId, loader: Arc<dyn ReferenceLoader>) {
        self.inner.oid.store(oid.as_u64(), Ordering::Release);
        let mut slot = self.inner.loader.write();
        if slot.is_none() {
            *slot = Some(loader);
        }
    }

    pub(crate) fn inner_weak(&self) -> Weak<LazyInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<LazyInner>) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for Lazy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("oid", &self.object_id())
            .field("state", &self.state_name())
            .finish()
    }
}

/// Typed convenience wrapper around [`Lazy`].
pub struct LazyTyped<T> {
    lazy: Lazy,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> LazyTyped<T> {
    /// Wrap an untyped lazy reference.
    pub fn new(lazy: Lazy) -> Self {
        Self {
            lazy,
            _marker: PhantomData,
        }
    }

    /// Resolve and downcast the referent.
    pub fn get(&self) -> Result<Option<Arc<T>>> {
        match self.lazy.get()? {
            None => Ok(None),
            Some(obj) => downcast_arc::<T>(&obj)
                .map(Some)
                .ok_or_else(|| {
                    Error::Corruption(format!(
                        "lazy referent is {}, expected {}",
                        obj.type_name(),
                        std::any::type_name::<T>()
                    ))
                }),
        }
    }

    /// The untyped reference.
    pub fn untyped(&self) -> &Lazy {
        &self.lazy
    }
}

/// Built-in handler for [`Lazy`] graph nodes.
///
/// The payload is a single reference slot holding the *referent's* id.
/// Storing an unresolved or unloaded lazy writes the retained id without
/// ever invoking the loader; loading produces an unresolved lazy, so a
/// stored sub-graph stays cold until first touched.
pub struct LazyHandler {
    descriptor: TypeDescriptor,
    loader: Arc<dyn ReferenceLoader>,
    manager: Arc<crate::sweeper::LazyReferenceManager>,
}

impl LazyHandler {
    /// Persisted type name of lazy reference records.
    pub const TYPE_NAME: &'static str = "stow.Lazy";

    /// Create the handler with the loader installed into every lazy it
    /// creates or stores.
    pub fn new(
        loader: Arc<dyn ReferenceLoader>,
        manager: Arc<crate::sweeper::LazyReferenceManager>,
    ) -> Self {
        Self {
            descriptor: TypeDescriptor::new(
                Self::TYPE_NAME,
                vec![FieldDescriptor::new("referent", FieldKind::Reference)],
            ),
            loader,
            manager,
        }
    }

    fn expect_lazy<'o>(&self, obj: &'o Obj) -> Result<&'o Lazy> {
        obj.as_any().downcast_ref::<Lazy>().ok_or_else(|| {
            Error::Corruption(format!(
                "lazy handler received {}, expected {}",
                obj.type_name(),
                Self::TYPE_NAME
            ))
        })
    }
}

impl TypeHandler for LazyHandler {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn runtime_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<Lazy>()
    }

    fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    fn store(
        &self,
        obj: &Obj,
        payload: &mut ByteWriter,
        ctx: &mut dyn StoreContext,
    ) -> Result<()> {
        let lazy = self.expect_lazy(obj)?;

        if let Some(referent) = lazy.peek() {
            // Loaded: the referent joins the traversal and the lazy gains
            // its persistence identity.
            let oid = ctx.reference_oid(&referent)?;
            lazy.set_persistence(oid, Arc::clone(&self.loader));
            payload.write_reference(oid);
            return Ok(());
        }

        if lazy.is_null() {
            payload.write_reference(ObjectId::NULL);
            return Ok(());
        }

        // Unresolved or unloaded: write the retained id. The loader is
        // deliberately not invoked: storing never forces a load.
        let oid = lazy.object_id();
        if oid.is_null() {
            return Err(Error::Corruption(
                "unresolved lazy reference carries no object id".to_string(),
            ));
        }
        payload.write_reference(oid);
        Ok(())
    }

    fn create(&self, record: &RecordView<'_>) -> Result<Obj> {
        let oid = record.payload_reader().read_reference()?;
        let lazy = if oid.is_null() {
            Lazy::null()
        } else {
            Lazy::unresolved(oid, Arc::clone(&self.loader))
        };
        self.manager.track(&lazy);
        Ok(Arc::new(lazy))
    }

    fn update_state(
        &self,
        _obj: &Obj,
        _record: &RecordView<'_>,
        _ctx: &mut dyn LoadContext,
    ) -> Result<()> {
        // Everything was set at create; resolution is deferred by design.
        Ok(())
    }

    fn iterate_references(&self, obj: &Obj, each: &mut dyn FnMut(Obj)) -> Result<()> {
        if let Some(referent) = self.expect_lazy(obj)?.peek() {
            each(referent);
        }
        Ok(())
    }
}
