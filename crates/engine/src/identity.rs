//! Object identity registry
//!
//! Maps stable object ids to live instances and back. Within one registry
//! the (OID <-> object) mapping is a bijection: two different live objects
//! never share an OID, and one OID never simultaneously maps to two
//! different live objects.
//!
//! Identity is Arc pointer identity, not value equality. Instances are held
//! weakly so the registry never keeps a graph alive; a dead weak entry marks
//! its address as reusable, which is how address reuse after drop is told
//! apart from a live hit.
//!
//! # Thread Safety
//!
//! Both directions are `DashMap`s (sharded, lock-free reads); sessions keep
//! a local fast path so the shared maps are only touched once per object per
//! session.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use stow_core::error::{Error, Result};
use stow_core::types::ObjectId;
use stow_types::object::{obj_addr, Obj, Persistent};

/// Hands out object ids exactly once each.
#[derive(Debug)]
pub struct ObjectIdProvider {
    next: AtomicU64,
}

impl ObjectIdProvider {
    /// Create a provider whose first id is `base`.
    ///
    /// `base` must be nonzero; zero is the null sentinel.
    pub fn new(base: u64) -> Self {
        Self {
            next: AtomicU64::new(base.max(1)),
        }
    }

    /// Hand out the next id.
    pub fn next(&self) -> ObjectId {
        ObjectId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Highest id handed out so far, or `base - 1` if none.
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed).saturating_sub(1)
    }
}

struct AddrEntry {
    oid: ObjectId,
    object: Weak<dyn Persistent>,
}

/// OID <-> live instance registry for one store.
pub struct ObjectRegistry {
    provider: ObjectIdProvider,
    // Lock order: by_addr shard before by_oid shard, everywhere.
    by_addr: DashMap<usize, AddrEntry>,
    by_oid: DashMap<ObjectId, Weak<dyn Persistent>>,
}

impl ObjectRegistry {
    /// Create a registry whose provider starts at `oid_base`.
    pub fn new(oid_base: u64) -> Self {
        Self {
            provider: ObjectIdProvider::new(oid_base),
            by_addr: DashMap::new(),
            by_oid: DashMap::new(),
        }
    }

    /// Look up the id already assigned to a live object.
    pub fn lookup_id(&self, obj: &Obj) -> Option<ObjectId> {
        let entry = self.by_addr.get(&obj_addr(obj))?;
        // A dead weak means the address was reused by a new allocation.
        entry.object.upgrade().map(|_| entry.oid)
    }

    /// Get or assign the id for a live object (identity-based, not
    /// value-based).
    pub fn ensure_id(&self, obj: &Obj) -> ObjectId {
        let addr = obj_addr(obj);
        match self.by_addr.entry(addr) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().object.upgrade().is_some() {
                    return occupied.get().oid;
                }
                // Address reuse: retire the stale binding, assign fresh.
                let stale = occupied.get().oid;
                let oid = self.provider.next();
                occupied.insert(AddrEntry {
                    oid,
                    object: Arc::downgrade(obj),
                });
                self.by_oid.remove(&stale);
                self.by_oid.insert(oid, Arc::downgrade(obj));
                oid
            }
            Entry::Vacant(vacant) => {
                let oid = self.provider.next();
                vacant.insert(AddrEntry {
                    oid,
                    object: Arc::downgrade(obj),
                });
                self.by_oid.insert(oid, Arc::downgrade(obj));
                oid
            }
        }
    }

    /// Look up the live instance for an id, `None` if absent or collected.
    pub fn lookup_object(&self, oid: ObjectId) -> Option<Obj> {
        let weak = self.by_oid.get(&oid)?.clone();
        match weak.upgrade() {
            Some(obj) => Some(obj),
            None => {
                // Prune the dead entry so the id can be re-registered.
                drop(weak);
                self.by_oid.remove_if(&oid, |_, w| w.upgrade().is_none());
                None
            }
        }
    }

    /// Register a loaded instance under the id from its record.
    ///
    /// Returns the canonical instance for the id: if a concurrent session
    /// registered one first, that instance wins and the caller's is
    /// discarded (at-most-once identity). Violating the bijection the other
    /// way (one live object under two ids) is corruption.
    pub fn register(&self, oid: ObjectId, obj: &Obj) -> Result<Obj> {
        let addr = obj_addr(obj);

        {
            let entry = self.by_addr.entry(addr);
            match entry {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().object.upgrade().is_some() {
                        if occupied.get().oid != oid {
                            return Err(Error::Corruption(format!(
                                "object already registered under oid {}, cannot re-register as {}",
                                occupied.get().oid,
                                oid
                            )));
                        }
                    } else {
                        occupied.insert(AddrEntry {
                            oid,
                            object: Arc::downgrade(obj),
                        });
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(AddrEntry {
                        oid,
                        object: Arc::downgrade(obj),
                    });
                }
            }
        }

        // Decide under the by_oid guard, clean up by_addr only after the
        // guard is dropped (lock order: by_addr before by_oid).
        let mut lost_to: Option<Obj> = None;
        let canonical = match self.by_oid.entry(oid) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = occupied.get().upgrade() {
                    if obj_addr(&existing) != addr {
                        // Lost the race: another session registered first.
                        lost_to = Some(Arc::clone(&existing));
                    }
                    existing
                } else {
                    occupied.insert(Arc::downgrade(obj));
                    Arc::clone(obj)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::downgrade(obj));
                Arc::clone(obj)
            }
        };

        if let Some(existing) = lost_to {
            // Retract our by_addr claim and hand back the winner.
            self.by_addr.remove_if(&addr, |_, e| e.oid == oid);
            return Ok(existing);
        }
        Ok(canonical)
    }

    /// Count of registrations whose instance is still alive.
    pub fn live_count(&self) -> usize {
        self.by_oid
            .iter()
            .filter(|entry| entry.value().upgrade().is_some())
            .count()
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("entries", &self.by_oid.len())
            .field("next_oid", &(self.provider.current() + 1))
            .finish()
    }
}
