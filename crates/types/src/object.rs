//! Type-erased object model
//!
//! The engine traverses graphs of `Arc<dyn Persistent>` nodes. `Persistent`
//! is blanket-implemented for every `Send + Sync + 'static` type, so hosts
//! never implement it by hand; per-type behavior lives in the registered
//! [`crate::handler::TypeHandler`], not on the object.
//!
//! Identity is Arc pointer identity: two `Obj` handles denote the same
//! logical object exactly when they point at the same heap allocation.

use std::any::Any;
use std::sync::Arc;

/// A node in a persistable object graph.
pub trait Persistent: Send + Sync + 'static {
    /// Borrow as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Owned `Any` view for Arc downcasting.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Runtime type name, used in diagnostics (`NotPersistable` names the
    /// offending type with this).
    fn type_name(&self) -> &'static str;
}

impl<T: Send + Sync + 'static> Persistent for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl std::fmt::Debug for dyn Persistent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistent")
            .field("type_name", &self.type_name())
            .finish()
    }
}

/// Shared handle to a type-erased graph node.
pub type Obj = Arc<dyn Persistent>;

/// Stable address of the object's heap allocation.
///
/// This is the identity key used by the object registry. The vtable part of
/// the fat pointer is deliberately discarded: vtable addresses are not unique
/// per type across codegen units, the data address is.
pub fn obj_addr(obj: &Obj) -> usize {
    Arc::as_ptr(obj) as *const u8 as usize
}

/// Downcast an object handle to a concrete type.
pub fn downcast_arc<T: Send + Sync + 'static>(obj: &Obj) -> Option<Arc<T>> {
    Arc::clone(obj).as_any_arc().downcast::<T>().ok()
}
