//! Type handlers
//!
//! A TypeHandler is the per-type encode/decode contract: it stores one
//! instance's state into a record payload, allocates blank instances at load
//! time, populates them, and reports the references an instance holds so the
//! session can traverse the graph.
//!
//! Most types use [`GenericTypeHandler`], which is driven entirely by a
//! [`TypeDescriptor`] plus per-field accessor pairs resolved once at
//! registration time. Hand-written handlers implement [`TypeHandler`]
//! directly (the engine's lazy-reference handler does).
//!
//! # Round-trip law
//!
//! `store` output, read back through the same handler's `create` +
//! `update_state`, must reproduce an instance with equal observable state.
//! Handlers opting into validation expose a state string from both the live
//! instance and the freshly written bytes; any mismatch is fatal at store
//! time.

use crate::descriptor::{FieldDescriptor, FieldKind, FieldValue, TypeDescriptor, WireValue};
use crate::object::Obj;
use std::any::TypeId as RuntimeTypeId;
use std::marker::PhantomData;
use std::sync::Arc;
use stow_codec::cursor::ByteWriter;
use stow_codec::record::RecordView;
use stow_core::error::{Error, Result};
use stow_core::types::ObjectId;

/// Store-side session callbacks available to handlers.
pub trait StoreContext {
    /// Swizzle a live reference into its object id, assigning one and
    /// enqueueing the referent for storage if it has none yet.
    fn reference_oid(&mut self, obj: &Obj) -> Result<ObjectId>;
}

/// Load-side session callbacks available to handlers.
pub trait LoadContext {
    /// Swizzle an object id back into a live reference, loading the referent
    /// through the session if it is not yet materialized. The null sentinel
    /// resolves to `None`.
    fn resolve_reference(&mut self, oid: ObjectId) -> Result<Option<Obj>>;
}

/// Per-type encode/decode contract.
pub trait TypeHandler: Send + Sync {
    /// Fully qualified persisted type name.
    fn type_name(&self) -> &str;

    /// Rust runtime type this handler covers.
    fn runtime_type(&self) -> RuntimeTypeId;

    /// Binary schema of the payload this handler writes.
    fn descriptor(&self) -> &TypeDescriptor;

    /// Write one instance's state into a record payload.
    fn store(&self, obj: &Obj, payload: &mut ByteWriter, ctx: &mut dyn StoreContext)
        -> Result<()>;

    /// Allocate a blank instance for a record.
    ///
    /// The session registers the instance *before* populating it, so this
    /// must not touch reference slots.
    fn create(&self, record: &RecordView<'_>) -> Result<Obj>;

    /// Populate an instance from a record, resolving reference slots through
    /// the session.
    fn update_state(
        &self,
        obj: &Obj,
        record: &RecordView<'_>,
        ctx: &mut dyn LoadContext,
    ) -> Result<()>;

    /// Called once all directly and transitively required state is in place.
    fn complete(&self, _obj: &Obj) -> Result<()> {
        Ok(())
    }

    /// Report every reference the instance holds.
    fn iterate_references(&self, obj: &Obj, each: &mut dyn FnMut(Obj)) -> Result<()>;

    /// Field-wise update capability, used by legacy handlers to route mapped
    /// values into the current schema. Descriptor-driven handlers support
    /// this; hand-written ones usually do not.
    fn set_field(&self, _obj: &Obj, _index: usize, _value: FieldValue) -> Result<()> {
        Err(Error::Corruption(format!(
            "handler for {} does not support field-wise updates",
            self.type_name()
        )))
    }

    /// State string derived from the live instance, for types with a
    /// validation contract. `None` means no contract.
    fn validation_state(&self, _obj: &Obj) -> Result<Option<String>> {
        Ok(None)
    }

    /// State string derived from freshly written payload bytes. Must render
    /// identically to [`TypeHandler::validation_state`] for uncorrupted data.
    fn binary_state(&self, _payload: &[u8]) -> Result<Option<String>> {
        Ok(None)
    }
}

impl std::fmt::Debug for dyn TypeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHandler")
            .field("type_name", &self.type_name())
            .finish()
    }
}

type GetFn = dyn Fn(&Obj) -> Result<FieldValue> + Send + Sync;
type SetFn = dyn Fn(&Obj, FieldValue) -> Result<()> + Send + Sync;

/// One field's accessor pair, resolved once at registration time.
pub struct FieldAccessor {
    get: Box<GetFn>,
    set: Box<SetFn>,
}

impl FieldAccessor {
    /// Build an accessor pair from typed closures.
    ///
    /// The stored closures downcast the type-erased object internally; a
    /// downcast failure means the handler was registered for the wrong
    /// runtime type and surfaces as corruption.
    pub fn new<T, G, S>(get: G, set: S) -> Self
    where
        T: Send + Sync + 'static,
        G: Fn(&T) -> FieldValue + Send + Sync + 'static,
        S: Fn(&T, FieldValue) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            get: Box::new(move |obj: &Obj| {
                let concrete = downcast_ref::<T>(obj)?;
                Ok(get(concrete))
            }),
            set: Box::new(move |obj: &Obj, value: FieldValue| {
                let concrete = downcast_ref::<T>(obj)?;
                set(concrete, value)
            }),
        }
    }

    /// Read the field from an instance.
    pub fn get(&self, obj: &Obj) -> Result<FieldValue> {
        (self.get)(obj)
    }

    /// Write the field on an instance.
    pub fn set(&self, obj: &Obj, value: FieldValue) -> Result<()> {
        (self.set)(obj, value)
    }
}

fn downcast_ref<'a, T: Send + Sync + 'static>(obj: &'a Obj) -> Result<&'a T> {
    obj.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::Corruption(format!(
            "accessor type mismatch: object is {}, accessor expects {}",
            obj.type_name(),
            std::any::type_name::<T>()
        ))
    })
}

type InstantiateFn = dyn Fn() -> Obj + Send + Sync;
type CompleteFn = dyn Fn(&Obj) -> Result<()> + Send + Sync;

/// Descriptor-driven type handler.
///
/// Stores and loads instances purely from the descriptor's field list and
/// the accessor pairs supplied at build time. Legacy type handlers reuse its
/// field-wise update capability to map old payload layouts onto it.
pub struct GenericTypeHandler {
    descriptor: TypeDescriptor,
    runtime_type: RuntimeTypeId,
    instantiate: Box<InstantiateFn>,
    accessors: Vec<FieldAccessor>,
    completer: Option<Box<CompleteFn>>,
    validating: bool,
}

impl GenericTypeHandler {
    /// Start building a handler for concrete type `T`.
    ///
    /// `instantiate` allocates a blank instance; reference fields must start
    /// out empty since population happens after registration.
    pub fn builder<T, F>(
        type_name: impl Into<String>,
        instantiate: F,
    ) -> GenericTypeHandlerBuilder<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        GenericTypeHandlerBuilder {
            type_name: type_name.into(),
            fields: Vec::new(),
            accessors: Vec::new(),
            instantiate: Box::new(move || Arc::new(instantiate()) as Obj),
            completer: None,
            validating: false,
            _marker: PhantomData,
        }
    }

    fn render_states(&self, values: &[String]) -> String {
        self.descriptor
            .fields
            .iter()
            .zip(values)
            .map(|(field, value)| format!("{}={}", field.name, value))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl TypeHandler for GenericTypeHandler {
    fn type_name(&self) -> &str {
        &self.descriptor.type_name
    }

    fn runtime_type(&self) -> RuntimeTypeId {
        self.runtime_type
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
        for (field, accessor) in self.descriptor.fields.iter().zip(&self.accessors) {
            let value = accessor.get(obj)?;
            if value.kind() != field.kind {
                return Err(Error::Corruption(format!(
                    "handler for {} produced {} for field {} declared {}",
                    self.type_name(),
                    value.kind(),
                    field.name,
                    field.kind
                )));
            }
            match value {
                FieldValue::I64(v) => payload.write_i64(v),
                FieldValue::F64(v) => payload.write_f64(v),
                FieldValue::Bool(v) => payload.write_bool(v),
                FieldValue::Text(v) => payload.write_text(&v),
                FieldValue::Bytes(v) => payload.write_var_bytes(&v),
                FieldValue::Reference(referent) => {
                    let oid = match referent {
                        Some(obj) => ctx.reference_oid(&obj)?,
                        None => ObjectId::NULL,
                    };
                    payload.write_reference(oid);
                }
            }
        }
        Ok(())
    }

    fn create(&self, _record: &RecordView<'_>) -> Result<Obj> {
        Ok((self.instantiate)())
    }

    fn update_state(
        &self,
        obj: &Obj,
        record: &RecordView<'_>,
        ctx: &mut dyn LoadContext,
    ) -> Result<()> {
        let mut reader = record.payload_reader();
        for (index, field) in self.descriptor.fields.iter().enumerate() {
            let wire = WireValue::decode(&mut reader, field.kind)?;
            let value = wire_to_field(wire, ctx)?;
            self.accessors[index].set(obj, value)?;
        }
        Ok(())
    }

    fn complete(&self, obj: &Obj) -> Result<()> {
        if let Some(completer) = &self.completer {
            completer(obj)?;
        }
        Ok(())
    }

    fn iterate_references(&self, obj: &Obj, each: &mut dyn FnMut(Obj)) -> Result<()> {
        for (field, accessor) in self.descriptor.fields.iter().zip(&self.accessors) {
            if field.kind != FieldKind::Reference {
                continue;
            }
            if let Some(referent) = accessor.get(obj)?.into_reference()? {
                each(referent);
            }
        }
        Ok(())
    }

    fn set_field(&self, obj: &Obj, index: usize, value: FieldValue) -> Result<()> {
        let accessor = self.accessors.get(index).ok_or_else(|| {
            Error::Corruption(format!(
                "field index {} out of range for {}",
                index,
                self.type_name()
            ))
        })?;
        accessor.set(obj, value)
    }

    fn validation_state(&self, obj: &Obj) -> Result<Option<String>> {
        if !self.validating {
            return Ok(None);
        }
        let mut rendered = Vec::with_capacity(self.accessors.len());
        for accessor in &self.accessors {
            rendered.push(render_field_value(&accessor.get(obj)?));
        }
        Ok(Some(self.render_states(&rendered)))
    }

    fn binary_state(&self, payload: &[u8]) -> Result<Option<String>> {
        if !self.validating {
            return Ok(None);
        }
        let mut reader = stow_codec::cursor::ByteReader::new(payload);
        let mut rendered = Vec::with_capacity(self.descriptor.fields.len());
        for field in &self.descriptor.fields {
            rendered.push(WireValue::decode(&mut reader, field.kind)?.render());
        }
        Ok(Some(self.render_states(&rendered)))
    }
}

/// Resolve a decoded wire value into its runtime form, swizzling references
/// through the load session.
pub(crate) fn wire_to_field(wire: WireValue, ctx: &mut dyn LoadContext) -> Result<FieldValue> {
    Ok(match wire {
        WireValue::I64(v) => FieldValue::I64(v),
        WireValue::F64(v) => FieldValue::F64(v),
        WireValue::Bool(v) => FieldValue::Bool(v),
        WireValue::Text(v) => FieldValue::Text(v),
        WireValue::Bytes(v) => FieldValue::Bytes(v),
        WireValue::Reference(oid) => FieldValue::Reference(ctx.resolve_reference(oid)?),
    })
}

fn render_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::I64(v) => v.to_string(),
        FieldValue::F64(v) => format!("{v:.6}"),
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::Text(v) => v.clone(),
        FieldValue::Bytes(v) => format!("<{} bytes>", v.len()),
        FieldValue::Reference(Some(_)) => "ref:present".to_string(),
        FieldValue::Reference(None) => "ref:null".to_string(),
    }
}

/// Builder for [`GenericTypeHandler`], typed over the concrete type.
pub struct GenericTypeHandlerBuilder<T> {
    type_name: String,
    fields: Vec<FieldDescriptor>,
    accessors: Vec<FieldAccessor>,
    instantiate: Box<InstantiateFn>,
    completer: Option<Box<CompleteFn>>,
    validating: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> GenericTypeHandlerBuilder<T> {
    /// Declare the next field in payload order, with its accessor pair.
    pub fn field<G, S>(mut self, name: impl Into<String>, kind: FieldKind, get: G, set: S) -> Self
    where
        G: Fn(&T) -> FieldValue + Send + Sync + 'static,
        S: Fn(&T, FieldValue) -> Result<()> + Send + Sync + 'static,
    {
        self.fields.push(FieldDescriptor::new(name, kind));
        self.accessors.push(FieldAccessor::new(get, set));
        self
    }

    /// Install a completion hook, run once all state is in place.
    pub fn on_complete<F>(mut self, complete: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.completer = Some(Box::new(move |obj: &Obj| {
            let concrete = downcast_ref::<T>(obj)?;
            complete(concrete)
        }));
        self
    }

    /// Opt into the store-time validation contract: every store re-derives
    /// the state string from the written bytes and compares.
    pub fn validating(mut self) -> Self {
        self.validating = true;
        self
    }

    /// Finish the handler.
    pub fn build(self) -> GenericTypeHandler {
        GenericTypeHandler {
            descriptor: TypeDescriptor::new(self.type_name, self.fields),
            runtime_type: RuntimeTypeId::of::<T>(),
            instantiate: self.instantiate,
            accessors: self.accessors,
            completer: self.completer,
            validating: self.validating,
        }
    }
}
