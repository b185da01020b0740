//! Type dictionary
//!
//! The dictionary binds TypeIds to type descriptors and renders the whole
//! binding as text so it can be persisted alongside the data. A future
//! process can then perform legacy resolution from the stored text even when
//! the original type is no longer available in code.
//!
//! # Text format
//!
//! One block per type, ids in ascending order:
//!
//! ```text
//! 1000001 example.Person {
//!     text name,
//!     i64 age,
//!     reference address,
//! }
//! ```

use crate::descriptor::{FieldDescriptor, FieldKind, TypeDescriptor};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use stow_core::error::{Result, TypeResolutionError};
use stow_core::types::TypeId;

/// First id handed out for registered types.
const TYPE_ID_BASE: u64 = 1_000_000;

/// TypeId <-> TypeDescriptor binding for one store.
///
/// Registration is permanent: ids are never reassigned and a name is never
/// rebound to a different schema. Dictionaries are therefore sensitive to
/// registration order: two processes must register the same types in the
/// same order to produce interoperable stores.
///
/// # Thread Safety
///
/// All maps are behind `RwLock`; id assignment is atomic. Shared freely
/// between concurrent sessions.
pub struct TypeDictionary {
    next_id: AtomicU64,
    by_id: RwLock<FxHashMap<TypeId, TypeDescriptor>>,
    by_name: RwLock<FxHashMap<String, TypeId>>,
    /// Bindings seeded from a persisted dictionary, not yet adopted by a
    /// registration. Kept so legacy ids survive re-export.
    reserved: RwLock<FxHashMap<String, (TypeId, TypeDescriptor)>>,
}

impl TypeDictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(TYPE_ID_BASE),
            by_id: RwLock::new(FxHashMap::default()),
            by_name: RwLock::new(FxHashMap::default()),
            reserved: RwLock::new(FxHashMap::default()),
        }
    }

    /// Seed the dictionary with bindings persisted by an earlier process.
    ///
    /// A later registration of the same name with the same schema adopts the
    /// seeded id, making type ids independent of registration order once a
    /// store exists. Seeded bindings whose schema no longer matches stay
    /// reserved: their ids remain in the exported dictionary so legacy
    /// resolution can still interpret old records.
    pub fn seed(&self, entries: Vec<(TypeId, TypeDescriptor)>) {
        let mut reserved = self.reserved.write();
        for (id, descriptor) in entries {
            self.next_id.fetch_max(id.as_u64() + 1, Ordering::Relaxed);
            reserved.insert(descriptor.type_name.clone(), (id, descriptor));
        }
    }

    /// Register a descriptor, assigning (or adopting) its id.
    ///
    /// Re-registering an identical schema under the same name returns the
    /// existing id; a different schema under a bound name is a
    /// [`TypeResolutionError::SchemaConflict`]. A seeded binding with the
    /// same schema is adopted; a seeded binding with a different schema
    /// stays reserved and the registration gets a fresh id (the old id is
    /// then only reachable through legacy resolution).
    pub fn register(&self, descriptor: &TypeDescriptor) -> Result<TypeId> {
        // All maps under the name lock for the whole check-then-insert.
        let mut by_name = self.by_name.write();
        let mut by_id = self.by_id.write();
        let mut reserved = self.reserved.write();

        if let Some(&existing) = by_name.get(&descriptor.type_name) {
            let bound = &by_id[&existing];
            if bound.same_schema(descriptor) {
                return Ok(existing);
            }
            return Err(TypeResolutionError::SchemaConflict {
                type_name: descriptor.type_name.clone(),
                existing,
            }
            .into());
        }

        if let Some((seeded_id, seeded_descriptor)) = reserved.get(&descriptor.type_name) {
            if seeded_descriptor.same_schema(descriptor) {
                let id = *seeded_id;
                reserved.remove(&descriptor.type_name);
                by_name.insert(descriptor.type_name.clone(), id);
                by_id.insert(id, descriptor.clone());
                return Ok(id);
            }
        }

        let id = TypeId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        by_name.insert(descriptor.type_name.clone(), id);
        by_id.insert(id, descriptor.clone());
        Ok(id)
    }

    /// Look up the descriptor bound to an id.
    pub fn lookup(&self, id: TypeId) -> Option<TypeDescriptor> {
        self.by_id.read().get(&id).cloned()
    }

    /// Look up a type by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<(TypeId, TypeDescriptor)> {
        let id = *self.by_name.read().get(name)?;
        Some((id, self.by_id.read().get(&id)?.clone()))
    }

    /// True if the id is bound.
    pub fn contains(&self, id: TypeId) -> bool {
        self.by_id.read().contains_key(&id)
    }

    /// Number of bound types.
    pub fn len(&self) -> usize {
        self.by_id.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.read().is_empty()
    }

    /// All registered bindings, ascending by id.
    pub fn all(&self) -> Vec<(TypeId, TypeDescriptor)> {
        let mut entries: Vec<_> = self
            .by_id
            .read()
            .iter()
            .map(|(id, d)| (*id, d.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Render the whole dictionary as persistable text.
    ///
    /// Includes still-reserved legacy bindings: old records keep their ids
    /// resolvable across any number of re-exports.
    pub fn assemble(&self) -> String {
        let mut entries = self.all();
        entries.extend(
            self.reserved
                .read()
                .values()
                .map(|(id, d)| (*id, d.clone())),
        );
        entries.sort_by_key(|(id, _)| *id);

        let mut out = String::new();
        for (id, descriptor) in entries {
            assemble_type(&mut out, id, &descriptor);
        }
        out
    }

    /// Parse dictionary text into its bindings.
    ///
    /// This does not register anything; callers decide whether the parsed
    /// bindings describe the current schema or a legacy one.
    pub fn compile(text: &str) -> Result<Vec<(TypeId, TypeDescriptor)>> {
        let mut entries = Vec::new();
        let mut current: Option<(TypeId, String, Vec<FieldDescriptor>)> = None;

        for (line_index, raw_line) in text.lines().enumerate() {
            let line_no = line_index + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if line == "}" {
                match current.take() {
                    Some((id, name, fields)) => {
                        entries.push((id, TypeDescriptor::new(name, fields)));
                        continue;
                    }
                    None => return Err(parse_error(line_no, "'}' outside a type block")),
                }
            }

            if let Some((_, _, fields)) = current.as_mut() {
                let field_line = line.strip_suffix(',').ok_or_else(|| parse_error(
                    line_no,
                    "expected trailing comma on field line",
                ))?;
                let mut parts = field_line.split_whitespace();
                let kind_token = parts
                    .next()
                    .ok_or_else(|| parse_error(line_no, "missing field kind"))?;
                let field_name = parts
                    .next()
                    .ok_or_else(|| parse_error(line_no, "missing field name"))?;
                if parts.next().is_some() {
                    return Err(parse_error(line_no, "unexpected tokens after field name"));
                }
                let kind = FieldKind::from_token(kind_token).ok_or_else(|| {
                    parse_error(line_no, &format!("unknown field kind {kind_token:?}"))
                })?;
                fields.push(FieldDescriptor::new(field_name, kind));
                continue;
            }

            // Header line: `<id> <name> {`
            let header = line
                .strip_suffix('{')
                .ok_or_else(|| parse_error(line_no, "expected type header ending in '{'"))?
                .trim();
            let mut parts = header.split_whitespace();
            let id_token = parts
                .next()
                .ok_or_else(|| parse_error(line_no, "missing type id"))?;
            let name = parts
                .next()
                .ok_or_else(|| parse_error(line_no, "missing type name"))?;
            if parts.next().is_some() {
                return Err(parse_error(line_no, "unexpected tokens in type header"));
            }
            let id: u64 = id_token
                .parse()
                .map_err(|_| parse_error(line_no, &format!("invalid type id {id_token:?}")))?;
            current = Some((TypeId::new(id), name.to_string(), Vec::new()));
        }

        if current.is_some() {
            return Err(parse_error(
                text.lines().count(),
                "unterminated type block (missing '}')",
            ));
        }

        Ok(entries)
    }
}

impl Default for TypeDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDictionary")
            .field("type_count", &self.len())
            .finish()
    }
}

fn assemble_type(out: &mut String, id: TypeId, descriptor: &TypeDescriptor) {
    out.push_str(&format!("{} {} {{\n", id, descriptor.type_name));
    for field in &descriptor.fields {
        out.push_str(&format!("    {} {},\n", field.kind, field.name));
    }
    out.push_str("}\n");
}

fn parse_error(line: usize, detail: &str) -> stow_core::error::Error {
    TypeResolutionError::DictionaryParse {
        line,
        detail: detail.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TypeDescriptor {
        TypeDescriptor::new(
            "example.Person",
            vec![
                FieldDescriptor::new("name", FieldKind::Text),
                FieldDescriptor::new("age", FieldKind::I64),
                FieldDescriptor::new("address", FieldKind::Reference),
            ],
        )
    }

    fn address() -> TypeDescriptor {
        TypeDescriptor::new(
            "example.Address",
            vec![FieldDescriptor::new("street", FieldKind::Text)],
        )
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let dictionary = TypeDictionary::new();
        let a = dictionary.register(&person()).unwrap();
        let b = dictionary.register(&address()).unwrap();
        assert!(b > a);
        assert_eq!(a.as_u64(), TYPE_ID_BASE + 1);
    }

    #[test]
    fn test_register_idempotent_for_same_schema() {
        let dictionary = TypeDictionary::new();
        let a = dictionary.register(&person()).unwrap();
        let b = dictionary.register(&person()).unwrap();
        assert_eq!(a, b);
        assert_eq!(dictionary.len(), 1);
    }

    #[test]
    fn test_register_conflicting_schema_fails() {
        let dictionary = TypeDictionary::new();
        dictionary.register(&person()).unwrap();

        let mut changed = person();
        changed.fields.pop();
        let err = dictionary.register(&changed).unwrap_err();
        assert!(err.to_string().contains("different schema"));
    }

    #[test]
    fn test_lookup_by_name() {
        let dictionary = TypeDictionary::new();
        let id = dictionary.register(&person()).unwrap();
        let (found_id, descriptor) = dictionary.lookup_by_name("example.Person").unwrap();
        assert_eq!(found_id, id);
        assert_eq!(descriptor, person());
        assert!(dictionary.lookup_by_name("example.Missing").is_none());
    }

    #[test]
    fn test_assemble_format() {
        let dictionary = TypeDictionary::new();
        let id = dictionary.register(&person()).unwrap();

        let text = dictionary.assemble();
        assert!(text.starts_with(&format!("{id} example.Person {{\n")));
        assert!(text.contains("    text name,\n"));
        assert!(text.contains("    i64 age,\n"));
        assert!(text.contains("    reference address,\n"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_assemble_compile_roundtrip() {
        let dictionary = TypeDictionary::new();
        let person_id = dictionary.register(&person()).unwrap();
        let address_id = dictionary.register(&address()).unwrap();

        let entries = TypeDictionary::compile(&dictionary.assemble()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (person_id, person()));
        assert_eq!(entries[1], (address_id, address()));
    }

    #[test]
    fn test_compile_empty() {
        assert!(TypeDictionary::compile("").unwrap().is_empty());
        assert!(TypeDictionary::compile("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_compile_rejects_unknown_kind() {
        let text = "1000001 t.T {\n    varchar name,\n}\n";
        let err = TypeDictionary::compile(text).unwrap_err();
        assert!(err.to_string().contains("unknown field kind"));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_compile_rejects_unterminated_block() {
        let text = "1000001 t.T {\n    i64 x,\n";
        assert!(TypeDictionary::compile(text).is_err());
    }

    #[test]
    fn test_compile_rejects_missing_comma() {
        let text = "1000001 t.T {\n    i64 x\n}\n";
        assert!(TypeDictionary::compile(text).is_err());
    }

    #[test]
    fn test_seeded_id_is_adopted_regardless_of_order() {
        let stored = TypeDictionary::new();
        let person_id = stored.register(&person()).unwrap();
        let address_id = stored.register(&address()).unwrap();

        // New process registers in the opposite order, seeded from the text.
        let fresh = TypeDictionary::new();
        fresh.seed(TypeDictionary::compile(&stored.assemble()).unwrap());
        let new_address_id = fresh.register(&address()).unwrap();
        let new_person_id = fresh.register(&person()).unwrap();

        assert_eq!(new_person_id, person_id);
        assert_eq!(new_address_id, address_id);
    }

    #[test]
    fn test_seeded_schema_change_gets_fresh_id_and_keeps_old() {
        let stored = TypeDictionary::new();
        let old_id = stored.register(&person()).unwrap();

        let fresh = TypeDictionary::new();
        fresh.seed(TypeDictionary::compile(&stored.assemble()).unwrap());

        let mut changed = person();
        changed.fields[1].name = "years".to_string();
        let new_id = fresh.register(&changed).unwrap();
        assert_ne!(new_id, old_id);

        // Both the legacy and the current binding survive export.
        let text = fresh.assemble();
        assert!(text.contains(&format!("{old_id} example.Person")));
        assert!(text.contains(&format!("{new_id} example.Person")));
    }

    #[test]
    fn test_debug_impl() {
        let dictionary = TypeDictionary::new();
        dictionary.register(&person()).unwrap();
        let rendered = format!("{dictionary:?}");
        assert!(rendered.contains("TypeDictionary"));
        assert!(rendered.contains("type_count"));
    }
}
