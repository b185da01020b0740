//! Legacy type mapping
//!
//! When a stored schema (from the persisted type dictionary) no longer
//! matches the current descriptor for the same type, old fields are mapped
//! onto current fields:
//!
//! 1. exact name matches bind first (when the kinds are at all compatible);
//! 2. remaining pairs are scored by field similarity and accepted only with
//!    the approval of an external [`MatchValidator`]; with no validator
//!    installed, similarity candidates are dropped rather than guessed;
//! 3. ties break by highest score, then first-declared order;
//! 4. unmapped old fields are recorded as mapping gaps and skipped, unmapped
//!    current fields receive their kind's default value.
//!
//! A validator that cannot decide a candidate fails the whole mapping closed
//! ([`stow_core::error::LegacyMappingError::Ambiguous`]). Mappings are
//! computed once per (old schema, current schema) pair and cached.

use crate::descriptor::{FieldDescriptor, TypeDescriptor, WireValue};
use crate::handler::{wire_to_field, LoadContext, StoreContext, TypeHandler};
use crate::object::Obj;
use crate::similarity::field_similarity;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::TypeId as RuntimeTypeId;
use std::sync::Arc;
use stow_codec::cursor::ByteWriter;
use stow_codec::record::RecordView;
use stow_core::error::{Error, LegacyMappingError, Result};
use tracing::debug;

/// External arbiter for similarity-based field matches.
pub trait MatchValidator: Send + Sync {
    /// Decide one candidate pair.
    ///
    /// `competing_old` / `competing_new` are the counts of other candidates
    /// involving the same old / new field. Return `Some(true)` to approve,
    /// `Some(false)` to reject (the field is dropped), or `None` if the
    /// candidate cannot be decided, which fails the whole mapping closed.
    fn approve(
        &self,
        old: &FieldDescriptor,
        new: &FieldDescriptor,
        score: f64,
        competing_old: usize,
        competing_new: usize,
    ) -> Option<bool>;
}

/// Default validator: approve any candidate at or above a fixed score.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdValidator {
    threshold: f64,
}

impl ThresholdValidator {
    /// Create a validator with the given acceptance threshold.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl MatchValidator for ThresholdValidator {
    fn approve(
        &self,
        _old: &FieldDescriptor,
        _new: &FieldDescriptor,
        score: f64,
        _competing_old: usize,
        _competing_new: usize,
    ) -> Option<bool> {
        Some(score >= self.threshold)
    }
}

/// How one old field was bound to a current field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    /// Field names were identical.
    ExactName,
    /// Bound by similarity with validator approval, at this score.
    Similarity(f64),
}

/// Computed mapping between an old and the current schema of one type.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// `(old_index, new_index, kind)` per bound pair.
    pub matched: Vec<(usize, usize, MatchKind)>,
    /// Old fields with no binding: mapping gaps, skipped at load.
    pub dropped_old: Vec<usize>,
    /// Current fields with no binding: receive their kind's default.
    pub defaulted_new: Vec<usize>,
}

impl FieldMapping {
    /// Target index for an old field, if bound.
    pub fn new_index_of(&self, old_index: usize) -> Option<usize> {
        self.matched
            .iter()
            .find(|(old, _, _)| *old == old_index)
            .map(|(_, new, _)| *new)
    }

    /// True if nothing was dropped or defaulted.
    pub fn is_complete(&self) -> bool {
        self.dropped_old.is_empty() && self.defaulted_new.is_empty()
    }
}

/// Computes and caches legacy field mappings.
pub struct LegacyTypeMapper {
    validator: Option<Arc<dyn MatchValidator>>,
    cache: Mutex<FxHashMap<(String, String), Arc<FieldMapping>>>,
}

impl LegacyTypeMapper {
    /// Create a mapper with a similarity validator.
    pub fn new(validator: Arc<dyn MatchValidator>) -> Self {
        Self {
            validator: Some(validator),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Create a mapper without a validator: only exact name matches bind,
    /// similarity candidates are dropped (fail closed, never guessed).
    pub fn without_validator() -> Self {
        Self {
            validator: None,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Map an old schema onto the current one, cached per schema pair.
    pub fn map(
        &self,
        old: &TypeDescriptor,
        current: &TypeDescriptor,
    ) -> Result<Arc<FieldMapping>> {
        let key = (old.signature(), current.signature());
        if let Some(mapping) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(mapping));
        }

        let mapping = Arc::new(self.compute(old, current)?);
        self.cache.lock().insert(key, Arc::clone(&mapping));
        Ok(mapping)
    }

    fn compute(&self, old: &TypeDescriptor, current: &TypeDescriptor) -> Result<FieldMapping> {
        let mut matched: Vec<(usize, usize, MatchKind)> = Vec::new();
        let mut new_taken = vec![false; current.fields.len()];
        let mut old_bound = vec![false; old.fields.len()];

        // Phase 1: exact name matches (kinds must be at all compatible).
        for (i, old_field) in old.fields.iter().enumerate() {
            if let Some(j) = current.fields.iter().position(|f| f.name == old_field.name) {
                if new_taken[j] {
                    continue;
                }
                if crate::similarity::kind_compatibility(old_field.kind, current.fields[j].kind)
                    > 0.0
                {
                    matched.push((i, j, MatchKind::ExactName));
                    new_taken[j] = true;
                    old_bound[i] = true;
                }
            }
        }

        // Phase 2: similarity candidates, validator-gated.
        if let Some(validator) = &self.validator {
            // Candidate pool over unbound fields only; counts feed the
            // validator so it can weigh contested matches.
            let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
            for (i, old_field) in old.fields.iter().enumerate() {
                if old_bound[i] {
                    continue;
                }
                for (j, new_field) in current.fields.iter().enumerate() {
                    if new_taken[j] {
                        continue;
                    }
                    let score = field_similarity(old_field, new_field);
                    if score > 0.0 {
                        candidates.push((i, j, score));
                    }
                }
            }

            let mut competing_old = vec![0usize; old.fields.len()];
            let mut competing_new = vec![0usize; current.fields.len()];
            for &(i, j, _) in &candidates {
                competing_old[i] += 1;
                competing_new[j] += 1;
            }

            for (i, old_field) in old.fields.iter().enumerate() {
                if old_bound[i] {
                    continue;
                }
                // Best score first; among equals, first-declared target wins.
                let mut own: Vec<&(usize, usize, f64)> =
                    candidates.iter().filter(|(ci, _, _)| *ci == i).collect();
                own.sort_by(|a, b| {
                    b.2.partial_cmp(&a.2)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.1.cmp(&b.1))
                });

                for &&(_, j, score) in &own {
                    if new_taken[j] {
                        continue;
                    }
                    let verdict = validator.approve(
                        old_field,
                        &current.fields[j],
                        score,
                        competing_old[i].saturating_sub(1),
                        competing_new[j].saturating_sub(1),
                    );
                    match verdict {
                        Some(true) => {
                            matched.push((i, j, MatchKind::Similarity(score)));
                            new_taken[j] = true;
                            old_bound[i] = true;
                            break;
                        }
                        Some(false) => continue,
                        None => {
                            return Err(LegacyMappingError::Ambiguous {
                                type_name: current.type_name.clone(),
                                detail: format!(
                                    "validator could not decide {} -> {} (score {score:.2})",
                                    old_field.name, current.fields[j].name
                                ),
                                old_schema: old.signature(),
                                new_schema: current.signature(),
                            }
                            .into());
                        }
                    }
                }
            }
        }

        let dropped_old: Vec<usize> = (0..old.fields.len()).filter(|&i| !old_bound[i]).collect();
        let defaulted_new: Vec<usize> =
            (0..current.fields.len()).filter(|&j| !new_taken[j]).collect();

        for &i in &dropped_old {
            debug!(
                type_name = %current.type_name,
                field = %old.fields[i].name,
                "legacy mapping gap: old field dropped"
            );
        }

        matched.sort_by_key(|(i, _, _)| *i);
        Ok(FieldMapping {
            matched,
            dropped_old,
            defaulted_new,
        })
    }
}

impl std::fmt::Debug for LegacyTypeMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyTypeMapper")
            .field("has_validator", &self.validator.is_some())
            .field("cached_mappings", &self.cache.lock().len())
            .finish()
    }
}

/// Load-only handler for records written under an old schema.
///
/// Reads the payload with the old descriptor's layout and routes mapped
/// values through the current handler's field accessors; unmapped current
/// fields receive defaults. Storing always goes through the current handler,
/// never a legacy one.
pub struct LegacyTypeHandler {
    old_descriptor: TypeDescriptor,
    mapping: Arc<FieldMapping>,
    current: Arc<dyn TypeHandler>,
}

impl LegacyTypeHandler {
    /// Wrap the current handler with a computed old-to-current mapping.
    pub fn new(
        old_descriptor: TypeDescriptor,
        mapping: Arc<FieldMapping>,
        current: Arc<dyn TypeHandler>,
    ) -> Self {
        Self {
            old_descriptor,
            mapping,
            current,
        }
    }

    /// The mapping this handler applies.
    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }
}

impl TypeHandler for LegacyTypeHandler {
    fn type_name(&self) -> &str {
        &self.old_descriptor.type_name
    }

    fn runtime_type(&self) -> RuntimeTypeId {
        self.current.runtime_type()
    }

    fn descriptor(&self) -> &TypeDescriptor {
        &self.old_descriptor
    }

    fn store(
        &self,
        _obj: &Obj,
        _payload: &mut ByteWriter,
        _ctx: &mut dyn StoreContext,
    ) -> Result<()> {
        Err(Error::NotPersistable {
            type_name: self.old_descriptor.type_name.clone(),
            reason: "legacy type handlers are load-only; storing uses the current schema"
                .to_string(),
        })
    }

    fn create(&self, record: &RecordView<'_>) -> Result<Obj> {
        self.current.create(record)
    }

    fn update_state(
        &self,
        obj: &Obj,
        record: &RecordView<'_>,
        ctx: &mut dyn LoadContext,
    ) -> Result<()> {
        let current_fields = &self.current.descriptor().fields;
        let mut reader = record.payload_reader();

        // Old layout drives the read; every old field is consumed even when
        // its value is dropped, to keep the cursor aligned.
        for (i, old_field) in self.old_descriptor.fields.iter().enumerate() {
            let wire = WireValue::decode(&mut reader, old_field.kind)?;
            let Some(j) = self.mapping.new_index_of(i) else {
                continue;
            };
            let target_kind = current_fields[j].kind;
            let converted = wire.convert_to(target_kind).ok_or_else(|| {
                Error::Corruption(format!(
                    "legacy mapping bound incompatible kinds for {}: {} -> {}",
                    current_fields[j].name, old_field.kind, target_kind
                ))
            })?;
            let value = wire_to_field(converted, ctx)?;
            self.current.set_field(obj, j, value)?;
        }

        for &j in &self.mapping.defaulted_new {
            self.current
                .set_field(obj, j, current_fields[j].kind.default_value())?;
        }
        Ok(())
    }

    fn complete(&self, obj: &Obj) -> Result<()> {
        self.current.complete(obj)
    }

    fn iterate_references(&self, obj: &Obj, each: &mut dyn FnMut(Obj)) -> Result<()> {
        self.current.iterate_references(obj, each)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldKind;

    fn old_person() -> TypeDescriptor {
        TypeDescriptor::new(
            "example.Person",
            vec![
                FieldDescriptor::new("id", FieldKind::I64),
                FieldDescriptor::new("fullName", FieldKind::Text),
            ],
        )
    }

    fn current_person() -> TypeDescriptor {
        TypeDescriptor::new(
            "example.Person",
            vec![
                FieldDescriptor::new("id", FieldKind::I64),
                FieldDescriptor::new("name", FieldKind::Text),
            ],
        )
    }

    #[test]
    fn test_exact_match_binds_without_validator() {
        let mapper = LegacyTypeMapper::without_validator();
        let mapping = mapper.map(&old_person(), &current_person()).unwrap();

        // `id` binds by name; `fullName` has no validator to approve it.
        assert_eq!(mapping.new_index_of(0), Some(0));
        assert_eq!(mapping.new_index_of(1), None);
        assert_eq!(mapping.dropped_old, vec![1]);
        assert_eq!(mapping.defaulted_new, vec![1]);
    }

    #[test]
    fn test_similarity_binds_with_validator() {
        let mapper = LegacyTypeMapper::new(Arc::new(ThresholdValidator::new(0.6)));
        let mapping = mapper.map(&old_person(), &current_person()).unwrap();

        assert_eq!(mapping.new_index_of(0), Some(0));
        assert_eq!(mapping.new_index_of(1), Some(1));
        assert!(mapping.is_complete());
        match mapping.matched[1].2 {
            MatchKind::Similarity(score) => assert!(score >= 0.6),
            other => panic!("expected similarity match, got {other:?}"),
        }
    }

    #[test]
    fn test_high_threshold_drops_candidate() {
        let mapper = LegacyTypeMapper::new(Arc::new(ThresholdValidator::new(0.95)));
        let mapping = mapper.map(&old_person(), &current_person()).unwrap();

        assert_eq!(mapping.new_index_of(1), None);
        assert_eq!(mapping.dropped_old, vec![1]);
    }

    #[test]
    fn test_undecidable_candidate_fails_closed() {
        struct Undecided;
        impl MatchValidator for Undecided {
            fn approve(
                &self,
                _old: &FieldDescriptor,
                _new: &FieldDescriptor,
                _score: f64,
                _competing_old: usize,
                _competing_new: usize,
            ) -> Option<bool> {
                None
            }
        }

        let mapper = LegacyTypeMapper::new(Arc::new(Undecided));
        let err = mapper.map(&old_person(), &current_person()).unwrap_err();
        match err {
            Error::LegacyMapping(LegacyMappingError::Ambiguous {
                old_schema,
                new_schema,
                ..
            }) => {
                assert!(old_schema.contains("fullName"));
                assert!(new_schema.contains("text name"));
            }
            other => panic!("expected Ambiguous, got {other}"),
        }
    }

    #[test]
    fn test_tie_breaks_by_first_declared_target() {
        // Two equally-similar targets; the earlier-declared one must win.
        let old = TypeDescriptor::new(
            "t.T",
            vec![FieldDescriptor::new("value", FieldKind::I64)],
        );
        let current = TypeDescriptor::new(
            "t.T",
            vec![
                FieldDescriptor::new("valueA", FieldKind::I64),
                FieldDescriptor::new("valueB", FieldKind::I64),
            ],
        );

        let mapper = LegacyTypeMapper::new(Arc::new(ThresholdValidator::new(0.5)));
        let mapping = mapper.map(&old, &current).unwrap();
        assert_eq!(mapping.new_index_of(0), Some(0));
        assert_eq!(mapping.defaulted_new, vec![1]);
    }

    #[test]
    fn test_mapping_is_cached() {
        let mapper = LegacyTypeMapper::new(Arc::new(ThresholdValidator::new(0.6)));
        let first = mapper.map(&old_person(), &current_person()).unwrap();
        let second = mapper.map(&old_person(), &current_person()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_numeric_widening_pairs_can_bind() {
        let old = TypeDescriptor::new(
            "t.T",
            vec![FieldDescriptor::new("ratio", FieldKind::I64)],
        );
        let current = TypeDescriptor::new(
            "t.T",
            vec![FieldDescriptor::new("ratio", FieldKind::F64)],
        );

        // Exact name, convertible kinds: binds even without a validator.
        let mapper = LegacyTypeMapper::without_validator();
        let mapping = mapper.map(&old, &current).unwrap();
        assert_eq!(mapping.new_index_of(0), Some(0));
    }

    #[test]
    fn test_incompatible_exact_name_does_not_bind_silently() {
        let old = TypeDescriptor::new(
            "t.T",
            vec![FieldDescriptor::new("data", FieldKind::Text)],
        );
        let current = TypeDescriptor::new(
            "t.T",
            vec![FieldDescriptor::new("data", FieldKind::Reference)],
        );

        let mapper = LegacyTypeMapper::without_validator();
        let mapping = mapper.map(&old, &current).unwrap();
        assert_eq!(mapping.new_index_of(0), None);
        assert_eq!(mapping.dropped_old, vec![0]);
        assert_eq!(mapping.defaulted_new, vec![0]);
    }
}
