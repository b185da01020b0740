//! Field similarity scoring for legacy mapping
//!
//! When a stored schema no longer matches the current one, unmatched fields
//! are paired by a similarity score in [0, 1] over name and kind. The default
//! scoring averages Levenshtein name similarity with a kind-compatibility
//! factor; the acceptance policy on top of the score is pluggable (see
//! [`crate::legacy::MatchValidator`]).

use crate::descriptor::{FieldDescriptor, FieldKind};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// Levenshtein edit distance between two strings, by character.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single-row DP over the shorter dimension.
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut previous_diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous_diagonal + usize::from(ca != cb);
            previous_diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(previous_diagonal + 1);
        }
    }
    row[b.len()]
}

/// Name similarity in [0, 1]: 1.0 for identical strings, scaled down by edit
/// distance relative to the longer string.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Kind pairs that are convertible but lossy-adjacent score 0.5; everything
/// else is either identical (1.0) or incompatible (0.0).
static KIND_COMPATIBILITY: Lazy<FxHashMap<(FieldKind, FieldKind), f64>> = Lazy::new(|| {
    let mut table = FxHashMap::default();
    table.insert((FieldKind::I64, FieldKind::F64), 0.5);
    table.insert((FieldKind::F64, FieldKind::I64), 0.5);
    table
});

/// Kind compatibility factor in [0, 1].
pub fn kind_compatibility(from: FieldKind, to: FieldKind) -> f64 {
    if from == to {
        return 1.0;
    }
    KIND_COMPATIBILITY.get(&(from, to)).copied().unwrap_or(0.0)
}

/// Similarity of two fields: the average of name similarity and kind
/// compatibility.
pub fn field_similarity(old: &FieldDescriptor, new: &FieldDescriptor) -> f64 {
    (name_similarity(&old.name, &new.name) + kind_compatibility(old.kind, new.kind)) / 2.0
}
