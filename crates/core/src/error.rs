//! Error types for the persistence engine
//!
//! Every failure in the engine is surfaced synchronously as the result of the
//! triggering operation; nothing is swallowed or auto-retried. Silent data
//! corruption is worse than a hard failure in a persistence engine.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.

use crate::types::{ObjectId, TypeId};
use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the persistence engine
#[derive(Debug, Error)]
pub enum Error {
    /// Truncated or corrupt record, bounds violation. Always fatal.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Unknown type id or schema conflict during registration.
    #[error(transparent)]
    TypeResolution(#[from] TypeResolutionError),

    /// Type is structurally unsuitable for reproducible serialization.
    #[error("type not persistable: {type_name}: {reason}")]
    NotPersistable {
        /// Runtime name of the offending type
        type_name: String,
        /// Why the type cannot be stored
        reason: String,
    },

    /// Ambiguous or rejected field mapping with no validator resolution.
    #[error(transparent)]
    LegacyMapping(#[from] LegacyMappingError),

    /// Round-trip state mismatch for a type with a validation contract.
    ///
    /// Carries both state strings for diagnosis; signals a handler or data
    /// corruption bug.
    #[error("validation mismatch: instance state {instance_state:?} != binary state {binary_state:?}")]
    Validation {
        /// State string derived from the live instance
        instance_state: String,
        /// State string derived from the freshly written bytes
        binary_state: String,
    },

    /// Lazy reference resolution failure.
    #[error(transparent)]
    Lazy(#[from] LazyError),

    /// Entity layering failure (identity mismatch, missing version).
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Malformed configuration value.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error from the blob store collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (e.g. identity registry bijection broken).
    #[error("data corruption: {0}")]
    Corruption(String),
}

/// Wire format errors. Always fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A read would cross the end of the record or buffer.
    #[error("unexpected end of record: need {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        /// Bytes the read required
        needed: usize,
        /// Cursor offset at which the read started
        offset: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },

    /// Record header declares a length inconsistent with the buffer.
    #[error("invalid record length {declared} (buffer holds {actual} bytes)")]
    InvalidLength {
        /// Length field from the header
        declared: u64,
        /// Bytes actually present
        actual: usize,
    },

    /// A text field did not decode as UTF-8.
    #[error("invalid UTF-8 in text field")]
    InvalidUtf8,

    /// A write would exceed the cursor's buffer.
    #[error("write overflow: {needed} bytes at offset {offset}, capacity {capacity}")]
    WriteOverflow {
        /// Bytes the write required
        needed: usize,
        /// Cursor offset at which the write started
        offset: usize,
        /// Total buffer capacity
        capacity: usize,
    },
}

/// Type resolution errors.
///
/// The dominant real-world failure mode is a dictionary built in a different
/// registration order between the storing and the loading process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeResolutionError {
    /// No handler is registered for the stored type id.
    #[error("unhandled type id {0}")]
    UnhandledTypeId(TypeId),

    /// A type name is already bound to a different field schema.
    #[error("type {type_name} already registered with a different schema (type id {existing})")]
    SchemaConflict {
        /// Fully qualified type name
        type_name: String,
        /// Type id the conflicting registration holds
        existing: TypeId,
    },

    /// No handler is registered for the runtime type of an object.
    #[error("no handler registered for runtime type {type_name}")]
    UnregisteredRuntimeType {
        /// Runtime name of the type
        type_name: String,
    },

    /// A persisted type dictionary did not parse.
    #[error("type dictionary parse error at line {line}: {detail}")]
    DictionaryParse {
        /// 1-based line number in the dictionary text
        line: usize,
        /// What went wrong
        detail: String,
    },
}

/// Legacy (schema-mismatched) type mapping errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LegacyMappingError {
    /// Two or more source fields competed for the same target with no
    /// validator resolution.
    #[error("ambiguous legacy mapping for {type_name}: {detail}\nold schema: {old_schema}\nnew schema: {new_schema}")]
    Ambiguous {
        /// Type being mapped
        type_name: String,
        /// Human-readable conflict description
        detail: String,
        /// Assembled old schema for diagnosis
        old_schema: String,
        /// Assembled current schema for diagnosis
        new_schema: String,
    },

    /// The stored dictionary has no descriptor for the requested type id.
    #[error("no stored type descriptor for type id {0}")]
    MissingDescriptor(TypeId),
}

/// Lazy reference subsystem errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LazyError {
    /// The loader could not produce the referent for a retained object id.
    #[error("referent unavailable for object id {0}")]
    ReferentUnavailable(ObjectId),

    /// A lazy reference with no object id and no referent was asked to load.
    #[error("lazy reference holds no object id (persisted null)")]
    NoObjectId,
}

/// Entity layering errors, local to the entity component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// A data snapshot created for one entity identity was applied to another.
    #[error("entity identity mismatch: snapshot belongs to entity {snapshot_identity}, not {entity_identity}")]
    IdentityMismatch {
        /// Identity the snapshot was created for
        snapshot_identity: u64,
        /// Identity the operation ran against
        entity_identity: u64,
    },

    /// A versioned read found no snapshot for the current version key.
    #[error("no stored snapshot for version key {version_key:?}")]
    MissingVersion {
        /// Debug rendering of the version key
        version_key: String,
    },
}

/// Configuration accessor errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A known key held a value that did not parse.
    #[error("invalid value {value:?} for config key {key:?}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// Offending value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = Error::from(FormatError::UnexpectedEof {
            needed: 8,
            offset: 16,
            available: 3,
        });
        let msg = err.to_string();
        assert!(msg.contains("unexpected end of record"));
        assert!(msg.contains("8"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_unhandled_type_id_names_the_id() {
        let err = Error::from(TypeResolutionError::UnhandledTypeId(TypeId::new(1000042)));
        assert!(err.to_string().contains("1000042"));
    }

    #[test]
    fn test_not_persistable_names_the_type() {
        let err = Error::NotPersistable {
            type_name: "example::Closure".to_string(),
            reason: "no handler registered".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("example::Closure"));
        assert!(msg.contains("no handler registered"));
    }

    #[test]
    fn test_validation_carries_both_states() {
        let err = Error::Validation {
            instance_state: "len=3".to_string(),
            binary_state: "len=2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("len=3"));
        assert!(msg.contains("len=2"));
    }

    #[test]
    fn test_referent_unavailable_display() {
        let err = Error::from(LazyError::ReferentUnavailable(ObjectId::new(99)));
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_entity_missing_version() {
        let err = Error::from(EntityError::MissingVersion {
            version_key: "\"v2\"".to_string(),
        });
        assert!(err.to_string().contains("v2"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
