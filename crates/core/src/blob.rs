//! Blob store collaborator
//!
//! The engine treats durable storage as a plain blob provider: one blob per
//! entity record, addressed by object id, plus one well-known slot for the
//! exported type dictionary. Implementations own all durability concerns
//! (the record format itself carries no checksums).
//!
//! # Thread Safety
//!
//! Blob stores must be `Send + Sync`; concurrent sessions share one store.

use crate::error::Result;
use crate::types::ObjectId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Byte source/sink the engine writes entity records to.
///
/// Open-and-release semantics: no call holds a handle across calls, so an
/// implementation may be backed by anything from a heap map to a directory of
/// files.
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) the record blob for an object id.
    fn put(&self, oid: ObjectId, bytes: &[u8]) -> Result<()>;

    /// Read the record blob for an object id, `None` if absent.
    fn get(&self, oid: ObjectId) -> Result<Option<Vec<u8>>>;

    /// True if a record blob exists for the object id.
    fn contains(&self, oid: ObjectId) -> Result<bool> {
        Ok(self.get(oid)?.is_some())
    }

    /// Persist the assembled type dictionary alongside the data.
    fn put_dictionary(&self, text: &str) -> Result<()>;

    /// Read back the persisted type dictionary, `None` if never written.
    fn get_dictionary(&self) -> Result<Option<String>>;

    /// Flush any buffered state to the backing medium.
    fn flush(&self) -> Result<()>;
}

/// Heap-backed blob store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    records: DashMap<ObjectId, Vec<u8>>,
    dictionary: RwLock<Option<String>>,
}

impl MemoryBlobStore {
    /// Create an empty in-memory blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored record blobs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no record blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, oid: ObjectId, bytes: &[u8]) -> Result<()> {
        self.records.insert(oid, bytes.to_vec());
        Ok(())
    }

    fn get(&self, oid: ObjectId) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(&oid).map(|entry| entry.value().clone()))
    }

    fn contains(&self, oid: ObjectId) -> Result<bool> {
        Ok(self.records.contains_key(&oid))
    }

    fn put_dictionary(&self, text: &str) -> Result<()> {
        *self.dictionary.write() = Some(text.to_string());
        Ok(())
    }

    fn get_dictionary(&self) -> Result<Option<String>> {
        Ok(self.dictionary.read().clone())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Directory-backed blob store: one file per record, named by object id,
/// plus a `type-dictionary.std` text file.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Dictionary file name inside the store directory.
    pub const DICTIONARY_FILE: &'static str = "type-dictionary.std";

    /// Open (creating if needed) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn record_path(&self, oid: ObjectId) -> PathBuf {
        self.root.join(format!("{}.rec", oid.as_u64()))
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, oid: ObjectId, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(self.record_path(oid))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn get(&self, oid: ObjectId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(oid)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, oid: ObjectId) -> Result<bool> {
        Ok(self.record_path(oid).exists())
    }

    fn put_dictionary(&self, text: &str) -> Result<()> {
        fs::write(self.root.join(Self::DICTIONARY_FILE), text)?;
        Ok(())
    }

    fn get_dictionary(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(Self::DICTIONARY_FILE)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&self) -> Result<()> {
        // Files are written whole per put; nothing buffered between calls.
        Ok(())
    }
}
