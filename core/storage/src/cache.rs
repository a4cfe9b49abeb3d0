//! Local cache store trait and the in-memory implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use dav_common::{Error, Result};

/// Kinds of records kept in the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Table objects keyed by uuid.
    TableObject,
    /// The single session record.
    Session,
    /// The single cached user profile.
    User,
    /// Last seen table etags keyed by table name.
    TableEtag,
    /// Blob bytes of file table objects keyed by uuid.
    File,
}

impl RecordKind {
    /// All record kinds.
    pub const ALL: [RecordKind; 5] = [
        RecordKind::TableObject,
        RecordKind::Session,
        RecordKind::User,
        RecordKind::TableEtag,
        RecordKind::File,
    ];

    /// Stable name, used for directory names on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TableObject => "table_objects",
            Self::Session => "session",
            Self::User => "user",
            Self::TableEtag => "table_etags",
            Self::File => "files",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value store backing the local cache.
///
/// Every call is atomic on its own: a reader never observes a partially
/// written value. There is no multi-key transaction; callers must tolerate
/// being interrupted between any two calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the store name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read a value.
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, kind: RecordKind, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, kind: RecordKind, key: &str) -> Result<()>;

    /// All values of a kind, in no particular order.
    async fn get_all(&self, kind: RecordKind) -> Result<Vec<Vec<u8>>>;

    /// Delete every value of a kind.
    async fn clear(&self, kind: RecordKind) -> Result<()>;
}

/// In-memory cache store.
///
/// Useful for testing and ephemeral clients. All data is lost on drop.
#[derive(Default)]
pub struct MemoryCacheStore {
    records: RwLock<HashMap<(RecordKind, String), Vec<u8>>>,
}

impl MemoryCacheStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of a kind.
    pub fn len(&self, kind: RecordKind) -> usize {
        self.records
            .read()
            .map(|records| records.keys().filter(|(k, _)| *k == kind).count())
            .unwrap_or(0)
    }

    fn poisoned() -> Error {
        Error::Storage("memory cache lock poisoned".to_string())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Vec<u8>>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(&(kind, key.to_string())).cloned())
    }

    async fn set(&self, kind: RecordKind, key: &str, value: Vec<u8>) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.insert((kind, key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.remove(&(kind, key.to_string()));
        Ok(())
    }

    async fn get_all(&self, kind: RecordKind) -> Result<Vec<Vec<u8>>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn clear(&self, kind: RecordKind) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.retain(|(k, _), _| *k != kind);
        Ok(())
    }
}
