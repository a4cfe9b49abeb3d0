//! File-backed cache store.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CacheStore, RecordKind};
use dav_common::Result;

/// Suffix of in-progress writes. Such files are never read back.
const TEMP_SUFFIX: &str = ".tmp";

/// Durable cache store keeping one file per record.
///
/// Layout: `<root>/<kind>/<percent-encoded key>`. Writes go to a temporary
/// sibling first and are renamed into place, so a crash mid-write leaves
/// either the old or the new value.
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    /// Create a store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root and per-kind directories exist
    /// - Temporary files left by interrupted writes are gone
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for kind in RecordKind::ALL {
            let dir = root.join(kind.as_str());
            std::fs::create_dir_all(&dir)?;
            let swept = sweep_temp_files(&dir)?;
            if swept > 0 {
                debug!("Removed {} interrupted {} writes", swept, kind);
            }
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn record_path(&self, kind: RecordKind, key: &str) -> PathBuf {
        let file_name = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.kind_dir(kind).join(file_name)
    }

    /// Decode a record file name back into its key.
    pub fn key_from_file_name(file_name: &str) -> Option<String> {
        if file_name.ends_with(TEMP_SUFFIX) {
            return None;
        }
        percent_decode_str(file_name)
            .decode_utf8()
            .ok()
            .map(|key| key.into_owned())
    }
}

/// Delete in-progress write files. Encoded keys never end in the suffix.
fn sweep_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let is_temp = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(TEMP_SUFFIX));
        if !is_temp {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

#[async_trait]
impl CacheStore for FileCacheStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(kind, key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, kind: RecordKind, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.record_path(kind, key);
        let temp = path.with_file_name(format!(
            "{}.{}{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        fs::write(&temp, &value).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<()> {
        match fs::remove_file(self.record_path(kind, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self, kind: RecordKind) -> Result<Vec<Vec<u8>>> {
        let mut entries = fs::read_dir(self.kind_dir(kind)).await?;
        let mut values = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if Self::key_from_file_name(name).is_none() {
                continue;
            }

            match fs::read(entry.path()).await {
                Ok(data) => values.push(data),
                // Deleted between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(values)
    }

    async fn clear(&self, kind: RecordKind) -> Result<()> {
        let dir = self.kind_dir(kind);
        let mut entries = fs::read_dir(&dir).await?;
        let mut removed = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Cleared {} {} records", removed, kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileCacheStore) {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (_dir, store) = store();
        store
            .set(RecordKind::TableObject, "0a1b-2c3d", b"{}".to_vec())
            .await
            .unwrap();

        let value = store.get(RecordKind::TableObject, "0a1b-2c3d").await.unwrap();
        assert_eq!(value, Some(b"{}".to_vec()));
        assert!(store.get(RecordKind::TableObject, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileCacheStore::new(dir.path()).unwrap();
            store.set(RecordKind::Session, "session", vec![7]).await.unwrap();
        }

        let reopened = FileCacheStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get(RecordKind::Session, "session").await.unwrap(),
            Some(vec![7])
        );
    }

    #[tokio::test]
    async fn test_keys_with_separators() {
        let (_dir, store) = store();
        store
            .set(RecordKind::TableEtag, "notes/../etc", vec![1])
            .await
            .unwrap();

        assert_eq!(
            store.get(RecordKind::TableEtag, "notes/../etc").await.unwrap(),
            Some(vec![1])
        );
        assert_eq!(store.get_all(RecordKind::TableEtag).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_all_skips_temp_files() {
        let (dir, store) = store();
        store.set(RecordKind::File, "a", vec![1]).await.unwrap();
        std::fs::write(dir.path().join("files").join("a.123.tmp"), b"partial").unwrap();

        let all = store.get_all(RecordKind::File).await.unwrap();
        assert_eq!(all, vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_reopen_sweeps_interrupted_writes() {
        let dir = TempDir::new().unwrap();
        let leftover = dir.path().join("files").join("a.123.tmp");
        {
            let store = FileCacheStore::new(dir.path()).unwrap();
            store.set(RecordKind::File, "a", vec![1]).await.unwrap();
            std::fs::write(&leftover, b"partial").unwrap();
        }

        let reopened = FileCacheStore::new(dir.path()).unwrap();
        assert!(!leftover.exists());
        assert_eq!(reopened.get(RecordKind::File, "a").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (_dir, store) = store();
        store.set(RecordKind::User, "user", vec![1]).await.unwrap();
        store.delete(RecordKind::User, "user").await.unwrap();
        store.delete(RecordKind::User, "user").await.unwrap();
        assert!(store.get(RecordKind::User, "user").await.unwrap().is_none());

        store.set(RecordKind::TableObject, "a", vec![1]).await.unwrap();
        store.set(RecordKind::TableObject, "b", vec![2]).await.unwrap();
        store.clear(RecordKind::TableObject).await.unwrap();
        assert!(store.get_all(RecordKind::TableObject).await.unwrap().is_empty());
    }

    #[test]
    fn test_key_from_file_name() {
        assert_eq!(
            FileCacheStore::key_from_file_name("a%2Fb"),
            Some("a/b".to_string())
        );
        assert_eq!(FileCacheStore::key_from_file_name("a.1.tmp"), None);
    }
}
