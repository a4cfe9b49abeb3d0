//! Typed access to the local cache.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::cache::{CacheStore, RecordKind};
use dav_common::{Result, Session, TableId, TableObject, User};

/// Key of the single session record.
const SESSION_KEY: &str = "session";
/// Key of the single user record.
const USER_KEY: &str = "user";

/// Typed view over a [`CacheStore`].
///
/// Records are stored as JSON, blobs as raw bytes.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn CacheStore>,
}

impl LocalCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    async fn read<T: DeserializeOwned>(&self, kind: RecordKind, key: &str) -> Result<Option<T>> {
        match self.store.get(kind, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, kind: RecordKind, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(kind, key, bytes).await
    }

    // Table objects

    pub async fn table_object(&self, uuid: &str) -> Result<Option<TableObject>> {
        self.read(RecordKind::TableObject, uuid).await
    }

    pub async fn save_table_object(&self, object: &TableObject) -> Result<()> {
        self.write(RecordKind::TableObject, &object.uuid, object).await
    }

    /// Remove a table object together with its blob.
    pub async fn remove_table_object(&self, uuid: &str) -> Result<()> {
        self.store.delete(RecordKind::TableObject, uuid).await?;
        self.store.delete(RecordKind::File, uuid).await
    }

    /// All cached table objects.
    ///
    /// Records that fail to decode are skipped with a warning rather than
    /// failing the whole scan.
    pub async fn table_objects(&self) -> Result<Vec<TableObject>> {
        let raw = self.store.get_all(RecordKind::TableObject).await?;
        let mut objects = Vec::with_capacity(raw.len());

        for bytes in raw {
            match serde_json::from_slice::<TableObject>(&bytes) {
                Ok(object) => objects.push(object),
                Err(e) => warn!("Skipping undecodable table object record: {}", e),
            }
        }

        Ok(objects)
    }

    /// Cached table objects of one table.
    pub async fn table_objects_of(&self, table_id: TableId) -> Result<Vec<TableObject>> {
        let mut objects = self.table_objects().await?;
        objects.retain(|o| o.table_id == table_id);
        Ok(objects)
    }

    /// Remove every table object, blob and table etag.
    pub async fn clear_table_objects(&self) -> Result<()> {
        self.store.clear(RecordKind::TableObject).await?;
        self.store.clear(RecordKind::File).await?;
        self.store.clear(RecordKind::TableEtag).await
    }

    // Blobs

    pub async fn file(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(RecordKind::File, uuid).await
    }

    pub async fn save_file(&self, uuid: &str, data: Vec<u8>) -> Result<()> {
        self.store.set(RecordKind::File, uuid, data).await
    }

    // Table etags

    pub async fn table_etag(&self, table_name: &str) -> Result<Option<String>> {
        self.read(RecordKind::TableEtag, table_name).await
    }

    pub async fn save_table_etag(&self, table_name: &str, etag: &str) -> Result<()> {
        self.write(RecordKind::TableEtag, table_name, &etag).await
    }

    // Session

    pub async fn session(&self) -> Result<Option<Session>> {
        self.read(RecordKind::Session, SESSION_KEY).await
    }

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        self.write(RecordKind::Session, SESSION_KEY, session).await
    }

    pub async fn remove_session(&self) -> Result<()> {
        self.store.delete(RecordKind::Session, SESSION_KEY).await
    }

    // User

    pub async fn user(&self) -> Result<Option<User>> {
        self.read(RecordKind::User, USER_KEY).await
    }

    pub async fn save_user(&self, user: &User) -> Result<()> {
        self.write(RecordKind::User, USER_KEY, user).await
    }

    pub async fn remove_user(&self) -> Result<()> {
        self.store.delete(RecordKind::User, USER_KEY).await
    }
}
