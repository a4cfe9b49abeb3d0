//! Remote table object gateway trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use dav_common::{
    Property, PropertyValue, Result, TableId, TableObject, UploadStatus, User,
};

/// Lightweight `{uuid, etag}` pair returned by a table page listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStub {
    pub uuid: String,
    pub etag: String,
}

/// One page of a remote table listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePage {
    /// Id of the listed table.
    pub table_id: TableId,
    /// Total number of pages of the table.
    pub pages: usize,
    /// Aggregate etag of the whole table.
    pub etag: String,
    /// Stubs of the objects on this page.
    pub objects: Vec<ObjectStub>,
}

/// Full table object as returned by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTableObject {
    pub uuid: String,
    pub table_id: TableId,
    pub is_file: bool,
    pub etag: String,
    pub belongs_to_user: bool,
    pub purchase: Option<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl RemoteTableObject {
    /// Convert into an up-to-date local object.
    ///
    /// Device-only properties of `previous` are carried over.
    pub fn into_local(self, previous: Option<&TableObject>) -> TableObject {
        let mut object = TableObject {
            uuid: self.uuid,
            table_id: self.table_id,
            is_file: self.is_file,
            etag: Some(self.etag),
            belongs_to_user: self.belongs_to_user,
            purchase: self.purchase,
            properties: self
                .properties
                .into_iter()
                .map(|(name, value)| (name, Property::synced(value)))
                .collect(),
            upload_status: UploadStatus::UpToDate,
        };

        if let Some(previous) = previous {
            object.keep_local_properties(previous);
        }
        object
    }
}

/// Payload of a create or update call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectWrite {
    pub uuid: String,
    pub table_id: TableId,
    pub is_file: bool,
    /// Synced properties only.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Blob bytes for file objects, if cached.
    pub file: Option<Vec<u8>>,
}

impl ObjectWrite {
    /// Build the payload for a local object.
    pub fn from_local(object: &TableObject, file: Option<Vec<u8>>) -> Self {
        Self {
            uuid: object.uuid.clone(),
            table_id: object.table_id,
            is_file: object.is_file,
            properties: object.upload_properties(),
            file,
        }
    }
}

/// Server answer to a successful create or update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectWriteResponse {
    pub object: RemoteTableObject,
    /// New aggregate etag of the owning table.
    pub table_etag: String,
}

/// Network operations against the dav backend.
///
/// Every call takes the current access token. Implementations report:
/// - a stale token as `Error::SessionExpired`
/// - a dead session as `Error::SessionInvalid`
/// - a missing resource as `Error::NotFound`
/// - a uuid collision on create as `Error::Conflict`
/// - transport failures as `Error::Network`
///
/// Transport-level retries, request signing and encoding are the
/// implementation's concern.
#[async_trait]
pub trait TableObjectGateway: Send + Sync {
    /// Get the gateway name (e.g., "memory", "graphql").
    fn name(&self) -> &str;

    /// Fetch one page (1-based) of a table listing.
    async fn fetch_table_page(
        &self,
        access_token: &str,
        table_name: &str,
        page: usize,
    ) -> Result<TablePage>;

    /// Fetch a single object.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist or is not accessible
    async fn fetch_object(&self, access_token: &str, uuid: &str) -> Result<RemoteTableObject>;

    /// Download the blob of a file object.
    async fn download_file(&self, access_token: &str, uuid: &str) -> Result<Vec<u8>>;

    /// Create an object.
    ///
    /// # Errors
    /// - `Conflict` if an object with this uuid already exists
    async fn create_object(
        &self,
        access_token: &str,
        write: ObjectWrite,
    ) -> Result<ObjectWriteResponse>;

    /// Update an object.
    ///
    /// # Errors
    /// - `NotFound` if the object is gone
    async fn update_object(
        &self,
        access_token: &str,
        write: ObjectWrite,
    ) -> Result<ObjectWriteResponse>;

    /// Delete an object owned by the user.
    async fn delete_object(&self, access_token: &str, uuid: &str) -> Result<()>;

    /// Revoke the user's access grant to an object owned by someone else.
    async fn remove_object_access(&self, access_token: &str, uuid: &str) -> Result<()>;

    /// Delete the server-side session of this token.
    async fn delete_session(&self, access_token: &str) -> Result<()>;

    /// Fetch the profile of the session's user.
    async fn fetch_user(&self, access_token: &str) -> Result<User>;
}

/// Renewal of stale access tokens.
///
/// Implemented by the auth collaborator; the sync engine calls it at most
/// once per stale token, collapsing concurrent callers.
#[async_trait]
pub trait SessionRenewer: Send + Sync {
    /// Exchange a stale access token for a fresh one.
    ///
    /// # Errors
    /// - `SessionInvalid` if the session can no longer be renewed
    /// - transport errors
    async fn renew(&self, access_token: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_local_is_up_to_date() {
        let remote = RemoteTableObject {
            uuid: "u".to_string(),
            table_id: 2,
            is_file: false,
            etag: "e1".to_string(),
            belongs_to_user: false,
            purchase: None,
            properties: BTreeMap::from([("title".to_string(), PropertyValue::from("x"))]),
        };

        let mut previous = TableObject::with_uuid("u", 2);
        previous
            .properties
            .insert("draft".to_string(), Property::local(true));

        let local = remote.into_local(Some(&previous));
        assert_eq!(local.upload_status, UploadStatus::UpToDate);
        assert_eq!(local.etag.as_deref(), Some("e1"));
        assert!(!local.belongs_to_user);
        assert_eq!(local.property("draft"), Some(&PropertyValue::Boolean(true)));
        assert!(!local.properties["title"].local);
    }

    #[test]
    fn test_object_write_excludes_local_properties() {
        let mut obj = TableObject::with_uuid("u", 1);
        obj.properties.insert("a".to_string(), Property::synced(1.0));
        obj.properties.insert("b".to_string(), Property::local(2.0));

        let write = ObjectWrite::from_local(&obj, None);
        assert_eq!(write.properties.len(), 1);
        assert!(write.properties.contains_key("a"));
    }
}
