//! In-memory dav backend for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::provider::{
    ObjectStub, ObjectWrite, ObjectWriteResponse, RemoteTableObject, SessionRenewer,
    TableObjectGateway, TablePage,
};
use dav_common::{Error, PropertyValue, Result, TableId, User};

/// Default number of stubs per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Operations of the in-memory gateway, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    FetchTablePage,
    FetchObject,
    DownloadFile,
    CreateObject,
    UpdateObject,
    DeleteObject,
    RemoveObjectAccess,
    DeleteSession,
    FetchUser,
    RenewSession,
}

#[derive(Debug, Clone)]
struct RemoteTable {
    id: TableId,
    etag: String,
}

#[derive(Debug, Clone)]
struct StoredObject {
    object: RemoteTableObject,
    file: Option<Vec<u8>>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, RemoteTable>,
    objects: HashMap<String, StoredObject>,
    valid_tokens: HashSet<String>,
    stale_tokens: HashSet<String>,
    reject_renewals: bool,
    user: Option<User>,
    calls: HashMap<GatewayOp, usize>,
    pending_failures: HashMap<GatewayOp, usize>,
    failing_pages: HashSet<(String, usize)>,
    failing_objects: HashSet<String>,
    drops_before_page: HashMap<(String, usize), String>,
    page_log: Vec<(String, usize)>,
}

impl State {
    fn table_by_id_mut(&mut self, id: TableId) -> Option<&mut RemoteTable> {
        self.tables.values_mut().find(|t| t.id == id)
    }

    fn bump_table(&mut self, id: TableId) -> Result<String> {
        let table = self
            .table_by_id_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Table not found: {}", id)))?;
        table.etag = new_etag();
        Ok(table.etag.clone())
    }

    /// Count the call, apply injected transport failures, check the token.
    fn enter(&mut self, op: GatewayOp, access_token: &str) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        if let Some(remaining) = self.pending_failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Network(format!("Injected failure for {:?}", op)));
            }
        }

        if self.stale_tokens.contains(access_token) {
            return Err(Error::SessionExpired);
        }
        if !self.valid_tokens.contains(access_token) {
            return Err(Error::SessionInvalid("Unknown access token".to_string()));
        }
        Ok(())
    }
}

fn new_etag() -> String {
    Uuid::new_v4().simple().to_string()
}

/// In-memory dav backend.
///
/// Behaves like the real service at the gateway contract level: paged
/// listings sorted by uuid, per-table etags that change on every write,
/// token validation and renewal. Tests can inject transport failures and
/// inspect call counts.
pub struct MemoryGateway {
    state: Mutex<State>,
    page_size: usize,
}

impl MemoryGateway {
    /// Create an empty backend with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty backend listing `page_size` stubs per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a table.
    pub fn add_table(&self, name: impl Into<String>, id: TableId) {
        self.state().tables.insert(
            name.into(),
            RemoteTable {
                id,
                etag: new_etag(),
            },
        );
    }

    /// Issue a new valid access token.
    pub fn issue_token(&self) -> String {
        let token = Uuid::new_v4().to_string();
        self.state().valid_tokens.insert(token.clone());
        token
    }

    /// Mark a token as stale; requests using it report `SessionExpired`.
    pub fn expire_token(&self, token: &str) {
        let mut state = self.state();
        state.valid_tokens.remove(token);
        state.stale_tokens.insert(token.to_string());
    }

    /// Invalidate a token entirely.
    pub fn revoke_token(&self, token: &str) {
        let mut state = self.state();
        state.valid_tokens.remove(token);
        state.stale_tokens.remove(token);
    }

    /// Make every renewal attempt fail with `SessionInvalid`.
    pub fn reject_renewals(&self, reject: bool) {
        self.state().reject_renewals = reject;
    }

    /// Whether the token identifies a live session.
    pub fn is_session_active(&self, token: &str) -> bool {
        self.state().valid_tokens.contains(token)
    }

    /// Set the profile returned by `fetch_user`.
    pub fn set_user(&self, user: User) {
        self.state().user = Some(user);
    }

    /// Write an object as another device would. Returns the new etag.
    pub fn put_object(
        &self,
        table_id: TableId,
        uuid: impl Into<String>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> String {
        self.put_object_with(table_id, uuid, properties, true, None)
    }

    /// Write an object with full control over ownership and blob.
    pub fn put_object_with(
        &self,
        table_id: TableId,
        uuid: impl Into<String>,
        properties: BTreeMap<String, PropertyValue>,
        belongs_to_user: bool,
        file: Option<Vec<u8>>,
    ) -> String {
        let uuid = uuid.into();
        let etag = new_etag();
        let mut state = self.state();
        let object = RemoteTableObject {
            uuid: uuid.clone(),
            table_id,
            is_file: file.is_some(),
            etag: etag.clone(),
            belongs_to_user,
            purchase: None,
            properties,
        };
        state.objects.insert(uuid, StoredObject { object, file });
        if let Some(table) = state.table_by_id_mut(table_id) {
            table.etag = new_etag();
        }
        etag
    }

    /// Delete an object as another device would.
    pub fn drop_object(&self, uuid: &str) {
        let mut state = self.state();
        if let Some(stored) = state.objects.remove(uuid) {
            if let Some(table) = state.table_by_id_mut(stored.object.table_id) {
                table.etag = new_etag();
            }
        }
    }

    /// Current remote copy of an object.
    pub fn object(&self, uuid: &str) -> Option<RemoteTableObject> {
        self.state().objects.get(uuid).map(|s| s.object.clone())
    }

    /// Number of remote objects in a table.
    pub fn object_count(&self, table_id: TableId) -> usize {
        self.state()
            .objects
            .values()
            .filter(|s| s.object.table_id == table_id)
            .count()
    }

    /// Current aggregate etag of a table.
    pub fn table_etag(&self, name: &str) -> Option<String> {
        self.state().tables.get(name).map(|t| t.etag.clone())
    }

    /// Fail the next `times` calls of an operation with a transport error.
    pub fn fail_next(&self, op: GatewayOp, times: usize) {
        self.state().pending_failures.insert(op, times);
    }

    /// Fail the next fetch of one specific listing page.
    pub fn fail_page(&self, table_name: impl Into<String>, page: usize) {
        self.state().failing_pages.insert((table_name.into(), page));
    }

    /// Delete an object as another device would, right before the given
    /// listing page is next served.
    pub fn drop_object_before_page(
        &self,
        table_name: impl Into<String>,
        page: usize,
        uuid: impl Into<String>,
    ) {
        self.state()
            .drops_before_page
            .insert((table_name.into(), page), uuid.into());
    }

    /// Fail the next fetch of one specific object.
    pub fn fail_object(&self, uuid: impl Into<String>) {
        self.state().failing_objects.insert(uuid.into());
    }

    /// Number of calls made to an operation.
    pub fn calls(&self, op: GatewayOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Listing pages served so far, in request order.
    pub fn page_log(&self) -> Vec<(String, usize)> {
        self.state().page_log.clone()
    }

    /// Forget all call counts and the page log.
    pub fn reset_calls(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.page_log.clear();
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableObjectGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_table_page(
        &self,
        access_token: &str,
        table_name: &str,
        page: usize,
    ) -> Result<TablePage> {
        let mut state = self.state();
        state.enter(GatewayOp::FetchTablePage, access_token)?;

        if state.failing_pages.remove(&(table_name.to_string(), page)) {
            return Err(Error::Network(format!(
                "Injected failure for page {} of {}",
                page, table_name
            )));
        }

        if let Some(uuid) = state.drops_before_page.remove(&(table_name.to_string(), page)) {
            if let Some(stored) = state.objects.remove(&uuid) {
                if let Some(table) = state.table_by_id_mut(stored.object.table_id) {
                    table.etag = new_etag();
                }
            }
        }

        let table = state
            .tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Table not found: {}", table_name)))?;
        state.page_log.push((table_name.to_string(), page));

        let mut stubs: Vec<ObjectStub> = state
            .objects
            .values()
            .filter(|s| s.object.table_id == table.id)
            .map(|s| ObjectStub {
                uuid: s.object.uuid.clone(),
                etag: s.object.etag.clone(),
            })
            .collect();
        stubs.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        let pages = stubs.len().div_ceil(self.page_size);
        let start = page.saturating_sub(1) * self.page_size;
        let objects = stubs.into_iter().skip(start).take(self.page_size).collect();

        Ok(TablePage {
            table_id: table.id,
            pages,
            etag: table.etag,
            objects,
        })
    }

    async fn fetch_object(&self, access_token: &str, uuid: &str) -> Result<RemoteTableObject> {
        let mut state = self.state();
        state.enter(GatewayOp::FetchObject, access_token)?;

        if state.failing_objects.remove(uuid) {
            return Err(Error::Network(format!("Injected failure for object {}", uuid)));
        }

        state
            .objects
            .get(uuid)
            .map(|s| s.object.clone())
            .ok_or_else(|| Error::NotFound(format!("Table object not found: {}", uuid)))
    }

    async fn download_file(&self, access_token: &str, uuid: &str) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.enter(GatewayOp::DownloadFile, access_token)?;

        state
            .objects
            .get(uuid)
            .and_then(|s| s.file.clone())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", uuid)))
    }

    async fn create_object(
        &self,
        access_token: &str,
        write: ObjectWrite,
    ) -> Result<ObjectWriteResponse> {
        let mut state = self.state();
        state.enter(GatewayOp::CreateObject, access_token)?;

        if state.objects.contains_key(&write.uuid) {
            return Err(Error::Conflict(format!(
                "Table object already exists: {}",
                write.uuid
            )));
        }

        let table_etag = state.bump_table(write.table_id)?;
        let object = RemoteTableObject {
            uuid: write.uuid.clone(),
            table_id: write.table_id,
            is_file: write.is_file,
            etag: new_etag(),
            belongs_to_user: true,
            purchase: None,
            properties: write.properties,
        };
        state.objects.insert(
            write.uuid,
            StoredObject {
                object: object.clone(),
                file: write.file,
            },
        );

        Ok(ObjectWriteResponse { object, table_etag })
    }

    async fn update_object(
        &self,
        access_token: &str,
        write: ObjectWrite,
    ) -> Result<ObjectWriteResponse> {
        let mut state = self.state();
        state.enter(GatewayOp::UpdateObject, access_token)?;

        let stored = state
            .objects
            .get_mut(&write.uuid)
            .ok_or_else(|| Error::NotFound(format!("Table object not found: {}", write.uuid)))?;

        stored.object.properties = write.properties;
        stored.object.etag = new_etag();
        if write.file.is_some() {
            stored.file = write.file;
        }
        let object = stored.object.clone();
        let table_etag = state.bump_table(object.table_id)?;

        Ok(ObjectWriteResponse { object, table_etag })
    }

    async fn delete_object(&self, access_token: &str, uuid: &str) -> Result<()> {
        let mut state = self.state();
        state.enter(GatewayOp::DeleteObject, access_token)?;

        let stored = state
            .objects
            .remove(uuid)
            .ok_or_else(|| Error::NotFound(format!("Table object not found: {}", uuid)))?;
        state.bump_table(stored.object.table_id)?;
        Ok(())
    }

    async fn remove_object_access(&self, access_token: &str, uuid: &str) -> Result<()> {
        let mut state = self.state();
        state.enter(GatewayOp::RemoveObjectAccess, access_token)?;

        // Single-user backend: revoking access hides the object entirely.
        let stored = state
            .objects
            .remove(uuid)
            .ok_or_else(|| Error::NotFound(format!("Table object not found: {}", uuid)))?;
        state.bump_table(stored.object.table_id)?;
        Ok(())
    }

    async fn delete_session(&self, access_token: &str) -> Result<()> {
        let mut state = self.state();
        *state.calls.entry(GatewayOp::DeleteSession).or_insert(0) += 1;

        if let Some(remaining) = state.pending_failures.get_mut(&GatewayOp::DeleteSession) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Network("Injected failure for DeleteSession".to_string()));
            }
        }

        if state.valid_tokens.remove(access_token) || state.stale_tokens.remove(access_token) {
            Ok(())
        } else {
            Err(Error::NotFound("Session not found".to_string()))
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User> {
        let mut state = self.state();
        state.enter(GatewayOp::FetchUser, access_token)?;

        state
            .user
            .clone()
            .ok_or_else(|| Error::NotFound("User not found".to_string()))
    }
}

#[async_trait]
impl SessionRenewer for MemoryGateway {
    async fn renew(&self, access_token: &str) -> Result<String> {
        let mut state = self.state();
        *state.calls.entry(GatewayOp::RenewSession).or_insert(0) += 1;

        if let Some(remaining) = state.pending_failures.get_mut(&GatewayOp::RenewSession) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Network("Injected failure for RenewSession".to_string()));
            }
        }

        if state.reject_renewals || !state.stale_tokens.remove(access_token) {
            return Err(Error::SessionInvalid("Session cannot be renewed".to_string()));
        }

        let token = Uuid::new_v4().to_string();
        state.valid_tokens.insert(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(title: &str) -> BTreeMap<String, PropertyValue> {
        BTreeMap::from([("title".to_string(), PropertyValue::from(title))])
    }

    fn write(uuid: &str, table_id: TableId) -> ObjectWrite {
        ObjectWrite {
            uuid: uuid.to_string(),
            table_id,
            is_file: false,
            properties: props("x"),
            file: None,
        }
    }

    #[tokio::test]
    async fn test_paged_listing() {
        let gateway = MemoryGateway::with_page_size(2);
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();
        for uuid in ["a", "b", "c"] {
            gateway.put_object(1, uuid, props(uuid));
        }

        let first = gateway.fetch_table_page(&token, "notes", 1).await.unwrap();
        assert_eq!(first.pages, 2);
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.objects[0].uuid, "a");

        let second = gateway.fetch_table_page(&token, "notes", 2).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].uuid, "c");
    }

    #[tokio::test]
    async fn test_empty_table_has_zero_pages() {
        let gateway = MemoryGateway::new();
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();

        let page = gateway.fetch_table_page(&token, "notes", 1).await.unwrap();
        assert_eq!(page.pages, 0);
        assert!(page.objects.is_empty());
    }

    #[tokio::test]
    async fn test_create_conflict_and_table_etag() {
        let gateway = MemoryGateway::new();
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();
        let before = gateway.table_etag("notes").unwrap();

        let response = gateway.create_object(&token, write("a", 1)).await.unwrap();
        assert_ne!(response.table_etag, before);
        assert_eq!(gateway.table_etag("notes"), Some(response.table_etag));

        let err = gateway.create_object(&token, write("a", 1)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let gateway = MemoryGateway::new();
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();

        assert!(gateway
            .update_object(&token, write("nope", 1))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(gateway.delete_object(&token, "nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_token_lifecycle() {
        let gateway = MemoryGateway::new();
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();

        gateway.expire_token(&token);
        let err = gateway.fetch_table_page(&token, "notes", 1).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired));

        let fresh = gateway.renew(&token).await.unwrap();
        assert!(gateway.fetch_table_page(&fresh, "notes", 1).await.is_ok());

        // A token can only be renewed once
        assert!(gateway.renew(&token).await.unwrap_err().is_session_invalid());
    }

    #[tokio::test]
    async fn test_failure_injection_and_counts() {
        let gateway = MemoryGateway::new();
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();
        gateway.fail_next(GatewayOp::FetchTablePage, 1);

        let err = gateway.fetch_table_page(&token, "notes", 1).await.unwrap_err();
        assert!(err.is_transient());
        assert!(gateway.fetch_table_page(&token, "notes", 1).await.is_ok());
        assert_eq!(gateway.calls(GatewayOp::FetchTablePage), 2);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let gateway = MemoryGateway::new();
        let token = gateway.issue_token();

        gateway.delete_session(&token).await.unwrap();
        assert!(!gateway.is_session_active(&token));
        assert!(gateway.delete_session(&token).await.unwrap_err().is_not_found());
    }
}
