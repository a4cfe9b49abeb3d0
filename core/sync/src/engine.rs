//! Core sync engine that orchestrates all sync operations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::AuthenticatedExecutor;
use crate::config::SyncConfig;
use crate::context::DavContext;
use crate::download::{DownloadReport, Downloader, ObjectOutcome, RemoteChange};
use crate::events::{Observers, SyncObserver};
use crate::scheduler::{SyncMode, SyncRequest, SyncResult, SyncScheduler, SyncSchedulerHandle};
use crate::status::{self, LocalDelete};
use crate::upload::{PushReport, Uploader};
use dav_common::{
    Error, Property, PropertyValue, Result, Session, TableId, TableObject, UploadStatus, User,
};
use dav_storage::{CacheStore, LocalCache, SessionRenewer, TableObjectGateway};

/// Reports of a full sync cycle.
#[derive(Debug, Clone, Default)]
pub struct FullSyncReport {
    /// Refreshed profile, if logged in.
    pub user: Option<User>,
    pub download: DownloadReport,
    pub push: PushReport,
}

/// Main sync engine of a dav client.
///
/// Owns the local cache, the client context and the download and push
/// machinery. Downloads and pushes are serialized internally.
pub struct SyncEngine {
    context: Arc<DavContext>,
    cache: LocalCache,
    gateway: Arc<dyn TableObjectGateway>,
    executor: Arc<AuthenticatedExecutor>,
    observers: Arc<Observers>,
    downloader: Downloader,
    uploader: Uploader,
    /// Serializes sync cycles.
    cycle: Mutex<()>,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is inconsistent
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn CacheStore>,
        gateway: Arc<dyn TableObjectGateway>,
        renewer: Arc<dyn SessionRenewer>,
    ) -> Result<Self> {
        config.validate()?;

        let context = Arc::new(DavContext::new(config));
        let cache = LocalCache::new(store);
        let observers = Arc::new(Observers::new());
        let executor = Arc::new(AuthenticatedExecutor::new(
            context.clone(),
            cache.clone(),
            renewer,
        ));

        let downloader = Downloader::new(
            context.clone(),
            cache.clone(),
            gateway.clone(),
            executor.clone(),
            observers.clone(),
        );
        let uploader = Uploader::new(
            context.clone(),
            cache.clone(),
            gateway.clone(),
            executor.clone(),
            observers.clone(),
        );

        Ok(Self {
            context,
            cache,
            gateway,
            executor,
            observers,
            downloader,
            uploader,
            cycle: Mutex::new(()),
        })
    }

    /// Create a scheduler for this engine and return its handle.
    ///
    /// Spawn [`SyncSchedulerHandle::run`] with [`SyncEngine::process_request`]
    /// to serve the requests.
    pub fn scheduler(mode: SyncMode) -> (SyncScheduler, SyncSchedulerHandle) {
        SyncScheduler::new(mode)
    }

    /// Get a reference to the client context.
    pub fn context(&self) -> &Arc<DavContext> {
        &self.context
    }

    /// Get a reference to the local cache.
    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn observers(&self) -> &Arc<Observers> {
        &self.observers
    }

    pub fn register_observer(&self, observer: Arc<dyn SyncObserver>) {
        self.observers.register(observer);
    }

    pub async fn is_logged_in(&self) -> bool {
        self.context.is_logged_in().await
    }

    pub async fn user(&self) -> Option<User> {
        self.context.user().await
    }

    /// Load the persisted session and user.
    pub async fn init(&self) -> Result<()> {
        self.context.init(&self.cache).await?;

        if let Some(user) = self.context.user().await {
            self.observers.emit(|o| o.user_loaded(&user));
        }
        info!(
            "Sync engine initialized (logged in: {})",
            self.context.is_logged_in().await
        );
        Ok(())
    }

    /// Start a session with an access token obtained by the auth flow.
    ///
    /// A pending deletion of a previous session is pushed first, since the
    /// new session record replaces it.
    pub async fn login(&self, access_token: impl Into<String>) -> Result<()> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(Error::InvalidInput("Access token cannot be empty".to_string()));
        }

        if let Err(e) = self.uploader.push_session().await {
            warn!("Previous session could not be deleted remotely: {}", e);
        }

        self.cache.save_session(&Session::new(access_token.clone())).await?;
        self.context.set_access_token(access_token).await;
        info!("Logged in");
        Ok(())
    }

    /// Download reconciliation of all configured tables.
    ///
    /// Returns an empty report when not logged in.
    pub async fn sync(&self) -> Result<DownloadReport> {
        let _cycle = self.cycle.lock().await;
        self.sync_unlocked().await
    }

    async fn sync_unlocked(&self) -> Result<DownloadReport> {
        if !self.is_logged_in().await {
            debug!("Not logged in, skipping download");
            return Ok(DownloadReport::default());
        }
        let result = self.downloader.run().await;
        self.end_session_on_invalid(result).await
    }

    /// Push a pending session deletion, then every dirty table object.
    pub async fn sync_push(&self) -> Result<PushReport> {
        let _cycle = self.cycle.lock().await;
        self.sync_push_unlocked().await
    }

    async fn sync_push_unlocked(&self) -> Result<PushReport> {
        let result = self.uploader.run().await;
        self.end_session_on_invalid(result).await
    }

    /// Push a pending session deletion only.
    ///
    /// Returns `true` once the session record is gone.
    pub async fn session_sync_push(&self) -> Result<bool> {
        self.uploader.push_session().await
    }

    /// Refresh the user profile.
    ///
    /// A session the remote rejects ends in a full local logout.
    pub async fn user_sync(&self) -> Result<Option<User>> {
        if !self.is_logged_in().await {
            return Ok(None);
        }

        let gateway = &self.gateway;
        let result = self
            .executor
            .execute(|token| async move { gateway.fetch_user(&token).await })
            .await;
        let user = self.end_session_on_invalid(result).await?;

        self.cache.save_user(&user).await?;
        self.context.set_user(Some(user.clone())).await;
        self.observers.emit(|o| o.user_loaded(&user));
        debug!("User {} refreshed", user.id);
        Ok(Some(user))
    }

    /// User sync, download and push in one cycle.
    pub async fn full_sync(&self) -> Result<FullSyncReport> {
        let _cycle = self.cycle.lock().await;
        let start = Instant::now();

        let user = match self.user_sync().await {
            Ok(user) => user,
            Err(e) if e.is_session_invalid() => return Err(e),
            Err(e) => {
                warn!("User sync failed, continuing with cached profile: {}", e);
                self.context.user().await
            }
        };
        let download = self.sync_unlocked().await?;
        let push = self.sync_push_unlocked().await?;

        info!("Full sync finished in {:?}", start.elapsed());
        Ok(FullSyncReport {
            user,
            download,
            push,
        })
    }

    /// Log out.
    ///
    /// Marks the session for remote deletion and drops the user and every
    /// table object. The session record stays until
    /// [`SyncEngine::session_sync_push`] confirms the deletion. Local
    /// changes that were not pushed are lost.
    pub async fn logout(&self) -> Result<()> {
        if let Some(mut session) = self.cache.session().await? {
            session.upload_status = status::on_logout(session.upload_status);
            self.cache.save_session(&session).await?;
        }

        self.cache.remove_user().await?;
        self.cache.clear_table_objects().await?;
        self.context.reset().await;

        info!("Logged out");
        self.observers.emit(|o| o.logged_out());
        Ok(())
    }

    /// Discard the session and all cached data without contacting the remote.
    pub async fn logout_locally(&self) -> Result<()> {
        self.cache.remove_user().await?;
        self.cache.remove_session().await?;
        self.cache.clear_table_objects().await?;
        self.context.reset().await;

        info!("Session discarded locally");
        self.observers.emit(|o| o.logged_out());
        Ok(())
    }

    /// Reconcile a single table object with the remote.
    pub async fn download_table_object(&self, uuid: &str) -> Result<ObjectOutcome> {
        let result = self.downloader.download_table_object(uuid).await;
        self.end_session_on_invalid(result).await
    }

    /// Apply a change notification from the push listener.
    pub async fn handle_remote_change(&self, change: &RemoteChange) -> Result<ObjectOutcome> {
        if !self.is_logged_in().await {
            return Ok(ObjectOutcome::Unchanged);
        }
        let result = self.downloader.handle_remote_change(change).await;
        self.end_session_on_invalid(result).await
    }

    /// Process one scheduler request.
    pub async fn process_request(&self, request: SyncRequest) -> Result<SyncResult> {
        let start = Instant::now();

        match request {
            SyncRequest::Full => {
                let report = self.full_sync().await?;
                Ok(SyncResult::from_reports(Some(&report.download), Some(&report.push)))
            }
            SyncRequest::Push => {
                let report = self.sync_push().await?;
                Ok(SyncResult::from_reports(None, Some(&report)))
            }
            SyncRequest::Object(uuid) => {
                let outcome = self.download_table_object(&uuid).await?;
                Ok(SyncResult::from_object(outcome, start.elapsed()))
            }
            SyncRequest::RemoteChange(change) => {
                let outcome = self.handle_remote_change(&change).await?;
                Ok(SyncResult::from_object(outcome, start.elapsed()))
            }
            SyncRequest::Shutdown => Ok(SyncResult::default()),
        }
    }

    /// End the local session if the remote declared it invalid.
    async fn end_session_on_invalid<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if e.is_session_invalid() => {
                warn!("Session rejected by the remote: {}", e);
                self.logout_locally().await?;
                Err(e)
            }
            other => other,
        }
    }

    // Local mutations

    /// Create a table object with synced properties.
    pub async fn create_table_object(
        &self,
        table_id: TableId,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<TableObject> {
        self.check_table(table_id)?;

        let mut object = TableObject::new(table_id);
        object.upload_status = status::on_local_create();
        object.properties = properties
            .into_iter()
            .map(|(name, value)| (name, Property::synced(value)))
            .collect();

        self.cache.save_table_object(&object).await?;
        debug!("Created table object {} in table {}", object.uuid, table_id);
        Ok(object)
    }

    /// Create a file object holding `data`.
    pub async fn create_file_object(
        &self,
        table_id: TableId,
        data: Vec<u8>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<TableObject> {
        self.check_table(table_id)?;

        let mut object = TableObject::new(table_id);
        object.is_file = true;
        object.properties = properties
            .into_iter()
            .map(|(name, value)| (name, Property::synced(value)))
            .collect();

        // Blob first, so a cached file object always has its bytes.
        self.cache.save_file(&object.uuid, data).await?;
        self.cache.save_table_object(&object).await?;
        Ok(object)
    }

    /// Replace the blob of a file object.
    pub async fn set_file(&self, uuid: &str, data: Vec<u8>) -> Result<TableObject> {
        let mut object = self.live_object(uuid).await?;
        if !object.is_file {
            return Err(Error::InvalidInput(format!(
                "Table object is not a file: {}",
                uuid
            )));
        }

        object.upload_status = status::on_local_update(object.upload_status)?;
        self.cache.save_file(uuid, data).await?;
        self.cache.save_table_object(&object).await?;
        Ok(object)
    }

    /// Cached blob of a file object.
    pub async fn file(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        self.cache.file(uuid).await
    }

    /// Set a synced property.
    pub async fn set_property(
        &self,
        uuid: &str,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<TableObject> {
        let mut object = self.live_object(uuid).await?;
        object.upload_status = status::on_local_update(object.upload_status)?;
        object
            .properties
            .insert(name.to_string(), Property::synced(value));

        self.cache.save_table_object(&object).await?;
        Ok(object)
    }

    /// Set a device-only property. Does not mark the object dirty.
    pub async fn set_local_property(
        &self,
        uuid: &str,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<TableObject> {
        let mut object = self.live_object(uuid).await?;
        object
            .properties
            .insert(name.to_string(), Property::local(value));

        self.cache.save_table_object(&object).await?;
        Ok(object)
    }

    /// Remove a property.
    pub async fn remove_property(&self, uuid: &str, name: &str) -> Result<TableObject> {
        let mut object = self.live_object(uuid).await?;
        let Some(removed) = object.properties.get(name) else {
            return Ok(object);
        };

        if !removed.local {
            object.upload_status = status::on_local_update(object.upload_status)?;
        }
        object.properties.remove(name);

        self.cache.save_table_object(&object).await?;
        Ok(object)
    }

    /// Delete a table object.
    ///
    /// Objects never pushed are purged right away; others keep a tombstone
    /// until the deletion is pushed.
    pub async fn delete_table_object(&self, uuid: &str) -> Result<()> {
        let object = self
            .cache
            .table_object(uuid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Table object not found: {}", uuid)))?;

        match status::on_local_delete(object.upload_status, object.belongs_to_user) {
            LocalDelete::Purge => {
                self.cache.remove_table_object(uuid).await?;
                debug!("Purged unsynced table object {}", uuid);
            }
            LocalDelete::Mark(marked) => {
                let mut object = object;
                object.upload_status = marked;
                self.cache.save_table_object(&object).await?;
                debug!("Marked table object {} as {}", uuid, marked);
            }
            LocalDelete::Unchanged => {}
        }
        Ok(())
    }

    /// A table object, unless it is pending deletion.
    pub async fn table_object(&self, uuid: &str) -> Result<Option<TableObject>> {
        Ok(self
            .cache
            .table_object(uuid)
            .await?
            .filter(|o| !is_tombstone(o.upload_status)))
    }

    /// Table objects of one table, without tombstones.
    pub async fn table_objects(&self, table_id: TableId) -> Result<Vec<TableObject>> {
        let mut objects = self.cache.table_objects_of(table_id).await?;
        objects.retain(|o| !is_tombstone(o.upload_status));
        objects.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(objects)
    }

    async fn live_object(&self, uuid: &str) -> Result<TableObject> {
        self.table_object(uuid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Table object not found: {}", uuid)))
    }

    fn check_table(&self, table_id: TableId) -> Result<()> {
        match self.context.config().table_name(table_id) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidInput(format!(
                "Table is not configured: {}",
                table_id
            ))),
        }
    }
}

fn is_tombstone(status: UploadStatus) -> bool {
    matches!(
        status,
        UploadStatus::Deleted | UploadStatus::Removed | UploadStatus::NoRowsDeleted
    )
}
