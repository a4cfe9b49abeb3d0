//! Push of local changes to the remote.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::auth::AuthenticatedExecutor;
use crate::context::DavContext;
use crate::events::Observers;
use crate::status::{self, PushAction, PushOutcome, PushTransition};
use dav_common::{Error, Result, TableObject, UploadStatus};
use dav_storage::{LocalCache, ObjectWrite, ObjectWriteResponse, TableObjectGateway};

/// Summary of a push run.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Whether a pending session deletion was confirmed.
    pub session_deleted: bool,
    /// Creates and updates accepted by the remote.
    pub pushed: usize,
    /// Objects dropped from the cache.
    pub purged: usize,
    /// Creates that collided and were replaced by the remote copy.
    pub adopted: usize,
    /// Objects that stay dirty, with the failure.
    pub failed: Vec<(String, String)>,
    pub duration: Duration,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of pushing one object.
#[derive(Debug)]
enum Pushed {
    UpToDate,
    Purged,
    Adopted,
    Failed(Error),
    Skipped,
}

/// Pushes dirty table objects and pending session deletions.
pub struct Uploader {
    context: Arc<DavContext>,
    cache: LocalCache,
    gateway: Arc<dyn TableObjectGateway>,
    executor: Arc<AuthenticatedExecutor>,
    observers: Arc<Observers>,
}

impl Uploader {
    pub fn new(
        context: Arc<DavContext>,
        cache: LocalCache,
        gateway: Arc<dyn TableObjectGateway>,
        executor: Arc<AuthenticatedExecutor>,
        observers: Arc<Observers>,
    ) -> Self {
        Self {
            context,
            cache,
            gateway,
            executor,
            observers,
        }
    }

    /// Push a pending session deletion.
    ///
    /// Returns `true` if the session record was dropped. The deletion uses
    /// the stored token directly since the context forgot it on logout.
    /// A session the remote no longer knows counts as deleted.
    pub async fn push_session(&self) -> Result<bool> {
        let Some(session) = self.cache.session().await? else {
            return Ok(false);
        };
        if !session.is_deleted() {
            return Ok(false);
        }

        let result = match self.gateway.delete_session(&session.access_token).await {
            Err(Error::SessionExpired) | Err(Error::SessionInvalid(_)) => {
                debug!("Session already invalid remotely");
                Ok(())
            }
            other => other,
        };

        if status::session_push_done(PushOutcome::of(&result)) {
            self.cache.remove_session().await?;
            info!("Session deletion pushed");
            return Ok(true);
        }

        match result {
            Err(e) => Err(e),
            Ok(()) => Ok(false),
        }
    }

    /// Push the session deletion, then every dirty object.
    ///
    /// # Errors
    /// - `SessionInvalid` once in-flight pushes have settled
    /// - cache failures
    pub async fn run(&self) -> Result<PushReport> {
        let start = Instant::now();
        let mut report = PushReport::default();

        match self.push_session().await {
            Ok(deleted) => report.session_deleted = deleted,
            Err(e) => warn!("Failed to push session deletion: {}", e),
        }

        if self.context.is_logged_in().await {
            self.push_objects(&mut report).await?;
        }

        report.duration = start.elapsed();
        info!(
            "Push finished in {:?}: {} pushed, {} purged, {} adopted, {} failed",
            report.duration,
            report.pushed,
            report.purged,
            report.adopted,
            report.failed.len()
        );
        Ok(report)
    }

    async fn push_objects(&self, report: &mut PushReport) -> Result<()> {
        let config = self.context.config();

        let mut pending: Vec<TableObject> = self
            .cache
            .table_objects()
            .await?
            .into_iter()
            .filter(|o| o.upload_status.is_pending())
            .collect();
        pending.sort_by_key(|o| {
            (
                o.upload_status.push_priority(),
                config.table_position(o.table_id),
            )
        });

        if pending.is_empty() {
            debug!("Nothing to push");
            return Ok(());
        }
        debug!("Pushing {} table objects", pending.len());

        let aborted = AtomicBool::new(false);
        let aborted = &aborted;
        let results: Vec<(String, Result<Pushed>)> = stream::iter(pending)
            .map(|object| async move {
                let uuid = object.uuid.clone();
                if aborted.load(Ordering::SeqCst) {
                    return (uuid, Ok(Pushed::Skipped));
                }
                let result = self.push_object(object).await;
                if result.is_err() {
                    aborted.store(true, Ordering::SeqCst);
                }
                (uuid, result)
            })
            .buffer_unordered(config.push_concurrency.max(1))
            .collect()
            .await;

        let mut fatal = None;
        for (uuid, result) in results {
            match result {
                Ok(Pushed::UpToDate) => report.pushed += 1,
                Ok(Pushed::Purged) => report.purged += 1,
                Ok(Pushed::Adopted) => report.adopted += 1,
                Ok(Pushed::Skipped) => {}
                Ok(Pushed::Failed(e)) => {
                    warn!("Failed to push table object {}: {}", uuid, e);
                    report.failed.push((uuid, e.to_string()));
                }
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Push one object and apply the resulting transition.
    ///
    /// Returns `Err` only for failures that abort the run.
    async fn push_object(&self, object: TableObject) -> Result<Pushed> {
        let action = status::push_action(object.upload_status);
        debug!("Push {:?} for {}", action, object.uuid);

        let gateway = &self.gateway;
        let uuid = object.uuid.as_str();
        let mut write = None;

        let result: Result<Option<ObjectWriteResponse>> = match action {
            PushAction::Skip => return Ok(Pushed::Skipped),
            PushAction::Purge => {
                self.purge(&object).await?;
                return Ok(Pushed::Purged);
            }
            PushAction::Create | PushAction::Update => {
                let file = if object.is_file {
                    self.cache.file(uuid).await?
                } else {
                    None
                };
                let payload = ObjectWrite::from_local(&object, file);
                let create = action == PushAction::Create;
                let sent = &payload;
                let result = self
                    .executor
                    .execute(|token| async move {
                        if create {
                            gateway.create_object(&token, sent.clone()).await
                        } else {
                            gateway.update_object(&token, sent.clone()).await
                        }
                    })
                    .await
                    .map(Some);
                write = Some(payload);
                result
            }
            PushAction::Delete => self
                .executor
                .execute(|token| async move { gateway.delete_object(&token, uuid).await })
                .await
                .map(|_| None),
            PushAction::RemoveAccess => self
                .executor
                .execute(|token| async move { gateway.remove_object_access(&token, uuid).await })
                .await
                .map(|_| None),
        };

        if let Err(e) = &result {
            if e.is_session_invalid() || matches!(e, Error::NotLoggedIn) {
                return Err(Error::SessionInvalid(e.to_string()));
            }
        }

        let transition = status::after_push(object.upload_status, PushOutcome::of(&result));
        match (transition, result) {
            (PushTransition::MarkUpToDate, Ok(Some(response))) => {
                self.mark_up_to_date(&object, write.as_ref(), response).await?;
                Ok(Pushed::UpToDate)
            }
            (PushTransition::Purge, _) => {
                self.purge(&object).await?;
                Ok(Pushed::Purged)
            }
            (PushTransition::AdoptRemote, _) => self.adopt_remote(&object).await,
            (_, Err(e)) => Ok(Pushed::Failed(e)),
            (_, Ok(_)) => Ok(Pushed::Skipped),
        }
    }

    /// Record the server version of a pushed object.
    ///
    /// If the object changed locally while the push was in flight, only the
    /// etag is recorded and the object stays dirty.
    async fn mark_up_to_date(
        &self,
        pushed: &TableObject,
        write: Option<&ObjectWrite>,
        response: ObjectWriteResponse,
    ) -> Result<()> {
        let Some(mut current) = self.cache.table_object(&pushed.uuid).await? else {
            debug!("Table object {} vanished during push", pushed.uuid);
            return Ok(());
        };

        let blob_unchanged = match write.and_then(|w| w.file.as_ref()) {
            Some(sent) => self.cache.file(&pushed.uuid).await?.as_ref() == Some(sent),
            None => true,
        };
        let unchanged = current.upload_status == pushed.upload_status
            && current.same_upload_content(pushed)
            && blob_unchanged;

        current.etag = Some(response.object.etag.clone());
        if unchanged {
            current.upload_status = UploadStatus::UpToDate;
        } else if current.upload_status == UploadStatus::New {
            // The remote copy exists now, later edits are updates.
            current.upload_status = UploadStatus::Updated;
        }
        self.cache.save_table_object(&current).await?;

        if let Some(table_name) = self.context.config().table_name(current.table_id) {
            self.cache
                .save_table_etag(table_name, &response.table_etag)
                .await?;
        }
        Ok(())
    }

    /// Replace a colliding local object with the remote copy.
    async fn adopt_remote(&self, object: &TableObject) -> Result<Pushed> {
        let gateway = &self.gateway;
        let uuid = object.uuid.as_str();
        let fetched = self
            .executor
            .execute(|token| async move { gateway.fetch_object(&token, uuid).await })
            .await;

        let remote = match fetched {
            Ok(remote) => remote,
            Err(e) if e.is_session_invalid() => return Err(e),
            Err(e) => return Ok(Pushed::Failed(e)),
        };

        if remote.is_file && self.context.config().download_files {
            match self
                .executor
                .execute(|token| async move { gateway.download_file(&token, uuid).await })
                .await
            {
                Ok(data) => self.cache.save_file(uuid, data).await?,
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_session_invalid() => return Err(e),
                Err(e) => return Ok(Pushed::Failed(e)),
            }
        }

        let adopted = remote.into_local(Some(object));
        self.cache.save_table_object(&adopted).await?;
        info!("Adopted remote copy of {}", uuid);
        self.observers
            .emit(|o| o.table_object_updated(&adopted, adopted.is_file));
        Ok(Pushed::Adopted)
    }

    async fn purge(&self, object: &TableObject) -> Result<()> {
        self.cache.remove_table_object(&object.uuid).await?;
        self.observers
            .emit(|o| o.table_object_deleted(&object.uuid, object.table_id));
        Ok(())
    }
}
