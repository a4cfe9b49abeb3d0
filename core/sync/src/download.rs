//! Download reconciliation of remote tables into the local cache.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::auth::AuthenticatedExecutor;
use crate::conflict::{self, AbsentDecision, StubDecision};
use crate::context::DavContext;
use crate::events::Observers;
use crate::table_order::sort_table_names;
use dav_common::{Error, Result, TableId, UploadStatus};
use dav_storage::{LocalCache, RemoteTableObject, TableObjectGateway, TablePage};

/// Kind of change announced by the push listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteChangeType {
    Create,
    Update,
    Delete,
}

/// A change notification for one table object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub uuid: String,
    pub change_type: RemoteChangeType,
}

impl RemoteChange {
    pub fn new(uuid: impl Into<String>, change_type: RemoteChangeType) -> Self {
        Self {
            uuid: uuid.into(),
            change_type,
        }
    }
}

/// Result of reconciling a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// The remote copy was written to the cache.
    Updated,
    /// The local copy was removed.
    Removed,
    /// The local copy has pending changes and was left alone.
    Kept,
    /// Nothing to do.
    Unchanged,
}

/// Summary of a download run.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Tables whose etag matched the cache.
    pub tables_skipped: usize,
    /// Tables fully reconciled.
    pub tables_synced: usize,
    /// Tables left for the next run after a failure.
    pub tables_incomplete: Vec<String>,
    /// Listing pages fetched, including the first page of skipped tables.
    pub pages_fetched: usize,
    pub objects_downloaded: usize,
    pub objects_removed: usize,
    /// Listed objects whose local copy carries pending changes.
    pub objects_kept: usize,
    pub duration: Duration,
}

impl DownloadReport {
    /// Whether every table was reconciled or skipped.
    pub fn is_complete(&self) -> bool {
        self.tables_incomplete.is_empty()
    }
}

/// Reconciliation state of one table during a run.
struct TableRun {
    name: String,
    id: TableId,
    etag: String,
    listed: HashSet<String>,
    changed: bool,
    failed: bool,
}

/// Reconciles the cache against remote listings.
pub struct Downloader {
    context: Arc<DavContext>,
    cache: LocalCache,
    gateway: Arc<dyn TableObjectGateway>,
    executor: Arc<AuthenticatedExecutor>,
    observers: Arc<Observers>,
}

impl Downloader {
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

    /// Reconcile every configured table.
    ///
    /// Tables whose aggregate etag matches the cached one are skipped after
    /// their first page. A table that hits a transient failure, or whose
    /// etag changes between pages, keeps its cached etag and is not pruned,
    /// so the next run picks it up again.
    ///
    /// # Errors
    /// - `SessionInvalid` aborts the run
    /// - cache failures
    pub async fn run(&self) -> Result<DownloadReport> {
        let start = Instant::now();
        let config = self.context.config();
        let concurrency = config.download_concurrency.max(1);
        let mut report = DownloadReport::default();

        info!("Starting download of {} tables", config.tables.len());

        // 1. First page of every table
        let first_fetches: Vec<_> = config
            .tables
            .iter()
            .map(|table| async move { (table, self.fetch_page(&table.name, 1).await) })
            .collect();
        let firsts: Vec<_> = stream::iter(first_fetches)
            .buffered(concurrency)
            .collect()
            .await;

        let mut runs: Vec<TableRun> = Vec::new();
        let mut first_pages: HashMap<String, TablePage> = HashMap::new();
        let mut page_counts: HashMap<String, usize> = HashMap::new();

        for (table, result) in firsts {
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    abort_on_session_error(&e)?;
                    warn!("Failed to list table {}: {}", table.name, e);
                    report.tables_incomplete.push(table.name.clone());
                    continue;
                }
            };
            report.pages_fetched += 1;

            if self.cache.table_etag(&table.name).await?.as_deref() == Some(page.etag.as_str()) {
                debug!("Table {} unchanged, skipping", table.name);
                report.tables_skipped += 1;
                continue;
            }

            debug!("Table {} has {} pages", table.name, page.pages);
            runs.push(TableRun {
                name: table.name.clone(),
                id: table.id,
                etag: page.etag.clone(),
                listed: HashSet::new(),
                changed: false,
                failed: false,
            });
            page_counts.insert(table.name.clone(), page.pages);
            first_pages.insert(table.name.clone(), page);
        }

        // 2. Remaining pages in scheduled order
        let names: Vec<String> = runs.iter().map(|r| r.name.clone()).collect();
        let schedule = number_pages(sort_table_names(
            &names,
            &config.parallel_tables,
            &page_counts,
        ));

        {
            let mut pages = pin!(stream::iter(schedule)
                .map(|(name, number)| {
                    let first = if number == 1 {
                        first_pages.remove(&name)
                    } else {
                        None
                    };
                    let reused = first.is_some();
                    async move {
                        let result = match first {
                            Some(page) => Ok(page),
                            None => self.fetch_page(&name, number).await,
                        };
                        (name, number, reused, result)
                    }
                })
                .buffered(concurrency));

            while let Some((name, number, reused, result)) = pages.next().await {
                let Some(run) = runs.iter_mut().find(|r| r.name == name) else {
                    continue;
                };
                if run.failed {
                    continue;
                }

                let page = match result {
                    Ok(page) => page,
                    Err(e) => {
                        abort_on_session_error(&e)?;
                        warn!("Failed to fetch page {} of table {}: {}", number, name, e);
                        run.failed = true;
                        continue;
                    }
                };
                if !reused {
                    report.pages_fetched += 1;
                }

                // Offsets shift when the table changes mid-listing, so an
                // object may be missing from every page.
                if page.etag != run.etag {
                    warn!(
                        "Table {} changed while listing page {}, retrying next run",
                        name, number
                    );
                    run.failed = true;
                    continue;
                }

                self.apply_page(run, page, &mut report).await?;
            }
        }

        // Tables with no pages never reach the stream; page 1 is their full listing.
        for (name, page) in first_pages {
            if let Some(run) = runs.iter_mut().find(|r| r.name == name) {
                self.apply_page(run, page, &mut report).await?;
            }
        }

        // 3. Prune and record etags of complete tables
        for run in &mut runs {
            if run.failed {
                report.tables_incomplete.push(run.name.clone());
                continue;
            }

            for local in self.cache.table_objects_of(run.id).await? {
                if run.listed.contains(&local.uuid) {
                    continue;
                }
                if conflict::on_remote_absent(&local) == AbsentDecision::Remove {
                    self.cache.remove_table_object(&local.uuid).await?;
                    self.observers
                        .emit(|o| o.table_object_deleted(&local.uuid, local.table_id));
                    report.objects_removed += 1;
                    run.changed = true;
                }
            }

            self.cache.save_table_etag(&run.name, &run.etag).await?;
            report.tables_synced += 1;
            self.observers
                .emit(|o| o.table_synced(&run.name, run.changed));
        }

        report.duration = start.elapsed();
        info!(
            "Download finished in {:?}: {} synced, {} skipped, {} incomplete, {} downloaded, {} removed",
            report.duration,
            report.tables_synced,
            report.tables_skipped,
            report.tables_incomplete.len(),
            report.objects_downloaded,
            report.objects_removed
        );
        self.observers.emit(|o| o.sync_finished(&report));

        Ok(report)
    }

    /// Classify the stubs of one page and download what changed.
    async fn apply_page(
        &self,
        run: &mut TableRun,
        page: TablePage,
        report: &mut DownloadReport,
    ) -> Result<()> {
        let mut queue = Vec::new();

        for stub in page.objects {
            let local = self.cache.table_object(&stub.uuid).await?;
            match conflict::on_remote_stub(local.as_ref(), &stub.etag) {
                StubDecision::Download => queue.push(stub.uuid.clone()),
                StubDecision::KeepLocal => {
                    debug!("Keeping pending local copy of {}", stub.uuid);
                    report.objects_kept += 1;
                }
                StubDecision::InSync => {}
            }
            run.listed.insert(stub.uuid);
        }

        if queue.is_empty() {
            return Ok(());
        }

        let concurrency = self.context.config().download_concurrency.max(1);
        let outcomes: Vec<(String, Result<ObjectOutcome>)> = stream::iter(queue)
            .map(|uuid| async move {
                let outcome = self.download_table_object(&uuid).await;
                (uuid, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut session_error = None;
        for (uuid, outcome) in outcomes {
            match outcome {
                Ok(ObjectOutcome::Updated) => {
                    report.objects_downloaded += 1;
                    run.changed = true;
                }
                Ok(ObjectOutcome::Removed) => {
                    report.objects_removed += 1;
                    run.changed = true;
                }
                Ok(ObjectOutcome::Kept) => report.objects_kept += 1,
                Ok(ObjectOutcome::Unchanged) => {}
                Err(e) if e.is_session_invalid() || matches!(e, Error::NotLoggedIn) => {
                    session_error = Some(e);
                }
                Err(e) => {
                    warn!("Failed to download table object {}: {}", uuid, e);
                    run.failed = true;
                }
            }
        }

        match session_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fetch one object and reconcile it with the local copy.
    ///
    /// A local copy with pending changes is never overwritten. If the remote
    /// reports the object missing, an up-to-date local copy is removed.
    pub async fn download_table_object(&self, uuid: &str) -> Result<ObjectOutcome> {
        let gateway = &self.gateway;
        let fetched = self
            .executor
            .execute(|token| async move { gateway.fetch_object(&token, uuid).await })
            .await;

        let remote = match fetched {
            Ok(remote) => remote,
            Err(e) if e.is_not_found() => return self.remove_if_up_to_date(uuid).await,
            Err(e) => return Err(e),
        };

        self.store_remote(remote).await
    }

    /// Apply a push-listener notification.
    pub async fn handle_remote_change(&self, change: &RemoteChange) -> Result<ObjectOutcome> {
        debug!("Remote change {:?} for {}", change.change_type, change.uuid);
        match change.change_type {
            RemoteChangeType::Create | RemoteChangeType::Update => {
                self.download_table_object(&change.uuid).await
            }
            RemoteChangeType::Delete => self.remove_if_up_to_date(&change.uuid).await,
        }
    }

    async fn store_remote(&self, remote: RemoteTableObject) -> Result<ObjectOutcome> {
        let uuid = remote.uuid.clone();

        let mut file = None;
        if remote.is_file && self.context.config().download_files {
            let gateway = &self.gateway;
            let uuid = uuid.as_str();
            match self
                .executor
                .execute(|token| async move { gateway.download_file(&token, uuid).await })
                .await
            {
                Ok(data) => file = Some(data),
                Err(e) if e.is_not_found() => debug!("No blob for file object {}", uuid),
                Err(e) => return Err(e),
            }
        }

        // The local copy may have been modified while the fetch was in flight.
        let local = self.cache.table_object(&uuid).await?;
        if !conflict::may_overwrite(local.as_ref()) {
            debug!("Local copy of {} changed during download, keeping it", uuid);
            return Ok(ObjectOutcome::Kept);
        }

        let object = remote.into_local(local.as_ref());
        let file_downloaded = file.is_some();
        if let Some(data) = file {
            self.cache.save_file(&uuid, data).await?;
        }
        self.cache.save_table_object(&object).await?;

        self.observers
            .emit(|o| o.table_object_updated(&object, file_downloaded));
        Ok(ObjectOutcome::Updated)
    }

    async fn remove_if_up_to_date(&self, uuid: &str) -> Result<ObjectOutcome> {
        let Some(local) = self.cache.table_object(uuid).await? else {
            return Ok(ObjectOutcome::Unchanged);
        };

        if local.upload_status != UploadStatus::UpToDate {
            return Ok(ObjectOutcome::Kept);
        }

        self.cache.remove_table_object(uuid).await?;
        self.observers
            .emit(|o| o.table_object_deleted(uuid, local.table_id));
        Ok(ObjectOutcome::Removed)
    }

    async fn fetch_page(&self, table_name: &str, page: usize) -> Result<TablePage> {
        let gateway = &self.gateway;
        self.executor
            .execute(|token| async move { gateway.fetch_table_page(&token, table_name, page).await })
            .await
    }
}

/// Pair each scheduled table name with its 1-based page number.
fn number_pages(schedule: Vec<String>) -> Vec<(String, usize)> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    schedule
        .into_iter()
        .map(|name| {
            let counter = counters.entry(name.clone()).or_insert(0);
            *counter += 1;
            let number = *counter;
            (name, number)
        })
        .collect()
}

/// Errors that end the whole run instead of a single table.
fn abort_on_session_error(e: &Error) -> Result<()> {
    match e {
        Error::SessionInvalid(msg) => Err(Error::SessionInvalid(msg.clone())),
        Error::NotLoggedIn => Err(Error::NotLoggedIn),
        _ => Ok(()),
    }
}
