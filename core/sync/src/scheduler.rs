//! Sync scheduling - manual, on-demand and periodic modes.
//!
//! All requests funnel through one background task, so downloads and pushes
//! of one engine never overlap.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::download::{DownloadReport, ObjectOutcome, RemoteChange};
use crate::upload::PushReport;
use dav_common::{Error, Result};

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Explicit requests only; remote change notifications are dropped.
    Manual,
    /// Remote change notifications are applied as they arrive.
    OnDemand,
    /// Full sync at regular intervals.
    Periodic { interval: Duration },
    /// Both on-demand and periodic.
    Hybrid { interval: Duration },
}

impl SyncMode {
    fn period(&self) -> Option<Duration> {
        match self {
            // A zero period would spin
            Self::Periodic { interval } | Self::Hybrid { interval } => {
                Some(*interval).filter(|d| !d.is_zero())
            }
            Self::Manual | Self::OnDemand => None,
        }
    }

    fn follows_changes(&self) -> bool {
        matches!(self, Self::OnDemand | Self::Hybrid { .. })
    }
}

/// Sync request types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// User sync, download and push.
    Full,
    /// Push local changes only.
    Push,
    /// Reconcile a single table object.
    Object(String),
    /// Apply a push-listener notification.
    RemoteChange(RemoteChange),
    /// Shutdown the scheduler.
    Shutdown,
}

/// Counters of one processed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub objects_downloaded: usize,
    pub objects_removed: usize,
    pub objects_pushed: usize,
    pub objects_failed: usize,
    pub tables_incomplete: usize,
    pub duration: Duration,
}

impl SyncResult {
    /// Combine the reports of a download and a push.
    pub fn from_reports(download: Option<&DownloadReport>, push: Option<&PushReport>) -> Self {
        let mut result = Self::default();

        if let Some(download) = download {
            result.objects_downloaded = download.objects_downloaded;
            result.objects_removed = download.objects_removed;
            result.tables_incomplete = download.tables_incomplete.len();
            result.duration += download.duration;
        }

        if let Some(push) = push {
            result.objects_pushed = push.pushed + push.adopted;
            result.objects_removed += push.purged;
            result.objects_failed = push.failed.len();
            result.duration += push.duration;
        }

        result
    }

    /// Counters for a single object reconciliation.
    pub fn from_object(outcome: ObjectOutcome, duration: Duration) -> Self {
        Self {
            objects_downloaded: usize::from(outcome == ObjectOutcome::Updated),
            objects_removed: usize::from(outcome == ObjectOutcome::Removed),
            duration,
            ..Self::default()
        }
    }
}

type Request = (SyncRequest, oneshot::Sender<Result<SyncResult>>);

/// Scheduler for managing sync timing and requests.
#[derive(Clone)]
pub struct SyncScheduler {
    /// Current sync mode.
    mode: Arc<RwLock<SyncMode>>,
    /// Channel to send sync requests.
    request_tx: mpsc::Sender<Request>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let mode = Arc::new(RwLock::new(mode));

        let scheduler = Self {
            mode: mode.clone(),
            request_tx,
        };

        let handle = SyncSchedulerHandle { mode, request_rx };

        (scheduler, handle)
    }

    /// Request a full sync.
    pub async fn request_sync(&self) -> Result<SyncResult> {
        self.request(SyncRequest::Full).await
    }

    /// Request a push of local changes.
    pub async fn request_push(&self) -> Result<SyncResult> {
        self.request(SyncRequest::Push).await
    }

    /// Request reconciliation of one table object.
    pub async fn request_object(&self, uuid: impl Into<String>) -> Result<SyncResult> {
        self.request(SyncRequest::Object(uuid.into())).await
    }

    /// Send a request and wait for its result.
    pub async fn request(&self, request: SyncRequest) -> Result<SyncResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Scheduler("Failed to receive sync result".to_string()))?
    }

    /// Forward a remote change notification without waiting for the result.
    ///
    /// Dropped unless the mode follows changes.
    pub async fn notify_change(&self, change: RemoteChange) {
        let mode = self.mode.read().await.clone();
        if !mode.follows_changes() {
            debug!("Change notification ignored (mode: {:?})", mode);
            return;
        }

        let (response_tx, _) = oneshot::channel();
        if self
            .request_tx
            .send((SyncRequest::RemoteChange(change), response_tx))
            .await
            .is_err()
        {
            debug!("Change notification dropped, scheduler not running");
        }
    }

    /// Change the sync mode.
    pub async fn set_mode(&self, mode: SyncMode) {
        *self.mode.write().await = mode;
    }

    /// Get current sync mode.
    pub async fn get_mode(&self) -> SyncMode {
        self.mode.read().await.clone()
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    mode: Arc<RwLock<SyncMode>>,
    request_rx: mpsc::Receiver<Request>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler background task.
    ///
    /// This should be spawned in a tokio task. The `sync_fn` is called for
    /// every request, one at a time. Returns when a shutdown is requested or
    /// every [`SyncScheduler`] was dropped.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(SyncRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<SyncResult>> + Send,
    {
        let mut period = self.mode.read().await.period();
        let mut ticker = period.map(interval);

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                received = self.request_rx.recv() => {
                    let Some((request, response_tx)) = received else {
                        info!("All scheduler handles dropped");
                        break;
                    };
                    if request == SyncRequest::Shutdown {
                        info!("Received shutdown request");
                        break;
                    }

                    debug!("Processing sync request: {:?}", request);
                    let result = sync_fn(request).await;
                    if let Err(e) = &result {
                        error!("Sync request failed: {}", e);
                    }
                    let _ = response_tx.send(result);
                }

                _ = Self::wait_for_periodic(&mut ticker) => {
                    debug!("Triggering periodic sync");
                    match sync_fn(SyncRequest::Full).await {
                        Ok(result) => info!(
                            "Periodic sync completed: {} downloaded, {} pushed, {} failed",
                            result.objects_downloaded,
                            result.objects_pushed,
                            result.objects_failed
                        ),
                        Err(e) => error!("Periodic sync failed: {}", e),
                    }
                }
            }

            // Recreate the interval if the mode changed
            let expected = self.mode.read().await.period();
            if expected != period {
                period = expected;
                ticker = period.map(interval);
            }
        }
    }

    async fn wait_for_periodic(ticker: &mut Option<tokio::time::Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
