//! Single-flight coordination of an async operation.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex};

use dav_common::{Error, Result};

type Flight<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

/// Collapses concurrent runs of an operation into one.
///
/// The first caller starts the operation; callers arriving while it is in
/// flight await the same result. Once it completes, the next call starts a
/// fresh run.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<Option<Flight<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }

    /// Run `start` unless a run is already in flight, then await the result.
    ///
    /// Errors are shared between all waiters, hence the `Arc`.
    pub async fn run<F, Fut>(&self, start: F) -> std::result::Result<T, Arc<Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let flight = {
            let mut slot = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = start().map(|r| r.map_err(Arc::new)).boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut slot = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }

        result
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inflight
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let flight = flight.clone();
            let runs = runs.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .run(move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.is_running());
    }

    #[tokio::test]
    async fn test_next_call_starts_fresh() {
        let flight = SingleFlight::<u32>::new();
        let runs = Arc::new(AtomicU32::new(0));

        for expected in 1..=2 {
            let runs = runs.clone();
            let value = flight
                .run(move || async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_error_is_shared() {
        let flight = SingleFlight::<u32>::new();
        let err = flight
            .run(|| async { Err(Error::SessionInvalid("revoked".to_string())) })
            .await
            .unwrap_err();
        assert!(err.is_session_invalid());
    }
}
