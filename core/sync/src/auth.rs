//! Authenticated request execution with transparent token renewal.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::DavContext;
use crate::single_flight::SingleFlight;
use dav_common::{Error, Result, Session};
use dav_storage::{LocalCache, SessionRenewer};

/// Runs gateway requests with the current access token.
///
/// A request answered with `SessionExpired` triggers one renewal and one
/// retry. Concurrent renewals collapse into a single call to the renewer.
pub struct AuthenticatedExecutor {
    context: Arc<DavContext>,
    cache: LocalCache,
    renewer: Arc<dyn SessionRenewer>,
    renewal: SingleFlight<String>,
}

impl AuthenticatedExecutor {
    pub fn new(
        context: Arc<DavContext>,
        cache: LocalCache,
        renewer: Arc<dyn SessionRenewer>,
    ) -> Self {
        Self {
            context,
            cache,
            renewer,
            renewal: SingleFlight::new(),
        }
    }

    /// Execute an operation with the current token.
    ///
    /// # Errors
    /// - `NotLoggedIn` without a session
    /// - `SessionInvalid` if renewal is rejected or the renewed token is stale too
    /// - any error of the operation itself
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.context.access_token().await.ok_or(Error::NotLoggedIn)?;

        match operation(token.clone()).await {
            Err(Error::SessionExpired) => {
                debug!("Access token expired, renewing");
                let renewed = self.renew(&token).await?;
                match operation(renewed).await {
                    Err(Error::SessionExpired) => Err(Error::SessionInvalid(
                        "Renewed access token was rejected".to_string(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Renew the stale token, sharing an in-flight renewal.
    async fn renew(&self, stale_token: &str) -> Result<String> {
        // Another caller may have renewed while our request was in flight.
        if let Some(current) = self.context.access_token().await {
            if current != stale_token {
                return Ok(current);
            }
        }

        let renewer = self.renewer.clone();
        let context = self.context.clone();
        let cache = self.cache.clone();
        let stale = stale_token.to_string();

        let result = self
            .renewal
            .run(move || async move {
                let token = renewer.renew(&stale).await.map_err(renewal_error)?;

                // The stale token is consumed by the renewal, so the context
                // takes the new one even if persisting it fails below.
                context.set_access_token(token.clone()).await;

                let mut session = match cache.session().await? {
                    Some(session) => session,
                    None => Session::new(String::new()),
                };
                session.access_token = token.clone();
                cache.save_session(&session).await?;

                info!("Access token renewed");
                Ok::<String, Error>(token)
            })
            .await;

        result.map_err(|e| unshare(&e))
    }
}

/// Map a renewer failure. Only a rejected renewal ends the session.
fn renewal_error(e: Error) -> Error {
    if e.is_transient() {
        warn!("Token renewal failed transiently: {}", e);
        Error::Network(format!("Token renewal failed: {}", e))
    } else {
        warn!("Token renewal rejected: {}", e);
        Error::SessionInvalid(format!("Token renewal failed: {}", e))
    }
}

/// Rebuild an owned error from one shared between single-flight waiters.
fn unshare(e: &Error) -> Error {
    match e {
        Error::Network(msg) => Error::Network(msg.clone()),
        Error::Io(io) => Error::Io(std::io::Error::new(io.kind(), io.to_string())),
        Error::Serialization(msg) => Error::Serialization(msg.clone()),
        Error::Storage(msg) => Error::Storage(msg.clone()),
        Error::SessionInvalid(msg) => Error::SessionInvalid(msg.clone()),
        other => Error::Storage(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use dav_storage::{GatewayOp, MemoryCacheStore, MemoryGateway, TableObjectGateway};

    async fn setup() -> (Arc<MemoryGateway>, LocalCache, Arc<DavContext>, String) {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.add_table("notes", 1);
        let token = gateway.issue_token();

        let cache = LocalCache::new(Arc::new(MemoryCacheStore::new()));
        cache.save_session(&Session::new(token.clone())).await.unwrap();
        let context = Arc::new(DavContext::new(SyncConfig::default()));
        context.init(&cache).await.unwrap();

        (gateway, cache, context, token)
    }

    #[tokio::test]
    async fn test_expired_token_is_renewed_once() {
        let (gateway, cache, context, token) = setup().await;
        gateway.expire_token(&token);

        let executor = Arc::new(AuthenticatedExecutor::new(
            context.clone(),
            cache.clone(),
            gateway.clone(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let executor = executor.clone();
            let gateway = gateway.clone();
            tasks.push(tokio::spawn(async move {
                executor
                    .execute(|t| {
                        let gateway = gateway.clone();
                        async move { gateway.fetch_table_page(&t, "notes", 1).await }
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(gateway.calls(GatewayOp::RenewSession), 1);
        let renewed = context.access_token().await.unwrap();
        assert_ne!(renewed, token);
        assert_eq!(cache.session().await.unwrap().unwrap().access_token, renewed);
    }

    #[tokio::test]
    async fn test_rejected_renewal_is_session_invalid() {
        let (gateway, cache, context, token) = setup().await;
        gateway.expire_token(&token);
        gateway.reject_renewals(true);

        let executor = AuthenticatedExecutor::new(context, cache, gateway.clone());
        let err = executor
            .execute(|t| {
                let gateway = gateway.clone();
                async move { gateway.fetch_table_page(&t, "notes", 1).await }
            })
            .await
            .unwrap_err();
        assert!(err.is_session_invalid());
    }

    #[tokio::test]
    async fn test_transient_renewal_failure_is_not_logout() {
        let (gateway, cache, context, token) = setup().await;
        gateway.expire_token(&token);
        gateway.fail_next(GatewayOp::RenewSession, 1);

        let executor = AuthenticatedExecutor::new(context.clone(), cache, gateway.clone());
        let err = executor
            .execute(|t| {
                let gateway = gateway.clone();
                async move { gateway.fetch_table_page(&t, "notes", 1).await }
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(context.access_token().await, Some(token));
    }

    #[test]
    fn test_unshare_keeps_error_kind() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(unshare(&io).is_transient());
        assert!(unshare(&Error::SessionInvalid("x".to_string())).is_session_invalid());
        assert!(matches!(
            unshare(&Error::Storage("full".to_string())),
            Error::Storage(msg) if msg == "full"
        ));
        assert!(matches!(
            unshare(&Error::Serialization("bad".to_string())),
            Error::Serialization(_)
        ));
    }

    #[tokio::test]
    async fn test_not_logged_in() {
        let gateway = Arc::new(MemoryGateway::new());
        let cache = LocalCache::new(Arc::new(MemoryCacheStore::new()));
        let context = Arc::new(DavContext::new(SyncConfig::default()));

        let executor = AuthenticatedExecutor::new(context, cache, gateway.clone());
        let err = executor
            .execute(|t| {
                let gateway = gateway.clone();
                async move { gateway.fetch_user(&t).await }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotLoggedIn));
    }
}
