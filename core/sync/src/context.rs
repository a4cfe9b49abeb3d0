//! Explicit client state shared by the engine components.

use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::SyncConfig;
use dav_common::{Result, User};
use dav_storage::LocalCache;

/// Authentication and configuration state of one client.
///
/// Lifecycle: created from a [`SyncConfig`], filled from the cache by
/// [`DavContext::init`] or by a login, emptied by [`DavContext::reset`] on
/// logout.
pub struct DavContext {
    config: SyncConfig,
    access_token: RwLock<Option<Zeroizing<String>>>,
    user: RwLock<Option<User>>,
}

impl DavContext {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            access_token: RwLock::new(None),
            user: RwLock::new(None),
        }
    }

    /// Load session and user from the cache.
    ///
    /// A session that is pending deletion does not count as logged in.
    pub async fn init(&self, cache: &LocalCache) -> Result<()> {
        let session = cache.session().await?;
        let token = session
            .filter(|s| !s.is_deleted())
            .map(|s| Zeroizing::new(s.access_token.clone()));

        let logged_in = token.is_some();
        *self.access_token.write().await = token;
        *self.user.write().await = if logged_in { cache.user().await? } else { None };

        debug!("Context initialized (logged in: {})", logged_in);
        Ok(())
    }

    /// Forget the session and user.
    pub async fn reset(&self) {
        *self.access_token.write().await = None;
        *self.user.write().await = None;
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current access token, if logged in.
    pub async fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .await
            .as_ref()
            .map(|t| t.as_str().to_string())
    }

    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().await = Some(Zeroizing::new(token.into()));
    }

    pub async fn is_logged_in(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    pub async fn user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    pub async fn set_user(&self, user: Option<User>) {
        *self.user.write().await = user;
    }
}
