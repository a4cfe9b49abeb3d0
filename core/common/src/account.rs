//! Session and user profile records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Whether the local session state has been propagated to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionUploadStatus {
    /// Session is live.
    UpToDate,
    /// Logged out locally; the server-side session still has to be deleted.
    Deleted,
}

/// The device's authentication session.
///
/// The access token is zeroized when the record is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Session {
    pub access_token: String,
    #[zeroize(skip)]
    pub upload_status: SessionUploadStatus,
}

impl Session {
    /// Create a live session for the given token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            upload_status: SessionUploadStatus::UpToDate,
        }
    }

    /// Whether a logout still has to be pushed.
    pub fn is_deleted(&self) -> bool {
        self.upload_status == SessionUploadStatus::Deleted
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("upload_status", &self.upload_status)
            .finish()
    }
}

/// Subscription plan of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Plan {
    #[default]
    Free,
    Plus,
    Pro,
}

/// An app owned by the user (developer accounts only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published: bool,
}

/// Cached copy of the remote user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub confirmed: bool,
    /// Storage quota in bytes.
    pub total_storage: u64,
    /// Used storage in bytes.
    pub used_storage: u64,
    #[serde(default)]
    pub plan: Plan,
    pub profile_image_etag: Option<String>,
    #[serde(default)]
    pub apps: Vec<App>,
    /// When this copy was fetched from the remote.
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl User {
    /// Remaining storage in bytes.
    pub fn free_storage(&self) -> u64 {
        self.total_storage.saturating_sub(self.used_storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_debug_redacts_token() {
        let session = Session::new("secret-token");
        let printed = format!("{:?}", session);
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("UpToDate"));
    }

    #[test]
    fn test_session_roundtrip_keeps_status() {
        let mut session = Session::new("abc");
        session.upload_status = SessionUploadStatus::Deleted;

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert!(restored.is_deleted());
        assert_eq!(restored.access_token, "abc");
    }

    #[test]
    fn test_free_storage_saturates() {
        let user = User {
            id: 1,
            email: "a@b.c".to_string(),
            first_name: "A".to_string(),
            confirmed: true,
            total_storage: 10,
            used_storage: 25,
            plan: Plan::Free,
            profile_image_etag: None,
            apps: Vec::new(),
            fetched_at: Utc::now(),
        };
        assert_eq!(user.free_storage(), 0);
    }
}
