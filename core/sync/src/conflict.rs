//! Conflict rules between the local cache and remote listings.
//!
//! The policy is object-granular: local pending changes always win over a
//! remote listing, and are reconciled by the next push. Up-to-date local
//! copies always yield to the remote.

use dav_common::{TableObject, UploadStatus};

/// What to do with a listed remote stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubDecision {
    /// Fetch the full object and overwrite the local copy.
    Download,
    /// Local copy carries pending changes; leave it for the push phase.
    KeepLocal,
    /// Local copy already matches.
    InSync,
}

/// What to do with a local object the remote no longer lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentDecision {
    /// Remote deletion: remove locally.
    Remove,
    /// Keep the local copy; a later push decides its fate.
    Keep,
}

/// Decide how to reconcile a listed stub with the local copy.
pub fn on_remote_stub(local: Option<&TableObject>, remote_etag: &str) -> StubDecision {
    let Some(local) = local else {
        return StubDecision::Download;
    };

    if local.etag.as_deref() == Some(remote_etag) {
        return StubDecision::InSync;
    }

    match local.upload_status {
        UploadStatus::UpToDate => StubDecision::Download,
        _ => StubDecision::KeepLocal,
    }
}

/// Decide what to do with a local object that is absent remotely.
///
/// Only copies without pending changes are removed; `NoRowsDeleted`
/// tombstones are already confirmed gone.
pub fn on_remote_absent(local: &TableObject) -> AbsentDecision {
    match local.upload_status {
        UploadStatus::UpToDate | UploadStatus::NoRowsDeleted => AbsentDecision::Remove,
        UploadStatus::New
        | UploadStatus::Updated
        | UploadStatus::Deleted
        | UploadStatus::Removed => AbsentDecision::Keep,
    }
}

/// Whether a fetched remote copy may overwrite the current local one.
///
/// Re-checked right before the write, since the local copy may have changed
/// while the fetch was in flight.
pub fn may_overwrite(local: Option<&TableObject>) -> bool {
    local.map_or(true, |l| l.upload_status == UploadStatus::UpToDate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(status: UploadStatus, etag: Option<&str>) -> TableObject {
        let mut obj = TableObject::with_uuid("u", 1);
        obj.upload_status = status;
        obj.etag = etag.map(String::from);
        obj
    }

    #[test]
    fn test_missing_local_downloads() {
        assert_eq!(on_remote_stub(None, "e1"), StubDecision::Download);
    }

    #[test]
    fn test_same_etag_is_in_sync() {
        let obj = local(UploadStatus::UpToDate, Some("e1"));
        assert_eq!(on_remote_stub(Some(&obj), "e1"), StubDecision::InSync);
    }

    #[test]
    fn test_remote_wins_over_clean_copy() {
        let obj = local(UploadStatus::UpToDate, Some("e1"));
        assert_eq!(on_remote_stub(Some(&obj), "e2"), StubDecision::Download);
    }

    #[test]
    fn test_pending_changes_win() {
        for status in [
            UploadStatus::New,
            UploadStatus::Updated,
            UploadStatus::Deleted,
            UploadStatus::Removed,
        ] {
            let obj = local(status, Some("e1"));
            assert_eq!(on_remote_stub(Some(&obj), "e2"), StubDecision::KeepLocal);
        }
    }

    #[test]
    fn test_absent_rules() {
        assert_eq!(
            on_remote_absent(&local(UploadStatus::UpToDate, Some("e"))),
            AbsentDecision::Remove
        );
        assert_eq!(
            on_remote_absent(&local(UploadStatus::NoRowsDeleted, None)),
            AbsentDecision::Remove
        );
        assert_eq!(on_remote_absent(&local(UploadStatus::New, None)), AbsentDecision::Keep);
        assert_eq!(
            on_remote_absent(&local(UploadStatus::Updated, Some("e"))),
            AbsentDecision::Keep
        );
    }

    #[test]
    fn test_may_overwrite() {
        assert!(may_overwrite(None));
        assert!(may_overwrite(Some(&local(UploadStatus::UpToDate, Some("e")))));
        assert!(!may_overwrite(Some(&local(UploadStatus::Updated, Some("e")))));
    }
}
