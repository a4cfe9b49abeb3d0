//! Upload status transitions.
//!
//! Pure rules, no I/O: the download, upload and local-change paths ask
//! these functions what to do and apply the answer to the cache.

use dav_common::{Error, Result, SessionUploadStatus, UploadStatus};

/// Effect of a local delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDelete {
    /// Drop the object from the cache now, no network call needed.
    Purge,
    /// Keep a tombstone with this status until the push succeeds.
    Mark(UploadStatus),
    /// Already pending deletion.
    Unchanged,
}

/// Network call a dirty object needs on push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    Create,
    Update,
    Delete,
    RemoveAccess,
    /// Purge locally without contacting the remote.
    Purge,
    /// Nothing to push.
    Skip,
}

/// Classified server answer to a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    NotFound,
    Conflict,
    /// Transport or any other non-semantic failure.
    Failed,
}

impl PushOutcome {
    /// Classify the result of a gateway call.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Accepted,
            Err(Error::NotFound(_)) => Self::NotFound,
            Err(Error::Conflict(_)) => Self::Conflict,
            Err(_) => Self::Failed,
        }
    }
}

/// What to do with a pushed object given the server's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTransition {
    /// Adopt the returned etag and mark up to date.
    MarkUpToDate,
    /// Drop the object from the cache.
    Purge,
    /// Re-fetch the remote copy and overwrite the local one.
    AdoptRemote,
    /// Leave the object as is; retried on the next push.
    Unchanged,
}

/// Status of a freshly created local object.
pub fn on_local_create() -> UploadStatus {
    UploadStatus::New
}

/// Status after a local mutation.
///
/// # Errors
/// - `InvalidInput` for objects that are pending deletion
pub fn on_local_update(status: UploadStatus) -> Result<UploadStatus> {
    match status {
        UploadStatus::UpToDate => Ok(UploadStatus::Updated),
        UploadStatus::New | UploadStatus::Updated => Ok(status),
        UploadStatus::Deleted | UploadStatus::Removed | UploadStatus::NoRowsDeleted => Err(
            Error::InvalidInput(format!("Cannot modify a table object that is {}", status)),
        ),
    }
}

/// Effect of a local delete.
///
/// Owners destroy the object remotely, non-owners only revoke their grant.
pub fn on_local_delete(status: UploadStatus, belongs_to_user: bool) -> LocalDelete {
    match status {
        UploadStatus::New | UploadStatus::NoRowsDeleted => LocalDelete::Purge,
        UploadStatus::UpToDate | UploadStatus::Updated => {
            if belongs_to_user {
                LocalDelete::Mark(UploadStatus::Deleted)
            } else {
                LocalDelete::Mark(UploadStatus::Removed)
            }
        }
        UploadStatus::Deleted | UploadStatus::Removed => LocalDelete::Unchanged,
    }
}

/// Network call needed to push an object.
pub fn push_action(status: UploadStatus) -> PushAction {
    match status {
        UploadStatus::New => PushAction::Create,
        UploadStatus::Updated => PushAction::Update,
        UploadStatus::Deleted => PushAction::Delete,
        UploadStatus::Removed => PushAction::RemoveAccess,
        UploadStatus::NoRowsDeleted => PushAction::Purge,
        UploadStatus::UpToDate => PushAction::Skip,
    }
}

/// Transition after the server answered a push.
pub fn after_push(status: UploadStatus, outcome: PushOutcome) -> PushTransition {
    use PushOutcome::*;

    match (status, outcome) {
        (UploadStatus::New | UploadStatus::Updated, Accepted) => PushTransition::MarkUpToDate,
        (UploadStatus::New, Conflict) => PushTransition::AdoptRemote,
        (UploadStatus::Updated, NotFound) => PushTransition::Purge,
        (UploadStatus::Deleted | UploadStatus::Removed, Accepted | NotFound) => {
            PushTransition::Purge
        }
        (UploadStatus::NoRowsDeleted, _) => PushTransition::Purge,
        _ => PushTransition::Unchanged,
    }
}

/// Session status after a local logout.
pub fn on_logout(_status: SessionUploadStatus) -> SessionUploadStatus {
    SessionUploadStatus::Deleted
}

/// Whether the session record can be dropped after pushing its deletion.
pub fn session_push_done(outcome: PushOutcome) -> bool {
    matches!(outcome, PushOutcome::Accepted | PushOutcome::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_update() {
        assert_eq!(on_local_update(UploadStatus::UpToDate).unwrap(), UploadStatus::Updated);
        assert_eq!(on_local_update(UploadStatus::New).unwrap(), UploadStatus::New);
        assert_eq!(on_local_update(UploadStatus::Updated).unwrap(), UploadStatus::Updated);
        assert!(on_local_update(UploadStatus::Deleted).is_err());
        assert!(on_local_update(UploadStatus::Removed).is_err());
    }

    #[test]
    fn test_local_delete() {
        assert_eq!(on_local_delete(UploadStatus::New, true), LocalDelete::Purge);
        assert_eq!(
            on_local_delete(UploadStatus::UpToDate, true),
            LocalDelete::Mark(UploadStatus::Deleted)
        );
        assert_eq!(
            on_local_delete(UploadStatus::UpToDate, false),
            LocalDelete::Mark(UploadStatus::Removed)
        );
        assert_eq!(
            on_local_delete(UploadStatus::Updated, false),
            LocalDelete::Mark(UploadStatus::Removed)
        );
        assert_eq!(on_local_delete(UploadStatus::Deleted, true), LocalDelete::Unchanged);
    }

    #[test]
    fn test_push_transitions() {
        use PushOutcome::*;

        assert_eq!(after_push(UploadStatus::New, Accepted), PushTransition::MarkUpToDate);
        assert_eq!(after_push(UploadStatus::New, Conflict), PushTransition::AdoptRemote);
        assert_eq!(after_push(UploadStatus::New, Failed), PushTransition::Unchanged);
        assert_eq!(after_push(UploadStatus::Updated, NotFound), PushTransition::Purge);
        assert_eq!(after_push(UploadStatus::Updated, Failed), PushTransition::Unchanged);
        assert_eq!(after_push(UploadStatus::Deleted, Accepted), PushTransition::Purge);
        assert_eq!(after_push(UploadStatus::Removed, NotFound), PushTransition::Purge);
        assert_eq!(after_push(UploadStatus::Deleted, Failed), PushTransition::Unchanged);
        assert_eq!(after_push(UploadStatus::NoRowsDeleted, Failed), PushTransition::Purge);
    }

    #[test]
    fn test_outcome_classification() {
        let ok: Result<()> = Ok(());
        let missing: Result<()> = Err(Error::NotFound("x".to_string()));
        let taken: Result<()> = Err(Error::Conflict("x".to_string()));
        let offline: Result<()> = Err(Error::Network("x".to_string()));

        assert_eq!(PushOutcome::of(&ok), PushOutcome::Accepted);
        assert_eq!(PushOutcome::of(&missing), PushOutcome::NotFound);
        assert_eq!(PushOutcome::of(&taken), PushOutcome::Conflict);
        assert_eq!(PushOutcome::of(&offline), PushOutcome::Failed);
    }

    #[test]
    fn test_session_push() {
        assert_eq!(on_logout(SessionUploadStatus::UpToDate), SessionUploadStatus::Deleted);
        assert!(session_push_done(PushOutcome::Accepted));
        assert!(session_push_done(PushOutcome::NotFound));
        assert!(!session_push_done(PushOutcome::Failed));
    }
}
