use ulid::Ulid;

use crate::model::RecordKind;
use crate::store::StoreError;

#[derive(Debug)]
pub enum SyncError {
    NotFound(Ulid),
    KindMismatch {
        id: Ulid,
        expected: RecordKind,
        found: RecordKind,
    },
    /// Another mutation on the same record is still running.
    Busy(Ulid),
    /// A collaborator refused a write. The cache was restored.
    Rejected {
        id: Ulid,
        error: StoreError,
    },
    /// A cascade could not complete. The cache was restored and a refetch started.
    InvariantViolation(String),
    NotLinked {
        room_id: Ulid,
        event_id: Ulid,
    },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotFound(id) => write!(f, "not in cache: {id}"),
            SyncError::KindMismatch { id, expected, found } => {
                write!(f, "{id} is a {found} reservation, not a {expected} reservation")
            }
            SyncError::Busy(id) => write!(f, "another change to {id} is in progress"),
            SyncError::Rejected { id, error } => write!(f, "write to {id} rejected: {error}"),
            SyncError::InvariantViolation(msg) => write!(f, "invariant violated: {msg}"),
            SyncError::NotLinked { room_id, event_id } => {
                write!(f, "room reservation {room_id} is not linked to event {event_id}")
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }
}
