use crate::store::{FetchKind, StoreError};

#[derive(Debug)]
pub enum ReconcileError {
    /// Too many collaborating stores failed in one pass to present a
    /// trustworthy view. `failed` lists every fetch that degraded.
    Unavailable { failed: Vec<FetchKind>, entities: usize },
    /// One of the primary reservation reads failed.
    SourceFailed { kind: FetchKind, error: StoreError },
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Unavailable { failed, entities } => {
                let kinds: Vec<&str> = failed.iter().map(FetchKind::as_str).collect();
                write!(
                    f,
                    "reconciliation unavailable: {entities} stores failed ({})",
                    kinds.join(", ")
                )
            }
            ReconcileError::SourceFailed { kind, error } => {
                write!(f, "reconciliation unavailable: {kind} read failed: {error}")
            }
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::SourceFailed { error, .. } => Some(error),
            ReconcileError::Unavailable { .. } => None,
        }
    }
}
