//! Error types for snapshot operations.

use thiserror::Error;

/// Errors raised while writing, storing or reading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Malformed snapshot: {0}")]
    Malformed(String),

    #[error("Snapshot task failed: {0}")]
    Task(String),
}

impl SnapshotError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

impl From<SnapshotError> for snaplog_core::Error {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(e) => Self::Io(e),
            SnapshotError::ObjectStore(e) => Self::Backend(e.to_string()),
            other => Self::Snapshot(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for SnapshotError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_converts_to_core_snapshot_error() {
        let core: snaplog_core::Error = SnapshotError::malformed("no data section").into();
        assert!(matches!(core, snaplog_core::Error::Snapshot(ref m) if m.contains("no data section")));
        assert!(!core.is_transient());
    }

    #[test]
    fn io_stays_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let core: snaplog_core::Error = SnapshotError::from(io).into();
        assert!(matches!(core, snaplog_core::Error::Io(_)));
    }
}
