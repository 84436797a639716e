//! Error types shared by snaplog crates.

use thiserror::Error;

/// Error type carried across the source, sender and collaborator traits.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Retry limit of {limit} attempts exceeded: {message}")]
    RetryLimitExceeded { limit: u32, message: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker for shard {shard} failed: {message}")]
    Worker { shard: String, message: String },
}

impl Error {
    /// Build a backend error from anything displayable.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    /// Whether retrying the failed operation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Io(_))
    }
}

/// Result type alias for snaplog operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_limit_displays_configured_limit() {
        let error = Error::RetryLimitExceeded {
            limit: 3,
            message: "2 entries still failing".to_string(),
        };
        assert!(error.to_string().contains("3 attempts"));
        assert!(error.to_string().contains("2 entries still failing"));
    }

    #[test]
    fn worker_error_names_shard() {
        let error = Error::Worker {
            shard: "shard-0001".to_string(),
            message: "boom".to_string(),
        };
        assert!(error.to_string().contains("shard-0001"));
    }

    #[test]
    fn backend_and_io_errors_are_transient() {
        assert!(Error::backend("throttled").is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        assert!(Error::from(io).is_transient());
        assert!(!Error::Config("bad".to_string()).is_transient());
    }

    #[test]
    fn codec_error_converts_from_serde_json() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let error: Error = err.into();
        assert!(matches!(error, Error::Codec(_)));
    }
}
