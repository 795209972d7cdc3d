//! Error taxonomy for reconciliation runs.
//!
//! `RemoteError` is what remote collaborators raise; it only distinguishes
//! retryable failures from final ones. `SyncError` is what the library
//! surfaces to callers once retries are exhausted or a local step fails.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure raised by a remote catalog call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network failure, timeout or a transient 5xx.
    #[error("transient failure: {0}")]
    Transient(String),
    /// HTTP 429. The service may say how long to wait.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::RateLimited { .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Retries exhausted. Callers downgrade this to a run-level warning.
    #[error("remote service unavailable after {attempts} attempt(s): {message}")]
    TransientRemote { attempts: u32, message: String },

    /// Auth/permission/not-found. Aborts the run.
    #[error("remote service refused the request: {0}")]
    FatalRemote(String),

    /// One unreadable file. The file is excluded, the scan continues.
    #[error("failed to read {}: {message}", path.display())]
    LocalRead { path: PathBuf, message: String },

    /// Unreadable or invalid snapshot. Always treated as a cache miss.
    #[error("session cache {} is unusable: {message}", path.display())]
    CacheCorrupt { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn from_remote(err: RemoteError, attempts: u32) -> Self {
        if err.is_transient() {
            SyncError::TransientRemote {
                attempts,
                message: err.to_string(),
            }
        } else {
            SyncError::FatalRemote(err.to_string())
        }
    }

    /// Errors that must stop the run before any further side effects.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::FatalRemote(_) | SyncError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Transient("timeout".into()).is_transient());
        assert!(RemoteError::RateLimited { retry_after: None }.is_transient());
        assert!(!RemoteError::Unauthorized("token expired".into()).is_transient());
        assert!(!RemoteError::NotFound("playlist".into()).is_transient());
    }

    #[test]
    fn test_from_remote_keeps_attempt_count() {
        let err = SyncError::from_remote(RemoteError::Transient("reset".into()), 3);
        assert!(matches!(err, SyncError::TransientRemote { attempts: 3, .. }));
        assert!(!err.is_fatal());

        let err = SyncError::from_remote(RemoteError::Unauthorized("scope".into()), 1);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("scope"));
    }
}
