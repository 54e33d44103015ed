//! Error taxonomy for the local trust boundary.
//!
//! Every variant is a recoverable denial. Nothing in the security core
//! panics or falls back to an unguarded filesystem call.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecurityError {
    /// Malformed PIN, path, argument or config input.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Wrong PIN. Counted by the lockout tracker.
    #[error("Authentication failed ({remaining_attempts} attempt(s) remaining)")]
    Authentication { remaining_attempts: u32 },

    /// No PIN was supplied when one was required.
    #[error("Authentication required but no PIN was provided")]
    AuthenticationCancelled,

    /// The security context was torn down and refuses further use.
    #[error("Security context is closed")]
    ContextClosed,

    #[error("Too many failed attempts. Retry after {retry_after_secs}s")]
    Lockout { retry_after_secs: u64 },

    /// Credential file exists but cannot be read or parsed.
    #[error("Credential storage corrupted: {0}")]
    StorageCorruption(String),

    #[error("Path rejected: {path}: {reason}")]
    SandboxViolation { path: String, reason: String },

    #[error("File too large: {path} ({size} bytes, limit {limit})")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PIN hashing failed: {0}")]
    Hashing(String),
}

impl SecurityError {
    pub(crate) fn violation(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        SecurityError::SandboxViolation {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SecurityError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// True for errors that represent a path escape attempt.
    pub fn is_violation(&self) -> bool {
        matches!(self, SecurityError::SandboxViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, SecurityError>;
