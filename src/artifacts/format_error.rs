//! Error kinds surfaced by the binary index files
//!
//! Loading and building code mostly works in `anyhow`, but callers need to tell a
//! damaged file from a repository that simply cannot use the optimization, so those
//! cases travel as a `FormatError` inside the `anyhow::Error` and can be recovered
//! with `downcast_ref`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Bad signature/version, chunk offsets out of range, missing or duplicate chunks
    #[error("corrupt file: {0}")]
    Corrupt(String),

    /// The file parses but its trailing hash does not match its content
    #[error("checksum mismatch in {}", path.display())]
    ChecksumMismatch { path: PathBuf },

    /// Legitimate repository state that rules the file out (hash algorithm, grafts, ...)
    #[error("incompatible: {0}")]
    Incompatible(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another build holds the lock
    #[error("unable to create '{}': another process holds the lock", path.display())]
    LockHeld { path: PathBuf },
}

impl FormatError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        FormatError::Corrupt(reason.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FormatError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means "skip the optimization" rather than "the file is bad"
    pub fn is_incompatible(&self) -> bool {
        matches!(self, FormatError::Incompatible(_))
    }
}
