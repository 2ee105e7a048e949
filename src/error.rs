//! Typed error taxonomy for the archive engine.
//!
//! The CLI binary deals in `anyhow::Error` the way `fsfill`'s `main` does;
//! the library surface needs named kinds so a driver can tell a declined
//! prompt from a corrupted slice. The seven kinds mirror spec.md's error
//! policy table.

use thiserror::Error;

/// One of the seven error kinds the archive engine can raise.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An input is out of range or malformed, but nothing is unrecoverable.
    #[error("range: {0}")]
    Range(String),

    /// Allocation failed.
    #[error("memory: {0}")]
    Memory(String),

    /// The operation needs a build-time feature that is absent.
    #[error("feature not available: {0}")]
    Feature(String),

    /// On-disk data is corrupted: bad magic, bad CRC, bad tag.
    #[error("corrupted data: {0}")]
    Data(String),

    /// An implementation integer limit was hit.
    #[error("limit exceeded: {0}")]
    Limit(String),

    /// The operator declined at a prompt.
    #[error("aborted by operator: {0}")]
    UserAbort(String),

    /// An internal invariant was violated.
    #[error("bug: invariant {invariant} violated: {detail}")]
    Bug {
        invariant: &'static str,
        detail: String,
    },

    /// Propagated I/O failure from an underlying byte-stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn bug(invariant: &'static str, detail: impl Into<String>) -> Self
    {
        CoreError::Bug {
            invariant,
            detail: detail.into(),
        }
    }

    pub fn data(detail: impl Into<String>) -> Self
    {
        CoreError::Data(detail.into())
    }

    pub fn range(detail: impl Into<String>) -> Self
    {
        CoreError::Range(detail.into())
    }

    /// True for kinds spec.md §7 says are recoverable at the operation
    /// boundary (the partially-written archive is left intact).
    pub fn is_recoverable(&self) -> bool
    {
        matches!(self, CoreError::Range(_) | CoreError::UserAbort(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
