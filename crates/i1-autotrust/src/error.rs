//! Error types for trust anchor maintenance.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in autotrust operations.
///
/// None of these is fatal: a trust point whose file cannot be parsed is
/// skipped, and one whose file cannot be written keeps its in-memory state
/// until the next probe retries the write.
#[derive(Error, Debug)]
pub enum AutotrustError {
    /// Trust anchor file is malformed.
    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        /// File being read
        path: PathBuf,
        /// 1-based line number where the logical line ended
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// File holds keys for more than one zone/class.
    #[error("{}: keys for more than one trust point in a single file", path.display())]
    MixedIdentity {
        /// File being read
        path: PathBuf,
    },

    /// Trust anchor file could not be read or written.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A record inside a trust anchor is invalid.
    #[error("record error: {0}")]
    Record(#[from] i1_anchor::AnchorError),

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A trust point with the same zone/class is already loaded.
    #[error("duplicate trust anchor: {0}")]
    DuplicateAnchor(String),

    /// Key set fetch failed.
    #[error("key set fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

impl AutotrustError {
    /// Build an [`AutotrustError::Io`] for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why the resolution layer could not deliver a usable key set.
///
/// Every variant is handled the same way: the probe counts as failed and
/// the trust point is retried after its retry time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No answer within the resolver's own timeout and retries.
    #[error("timed out")]
    Timeout,

    /// Resolution failed (SERVFAIL, NXDOMAIN, network error).
    #[error("resolution failed: {0}")]
    Failed(String),

    /// The answer could not be used as a DNSKEY set.
    #[error("malformed response: {0}")]
    Malformed(String),
}
