//! Provisioning error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the provisioning core.
///
/// Codec and identifier failures are raised synchronously and never
/// retried here; retry policy for external interactions lives in the
/// session layer.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Caller handed us input we refuse to derive state from
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A store file exists but cannot be parsed
    #[error("malformed store file {path}: {detail}\n\nThe file was left untouched. If the Steam client wrote it, verify the installation before retrying.")]
    Format { path: PathBuf, detail: String },

    /// An expected file, record, or runtime is absent
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Filesystem access failed
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external command could not be spawned or returned nonzero
    #[error("external process failed: {command}: {detail}")]
    ExternalProcess { command: String, detail: String },

    /// A bounded wait elapsed without the expected condition
    #[error("timed out after {waited_secs}s waiting for {operation}")]
    Timeout { operation: String, waited_secs: u64 },

    /// The compatibility prefix never materialized within its budget
    #[error("prefix at {prefix} did not initialize within {waited_secs}s\n\nThe placeholder shortcut was left in place so the session can be resumed or cleaned up explicitly.")]
    PrefixTimeout { prefix: PathBuf, waited_secs: u64 },

    /// A registry write failed or was not observed on read-back
    #[error("registry operation failed: {detail}")]
    RegistryOperation { detail: String },
}

impl ProvisionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ProvisionError::NotFound { what: what.into() }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
