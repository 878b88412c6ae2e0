use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("JGI_TOKEN is not set; export a portal session token before running")]
    MissingToken,

    #[error("portal rejected the auth token (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("query failed with status {status}: {message}")]
    Query { status: u16, message: String },

    #[error("portal request failed: {0}")]
    TransientNetwork(String),

    #[error("download truncated: expected {expected} bytes, wrote {written}")]
    Integrity { expected: u64, written: u64 },

    #[error("restore did not complete within {0} seconds")]
    RestoreTimeout(u64),

    #[error("restore failed: {0}")]
    RestoreFailed(String),

    #[error("failed to unpack archive {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("invalid query label: {0}")]
    InvalidLabel(String),

    #[error("failed to read query CSV at {path}: {message}")]
    QueryFile { path: PathBuf, message: String },

    #[error("query CSV contains no valid rows (expected: label,search_url)")]
    EmptyQueryFile,

    #[error("failed to write manifest: {0}")]
    Manifest(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::MissingToken
                | FetchError::Auth { .. }
                | FetchError::InvalidGlob(_)
                | FetchError::InvalidLabel(_)
                | FetchError::QueryFile { .. }
                | FetchError::EmptyQueryFile
                | FetchError::Manifest(_)
        )
    }
}
