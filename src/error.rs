// src/error.rs

//! Error types for cabstack
//!
//! Every surfaced failure carries a stable error code alongside the
//! human-readable description, so callers can report exactly what failed
//! without string-matching messages.

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("missing dependencies: {0}")]
    DependencyMissing(String),

    #[error("package not applicable: {0}")]
    NotApplicable(String),

    #[error("a transaction is already open")]
    TransactionAlreadyOpen,

    #[error("no staged transaction to commit")]
    NoStagedTransaction,

    #[error("transaction error: {0}")]
    TransactionError(String),

    #[error("component store update failed: {0}")]
    StoreUpdateFailed(String),

    #[error("transaction commit failed: {0}")]
    CommitFailed(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code for reporting
    pub fn code(&self) -> &'static str {
        match self {
            Self::PackageNotFound(_) => "E_PACKAGE_NOT_FOUND",
            Self::ExtractionFailed(_) => "E_EXTRACTION_FAILED",
            Self::ManifestInvalid(_) => "E_MANIFEST_INVALID",
            Self::DependencyMissing(_) => "E_DEPENDENCY_MISSING",
            Self::NotApplicable(_) => "E_NOT_APPLICABLE",
            Self::TransactionAlreadyOpen => "E_TRANSACTION_ALREADY_OPEN",
            Self::NoStagedTransaction => "E_NO_STAGED_TRANSACTION",
            Self::TransactionError(_) => "E_TRANSACTION",
            Self::StoreUpdateFailed(_) => "E_STORE_UPDATE_FAILED",
            Self::CommitFailed(_) => "E_COMMIT_FAILED",
            Self::IoError(_) | Self::Io(_) => "E_IO",
        }
    }
}
