//! Recovery error types

use thiserror::Error;

/// Errors surfaced by recovery operations.
///
/// Recovery is deliberately forgiving: snapshot and export failures degrade
/// the run instead of failing it. The variants here are the genuinely
/// terminal outcomes.
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// The destructive reset itself failed; the store is unusable.
    #[error("Database reset failed: {0}")]
    ResetFailed(core_store::StoreError),

    /// Re-hydration source could not be reached after a reset.
    #[error("Refetch failed: {0}")]
    RefetchFailed(#[from] bridge_traits::BridgeError),

    /// Fetched content could not be written back.
    #[error("Persist failed: {0}")]
    PersistFailed(#[from] core_store::StoreError),
}

/// Result alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;
