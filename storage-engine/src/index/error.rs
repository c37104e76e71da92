//! Error types for the B+ tree index.

use page_store::{PageId, PageStoreError};
use thiserror::Error;
use tracing::warn;

/// Result type for index operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Error type a fallible sweep predicate may return.
pub type PredicateError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in index operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A structural invariant was found broken. Never repaired silently.
    #[error("structural invariant violated at page {page_id}: {reason}")]
    StructuralInvariantViolation {
        /// The page where the violation was detected.
        page_id: PageId,
        /// Description of the violation.
        reason: String,
    },

    /// The sweep predicate failed. Removals committed before the failure stay
    /// committed.
    #[error("sweep predicate failed after key {last_key:?}: {source}")]
    PredicateFailure {
        /// Debug rendering of the last key the sweep processed, if any.
        last_key: Option<String>,
        /// The predicate's error.
        #[source]
        source: PredicateError,
    },

    /// A split could not obtain the pages it needed. The tree is unchanged.
    #[error("page allocation failed: {0}")]
    AllocationFailure(#[source] PageStoreError),

    /// The cursor already reported a failure and cannot be advanced.
    #[error("sweep cursor is in a failed state")]
    CursorFailed,

    /// The tree configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TreeError {
    pub(crate) fn invariant(page_id: PageId, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(page_id, %reason, "structural invariant violation");
        TreeError::StructuralInvariantViolation { page_id, reason }
    }
}

impl From<PageStoreError> for TreeError {
    fn from(err: PageStoreError) -> Self {
        match err {
            PageStoreError::NoFreePages { .. } => TreeError::AllocationFailure(err),
            // Pages are only looked up through a latched reference, so a
            // missing page means a link points at nothing.
            PageStoreError::PageNotFound(page_id) => {
                TreeError::invariant(page_id, "referenced page is not resident")
            }
        }
    }
}
