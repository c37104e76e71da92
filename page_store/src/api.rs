//! Defines the common API shared by the page store and its clients.

use thiserror::Error;

/// A unique identifier for a page in the store.
pub type PageId = usize;

/// A constant to represent an invalid page ID. The allocator never hands it out.
pub const INVALID_PAGE_ID: PageId = 0;

/// Result type for page store operations.
pub type PageStoreResult<T> = Result<T, PageStoreError>;

/// Errors returned by the page store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageStoreError {
    /// Returned when the store is bounded and no more pages can be allocated.
    #[error("no free pages: store is limited to {capacity} live pages")]
    NoFreePages {
        /// The configured live page limit.
        capacity: usize,
    },

    /// The page is not resident, either never allocated or already retired.
    #[error("page {0} not found")]
    PageNotFound(PageId),
}
