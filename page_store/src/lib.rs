//! In-memory page arena used by the index engine.
//!
//! Pages are addressed by logical [`PageId`]s rather than memory addresses so
//! that a reader holding a stale identifier can detect that the page has been
//! retired instead of following a dangling pointer.

pub mod api;
pub mod latch;
pub mod store;

pub use api::{PageId, PageStoreError, PageStoreResult, INVALID_PAGE_ID};
pub use latch::{PageReadGuard, PageWriteGuard};
pub use store::{Page, PageStore};
