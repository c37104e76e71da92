//! The page arena: allocation, lookup, latching and retirement of pages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::api::{PageId, PageStoreError, PageStoreResult, INVALID_PAGE_ID};
use crate::latch::{PageReadGuard, PageWriteGuard};

/// A single page: a latched payload plus the metadata readers use to validate
/// it without holding the latch.
#[derive(Debug)]
pub struct Page<T> {
    page_id: PageId,
    pub(crate) latch: Arc<RwLock<T>>,
    version: AtomicU64,
    retired: AtomicBool,
}

impl<T> Page<T> {
    fn new(page_id: PageId, payload: T) -> Self {
        Self {
            page_id,
            latch: Arc::new(RwLock::new(payload)),
            version: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Returns the ID of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the structural version of this page.
    ///
    /// The version only changes while the page's write latch is held, so a
    /// value read without the latch is a stamp to be checked later.
    pub fn structural_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Returns true once the page has been retired by a merge or collapse.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mark_retired(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

/// Arena of latched pages addressed by logical IDs.
///
/// Page IDs come from a monotonic counter and are never handed out twice, so
/// an identifier held by a cursor can never alias a newer page.
#[derive(Debug)]
pub struct PageStore<T> {
    page_table: RwLock<HashMap<PageId, Arc<Page<T>>>>,
    next_page_id: AtomicUsize,
    capacity: Option<usize>,
}

impl<T> Default for PageStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PageStore<T> {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self {
            page_table: RwLock::new(HashMap::new()),
            next_page_id: AtomicUsize::new(INVALID_PAGE_ID + 1),
            capacity: None,
        }
    }

    /// Creates a store that refuses to hold more than `capacity` live pages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Returns the live page limit, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Returns the number of live (allocated and not retired) pages.
    pub fn live_pages(&self) -> usize {
        self.page_table.read().len()
    }

    /// Allocates a new page holding `payload`.
    pub fn allocate(&self, payload: T) -> PageStoreResult<PageId> {
        let mut ids = self.allocate_many(vec![payload])?;
        ids.pop().ok_or(PageStoreError::NoFreePages {
            capacity: self.capacity().unwrap_or_default(),
        })
    }

    /// Allocates one page per payload, all or nothing.
    pub fn allocate_many(&self, payloads: Vec<T>) -> PageStoreResult<Vec<PageId>> {
        let mut page_table = self.page_table.write();
        if let Some(capacity) = self.capacity {
            if page_table.len() + payloads.len() > capacity {
                return Err(PageStoreError::NoFreePages { capacity });
            }
        }

        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let page_id = self.next_page_id.fetch_add(1, Ordering::Relaxed);
            page_table.insert(page_id, Arc::new(Page::new(page_id, payload)));
            ids.push(page_id);
        }
        trace!(?ids, "allocated pages");
        Ok(ids)
    }

    /// Looks up a live page without latching it.
    pub fn fetch(&self, page_id: PageId) -> Option<Arc<Page<T>>> {
        self.page_table.read().get(&page_id).cloned()
    }

    fn page(&self, page_id: PageId) -> PageStoreResult<Arc<Page<T>>> {
        self.fetch(page_id).ok_or(PageStoreError::PageNotFound(page_id))
    }

    /// Acquires the page's shared latch, blocking until it is available.
    ///
    /// The page may have been retired while this call waited; callers that
    /// reached the ID without holding a latch on a referencing page must
    /// check [`PageReadGuard::is_retired`].
    pub fn read(&self, page_id: PageId) -> PageStoreResult<PageReadGuard<T>> {
        Ok(PageReadGuard::new(self.page(page_id)?))
    }

    /// Acquires the page's exclusive latch, blocking until it is available.
    pub fn write(&self, page_id: PageId) -> PageStoreResult<PageWriteGuard<T>> {
        Ok(PageWriteGuard::new(self.page(page_id)?))
    }

    /// Attempts to acquire the page's exclusive latch without blocking.
    pub fn try_write(&self, page_id: PageId) -> PageStoreResult<Option<PageWriteGuard<T>>> {
        Ok(PageWriteGuard::try_new(self.page(page_id)?))
    }

    /// Retires a page: marks it dead, bumps its version and drops it from the
    /// page table. Threads still waiting on its latch observe the retired flag.
    pub fn retire(&self, mut guard: PageWriteGuard<T>) {
        let page_id = guard.page_id();
        guard.bump_version();
        guard.page().mark_retired();
        self.page_table.write().remove(&page_id);
        trace!(page_id, "retired page");
    }
}
