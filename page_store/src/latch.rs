//! Page latches (read/write guards) for safe concurrent access.
//!
//! Guards own a reference to their page, so a traversal can hold a guard on
//! one page while acquiring the next without borrowing from the store. The
//! latch is released when the guard is dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::api::PageId;
use crate::store::Page;

/// Shared latch on a page.
pub struct PageReadGuard<T> {
    page: Arc<Page<T>>,
    guard: ArcRwLockReadGuard<RawRwLock, T>,
}

impl<T> PageReadGuard<T> {
    pub(crate) fn new(page: Arc<Page<T>>) -> Self {
        let guard = page.latch.read_arc();
        Self { page, guard }
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the structural version observed under the latch.
    #[inline]
    pub fn structural_version(&self) -> u64 {
        self.page.structural_version()
    }

    /// Returns true if the page was retired before the latch was granted.
    #[inline]
    pub fn is_retired(&self) -> bool {
        self.page.is_retired()
    }
}

impl<T> Deref for PageReadGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> fmt::Debug for PageReadGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("page_id", &self.page_id())
            .field("version", &self.structural_version())
            .finish()
    }
}

/// Exclusive latch on a page.
pub struct PageWriteGuard<T> {
    page: Arc<Page<T>>,
    guard: ArcRwLockWriteGuard<RawRwLock, T>,
}

impl<T> PageWriteGuard<T> {
    pub(crate) fn new(page: Arc<Page<T>>) -> Self {
        let guard = page.latch.write_arc();
        Self { page, guard }
    }

    pub(crate) fn try_new(page: Arc<Page<T>>) -> Option<Self> {
        let guard = page.latch.try_write_arc()?;
        Some(Self { page, guard })
    }

    pub(crate) fn page(&self) -> &Page<T> {
        &self.page
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the structural version.
    #[inline]
    pub fn structural_version(&self) -> u64 {
        self.page.structural_version()
    }

    /// Returns true if the page was retired before the latch was granted.
    #[inline]
    pub fn is_retired(&self) -> bool {
        self.page.is_retired()
    }

    /// Records a structural change (split, merge, rotation) to this page and
    /// returns the new version.
    #[inline]
    pub fn bump_version(&mut self) -> u64 {
        self.page.bump_version()
    }
}

impl<T> Deref for PageWriteGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for PageWriteGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> fmt::Debug for PageWriteGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.page_id())
            .field("version", &self.structural_version())
            .finish()
    }
}
