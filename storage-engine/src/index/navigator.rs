//! Root-to-leaf descent.
//!
//! Inner pages are read-latched hand over hand: the child latch is acquired
//! before the parent latch is released, so at most two inner latches are held
//! at a time. The leaf is latched in whatever mode the caller asks for.

use std::fmt::Debug;
use std::ops::Deref;

use page_store::{PageId, PageStore, PageStoreResult};
use tracing::trace;

use super::bptree::{BPlusTree, ReadGuard, WriteGuard};
use super::error::{TreeError, TreeResult};
use super::node::Node;

/// Where a descent ends up.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'k, K> {
    /// The leaf whose key range covers the key.
    Key(&'k K),
    Leftmost,
    Rightmost,
}

/// Where a cursor resumes on its next call. Never holds a latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    /// Nothing visited yet.
    Start,
    /// Resume on this leaf if it is live and unchanged.
    Page { page_id: PageId, version: u64 },
    /// Re-navigate from the root using the cursor's key bound.
    Seek,
    Exhausted,
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Returns the ID of the leaf whose range covers `key`.
    pub fn locate_leaf(&self, key: &K) -> TreeResult<PageId> {
        Ok(self.locate_leaf_read(Target::Key(key))?.page_id())
    }

    /// Returns the ID of the first leaf in key order.
    pub fn leftmost_leaf(&self) -> TreeResult<PageId> {
        Ok(self.locate_leaf_read(Target::Leftmost)?.page_id())
    }

    /// Returns the ID of the last leaf in key order.
    pub fn rightmost_leaf(&self) -> TreeResult<PageId> {
        Ok(self.locate_leaf_read(Target::Rightmost)?.page_id())
    }

    pub(crate) fn locate_leaf_read(&self, target: Target<'_, K>) -> TreeResult<ReadGuard<K, V>> {
        self.descend(target, |store, page_id| store.read(page_id))
    }

    pub(crate) fn locate_leaf_write(&self, target: Target<'_, K>) -> TreeResult<WriteGuard<K, V>> {
        self.descend(target, |store, page_id| store.write(page_id))
    }

    fn descend<G, F>(&self, target: Target<'_, K>, latch_leaf: F) -> TreeResult<G>
    where
        G: Deref<Target = Node<K, V>>,
        F: Fn(&PageStore<Node<K, V>>, PageId) -> PageStoreResult<G>,
    {
        loop {
            let root = self.store.read(self.root_page_id)?;
            if root.is_leaf() {
                drop(root);
                let leaf = latch_leaf(&self.store, self.root_page_id)?;
                if leaf.is_leaf() {
                    return Ok(leaf);
                }
                // Root split between the two latches
                trace!(root_page_id = self.root_page_id, "root changed during descent, restarting");
                continue;
            }

            let mut parent = root;
            loop {
                let parent_id = parent.page_id();
                let inner = parent
                    .as_internal()
                    .ok_or_else(|| TreeError::invariant(parent_id, "leaf above level 0"))?;
                let child_id = match target {
                    Target::Key(key) => inner.child_for(key),
                    Target::Leftmost => inner.first_child(),
                    Target::Rightmost => inner.last_child(),
                };

                if inner.level() == 1 {
                    let leaf = latch_leaf(&self.store, child_id)?;
                    drop(parent);
                    if !leaf.is_leaf() {
                        return Err(TreeError::invariant(child_id, "expected a leaf below level 1"));
                    }
                    return Ok(leaf);
                }

                // Acquire child before releasing parent
                let child = self.store.read(child_id)?;
                parent = child;
            }
        }
    }
}
