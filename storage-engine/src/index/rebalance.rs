//! Underflow repair: rotations, merges and root collapse.
//!
//! Repairs run on a path of write-latched pages produced by a pessimistic
//! descent. Pages are processed bottom-up. An underflowed page borrows from a
//! sibling that is above the minimum fill, or merges with it otherwise; a
//! merge removes a separator from the parent, which may then underflow in
//! turn. The left page of a merged pair always survives.
//!
//! Sibling leaves are latched left to right. To reach a left sibling the
//! child latch is dropped first and re-acquired after the sibling, with the
//! parent latch held throughout.

use std::fmt::Debug;
use std::sync::atomic::Ordering;

use page_store::{PageId, INVALID_PAGE_ID};
use tracing::{debug, trace};

use super::bptree::{internal_mut, leaf_mut, BPlusTree, Counters, WriteGuard};
use super::error::{TreeError, TreeResult};
use super::node::Node;

/// The page a repair ended on.
struct Repaired {
    page_id: PageId,
    version: u64,
    is_leaf: bool,
}

impl Repaired {
    fn of<K, V>(guard: &WriteGuard<K, V>) -> Self {
        Self {
            page_id: guard.page_id(),
            version: guard.structural_version(),
            is_leaf: guard.is_leaf(),
        }
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Repairs a possibly underflowed leaf covering `hint` and every
    /// ancestor the repair leaves underflowed.
    ///
    /// Returns the ID and structural version of the leaf holding the
    /// repaired leaf's entries afterwards (the left page after a merge), or
    /// `None` if that leaf was folded into the root.
    pub(crate) fn fix_underflow(&self, hint: &K) -> TreeResult<Option<(PageId, u64)>> {
        let path = self.descend_pessimistic(hint, 0, |node| self.is_remove_safe(node))?;
        self.rebalance(path, hint)
    }

    /// Repairs the latched path bottom-up. The last guard is the lowest page
    /// and every page on the path covers `hint`. Returns the surviving leaf
    /// as [`Self::fix_underflow`] does.
    pub(crate) fn rebalance(
        &self,
        mut path: Vec<WriteGuard<K, V>>,
        hint: &K,
    ) -> TreeResult<Option<(PageId, u64)>> {
        let mut survivor = None;
        while let Some(node) = path.pop() {
            if node.page_id() == self.root_page_id {
                if node.is_leaf() {
                    survivor = Some((node.page_id(), node.structural_version()));
                }
                self.collapse_root(node)?;
                break;
            }
            if !self.is_underflow(&node) {
                if node.is_leaf() {
                    survivor = Some((node.page_id(), node.structural_version()));
                }
                break;
            }
            match path.last_mut() {
                Some(parent) => {
                    let fixed = self.fix_child(parent, node)?;
                    if fixed.is_leaf {
                        survivor = Some((fixed.page_id, fixed.version));
                    }
                }
                None => {
                    // Parent was released as safe, yet lost more than one
                    // child to merges below. Latch down to this level again.
                    let level = node.level();
                    trace!(page_id = node.page_id(), level, "re-descending to repair page");
                    drop(node);
                    path = self.descend_pessimistic(hint, level, |node| self.is_remove_safe(node))?;
                }
            }
        }
        // A leaf pulled into the root no longer exists under its old ID.
        Ok(survivor.filter(|(page_id, _)| self.store.fetch(*page_id).is_some()))
    }

    /// Rotates into or merges `child` until it is no longer underflowed.
    /// Returns the page left holding the child's entries.
    fn fix_child(&self, parent: &mut WriteGuard<K, V>, mut child: WriteGuard<K, V>) -> TreeResult<Repaired> {
        loop {
            if !self.is_underflow(&child) {
                return Ok(Repaired::of(&child));
            }

            let parent_id = parent.page_id();
            let child_id = child.page_id();
            let (index, sibling_id) = {
                let inner = parent
                    .as_internal()
                    .ok_or_else(|| TreeError::invariant(parent_id, "parent is a leaf"))?;
                // A lone child is the root collapse's business.
                if inner.children().len() < 2 {
                    return Ok(Repaired::of(&child));
                }
                let index = inner.child_index(child_id).ok_or_else(|| {
                    TreeError::invariant(parent_id, format!("page {child_id} missing from its parent"))
                })?;
                let sibling_index = if index > 0 { index - 1 } else { 1 };
                (index, inner.child(sibling_index))
            };

            if index > 0 {
                // Leaves are latched left to right: release the child first.
                drop(child);
                let mut left = self.store.write(sibling_id)?;
                child = self.store.write(child_id)?;
                if !self.is_underflow(&child) {
                    return Ok(Repaired::of(&child));
                }
                if self.is_remove_safe(&left) {
                    self.rotate_from_left(parent, index, &mut left, &mut child)?;
                } else {
                    self.merge_siblings(parent, index - 1, &mut left, child)?;
                    child = left;
                }
            } else {
                let mut right = self.store.write(sibling_id)?;
                if self.is_remove_safe(&right) {
                    self.rotate_from_right(parent, index, &mut child, &mut right)?;
                } else {
                    self.merge_siblings(parent, index, &mut child, right)?;
                }
            }
        }
    }

    /// Moves the last entry (or child) of `left` to the front of `child`,
    /// where `child` sits at `index` in the parent.
    fn rotate_from_left(
        &self,
        parent: &mut WriteGuard<K, V>,
        index: usize,
        left: &mut WriteGuard<K, V>,
        child: &mut WriteGuard<K, V>,
    ) -> TreeResult<()> {
        let left_id = left.page_id();
        match (&mut **left, &mut **child) {
            (Node::Leaf(left_leaf), Node::Leaf(child_leaf)) => {
                let entry = left_leaf
                    .pop_back()
                    .ok_or_else(|| TreeError::invariant(left_id, "rotation from an empty leaf"))?;
                let separator = entry.0.clone();
                child_leaf.push_front(entry);
                internal_mut(parent)?.replace_key(index - 1, separator);
            }
            (Node::Internal(left_inner), Node::Internal(child_inner)) => {
                let (key, moved) = left_inner
                    .pop_back()
                    .ok_or_else(|| TreeError::invariant(left_id, "rotation from an empty node"))?;
                let separator = internal_mut(parent)?.replace_key(index - 1, key);
                child_inner.push_front(separator, moved);
            }
            _ => return Err(TreeError::invariant(left_id, "siblings on different levels")),
        }
        self.finish_rotation(parent, left, child);
        Ok(())
    }

    /// Moves the first entry (or child) of `right` to the back of `child`,
    /// where `child` sits at `index` in the parent.
    fn rotate_from_right(
        &self,
        parent: &mut WriteGuard<K, V>,
        index: usize,
        child: &mut WriteGuard<K, V>,
        right: &mut WriteGuard<K, V>,
    ) -> TreeResult<()> {
        let right_id = right.page_id();
        match (&mut **child, &mut **right) {
            (Node::Leaf(child_leaf), Node::Leaf(right_leaf)) => {
                let entry = right_leaf
                    .pop_front()
                    .ok_or_else(|| TreeError::invariant(right_id, "rotation from an empty leaf"))?;
                child_leaf.push_back(entry);
                let separator = right_leaf
                    .first_key()
                    .cloned()
                    .ok_or_else(|| TreeError::invariant(right_id, "rotation emptied the leaf"))?;
                internal_mut(parent)?.replace_key(index, separator);
            }
            (Node::Internal(child_inner), Node::Internal(right_inner)) => {
                let (key, moved) = right_inner
                    .pop_front()
                    .ok_or_else(|| TreeError::invariant(right_id, "rotation from an empty node"))?;
                let separator = internal_mut(parent)?.replace_key(index, key);
                child_inner.push_back(separator, moved);
            }
            _ => return Err(TreeError::invariant(right_id, "siblings on different levels")),
        }
        self.finish_rotation(parent, child, right);
        Ok(())
    }

    fn finish_rotation(
        &self,
        parent: &mut WriteGuard<K, V>,
        left: &mut WriteGuard<K, V>,
        right: &mut WriteGuard<K, V>,
    ) {
        left.bump_version();
        right.bump_version();
        parent.bump_version();
        Counters::bump(&self.counters.rotations);
        trace!(left = left.page_id(), right = right.page_id(), "rotated between siblings");
    }

    /// Merges `right` into `left`, its left neighbour at `left_index` in the
    /// parent, then retires `right`.
    fn merge_siblings(
        &self,
        parent: &mut WriteGuard<K, V>,
        left_index: usize,
        left: &mut WriteGuard<K, V>,
        mut right: WriteGuard<K, V>,
    ) -> TreeResult<()> {
        let left_id = left.page_id();
        let right_id = right.page_id();
        let parent_id = parent.page_id();
        let inner = internal_mut(parent)?;
        if inner.children().get(left_index + 1) != Some(&right_id) {
            return Err(TreeError::invariant(
                parent_id,
                format!("page {right_id} is not child {} of its parent", left_index + 1),
            ));
        }
        let (separator, _) = inner.remove_child(left_index + 1);

        match (&mut **left, &mut *right) {
            (Node::Leaf(left_leaf), Node::Leaf(right_leaf)) => {
                let next = right_leaf.next();
                left_leaf.append(right_leaf);
                left_leaf.set_next(next);
                if next != INVALID_PAGE_ID {
                    // Further right below the parent, so the latch order still holds.
                    let mut next_guard = self.store.write(next)?;
                    leaf_mut(&mut next_guard)?.set_prev(left_id);
                }
            }
            (Node::Internal(left_inner), Node::Internal(right_inner)) => {
                left_inner.merge(separator, right_inner);
            }
            _ => return Err(TreeError::invariant(left_id, "siblings on different levels")),
        }

        left.bump_version();
        parent.bump_version();
        self.store.retire(right);
        Counters::bump(&self.counters.merges);
        trace!(left_id, right_id, "merged siblings");
        Ok(())
    }

    /// Pulls the only child of an internal root up into the root page.
    fn collapse_root(&self, mut root: WriteGuard<K, V>) -> TreeResult<()> {
        loop {
            let only_child = match root.as_internal() {
                Some(inner) if inner.children().len() == 1 => inner.first_child(),
                _ => return Ok(()),
            };
            let mut child = self.store.write(only_child)?;
            *root = std::mem::replace(&mut *child, Node::empty_leaf());
            root.bump_version();
            self.store.retire(child);
            let height = self.height.fetch_sub(1, Ordering::AcqRel) - 1;
            debug!(retired = only_child, height, "collapsed root");
        }
    }
}
