//! Structural checks and a printable rendering of the tree.
//!
//! Both walk the tree top-down holding read latches on the current
//! root-to-page path. They are meant for tests and debugging on a quiescent
//! tree; concurrent writers will block until the walk finishes.

use std::fmt::{Debug, Write as _};

use page_store::{PageId, INVALID_PAGE_ID};

use super::bptree::{BPlusTree, ReadGuard};
use super::error::{TreeError, TreeResult};
use super::node::Node;

/// Leaf chain links as observed during a walk: `(page, prev, next)`.
type LeafLinks = (PageId, PageId, PageId);

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Checks every structural invariant of the tree.
    ///
    /// - keys are strictly ascending within each page and lie within the
    ///   range their parent's separators assign to the page
    /// - every non-root page holds at least the minimum number of entries or
    ///   children, and no page exceeds the maximum
    /// - all leaves sit at the same depth, equal to the tree height
    /// - the leaf chain visits every leaf once, in key order, with matching
    ///   `prev` links
    /// - the entry count matches [`BPlusTree::len`]
    pub fn validate(&self) -> TreeResult<()> {
        let root = self.store.read(self.root_page_id)?;
        let expected_level = self.height().checked_sub(1).ok_or_else(|| {
            TreeError::invariant(self.root_page_id, "tree height is zero")
        })?;

        let mut leaves = Vec::new();
        let entries = self.validate_page(root, None, None, expected_level, &mut leaves)?;

        for (i, &(page_id, prev, next)) in leaves.iter().enumerate() {
            let expected_prev = if i == 0 { INVALID_PAGE_ID } else { leaves[i - 1].0 };
            let expected_next = leaves.get(i + 1).map_or(INVALID_PAGE_ID, |leaf| leaf.0);
            if prev != expected_prev || next != expected_next {
                return Err(TreeError::invariant(
                    page_id,
                    format!(
                        "leaf chain links prev={prev} next={next}, expected prev={expected_prev} next={expected_next}"
                    ),
                ));
            }
        }

        if entries != self.len() {
            return Err(TreeError::invariant(
                self.root_page_id,
                format!("found {entries} entries, tree counts {}", self.len()),
            ));
        }
        Ok(())
    }

    fn validate_page(
        &self,
        guard: ReadGuard<K, V>,
        lower: Option<&K>,
        upper: Option<&K>,
        expected_level: usize,
        leaves: &mut Vec<LeafLinks>,
    ) -> TreeResult<usize> {
        let page_id = guard.page_id();
        let is_root = page_id == self.root_page_id;
        let violation = |reason: String| TreeError::invariant(page_id, reason);

        if guard.is_retired() {
            return Err(violation("reachable page is retired".to_string()));
        }
        if guard.level() as usize != expected_level {
            return Err(violation(format!(
                "page at level {} where level {expected_level} was expected",
                guard.level()
            )));
        }

        let keys: Vec<&K> = match &*guard {
            Node::Leaf(leaf) => leaf.entries().iter().map(|(key, _)| key).collect(),
            Node::Internal(inner) => inner.keys().iter().collect(),
        };
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(violation(format!("keys out of order: {keys:?}")));
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if *first < lower {
                return Err(violation(format!("key {first:?} below separator {lower:?}")));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if *last >= upper {
                return Err(violation(format!("key {last:?} not below separator {upper:?}")));
            }
        }

        let occupancy = guard.occupancy();
        let min = if is_root { 0 } else { self.min_occupancy(&guard) };

        match &*guard {
            Node::Leaf(leaf) => {
                if occupancy < min || occupancy > self.config.leaf_max_size {
                    return Err(violation(format!(
                        "leaf holds {occupancy} entries, allowed {min}..={}",
                        self.config.leaf_max_size
                    )));
                }
                leaves.push((page_id, leaf.prev(), leaf.next()));
                Ok(occupancy)
            }
            Node::Internal(inner) => {
                let min = if is_root { 2 } else { min };
                let max = self.config.internal_max_children();
                if occupancy < min || occupancy > max {
                    return Err(violation(format!(
                        "internal page has {occupancy} children, allowed {min}..={max}"
                    )));
                }
                if inner.children().len() != inner.keys().len() + 1 {
                    return Err(violation(format!(
                        "{} keys for {} children",
                        inner.keys().len(),
                        inner.children().len()
                    )));
                }

                let mut entries = 0;
                for (i, &child_id) in inner.children().iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { inner.keys().get(i - 1) };
                    let child_upper = inner.keys().get(i).or(upper);
                    let child = self.store.read(child_id)?;
                    entries += self.validate_page(
                        child,
                        child_lower,
                        child_upper,
                        expected_level.saturating_sub(1),
                        leaves,
                    )?;
                }
                Ok(entries)
            }
        }
    }

    /// Renders the tree one page per line, indented by depth.
    pub fn dump(&self) -> TreeResult<String> {
        let mut out = String::new();
        let root = self.store.read(self.root_page_id)?;
        self.dump_page(root, 0, &mut out)?;
        Ok(out)
    }

    fn dump_page(&self, guard: ReadGuard<K, V>, depth: usize, out: &mut String) -> TreeResult<()> {
        let indent = "  ".repeat(depth);
        let page_id = guard.page_id();
        let version = guard.structural_version();
        match &*guard {
            Node::Leaf(leaf) => {
                let keys: Vec<&K> = leaf.entries().iter().map(|(key, _)| key).collect();
                let _ = writeln!(
                    out,
                    "{indent}leaf {page_id} v{version} prev={} next={} {keys:?}",
                    leaf.prev(),
                    leaf.next()
                );
            }
            Node::Internal(inner) => {
                let _ = writeln!(
                    out,
                    "{indent}internal {page_id} v{version} level={} {:?}",
                    inner.level(),
                    inner.keys()
                );
                for &child_id in inner.children() {
                    let child = self.store.read(child_id)?;
                    self.dump_page(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}
