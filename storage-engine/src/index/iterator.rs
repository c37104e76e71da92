//! B+ tree iterator for range scans.
//!
//! Provides range scanning by following the leaf chain. Entries are copied
//! out one leaf at a time, so no latch is held between calls to `next`; the
//! last returned key bounds where the scan resumes if the tree changed.

use std::collections::VecDeque;
use std::fmt::Debug;

use page_store::INVALID_PAGE_ID;

use super::bptree::{leaf_ref, BPlusTree, ReadGuard};
use super::error::TreeResult;
use super::navigator::{Position, Target};

/// An iterator over a range of keys in a B+ tree.
///
/// The iterator follows the leaf chain, returning key-value pairs until the
/// end key is reached or the end of the tree is encountered.
pub struct BPlusTreeIterator<'t, K, V> {
    tree: &'t BPlusTree<K, V>,
    position: Position,
    /// Inclusive start key.
    start_key: Option<K>,
    /// Exclusive end key.
    end_key: Option<K>,
    /// Last key copied out of the tree.
    bound: Option<K>,
    buffer: VecDeque<(K, V)>,
}

impl<'t, K, V> BPlusTreeIterator<'t, K, V>
where
    K: Ord + Clone + Debug,
    V: Clone,
{
    /// Creates a new B+ tree iterator over `[start_key, end_key)`.
    pub fn new(tree: &'t BPlusTree<K, V>, start_key: Option<K>, end_key: Option<K>) -> Self {
        Self {
            tree,
            position: Position::Start,
            start_key,
            end_key,
            bound: None,
            buffer: VecDeque::new(),
        }
    }

    /// Creates an iterator that scans the entire tree.
    pub fn full_scan(tree: &'t BPlusTree<K, V>) -> Self {
        Self::new(tree, None, None)
    }

    fn locate(&self) -> TreeResult<ReadGuard<K, V>> {
        let target = match (&self.bound, &self.start_key) {
            (Some(bound), _) => Target::Key(bound),
            (None, Some(start)) => Target::Key(start),
            (None, None) => Target::Leftmost,
        };
        self.tree.locate_leaf_read(target)
    }

    /// Copies the next non-empty run of entries into the buffer.
    fn fill(&mut self) -> TreeResult<()> {
        let mut leaf = match self.position {
            Position::Exhausted => return Ok(()),
            Position::Start | Position::Seek => self.locate()?,
            Position::Page { page_id, version } => match self.tree.read_if_live(page_id)? {
                Some(guard) if guard.structural_version() == version && guard.is_leaf() => guard,
                stale => {
                    drop(stale);
                    self.locate()?
                }
            },
        };

        loop {
            let node = leaf_ref(leaf.page_id(), &leaf)?;
            let from = match (&self.bound, &self.start_key) {
                (Some(bound), _) => node.first_after(bound),
                (None, Some(start)) => node.count_before(start),
                (None, None) => 0,
            };

            for (key, value) in &node.entries()[from..] {
                // Check if we've reached the end key
                if self.end_key.as_ref().is_some_and(|end| key >= end) {
                    self.position = Position::Exhausted;
                    return Ok(());
                }
                self.buffer.push_back((key.clone(), value.clone()));
            }
            if let Some((key, _)) = self.buffer.back() {
                self.bound = Some(key.clone());
            }

            let next_id = node.next();
            if next_id == INVALID_PAGE_ID {
                self.position = Position::Exhausted;
                return Ok(());
            }

            // Acquire next before releasing the current leaf
            let next = self.tree.store.read(next_id)?;
            drop(leaf);
            leaf = next;

            if !self.buffer.is_empty() {
                self.position = Position::Page {
                    page_id: leaf.page_id(),
                    version: leaf.structural_version(),
                };
                return Ok(());
            }
        }
    }
}

impl<K, V> Iterator for BPlusTreeIterator<'_, K, V>
where
    K: Ord + Clone + Debug,
    V: Clone,
{
    type Item = TreeResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.position == Position::Exhausted {
                return None;
            }
            if let Err(err) = self.fill() {
                self.position = Position::Exhausted;
                return Some(Err(err));
            }
        }
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
    V: Clone,
{
    /// Iterates over all entries in ascending key order.
    pub fn iter(&self) -> BPlusTreeIterator<'_, K, V> {
        BPlusTreeIterator::full_scan(self)
    }

    /// Iterates over entries with keys in `[start, end)`; `None` leaves that
    /// side unbounded.
    pub fn range(&self, start: Option<K>, end: Option<K>) -> BPlusTreeIterator<'_, K, V> {
        BPlusTreeIterator::new(self, start, end)
    }

    /// Iterates over entries with keys `>= start`.
    pub fn range_from(&self, start: K) -> BPlusTreeIterator<'_, K, V> {
        BPlusTreeIterator::new(self, Some(start), None)
    }

    /// Returns the entry with the smallest key.
    pub fn first_key_value(&self) -> TreeResult<Option<(K, V)>> {
        self.iter().next().transpose()
    }

    /// Returns the entry with the largest key.
    pub fn last_key_value(&self) -> TreeResult<Option<(K, V)>> {
        let mut leaf = self.locate_leaf_read(Target::Rightmost)?;
        loop {
            let leaf_id = leaf.page_id();
            let node = leaf_ref(leaf_id, &leaf)?;
            if let Some((key, value)) = node.entries().last() {
                return Ok(Some((key.clone(), value.clone())));
            }
            let prev_id = node.prev();
            if prev_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            // Only an emptied leaf awaiting repair lands here. Leaves are
            // never latched leftward while holding one, so release first.
            drop(leaf);
            leaf = match self.read_if_live(prev_id)? {
                Some(prev) if prev.as_leaf().map(|prev| prev.next()) == Some(leaf_id) => prev,
                stale => {
                    drop(stale);
                    self.locate_leaf_read(Target::Rightmost)?
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::TreeConfig;

    fn tree_with(keys: impl IntoIterator<Item = i64>) -> BPlusTree<i64, i64> {
        let tree = BPlusTree::new(TreeConfig::new().with_max_per_page(3)).unwrap();
        for k in keys {
            tree.insert(k, -k).unwrap();
        }
        tree
    }

    #[test]
    fn test_iterator_empty_tree() {
        let tree = tree_with([]);
        assert!(tree.iter().next().is_none());
        assert_eq!(tree.first_key_value().unwrap(), None);
        assert_eq!(tree.last_key_value().unwrap(), None);
    }

    #[test]
    fn test_iterator_full_scan_in_order() {
        let tree = tree_with((0..50).rev());
        let entries: Vec<(i64, i64)> = tree.iter().map(Result::unwrap).collect();
        assert_eq!(entries, (0..50).map(|k| (k, -k)).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterator_range_bounds() {
        let tree = tree_with((0..100).map(|k| k * 2));
        let keys: Vec<i64> = tree
            .range(Some(11), Some(21))
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec![12, 14, 16, 18, 20]);

        let keys: Vec<i64> = tree.range_from(190).map(|entry| entry.unwrap().0).collect();
        assert_eq!(keys, vec![190, 192, 194, 196, 198]);
    }

    #[test]
    fn test_first_and_last_key_value() {
        let tree = tree_with(-20..20);
        assert_eq!(tree.first_key_value().unwrap(), Some((-20, 20)));
        assert_eq!(tree.last_key_value().unwrap(), Some((19, -19)));
    }

    #[test]
    fn test_iterator_resumes_after_modification() {
        let tree = tree_with(0..30);
        let mut iter = tree.iter();
        let first: Vec<i64> = iter.by_ref().take(4).map(|entry| entry.unwrap().0).collect();
        assert_eq!(first, vec![0, 1, 2, 3]);

        for k in 20..25 {
            tree.remove(&k).unwrap();
        }
        tree.insert(100, -100).unwrap();

        let rest: Vec<i64> = iter.map(|entry| entry.unwrap().0).collect();
        let expected: Vec<i64> = (4..20).chain(25..30).chain([100]).collect();
        assert_eq!(rest, expected);
    }
}
