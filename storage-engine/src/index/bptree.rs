//! B+ tree implementation with latch crabbing for concurrency.
//!
//! This module holds the tree handle and the point operations:
//! - Optimistic descents that latch only the target leaf for modification
//! - Pessimistic write-latch crabbing when a split or underflow is possible
//! - Splits that reserve every page they need before touching the tree
//!
//! The root page ID never changes. A root split moves the root's content into
//! two new pages; a root collapse pulls its only child's content up. Readers
//! can therefore always start a descent from the same page.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use page_store::{PageId, PageReadGuard, PageStore, PageStoreError, PageWriteGuard, INVALID_PAGE_ID};
use tracing::{debug, trace};

use super::config::TreeConfig;
use super::error::{TreeError, TreeResult};
use super::navigator::Target;
use super::node::{InternalNode, LeafNode, Node};

pub(crate) type ReadGuard<K, V> = PageReadGuard<Node<K, V>>;
pub(crate) type WriteGuard<K, V> = PageWriteGuard<Node<K, V>>;

/// Snapshot of tree statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of entries.
    pub entries: usize,
    /// Number of levels, 1 for a tree that is a single leaf.
    pub height: usize,
    /// Number of live pages.
    pub live_pages: usize,
    /// Pages split.
    pub splits: u64,
    /// Pages merged into a sibling.
    pub merges: u64,
    /// Entries or children rotated between siblings.
    pub rotations: u64,
    /// Sweep cursor re-navigations from the root.
    pub renavigations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) splits: AtomicU64,
    pub(crate) merges: AtomicU64,
    pub(crate) rotations: AtomicU64,
    pub(crate) renavigations: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A concurrent B+ tree index with predicate sweep removal.
#[derive(Debug)]
pub struct BPlusTree<K, V> {
    pub(crate) store: PageStore<Node<K, V>>,
    pub(crate) root_page_id: PageId,
    pub(crate) config: TreeConfig,
    pub(crate) height: AtomicUsize,
    pub(crate) len: AtomicUsize,
    pub(crate) counters: Counters,
}

pub(crate) fn leaf_ref<K, V>(page_id: PageId, node: &Node<K, V>) -> TreeResult<&LeafNode<K, V>> {
    node.as_leaf()
        .ok_or_else(|| TreeError::invariant(page_id, "expected a leaf page"))
}

pub(crate) fn leaf_mut<K, V>(guard: &mut WriteGuard<K, V>) -> TreeResult<&mut LeafNode<K, V>> {
    let page_id = guard.page_id();
    guard
        .as_leaf_mut()
        .ok_or_else(|| TreeError::invariant(page_id, "expected a leaf page"))
}

pub(crate) fn internal_mut<K, V>(guard: &mut WriteGuard<K, V>) -> TreeResult<&mut InternalNode<K>> {
    let page_id = guard.page_id();
    guard
        .as_internal_mut()
        .ok_or_else(|| TreeError::invariant(page_id, "expected an internal page"))
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Creates a new, empty B+ tree whose root is a single leaf.
    pub fn new(config: TreeConfig) -> TreeResult<Self> {
        config.validate()?;
        let store = match config.page_capacity {
            Some(capacity) => PageStore::with_capacity(capacity),
            None => PageStore::new(),
        };
        let root_page_id = store.allocate(Node::empty_leaf())?;
        debug!(root_page_id, ?config, "created B+ tree");

        Ok(Self {
            store,
            root_page_id,
            config,
            height: AtomicUsize::new(1),
            len: AtomicUsize::new(0),
            counters: Counters::default(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Returns the number of levels; a tree that is a single leaf has height 1.
    pub fn height(&self) -> usize {
        self.height.load(Ordering::Acquire)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the ID of the root page, stable for the life of the tree.
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Returns tree statistics.
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            entries: self.len(),
            height: self.height(),
            live_pages: self.store.live_pages(),
            splits: self.counters.splits.load(Ordering::Relaxed),
            merges: self.counters.merges.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
            renavigations: self.counters.renavigations.load(Ordering::Relaxed),
        }
    }

    // ===== LATCH HELPERS =====

    /// Write-latches a page reached without a latch on any page referencing
    /// it. Returns `None` if the page was retired in the meantime.
    pub(crate) fn write_if_live(&self, page_id: PageId) -> TreeResult<Option<WriteGuard<K, V>>> {
        match self.store.write(page_id) {
            Ok(guard) if guard.is_retired() => Ok(None),
            Ok(guard) => Ok(Some(guard)),
            Err(PageStoreError::PageNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read-latching counterpart of [`Self::write_if_live`].
    pub(crate) fn read_if_live(&self, page_id: PageId) -> TreeResult<Option<ReadGuard<K, V>>> {
        match self.store.read(page_id) {
            Ok(guard) if guard.is_retired() => Ok(None),
            Ok(guard) => Ok(Some(guard)),
            Err(PageStoreError::PageNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    // ===== OCCUPANCY RULES =====

    pub(crate) fn min_occupancy(&self, node: &Node<K, V>) -> usize {
        if node.is_leaf() {
            self.config.leaf_min_size()
        } else {
            self.config.internal_min_children()
        }
    }

    /// True if the page is a non-root page below the minimum fill.
    pub(crate) fn is_underflow(&self, guard: &WriteGuard<K, V>) -> bool {
        guard.page_id() != self.root_page_id && guard.occupancy() < self.min_occupancy(guard)
    }

    fn is_full(&self, node: &Node<K, V>) -> bool {
        match node {
            Node::Leaf(leaf) => leaf.len() >= self.config.leaf_max_size,
            Node::Internal(inner) => inner.keys().len() >= self.config.internal_max_size,
        }
    }

    /// A child that cannot lose an entry below the minimum fill.
    pub(crate) fn is_remove_safe(&self, node: &Node<K, V>) -> bool {
        node.occupancy() > self.min_occupancy(node)
    }

    /// Write-latch crabbing from the root toward `key`, down to the page at
    /// `stop_level`, releasing every ancestor once a child is safe. The
    /// lowest page is the last guard.
    pub(crate) fn descend_pessimistic(
        &self,
        key: &K,
        stop_level: u32,
        is_safe: impl Fn(&Node<K, V>) -> bool,
    ) -> TreeResult<Vec<WriteGuard<K, V>>> {
        let mut path = vec![self.store.write(self.root_page_id)?];
        loop {
            let child_id = match path.last().and_then(|guard| guard.as_internal()) {
                Some(inner) if inner.level() > stop_level => inner.child_for(key),
                _ => break,
            };
            let child = self.store.write(child_id)?;
            if is_safe(&*child) {
                path.clear();
            }
            path.push(child);
        }
        Ok(path)
    }

    // ===== INSERT OPERATION =====

    /// Inserts a key-value pair, returning the previous value for the key.
    ///
    /// Fails with [`TreeError::AllocationFailure`] when a split cannot get
    /// its pages; the tree is left unchanged in that case.
    pub fn insert(&self, key: K, value: V) -> TreeResult<Option<V>> {
        {
            let mut guard = self.locate_leaf_write(Target::Key(&key))?;
            let leaf = leaf_mut(&mut guard)?;
            match leaf.binary_search(&key) {
                Ok(index) => return Ok(Some(leaf.replace_value(index, value))),
                Err(index) if leaf.len() < self.config.leaf_max_size => {
                    leaf.insert_slot(index, key, value);
                    self.len.fetch_add(1, Ordering::AcqRel);
                    return Ok(None);
                }
                // Leaf is full, restart with latches held on the way down
                Err(_) => {}
            }
        }
        self.insert_pessimistic(key, value)
    }

    fn insert_pessimistic(&self, key: K, value: V) -> TreeResult<Option<V>> {
        let mut path = self.descend_pessimistic(&key, 0, |node| !self.is_full(node))?;

        let index = {
            let leaf = match path.last_mut() {
                Some(guard) => leaf_mut(guard)?,
                None => return Err(TreeError::invariant(self.root_page_id, "empty descent path")),
            };
            match leaf.binary_search(&key) {
                Ok(index) => return Ok(Some(leaf.replace_value(index, value))),
                Err(index) if leaf.len() < self.config.leaf_max_size => {
                    leaf.insert_slot(index, key, value);
                    self.len.fetch_add(1, Ordering::AcqRel);
                    return Ok(None);
                }
                Err(index) => index,
            }
        };

        // Every latched page that is full splits; a full root needs two pages.
        let mut needed = path.iter().filter(|guard| self.is_full(guard)).count();
        if path.first().map(|guard| guard.page_id()) == Some(self.root_page_id)
            && path.first().map(|guard| self.is_full(guard)) == Some(true)
        {
            needed += 1;
        }
        let reserved = self
            .store
            .allocate_many((0..needed).map(|_| Node::empty_leaf()).collect())?;
        let mut reserved = reserved.into_iter();

        if let Some(guard) = path.last_mut() {
            leaf_mut(guard)?.insert_slot(index, key, value);
            self.len.fetch_add(1, Ordering::AcqRel);
        }

        let mut carry: Option<(K, PageId)> = None;
        while let Some(mut guard) = path.pop() {
            if let Some((separator, right_id)) = carry.take() {
                let inner = internal_mut(&mut guard)?;
                let position = match inner.keys().binary_search(&separator) {
                    Ok(i) | Err(i) => i,
                };
                inner.insert_child(position, separator, right_id);
            }

            let overflow = match &*guard {
                Node::Leaf(leaf) => leaf.len() > self.config.leaf_max_size,
                Node::Internal(inner) => inner.keys().len() > self.config.internal_max_size,
            };
            if !overflow {
                break;
            }

            if guard.page_id() == self.root_page_id {
                let left_id = reserved.next();
                let right_id = reserved.next();
                match (left_id, right_id) {
                    (Some(left_id), Some(right_id)) => self.split_root(guard, left_id, right_id)?,
                    _ => return Err(TreeError::invariant(self.root_page_id, "split reservation exhausted")),
                }
                break;
            }

            let right_id = reserved
                .next()
                .ok_or_else(|| TreeError::invariant(guard.page_id(), "split reservation exhausted"))?;
            let separator = if guard.is_leaf() {
                self.split_leaf(&mut guard, right_id)?
            } else {
                self.split_internal(&mut guard, right_id)?
            };
            carry = Some((separator, right_id));
        }

        // Predicted splits always match; release anything left over.
        for page_id in reserved {
            self.store.retire(self.store.write(page_id)?);
        }
        Ok(None)
    }

    /// Moves the upper half of an overflowing leaf into `right_id`.
    ///
    /// Returns the split key (first key of the new leaf).
    fn split_leaf(&self, guard: &mut WriteGuard<K, V>, right_id: PageId) -> TreeResult<K> {
        let leaf_id = guard.page_id();
        let leaf = leaf_mut(guard)?;
        let split_point = (leaf.len() + 1) / 2;
        let upper = leaf.split_off(split_point);
        let separator = upper
            .first()
            .map(|(key, _)| key.clone())
            .ok_or_else(|| TreeError::invariant(leaf_id, "split produced an empty leaf"))?;

        let old_next = leaf.next();
        leaf.set_next(right_id);
        *self.store.write(right_id)? = Node::Leaf(LeafNode::from_entries(upper, leaf_id, old_next));

        // Update next leaf's prev pointer. Latching further right keeps the
        // left-to-right order, so waiting here with the path held is safe.
        if old_next != INVALID_PAGE_ID {
            let mut next_guard = self.store.write(old_next)?;
            leaf_mut(&mut next_guard)?.set_prev(right_id);
        }

        guard.bump_version();
        Counters::bump(&self.counters.splits);
        trace!(leaf_id, right_id, ?separator, "split leaf");
        Ok(separator)
    }

    /// Moves the upper half of an overflowing internal node into `right_id`.
    ///
    /// Returns the middle key, which moves up to the parent.
    fn split_internal(&self, guard: &mut WriteGuard<K, V>, right_id: PageId) -> TreeResult<K> {
        let page_id = guard.page_id();
        let inner = internal_mut(guard)?;
        let mid = inner.keys().len() / 2;
        let (separator, right) = inner.split(mid);
        *self.store.write(right_id)? = Node::Internal(right);

        guard.bump_version();
        Counters::bump(&self.counters.splits);
        trace!(page_id, right_id, ?separator, "split internal node");
        Ok(separator)
    }

    /// Splits the root's content into two new pages and turns the root into
    /// their parent. The root keeps its page ID.
    fn split_root(&self, mut root: WriteGuard<K, V>, left_id: PageId, right_id: PageId) -> TreeResult<()> {
        let level = root.level() + 1;
        let separator = match &mut *root {
            Node::Leaf(leaf) => {
                let mut entries = leaf.take_entries();
                let upper = entries.split_off((entries.len() + 1) / 2);
                let separator = upper
                    .first()
                    .map(|(key, _)| key.clone())
                    .ok_or_else(|| TreeError::invariant(self.root_page_id, "root split produced an empty leaf"))?;
                *self.store.write(left_id)? =
                    Node::Leaf(LeafNode::from_entries(entries, INVALID_PAGE_ID, right_id));
                *self.store.write(right_id)? =
                    Node::Leaf(LeafNode::from_entries(upper, left_id, INVALID_PAGE_ID));
                separator
            }
            Node::Internal(inner) => {
                let mid = inner.keys().len() / 2;
                let (separator, right) = inner.split(mid);
                let left = std::mem::replace(inner, InternalNode::new(level, Vec::new(), Vec::new()));
                *self.store.write(left_id)? = Node::Internal(left);
                *self.store.write(right_id)? = Node::Internal(right);
                separator
            }
        };

        *root = Node::Internal(InternalNode::new(level, vec![separator], vec![left_id, right_id]));
        root.bump_version();
        Counters::bump(&self.counters.splits);
        let height = self.height.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(left_id, right_id, height, "split root");
        Ok(())
    }

    // ===== DELETE OPERATION =====

    /// Removes a key from the B+ tree.
    ///
    /// Returns the value if the key was found and removed, None otherwise.
    pub fn remove(&self, key: &K) -> TreeResult<Option<V>> {
        {
            let mut guard = self.locate_leaf_write(Target::Key(key))?;
            let is_root = guard.page_id() == self.root_page_id;
            let min = self.config.leaf_min_size();
            let leaf = leaf_mut(&mut guard)?;
            match leaf.binary_search(key) {
                Err(_) => return Ok(None),
                Ok(index) if is_root || leaf.len() > min => {
                    let (_, value) = leaf.remove_slot(index);
                    self.len.fetch_sub(1, Ordering::AcqRel);
                    return Ok(Some(value));
                }
                // Removal would underflow the leaf
                Ok(_) => {}
            }
        }

        let mut path = self.descend_pessimistic(key, 0, |node| self.is_remove_safe(node))?;
        let removed = match path.last_mut() {
            Some(guard) => {
                let leaf = leaf_mut(guard)?;
                match leaf.binary_search(key) {
                    Ok(index) => Some(leaf.remove_slot(index).1),
                    Err(_) => None,
                }
            }
            None => None,
        };
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        self.rebalance(path, key)?;
        Ok(removed)
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Debug,
    V: Clone,
{
    /// Searches for a key in the B+ tree.
    pub fn get(&self, key: &K) -> TreeResult<Option<V>> {
        let guard = self.locate_leaf_read(Target::Key(key))?;
        let leaf = leaf_ref(guard.page_id(), &guard)?;
        Ok(leaf.binary_search(key).ok().map(|index| leaf.slot(index).1.clone()))
    }

    pub fn contains_key(&self, key: &K) -> TreeResult<bool> {
        let guard = self.locate_leaf_read(Target::Key(key))?;
        Ok(leaf_ref(guard.page_id(), &guard)?.binary_search(key).is_ok())
    }
}
