//! B+ tree node implementation.
//!
//! A node is the payload of one page in the [`PageStore`](page_store::PageStore):
//! either a leaf holding ordered `(key, value)` slots and its neighbours in the
//! leaf chain, or an internal node holding separator keys and child page IDs.

use page_store::{PageId, INVALID_PAGE_ID};

/// The payload stored in every index page.
#[derive(Debug, Clone)]
pub enum Node<K, V> {
    /// A leaf page.
    Leaf(LeafNode<K, V>),
    /// An internal page.
    Internal(InternalNode<K>),
}

impl<K, V> Node<K, V> {
    /// Creates an empty, unlinked leaf.
    pub fn empty_leaf() -> Self {
        Node::Leaf(LeafNode::new())
    }

    /// Returns whether this node is a leaf node.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Returns the level of the node; leaves are level 0.
    pub fn level(&self) -> u32 {
        match self {
            Node::Leaf(_) => 0,
            Node::Internal(node) => node.level,
        }
    }

    /// Number of entries for a leaf, number of children for an internal node.
    pub fn occupancy(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Internal(node) => node.children.len(),
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode<K, V>> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode<K, V>> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode<K>> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }

    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode<K>> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }
}

/// Ordered slots of a leaf page plus its leaf chain links.
#[derive(Debug, Clone)]
pub struct LeafNode<K, V> {
    entries: Vec<(K, V)>,
    prev: PageId,
    next: PageId,
}

impl<K, V> Default for LeafNode<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LeafNode<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            prev: INVALID_PAGE_ID,
            next: INVALID_PAGE_ID,
        }
    }

    pub(crate) fn from_entries(entries: Vec<(K, V)>, prev: PageId, next: PageId) -> Self {
        Self { entries, prev, next }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the previous leaf page ID.
    pub fn prev(&self) -> PageId {
        self.prev
    }

    /// Returns the next leaf page ID.
    pub fn next(&self) -> PageId {
        self.next
    }

    pub fn set_prev(&mut self, page_id: PageId) {
        self.prev = page_id;
    }

    pub fn set_next(&mut self, page_id: PageId) {
        self.next = page_id;
    }

    /// Returns the key and value stored at `index`.
    pub fn slot(&self, index: usize) -> (&K, &V) {
        let (key, value) = &self.entries[index];
        (key, value)
    }

    pub fn first_key(&self) -> Option<&K> {
        self.entries.first().map(|(key, _)| key)
    }

    pub fn entries(&self) -> &[(K, V)] {
        &self.entries
    }

    /// Inserts a key-value pair at `index`, shifting later slots right.
    pub fn insert_slot(&mut self, index: usize, key: K, value: V) {
        self.entries.insert(index, (key, value));
    }

    /// Removes the slot at `index`, compacting the slot array.
    pub fn remove_slot(&mut self, index: usize) -> (K, V) {
        self.entries.remove(index)
    }

    /// Replaces the value stored at `index`.
    pub fn replace_value(&mut self, index: usize, value: V) -> V {
        std::mem::replace(&mut self.entries[index].1, value)
    }

    pub(crate) fn push_front(&mut self, entry: (K, V)) {
        self.entries.insert(0, entry);
    }

    pub(crate) fn push_back(&mut self, entry: (K, V)) {
        self.entries.push(entry);
    }

    pub(crate) fn pop_front(&mut self) -> Option<(K, V)> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub(crate) fn pop_back(&mut self) -> Option<(K, V)> {
        self.entries.pop()
    }

    pub(crate) fn split_off(&mut self, at: usize) -> Vec<(K, V)> {
        self.entries.split_off(at)
    }

    pub(crate) fn append(&mut self, other: &mut LeafNode<K, V>) {
        self.entries.append(&mut other.entries);
    }

    pub(crate) fn take_entries(&mut self) -> Vec<(K, V)> {
        std::mem::take(&mut self.entries)
    }
}

impl<K: Ord, V> LeafNode<K, V> {
    /// Performs binary search for a key.
    ///
    /// Returns Ok(index) if the key is found, or Err(index) indicating where
    /// the key should be inserted to maintain sorted order.
    pub fn binary_search(&self, key: &K) -> Result<usize, usize> {
        self.entries.binary_search_by(|(entry_key, _)| entry_key.cmp(key))
    }

    /// Index of the first slot whose key is strictly greater than `bound`.
    pub fn first_after(&self, bound: &K) -> usize {
        self.entries.partition_point(|(key, _)| key <= bound)
    }

    /// Number of slots whose key is strictly less than `bound`.
    pub fn count_before(&self, bound: &K) -> usize {
        self.entries.partition_point(|(key, _)| key < bound)
    }
}

/// Separator keys and child pointers of an internal page.
///
/// `children.len() == keys.len() + 1`; child `i` holds keys in
/// `[keys[i - 1], keys[i])`.
#[derive(Debug, Clone)]
pub struct InternalNode<K> {
    level: u32,
    keys: Vec<K>,
    children: Vec<PageId>,
}

impl<K> InternalNode<K> {
    pub(crate) fn new(level: u32, keys: Vec<K>, children: Vec<PageId>) -> Self {
        Self { level, keys, children }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    pub fn child(&self, index: usize) -> PageId {
        self.children[index]
    }

    pub fn first_child(&self) -> PageId {
        self.children[0]
    }

    pub fn last_child(&self) -> PageId {
        self.children[self.children.len() - 1]
    }

    /// Position of `child` among this node's children.
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|&id| id == child)
    }

    /// Inserts a separator and the child to its right.
    pub(crate) fn insert_child(&mut self, index: usize, key: K, right_child: PageId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
    }

    /// Removes child `index` (> 0) together with the separator to its left.
    pub(crate) fn remove_child(&mut self, index: usize) -> (K, PageId) {
        let key = self.keys.remove(index - 1);
        let child = self.children.remove(index);
        (key, child)
    }

    pub(crate) fn replace_key(&mut self, index: usize, key: K) -> K {
        std::mem::replace(&mut self.keys[index], key)
    }

    pub(crate) fn push_front(&mut self, key: K, child: PageId) {
        self.keys.insert(0, key);
        self.children.insert(0, child);
    }

    pub(crate) fn push_back(&mut self, key: K, child: PageId) {
        self.keys.push(key);
        self.children.push(child);
    }

    pub(crate) fn pop_front(&mut self) -> Option<(K, PageId)> {
        if self.keys.is_empty() {
            return None;
        }
        Some((self.keys.remove(0), self.children.remove(0)))
    }

    pub(crate) fn pop_back(&mut self) -> Option<(K, PageId)> {
        let key = self.keys.pop()?;
        let child = self.children.pop()?;
        Some((key, child))
    }

    /// Splits off keys after `mid` and children after `mid + 1`; returns the
    /// separator that moves up and the right half.
    pub(crate) fn split(&mut self, mid: usize) -> (K, InternalNode<K>) {
        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        // keys.len() == mid + 1 here.
        let separator = self.keys.remove(mid);
        (separator, InternalNode::new(self.level, right_keys, right_children))
    }

    /// Appends `separator` and all of `other`'s keys and children.
    pub(crate) fn merge(&mut self, separator: K, other: &mut InternalNode<K>) {
        self.keys.push(separator);
        self.keys.append(&mut other.keys);
        self.children.append(&mut other.children);
    }
}

impl<K: Ord> InternalNode<K> {
    /// Index of the child whose key range contains `key`.
    pub fn child_index_for(&self, key: &K) -> usize {
        match self.keys.binary_search(key) {
            Ok(i) => i + 1, // Key found, go to right child
            Err(i) => i,    // Key not found, i is the insertion point
        }
    }

    pub fn child_for(&self, key: &K) -> PageId {
        self.children[self.child_index_for(key)]
    }
}
