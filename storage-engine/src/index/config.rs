//! Configuration for the B+ tree index.

use super::error::{TreeError, TreeResult};

/// Default maximum number of entries in a leaf.
pub const DEFAULT_LEAF_MAX_SIZE: usize = 64;

/// Default maximum number of separator keys in an internal node.
pub const DEFAULT_INTERNAL_MAX_SIZE: usize = 64;

/// Configuration for a [`BPlusTree`](super::BPlusTree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum number of entries in a leaf node.
    pub leaf_max_size: usize,

    /// Maximum number of keys in an internal node (children = keys + 1).
    pub internal_max_size: usize,

    /// Upper bound on live pages, `None` for unbounded.
    pub page_capacity: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_max_size: DEFAULT_LEAF_MAX_SIZE,
            internal_max_size: DEFAULT_INTERNAL_MAX_SIZE,
            page_capacity: None,
        }
    }
}

impl TreeConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the same maximum for leaf entries and internal keys.
    pub fn with_max_per_page(self, max: usize) -> Self {
        self.with_leaf_max_size(max).with_internal_max_size(max)
    }

    /// Sets the maximum number of entries per leaf.
    pub fn with_leaf_max_size(mut self, max: usize) -> Self {
        self.leaf_max_size = max;
        self
    }

    /// Sets the maximum number of keys per internal node.
    pub fn with_internal_max_size(mut self, max: usize) -> Self {
        self.internal_max_size = max;
        self
    }

    /// Bounds the number of live pages the tree may allocate.
    pub fn with_page_capacity(mut self, capacity: usize) -> Self {
        self.page_capacity = Some(capacity);
        self
    }

    /// Minimum entries in a non-root leaf.
    pub fn leaf_min_size(&self) -> usize {
        (self.leaf_max_size + 1) / 2
    }

    /// Maximum children of an internal node.
    pub fn internal_max_children(&self) -> usize {
        self.internal_max_size + 1
    }

    /// Minimum children of a non-root internal node.
    pub fn internal_min_children(&self) -> usize {
        (self.internal_max_children() + 1) / 2
    }

    /// Checks that rotation and merge thresholds are consistent.
    pub fn validate(&self) -> TreeResult<()> {
        if self.leaf_max_size < 2 {
            return Err(TreeError::InvalidConfig(format!(
                "leaf_max_size must be at least 2, got {}",
                self.leaf_max_size
            )));
        }
        if self.internal_max_size < 2 {
            return Err(TreeError::InvalidConfig(format!(
                "internal_max_size must be at least 2, got {}",
                self.internal_max_size
            )));
        }
        if self.page_capacity == Some(0) {
            return Err(TreeError::InvalidConfig(
                "page_capacity must allow the root page".to_string(),
            ));
        }
        Ok(())
    }
}
