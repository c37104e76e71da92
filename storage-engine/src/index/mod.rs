//! B+ tree index.
//!
//! This module provides a concurrent B+ tree index with:
//! - Latch coupling (crabbing) for concurrent point operations
//! - Predicate sweeps that remove matching entries in a single pass
//! - Range scans via the leaf chain
//! - Rotation and merge repair of underflowed pages

pub mod bptree;
pub mod config;
pub mod error;
pub mod iterator;
pub mod navigator;
pub mod node;
pub mod rebalance;
pub mod sweep;
pub mod validate;

// Re-export main types
pub use bptree::{BPlusTree, TreeStats};
pub use config::TreeConfig;
pub use error::{PredicateError, TreeError, TreeResult};
pub use iterator::BPlusTreeIterator;
pub use node::{InternalNode, LeafNode, Node};
pub use sweep::{Direction, Entry, SweepCursor};
