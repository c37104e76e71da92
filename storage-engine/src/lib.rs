//! Concurrent in-memory B+ tree index built on the page store.

pub mod index;

pub use index::{BPlusTree, Direction, Entry, SweepCursor, TreeConfig, TreeError, TreeResult};
