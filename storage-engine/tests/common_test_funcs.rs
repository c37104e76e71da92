// common_test_funcs.rs
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use storage_engine::{BPlusTree, TreeConfig};
use tracing_subscriber::EnvFilter;

// Routes tree logs through the test harness; set RUST_LOG to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Builds a tree holding `key -> key * 10` for every key.
pub fn build_tree(max_per_page: usize, keys: impl IntoIterator<Item = u64>) -> BPlusTree<u64, u64> {
    init_tracing();
    let tree = BPlusTree::new(TreeConfig::new().with_max_per_page(max_per_page)).unwrap();
    for key in keys {
        assert_eq!(tree.insert(key, key * 10).unwrap(), None);
    }
    tree.validate().unwrap();
    tree
}

pub fn keys_of(tree: &BPlusTree<u64, u64>) -> Vec<u64> {
    tree.iter().map(|entry| entry.unwrap().0).collect()
}

// Seeded shuffle so insert order does not match key order.
pub fn scrambled(n: u64) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..n).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(n));
    keys
}
