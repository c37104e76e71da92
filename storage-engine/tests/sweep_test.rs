use storage_engine::{BPlusTree, Direction, TreeConfig, TreeError};
use test_case::test_case;

mod common_test_funcs;

use common_test_funcs::{build_tree, keys_of, scrambled};

fn drain(
    tree: &BPlusTree<u64, u64>,
    mut predicate: impl FnMut(&u64) -> bool,
    direction: Direction,
) -> Vec<(u64, u64)> {
    tree.sweep(move |entry| predicate(entry.key()), direction)
        .map(Result::unwrap)
        .collect()
}

#[test_case(Direction::Forward, 2 ; "forward tiny pages")]
#[test_case(Direction::Backward, 2 ; "backward tiny pages")]
#[test_case(Direction::Forward, 64 ; "forward default pages")]
#[test_case(Direction::Backward, 64 ; "backward default pages")]
fn test_noop_predicate_leaves_tree_unchanged(direction: Direction, max_per_page: usize) {
    let tree = build_tree(max_per_page, scrambled(500));
    let before = tree.dump().unwrap();

    let mut calls = 0;
    let removed = drain(
        &tree,
        |_| {
            calls += 1;
            false
        },
        direction,
    );

    assert!(removed.is_empty());
    assert_eq!(calls, 500);
    assert_eq!(tree.dump().unwrap(), before);
    tree.validate().unwrap();
}

#[test_case(Direction::Forward, 2)]
#[test_case(Direction::Backward, 2)]
#[test_case(Direction::Forward, 5)]
#[test_case(Direction::Backward, 5)]
#[test_case(Direction::Forward, 32)]
#[test_case(Direction::Backward, 32)]
fn test_sweep_partitions_entries(direction: Direction, max_per_page: usize) {
    let tree = build_tree(max_per_page, scrambled(2000));
    let matches = |key: &u64| key % 7 == 3 || (500..900).contains(key);

    let removed = drain(&tree, matches, direction);

    let expected_removed: Vec<u64> = (0..2000).filter(|k| matches(k)).collect();
    let expected_kept: Vec<u64> = (0..2000).filter(|k| !matches(k)).collect();

    let mut removed_keys: Vec<u64> = removed.iter().map(|(k, _)| *k).collect();
    removed_keys.sort_unstable();
    assert_eq!(removed_keys, expected_removed);
    assert!(removed.iter().all(|(k, v)| *v == k * 10));
    assert_eq!(keys_of(&tree), expected_kept);
    assert_eq!(tree.len(), expected_kept.len());
    tree.validate().unwrap();
}

#[test_case(Direction::Forward ; "forward yields ascending")]
#[test_case(Direction::Backward ; "backward yields descending")]
fn test_sweep_order(direction: Direction) {
    let tree = build_tree(3, scrambled(300));
    let keys: Vec<u64> = drain(&tree, |k| k % 2 == 1, direction)
        .into_iter()
        .map(|(k, _)| k)
        .collect();

    let mut expected: Vec<u64> = (0..300).filter(|k| k % 2 == 1).collect();
    if direction == Direction::Backward {
        expected.reverse();
    }
    assert_eq!(keys, expected);
}

#[test_case(Direction::Forward)]
#[test_case(Direction::Backward)]
fn test_round_trip_small_pages(direction: Direction) {
    let tree = build_tree(2, 1..=8);
    assert!(tree.height() > 1);

    let mut evens: Vec<u64> = drain(&tree, |k| k % 2 == 0, direction)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    evens.sort_unstable();
    assert_eq!(evens, vec![2, 4, 6, 8]);
    assert_eq!(keys_of(&tree), vec![1, 3, 5, 7]);
    tree.validate().unwrap();

    let mut odds: Vec<u64> = drain(&tree, |k| k % 2 == 1, direction)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    odds.sort_unstable();
    assert_eq!(odds, vec![1, 3, 5, 7]);
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.stats().live_pages, 1);
    tree.validate().unwrap();

    for k in 1..=8 {
        tree.insert(k, k).unwrap();
    }
    assert_eq!(keys_of(&tree), (1..=8).collect::<Vec<_>>());
    tree.validate().unwrap();
}

#[test_case(Direction::Forward, 4)]
#[test_case(Direction::Backward, 4)]
#[test_case(Direction::Forward, 7)]
#[test_case(Direction::Backward, 7)]
fn test_sweep_resumes_on_repaired_leaf(direction: Direction, max_per_page: usize) {
    let tree = build_tree(max_per_page, 0..20_000);
    let before = tree.stats();

    let mut cursor = tree.sweep(|entry| entry.key() % 2 == 0, direction);
    assert_eq!(cursor.direction(), direction);
    while cursor.advance().unwrap() {}
    assert_eq!(cursor.removed_count(), 10_000);
    drop(cursor);

    let after = tree.stats();
    assert!(after.merges + after.rotations > before.merges + before.rotations);
    // Only folding the last leaf into the root may force a re-navigation.
    assert!(after.renavigations - before.renavigations <= 1);
    assert_eq!(keys_of(&tree), (1..20_000).step_by(2).collect::<Vec<_>>());
    tree.validate().unwrap();
}

#[test_case(Direction::Forward, 1)]
#[test_case(Direction::Forward, 17)]
#[test_case(Direction::Backward, 1)]
#[test_case(Direction::Backward, 17)]
fn test_dropping_cursor_early_leaves_tree_valid(direction: Direction, take: usize) {
    let tree = build_tree(4, scrambled(400));
    let mut cursor = tree.sweep(|entry| entry.key() % 3 == 0, direction);
    for _ in 0..take {
        assert!(cursor.advance().unwrap());
    }
    let removed = cursor.removed_count();
    assert!(removed >= take);
    drop(cursor);

    assert_eq!(tree.len(), 400 - removed);
    tree.validate().unwrap();

    // A second sweep picks up exactly what the first one left behind.
    let rest = drain(&tree, |k| k % 3 == 0, direction);
    assert_eq!(rest.len() + removed, 134);
    assert!(keys_of(&tree).iter().all(|k| k % 3 != 0));
    tree.validate().unwrap();
}

#[test_case(Direction::Forward, 49 ; "forward")]
#[test_case(Direction::Backward, 51 ; "backward")]
fn test_predicate_failure_then_recovery(direction: Direction, last_visited: u64) {
    let tree = build_tree(4, scrambled(100));
    let mut cursor = tree.try_sweep(
        |entry| {
            if *entry.key() == 50 {
                Err(format!("cannot evaluate key {}", entry.key()))
            } else {
                Ok(entry.key() % 2 == 0)
            }
        },
        direction,
    );

    let mut yielded = Vec::new();
    let failure = loop {
        match cursor.advance() {
            Ok(true) => yielded.push(*cursor.current_key().unwrap()),
            Ok(false) => panic!("sweep finished despite the failing predicate"),
            Err(err) => break err,
        }
    };
    match failure {
        TreeError::PredicateFailure { last_key, source } => {
            assert_eq!(last_key, Some(last_visited.to_string()));
            assert_eq!(source.to_string(), "cannot evaluate key 50");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(cursor.advance(), Err(TreeError::CursorFailed)));
    assert!(cursor.next().is_none());
    drop(cursor);

    let expected: Vec<u64> = match direction {
        Direction::Forward => (0..50).filter(|k| k % 2 == 0).collect(),
        Direction::Backward => (51..100).rev().filter(|k| k % 2 == 0).collect(),
    };
    assert_eq!(yielded, expected);
    tree.validate().unwrap();

    // Re-running with a working predicate finishes the job.
    drain(&tree, |k| k % 2 == 0, direction);
    assert_eq!(keys_of(&tree), (0..100).filter(|k| k % 2 == 1).collect::<Vec<_>>());
    tree.validate().unwrap();
}

#[test]
fn test_sweep_after_allocation_failure() {
    let tree = BPlusTree::new(TreeConfig::new().with_max_per_page(4).with_page_capacity(16)).unwrap();
    let mut inserted = Vec::new();
    let err = loop {
        let k = inserted.len() as u64;
        match tree.insert(k, k * 10) {
            Ok(_) => inserted.push(k),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, TreeError::AllocationFailure(_)));
    assert_eq!(tree.len(), inserted.len());
    assert!(tree.stats().live_pages <= 16);
    tree.validate().unwrap();

    let removed = drain(&tree, |k| k % 2 == 0, Direction::Forward);
    assert_eq!(removed.len(), inserted.iter().filter(|k| *k % 2 == 0).count());
    tree.validate().unwrap();
}

#[test]
fn test_sweep_sees_values() {
    let tree: BPlusTree<String, Vec<u8>> = BPlusTree::new(TreeConfig::new().with_max_per_page(3)).unwrap();
    for i in 0..40u8 {
        tree.insert(format!("key-{i:02}"), vec![i; usize::from(i % 4)]).unwrap();
    }

    let removed: Vec<String> = tree
        .sweep(|entry| entry.value().is_empty(), Direction::Forward)
        .map(|entry| entry.unwrap().0)
        .collect();

    assert_eq!(removed.len(), 10);
    assert_eq!(removed[0], "key-00");
    assert_eq!(tree.len(), 30);
    tree.validate().unwrap();
}

#[test]
fn test_point_operations_between_sweeps() {
    let tree = build_tree(3, 0..50);
    assert_eq!(tree.get(&7).unwrap(), Some(70));
    assert_eq!(tree.insert(7, 1).unwrap(), Some(70));
    assert_eq!(tree.remove(&8).unwrap(), Some(80));
    assert!(!tree.contains_key(&8).unwrap());

    let removed = drain(&tree, |k| *k < 10, Direction::Backward);
    assert_eq!(removed.first(), Some(&(9, 90)));
    assert!(removed.contains(&(7, 1)));
    assert_eq!(tree.first_key_value().unwrap(), Some((10, 100)));
    assert_eq!(tree.last_key_value().unwrap(), Some((49, 490)));
    tree.validate().unwrap();
}
