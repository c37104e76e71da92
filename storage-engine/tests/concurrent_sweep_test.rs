use std::collections::HashSet;
use std::thread;

use storage_engine::Direction;
use test_case::test_case;

mod common_test_funcs;

use common_test_funcs::{build_tree, keys_of, scrambled};

const NUM_KEYS: u64 = 100_000;

#[test_case(Direction::Forward, 64 ; "forward default pages")]
#[test_case(Direction::Backward, 64 ; "backward default pages")]
#[test_case(Direction::Forward, 4 ; "forward small pages")]
#[test_case(Direction::Backward, 4 ; "backward small pages")]
fn test_sweep_evens_while_removing_odds(direction: Direction, max_per_page: usize) {
    let tree = build_tree(max_per_page, scrambled(NUM_KEYS));

    let swept = thread::scope(|s| {
        let remover = s.spawn(|| {
            for k in (1..NUM_KEYS).step_by(2) {
                assert_eq!(tree.remove(&k).unwrap(), Some(k * 10));
            }
        });
        let sweeper = s.spawn(|| {
            tree.sweep(|entry| entry.key() % 2 == 0, direction)
                .map(|entry| entry.unwrap().0)
                .collect::<Vec<u64>>()
        });
        remover.join().unwrap();
        sweeper.join().unwrap()
    });

    let mut expected: Vec<u64> = (0..NUM_KEYS).step_by(2).collect();
    if direction == Direction::Backward {
        expected.reverse();
    }
    assert_eq!(swept, expected);
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    tree.validate().unwrap();
}

#[test_case(Direction::Forward, 64 ; "forward default pages")]
#[test_case(Direction::Backward, 64 ; "backward default pages")]
#[test_case(Direction::Forward, 4 ; "forward small pages")]
fn test_sweep_evens_while_removing_odds_descending(direction: Direction, max_per_page: usize) {
    let tree = build_tree(max_per_page, scrambled(NUM_KEYS));

    let swept = thread::scope(|s| {
        let remover = s.spawn(|| {
            for k in (1..NUM_KEYS).rev().step_by(2) {
                assert_eq!(tree.remove(&k).unwrap(), Some(k * 10));
            }
        });
        let sweeper = s.spawn(|| {
            tree.sweep(|entry| entry.key() % 2 == 0, direction)
                .map(|entry| entry.unwrap().0)
                .collect::<Vec<u64>>()
        });
        remover.join().unwrap();
        sweeper.join().unwrap()
    });

    let mut expected: Vec<u64> = (0..NUM_KEYS).step_by(2).collect();
    if direction == Direction::Backward {
        expected.reverse();
    }
    assert_eq!(swept, expected);
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    tree.validate().unwrap();
}

#[test_case(Direction::Forward)]
#[test_case(Direction::Backward)]
fn test_sweep_races_remove_all(direction: Direction) {
    let tree = build_tree(8, scrambled(NUM_KEYS));

    let (swept, removed) = thread::scope(|s| {
        let remover = s.spawn(|| {
            (0..NUM_KEYS)
                .filter(|k| tree.remove(k).unwrap().is_some())
                .collect::<Vec<u64>>()
        });
        let sweeper = s.spawn(|| {
            tree.sweep(|entry| entry.key() % 2 == 0, direction)
                .map(|entry| entry.unwrap().0)
                .collect::<Vec<u64>>()
        });
        (sweeper.join().unwrap(), remover.join().unwrap())
    });

    // Every key is removed exactly once, by one side or the other.
    assert!(swept.iter().all(|k| k % 2 == 0));
    let swept: HashSet<u64> = swept.into_iter().collect();
    let removed: HashSet<u64> = removed.into_iter().collect();
    assert!(swept.is_disjoint(&removed));
    assert_eq!(swept.len() + removed.len(), NUM_KEYS as usize);
    assert!(tree.is_empty());
    tree.validate().unwrap();
}

#[test]
fn test_sweep_with_concurrent_inserts() {
    let tree = build_tree(6, scrambled(20_000));

    let swept = thread::scope(|s| {
        let inserter = s.spawn(|| {
            for k in (20_001..40_000).step_by(2) {
                tree.insert(k, k * 10).unwrap();
            }
        });
        let sweeper = s.spawn(|| {
            tree.sweep(|entry| entry.key() % 2 == 0, Direction::Forward)
                .map(|entry| entry.unwrap().0)
                .collect::<Vec<u64>>()
        });
        inserter.join().unwrap();
        sweeper.join().unwrap()
    });

    assert_eq!(swept, (0..20_000).step_by(2).collect::<Vec<u64>>());
    let expected: Vec<u64> = (1..20_000).step_by(2).chain((20_001..40_000).step_by(2)).collect();
    assert_eq!(keys_of(&tree), expected);
    tree.validate().unwrap();
}

#[test]
fn test_opposing_sweeps() {
    let tree = build_tree(5, scrambled(30_000));

    let (by_two, by_three) = thread::scope(|s| {
        let forward = s.spawn(|| {
            tree.sweep(|entry| entry.key() % 2 == 0, Direction::Forward)
                .map(|entry| entry.unwrap().0)
                .collect::<Vec<u64>>()
        });
        let backward = s.spawn(|| {
            tree.sweep(|entry| entry.key() % 3 == 0, Direction::Backward)
                .map(|entry| entry.unwrap().0)
                .collect::<Vec<u64>>()
        });
        (forward.join().unwrap(), backward.join().unwrap())
    });

    assert!(by_two.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(by_three.windows(2).all(|pair| pair[0] > pair[1]));

    let by_two: HashSet<u64> = by_two.into_iter().collect();
    let by_three: HashSet<u64> = by_three.into_iter().collect();
    assert!(by_two.is_disjoint(&by_three));

    let removed: HashSet<u64> = by_two.union(&by_three).copied().collect();
    let expected: HashSet<u64> = (0..30_000).filter(|k| k % 2 == 0 || k % 3 == 0).collect();
    assert_eq!(removed, expected);
    assert!(keys_of(&tree).iter().all(|k| k % 2 != 0 && k % 3 != 0));
    tree.validate().unwrap();
}

#[test]
fn test_point_operations_from_many_threads() {
    let tree = build_tree(4, 0..0);

    thread::scope(|s| {
        for t in 0..8u64 {
            let tree = &tree;
            s.spawn(move || {
                for k in (t..4_000).step_by(8) {
                    tree.insert(k, k * 10).unwrap();
                }
                for k in (t..4_000).step_by(16) {
                    assert_eq!(tree.remove(&k).unwrap(), Some(k * 10));
                }
            });
        }
    });

    let expected: Vec<u64> = (0..4_000).filter(|k| k % 16 >= 8).collect();
    assert_eq!(keys_of(&tree), expected);
    tree.validate().unwrap();
}
