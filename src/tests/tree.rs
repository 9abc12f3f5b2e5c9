// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{random_keys, tree_of_strs};
use crate::Tree;

#[test]
fn insert_then_get_round_trips() {
    let tree: Tree<u32> = Tree::new();
    let mut txn = tree.txn();
    assert_eq!(txn.insert(b"foo", 1), None);
    assert_eq!(txn.insert(b"bar", 2), None);
    assert_eq!(txn.insert(b"", 3), None);
    let tree = txn.commit();

    assert_eq!(tree.size(), 3);
    assert_eq!(tree.get(b"foo"), Some(&1));
    assert_eq!(tree.get(b"bar"), Some(&2));
    assert_eq!(tree.get(b""), Some(&3));
    assert_eq!(tree.get(b"baz"), None);
    assert_eq!(tree.get(b"fo"), None);
    assert_eq!(tree.get(b"fooo"), None);
}

#[test]
fn insert_returns_prior_value() {
    let tree: Tree<u32> = Tree::new();
    let mut txn = tree.txn();
    assert_eq!(txn.insert(b"k", 1), None);
    assert_eq!(txn.insert(b"k", 2), Some(1));
    let tree = txn.commit();
    assert_eq!(tree.size(), 1);
    assert_eq!(tree.get(b"k"), Some(&2));

    // Also across commits.
    let mut txn = tree.txn();
    assert_eq!(txn.insert(b"k", 3), Some(2));
    assert_eq!(txn.commit().get(b"k"), Some(&3));
}

#[test]
fn delete_restores_size_and_absence() {
    let tree = tree_of_strs(&["a", "b", "c"]);
    let before = tree.size();

    let mut txn = tree.txn();
    assert_eq!(txn.insert(b"d", 99), None);
    assert_eq!(txn.delete(b"d"), Some(99));
    let after = txn.commit();

    assert_eq!(after.size(), before);
    assert_eq!(after.get(b"d"), None);

    let mut txn = after.txn();
    assert_eq!(txn.delete(b"missing"), None);
    assert_eq!(txn.delete(b"a"), Some(0));
    let after = txn.commit();
    assert_eq!(after.size(), before - 1);
    assert_eq!(after.get(b"a"), None);
    assert_eq!(after.get(b"b"), Some(&1));
}

#[test]
fn persistence_across_commits() {
    let t0: Tree<u32> = Tree::new();
    let mut txn = t0.txn();
    txn.insert(b"stable", 1);
    let t1 = txn.commit();

    let mut txn = t1.txn();
    txn.insert(b"stable", 2);
    txn.insert(b"new", 3);
    let t2 = txn.commit();

    // The predecessor is untouched.
    assert_eq!(t0.size(), 0);
    assert_eq!(t0.get(b"stable"), None);
    assert_eq!(t1.size(), 1);
    assert_eq!(t1.get(b"stable"), Some(&1));
    assert_eq!(t1.get(b"new"), None);
    assert_eq!(t2.get(b"stable"), Some(&2));
    assert_eq!(t2.get(b"new"), Some(&3));
}

#[test]
fn single_insert_allocates_a_path_not_a_tree() {
    let mut rng = StdRng::from_seed([7; 32]);
    let keys = random_keys(&mut rng, 1000, 24);
    let tree: Tree<usize> = Tree::new();
    let mut txn = tree.txn();
    for (i, key) in keys.iter().enumerate() {
        txn.insert(key, i);
    }
    let tree = txn.commit();

    // Node ids are allocated once per created node, so the counter doubles
    // as an allocation counter: one more insert may only create nodes along
    // one root-to-leaf path.
    let before = tree.ids.load(Ordering::Relaxed);
    let mut txn = tree.txn();
    txn.insert(b"one-more-key", usize::MAX);
    let tree = txn.commit();
    let allocated = tree.ids.load(Ordering::Relaxed) - before;
    assert!(
        allocated <= 64,
        "single insert allocated {} nodes",
        allocated
    );
    assert_eq!(tree.get(b"one-more-key"), Some(&usize::MAX));
}

#[test]
fn longest_prefix_scenario() {
    let tree = tree_of_strs(&["foo", "foobar", "foobarbaz", "foozip"]);

    let hit = |q: &str| {
        tree.longest_prefix(q.as_bytes())
            .map(|(k, _)| String::from_utf8(k.to_vec()).unwrap())
    };
    assert_eq!(hit("foobarx").as_deref(), Some("foobar"));
    assert_eq!(hit("foozipzap").as_deref(), Some("foozip"));
    assert_eq!(hit("foobarbaz").as_deref(), Some("foobarbaz"));
    assert_eq!(hit("foobarba").as_deref(), Some("foobar"));
    assert_eq!(hit("foo").as_deref(), Some("foo"));
    assert_eq!(hit("fo"), None);
    assert_eq!(hit("abc"), None);
}

#[test]
fn longest_prefix_with_empty_key() {
    let tree = tree_of_strs(&["", "a", "ab"]);
    // The empty key is a prefix of everything.
    assert_eq!(tree.longest_prefix(b"zzz").map(|(k, _)| k.len()), Some(0));
    assert_eq!(
        tree.longest_prefix(b"abx").map(|(k, _)| k.to_vec()),
        Some(b"ab".to_vec())
    );
}

#[test]
fn longest_prefix_oracle() {
    let mut rng = StdRng::from_seed([3; 32]);
    let keys = random_keys(&mut rng, 300, 6);
    let mut oracle = BTreeMap::new();
    let tree: Tree<usize> = Tree::new();
    let mut txn = tree.txn();
    for (i, key) in keys.iter().enumerate() {
        txn.insert(key, i);
        oracle.insert(key.clone(), i);
    }
    let tree = txn.commit();

    let queries = random_keys(&mut rng, 300, 8);
    for q in &queries {
        let expect = oracle
            .iter()
            .filter(|(k, _)| q.starts_with(k))
            .max_by_key(|(k, _)| k.len())
            .map(|(k, v)| (k.clone(), *v));
        let got = tree.longest_prefix(q).map(|(k, v)| (k.to_vec(), *v));
        assert_eq!(got, expect, "query {:02x?}", q);
    }
}

#[test]
fn minimum_and_maximum() {
    let tree: Tree<usize> = Tree::new();
    assert_eq!(tree.minimum(), None);
    assert_eq!(tree.maximum(), None);

    let tree = tree_of_strs(&["m", "zz", "a", "ab", ""]);
    assert_eq!(tree.minimum().map(|(k, _)| k.to_vec()), Some(b"".to_vec()));
    assert_eq!(tree.maximum().map(|(k, _)| k.to_vec()), Some(b"zz".to_vec()));

    let mut txn = tree.txn();
    txn.delete(b"");
    txn.delete(b"zz");
    let tree = txn.commit();
    assert_eq!(tree.minimum().map(|(k, _)| k.to_vec()), Some(b"a".to_vec()));
    assert_eq!(tree.maximum().map(|(k, _)| k.to_vec()), Some(b"m".to_vec()));
}

#[test]
fn keys_containing_the_terminator_byte() {
    // Keys with interior 0x00 exercise the embedded-leaf slot.
    let keys: Vec<&[u8]> = vec![b"a", b"a\x00b", b"a\x00", b"a\x00b\x00c", b"ab"];
    let tree = super::tree_of(&keys);
    assert_eq!(tree.size(), 5);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(tree.get(key), Some(&i), "key {:02x?}", key);
    }
    assert_eq!(tree.get(b"a\x00b\x00"), None);

    // Order is still the user byte order.
    let collected: Vec<Vec<u8>> = tree.root().iterator().map(|(k, _)| k).collect();
    let mut expect: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
    expect.sort();
    assert_eq!(collected, expect);

    assert_eq!(
        tree.longest_prefix(b"a\x00b\x00cd").map(|(k, _)| k.to_vec()),
        Some(b"a\x00b\x00c".to_vec())
    );
}

#[test]
fn random_ops_match_btreemap() {
    let mut rng = StdRng::from_seed([1; 32]);
    let universe = random_keys(&mut rng, 120, 5);
    let mut oracle: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
    let mut tree: Tree<usize> = Tree::new();

    for round in 0..400 {
        let key = &universe[round % universe.len()];
        let mut txn = tree.txn();
        if round % 3 == 2 {
            assert_eq!(txn.delete(key), oracle.remove(key), "round {}", round);
        } else {
            assert_eq!(
                txn.insert(key, round),
                oracle.insert(key.clone(), round),
                "round {}",
                round
            );
        }
        tree = txn.commit();

        assert_eq!(tree.size() as usize, oracle.len());
        assert_eq!(tree.get(key), oracle.get(key));
    }

    let collected: Vec<(Vec<u8>, usize)> = tree.root().iterator().collect();
    let expect: Vec<(Vec<u8>, usize)> = oracle.into_iter().collect();
    assert_eq!(collected, expect);
}
