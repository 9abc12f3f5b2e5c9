// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use crate::node_type::{Node, NodePtr};

fn leaf(id: u64, byte: u8) -> NodePtr<u64> {
    Arc::new(Node::new_leaf(id, vec![1, byte, 0], id))
}

fn leaf_value(n: &Node<u64>) -> u64 {
    *n.as_leaf().expect("leaf node").value()
}

#[test]
fn node4_add_find_remove() {
    let mut n: Node<u64> = Node::new_inner4(100);
    for (i, b) in [5u8, 3, 9, 7].into_iter().enumerate() {
        n.add_child(b, leaf(i as u64, b));
    }
    assert_eq!(n.kind_name(), "node4");
    assert_eq!(n.num_children(), 4);

    for b in [3u8, 5, 7, 9] {
        assert!(n.find_child(b).is_some(), "byte {}", b);
    }
    assert!(n.find_child(4).is_none());

    // Sorted regardless of insertion order.
    let bytes: Vec<u8> = n.children().map(|(b, _)| b).collect();
    assert_eq!(bytes, vec![3, 5, 7, 9]);

    let removed = n.remove_child(5);
    assert_eq!(leaf_value(&removed), 0);
    assert_eq!(n.num_children(), 3);
    assert!(n.find_child(5).is_none());
    let bytes: Vec<u8> = n.children().map(|(b, _)| b).collect();
    assert_eq!(bytes, vec![3, 7, 9]);
}

#[test]
fn lower_bound_byte_per_kind() {
    // Drive one node through all four kinds, probing the bound at each.
    // Filler children live above 200 so they never shadow the probes.
    let mut n: Node<u64> = Node::new_inner4(100);
    for (i, b) in [2u8, 40, 90, 200].into_iter().enumerate() {
        n.add_child(b, leaf(i as u64, b));
    }
    fn probe(n: &Node<u64>) {
        assert_eq!(n.lower_bound_byte(0), Some(2));
        assert_eq!(n.lower_bound_byte(2), Some(2));
        assert_eq!(n.lower_bound_byte(3), Some(40));
        assert_eq!(n.lower_bound_byte(41), Some(90));
        assert_eq!(n.lower_bound_byte(91), Some(200));
    }

    assert_eq!(n.kind_name(), "node4");
    probe(&n);
    assert_eq!(n.lower_bound_byte(201), None);

    let mut filler = 202u16;
    let grow_to = |n: &mut Node<u64>, count: usize, filler: &mut u16| {
        while n.num_children() < count {
            n.add_child(*filler as u8, leaf(u64::from(*filler), *filler as u8));
            *filler += 1;
        }
    };

    grow_to(&mut n, 5, &mut filler);
    assert_eq!(n.kind_name(), "node16");
    probe(&n);
    grow_to(&mut n, 17, &mut filler);
    assert_eq!(n.kind_name(), "node48");
    probe(&n);
    grow_to(&mut n, 49, &mut filler);
    assert_eq!(n.kind_name(), "node256");
    probe(&n);
    assert_eq!(n.lower_bound_byte(filler as u8), None);
}

#[test]
fn grows_through_every_kind_in_order() {
    let mut n: Node<u64> = Node::new_inner4(100);
    for b in 0u16..256 {
        n.add_child(b as u8, leaf(u64::from(b), b as u8));
        let expect = match n.num_children() {
            0..=4 => "node4",
            5..=16 => "node16",
            17..=48 => "node48",
            _ => "node256",
        };
        assert_eq!(n.kind_name(), expect, "at {} children", n.num_children());
    }
    // Every child is still reachable and in order after three upgrades.
    let bytes: Vec<u8> = n.children().map(|(b, _)| b).collect();
    assert_eq!(bytes, (0u16..256).map(|b| b as u8).collect::<Vec<u8>>());
    for b in 0u16..256 {
        assert_eq!(leaf_value(n.find_child(b as u8).unwrap()), u64::from(b));
    }
}

#[test]
fn shrinks_at_the_hysteresis_thresholds() {
    let mut n: Node<u64> = Node::new_inner4(100);
    for b in 0u16..256 {
        n.add_child(b as u8, leaf(u64::from(b), b as u8));
    }
    assert_eq!(n.kind_name(), "node256");

    let mut next = 255u16;
    let mut remove_down_to = |n: &mut Node<u64>, count: usize| {
        while n.num_children() > count {
            n.remove_child(next as u8);
            next -= 1;
        }
    };

    remove_down_to(&mut n, 38);
    assert_eq!(n.kind_name(), "node256");
    remove_down_to(&mut n, 37);
    assert_eq!(n.kind_name(), "node48");

    remove_down_to(&mut n, 13);
    assert_eq!(n.kind_name(), "node48");
    remove_down_to(&mut n, 12);
    assert_eq!(n.kind_name(), "node16");

    remove_down_to(&mut n, 4);
    assert_eq!(n.kind_name(), "node16");
    remove_down_to(&mut n, 3);
    assert_eq!(n.kind_name(), "node4");

    // The survivors are untouched by three downgrades.
    let bytes: Vec<u8> = n.children().map(|(b, _)| b).collect();
    assert_eq!(bytes, vec![0, 1, 2]);
    for b in 0u8..3 {
        assert_eq!(leaf_value(n.find_child(b).unwrap()), u64::from(b));
    }
}

#[test]
fn compressed_path_window_and_recovery() {
    let mut n: Node<u64> = Node::new_inner4(100);
    let long: Vec<u8> = (0u8..20).collect();
    n.set_partial(&long);
    assert_eq!(n.partial_len(), 20);
    // Only the window is stored.
    assert_eq!(n.stored_partial(), &long[..crate::MAX_PREFIX_LEN]);

    // A leaf whose key spells the whole path lets the node recover the
    // overflow bytes.
    let mut key = long.clone();
    key.push(42);
    key.push(0);
    n.add_child(42, Arc::new(Node::new_leaf(7, key, 7)));
    assert_eq!(n.read_partial(0), long.as_slice());

    // match_len sees the recovered bytes, not just the window.
    let mut probe = long.clone();
    probe[15] ^= 0xff;
    probe.push(0);
    assert_eq!(n.match_len(&probe, 0), 15);
    let mut exact = long.clone();
    exact.push(0);
    assert_eq!(n.match_len(&exact, 0), 20);
}

#[test]
fn minimum_prefers_the_embedded_leaf() {
    let mut n: Node<u64> = Node::new_inner4(100);
    n.set_partial(&[1, b'a', 0]);
    n.add_child(b'x', leaf(1, b'x'));
    n.add_child(b'q', leaf(2, b'q'));
    assert_eq!(*n.minimum_leaf().unwrap().value(), 2);

    let embedded = Arc::new(crate::LeafNode::new(9, vec![1, b'a', 0], 9));
    n.set_embedded_leaf(embedded);
    assert_eq!(*n.minimum_leaf().unwrap().value(), 9);
    // The maximum ignores the embedded leaf while children exist.
    assert_eq!(*n.maximum_leaf().unwrap().value(), 1);
}

proptest! {
    #[test]
    fn child_ops_agree_with_a_btree_set(
        bytes in prop::collection::btree_set(any::<u8>(), 1..200usize),
        probes in prop::collection::vec(any::<u8>(), 16),
    ) {
        let mut n: Node<u64> = Node::new_inner4(100);
        // Insertion order must not matter, so feed the sorted set reversed.
        for &b in bytes.iter().rev() {
            n.add_child(b, leaf(u64::from(b), b));
        }
        prop_assert_eq!(n.num_children(), bytes.len());

        let listed: Vec<u8> = n.children().map(|(b, _)| b).collect();
        let expect: Vec<u8> = bytes.iter().copied().collect();
        prop_assert_eq!(&listed, &expect);

        for &p in &probes {
            prop_assert_eq!(n.find_child(p).is_some(), bytes.contains(&p));
            let bound = bytes.range(p..).next().copied();
            prop_assert_eq!(n.lower_bound_byte(p), bound, "probe {}", p);
        }

        // Dropping every other child must keep the survivors ordered and
        // reachable through any downgrades it triggers.
        let mut survivors = BTreeSet::new();
        for (i, &b) in bytes.iter().enumerate() {
            if i % 2 == 0 {
                let removed = n.remove_child(b);
                prop_assert_eq!(leaf_value(&removed), u64::from(b));
            } else {
                survivors.insert(b);
            }
        }
        let listed: Vec<u8> = n.children().map(|(b, _)| b).collect();
        let expect: Vec<u8> = survivors.iter().copied().collect();
        prop_assert_eq!(&listed, &expect);
        for &p in &probes {
            let bound = survivors.range(p..).next().copied();
            prop_assert_eq!(n.lower_bound_byte(p), bound, "probe {}", p);
        }
    }
}

#[test]
fn clone_for_write_shares_children_but_not_identity() {
    let mut n: Node<u64> = Node::new_inner4(100);
    n.add_child(b'a', leaf(1, b'a'));
    n.add_child(b'b', leaf(2, b'b'));

    let clone = n.clone_for_write(777);
    assert_eq!(clone.id(), 777);
    assert_ne!(n.id(), clone.id());
    assert_eq!(clone.num_children(), 2);
    // Children are shared by pointer, not copied.
    let orig_child = n.find_child(b'a').unwrap();
    let clone_child = clone.find_child(b'a').unwrap();
    assert!(Arc::ptr_eq(orig_child, clone_child));
    // The watch cell is fresh: closing the original's does not fire the
    // clone's.
    let w = clone.watch().watch();
    n.watch().close();
    assert!(!w.has_fired());
}
