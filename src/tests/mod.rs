// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

mod node_type;
mod tree;

use rand::rngs::StdRng;
use rand::Rng;

use crate::Tree;

/// Deterministic byte-string keys of mixed lengths; duplicates possible.
pub(crate) fn random_keys(rng: &mut StdRng, count: usize, max_len: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|_| {
            let len = rng.gen_range(0..=max_len);
            (0..len).map(|_| rng.gen::<u8>()).collect()
        })
        .collect()
}

/// A committed tree mapping each key to its index.
pub(crate) fn tree_of(keys: &[&[u8]]) -> Tree<usize> {
    let tree = Tree::new();
    let mut txn = tree.txn();
    for (i, key) in keys.iter().enumerate() {
        txn.insert(key, i);
    }
    txn.commit()
}

/// Same as [`tree_of`] for string keys, the form most scenarios use.
pub(crate) fn tree_of_strs(keys: &[&str]) -> Tree<usize> {
    let keys: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
    tree_of(&keys)
}
