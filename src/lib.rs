// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

//! A persistent (copy-on-write) adaptive radix tree keyed by byte strings.
//!
//! [`Tree`] is an immutable value: every successful mutation goes through a
//! [`Txn`] and produces a *new* tree that shares all unchanged subtrees with
//! its predecessor. Published trees can be read, iterated and subscribed to
//! from any number of threads; a transaction is a single-writer object.
//!
//! Beyond point lookups the tree supports longest-prefix matching, ordered
//! and reverse iteration with lower-bound seeks, prefix seeks, subtree
//! deletion, and per-position *watch channels*: one-shot signals that fire
//! when a committed transaction mutates the position they were taken from.
//!
//! ```
//! use iradix::Tree;
//!
//! let tree: Tree<u32> = Tree::new();
//! let mut txn = tree.txn();
//! txn.insert(b"foo", 1);
//! txn.insert(b"foobar", 2);
//! let tree2 = txn.commit();
//!
//! assert_eq!(tree.size(), 0); // the original is untouched
//! assert_eq!(tree2.get(b"foo"), Some(&1));
//! assert_eq!(
//!     tree2.longest_prefix(b"foobarbaz").map(|(k, v)| (k.to_vec(), *v)),
//!     Some((b"foobar".to_vec(), 2)),
//! );
//! ```
//!
//! # Key framing
//!
//! Internally every key is wrapped with a leading sentinel byte and a
//! trailing terminator byte. The terminator sorts at-or-below every user
//! byte, so framed keys order exactly as user keys do, and it turns "one
//! key is a prefix of another" into an ordinary tree shape instead of a
//! special case. All inputs are framed on entry and unframed on exit;
//! callers never see sentinel bytes.

mod iterator;
mod node_type;
mod transaction;
mod watch;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::node_type::{Node, NodePtr};
use crate::watch::WatchCell;

pub use crate::iterator::{
    LowerBoundIterator, PathIterator, RawEntry, RawIterator, ReverseIterator, TreeIterator,
};
pub use crate::node_type::{LeafNode, MAX_PREFIX_LEN};
pub use crate::transaction::{Txn, DEFAULT_TRACK_CAPACITY, DEFAULT_WRITABLE_CACHE};
pub use crate::watch::Watch;

/// Leading sentinel of every framed key.
pub(crate) const KEY_SENTINEL: u8 = 0x01;
/// Trailing terminator of every framed key. Chosen to sort at-or-below any
/// user byte so framed order equals user order.
pub(crate) const KEY_TERMINATOR: u8 = 0x00;

/// Wrap a user key for storage and exact lookups.
pub(crate) fn frame_key(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 2);
    out.push(KEY_SENTINEL);
    out.extend_from_slice(key);
    out.push(KEY_TERMINATOR);
    out
}

/// Wrap a user prefix for seeks: sentinel but no terminator, so it compares
/// against the interior of framed keys.
pub(crate) fn frame_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 1);
    out.push(KEY_SENTINEL);
    out.extend_from_slice(prefix);
    out
}

/// An immutable radix tree value.
///
/// Cloning a tree is O(1) and shares the whole structure. Mutation happens
/// through [`Tree::txn`].
#[derive(Debug)]
pub struct Tree<V> {
    pub(crate) root: NodePtr<V>,
    pub(crate) size: u64,
    /// Allocator for node ids, shared by every tree and transaction in this
    /// tree's lineage. A fresh id is the proof that a node was cloned.
    pub(crate) ids: Arc<AtomicU64>,
}

impl<V> Clone for Tree<V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            size: self.size,
            ids: self.ids.clone(),
        }
    }
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Tree<V> {
    /// An empty tree.
    pub fn new() -> Self {
        let ids = Arc::new(AtomicU64::new(1));
        let root = Arc::new(Node::Empty(node_type::EmptyNode::new(0)));
        Self {
            root,
            size: 0,
            ids,
        }
    }

    /// Number of keys stored.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Look up `key`.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let framed = frame_key(key);
        search_leaf(&self.root, &framed).map(|l| l.value())
    }

    /// Look up `key`, also returning a watch that fires when the answer
    /// could change.
    ///
    /// On a hit the watch is the leaf's own channel. On a miss it is the
    /// channel of the deepest node whose compressed path fully matched the
    /// query, the finest position a write affecting this key would have to
    /// touch. If the query diverges before matching any node, no position
    /// in the tree is on its path and the returned watch never fires.
    pub fn get_watch(&self, key: &[u8]) -> (Option<&V>, Watch) {
        let framed = frame_key(key);
        let mut n = &self.root;
        let mut depth = 0usize;
        let mut matched: Option<&Arc<WatchCell>> = None;
        loop {
            match &**n {
                Node::Empty(_) => {
                    // The placeholder is replaced (and notified) by the
                    // first insert.
                    return (None, n.watch().watch());
                }
                Node::Leaf(l) => {
                    if l.key() == framed.as_slice() {
                        return (Some(l.value()), l.watch().watch());
                    }
                    return (None, miss_watch(matched));
                }
                _ => {
                    let plen = n.partial_len();
                    if plen > 0 && n.match_len(&framed, depth) < plen {
                        return (None, miss_watch(matched));
                    }
                    depth += plen;
                    matched = Some(n.watch());
                    if depth >= framed.len() {
                        if let Some(l) = n.embedded_leaf() {
                            if l.key() == framed.as_slice() {
                                return (Some(l.value()), l.watch().watch());
                            }
                        }
                        return (None, miss_watch(matched));
                    }
                    match n.find_child(framed[depth]) {
                        Some(child) => {
                            n = child;
                            depth += 1;
                        }
                        None => return (None, miss_watch(matched)),
                    }
                }
            }
        }
    }

    /// The longest stored key that is a prefix of `query`, with its value.
    pub fn longest_prefix(&self, query: &[u8]) -> Option<(&[u8], &V)> {
        let sq = frame_prefix(query);
        // Candidates are collected generously along the descent and each is
        // verified with an unframed starts-with test, so terminator bytes
        // inside keys cannot produce false positives. They arrive shallow to
        // deep, so the last one recorded is the longest.
        let mut best: Option<&Arc<LeafNode<V>>> = None;
        let mut n = &self.root;
        let mut depth = 0usize;
        loop {
            match &**n {
                Node::Empty(_) => break,
                Node::Leaf(l) => {
                    if query.starts_with(l.user_key()) {
                        best = Some(l);
                    }
                    break;
                }
                _ => {
                    let plen = n.partial_len();
                    if plen > 0 && n.match_len(&sq, depth) < plen {
                        // Divergence inside the compressed path. The node's
                        // embedded leaf can still qualify when the diverging
                        // byte is its terminator.
                        if let Some(l) = n.embedded_leaf() {
                            if query.starts_with(l.user_key()) {
                                best = Some(l);
                            }
                        }
                        break;
                    }
                    depth += plen;
                    if let Some(l) = n.embedded_leaf() {
                        if query.starts_with(l.user_key()) {
                            best = Some(l);
                        }
                    }
                    // The key ending exactly at this position sits under the
                    // terminator edge, off the descent path; it is the
                    // minimum of that subtree.
                    if depth >= sq.len() || sq[depth] != KEY_TERMINATOR {
                        if let Some(l) = n
                            .find_child(KEY_TERMINATOR)
                            .and_then(|c| c.minimum_leaf())
                        {
                            if query.starts_with(l.user_key()) {
                                best = Some(l);
                            }
                        }
                    }
                    if depth >= sq.len() {
                        break;
                    }
                    match n.find_child(sq[depth]) {
                        Some(child) => {
                            n = child;
                            depth += 1;
                        }
                        None => break,
                    }
                }
            }
        }
        best.map(|l| (l.user_key(), l.value()))
    }

    /// The smallest key in the tree.
    pub fn minimum(&self) -> Option<(&[u8], &V)> {
        self.root.minimum_leaf().map(|l| (l.user_key(), l.value()))
    }

    /// The largest key in the tree.
    pub fn maximum(&self) -> Option<(&[u8], &V)> {
        self.root.maximum_leaf().map(|l| (l.user_key(), l.value()))
    }

    /// A handle on the current root for opening iterators.
    pub fn root(&self) -> Root<V> {
        Root {
            node: self.root.clone(),
        }
    }
}

/// Allocate a fresh node id from a lineage's shared counter.
pub(crate) fn next_id(ids: &AtomicU64) -> u64 {
    ids.fetch_add(1, Ordering::Relaxed)
}

impl<V: Clone> Tree<V> {
    /// Open a write transaction against the current root.
    pub fn txn(&self) -> Txn<V> {
        Txn::new(self)
    }
}

fn miss_watch(matched: Option<&Arc<WatchCell>>) -> Watch {
    match matched {
        Some(cell) => cell.watch(),
        None => Watch::never(),
    }
}

/// Exact-match descent; returns the leaf holding `framed` if present.
pub(crate) fn search_leaf<'a, V>(
    root: &'a NodePtr<V>,
    framed: &[u8],
) -> Option<&'a Arc<LeafNode<V>>> {
    let mut n = root;
    let mut depth = 0usize;
    loop {
        match &**n {
            Node::Empty(_) => return None,
            Node::Leaf(l) => {
                return (l.key() == framed).then_some(l);
            }
            _ => {
                let plen = n.partial_len();
                if plen > 0 && n.match_len(framed, depth) < plen {
                    return None;
                }
                depth += plen;
                if depth >= framed.len() {
                    return n.embedded_leaf().filter(|l| l.key() == framed);
                }
                match n.find_child(framed[depth]) {
                    Some(child) => {
                        n = child;
                        depth += 1;
                    }
                    None => return None,
                }
            }
        }
    }
}

/// A snapshot handle used to open iterators. Holds the root alive, so the
/// iterators it produces may outlive the [`Tree`] value they came from.
#[derive(Debug, Clone)]
pub struct Root<V> {
    pub(crate) node: NodePtr<V>,
}

impl<V: Clone> Root<V> {
    /// Forward iterator over the whole tree in ascending key order.
    pub fn iterator(&self) -> TreeIterator<V> {
        TreeIterator::new(self.node.clone())
    }

    /// Forward iterator that can be positioned with a lower-bound seek.
    pub fn lower_bound_iterator(&self) -> LowerBoundIterator<V> {
        LowerBoundIterator::new(self.node.clone())
    }

    /// Descending iterator that can be positioned with a reverse
    /// lower-bound seek.
    pub fn reverse_iterator(&self) -> ReverseIterator<V> {
        ReverseIterator::new(self.node.clone())
    }

    /// Iterator over the stored keys that are prefixes of `path`, shortest
    /// first.
    pub fn path_iterator(&self, path: &[u8]) -> PathIterator<V> {
        PathIterator::new(self.node.clone(), path)
    }

    /// Structural iterator emitting inner nodes as well as leaves along
    /// with their effective paths.
    pub fn raw_iterator(&self) -> RawIterator<V> {
        RawIterator::new(self.node.clone())
    }
}
