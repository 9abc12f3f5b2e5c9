// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transactional copy-on-write mutation.
//!
//! A [`Txn`] snapshots a tree's root and size and buffers an arbitrary
//! number of inserts and deletes before publishing a new immutable tree.
//! Writes never touch published nodes: the first write under a node clones
//! it (fresh id, fresh watch cell) and the clone's id goes into a bounded
//! *writable cache*, so later writes to the same logical node reuse the
//! clone. Cache eviction merely costs an extra clone; it can never produce
//! a wrong tree.
//!
//! With mutation tracking enabled, every pre-transaction node whose
//! position is disturbed is remembered (up to a capacity), and `notify`
//! closes the watch channels of those positions. Past the capacity the
//! transaction falls back to a structural diff of the old and new roots.

use std::num::NonZeroUsize;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::{EitherOrBoth, Itertools};
use lru::LruCache;
use tracing::{debug, trace};

use crate::iterator::RawIterator;
use crate::node_type::{EmptyNode, LeafNode, Node, NodePtr, MAX_PREFIX_LEN};
use crate::watch::WatchCell;
use crate::{frame_key, frame_prefix, next_id, search_leaf, Tree};

/// Default capacity of the writable cache.
pub const DEFAULT_WRITABLE_CACHE: usize = 8192;
/// Default number of positions remembered for notification before the
/// transaction falls back to the structural diff.
pub const DEFAULT_TRACK_CAPACITY: usize = 8192;

/// Write-path bookkeeping, split out of [`Txn`] so the recursive mutation
/// helpers can borrow it alongside the node slot they rewrite.
struct WriteCtx {
    ids: Arc<AtomicU64>,
    /// Ids of nodes this transaction already owns.
    writable: LruCache<u64, ()>,
    track: bool,
    track_capacity: usize,
    /// Pre-transaction positions to notify, keyed by node id.
    tracked: HashMap<u64, Arc<WatchCell>>,
    track_overflow: bool,
    size: u64,
}

impl WriteCtx {
    fn alloc(&self) -> u64 {
        next_id(&self.ids)
    }

    /// Remember a pre-transaction node so its watchers can be notified.
    fn track(&mut self, id: u64, watch: &Arc<WatchCell>) {
        if !self.track || self.track_overflow {
            return;
        }
        if self.tracked.len() >= self.track_capacity && !self.tracked.contains_key(&id) {
            self.track_overflow = true;
            return;
        }
        self.tracked.entry(id).or_insert_with(|| watch.clone());
    }

    /// Make `slot` safe to mutate in place: if this transaction does not
    /// already own the node, replace it with a clone carrying a fresh id
    /// and watch cell, and remember the original for notification.
    fn make_writable<V: Clone>(&mut self, slot: &mut NodePtr<V>) {
        let id = slot.id();
        if self.writable.get(&id).is_some() {
            return;
        }
        self.track(id, slot.watch());
        let fresh = self.alloc();
        let cloned = slot.clone_for_write(fresh);
        *slot = Arc::new(cloned);
        self.writable.put(fresh, ());
    }

    /// Register a node constructed by this transaction as already writable.
    fn adopt<V>(&mut self, node: &Node<V>) {
        self.writable.put(node.id(), ());
    }
}

/// A write transaction over a [`Tree`].
///
/// Single-writer: advance it from one thread at a time. [`Txn::clone_txn`]
/// forks an independent writer that sees all uncommitted writes made so
/// far. Once committed a transaction is spent; further writes panic.
pub struct Txn<V> {
    root: NodePtr<V>,
    /// The pre-transaction root, kept for the structural-diff notify path.
    snap: NodePtr<V>,
    ctx: WriteCtx,
    committed: bool,
}

impl<V: Clone> Txn<V> {
    pub(crate) fn new(tree: &Tree<V>) -> Self {
        Self {
            root: tree.root.clone(),
            snap: tree.root.clone(),
            ctx: WriteCtx {
                ids: tree.ids.clone(),
                writable: LruCache::new(
                    NonZeroUsize::new(DEFAULT_WRITABLE_CACHE).expect("nonzero"),
                ),
                track: false,
                track_capacity: DEFAULT_TRACK_CAPACITY,
                tracked: HashMap::new(),
                track_overflow: false,
                size: tree.size,
            },
            committed: false,
        }
    }

    /// Number of keys the tree will have if committed now.
    pub fn size(&self) -> u64 {
        self.ctx.size
    }

    /// Enable or disable mutation tracking. Enable it before the writes
    /// whose watchers should be notified.
    pub fn track_mutate(&mut self, on: bool) {
        self.ctx.track = on;
    }

    /// Resize the writable cache. Shrinking evicts; eviction only costs an
    /// extra clone on a later write.
    pub fn set_writable_cache_capacity(&mut self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("nonzero");
        self.ctx.writable.resize(capacity);
    }

    /// Cap the number of tracked positions before notify falls back to the
    /// structural diff.
    pub fn set_track_capacity(&mut self, capacity: usize) {
        self.ctx.track_capacity = capacity;
    }

    /// Read `key` from the transaction's uncommitted root.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let framed = frame_key(key);
        search_leaf(&self.root, &framed).map(|l| l.value())
    }

    /// Insert or replace `key`, returning the previous value if any.
    ///
    /// Panics if the transaction has been committed.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        assert!(!self.committed, "write on a committed transaction");
        let framed = frame_key(key);
        let prev = insert_at(&mut self.ctx, &mut self.root, &framed, value, 0);
        if prev.is_none() {
            self.ctx.size += 1;
        }
        prev
    }

    /// Remove `key`, returning its value if it was present.
    ///
    /// Panics if the transaction has been committed.
    pub fn delete(&mut self, key: &[u8]) -> Option<V> {
        assert!(!self.committed, "write on a committed transaction");
        let framed = frame_key(key);
        // Probe read-only first: a miss must not clone or notify anything.
        search_leaf(&self.root, &framed)?;
        let removed = delete_at(&mut self.ctx, &mut self.root, &framed, 0)?;
        self.ctx.size -= 1;
        Some(removed.value().clone())
    }

    /// Remove every key starting with `prefix`. Returns true if at least
    /// one leaf was removed.
    ///
    /// Panics if the transaction has been committed.
    pub fn delete_prefix(&mut self, prefix: &[u8]) -> bool {
        assert!(!self.committed, "write on a committed transaction");
        let sp = frame_prefix(prefix);
        // Probe read-only first so a miss clones and notifies nothing.
        if !prefix_present(&self.root, &sp, 0) {
            return false;
        }
        let (removed, drop_root) = delete_prefix_at(&mut self.ctx, &mut self.root, &sp, 0);
        if drop_root {
            self.root = Arc::new(Node::Empty(EmptyNode::new(self.ctx.alloc())));
        }
        trace!(removed, "delete_prefix");
        self.ctx.size -= removed;
        removed > 0
    }

    /// Publish the new root and size as an immutable tree without
    /// notifying watchers.
    ///
    /// The transaction is spent afterwards: any further write panics.
    pub fn commit_only(&mut self) -> Tree<V> {
        assert!(!self.committed, "commit on a committed transaction");
        self.committed = true;
        trace!(
            size = self.ctx.size,
            tracked = self.ctx.tracked.len(),
            overflow = self.ctx.track_overflow,
            "commit"
        );
        Tree {
            root: self.root.clone(),
            size: self.ctx.size,
            ids: self.ctx.ids.clone(),
        }
    }

    /// [`Txn::commit_only`] followed by [`Txn::notify`]. The new root is
    /// visible to the caller before any watcher is woken.
    pub fn commit(&mut self) -> Tree<V> {
        let tree = self.commit_only();
        self.notify();
        tree
    }

    /// Close the watch channels of every position this transaction
    /// disturbed. A second call is a no-op, as is notifying with tracking
    /// disabled.
    pub fn notify(&mut self) {
        if !self.ctx.track {
            self.ctx.tracked.clear();
            self.ctx.track_overflow = false;
            return;
        }
        if self.ctx.track_overflow {
            debug!("tracked positions overflowed; notifying via structural diff");
            slow_notify(&self.snap, &self.root);
            self.ctx.track_overflow = false;
            self.ctx.tracked.clear();
            return;
        }
        for (_, cell) in self.ctx.tracked.drain() {
            cell.close();
        }
    }

    /// Fork an independent writer that shares every write made so far.
    ///
    /// Both writers' writable caches are reset, since nodes created up to
    /// this point are now visible to two transactions and must not be
    /// mutated in place by either.
    pub fn clone_txn(&mut self) -> Txn<V> {
        assert!(!self.committed, "clone of a committed transaction");
        self.ctx.writable.clear();
        Txn {
            root: self.root.clone(),
            snap: self.snap.clone(),
            ctx: WriteCtx {
                ids: self.ctx.ids.clone(),
                writable: LruCache::new(self.ctx.writable.cap()),
                track: self.ctx.track,
                track_capacity: self.ctx.track_capacity,
                tracked: HashMap::new(),
                track_overflow: false,
                size: self.ctx.size,
            },
            committed: false,
        }
    }
}

/// Length of the common prefix of `a[depth..]` and `b[depth..]`.
fn common_prefix_len(a: &[u8], b: &[u8], depth: usize) -> usize {
    let lim = a.len().min(b.len()) - depth;
    let mut i = 0;
    while i < lim && a[depth + i] == b[depth + i] {
        i += 1;
    }
    i
}

fn new_leaf_ptr<V>(ctx: &WriteCtx, key: &[u8], value: V) -> Arc<LeafNode<V>> {
    Arc::new(LeafNode::new(ctx.alloc(), key.to_vec(), value))
}

fn insert_at<V: Clone>(
    ctx: &mut WriteCtx,
    slot: &mut NodePtr<V>,
    key: &[u8],
    value: V,
    depth: usize,
) -> Option<V> {
    match &**slot {
        Node::Empty(_) => {
            ctx.track(slot.id(), slot.watch());
            *slot = Arc::new(Node::new_leaf(ctx.alloc(), key.to_vec(), value));
            return None;
        }
        Node::Leaf(l) => {
            if l.key() == key {
                ctx.track(l.id(), l.watch());
                let old = l.value().clone();
                *slot = Arc::new(Node::new_leaf(ctx.alloc(), key.to_vec(), value));
                return Some(old);
            }
            // Two distinct keys under one slot: fork a 4-node on their
            // common prefix. The displaced leaf is re-issued under a fresh
            // identity so both notify paths see this position as mutated.
            let old = l.clone();
            ctx.track(old.id(), old.watch());
            let moved = Arc::new(LeafNode::new(
                ctx.alloc(),
                old.key().to_vec(),
                old.value().clone(),
            ));
            let lcp = common_prefix_len(old.key(), key, depth);
            let mut fork = Node::new_inner4(ctx.alloc());
            fork.set_partial(&key[depth..depth + lcp]);
            if depth + lcp == old.key().len() {
                fork.set_embedded_leaf(moved);
            } else {
                let edge = old.key()[depth + lcp];
                fork.add_child(edge, Arc::new(Node::Leaf(moved)));
            }
            let leaf = new_leaf_ptr(ctx, key, value);
            if depth + lcp == key.len() {
                fork.set_embedded_leaf(leaf);
            } else {
                fork.add_child(key[depth + lcp], Arc::new(Node::Leaf(leaf)));
            }
            ctx.adopt(&fork);
            *slot = Arc::new(fork);
            return None;
        }
        _ => {}
    }

    let plen = slot.partial_len();
    if plen > 0 {
        let m = slot.match_len(key, depth);
        if m < plen {
            // The compressed path diverges from the key: split it. The new
            // 4-node keeps the shared head; the old node is re-attached
            // under the diverging byte with its path shortened past it.
            ctx.track(slot.id(), slot.watch());
            let mut fork = Node::new_inner4(ctx.alloc());
            fork.set_partial(&key[depth..depth + m]);

            let tail: Vec<u8> = slot.read_partial(depth)[m..].to_vec();
            let mut shortened = slot.clone_for_write(ctx.alloc());
            shortened.set_partial(&tail[1..]);
            ctx.adopt(&shortened);
            fork.add_child(tail[0], Arc::new(shortened));

            if depth + m == key.len() {
                fork.set_embedded_leaf(new_leaf_ptr(ctx, key, value));
            } else {
                let leaf = Node::new_leaf(ctx.alloc(), key.to_vec(), value);
                fork.add_child(key[depth + m], Arc::new(leaf));
            }
            ctx.adopt(&fork);
            *slot = Arc::new(fork);
            return None;
        }
    }
    let depth = depth + plen;

    if depth == key.len() {
        // The key terminates at this inner node: it lives in the embedded
        // leaf slot.
        ctx.make_writable(slot);
        let leaf = new_leaf_ptr(ctx, key, value);
        let n = Arc::get_mut(slot).expect("writable node is uniquely owned");
        match n.set_embedded_leaf(leaf) {
            Some(old) => {
                ctx.track(old.id(), old.watch());
                Some(old.value().clone())
            }
            None => None,
        }
    } else {
        let edge = key[depth];
        ctx.make_writable(slot);
        let has_child = slot.find_child(edge).is_some();
        let n = Arc::get_mut(slot).expect("writable node is uniquely owned");
        if !has_child {
            let leaf = Node::new_leaf(ctx.alloc(), key.to_vec(), value);
            n.add_child(edge, Arc::new(leaf));
            return None;
        }
        let child = n.child_slot_mut(edge).expect("child exists");
        insert_at(ctx, child, key, value, depth + 1)
    }
}

fn delete_at<V: Clone>(
    ctx: &mut WriteCtx,
    slot: &mut NodePtr<V>,
    key: &[u8],
    depth: usize,
) -> Option<Arc<LeafNode<V>>> {
    match &**slot {
        Node::Empty(_) => return None,
        Node::Leaf(l) => {
            // Only the root slot holds a bare leaf by the time we recurse;
            // leaf children are unlinked by their parent below.
            if l.key() != key {
                return None;
            }
            let removed = l.clone();
            ctx.track(removed.id(), removed.watch());
            *slot = Arc::new(Node::Empty(EmptyNode::new(ctx.alloc())));
            return Some(removed);
        }
        _ => {}
    }

    let plen = slot.partial_len();
    if plen > 0 && slot.match_len(key, depth) < plen {
        return None;
    }
    let depth = depth + plen;

    if depth == key.len() {
        // Target is this node's embedded leaf.
        match slot.embedded_leaf() {
            Some(l) if l.key() == key => {}
            _ => return None,
        }
        ctx.make_writable(slot);
        let n = Arc::get_mut(slot).expect("writable node is uniquely owned");
        let removed = n.take_embedded_leaf().expect("embedded leaf checked above");
        ctx.track(removed.id(), removed.watch());
        fixup_after_removal(ctx, slot);
        return Some(removed);
    }

    let edge = key[depth];
    let target_is_child = match slot.find_child(edge) {
        None => return None,
        Some(child) => match &**child {
            Node::Leaf(l) => {
                if l.key() == key {
                    true
                } else {
                    return None;
                }
            }
            _ => false,
        },
    };

    ctx.make_writable(slot);
    if target_is_child {
        let n = Arc::get_mut(slot).expect("writable node is uniquely owned");
        let detached = n.remove_child(edge);
        let removed = detached
            .as_leaf()
            .expect("detached child is the matched leaf")
            .clone();
        ctx.track(removed.id(), removed.watch());
        fixup_after_removal(ctx, slot);
        return Some(removed);
    }

    let n = Arc::get_mut(slot).expect("writable node is uniquely owned");
    let child = n.child_slot_mut(edge).expect("child exists");
    delete_at(ctx, child, key, depth + 1)
}

/// Restore node-kind invariants after this (writable) node lost an entry:
/// promote a lone embedded leaf, or merge a single-child 4-node into its
/// child with the compressed paths concatenated around the edge byte.
fn fixup_after_removal<V: Clone>(ctx: &mut WriteCtx, slot: &mut NodePtr<V>) {
    if slot.num_children() == 0 {
        let leaf = Arc::get_mut(slot)
            .expect("writable node is uniquely owned")
            .take_embedded_leaf();
        *slot = match leaf {
            Some(leaf) => Arc::new(Node::Leaf(leaf)),
            // Only reachable at the root: interior nodes hold at least two
            // entries before a removal.
            None => Arc::new(Node::Empty(EmptyNode::new(ctx.alloc()))),
        };
        return;
    }
    if !matches!(&**slot, Node::Inner4(_))
        || slot.num_children() != 1
        || slot.embedded_leaf().is_some()
    {
        return;
    }

    let (edge, child) = {
        let (edge, child) = slot
            .children()
            .next()
            .expect("single-child 4-node has a child");
        (edge, child.clone())
    };
    if child.is_leaf() {
        // A leaf carries its whole key; no path surgery needed, and its
        // identity (hence its watchers) survives the move.
        *slot = child;
        return;
    }

    ctx.track(child.id(), child.watch());
    let merged_len = slot.partial_len() + 1 + child.partial_len();
    let mut stored = Vec::with_capacity(MAX_PREFIX_LEN);
    stored.extend_from_slice(slot.stored_partial());
    if stored.len() < MAX_PREFIX_LEN {
        stored.push(edge);
    }
    if stored.len() < MAX_PREFIX_LEN {
        let window = child.stored_partial();
        let need = (MAX_PREFIX_LEN - stored.len()).min(window.len());
        stored.extend_from_slice(&window[..need]);
    }
    stored.truncate(MAX_PREFIX_LEN);

    let mut merged = child.clone_for_write(ctx.alloc());
    merged.set_partial_raw(&stored, merged_len);
    ctx.adopt(&merged);
    *slot = Arc::new(merged);
}

/// Read-only probe: does any subtree under `n` hold keys framed with `sp`?
fn prefix_present<V>(n: &NodePtr<V>, sp: &[u8], depth: usize) -> bool {
    match &**n {
        Node::Empty(_) => false,
        Node::Leaf(l) => l.key()[depth..].starts_with(&sp[depth..]),
        _ => {
            let plen = n.partial_len();
            let m = n.match_len(sp, depth);
            let remaining = sp.len() - depth;
            if remaining <= plen {
                return m >= remaining;
            }
            if m < plen {
                return false;
            }
            let depth = depth + plen;
            match n.find_child(sp[depth]) {
                Some(child) => prefix_present(child, sp, depth + 1),
                None => false,
            }
        }
    }
}

/// Splice out every key framed with `sp`. Returns the number of leaves
/// removed and whether the caller must detach this whole node.
fn delete_prefix_at<V: Clone>(
    ctx: &mut WriteCtx,
    slot: &mut NodePtr<V>,
    sp: &[u8],
    depth: usize,
) -> (u64, bool) {
    match &**slot {
        Node::Empty(_) => return (0, false),
        Node::Leaf(l) => {
            if l.key()[depth..].starts_with(&sp[depth..]) {
                ctx.track(l.id(), l.watch());
                return (1, true);
            }
            return (0, false);
        }
        _ => {}
    }

    let plen = slot.partial_len();
    let m = slot.match_len(sp, depth);
    let remaining = sp.len() - depth;
    if remaining <= plen {
        if m >= remaining {
            // The whole subtree is under the prefix.
            let count = track_subtree(ctx, slot);
            return (count, true);
        }
        return (0, false);
    }
    if m < plen {
        return (0, false);
    }
    let depth = depth + plen;

    let edge = sp[depth];
    if slot.find_child(edge).is_none() {
        return (0, false);
    }
    ctx.make_writable(slot);
    let n = Arc::get_mut(slot).expect("writable node is uniquely owned");
    let child = n.child_slot_mut(edge).expect("child exists");
    let (count, drop_child) = delete_prefix_at(ctx, child, sp, depth + 1);
    if drop_child {
        n.remove_child(edge);
        fixup_after_removal(ctx, slot);
    }
    (count, false)
}

/// Track every node and leaf of a subtree about to be spliced out and
/// return its leaf count.
fn track_subtree<V: Clone>(ctx: &mut WriteCtx, root: &NodePtr<V>) -> u64 {
    let mut leaves = 0;
    for entry in RawIterator::new(root.clone()) {
        if entry.is_leaf() {
            leaves += 1;
        }
        ctx.track(entry.id(), entry.watch_cell());
    }
    leaves
}

/// Structural-diff notification: merge-join the two trees' raw iterations
/// (both sorted by effective path) and close every snapshot position whose
/// counterpart is missing or has a different identity.
fn slow_notify<V: Clone>(old_root: &NodePtr<V>, new_root: &NodePtr<V>) {
    let old_iter = RawIterator::new(old_root.clone());
    let new_iter = RawIterator::new(new_root.clone());
    let joined = old_iter
        .merge_join_by(new_iter, |o, n| (o.path(), o.rank()).cmp(&(n.path(), n.rank())));
    for pair in joined {
        match pair {
            // No counterpart in the new tree.
            EitherOrBoth::Left(old) => old.watch_cell().close(),
            EitherOrBoth::Both(old, new) => {
                if old.id() != new.id() {
                    old.watch_cell().close();
                }
            }
            // Position created by this transaction; nobody can be watching.
            EitherOrBoth::Right(_) => {}
        }
    }
}
