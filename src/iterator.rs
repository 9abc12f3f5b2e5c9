// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

//! Iterators over the tree.
//!
//! All of them are lazy, stack-driven (no recursion, so key-length-deep
//! trees cannot overflow the call stack) and emit unframed keys. The stack
//! holds whole nodes; expanding a node pushes its children in the order
//! that makes the next pop the right one: descending for forward
//! iteration, ascending for reverse. An inner node's embedded leaf is a
//! strict prefix of everything below the node, so forward iteration emits
//! it before the children and reverse iteration after them.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashSet;

use crate::node_type::{LeafNode, Node, NodePtr};
use crate::watch::{Watch, WatchCell};
use crate::{frame_key, frame_prefix, KEY_TERMINATOR};

enum Entry<V> {
    Node(NodePtr<V>),
    Leaf(Arc<LeafNode<V>>),
}

fn leaf_item<V: Clone>(l: &LeafNode<V>) -> (Vec<u8>, V) {
    (l.user_key().to_vec(), l.value().clone())
}

/// Pop entries until a leaf surfaces, expanding inner nodes so the smallest
/// remaining key comes out first.
fn next_ascending<V: Clone>(stack: &mut Vec<Entry<V>>) -> Option<Arc<LeafNode<V>>> {
    while let Some(entry) = stack.pop() {
        match entry {
            Entry::Leaf(l) => return Some(l),
            Entry::Node(n) => match &*n {
                Node::Empty(_) => {}
                Node::Leaf(l) => return Some(l.clone()),
                _ => {
                    let children: Vec<_> = n.children().map(|(_, c)| c.clone()).collect();
                    for child in children.into_iter().rev() {
                        stack.push(Entry::Node(child));
                    }
                    if let Some(l) = n.embedded_leaf() {
                        stack.push(Entry::Leaf(l.clone()));
                    }
                }
            },
        }
    }
    None
}

/// Forward iterator in ascending key order, with prefix seeks.
pub struct TreeIterator<V> {
    root: NodePtr<V>,
    stack: Vec<Entry<V>>,
}

impl<V: Clone> TreeIterator<V> {
    pub(crate) fn new(root: NodePtr<V>) -> Self {
        let stack = vec![Entry::Node(root.clone())];
        Self { root, stack }
    }

    /// Position the iterator on the subtree of keys starting with `prefix`.
    pub fn seek_prefix(&mut self, prefix: &[u8]) {
        self.seek(prefix);
    }

    /// Like [`TreeIterator::seek_prefix`], also returning the watch of the
    /// finest position covering the prefix, so the caller learns of any
    /// write that could change the answer.
    pub fn seek_prefix_watch(&mut self, prefix: &[u8]) -> Watch {
        self.seek(prefix).watch()
    }

    fn seek(&mut self, prefix: &[u8]) -> Arc<WatchCell> {
        let sp = frame_prefix(prefix);
        self.stack.clear();
        let mut n = self.root.clone();
        let mut depth = 0usize;
        let mut watch = n.watch().clone();
        loop {
            match &*n {
                Node::Empty(_) => return watch,
                Node::Leaf(l) => {
                    if l.key()[depth..].starts_with(&sp[depth..]) {
                        watch = l.watch().clone();
                        self.stack.push(Entry::Leaf(l.clone()));
                    }
                    return watch;
                }
                _ => {
                    watch = n.watch().clone();
                    let plen = n.partial_len();
                    let m = n.match_len(&sp, depth);
                    let remaining = sp.len() - depth;
                    if remaining <= plen {
                        if m >= remaining {
                            // This node covers the prefix; the rest of the
                            // iteration is exactly its subtree.
                            self.stack.push(Entry::Node(n.clone()));
                        }
                        return watch;
                    }
                    if m < plen {
                        return watch;
                    }
                    depth += plen;
                    let child = match n.find_child(sp[depth]) {
                        Some(c) => c.clone(),
                        None => return watch,
                    };
                    n = child;
                    depth += 1;
                }
            }
        }
    }
}

impl<V: Clone> Iterator for TreeIterator<V> {
    type Item = (Vec<u8>, V);

    fn next(&mut self) -> Option<Self::Item> {
        next_ascending(&mut self.stack).map(|l| leaf_item(&l))
    }
}

/// Forward iterator positioned by a lower-bound seek: after
/// [`LowerBoundIterator::seek_lower_bound`]`(k)` it emits every stored key
/// `>= k` in ascending order.
pub struct LowerBoundIterator<V> {
    root: NodePtr<V>,
    stack: Vec<Entry<V>>,
}

impl<V: Clone> LowerBoundIterator<V> {
    pub(crate) fn new(root: NodePtr<V>) -> Self {
        let stack = vec![Entry::Node(root.clone())];
        Self { root, stack }
    }

    pub fn seek_lower_bound(&mut self, key: &[u8]) {
        let prefix = frame_key(key);
        self.stack.clear();
        let mut n = self.root.clone();
        let mut depth = 0usize;
        // Once the descent passes a byte where the tree ran ahead of the
        // key, everything below is in bounds and no more comparing is
        // needed.
        let mut seen_mismatch = false;
        loop {
            match &*n {
                Node::Empty(_) => return,
                Node::Leaf(l) => {
                    if l.key() >= prefix.as_slice() {
                        self.stack.push(Entry::Leaf(l.clone()));
                    }
                    return;
                }
                _ => {
                    if seen_mismatch || depth >= prefix.len() {
                        self.stack.push(Entry::Node(n.clone()));
                        return;
                    }
                    let plen = n.partial_len();
                    if plen > 0 {
                        let eff = n.read_partial(depth);
                        let remaining = &prefix[depth..];
                        let cmp = if eff.len() < remaining.len() {
                            eff.cmp(&remaining[..eff.len()])
                        } else {
                            eff.cmp(remaining)
                        };
                        match cmp {
                            // Path already larger: the whole subtree is in
                            // bounds, starting from its minimum.
                            Ordering::Greater => {
                                self.stack.push(Entry::Node(n.clone()));
                                return;
                            }
                            // Path smaller: no lower bound in this subtree.
                            // In-bounds right siblings are on the stack
                            // already.
                            Ordering::Less => return,
                            Ordering::Equal => {}
                        }
                        depth += plen;
                        if depth >= prefix.len() {
                            self.stack.push(Entry::Node(n.clone()));
                            return;
                        }
                    }
                    let target = prefix[depth];
                    let lb = match n.lower_bound_byte(target) {
                        Some(b) => b,
                        // Nothing at-or-above here; a qualifying ancestor
                        // sibling is already stacked.
                        None => return,
                    };
                    if lb != target {
                        seen_mismatch = true;
                    }
                    // Strictly larger siblings pop after the bound child's
                    // subtree is exhausted.
                    let larger: Vec<_> = n
                        .children()
                        .filter(|&(b, _)| b > lb)
                        .map(|(_, c)| c.clone())
                        .collect();
                    for child in larger.into_iter().rev() {
                        self.stack.push(Entry::Node(child));
                    }
                    let child = n.find_child(lb).expect("lower bound byte exists").clone();
                    n = child;
                    depth += 1;
                }
            }
        }
    }
}

impl<V: Clone> Iterator for LowerBoundIterator<V> {
    type Item = (Vec<u8>, V);

    fn next(&mut self) -> Option<Self::Item> {
        next_ascending(&mut self.stack).map(|l| leaf_item(&l))
    }
}

/// Descending iterator. After
/// [`ReverseIterator::seek_reverse_lower_bound`]`(k)`,
/// [`ReverseIterator::previous`] emits every stored key `<= k` in
/// descending order; unseeked it walks the whole tree from the maximum.
pub struct ReverseIterator<V> {
    root: NodePtr<V>,
    stack: Vec<Entry<V>>,
    /// Ids of inner nodes whose children are already on the stack, so the
    /// node's own embedded leaf is emitted only after they are consumed.
    expanded: HashSet<u64>,
}

impl<V: Clone> ReverseIterator<V> {
    pub(crate) fn new(root: NodePtr<V>) -> Self {
        let stack = vec![Entry::Node(root.clone())];
        Self {
            root,
            stack,
            expanded: HashSet::new(),
        }
    }

    /// The next key in descending order.
    pub fn previous(&mut self) -> Option<(Vec<u8>, V)> {
        while let Some(entry) = self.stack.pop() {
            match entry {
                Entry::Leaf(l) => return Some(leaf_item(&l)),
                Entry::Node(n) => match &*n {
                    Node::Empty(_) => {}
                    Node::Leaf(l) => return Some(leaf_item(l)),
                    _ => {
                        if self.expanded.remove(&n.id()) {
                            // Children consumed; the embedded leaf is what
                            // remains of this node.
                            if let Some(l) = n.embedded_leaf() {
                                return Some(leaf_item(l));
                            }
                            continue;
                        }
                        self.expanded.insert(n.id());
                        let children: Vec<_> = n.children().map(|(_, c)| c.clone()).collect();
                        self.stack.push(Entry::Node(n.clone()));
                        for child in children {
                            self.stack.push(Entry::Node(child));
                        }
                    }
                },
            }
        }
        None
    }

    pub fn seek_reverse_lower_bound(&mut self, key: &[u8]) {
        let prefix = frame_key(key);
        self.stack.clear();
        self.expanded.clear();
        let mut n = self.root.clone();
        let mut depth = 0usize;
        loop {
            match &*n {
                Node::Empty(_) => return,
                Node::Leaf(l) => {
                    if l.key() <= prefix.as_slice() {
                        self.stack.push(Entry::Leaf(l.clone()));
                    }
                    return;
                }
                _ => {
                    let plen = n.partial_len();
                    if plen > 0 {
                        let eff = n.read_partial(depth);
                        let remaining = &prefix[depth..];
                        let cmp = if eff.len() < remaining.len() {
                            eff.cmp(&remaining[..eff.len()])
                        } else {
                            eff.cmp(remaining)
                        };
                        match cmp {
                            // Path below the key: the subtree's maximum is
                            // the bound; walk all of it descending.
                            Ordering::Less => {
                                self.stack.push(Entry::Node(n.clone()));
                                return;
                            }
                            // Path above the key: nothing here qualifies.
                            Ordering::Greater => return,
                            Ordering::Equal => {}
                        }
                        depth += plen;
                    }
                    if depth >= prefix.len() {
                        // Path equals the key exactly. Children extend past
                        // it, so only the embedded leaf qualifies.
                        if let Some(l) = n.embedded_leaf() {
                            self.stack.push(Entry::Leaf(l.clone()));
                        }
                        return;
                    }
                    // The embedded leaf is a strict prefix of the key,
                    // hence strictly lower; it surfaces after the lower
                    // children are consumed, so it goes beneath them.
                    if let Some(l) = n.embedded_leaf() {
                        self.stack.push(Entry::Leaf(l.clone()));
                    }
                    let target = prefix[depth];
                    let lower: Vec<_> = n
                        .children()
                        .filter(|&(b, _)| b < target)
                        .map(|(_, c)| c.clone())
                        .collect();
                    for child in lower {
                        self.stack.push(Entry::Node(child));
                    }
                    let child = match n.find_child(target) {
                        Some(c) => c.clone(),
                        None => return,
                    };
                    n = child;
                    depth += 1;
                }
            }
        }
    }
}

/// Iterator over the stored keys that are prefixes of a query path,
/// shortest first.
pub struct PathIterator<V> {
    query: Vec<u8>,
    sq: Vec<u8>,
    cur: Option<(NodePtr<V>, usize)>,
    pending: VecDeque<Arc<LeafNode<V>>>,
}

impl<V: Clone> PathIterator<V> {
    pub(crate) fn new(root: NodePtr<V>, path: &[u8]) -> Self {
        Self {
            query: path.to_vec(),
            sq: frame_prefix(path),
            cur: Some((root, 0)),
            pending: VecDeque::new(),
        }
    }

    fn offer(&mut self, l: &Arc<LeafNode<V>>) {
        // Candidates are gathered generously and verified unframed, so
        // terminator bytes inside keys cannot smuggle in wrong answers.
        if self.query.starts_with(l.user_key()) {
            self.pending.push_back(l.clone());
        }
    }
}

impl<V: Clone> Iterator for PathIterator<V> {
    type Item = (Vec<u8>, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(l) = self.pending.pop_front() {
                return Some(leaf_item(&l));
            }
            let (n, depth) = self.cur.take()?;
            match &*n {
                Node::Empty(_) => {}
                Node::Leaf(l) => {
                    let l = l.clone();
                    self.offer(&l);
                }
                _ => {
                    let plen = n.partial_len();
                    let m = n.match_len(&self.sq, depth);
                    let remaining = self.sq.len() - depth;
                    if m < plen.min(remaining) {
                        // Divergence inside the compressed path; only the
                        // embedded leaf can still qualify (its terminator
                        // may be the diverging byte).
                        if let Some(l) = n.embedded_leaf() {
                            let l = l.clone();
                            self.offer(&l);
                        }
                    } else if remaining <= plen {
                        // Query exhausts at or inside this node.
                        if let Some(l) = n.embedded_leaf() {
                            let l = l.clone();
                            self.offer(&l);
                        }
                        if remaining == plen {
                            // A key equal to the whole query heads the
                            // terminator child.
                            if let Some(l) =
                                n.find_child(KEY_TERMINATOR).and_then(|c| c.minimum_leaf())
                            {
                                let l = l.clone();
                                self.offer(&l);
                            }
                        }
                    } else {
                        let depth = depth + plen;
                        if let Some(l) = n.embedded_leaf() {
                            let l = l.clone();
                            self.offer(&l);
                        }
                        if self.sq[depth] != KEY_TERMINATOR {
                            // The key ending at this position sits under
                            // the terminator edge, off the descent path.
                            if let Some(l) =
                                n.find_child(KEY_TERMINATOR).and_then(|c| c.minimum_leaf())
                            {
                                let l = l.clone();
                                self.offer(&l);
                            }
                        }
                        if let Some(c) = n.find_child(self.sq[depth]) {
                            self.cur = Some((c.clone(), depth + 1));
                        }
                    }
                }
            }
        }
    }
}

/// What a [`RawIterator`] is currently standing on.
pub struct RawEntry<V> {
    path: Vec<u8>,
    node: RawNode<V>,
}

enum RawNode<V> {
    Inner(NodePtr<V>),
    Leaf(Arc<LeafNode<V>>),
}

impl<V> RawEntry<V> {
    /// The effective path of this position: consumed edge bytes plus the
    /// node's compressed path (a leaf's path is its whole framed key).
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.node, RawNode::Leaf(_))
    }

    /// The leaf standing here, if this entry is one.
    pub fn leaf(&self) -> Option<&LeafNode<V>> {
        match &self.node {
            RawNode::Leaf(l) => Some(l),
            RawNode::Inner(_) => None,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        match &self.node {
            RawNode::Inner(n) => n.id(),
            RawNode::Leaf(l) => l.id(),
        }
    }

    pub(crate) fn watch_cell(&self) -> &Arc<WatchCell> {
        match &self.node {
            RawNode::Inner(n) => n.watch(),
            RawNode::Leaf(l) => l.watch(),
        }
    }

    pub(crate) fn inner(&self) -> Option<&NodePtr<V>> {
        match &self.node {
            RawNode::Inner(n) => Some(n),
            RawNode::Leaf(_) => None,
        }
    }

    /// Tie-break for entries sharing a path: a node sorts before the leaf
    /// embedded at the same position.
    pub(crate) fn rank(&self) -> u8 {
        match &self.node {
            RawNode::Inner(_) => 0,
            RawNode::Leaf(_) => 1,
        }
    }
}

enum RawPending<V> {
    Visit { node: NodePtr<V>, base: Vec<u8> },
    Emit(RawEntry<V>),
}

/// Structural pre-order cursor emitting inner nodes as well as leaves, in
/// `(path, rank)` order. Drives the structural-diff notification and the
/// subtree accounting of prefix deletion. Usable either as a peekable
/// cursor (`front`/`path`/`advance`) or as a plain [`Iterator`].
pub struct RawIterator<V> {
    stack: Vec<RawPending<V>>,
    front: Option<RawEntry<V>>,
}

impl<V> RawIterator<V> {
    pub(crate) fn new(root: NodePtr<V>) -> Self {
        let mut iter = Self {
            stack: vec![RawPending::Visit {
                node: root,
                base: Vec::new(),
            }],
            front: None,
        };
        iter.advance();
        iter
    }

    /// The entry the cursor stands on, if any.
    pub fn front(&self) -> Option<&RawEntry<V>> {
        self.front.as_ref()
    }

    /// The current entry's effective path.
    pub fn path(&self) -> Option<&[u8]> {
        self.front.as_ref().map(|e| e.path())
    }

    /// Step to the next entry in `(path, rank)` order.
    pub fn advance(&mut self) {
        while let Some(pending) = self.stack.pop() {
            match pending {
                RawPending::Emit(entry) => {
                    self.front = Some(entry);
                    return;
                }
                RawPending::Visit { node, base } => match &*node {
                    Node::Empty(_) => {
                        self.front = Some(RawEntry {
                            path: base,
                            node: RawNode::Inner(node.clone()),
                        });
                        return;
                    }
                    Node::Leaf(l) => {
                        self.front = Some(RawEntry {
                            path: l.key().to_vec(),
                            node: RawNode::Leaf(l.clone()),
                        });
                        return;
                    }
                    _ => {
                        let mut path = base;
                        path.extend_from_slice(node.read_partial(path.len()));
                        let children: Vec<_> =
                            node.children().map(|(b, c)| (b, c.clone())).collect();
                        for (b, child) in children.into_iter().rev() {
                            let mut child_base = path.clone();
                            child_base.push(b);
                            self.stack.push(RawPending::Visit {
                                node: child,
                                base: child_base,
                            });
                        }
                        if let Some(l) = node.embedded_leaf() {
                            self.stack.push(RawPending::Emit(RawEntry {
                                path: l.key().to_vec(),
                                node: RawNode::Leaf(l.clone()),
                            }));
                        }
                        self.front = Some(RawEntry {
                            path,
                            node: RawNode::Inner(node.clone()),
                        });
                        return;
                    }
                },
            }
        }
        self.front = None;
    }
}

impl<V> Iterator for RawIterator<V> {
    type Item = RawEntry<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.front.take()?;
        self.advance();
        Some(entry)
    }
}
