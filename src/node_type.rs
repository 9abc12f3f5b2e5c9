// Copyright (c) The Iradix Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node types of the adaptive radix tree.
//!
//! This module defines the building blocks of the tree: [`LeafNode`] holds a
//! framed key and its value; the four inner kinds hold up to 4, 16, 48 or
//! 256 children and adapt between those capacities as children come and go.
//! All inner kinds share a common header: the compressed path (`partial`),
//! the child count, a stable id, the watch cell for this position, and an
//! optional *embedded leaf* for a key that terminates exactly at the node.
//!
//! Nodes are immutable once published; trees share subtrees through
//! [`NodePtr`] reference counting, and the transaction engine clones a node
//! before writing to it.

use std::sync::Arc;

use crate::watch::WatchCell;

/// Bytes of the compressed path stored inline on a node. Paths longer than
/// this are truncated in storage; the missing bytes are recovered from the
/// minimum descendant leaf, which necessarily carries the whole path.
pub const MAX_PREFIX_LEN: usize = 10;

/// Shared ownership of a node. Child pointers only ever point from parent
/// to child, so the structure is acyclic and plain reference counting
/// reclaims it.
pub(crate) type NodePtr<V> = Arc<Node<V>>;

/// A key/value pair. The key is stored framed (leading sentinel, trailing
/// terminator); external callers only ever see the unframed form.
#[derive(Debug)]
pub struct LeafNode<V> {
    id: u64,
    key: Vec<u8>,
    value: V,
    watch: Arc<WatchCell>,
}

impl<V> LeafNode<V> {
    pub(crate) fn new(id: u64, key: Vec<u8>, value: V) -> Self {
        Self {
            id,
            key,
            value,
            watch: WatchCell::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The framed key.
    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    /// The key as the caller inserted it.
    pub fn user_key(&self) -> &[u8] {
        &self.key[1..self.key.len() - 1]
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub(crate) fn watch(&self) -> &Arc<WatchCell> {
        &self.watch
    }
}

/// The header common to every inner node kind.
#[derive(Debug)]
pub(crate) struct Header<V> {
    id: u64,
    /// First `min(partial_len, MAX_PREFIX_LEN)` bytes of the compressed path.
    partial: [u8; MAX_PREFIX_LEN],
    /// True length of the compressed path; may exceed `MAX_PREFIX_LEN`.
    partial_len: usize,
    num_children: u16,
    watch: Arc<WatchCell>,
    /// Leaf whose framed key terminates exactly at this node (its key equals
    /// the node's full path, compressed bytes included).
    leaf: Option<Arc<LeafNode<V>>>,
}

impl<V> Header<V> {
    fn new(id: u64) -> Self {
        Self {
            id,
            partial: [0; MAX_PREFIX_LEN],
            partial_len: 0,
            num_children: 0,
            watch: WatchCell::new(),
            leaf: None,
        }
    }

    /// Record `src` as the compressed path. `src` must carry the true path,
    /// so the stored window is simply its leading bytes.
    pub(crate) fn set_partial(&mut self, src: &[u8]) {
        let stored = src.len().min(MAX_PREFIX_LEN);
        self.partial[..stored].copy_from_slice(&src[..stored]);
        self.partial_len = src.len();
    }

    /// Record a path whose true length exceeds the bytes in hand. `stored`
    /// holds at most `MAX_PREFIX_LEN` leading bytes of it.
    pub(crate) fn set_partial_raw(&mut self, stored: &[u8], true_len: usize) {
        debug_assert!(stored.len() <= MAX_PREFIX_LEN && stored.len() <= true_len);
        self.partial[..stored.len()].copy_from_slice(stored);
        self.partial_len = true_len;
    }

    fn clone_for_write(&self, id: u64) -> Self {
        Self {
            id,
            partial: self.partial,
            partial_len: self.partial_len,
            num_children: self.num_children,
            watch: WatchCell::new(),
            leaf: self.leaf.clone(),
        }
    }
}

/// Inner node with up to 4 children; child bytes kept sorted.
#[derive(Debug)]
pub(crate) struct Node4<V> {
    header: Header<V>,
    keys: [u8; 4],
    children: [Option<NodePtr<V>>; 4],
}

/// Inner node with up to 16 children; child bytes kept sorted.
#[derive(Debug)]
pub(crate) struct Node16<V> {
    header: Header<V>,
    keys: [u8; 16],
    children: [Option<NodePtr<V>>; 16],
}

/// Inner node with up to 48 children: a 256-entry byte-to-slot map (1-based,
/// zero meaning absent) over a 48-slot child array.
#[derive(Debug)]
pub(crate) struct Node48<V> {
    header: Header<V>,
    child_index: [u8; 256],
    children: [Option<NodePtr<V>>; 48],
}

/// Inner node addressed directly by byte. The child array is boxed: it is
/// large and nodes of this kind are rare.
#[derive(Debug)]
pub(crate) struct Node256<V> {
    header: Header<V>,
    children: Box<[Option<NodePtr<V>>; 256]>,
}

/// The placeholder an empty tree's root points at. It carries an id and a
/// watch cell so that watches taken against an empty tree fire on the first
/// insert; the root pointer itself is never null.
#[derive(Debug)]
pub(crate) struct EmptyNode {
    id: u64,
    watch: Arc<WatchCell>,
}

impl EmptyNode {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            watch: WatchCell::new(),
        }
    }
}

/// The concrete node type of the tree.
#[derive(Debug)]
pub(crate) enum Node<V> {
    /// Root of an empty tree.
    Empty(EmptyNode),
    Leaf(Arc<LeafNode<V>>),
    Inner4(Node4<V>),
    Inner16(Node16<V>),
    Inner48(Node48<V>),
    Inner256(Node256<V>),
}

impl<V> Node<V> {
    pub(crate) fn new_leaf(id: u64, key: Vec<u8>, value: V) -> Node<V> {
        Node::Leaf(Arc::new(LeafNode::new(id, key, value)))
    }

    pub(crate) fn new_inner4(id: u64) -> Node<V> {
        Node::Inner4(Node4 {
            header: Header::new(id),
            keys: [0; 4],
            children: [None, None, None, None],
        })
    }

    pub(crate) fn id(&self) -> u64 {
        match self {
            Node::Empty(e) => e.id,
            Node::Leaf(l) => l.id,
            Node::Inner4(n) => n.header.id,
            Node::Inner16(n) => n.header.id,
            Node::Inner48(n) => n.header.id,
            Node::Inner256(n) => n.header.id,
        }
    }

    pub(crate) fn watch(&self) -> &Arc<WatchCell> {
        match self {
            Node::Empty(e) => &e.watch,
            Node::Leaf(l) => l.watch(),
            Node::Inner4(n) => &n.header.watch,
            Node::Inner16(n) => &n.header.watch,
            Node::Inner48(n) => &n.header.watch,
            Node::Inner256(n) => &n.header.watch,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub(crate) fn is_empty_placeholder(&self) -> bool {
        matches!(self, Node::Empty(_))
    }

    pub(crate) fn as_leaf(&self) -> Option<&Arc<LeafNode<V>>> {
        match self {
            Node::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn header(&self) -> Option<&Header<V>> {
        match self {
            Node::Inner4(n) => Some(&n.header),
            Node::Inner16(n) => Some(&n.header),
            Node::Inner48(n) => Some(&n.header),
            Node::Inner256(n) => Some(&n.header),
            _ => None,
        }
    }

    fn header_mut(&mut self) -> Option<&mut Header<V>> {
        match self {
            Node::Inner4(n) => Some(&mut n.header),
            Node::Inner16(n) => Some(&mut n.header),
            Node::Inner48(n) => Some(&mut n.header),
            Node::Inner256(n) => Some(&mut n.header),
            _ => None,
        }
    }

    /// True compressed-path length (may exceed the stored window).
    pub(crate) fn partial_len(&self) -> usize {
        self.header().map_or(0, |h| h.partial_len)
    }

    /// The stored window of the compressed path.
    pub(crate) fn stored_partial(&self) -> &[u8] {
        match self.header() {
            Some(h) => &h.partial[..h.partial_len.min(MAX_PREFIX_LEN)],
            None => &[],
        }
    }

    pub(crate) fn set_partial(&mut self, src: &[u8]) {
        self.header_mut()
            .expect("set_partial on a non-inner node")
            .set_partial(src);
    }

    pub(crate) fn set_partial_raw(&mut self, stored: &[u8], true_len: usize) {
        self.header_mut()
            .expect("set_partial on a non-inner node")
            .set_partial_raw(stored, true_len);
    }

    /// The full compressed path of a node sitting at `depth`, recovering
    /// overflow bytes from the minimum descendant leaf when the stored
    /// window is short.
    pub(crate) fn read_partial(&self, depth: usize) -> &[u8] {
        let h = self.header().expect("read_partial on a non-inner node");
        if h.partial_len <= MAX_PREFIX_LEN {
            &h.partial[..h.partial_len]
        } else {
            let leaf = self
                .minimum_leaf()
                .expect("inner node must have a leaf descendant");
            &leaf.key()[depth..depth + h.partial_len]
        }
    }

    /// Length of the match between this node's compressed path and
    /// `key[depth..]`, in `0..=partial_len`.
    pub(crate) fn match_len(&self, key: &[u8], depth: usize) -> usize {
        let plen = self.partial_len();
        if plen == 0 {
            return 0;
        }
        let eff = self.read_partial(depth);
        let avail = key.len().saturating_sub(depth);
        let lim = plen.min(avail);
        let mut i = 0;
        while i < lim && eff[i] == key[depth + i] {
            i += 1;
        }
        i
    }

    pub(crate) fn embedded_leaf(&self) -> Option<&Arc<LeafNode<V>>> {
        self.header().and_then(|h| h.leaf.as_ref())
    }

    pub(crate) fn set_embedded_leaf(&mut self, leaf: Arc<LeafNode<V>>) -> Option<Arc<LeafNode<V>>> {
        self.header_mut()
            .expect("embedded leaf on a non-inner node")
            .leaf
            .replace(leaf)
    }

    pub(crate) fn take_embedded_leaf(&mut self) -> Option<Arc<LeafNode<V>>> {
        self.header_mut().and_then(|h| h.leaf.take())
    }

    pub(crate) fn num_children(&self) -> usize {
        self.header().map_or(0, |h| h.num_children as usize)
    }

    /// Child lookup by edge byte.
    pub(crate) fn find_child(&self, key: u8) -> Option<&NodePtr<V>> {
        match self {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                n.keys[..nc]
                    .iter()
                    .position(|&k| k == key)
                    .and_then(|i| n.children[i].as_ref())
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                n.keys[..nc]
                    .binary_search(&key)
                    .ok()
                    .and_then(|i| n.children[i].as_ref())
            }
            Node::Inner48(n) => match n.child_index[key as usize] {
                0 => None,
                slot => n.children[slot as usize - 1].as_ref(),
            },
            Node::Inner256(n) => n.children[key as usize].as_ref(),
            _ => None,
        }
    }

    /// Mutable slot of the child under `key`, for in-place rewrites by the
    /// transaction engine.
    pub(crate) fn child_slot_mut(&mut self, key: u8) -> Option<&mut NodePtr<V>> {
        match self {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                match n.keys[..nc].iter().position(|&k| k == key) {
                    Some(i) => n.children[i].as_mut(),
                    None => None,
                }
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                match n.keys[..nc].binary_search(&key) {
                    Ok(i) => n.children[i].as_mut(),
                    Err(_) => None,
                }
            }
            Node::Inner48(n) => match n.child_index[key as usize] {
                0 => None,
                slot => n.children[slot as usize - 1].as_mut(),
            },
            Node::Inner256(n) => n.children[key as usize].as_mut(),
            _ => None,
        }
    }

    /// First child byte that is `>= key`, if any.
    pub(crate) fn lower_bound_byte(&self, key: u8) -> Option<u8> {
        match self {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                n.keys[..nc].iter().copied().find(|&k| k >= key)
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                match n.keys[..nc].binary_search(&key) {
                    Ok(_) => Some(key),
                    Err(i) if i < nc => Some(n.keys[i]),
                    Err(_) => None,
                }
            }
            Node::Inner48(n) => (key as usize..256)
                .find(|&b| n.child_index[b] != 0)
                .map(|b| b as u8),
            Node::Inner256(n) => (key as usize..256)
                .find(|&b| n.children[b].is_some())
                .map(|b| b as u8),
            _ => None,
        }
    }

    /// Ordered view of the children, ascending by edge byte.
    pub(crate) fn children(&self) -> ChildIter<'_, V> {
        ChildIter { node: self, pos: 0 }
    }

    fn is_full(&self) -> bool {
        match self {
            Node::Inner4(n) => n.header.num_children == 4,
            Node::Inner16(n) => n.header.num_children == 16,
            Node::Inner48(n) => n.header.num_children == 48,
            _ => false,
        }
    }

    /// Attach a child under `key`, upgrading the node kind when full. The
    /// caller guarantees no child currently exists under `key`.
    pub(crate) fn add_child(&mut self, key: u8, child: NodePtr<V>) {
        if self.is_full() {
            self.grow();
        }
        match self {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                let pos = n.keys[..nc].iter().position(|&k| k > key).unwrap_or(nc);
                for i in (pos..nc).rev() {
                    n.keys[i + 1] = n.keys[i];
                    n.children[i + 1] = n.children[i].take();
                }
                n.keys[pos] = key;
                n.children[pos] = Some(child);
                n.header.num_children += 1;
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                let pos = n.keys[..nc].iter().position(|&k| k > key).unwrap_or(nc);
                for i in (pos..nc).rev() {
                    n.keys[i + 1] = n.keys[i];
                    n.children[i + 1] = n.children[i].take();
                }
                n.keys[pos] = key;
                n.children[pos] = Some(child);
                n.header.num_children += 1;
            }
            Node::Inner48(n) => {
                debug_assert_eq!(n.child_index[key as usize], 0);
                let slot = n
                    .children
                    .iter()
                    .position(|c| c.is_none())
                    .expect("node48 below capacity has a free slot");
                n.children[slot] = Some(child);
                n.child_index[key as usize] = slot as u8 + 1;
                n.header.num_children += 1;
            }
            Node::Inner256(n) => {
                debug_assert!(n.children[key as usize].is_none());
                n.children[key as usize] = Some(child);
                n.header.num_children += 1;
            }
            _ => unreachable!("add_child on a non-inner node"),
        }
    }

    /// Detach the child under `key`, downgrading the node kind at the
    /// hysteresis thresholds. The single-child collapse of a 4-node is the
    /// caller's job, since it replaces the node itself.
    pub(crate) fn remove_child(&mut self, key: u8) -> NodePtr<V> {
        let removed = match self {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                let pos = n.keys[..nc]
                    .iter()
                    .position(|&k| k == key)
                    .expect("remove_child: no child under byte");
                let child = n.children[pos].take();
                for i in pos + 1..nc {
                    n.keys[i - 1] = n.keys[i];
                    n.children[i - 1] = n.children[i].take();
                }
                n.header.num_children -= 1;
                child
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                let pos = n.keys[..nc]
                    .binary_search(&key)
                    .expect("remove_child: no child under byte");
                let child = n.children[pos].take();
                for i in pos + 1..nc {
                    n.keys[i - 1] = n.keys[i];
                    n.children[i - 1] = n.children[i].take();
                }
                n.header.num_children -= 1;
                child
            }
            Node::Inner48(n) => {
                let slot = n.child_index[key as usize];
                assert!(slot != 0, "remove_child: no child under byte");
                n.child_index[key as usize] = 0;
                let child = n.children[slot as usize - 1].take();
                n.header.num_children -= 1;
                child
            }
            Node::Inner256(n) => {
                let child = n.children[key as usize].take();
                assert!(child.is_some(), "remove_child: no child under byte");
                n.header.num_children -= 1;
                child
            }
            _ => unreachable!("remove_child on a non-inner node"),
        }
        .expect("child slot was occupied");

        let at_threshold = match self {
            Node::Inner16(_) => self.num_children() == 3,
            Node::Inner48(_) => self.num_children() == 12,
            Node::Inner256(_) => self.num_children() == 37,
            _ => false,
        };
        if at_threshold {
            self.shrink();
        }
        removed
    }

    fn grow(&mut self) {
        let old = std::mem::replace(self, Node::Empty(EmptyNode::new(0)));
        *self = match old {
            Node::Inner4(n) => {
                let mut keys = [0u8; 16];
                let mut children: [Option<NodePtr<V>>; 16] = Default::default();
                let mut old_children = n.children;
                keys[..4].copy_from_slice(&n.keys);
                for (slot, child) in old_children.iter_mut().enumerate() {
                    children[slot] = child.take();
                }
                Node::Inner16(Node16 {
                    header: n.header,
                    keys,
                    children,
                })
            }
            Node::Inner16(n) => {
                // Bytes are already sorted, so slots 1..=16 come out in byte
                // order.
                let mut child_index = [0u8; 256];
                let mut children: [Option<NodePtr<V>>; 48] = [(); 48].map(|_| None);
                let mut old_children = n.children;
                for i in 0..16 {
                    child_index[n.keys[i] as usize] = i as u8 + 1;
                    children[i] = old_children[i].take();
                }
                Node::Inner48(Node48 {
                    header: n.header,
                    child_index,
                    children,
                })
            }
            Node::Inner48(n) => {
                let mut children: Box<[Option<NodePtr<V>>; 256]> =
                    Box::new([(); 256].map(|_| None));
                let mut old_children = n.children;
                for b in 0..256 {
                    let slot = n.child_index[b];
                    if slot != 0 {
                        children[b] = old_children[slot as usize - 1].take();
                    }
                }
                Node::Inner256(Node256 {
                    header: n.header,
                    children,
                })
            }
            other => unreachable!("grow on {} node", kind_name(&other)),
        };
    }

    fn shrink(&mut self) {
        let old = std::mem::replace(self, Node::Empty(EmptyNode::new(0)));
        *self = match old {
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                debug_assert!(nc <= 4);
                let mut keys = [0u8; 4];
                let mut children: [Option<NodePtr<V>>; 4] = Default::default();
                let mut old_children = n.children;
                keys[..nc].copy_from_slice(&n.keys[..nc]);
                for i in 0..nc {
                    children[i] = old_children[i].take();
                }
                Node::Inner4(Node4 {
                    header: n.header,
                    keys,
                    children,
                })
            }
            Node::Inner48(n) => {
                let mut keys = [0u8; 16];
                let mut children: [Option<NodePtr<V>>; 16] = Default::default();
                let mut old_children = n.children;
                let mut i = 0;
                for b in 0..256 {
                    let slot = n.child_index[b];
                    if slot != 0 {
                        keys[i] = b as u8;
                        children[i] = old_children[slot as usize - 1].take();
                        i += 1;
                    }
                }
                debug_assert_eq!(i, n.header.num_children as usize);
                Node::Inner16(Node16 {
                    header: n.header,
                    keys,
                    children,
                })
            }
            Node::Inner256(n) => {
                let mut child_index = [0u8; 256];
                let mut children: [Option<NodePtr<V>>; 48] = [(); 48].map(|_| None);
                let mut old_children = n.children;
                let mut slot = 0usize;
                for b in 0..256 {
                    if let Some(child) = old_children[b].take() {
                        children[slot] = Some(child);
                        child_index[b] = slot as u8 + 1;
                        slot += 1;
                    }
                }
                debug_assert_eq!(slot, n.header.num_children as usize);
                Node::Inner48(Node48 {
                    header: n.header,
                    child_index,
                    children,
                })
            }
            other => unreachable!("shrink on {} node", kind_name(&other)),
        };
    }

    /// The smallest leaf in this subtree. An embedded leaf, being a strict
    /// prefix of every other key below the node, always wins.
    pub(crate) fn minimum_leaf(&self) -> Option<&Arc<LeafNode<V>>> {
        let mut n = self;
        loop {
            match n {
                Node::Empty(_) => return None,
                Node::Leaf(l) => return Some(l),
                _ => {
                    if let Some(l) = n.embedded_leaf() {
                        return Some(l);
                    }
                    let (_, child) = n.children().next()?;
                    n = &**child;
                }
            }
        }
    }

    /// The largest leaf in this subtree.
    pub(crate) fn maximum_leaf(&self) -> Option<&Arc<LeafNode<V>>> {
        let mut n = self;
        loop {
            match n {
                Node::Empty(_) => return None,
                Node::Leaf(l) => return Some(l),
                _ => match n.last_child() {
                    Some(child) => n = &**child,
                    None => return n.embedded_leaf(),
                },
            }
        }
    }

    fn last_child(&self) -> Option<&NodePtr<V>> {
        match self {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                (nc > 0).then(|| n.children[nc - 1].as_ref()).flatten()
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                (nc > 0).then(|| n.children[nc - 1].as_ref()).flatten()
            }
            Node::Inner48(n) => (0..256).rev().find_map(|b| match n.child_index[b] {
                0 => None,
                slot => n.children[slot as usize - 1].as_ref(),
            }),
            Node::Inner256(n) => (0..256).rev().find_map(|b| n.children[b].as_ref()),
            _ => None,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        kind_name(self)
    }
}

impl<V: Clone> Node<V> {
    /// Clone this node for mutation by a transaction: same content and
    /// shared children, fresh id, fresh watch cell.
    pub(crate) fn clone_for_write(&self, id: u64) -> Node<V> {
        match self {
            Node::Empty(_) => Node::Empty(EmptyNode::new(id)),
            Node::Leaf(l) => Node::new_leaf(id, l.key.clone(), l.value.clone()),
            Node::Inner4(n) => Node::Inner4(Node4 {
                header: n.header.clone_for_write(id),
                keys: n.keys,
                children: n.children.clone(),
            }),
            Node::Inner16(n) => Node::Inner16(Node16 {
                header: n.header.clone_for_write(id),
                keys: n.keys,
                children: n.children.clone(),
            }),
            Node::Inner48(n) => Node::Inner48(Node48 {
                header: n.header.clone_for_write(id),
                child_index: n.child_index,
                children: n.children.clone(),
            }),
            Node::Inner256(n) => Node::Inner256(Node256 {
                header: n.header.clone_for_write(id),
                children: n.children.clone(),
            }),
        }
    }
}

fn kind_name<V>(n: &Node<V>) -> &'static str {
    match n {
        Node::Empty(_) => "empty",
        Node::Leaf(_) => "leaf",
        Node::Inner4(_) => "node4",
        Node::Inner16(_) => "node16",
        Node::Inner48(_) => "node48",
        Node::Inner256(_) => "node256",
    }
}

/// Ascending `(edge byte, child)` iterator over an inner node.
pub(crate) struct ChildIter<'a, V> {
    node: &'a Node<V>,
    pos: usize,
}

impl<'a, V> Iterator for ChildIter<'a, V> {
    type Item = (u8, &'a NodePtr<V>);

    fn next(&mut self) -> Option<Self::Item> {
        match self.node {
            Node::Inner4(n) => {
                let nc = n.header.num_children as usize;
                if self.pos >= nc {
                    return None;
                }
                let i = self.pos;
                self.pos += 1;
                Some((n.keys[i], n.children[i].as_ref()?))
            }
            Node::Inner16(n) => {
                let nc = n.header.num_children as usize;
                if self.pos >= nc {
                    return None;
                }
                let i = self.pos;
                self.pos += 1;
                Some((n.keys[i], n.children[i].as_ref()?))
            }
            Node::Inner48(n) => {
                while self.pos < 256 {
                    let b = self.pos;
                    self.pos += 1;
                    let slot = n.child_index[b];
                    if slot != 0 {
                        return Some((b as u8, n.children[slot as usize - 1].as_ref()?));
                    }
                }
                None
            }
            Node::Inner256(n) => {
                while self.pos < 256 {
                    let b = self.pos;
                    self.pos += 1;
                    if let Some(child) = n.children[b].as_ref() {
                        return Some((b as u8, child));
                    }
                }
                None
            }
            _ => None,
        }
    }
}
