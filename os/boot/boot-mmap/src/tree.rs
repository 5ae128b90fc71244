//! # Ordered Region Index
//!
//! A treap keyed by region start address. Nodes live in the [`NodePool`] and
//! link to each other through [`SlotRef`]s, including a parent link so that
//! in-order neighbours can be reached without a stack. Priorities come from a
//! fixed xorshift sequence, which keeps the shape reproducible from run to run.

use crate::phys_mapper::PhysMapper;
use crate::pool::{Link, Node, NodePool, SlotRef};
use crate::region::MemoryRegion;

const PRIORITY_SEED: u32 = 0x2545_F491;

pub(crate) struct RegionTree<M, const N: usize> {
    pool: NodePool<M, N>,
    root: Link,
    len: usize,
    seed: u32,
}

impl<M: PhysMapper, const N: usize> RegionTree<M, N> {
    pub(crate) const fn new(mapper: M) -> Self {
        Self {
            pool: NodePool::new(mapper),
            root: None,
            len: 0,
            seed: PRIORITY_SEED,
        }
    }

    pub(crate) const fn pool(&self) -> &NodePool<M, N> {
        &self.pool
    }

    pub(crate) const fn pool_mut(&mut self) -> &mut NodePool<M, N> {
        &mut self.pool
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn region(&self, node: SlotRef) -> MemoryRegion {
        self.pool.node(node).region
    }

    /// Mutable access to a node's region.
    ///
    /// Callers may move the start address only within the gap left by the
    /// node's in-order neighbours.
    pub(crate) fn region_mut(&mut self, node: SlotRef) -> &mut MemoryRegion {
        &mut self.pool.node_mut(node).region
    }

    fn parent(&self, node: SlotRef) -> Link {
        self.pool.node(node).parent
    }

    fn left(&self, node: SlotRef) -> Link {
        self.pool.node(node).left
    }

    fn right(&self, node: SlotRef) -> Link {
        self.pool.node(node).right
    }

    fn priority(&self, node: SlotRef) -> u32 {
        self.pool.node(node).priority
    }

    fn set_parent(&mut self, node: SlotRef, parent: Link) {
        self.pool.node_mut(node).parent = parent;
    }

    fn set_left(&mut self, node: SlotRef, left: Link) {
        self.pool.node_mut(node).left = left;
        if let Some(child) = left {
            self.set_parent(child, Some(node));
        }
    }

    fn set_right(&mut self, node: SlotRef, right: Link) {
        self.pool.node_mut(node).right = right;
        if let Some(child) = right {
            self.set_parent(child, Some(node));
        }
    }

    /// Points `parent`'s link to `old` (or the root) at `new`.
    fn replace_child(&mut self, parent: Link, old: SlotRef, new: Link) {
        match parent {
            None => {
                self.root = new;
                if let Some(new) = new {
                    self.set_parent(new, None);
                }
            }
            Some(p) if self.left(p) == Some(old) => self.set_left(p, new),
            Some(p) => self.set_right(p, new),
        }
    }

    fn next_priority(&mut self) -> u32 {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        x
    }

    /// Lifts `node` above its parent.
    fn rotate_up(&mut self, node: SlotRef) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        let grandparent = self.parent(parent);

        if self.left(parent) == Some(node) {
            let inner = self.right(node);
            self.set_left(parent, inner);
            self.set_right(node, Some(parent));
        } else {
            let inner = self.left(node);
            self.set_right(parent, inner);
            self.set_left(node, Some(parent));
        }
        self.replace_child(grandparent, parent, Some(node));
    }

    fn leftmost(&self, mut node: SlotRef) -> SlotRef {
        while let Some(left) = self.left(node) {
            node = left;
        }
        node
    }

    fn rightmost(&self, mut node: SlotRef) -> SlotRef {
        while let Some(right) = self.right(node) {
            node = right;
        }
        node
    }

    /// Lowest entry.
    pub(crate) fn first(&self) -> Link {
        self.root.map(|root| self.leftmost(root))
    }

    /// In-order successor.
    pub(crate) fn next(&self, node: SlotRef) -> Link {
        if let Some(right) = self.right(node) {
            return Some(self.leftmost(right));
        }
        let mut child = node;
        let mut parent = self.parent(node);
        while let Some(p) = parent {
            if self.left(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    /// In-order predecessor.
    pub(crate) fn prev(&self, node: SlotRef) -> Link {
        if let Some(left) = self.left(node) {
            return Some(self.rightmost(left));
        }
        let mut child = node;
        let mut parent = self.parent(node);
        while let Some(p) = parent {
            if self.right(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    /// Entry with the greatest start address not above `address`.
    pub(crate) fn floor(&self, address: u64) -> Link {
        let mut best = None;
        let mut cursor = self.root;
        while let Some(node) = cursor {
            if self.region(node).start.as_u64() <= address {
                best = Some(node);
                cursor = self.right(node);
            } else {
                cursor = self.left(node);
            }
        }
        best
    }

    /// Links a new entry into the tree.
    ///
    /// The caller guarantees that no entry starts at the same address. Returns
    /// `None` when the pool has no vacant slot.
    pub(crate) fn insert(&mut self, region: MemoryRegion) -> Option<SlotRef> {
        let key = region.start.as_u64();
        let mut parent = None;
        let mut go_left = false;
        let mut cursor = self.root;
        while let Some(node) = cursor {
            let start = self.region(node).start.as_u64();
            debug_assert_ne!(start, key, "duplicate entry start");
            parent = Some(node);
            go_left = key < start;
            cursor = if go_left {
                self.left(node)
            } else {
                self.right(node)
            };
        }

        let priority = self.next_priority();
        let node = self.pool.alloc(Node {
            region,
            parent,
            left: None,
            right: None,
            priority,
        })?;
        match parent {
            None => self.root = Some(node),
            Some(p) if go_left => self.set_left(p, Some(node)),
            Some(p) => self.set_right(p, Some(node)),
        }

        while let Some(p) = self.parent(node) {
            if self.priority(p) >= priority {
                break;
            }
            self.rotate_up(node);
        }

        self.len += 1;
        Some(node)
    }

    /// Unlinks `node` and returns its slot to the pool.
    pub(crate) fn remove(&mut self, node: SlotRef) {
        loop {
            match (self.left(node), self.right(node)) {
                (Some(left), Some(right)) => {
                    let heavier = if self.priority(left) > self.priority(right) {
                        left
                    } else {
                        right
                    };
                    self.rotate_up(heavier);
                }
                (child, None) | (None, child) => {
                    let parent = self.parent(node);
                    self.replace_child(parent, node, child);
                    break;
                }
            }
        }
        self.pool.release(node);
        self.len -= 1;
    }

    /// Drops every entry.
    pub(crate) fn clear(&mut self) {
        self.pool.reset();
        self.root = None;
        self.len = 0;
        self.seed = PRIORITY_SEED;
    }
}
