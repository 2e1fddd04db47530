//! Node Pool - index-based slab of depth-level nodes with a free list.
//!
//! Nodes live in one contiguous `Vec` and link to each other through 32-bit
//! indices, so chains never hold raw pointers and a freed slot is simply an
//! index on the free stack. Popping from an empty free stack grows the slab;
//! running out of pooled nodes only ever costs an allocation.

use std::fmt;
use std::time::{Duration, Instant};

use crate::side_list::SideList;
use crate::update::Level;

/// Sentinel value representing a null/invalid index
pub const NULL_INDEX: u32 = u32::MAX;

/// Index of a node inside its pool
pub type NodeIndex = u32;

/// One depth level plus its chain links.
///
/// `next` is the owning direction of a chain; `prev` is only read to unlink
/// in O(1). `recycled_at` is set while the node sits on the free stack.
#[derive(Clone, Copy)]
pub struct Node {
    pub level: Level,
    pub next: NodeIndex,
    pub prev: NodeIndex,
    pub recycled_at: Option<Instant>,
}

impl Node {
    /// Create an empty, unlinked node
    #[inline]
    pub const fn empty() -> Self {
        Self {
            level: Level::new(0.0, 0.0),
            next: NULL_INDEX,
            prev: NULL_INDEX,
            recycled_at: None,
        }
    }

    /// Clear the level and both links
    #[inline]
    pub fn reset(&mut self) {
        self.level = Level::default();
        self.next = NULL_INDEX;
        self.prev = NULL_INDEX;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("price", &self.level.price)
            .field("amount", &self.level.amount)
            .field("id", &self.level.id)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Recycling storage for the nodes of one or more side lists.
///
/// The free stack is ordered by recycle time: `push` appends with a
/// timestamp no older than anything below it, and `pop` takes from the top,
/// so the idle nodes are always a prefix of the stack.
pub struct NodePool {
    nodes: Vec<Node>,
    free: Vec<NodeIndex>,
}

impl NodePool {
    /// Create an empty pool; nodes are allocated on first use
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Create a pool pre-stocked with `capacity` free nodes.
    ///
    /// # Panics
    /// Panics if capacity is not below `NULL_INDEX`
    pub fn with_capacity(capacity: u32) -> Self {
        assert!(capacity < NULL_INDEX, "Capacity must be less than NULL_INDEX");
        let now = Instant::now();
        let mut node = Node::empty();
        node.recycled_at = Some(now);
        Self {
            nodes: vec![node; capacity as usize],
            // Reverse so the first pops hand out the lowest indices
            free: (0..capacity).rev().collect(),
        }
    }

    /// Take a node off the free stack, growing the slab when it is empty.
    ///
    /// The returned node is zeroed and unlinked.
    #[inline]
    pub fn pop(&mut self) -> NodeIndex {
        if let Some(index) = self.free.pop() {
            self.nodes[index as usize].recycled_at = None;
            return index;
        }
        let index = self.nodes.len();
        debug_assert!(index < NULL_INDEX as usize, "Node pool exhausted the index space");
        self.nodes.push(Node::empty());
        index as NodeIndex
    }

    /// Return an unlinked node to the pool.
    ///
    /// The caller must have removed the node from every chain first.
    #[inline]
    pub fn push(&mut self, index: NodeIndex) {
        self.push_at(index, Instant::now());
    }

    /// `push` with a caller-supplied recycle time, for bulk releases.
    #[inline]
    pub(crate) fn push_at(&mut self, index: NodeIndex, now: Instant) {
        let node = &mut self.nodes[index as usize];
        debug_assert!(node.recycled_at.is_none(), "Double free detected");
        node.reset();
        node.recycled_at = Some(now);
        self.free.push(index);
    }

    #[inline]
    pub fn get(&self, index: NodeIndex) -> &Node {
        &self.nodes[index as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index as usize]
    }

    /// Number of nodes waiting on the free stack
    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of nodes currently linked into a chain
    #[inline]
    pub fn live(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Total nodes backed by the slab
    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Drop free nodes idle for longer than `ttl` and shrink the slab.
    ///
    /// Live nodes are copied into a fresh slab in chain order and every list
    /// in `lists` is relinked to its new indices. `lists` must be every list
    /// that draws from this pool.
    ///
    /// Returns the number of nodes discarded.
    pub fn sweep(&mut self, ttl: Duration, lists: &mut [&mut SideList]) -> usize {
        self.sweep_at(Instant::now(), ttl, lists)
    }

    pub(crate) fn sweep_at(
        &mut self,
        now: Instant,
        ttl: Duration,
        lists: &mut [&mut SideList],
    ) -> usize {
        let Some(cutoff) = now.checked_sub(ttl) else {
            return 0;
        };
        let nodes = &self.nodes;
        let idle = self.free.partition_point(|&index| {
            nodes[index as usize]
                .recycled_at
                .map_or(false, |at| at <= cutoff)
        });
        if idle == 0 {
            return 0;
        }

        let kept = self.free.len() - idle;
        let mut compacted = Vec::with_capacity(self.live() + kept);

        for list in lists.iter_mut() {
            let mut cursor = list.head();
            let mut head = NULL_INDEX;
            let mut prev = NULL_INDEX;
            while cursor != NULL_INDEX {
                let old = self.nodes[cursor as usize];
                let index = compacted.len() as NodeIndex;
                compacted.push(Node {
                    level: old.level,
                    next: NULL_INDEX,
                    prev,
                    recycled_at: None,
                });
                if prev == NULL_INDEX {
                    head = index;
                } else {
                    compacted[prev as usize].next = index;
                }
                prev = index;
                cursor = old.next;
            }
            list.relink(head, prev);
        }
        debug_assert_eq!(compacted.len(), self.live(), "Sweep lost live nodes");

        let mut free = Vec::with_capacity(kept);
        for &index in &self.free[idle..] {
            free.push(compacted.len() as NodeIndex);
            compacted.push(self.nodes[index as usize]);
        }

        self.nodes = compacted;
        self.free = free;
        idle
    }
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("capacity", &self.nodes.len())
            .field("live", &self.live())
            .field("free", &self.free.len())
            .finish()
    }
}
