//! Side List - one ordered chain of price levels.
//!
//! A doubly-linked list threaded through `NodePool` indices. The list only
//! stores its ends and its length; every operation borrows the pool that
//! owns the nodes. Ordering is decided by the caller's predicate, so the
//! same chain serves the ascending ask side and the descending bid side.

use std::time::Instant;

use crate::arena::{NodeIndex, NodePool, NULL_INDEX};
use crate::error::DepthError;
use crate::update::Level;

#[derive(Clone, Copy, Debug)]
pub struct SideList {
    head: NodeIndex,
    tail: NodeIndex,
    /// Maintained on every link/unlink, never recounted
    len: usize,
}

impl SideList {
    #[inline]
    pub const fn new() -> Self {
        Self {
            head: NULL_INDEX,
            tail: NULL_INDEX,
            len: 0,
        }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the first (best priced) node, or `NULL_INDEX`
    #[inline]
    pub const fn head(&self) -> NodeIndex {
        self.head
    }

    /// Index of the last node, or `NULL_INDEX`
    #[inline]
    pub const fn tail(&self) -> NodeIndex {
        self.tail
    }

    /// Point the list at relocated nodes after a pool sweep
    #[inline]
    pub(crate) fn relink(&mut self, head: NodeIndex, tail: NodeIndex) {
        self.head = head;
        self.tail = tail;
    }

    /// Replace the whole chain with `levels`, in the given order.
    ///
    /// Existing nodes are overwritten in place; extra levels pop fresh nodes
    /// and a surplus tail goes back to the pool. With enough nodes on hand
    /// nothing is allocated.
    pub fn load(&mut self, levels: &[Level], pool: &mut NodePool) -> Result<(), DepthError> {
        if levels.is_empty() {
            return Err(DepthError::EmptyInput);
        }

        let mut cursor = self.head;
        let mut prev = NULL_INDEX;
        for level in levels {
            let index = if cursor == NULL_INDEX {
                pool.pop()
            } else {
                let reused = cursor;
                cursor = pool.get(reused).next;
                reused
            };

            let node = pool.get_mut(index);
            node.level = *level;
            node.prev = prev;
            node.next = NULL_INDEX;

            if prev == NULL_INDEX {
                self.head = index;
            } else {
                pool.get_mut(prev).next = index;
            }
            prev = index;
        }
        self.tail = prev;
        self.len = levels.len();

        // Surplus tail from a longer previous chain
        let now = Instant::now();
        while cursor != NULL_INDEX {
            let next = pool.get(cursor).next;
            pool.push_at(cursor, now);
            cursor = next;
        }
        Ok(())
    }

    /// Return every node to the pool. Returns how many were released.
    pub fn clear(&mut self, pool: &mut NodePool) -> usize {
        let released = self.len;
        let now = Instant::now();
        let mut cursor = self.head;
        while cursor != NULL_INDEX {
            let next = pool.get(cursor).next;
            pool.push_at(cursor, now);
            cursor = next;
        }
        *self = Self::new();
        released
    }

    /// Keep the first `max` levels and release the rest.
    pub fn truncate(&mut self, max: usize, pool: &mut NodePool) -> usize {
        if self.len <= max {
            return 0;
        }
        if max == 0 {
            return self.clear(pool);
        }

        let mut last = self.head;
        for _ in 1..max {
            last = pool.get(last).next;
        }
        let mut cursor = pool.get(last).next;
        pool.get_mut(last).next = NULL_INDEX;
        self.tail = last;

        let released = self.len - max;
        let now = Instant::now();
        while cursor != NULL_INDEX {
            let next = pool.get(cursor).next;
            pool.push_at(cursor, now);
            cursor = next;
        }
        self.len = max;
        released
    }

    /// Insert `level` in front of the first node for which `belongs_before`
    /// holds, or at the tail if none does.
    ///
    /// # Complexity
    /// O(n) walk, O(1) splice
    pub fn add<F>(&mut self, level: Level, pool: &mut NodePool, belongs_before: F) -> NodeIndex
    where
        F: Fn(&Level) -> bool,
    {
        let index = pool.pop();
        pool.get_mut(index).level = level;
        self.insert_node(index, pool, belongs_before);
        index
    }

    /// Splice an already populated, unlinked node into sorted position.
    pub(crate) fn insert_node<F>(&mut self, index: NodeIndex, pool: &mut NodePool, belongs_before: F)
    where
        F: Fn(&Level) -> bool,
    {
        let mut cursor = self.head;
        while cursor != NULL_INDEX && !belongs_before(&pool.get(cursor).level) {
            cursor = pool.get(cursor).next;
        }

        if cursor == NULL_INDEX {
            self.push_back(index, pool);
        } else {
            self.link_before(cursor, index, pool);
        }
        self.len += 1;
    }

    fn push_back(&mut self, index: NodeIndex, pool: &mut NodePool) {
        let node = pool.get_mut(index);
        node.prev = self.tail;
        node.next = NULL_INDEX;

        if self.tail == NULL_INDEX {
            debug_assert!(self.head == NULL_INDEX);
            self.head = index;
        } else {
            pool.get_mut(self.tail).next = index;
        }
        self.tail = index;
    }

    fn link_before(&mut self, at: NodeIndex, index: NodeIndex, pool: &mut NodePool) {
        let prev = pool.get(at).prev;
        {
            let node = pool.get_mut(index);
            node.prev = prev;
            node.next = at;
        }
        pool.get_mut(at).prev = index;

        if prev == NULL_INDEX {
            debug_assert!(self.head == at);
            self.head = index;
        } else {
            pool.get_mut(prev).next = index;
        }
    }

    /// Index of the first node whose level satisfies `matches`
    pub fn find<F>(&self, pool: &NodePool, matches: F) -> Option<NodeIndex>
    where
        F: Fn(&Level) -> bool,
    {
        let mut cursor = self.head;
        while cursor != NULL_INDEX {
            let node = pool.get(cursor);
            if matches(&node.level) {
                return Some(cursor);
            }
            cursor = node.next;
        }
        None
    }

    /// Unlink the first node whose level satisfies `matches`.
    ///
    /// The node is detached but still owned by the caller, who must push it
    /// back onto the pool.
    pub fn remove<F>(&mut self, pool: &mut NodePool, matches: F) -> Option<NodeIndex>
    where
        F: Fn(&Level) -> bool,
    {
        let index = self.find(pool, matches)?;
        self.unlink(index, pool);
        Some(index)
    }

    /// Detach a node known to be in this list.
    ///
    /// Handles all edge cases:
    /// - Only node in list (head == tail)
    /// - Removing head
    /// - Removing tail
    /// - Removing from middle
    pub(crate) fn unlink(&mut self, index: NodeIndex, pool: &mut NodePool) {
        let node = pool.get(index);
        let prev = node.prev;
        let next = node.next;

        if prev == NULL_INDEX && next == NULL_INDEX {
            debug_assert!(self.head == index && self.tail == index);
            self.head = NULL_INDEX;
            self.tail = NULL_INDEX;
        } else if prev == NULL_INDEX {
            debug_assert!(self.head == index);
            self.head = next;
            pool.get_mut(next).prev = NULL_INDEX;
        } else if next == NULL_INDEX {
            debug_assert!(self.tail == index);
            self.tail = prev;
            pool.get_mut(prev).next = NULL_INDEX;
        } else {
            pool.get_mut(prev).next = next;
            pool.get_mut(next).prev = prev;
        }

        let node = pool.get_mut(index);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;
        self.len -= 1;
    }

    /// Overwrite the first matching level in place. Returns the old level.
    ///
    /// The caller is responsible for keeping the price order intact.
    pub fn amend<F>(&mut self, pool: &mut NodePool, matches: F, level: Level) -> Option<Level>
    where
        F: Fn(&Level) -> bool,
    {
        let index = self.find(pool, matches)?;
        let node = pool.get_mut(index);
        Some(std::mem::replace(&mut node.level, level))
    }

    /// Walk the chain from head to tail
    #[inline]
    pub fn iter<'a>(&self, pool: &'a NodePool) -> Iter<'a> {
        Iter {
            pool,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Best level, if any
    #[inline]
    pub fn first<'a>(&self, pool: &'a NodePool) -> Option<&'a Level> {
        if self.head == NULL_INDEX {
            None
        } else {
            Some(&pool.get(self.head).level)
        }
    }

    /// Total size on this side
    pub fn liquidity(&self, pool: &NodePool) -> f64 {
        self.iter(pool).map(|level| level.amount).sum()
    }

    /// Total size times price on this side
    pub fn value(&self, pool: &NodePool) -> f64 {
        self.iter(pool).map(Level::notional).sum()
    }

    /// `(liquidity, value)` in a single traversal
    pub fn amount(&self, pool: &NodePool) -> (f64, f64) {
        self.iter(pool).fold((0.0, 0.0), |(liquidity, value), level| {
            (liquidity + level.amount, value + level.notional())
        })
    }

    /// Copy the chain out as a flat vector
    pub fn retrieve(&self, pool: &NodePool) -> Vec<Level> {
        let mut out = Vec::with_capacity(self.len);
        out.extend(self.iter(pool).copied());
        out
    }
}

impl Default for SideList {
    fn default() -> Self {
        Self::new()
    }
}

/// Head-to-tail iterator over a side list
pub struct Iter<'a> {
    pool: &'a NodePool,
    cursor: NodeIndex,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Level;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NULL_INDEX {
            return None;
        }
        let node = self.pool.get(self.cursor);
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.level)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
