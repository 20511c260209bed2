//! # Index-Linked Rings
//!
//! A circular doubly-linked list whose nodes are plain offsets.
//!
//! The list never owns its nodes. Link fields live wherever the
//! [`RingLinks`] implementation keeps them: inside zone block headers,
//! inside cache entry headers, or in a struct field for a sentinel that has
//! no bytes in the store. The same code then drives the zone's block ring
//! and both cache orderings.
//!
//! ```text
//!   sentinel ──next──▶ a ──next──▶ b ──next──▶ sentinel
//!      ▲                                          │
//!      └──────────────────prev────────────────────┘
//! ```

use crate::error::{MemoryError, MemoryResult};

/// Link value of a node that is not on any ring.
pub const DETACHED: usize = usize::MAX;

/// Read access to the `prev`/`next` fields of ring nodes.
pub trait RingLinks {
    /// Successor of `node`.
    ///
    /// # Errors
    ///
    /// Fails if the node's links cannot be read.
    fn next(&self, node: usize) -> MemoryResult<usize>;

    /// Predecessor of `node`.
    ///
    /// # Errors
    ///
    /// Fails if the node's links cannot be read.
    fn prev(&self, node: usize) -> MemoryResult<usize>;
}

/// Write access to the `prev`/`next` fields of ring nodes.
pub trait RingLinksMut: RingLinks {
    /// Overwrites the successor of `node`.
    ///
    /// # Errors
    ///
    /// Fails if the node's links cannot be written.
    fn set_next(&mut self, node: usize, next: usize) -> MemoryResult<()>;

    /// Overwrites the predecessor of `node`.
    ///
    /// # Errors
    ///
    /// Fails if the node's links cannot be written.
    fn set_prev(&mut self, node: usize, prev: usize) -> MemoryResult<()>;
}

/// A ring anchored at a sentinel node.
///
/// The sentinel is always on the ring. An empty ring is a sentinel linked
/// to itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ring {
    sentinel: usize,
}

impl Ring {
    /// Creates a ring handle anchored at `sentinel`.
    #[inline]
    #[must_use]
    pub const fn new(sentinel: usize) -> Self {
        Self { sentinel }
    }

    /// The anchoring sentinel.
    #[inline]
    #[must_use]
    pub const fn sentinel(self) -> usize {
        self.sentinel
    }

    /// Links the sentinel to itself, forgetting every node.
    ///
    /// # Errors
    ///
    /// Propagates link write failures.
    pub fn reset<L: RingLinksMut + ?Sized>(self, links: &mut L) -> MemoryResult<()> {
        links.set_next(self.sentinel, self.sentinel)?;
        links.set_prev(self.sentinel, self.sentinel)
    }

    /// True if only the sentinel is on the ring.
    ///
    /// # Errors
    ///
    /// Propagates link read failures.
    pub fn is_empty<L: RingLinks + ?Sized>(self, links: &L) -> MemoryResult<bool> {
        Ok(links.next(self.sentinel)? == self.sentinel)
    }

    /// First node after the sentinel, if any.
    ///
    /// # Errors
    ///
    /// Propagates link read failures.
    pub fn first<L: RingLinks + ?Sized>(self, links: &L) -> MemoryResult<Option<usize>> {
        let node = links.next(self.sentinel)?;
        Ok((node != self.sentinel).then_some(node))
    }

    /// Last node before the sentinel, if any.
    ///
    /// # Errors
    ///
    /// Propagates link read failures.
    pub fn last<L: RingLinks + ?Sized>(self, links: &L) -> MemoryResult<Option<usize>> {
        let node = links.prev(self.sentinel)?;
        Ok((node != self.sentinel).then_some(node))
    }

    /// Splices `node` in directly after `anchor`.
    ///
    /// # Errors
    ///
    /// Propagates link failures.
    pub fn insert_after<L: RingLinksMut + ?Sized>(
        self,
        links: &mut L,
        anchor: usize,
        node: usize,
    ) -> MemoryResult<()> {
        let next = links.next(anchor)?;
        links.set_prev(node, anchor)?;
        links.set_next(node, next)?;
        links.set_prev(next, node)?;
        links.set_next(anchor, node)
    }

    /// Splices `node` in directly before `anchor`.
    ///
    /// # Errors
    ///
    /// Propagates link failures.
    pub fn insert_before<L: RingLinksMut + ?Sized>(
        self,
        links: &mut L,
        anchor: usize,
        node: usize,
    ) -> MemoryResult<()> {
        let prev = links.prev(anchor)?;
        self.insert_after(links, prev, node)
    }

    /// Inserts `node` at the front of the ring.
    ///
    /// # Errors
    ///
    /// Propagates link failures.
    pub fn push_front<L: RingLinksMut + ?Sized>(self, links: &mut L, node: usize) -> MemoryResult<()> {
        self.insert_after(links, self.sentinel, node)
    }

    /// Inserts `node` at the back of the ring.
    ///
    /// # Errors
    ///
    /// Propagates link failures.
    pub fn push_back<L: RingLinksMut + ?Sized>(self, links: &mut L, node: usize) -> MemoryResult<()> {
        self.insert_before(links, self.sentinel, node)
    }

    /// Unlinks `node` and marks both of its links [`DETACHED`].
    ///
    /// # Errors
    ///
    /// `Corruption` if `node` is the sentinel or is not currently linked.
    pub fn remove<L: RingLinksMut + ?Sized>(self, links: &mut L, node: usize) -> MemoryResult<()> {
        if node == self.sentinel {
            return Err(MemoryError::corruption("ring", "attempted to unlink the sentinel"));
        }
        let prev = links.prev(node)?;
        let next = links.next(node)?;
        if prev == DETACHED || next == DETACHED {
            return Err(MemoryError::corruption(
                "ring",
                format!("node {node} is not linked"),
            ));
        }
        links.set_next(prev, next)?;
        links.set_prev(next, prev)?;
        links.set_next(node, DETACHED)?;
        links.set_prev(node, DETACHED)
    }

    /// Moves `node` to the front of the ring.
    ///
    /// # Errors
    ///
    /// Propagates link failures.
    pub fn move_to_front<L: RingLinksMut + ?Sized>(self, links: &mut L, node: usize) -> MemoryResult<()> {
        self.remove(links, node)?;
        self.push_front(links, node)
    }

    /// Walks the ring front to back and returns every node (sentinel excluded).
    ///
    /// Each step verifies that the successor's back link points at the
    /// current node, and the walk gives up after `limit` nodes so a broken
    /// ring can never spin forever.
    ///
    /// # Errors
    ///
    /// `Corruption` on a bad back link or when `limit` is exceeded.
    pub fn collect<L: RingLinks + ?Sized>(self, links: &L, limit: usize) -> MemoryResult<Vec<usize>> {
        let mut nodes = Vec::new();
        let mut current = self.sentinel;
        loop {
            let next = links.next(current)?;
            if links.prev(next)? != current {
                return Err(MemoryError::corruption(
                    "ring",
                    format!("node {next} doesn't have proper back link to {current}"),
                ));
            }
            if next == self.sentinel {
                return Ok(nodes);
            }
            if nodes.len() >= limit {
                return Err(MemoryError::corruption(
                    "ring",
                    format!("walk exceeded {limit} nodes without reaching the sentinel"),
                ));
            }
            nodes.push(next);
            current = next;
        }
    }
}
