//! # Memory Error Types
//!
//! Everything that can go wrong inside the zone, hunk and cache allocators.
//!
//! Every variant is unrecoverable from the allocator's point of view: it is
//! either a programming error, detected corruption, or genuine exhaustion of
//! the fixed backing store. The host decides how to terminate. Expected,
//! recoverable outcomes (a cache miss, a full high hunk) are not errors and
//! are reported through `Option` instead.

use thiserror::Error;

/// Errors that can occur in the memory subsystem.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The zone ring was scanned all the way around without a fit.
    #[error("zone out of memory: failed on allocation of {requested} bytes")]
    OutOfMemory {
        /// Bytes requested by the caller (before header and alignment).
        requested: usize,
    },

    /// Freed an offset that does not carry a zone block tag.
    #[error("invalid free at offset {offset}: no zone tag")]
    InvalidFree {
        /// Payload offset handed to `free`.
        offset: usize,
    },

    /// Freed a zone block that is already free.
    #[error("double free at offset {offset}")]
    DoubleFree {
        /// Payload offset handed to `free`.
        offset: usize,
    },

    /// Zone allocations must carry a non-zero tag.
    #[error("zone allocation tag must be non-zero")]
    InvalidTag,

    /// A size argument was rejected.
    #[error("invalid size {size} for {context}")]
    InvalidSize {
        /// Operation that rejected the size.
        context: &'static str,
        /// The offending size.
        size: usize,
    },

    /// A structural invariant was found broken.
    #[error("{context}: {detail}")]
    Corruption {
        /// Allocator and check that failed.
        context: &'static str,
        /// What exactly was wrong.
        detail: String,
    },

    /// An offset/length pair fell outside the backing store.
    #[error("access out of bounds: offset {offset} + {len} exceeds store of {size} bytes")]
    OutOfBounds {
        /// Start offset of the access.
        offset: usize,
        /// Length of the access.
        len: usize,
        /// Size of the backing store.
        size: usize,
    },

    /// The low hunk cannot grow by the requested amount.
    #[error("hunk exhausted: failed on {requested} bytes, {available} available")]
    HunkExhausted {
        /// Record size including header and alignment.
        requested: usize,
        /// Bytes left between the low and high marks.
        available: usize,
    },

    /// A rewind mark lies outside `[0, used]`.
    #[error("bad {side} hunk mark {mark} (used {used})")]
    BadMark {
        /// `"low"` or `"high"`.
        side: &'static str,
        /// The rejected mark.
        mark: usize,
        /// Bytes currently used on that side.
        used: usize,
    },

    /// The cache is empty and the gap still cannot hold the request.
    #[error("cache exhausted: {requested} bytes is greater than the free hunk ({available})")]
    CacheExhausted {
        /// Entry size including header and alignment.
        requested: usize,
        /// Bytes in the hunk gap.
        available: usize,
    },

    /// `acquire` called on a handle that still owns data.
    #[error("cache handle already allocated")]
    CacheAlreadyAllocated,

    /// `release` called on a handle that owns no data.
    #[error("cache handle not allocated")]
    CacheNotAllocated,

    /// Handle was destroyed or never belonged to this cache.
    #[error("stale cache handle (index {index}, generation {generation})")]
    StaleHandle {
        /// Slot index.
        index: u32,
        /// Generation carried by the handle.
        generation: u32,
    },

    /// Invalid configuration or startup argument.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read a configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Returns true if the error reports broken allocator structure rather
    /// than exhaustion or caller misuse.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. } | Self::OutOfBounds { .. })
    }

    pub(crate) fn corruption(context: &'static str, detail: impl Into<String>) -> Self {
        Self::Corruption {
            context,
            detail: detail.into(),
        }
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
