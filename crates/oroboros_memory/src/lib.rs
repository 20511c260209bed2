//! # OROBOROS Memory
//!
//! Three-tier manual memory manager over one fixed backing buffer:
//! - **Zone**: coalescing free-list allocator for small, short-lived data
//! - **Hunk**: two-ended bump arena with watermark rewind for level data
//! - **Cache**: evictable, relocatable entries in the hunk's middle gap
//!
//! ## Architecture Rules
//!
//! 1. **One reservation** - The backing store is allocated once and never resized
//! 2. **Offsets, not pointers** - Every address is a bounds-checked offset into the store
//! 3. **Hunk owns the boundary** - Only hunk growth triggers cache eviction
//! 4. **Single-threaded** - One memory operation at a time
//!
//! ## Example
//!
//! ```rust
//! use oroboros_memory::{MemoryConfig, MemorySystem};
//!
//! let mut config = MemoryConfig::default();
//! config.apply_args(["-zone", "64"]).unwrap();
//!
//! let mut memory = MemorySystem::new(&config).unwrap();
//! let level = memory.low_mark();
//! memory.alloc_low(1024 * 1024, "bsp").unwrap();
//! memory.free_to_low_mark(level).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cache;
pub mod config;
pub mod error;
pub mod hunk;
pub mod list;
pub mod store;
pub mod system;
pub mod zone;

pub use cache::{Cache, CacheEntry, CacheHandle, CacheStats};
pub use config::MemoryConfig;
pub use error::{MemoryError, MemoryResult};
pub use hunk::{GrowthHook, Hunk, HunkRecord, HunkReport, HunkSide, NoCache};
pub use list::{Ring, RingLinks, RingLinksMut};
pub use store::{BackingStore, Gap};
pub use system::MemorySystem;
pub use zone::{Zone, ZoneBlock, ZoneReport};
