//! # Memory System
//!
//! The composition root. Owns exactly one hunk (and through it the backing
//! store), one zone and one cache, and wires the cache in as the hunk's
//! growth hook on every hunk allocation.
//!
//! Startup order:
//!
//! 1. Reserve the backing store.
//! 2. Allocate the zone as the first low hunk record, named `"zone"`.
//! 3. Clear the zone.
//! 4. Create an empty cache.

use crate::cache::{Cache, CacheEntry, CacheHandle};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::hunk::{Hunk, HunkReport, HunkSide};
use crate::store::{BackingStore, Gap};
use crate::zone::{Zone, ZoneReport};

/// Name of the hunk record holding the zone.
pub const ZONE_RECORD_NAME: &str = "zone";

/// Zone, hunk and cache over one backing store.
///
/// # Example
///
/// ```rust
/// use oroboros_memory::{MemoryConfig, MemorySystem};
///
/// let mut memory = MemorySystem::new(&MemoryConfig::default()).unwrap();
///
/// let name = memory.zone_alloc(32, 1).unwrap();
/// memory.zone_free(name).unwrap();
///
/// let mark = memory.low_mark();
/// memory.alloc_low(64 * 1024, "map").unwrap();
/// memory.free_to_low_mark(mark).unwrap();
///
/// let skin = memory.create_handle();
/// let data = memory.cache_acquire(skin, 4096, "skin").unwrap();
/// assert_eq!(memory.cache_touch(skin).unwrap(), Some(data));
/// memory.check_integrity().unwrap();
/// ```
#[derive(Debug)]
pub struct MemorySystem {
    hunk: Hunk,
    zone: Zone,
    cache: Cache,
    /// Low mark just past the zone record; low rewinds stop here.
    zone_end: usize,
}

impl MemorySystem {
    /// Builds the system described by `config`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate; any error
    /// from laying out the zone.
    pub fn new(config: &MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        let mut hunk = Hunk::new(BackingStore::new(config.store_size)?);
        let mut cache = Cache::new();

        let zone_size = config.zone_size();
        let base = hunk.allocate_low(zone_size, ZONE_RECORD_NAME, &mut cache)?;
        let zone = Zone::new(hunk.store_mut(), base, zone_size)?;
        let zone_end = hunk.low_mark();

        tracing::info!(
            store_size = config.store_size,
            zone_size,
            zone_base = base,
            "memory system initialized"
        );
        Ok(Self {
            hunk,
            zone,
            cache,
            zone_end,
        })
    }

    /// The hunk, which also owns the backing store.
    #[inline]
    #[must_use]
    pub const fn hunk(&self) -> &Hunk {
        &self.hunk
    }

    /// The zone.
    #[inline]
    #[must_use]
    pub const fn zone(&self) -> &Zone {
        &self.zone
    }

    /// The cache.
    #[inline]
    #[must_use]
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The backing store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &BackingStore {
        self.hunk.store()
    }

    /// Current gap between the hunk sides.
    #[inline]
    #[must_use]
    pub fn gap(&self) -> Gap {
        self.hunk.gap()
    }

    /// Borrows `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the store.
    pub fn bytes(&self, offset: usize, len: usize) -> MemoryResult<&[u8]> {
        self.hunk.store().bytes(offset, len)
    }

    /// Mutably borrows `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the store.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> MemoryResult<&mut [u8]> {
        self.hunk.store_mut().bytes_mut(offset, len)
    }

    // ========================================================================
    // Zone
    // ========================================================================

    /// See [`Zone::allocate`].
    ///
    /// # Errors
    ///
    /// Same as `Zone::allocate`.
    pub fn zone_alloc(&mut self, size: usize, tag: u32) -> MemoryResult<usize> {
        self.zone.allocate(self.hunk.store_mut(), size, tag)
    }

    /// See [`Zone::allocate_zeroed`].
    ///
    /// # Errors
    ///
    /// Same as `Zone::allocate_zeroed`.
    pub fn zone_alloc_zeroed(&mut self, size: usize) -> MemoryResult<usize> {
        self.zone.allocate_zeroed(self.hunk.store_mut(), size)
    }

    /// See [`Zone::free`].
    ///
    /// # Errors
    ///
    /// Same as `Zone::free`.
    pub fn zone_free(&mut self, offset: usize) -> MemoryResult<()> {
        self.zone.free(self.hunk.store_mut(), offset)
    }

    /// See [`Zone::dump`].
    ///
    /// # Errors
    ///
    /// Only fails if the store cannot be read.
    pub fn zone_dump(&self) -> MemoryResult<ZoneReport> {
        self.zone.dump(self.hunk.store())
    }

    // ========================================================================
    // Hunk
    // ========================================================================

    /// See [`Hunk::allocate_low`]. The cache is cleared out of the way first.
    ///
    /// # Errors
    ///
    /// Same as `Hunk::allocate_low`.
    pub fn alloc_low(&mut self, size: usize, name: &str) -> MemoryResult<usize> {
        self.hunk.allocate_low(size, name, &mut self.cache)
    }

    /// See [`Hunk::alloc`].
    ///
    /// # Errors
    ///
    /// Same as `Hunk::alloc`.
    pub fn alloc(&mut self, size: usize) -> MemoryResult<usize> {
        self.hunk.alloc(size, &mut self.cache)
    }

    /// See [`Hunk::allocate_high`].
    ///
    /// # Errors
    ///
    /// Same as `Hunk::allocate_high`.
    pub fn alloc_high(&mut self, size: usize, name: &str) -> MemoryResult<Option<usize>> {
        self.hunk.allocate_high(size, name, &mut self.cache)
    }

    /// See [`Hunk::temp_alloc`].
    ///
    /// # Errors
    ///
    /// Same as `Hunk::temp_alloc`.
    pub fn temp_alloc(&mut self, size: usize) -> MemoryResult<Option<usize>> {
        self.hunk.temp_alloc(size, &mut self.cache)
    }

    /// See [`Hunk::low_mark`].
    #[inline]
    #[must_use]
    pub const fn low_mark(&self) -> usize {
        self.hunk.low_mark()
    }

    /// See [`Hunk::high_mark`].
    ///
    /// # Errors
    ///
    /// Same as `Hunk::high_mark`.
    pub fn high_mark(&mut self) -> MemoryResult<usize> {
        self.hunk.high_mark()
    }

    /// See [`Hunk::free_to_low_mark`]. The zone record is permanent, so the
    /// mark may not reach below it.
    ///
    /// # Errors
    ///
    /// `BadMark` if `mark` lies inside the zone record; otherwise the same
    /// as `Hunk::free_to_low_mark`.
    pub fn free_to_low_mark(&mut self, mark: usize) -> MemoryResult<()> {
        if mark < self.zone_end {
            return Err(MemoryError::BadMark {
                side: HunkSide::Low.label(),
                mark,
                used: self.hunk.low_mark(),
            });
        }
        self.hunk.free_to_low_mark(mark)
    }

    /// See [`Hunk::free_to_high_mark`].
    ///
    /// # Errors
    ///
    /// Same as `Hunk::free_to_high_mark`.
    pub fn free_to_high_mark(&mut self, mark: usize) -> MemoryResult<()> {
        self.hunk.free_to_high_mark(mark)
    }

    /// See [`Hunk::dump`].
    ///
    /// # Errors
    ///
    /// Same as `Hunk::dump`.
    pub fn hunk_dump(&self, all: bool) -> MemoryResult<HunkReport> {
        self.hunk.dump(all)
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// See [`Cache::create_handle`].
    pub fn create_handle(&mut self) -> CacheHandle {
        self.cache.create_handle()
    }

    /// See [`Cache::destroy_handle`].
    ///
    /// # Errors
    ///
    /// Same as `Cache::destroy_handle`.
    pub fn destroy_handle(&mut self, handle: CacheHandle) -> MemoryResult<()> {
        self.cache.destroy_handle(self.hunk.store_mut(), handle)
    }

    /// See [`Cache::acquire`]; places the entry in the current gap.
    ///
    /// # Errors
    ///
    /// Same as `Cache::acquire`.
    pub fn cache_acquire(&mut self, handle: CacheHandle, size: usize, name: &str) -> MemoryResult<usize> {
        let gap = self.hunk.gap();
        self.cache.acquire(self.hunk.store_mut(), gap, handle, size, name)
    }

    /// See [`Cache::touch`].
    ///
    /// # Errors
    ///
    /// Same as `Cache::touch`.
    pub fn cache_touch(&mut self, handle: CacheHandle) -> MemoryResult<Option<usize>> {
        self.cache.touch(self.hunk.store_mut(), handle)
    }

    /// See [`Cache::release`].
    ///
    /// # Errors
    ///
    /// Same as `Cache::release`.
    pub fn cache_release(&mut self, handle: CacheHandle) -> MemoryResult<()> {
        self.cache.release(self.hunk.store_mut(), handle)
    }

    /// See [`Cache::flush`].
    ///
    /// # Errors
    ///
    /// Same as `Cache::flush`.
    pub fn cache_flush(&mut self) -> MemoryResult<()> {
        self.cache.flush(self.hunk.store_mut())
    }

    /// See [`Cache::dump`].
    ///
    /// # Errors
    ///
    /// Same as `Cache::dump`.
    pub fn cache_dump(&self) -> MemoryResult<Vec<CacheEntry>> {
        self.cache.dump(self.hunk.store())
    }

    /// See [`Cache::report`].
    #[must_use]
    pub fn cache_report(&self) -> f64 {
        self.cache.report(self.hunk.gap())
    }

    /// Validates the hunk, the zone and the cache.
    ///
    /// # Errors
    ///
    /// The first `Corruption` found.
    pub fn check_integrity(&self) -> MemoryResult<()> {
        self.hunk.check_integrity()?;
        self.zone.check_integrity(self.hunk.store())?;
        self.cache.check_integrity(self.hunk.store(), self.hunk.gap())
    }
}
