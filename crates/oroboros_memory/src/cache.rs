//! # Cache Allocator
//!
//! Evictable, relocatable entries kept in the hunk's unused middle gap.
//!
//! ```text
//!   low hunk │ entry │ entry │   free   │ entry │     free      │ high hunk
//!            ▲ gap.low                                          ▲ gap.high
//! ```
//!
//! Every entry sits on two rings anchored at one virtual sentinel:
//!
//! - **address order**, used to find space with a bottom-up first fit;
//! - **recency order**, most recently touched first, used to pick victims.
//!
//! Callers never hold entry offsets. They hold a [`CacheHandle`], and the
//! handle is the only way back to the payload. When the hunk grows into
//! occupied space the cache moves entries elsewhere in the gap, or drops
//! them, and updates the handle. A handle's data is therefore "might still
//! be here": every read goes through [`Cache::touch`], and a miss means the
//! caller re-derives the data and acquires again.

use bytemuck::{Pod, Zeroable};

use crate::error::{MemoryError, MemoryResult};
use crate::hunk::GrowthHook;
use crate::list::{Ring, RingLinks, RingLinksMut, DETACHED};
use crate::store::{align_up, pack_name, unpack_name, BackingStore, Gap};

/// Entry sizes (header included) are multiples of this.
pub const CACHE_ALIGN: usize = 16;

/// Bytes of header in front of each payload.
pub const CACHE_HEADER: usize = std::mem::size_of::<EntryHeader>();

/// Maximum stored length of an entry name.
pub const CACHE_NAME_LEN: usize = 15;

/// Node id of the shared sentinel. It has no bytes in the store; its links
/// live in [`Cache`] itself.
const HEAD: usize = usize::MAX - 1;

/// Owner index of an entry that is not bound to a handle yet.
const UNOWNED: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EntryHeader {
    /// Including the header.
    size: u32,
    owner_index: u32,
    owner_generation: u32,
    _pad: u32,
    name: [u8; CACHE_NAME_LEN + 1],
    prev: u64,
    next: u64,
    lru_prev: u64,
    lru_next: u64,
}

impl EntryHeader {
    fn detached(size: usize) -> Self {
        Self {
            size: size as u32,
            owner_index: UNOWNED,
            owner_generation: 0,
            _pad: 0,
            name: [0; CACHE_NAME_LEN + 1],
            prev: DETACHED as u64,
            next: DETACHED as u64,
            lru_prev: DETACHED as u64,
            lru_next: DETACHED as u64,
        }
    }
}

/// Links of the virtual sentinel for one ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HeadLinks {
    next: usize,
    prev: usize,
}

impl HeadLinks {
    const EMPTY: Self = Self { next: HEAD, prev: HEAD };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Order {
    Address,
    Recency,
}

/// Read-only view of one ordering.
struct EntryView<'a> {
    store: &'a BackingStore,
    head: &'a HeadLinks,
    order: Order,
}

impl RingLinks for EntryView<'_> {
    fn next(&self, node: usize) -> MemoryResult<usize> {
        if node == HEAD {
            return Ok(self.head.next);
        }
        let header: EntryHeader = self.store.read(node)?;
        let next = match self.order {
            Order::Address => header.next,
            Order::Recency => header.lru_next,
        };
        Ok(next as usize)
    }

    fn prev(&self, node: usize) -> MemoryResult<usize> {
        if node == HEAD {
            return Ok(self.head.prev);
        }
        let header: EntryHeader = self.store.read(node)?;
        let prev = match self.order {
            Order::Address => header.prev,
            Order::Recency => header.lru_prev,
        };
        Ok(prev as usize)
    }
}

/// Mutable access to one ordering.
struct EntryLinks<'a> {
    store: &'a mut BackingStore,
    head: &'a mut HeadLinks,
    order: Order,
}

impl EntryLinks<'_> {
    fn view(&self) -> EntryView<'_> {
        EntryView {
            store: &*self.store,
            head: &*self.head,
            order: self.order,
        }
    }

    fn update(&mut self, node: usize, value: usize, forward: bool) -> MemoryResult<()> {
        if node == HEAD {
            if forward {
                self.head.next = value;
            } else {
                self.head.prev = value;
            }
            return Ok(());
        }
        let mut header: EntryHeader = self.store.read(node)?;
        let field = match (self.order, forward) {
            (Order::Address, true) => &mut header.next,
            (Order::Address, false) => &mut header.prev,
            (Order::Recency, true) => &mut header.lru_next,
            (Order::Recency, false) => &mut header.lru_prev,
        };
        *field = value as u64;
        self.store.write(node, &header)
    }
}

impl RingLinks for EntryLinks<'_> {
    fn next(&self, node: usize) -> MemoryResult<usize> {
        self.view().next(node)
    }

    fn prev(&self, node: usize) -> MemoryResult<usize> {
        self.view().prev(node)
    }
}

impl RingLinksMut for EntryLinks<'_> {
    fn set_next(&mut self, node: usize, next: usize) -> MemoryResult<()> {
        self.update(node, next, true)
    }

    fn set_prev(&mut self, node: usize, prev: usize) -> MemoryResult<()> {
        self.update(node, prev, false)
    }
}

/// Caller-held reference to at most one cache entry.
///
/// Handles are issued by [`Cache::create_handle`]. The generation makes a
/// destroyed handle unusable even after its slot is reissued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheHandle {
    index: u32,
    generation: u32,
}

impl CacheHandle {
    /// Slot index inside the issuing cache.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Clone, Copy, Debug)]
struct HandleSlot {
    generation: u32,
    live: bool,
    /// Payload offset of the owned entry.
    data: Option<usize>,
}

/// Counters kept by the cache since it was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful `acquire` calls.
    pub acquisitions: u64,
    /// `touch` calls that found data.
    pub hits: u64,
    /// `touch` calls that found nothing.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries moved elsewhere in the gap.
    pub relocations: u64,
}

/// Snapshot of one live entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// Offset of the entry header.
    pub offset: usize,
    /// Offset of the payload.
    pub payload: usize,
    /// Entry size including header.
    pub size: usize,
    /// Entry name (at most fifteen bytes).
    pub name: String,
    /// Handle that owns the entry.
    pub owner: CacheHandle,
}

impl CacheEntry {
    /// One past the last byte of the entry.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Which free spans a placement may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    /// Any span, lowest first.
    Lowest,
    /// Skip the span below the first entry.
    AboveFirst,
}

/// The cache allocator. Entry bytes live in the backing store; rings,
/// handles and counters live here.
///
/// # Thread Safety
///
/// NOT thread-safe.
///
/// # Example
///
/// ```rust
/// use oroboros_memory::{BackingStore, Cache, Gap};
///
/// let mut store = BackingStore::new(4096).unwrap();
/// let gap = Gap { low: 0, high: 4096 };
/// let mut cache = Cache::new();
///
/// let sound = cache.create_handle();
/// let data = cache.acquire(&mut store, gap, sound, 256, "sound/door").unwrap();
/// assert_eq!(cache.touch(&mut store, sound).unwrap(), Some(data));
///
/// cache.release(&mut store, sound).unwrap();
/// assert_eq!(cache.touch(&mut store, sound).unwrap(), None);
/// ```
#[derive(Debug)]
pub struct Cache {
    address: HeadLinks,
    recency: HeadLinks,
    slots: Vec<HandleSlot>,
    free_slots: Vec<u32>,
    entries: usize,
    stats: CacheStats,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Creates an empty cache: both orderings are empty rings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            address: HeadLinks::EMPTY,
            recency: HeadLinks::EMPTY,
            slots: Vec::new(),
            free_slots: Vec::new(),
            entries: 0,
            stats: CacheStats::default(),
        }
    }

    /// Number of live entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries
    }

    /// True if no entries are live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Counters since creation.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    fn ring() -> Ring {
        Ring::new(HEAD)
    }

    fn view<'a>(&'a self, store: &'a BackingStore, order: Order) -> EntryView<'a> {
        let head = match order {
            Order::Address => &self.address,
            Order::Recency => &self.recency,
        };
        EntryView { store, head, order }
    }

    fn links<'a>(&'a mut self, store: &'a mut BackingStore, order: Order) -> EntryLinks<'a> {
        let head = match order {
            Order::Address => &mut self.address,
            Order::Recency => &mut self.recency,
        };
        EntryLinks { store, head, order }
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Issues a handle that owns no data.
    pub fn create_handle(&mut self) -> CacheHandle {
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            return CacheHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(HandleSlot {
            generation: 0,
            live: true,
            data: None,
        });
        CacheHandle { index, generation: 0 }
    }

    /// Releases any data the handle owns and retires it.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the handle was already destroyed.
    pub fn destroy_handle(&mut self, store: &mut BackingStore, handle: CacheHandle) -> MemoryResult<()> {
        if self.slot(handle)?.data.is_some() {
            self.release(store, handle)?;
        }
        let slot = &mut self.slots[handle.index as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        Ok(())
    }

    fn slot(&self, handle: CacheHandle) -> MemoryResult<&HandleSlot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.live && slot.generation == handle.generation)
            .ok_or(MemoryError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            })
    }

    fn slot_mut(&mut self, handle: CacheHandle) -> MemoryResult<&mut HandleSlot> {
        self.slot(handle)?;
        Ok(&mut self.slots[handle.index as usize])
    }

    /// Payload offset the handle currently owns, without refreshing recency.
    ///
    /// # Errors
    ///
    /// `StaleHandle` for a destroyed handle.
    pub fn data(&self, handle: CacheHandle) -> MemoryResult<Option<usize>> {
        Ok(self.slot(handle)?.data)
    }

    // ========================================================================
    // Acquire / touch / release
    // ========================================================================

    /// Places a new entry of `size` payload bytes in `gap` and binds it to
    /// `handle`, evicting least recently touched entries until it fits.
    ///
    /// The new entry becomes the most recently used. Returns the payload
    /// offset. Payload bytes are not cleared.
    ///
    /// # Errors
    ///
    /// - `CacheAlreadyAllocated` if the handle owns data.
    /// - `InvalidSize` for a zero size.
    /// - `CacheExhausted` when every entry has been evicted and the gap is
    ///   still too small.
    pub fn acquire(
        &mut self,
        store: &mut BackingStore,
        gap: Gap,
        handle: CacheHandle,
        size: usize,
        name: &str,
    ) -> MemoryResult<usize> {
        if self.slot(handle)?.data.is_some() {
            return Err(MemoryError::CacheAlreadyAllocated);
        }
        if size == 0 {
            return Err(MemoryError::InvalidSize {
                context: "cache entry",
                size,
            });
        }
        let total = size
            .checked_add(CACHE_HEADER + CACHE_ALIGN)
            .filter(|&total| total <= u32::MAX as usize)
            .map(|total| align_up(total - CACHE_ALIGN, CACHE_ALIGN))
            .ok_or(MemoryError::CacheExhausted {
                requested: size,
                available: gap.len(),
            })?;

        let entry = loop {
            if let Some(entry) = self.try_place(store, gap, total, Placement::Lowest)? {
                break entry;
            }
            let victim = Self::ring().last(&self.view(store, Order::Recency))?;
            let Some(victim) = victim else {
                return Err(MemoryError::CacheExhausted {
                    requested: total,
                    available: gap.len(),
                });
            };
            self.evict(store, victim)?;
        };

        let mut header: EntryHeader = store.read(entry)?;
        header.name = pack_name(name, CACHE_NAME_LEN);
        header.owner_index = handle.index;
        header.owner_generation = handle.generation;
        store.write(entry, &header)?;

        let payload = entry + CACHE_HEADER;
        self.slot_mut(handle)?.data = Some(payload);
        self.stats.acquisitions += 1;
        tracing::trace!(entry, size = total, name, "cache acquire");
        Ok(payload)
    }

    /// Returns the handle's payload offset and marks it most recently used,
    /// or `None` if the data is no longer present.
    ///
    /// # Errors
    ///
    /// `StaleHandle` for a destroyed handle; `Corruption` if the entry is
    /// not on the recency ring.
    pub fn touch(&mut self, store: &mut BackingStore, handle: CacheHandle) -> MemoryResult<Option<usize>> {
        let Some(payload) = self.slot(handle)?.data else {
            self.stats.misses += 1;
            return Ok(None);
        };
        let entry = payload - CACHE_HEADER;
        Self::ring().move_to_front(&mut self.links(store, Order::Recency), entry)?;
        self.stats.hits += 1;
        Ok(Some(payload))
    }

    /// Drops the handle's entry.
    ///
    /// # Errors
    ///
    /// `CacheNotAllocated` if the handle owns no data.
    pub fn release(&mut self, store: &mut BackingStore, handle: CacheHandle) -> MemoryResult<()> {
        let payload = self.slot(handle)?.data.ok_or(MemoryError::CacheNotAllocated)?;
        let entry = payload - CACHE_HEADER;
        self.unlink(store, entry)?;
        tracing::trace!(entry, "cache release");
        Ok(())
    }

    /// Releases every entry. Handles stay valid and read as not present.
    ///
    /// # Errors
    ///
    /// `Corruption` if an entry cannot be unlinked.
    pub fn flush(&mut self, store: &mut BackingStore) -> MemoryResult<()> {
        let mut flushed = 0usize;
        loop {
            let first = Self::ring().first(&self.view(store, Order::Address))?;
            let Some(entry) = first else { break };
            self.unlink(store, entry)?;
            flushed += 1;
        }
        tracing::debug!(flushed, "cache flush");
        Ok(())
    }

    // ========================================================================
    // Placement
    // ========================================================================

    /// Finds room for an entry of `size` bytes inside `gap` and links a
    /// fresh unowned header into both rings.
    fn try_place(
        &mut self,
        store: &mut BackingStore,
        gap: Gap,
        size: usize,
        placement: Placement,
    ) -> MemoryResult<Option<usize>> {
        let ring = Self::ring();
        let first = ring.first(&self.view(store, Order::Address))?;
        let fits = |start: usize, limit: usize| limit >= start && limit - start >= size;

        let mut candidate = gap.low;
        let mut cursor = first;
        while let Some(entry) = cursor {
            let skip = placement == Placement::AboveFirst && Some(entry) == first;
            if !skip && fits(candidate, entry.min(gap.high)) {
                self.link_new(store, candidate, size, Some(entry))?;
                return Ok(Some(candidate));
            }
            let header: EntryHeader = store.read(entry)?;
            candidate = (entry + header.size as usize).max(gap.low);
            let next = self.view(store, Order::Address).next(entry)?;
            cursor = (next != HEAD).then_some(next);
        }

        if fits(candidate, gap.high) {
            self.link_new(store, candidate, size, None)?;
            return Ok(Some(candidate));
        }
        Ok(None)
    }

    /// Writes a detached header at `entry` and links it before `before`
    /// (or at the end) in address order and at the front in recency order.
    fn link_new(
        &mut self,
        store: &mut BackingStore,
        entry: usize,
        size: usize,
        before: Option<usize>,
    ) -> MemoryResult<()> {
        store.write(entry, &EntryHeader::detached(size))?;
        let ring = Self::ring();
        {
            let mut links = self.links(store, Order::Address);
            match before {
                Some(anchor) => ring.insert_before(&mut links, anchor, entry)?,
                None => ring.push_back(&mut links, entry)?,
            }
        }
        ring.push_front(&mut self.links(store, Order::Recency), entry)?;
        self.entries += 1;
        Ok(())
    }

    /// Removes an entry from both rings and clears its owner's data.
    fn unlink(&mut self, store: &mut BackingStore, entry: usize) -> MemoryResult<()> {
        let header: EntryHeader = store.read(entry)?;
        let owner = CacheHandle {
            index: header.owner_index,
            generation: header.owner_generation,
        };
        let slot = self
            .slot_mut(owner)
            .ok()
            .filter(|slot| slot.data == Some(entry + CACHE_HEADER))
            .ok_or_else(|| {
                MemoryError::corruption("cache", format!("entry {entry} is not owned by its handle"))
            })?;
        slot.data = None;

        let ring = Self::ring();
        ring.remove(&mut self.links(store, Order::Address), entry)?;
        ring.remove(&mut self.links(store, Order::Recency), entry)?;
        self.entries -= 1;
        Ok(())
    }

    fn evict(&mut self, store: &mut BackingStore, entry: usize) -> MemoryResult<()> {
        self.unlink(store, entry)?;
        self.stats.evictions += 1;
        tracing::trace!(entry, "cache evict");
        Ok(())
    }

    /// Moves an entry elsewhere in `gap`, or evicts it if there is no room.
    fn relocate(
        &mut self,
        store: &mut BackingStore,
        gap: Gap,
        entry: usize,
        placement: Placement,
    ) -> MemoryResult<()> {
        let old: EntryHeader = store.read(entry)?;
        let size = old.size as usize;
        let Some(moved) = self.try_place(store, gap, size, placement)? else {
            return self.evict(store, entry);
        };

        store.copy_within(entry + CACHE_HEADER, moved + CACHE_HEADER, size - CACHE_HEADER)?;
        let mut header: EntryHeader = store.read(moved)?;
        header.name = old.name;
        header.owner_index = old.owner_index;
        header.owner_generation = old.owner_generation;
        store.write(moved, &header)?;

        let owner = CacheHandle {
            index: old.owner_index,
            generation: old.owner_generation,
        };
        self.unlink(store, entry)?;
        self.slot_mut(owner)?.data = Some(moved + CACHE_HEADER);
        self.stats.relocations += 1;
        tracing::trace!(from = entry, to = moved, size, "cache relocate");
        Ok(())
    }

    /// Attempts allowed in one reclaim pass before candidates are evicted
    /// outright.
    fn reclaim_budget(&self) -> usize {
        2 * self.entries + 1
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    fn entry_at(store: &BackingStore, entry: usize) -> MemoryResult<CacheEntry> {
        let header: EntryHeader = store.read(entry)?;
        Ok(CacheEntry {
            offset: entry,
            payload: entry + CACHE_HEADER,
            size: header.size as usize,
            name: unpack_name(&header.name),
            owner: CacheHandle {
                index: header.owner_index,
                generation: header.owner_generation,
            },
        })
    }

    /// Live entries in address order.
    ///
    /// # Errors
    ///
    /// `Corruption` if the address ring is broken.
    pub fn entries(&self, store: &BackingStore) -> MemoryResult<Vec<CacheEntry>> {
        Self::ring()
            .collect(&self.view(store, Order::Address), self.entries)?
            .into_iter()
            .map(|entry| Self::entry_at(store, entry))
            .collect()
    }

    /// Owners of the live entries, most recently used first.
    ///
    /// # Errors
    ///
    /// `Corruption` if the recency ring is broken.
    pub fn recency(&self, store: &BackingStore) -> MemoryResult<Vec<CacheHandle>> {
        Self::ring()
            .collect(&self.view(store, Order::Recency), self.entries)?
            .into_iter()
            .map(|entry| Self::entry_at(store, entry).map(|entry| entry.owner))
            .collect()
    }

    /// Lists every entry in address order, logging one line per entry.
    ///
    /// # Errors
    ///
    /// `Corruption` if the address ring is broken.
    pub fn dump(&self, store: &BackingStore) -> MemoryResult<Vec<CacheEntry>> {
        let entries = self.entries(store)?;
        for entry in &entries {
            tracing::info!("{:8} : {}", entry.size, entry.name);
        }
        Ok(entries)
    }

    /// Size of the data cache (the whole gap) in megabytes, also logged.
    #[must_use]
    pub fn report(&self, gap: Gap) -> f64 {
        let megabytes = gap.len() as f64 / (1024.0 * 1024.0);
        tracing::info!("{megabytes:4.1} megabyte data cache ({} entries)", self.entries);
        megabytes
    }

    /// Verifies both orderings and every handle back-reference.
    ///
    /// # Errors
    ///
    /// `Corruption` describing the first problem found.
    pub fn check_integrity(&self, store: &BackingStore, gap: Gap) -> MemoryResult<()> {
        let ring = Self::ring();
        let by_address = ring.collect(&self.view(store, Order::Address), self.entries)?;
        let mut by_recency = ring.collect(&self.view(store, Order::Recency), self.entries)?;
        if by_address.len() != self.entries || by_recency.len() != self.entries {
            return Err(MemoryError::corruption(
                "cache check",
                format!(
                    "{} entries counted, {} in address order, {} in recency order",
                    self.entries,
                    by_address.len(),
                    by_recency.len()
                ),
            ));
        }

        let mut floor = gap.low;
        for &offset in &by_address {
            let entry = Self::entry_at(store, offset)?;
            if entry.offset < floor {
                return Err(MemoryError::corruption(
                    "cache check",
                    format!("entry {offset} overlaps the previous entry or the low hunk"),
                ));
            }
            if entry.size < CACHE_HEADER || entry.size % CACHE_ALIGN != 0 || entry.end() > gap.high {
                return Err(MemoryError::corruption(
                    "cache check",
                    format!("entry {offset} has bad size {} for gap {gap:?}", entry.size),
                ));
            }
            let bound = self
                .slot(entry.owner)
                .ok()
                .and_then(|slot| slot.data)
                .is_some_and(|data| data == entry.payload);
            if !bound {
                return Err(MemoryError::corruption(
                    "cache check",
                    format!("entry {offset} and its handle do not reference each other"),
                ));
            }
            floor = entry.end();
        }

        by_recency.sort_unstable();
        if by_recency != by_address {
            return Err(MemoryError::corruption(
                "cache check",
                "address and recency orders hold different entries",
            ));
        }

        let bound_handles = self.slots.iter().filter(|slot| slot.data.is_some()).count();
        if bound_handles != self.entries {
            return Err(MemoryError::corruption(
                "cache check",
                format!("{bound_handles} handles hold data for {} entries", self.entries),
            ));
        }
        Ok(())
    }
}

impl GrowthHook for Cache {
    /// Vacates everything below `gap.low`, moving entries upward where
    /// possible.
    fn reclaim_below(&mut self, store: &mut BackingStore, gap: Gap) -> MemoryResult<()> {
        let mut budget = self.reclaim_budget();
        let before = self.stats;
        loop {
            let first = Self::ring().first(&self.view(store, Order::Address))?;
            let Some(first) = first.filter(|&first| first < gap.low) else {
                break;
            };
            if budget == 0 {
                self.evict(store, first)?;
            } else {
                budget -= 1;
                self.relocate(store, gap, first, Placement::AboveFirst)?;
            }
        }
        tracing::debug!(
            low = gap.low,
            relocated = self.stats.relocations - before.relocations,
            evicted = self.stats.evictions - before.evictions,
            "cache reclaim below"
        );
        Ok(())
    }

    /// Vacates everything at or above `gap.high`. A candidate that is still
    /// last after being moved once is evicted.
    fn reclaim_above(&mut self, store: &mut BackingStore, gap: Gap) -> MemoryResult<()> {
        let mut budget = self.reclaim_budget();
        let before = self.stats;
        let mut previous = None;
        loop {
            let last = Self::ring().last(&self.view(store, Order::Address))?;
            let Some(last) = last else { break };
            let header: EntryHeader = store.read(last)?;
            if last + header.size as usize <= gap.high {
                break;
            }
            if budget == 0 || previous == Some(last) {
                self.evict(store, last)?;
            } else {
                budget -= 1;
                self.relocate(store, gap, last, Placement::Lowest)?;
                previous = Some(last);
            }
        }
        tracing::debug!(
            high = gap.high,
            relocated = self.stats.relocations - before.relocations,
            evicted = self.stats.evictions - before.evictions,
            "cache reclaim above"
        );
        Ok(())
    }
}
