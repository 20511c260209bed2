//! # Zone Allocator
//!
//! General-purpose allocator for small, short-lived, individually freed
//! allocations (strings, small records). It lives inside one permanent hunk
//! allocation and never grows.
//!
//! ## Layout
//!
//! ```text
//! base
//!  │
//!  ▼
//! ┌──────────┬─────────────────────┬──────────┬──────────────────────────┐
//! │ sentinel │ block hdr │ payload │ marker │ ... │ block hdr │ free space  │
//! └──────────┴─────────────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! Blocks exactly tile the zone: there is never space between blocks and
//! there are never two contiguous free blocks. The sentinel is a permanently
//! used, zero-sized block that anchors the ring.
//!
//! The rover can be left pointing at a used block. Allocation starts its
//! first-fit scan at the rover, which spreads allocations around the ring
//! instead of always packing the low end.

use bytemuck::{Pod, Zeroable};

use crate::error::{MemoryError, MemoryResult};
use crate::list::{Ring, RingLinks, RingLinksMut};
use crate::store::{align_up, BackingStore};

/// Integrity tag stamped on every zone block header and tail marker.
pub const ZONE_TAG: u32 = 0x001d_4a11;

/// Default zone capacity in bytes (48 KiB).
pub const DEFAULT_ZONE_SIZE: usize = 0xc000;

/// Leftover space must exceed this before a block is split.
pub const MIN_FRAGMENT: usize = 64;

/// Tag used by [`Zone::allocate_zeroed`].
pub const DEFAULT_TAG: u32 = 1;

/// Bytes of header in front of each payload.
pub const BLOCK_HEADER: usize = std::mem::size_of::<BlockHeader>();

/// Bytes reserved at the end of each block for the trash marker.
const TRASH_MARKER: usize = 4;

/// Block sizes are multiples of this.
const BLOCK_ALIGN: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlockHeader {
    /// Including the header and possibly tiny fragments.
    size: u32,
    /// 0 for a free block, otherwise the allocation tag.
    used: u32,
    /// Should be `ZONE_TAG` (the sentinel carries 0).
    tag: u32,
    _pad: u32,
    prev: u64,
    next: u64,
}

fn read_block(store: &BackingStore, block: usize) -> MemoryResult<BlockHeader> {
    store.read(block)
}

fn write_block(store: &mut BackingStore, block: usize, header: &BlockHeader) -> MemoryResult<()> {
    store.write(block, header)
}

/// Ring access to the link fields stored in block headers.
struct BlockLinks<'a> {
    store: &'a mut BackingStore,
}

impl RingLinks for BlockLinks<'_> {
    fn next(&self, node: usize) -> MemoryResult<usize> {
        Ok(read_block(self.store, node)?.next as usize)
    }

    fn prev(&self, node: usize) -> MemoryResult<usize> {
        Ok(read_block(self.store, node)?.prev as usize)
    }
}

impl RingLinksMut for BlockLinks<'_> {
    fn set_next(&mut self, node: usize, next: usize) -> MemoryResult<()> {
        let mut header = read_block(self.store, node)?;
        header.next = next as u64;
        write_block(self.store, node, &header)
    }

    fn set_prev(&mut self, node: usize, prev: usize) -> MemoryResult<()> {
        let mut header = read_block(self.store, node)?;
        header.prev = prev as u64;
        write_block(self.store, node, &header)
    }
}

/// Snapshot of one zone block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneBlock {
    /// Offset of the block header in the backing store.
    pub offset: usize,
    /// Block size including header, marker and absorbed fragment.
    pub size: usize,
    /// Allocation tag; 0 for a free block.
    pub tag: u32,
}

impl ZoneBlock {
    /// True if the block is free.
    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.tag == 0
    }
}

/// Diagnostic listing produced by [`Zone::dump`].
#[derive(Clone, Debug, Default)]
pub struct ZoneReport {
    /// Zone base offset.
    pub base: usize,
    /// Zone capacity in bytes.
    pub capacity: usize,
    /// Every block in ring order, sentinel excluded.
    pub blocks: Vec<ZoneBlock>,
    /// Structural problems found during the walk.
    pub problems: Vec<String>,
}

impl std::fmt::Display for ZoneReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "zone size: {}  location: {:#x}", self.capacity, self.base)?;
        for block in &self.blocks {
            writeln!(
                f,
                "block:{:#010x}    size:{:7}    tag:{:3}",
                block.offset, block.size, block.tag
            )?;
        }
        for problem in &self.problems {
            writeln!(f, "ERROR: {problem}")?;
        }
        Ok(())
    }
}

/// A coalescing first-fit allocator over a fixed span of the backing store.
///
/// # Thread Safety
///
/// NOT thread-safe. One zone per memory system, driven from one thread.
///
/// # Example
///
/// ```rust
/// use oroboros_memory::{BackingStore, Zone};
///
/// let mut store = BackingStore::new(8192).unwrap();
/// let mut zone = Zone::new(&mut store, 0, 4096).unwrap();
///
/// let name = zone.allocate(&mut store, 32, 1).unwrap();
/// zone.free(&mut store, name).unwrap();
/// zone.check_integrity(&store).unwrap();
/// ```
#[derive(Debug)]
pub struct Zone {
    /// Offset of the sentinel block.
    base: usize,
    /// Total bytes, sentinel included.
    capacity: usize,
    /// Where the next search starts.
    rover: usize,
}

impl Zone {
    /// Lays out a zone of `capacity` bytes at `base` and clears it.
    ///
    /// # Errors
    ///
    /// `InvalidSize` if the capacity cannot hold the sentinel plus one
    /// minimal block; `OutOfBounds` if the span leaves the store.
    pub fn new(store: &mut BackingStore, base: usize, capacity: usize) -> MemoryResult<Self> {
        if capacity < 2 * BLOCK_HEADER + MIN_FRAGMENT || capacity > u32::MAX as usize {
            return Err(MemoryError::InvalidSize {
                context: "zone capacity",
                size: capacity,
            });
        }
        store.bytes(base, capacity)?;
        let mut zone = Self {
            base,
            capacity,
            rover: base + BLOCK_HEADER,
        };
        zone.clear(store)?;
        Ok(zone)
    }

    /// Offset of the sentinel block.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Total bytes managed, sentinel included.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block the next allocation scan starts from.
    #[inline]
    #[must_use]
    pub const fn rover(&self) -> usize {
        self.rover
    }

    #[inline]
    fn ring(&self) -> Ring {
        Ring::new(self.base)
    }

    #[inline]
    fn end(&self) -> usize {
        self.base + self.capacity
    }

    /// Resets the zone to the sentinel plus one free block spanning the rest.
    ///
    /// Every outstanding allocation is forgotten.
    ///
    /// # Errors
    ///
    /// Propagates store access failures.
    pub fn clear(&mut self, store: &mut BackingStore) -> MemoryResult<()> {
        let block = self.base + BLOCK_HEADER;
        write_block(
            store,
            self.base,
            &BlockHeader {
                size: 0,
                used: DEFAULT_TAG,
                tag: 0,
                _pad: 0,
                prev: block as u64,
                next: block as u64,
            },
        )?;
        write_block(
            store,
            block,
            &BlockHeader {
                size: (self.capacity - BLOCK_HEADER) as u32,
                used: 0,
                tag: ZONE_TAG,
                _pad: 0,
                prev: self.base as u64,
                next: self.base as u64,
            },
        )?;
        self.rover = block;
        tracing::trace!(base = self.base, capacity = self.capacity, "zone cleared");
        Ok(())
    }

    /// Allocates `size` payload bytes labelled with `tag`.
    ///
    /// Returns the payload offset. The payload is not cleared.
    ///
    /// # Errors
    ///
    /// - `InvalidTag` if `tag` is 0
    /// - `OutOfMemory` if a full trip around the ring finds no fit
    pub fn allocate(&mut self, store: &mut BackingStore, size: usize, tag: u32) -> MemoryResult<usize> {
        if tag == 0 {
            return Err(MemoryError::InvalidTag);
        }
        let requested = size;
        if size >= self.capacity {
            return Err(MemoryError::OutOfMemory { requested });
        }
        let size = align_up(size + BLOCK_HEADER + TRASH_MARKER, BLOCK_ALIGN);

        // Scan for the first free block of sufficient size, starting at the
        // rover and stopping once the cursor gets back to where it began.
        let mut base = self.rover;
        let mut cursor = base;
        let start = read_block(store, base)?.prev as usize;
        loop {
            if cursor == start {
                tracing::trace!(requested, "zone scan wrapped without a fit");
                return Err(MemoryError::OutOfMemory { requested });
            }
            let header = read_block(store, cursor)?;
            if header.used != 0 {
                base = header.next as usize;
                cursor = base;
            } else {
                cursor = header.next as usize;
            }
            let candidate = read_block(store, base)?;
            if candidate.used == 0 && candidate.size as usize >= size {
                break;
            }
        }

        let mut header = read_block(store, base)?;
        let extra = header.size as usize - size;
        if extra > MIN_FRAGMENT {
            // There will be a free fragment after the allocated block.
            let fragment = base + size;
            write_block(
                store,
                fragment,
                &BlockHeader {
                    size: extra as u32,
                    used: 0,
                    tag: ZONE_TAG,
                    _pad: 0,
                    prev: 0,
                    next: 0,
                },
            )?;
            self.ring()
                .insert_after(&mut BlockLinks { store: &mut *store }, base, fragment)?;
            header = read_block(store, base)?;
            header.size = size as u32;
        }

        header.used = tag;
        header.tag = ZONE_TAG;
        write_block(store, base, &header)?;
        self.rover = header.next as usize;

        store.write_u32(base + header.size as usize - TRASH_MARKER, ZONE_TAG)?;

        let payload = base + BLOCK_HEADER;
        tracing::trace!(payload, requested, block = header.size, tag, "zone alloc");
        Ok(payload)
    }

    /// Allocates `size` bytes with the default tag and zero-fills them.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if no block is large enough.
    pub fn allocate_zeroed(&mut self, store: &mut BackingStore, size: usize) -> MemoryResult<usize> {
        let payload = self.allocate(store, size, DEFAULT_TAG)?;
        store.zero(payload, size)?;
        Ok(payload)
    }

    /// Frees the allocation whose payload starts at `offset`.
    ///
    /// The block is merged with a free predecessor and then with a free
    /// successor, so no two adjacent blocks are ever both free.
    ///
    /// # Errors
    ///
    /// - `InvalidFree` if `offset` is not a zone payload
    /// - `DoubleFree` if the block is already free
    /// - `Corruption` if the block's size or tail marker was trashed
    pub fn free(&mut self, store: &mut BackingStore, offset: usize) -> MemoryResult<()> {
        if offset < self.base + 2 * BLOCK_HEADER || offset >= self.end() {
            return Err(MemoryError::InvalidFree { offset });
        }
        let mut block = offset - BLOCK_HEADER;
        let mut header = read_block(store, block)?;
        if header.tag != ZONE_TAG {
            return Err(MemoryError::InvalidFree { offset });
        }
        if header.used == 0 {
            return Err(MemoryError::DoubleFree { offset });
        }
        let size = header.size as usize;
        if size < BLOCK_HEADER + TRASH_MARKER || block + size > self.end() {
            return Err(MemoryError::corruption(
                "zone free",
                format!("block at {block} has bad size {size}"),
            ));
        }
        if store.read_u32(block + size - TRASH_MARKER)? != ZONE_TAG {
            return Err(MemoryError::corruption(
                "zone free",
                format!("trashed tail marker on block at {block}"),
            ));
        }

        header.used = 0;
        write_block(store, block, &header)?;
        tracing::trace!(payload = offset, block = size, "zone free");

        let ring = self.ring();
        let prev = header.prev as usize;
        let mut prev_header = read_block(store, prev)?;
        if prev_header.used == 0 {
            // Merge with previous free block.
            prev_header.size += header.size;
            write_block(store, prev, &prev_header)?;
            ring.remove(&mut BlockLinks { store: &mut *store }, block)?;
            if self.rover == block {
                self.rover = prev;
            }
            block = prev;
        }

        let mut header = read_block(store, block)?;
        let next = header.next as usize;
        let next_header = read_block(store, next)?;
        if next_header.used == 0 {
            // Merge the next free block onto the end.
            header.size += next_header.size;
            write_block(store, block, &header)?;
            ring.remove(&mut BlockLinks { store: &mut *store }, next)?;
            if self.rover == next {
                self.rover = block;
            }
        }
        Ok(())
    }

    /// Walks the ring and fails on the first broken invariant.
    ///
    /// Checks that blocks tile the zone exactly, back links agree, no two
    /// consecutive blocks are free, every block carries the zone tag and
    /// every used block still has its tail marker.
    ///
    /// # Errors
    ///
    /// `Corruption` describing the first violation found.
    pub fn check_integrity(&self, store: &BackingStore) -> MemoryResult<()> {
        let problems = self.walk(store, true)?.1;
        match problems.into_iter().next() {
            Some(detail) => Err(MemoryError::corruption("zone check", detail)),
            None => Ok(()),
        }
    }

    /// Lists every block and reports (rather than fails on) broken invariants.
    ///
    /// Each line of the report is also logged at `info` level.
    ///
    /// # Errors
    ///
    /// Only fails if a header lies outside the store.
    pub fn dump(&self, store: &BackingStore) -> MemoryResult<ZoneReport> {
        let (blocks, problems) = self.walk(store, false)?;
        let report = ZoneReport {
            base: self.base,
            capacity: self.capacity,
            blocks,
            problems,
        };
        for line in report.to_string().lines() {
            tracing::info!("{line}");
        }
        Ok(report)
    }

    /// Snapshot of every block in ring order.
    ///
    /// # Errors
    ///
    /// Propagates store access failures.
    pub fn blocks(&self, store: &BackingStore) -> MemoryResult<Vec<ZoneBlock>> {
        Ok(self.walk(store, false)?.0)
    }

    /// Total bytes held by free blocks (headers included).
    ///
    /// # Errors
    ///
    /// Propagates store access failures.
    pub fn free_bytes(&self, store: &BackingStore) -> MemoryResult<usize> {
        Ok(self
            .blocks(store)?
            .iter()
            .filter(|block| block.is_free())
            .map(|block| block.size)
            .sum())
    }

    /// Shared walk for check/dump. With `stop_early` the walk ends at the
    /// first problem.
    fn walk(&self, store: &BackingStore, stop_early: bool) -> MemoryResult<(Vec<ZoneBlock>, Vec<String>)> {
        let mut blocks = Vec::new();
        let mut problems = Vec::new();
        let limit = self.capacity / BLOCK_HEADER + 1;

        let sentinel = read_block(store, self.base)?;
        let mut block = sentinel.next as usize;
        while block != self.base {
            if blocks.len() > limit {
                problems.push(format!("ring does not return to the sentinel after {limit} blocks"));
                break;
            }
            if block < self.base + BLOCK_HEADER || block + BLOCK_HEADER > self.end() {
                problems.push(format!("block at {block} lies outside the zone"));
                break;
            }
            let header = read_block(store, block)?;
            let size = header.size as usize;
            blocks.push(ZoneBlock {
                offset: block,
                size,
                tag: header.used,
            });

            if header.tag != ZONE_TAG {
                problems.push(format!("block at {block} is missing the zone tag"));
            }
            let next = header.next as usize;
            let next_header = read_block(store, next)?;
            if next_header.prev as usize != block {
                problems.push(format!("block after {block} doesn't have proper back link"));
            }
            if next == self.base {
                if block + size != self.end() {
                    problems.push(format!("last block at {block} does not reach the zone end"));
                }
            } else {
                if block + size != next {
                    problems.push(format!("block at {block} size does not touch the next block"));
                }
                if header.used == 0 && next_header.used == 0 {
                    problems.push(format!("two consecutive free blocks at {block} and {next}"));
                }
            }
            if header.used != 0
                && size >= BLOCK_HEADER + TRASH_MARKER
                && block + size <= self.end()
                && store.read_u32(block + size - TRASH_MARKER)? != ZONE_TAG
            {
                problems.push(format!("trashed tail marker on block at {block}"));
            }

            if stop_early && !problems.is_empty() {
                break;
            }
            block = next;
        }
        Ok((blocks, problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 64;

    fn zone_of(capacity: usize) -> (BackingStore, Zone) {
        let mut store = BackingStore::new(BASE + capacity + 64).unwrap();
        let zone = Zone::new(&mut store, BASE, capacity).unwrap();
        (store, zone)
    }

    #[test]
    fn test_clear_leaves_one_free_block() {
        let (store, zone) = zone_of(4096);
        let blocks = zone.blocks(&store).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].offset, BASE + BLOCK_HEADER);
        assert_eq!(blocks[0].size, 4096 - BLOCK_HEADER);
        assert!(blocks[0].is_free());
        zone.check_integrity(&store).unwrap();
    }

    #[test]
    fn test_allocation_rounds_and_splits() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 100, 7).unwrap();
        assert_eq!(a, BASE + 2 * BLOCK_HEADER);

        let blocks = zone.blocks(&store).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].size, align_up(100 + BLOCK_HEADER + 4, 8));
        assert_eq!(blocks[0].tag, 7);
        assert!(blocks[1].is_free());
        // Rover moved past the new block.
        assert_eq!(zone.rover(), blocks[1].offset);
        zone.check_integrity(&store).unwrap();
    }

    #[test]
    fn test_small_leftover_is_absorbed() {
        let (mut store, mut zone) = zone_of(1024);
        let whole = 1024 - BLOCK_HEADER;
        // Leave exactly MIN_FRAGMENT bytes: not enough to split.
        let request = whole - MIN_FRAGMENT - BLOCK_HEADER - 4;
        zone.allocate(&mut store, request, 1).unwrap();

        let blocks = zone.blocks(&store).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, whole);
        zone.check_integrity(&store).unwrap();
    }

    #[test]
    fn test_free_merges_neighbours() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 100, 1).unwrap();
        let b = zone.allocate(&mut store, 100, 1).unwrap();
        let c = zone.allocate(&mut store, 100, 1).unwrap();

        zone.free(&mut store, b).unwrap();
        let blocks = zone.blocks(&store).unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks[1].is_free());

        zone.free(&mut store, a).unwrap();
        let blocks = zone.blocks(&store).unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].is_free());
        assert_eq!(blocks[0].size, 2 * 136);

        zone.free(&mut store, c).unwrap();
        let blocks = zone.blocks(&store).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 4096 - BLOCK_HEADER);
        zone.check_integrity(&store).unwrap();
    }

    #[test]
    fn test_rover_is_redirected_on_merge() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 64, 1).unwrap();
        // Rover now points at the free tail, which gets merged into `a`.
        zone.free(&mut store, a).unwrap();
        assert_eq!(zone.rover(), BASE + BLOCK_HEADER);
        let again = zone.allocate(&mut store, 64, 1).unwrap();
        assert_eq!(again, a);
    }

    #[test]
    fn test_out_of_memory_after_full_ring() {
        let (mut store, mut zone) = zone_of(1024);
        zone.allocate(&mut store, 600, 1).unwrap();
        let err = zone.allocate(&mut store, 600, 1).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { requested: 600 }));
        assert!(matches!(
            zone.allocate(&mut store, 5000, 1),
            Err(MemoryError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_zero_tag_rejected() {
        let (mut store, mut zone) = zone_of(1024);
        assert!(matches!(
            zone.allocate(&mut store, 16, 0),
            Err(MemoryError::InvalidTag)
        ));
    }

    #[test]
    fn test_invalid_and_double_free() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 32, 1).unwrap();
        let _b = zone.allocate(&mut store, 32, 1).unwrap();

        assert!(matches!(
            zone.free(&mut store, a + 8),
            Err(MemoryError::InvalidFree { .. })
        ));
        assert!(matches!(
            zone.free(&mut store, 3),
            Err(MemoryError::InvalidFree { .. })
        ));

        zone.free(&mut store, a).unwrap();
        assert!(matches!(
            zone.free(&mut store, a),
            Err(MemoryError::DoubleFree { .. })
        ));
    }

    #[test]
    fn test_trashed_marker_detected() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 20, 1).unwrap();
        // Overrun the payload into the tail marker.
        let block = zone.blocks(&store).unwrap()[0];
        store
            .bytes_mut(block.offset + block.size - 4, 4)
            .unwrap()
            .fill(0xff);

        assert!(zone.check_integrity(&store).unwrap_err().is_corruption());
        assert!(!zone.dump(&store).unwrap().problems.is_empty());
        assert!(zone.free(&mut store, a).unwrap_err().is_corruption());
    }

    #[test]
    fn test_broken_tiling_detected() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 100, 1).unwrap();
        let block = a - BLOCK_HEADER;
        let mut header = read_block(&store, block).unwrap();
        header.size -= 8;
        write_block(&mut store, block, &header).unwrap();

        let err = zone.check_integrity(&store).unwrap_err();
        assert!(err.to_string().contains("does not touch"));
    }

    #[test]
    fn test_allocate_zeroed_clears_payload() {
        let (mut store, mut zone) = zone_of(4096);
        let a = zone.allocate(&mut store, 48, 1).unwrap();
        store.bytes_mut(a, 48).unwrap().fill(0xaa);
        zone.free(&mut store, a).unwrap();

        let b = zone.allocate_zeroed(&mut store, 48).unwrap();
        assert!(store.bytes(b, 48).unwrap().iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_dump_lists_blocks() {
        let (mut store, mut zone) = zone_of(4096);
        zone.allocate(&mut store, 10, 3).unwrap();
        let report = zone.dump(&store).unwrap();
        assert_eq!(report.blocks.len(), 2);
        assert!(report.problems.is_empty());
        assert!(report.to_string().contains("zone size: 4096"));
    }
}
