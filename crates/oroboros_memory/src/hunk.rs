//! # Hunk Allocator
//!
//! A two-ended bump arena over the backing store.
//!
//! ```text
//! 0                                                              size
//! ┌────────────────────┬───────────────────────────┬───────────────┐
//! │ low hunk ───────▶  │   gap (cache lives here)  │  ◀──── high   │
//! └────────────────────┴───────────────────────────┴───────────────┘
//!                      ▲ low_used                  ▲ size - high_used
//! ```
//!
//! The low end holds session/level data, the high end transient data.
//! Nothing is freed individually: a caller captures a watermark and later
//! rewinds to it, dropping every record allocated since in one step.
//!
//! Before the hunk claims bytes from the gap it calls its [`GrowthHook`], so
//! whatever the cache keeps there gets moved or evicted first.

use bytemuck::{Pod, Zeroable};

use crate::error::{MemoryError, MemoryResult};
use crate::store::{pack_name, unpack_name, BackingStore, Gap};

/// Integrity tag at the start of every hunk record.
pub const HUNK_TAG: u32 = 0x1df0_01ed;

/// Payload sizes are rounded up to this.
pub const HUNK_ALIGN: usize = 16;

/// Bytes of header in front of each payload.
pub const RECORD_HEADER: usize = std::mem::size_of::<RecordHeader>();

/// Maximum stored length of a record name.
pub const HUNK_NAME_LEN: usize = 8;

/// Name used by [`Hunk::alloc`].
pub const DEFAULT_NAME: &str = "unknown";

const TEMP_NAME: &str = "temp";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RecordHeader {
    tag: u32,
    /// Including the header.
    size: u32,
    name: [u8; HUNK_NAME_LEN],
}

/// Called by the hunk before it grows into the gap.
///
/// Both calls receive the gap as it will be once the growth is granted;
/// anything the implementor keeps outside `[gap.low, gap.high)` must be
/// moved inside it or dropped.
pub trait GrowthHook {
    /// The low mark is about to rise to `gap.low`.
    ///
    /// # Errors
    ///
    /// Implementation defined; the hunk aborts the allocation.
    fn reclaim_below(&mut self, store: &mut BackingStore, gap: Gap) -> MemoryResult<()>;

    /// The high mark is about to fall to `gap.high`.
    ///
    /// # Errors
    ///
    /// Implementation defined; the hunk aborts the allocation.
    fn reclaim_above(&mut self, store: &mut BackingStore, gap: Gap) -> MemoryResult<()>;
}

/// Growth hook for a hunk with nothing living in its gap.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl GrowthHook for NoCache {
    fn reclaim_below(&mut self, _store: &mut BackingStore, _gap: Gap) -> MemoryResult<()> {
        Ok(())
    }

    fn reclaim_above(&mut self, _store: &mut BackingStore, _gap: Gap) -> MemoryResult<()> {
        Ok(())
    }
}

/// Which end of the hunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HunkSide {
    /// Grows upward from offset 0.
    Low,
    /// Grows downward from the end of the store.
    High,
}

impl HunkSide {
    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// One decoded hunk record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HunkRecord {
    /// Offset of the record header.
    pub offset: usize,
    /// Record size including header.
    pub size: usize,
    /// Record name (at most eight bytes).
    pub name: String,
}

/// One line of a [`HunkReport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HunkReportEntry {
    /// Side the records live on.
    pub side: HunkSide,
    /// Header offset of the first record in the line.
    pub offset: usize,
    /// Bytes covered by the line.
    pub size: usize,
    /// Shared record name.
    pub name: String,
    /// Number of records folded into the line.
    pub count: usize,
}

/// Listing produced by [`Hunk::dump`].
#[derive(Clone, Debug)]
pub struct HunkReport {
    /// Total store size.
    pub capacity: usize,
    /// Low watermark.
    pub low_used: usize,
    /// High watermark.
    pub high_used: usize,
    /// One entry per record, or per run of same-named records.
    pub entries: Vec<HunkReportEntry>,
    /// Whether entries are per record.
    pub all: bool,
    /// Records on both sides.
    pub total_blocks: usize,
}

impl HunkReport {
    /// Bytes between the two hunks.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.capacity - self.low_used - self.high_used
    }
}

impl std::fmt::Display for HunkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const RULE: &str = "-------------------------";
        writeln!(f, "          :{:8} total hunk size", self.capacity)?;
        writeln!(f, "{RULE}")?;
        let mut printed_gap = false;
        for entry in &self.entries {
            if entry.side == HunkSide::High && !printed_gap {
                writeln!(f, "{RULE}")?;
                writeln!(f, "          :{:8} REMAINING", self.remaining())?;
                writeln!(f, "{RULE}")?;
                printed_gap = true;
            }
            if self.all {
                writeln!(f, "{:#010x} :{:8} {:>8}", entry.offset, entry.size, entry.name)?;
            } else {
                writeln!(f, "          :{:8} {:>8} (TOTAL)", entry.size, entry.name)?;
            }
        }
        if !printed_gap {
            writeln!(f, "{RULE}")?;
            writeln!(f, "          :{:8} REMAINING", self.remaining())?;
            writeln!(f, "{RULE}")?;
        }
        writeln!(f, "{RULE}")?;
        writeln!(f, "{:8} total blocks", self.total_blocks)
    }
}

/// The two-ended arena. Owns the backing store.
///
/// # Thread Safety
///
/// NOT thread-safe.
///
/// # Example
///
/// ```rust
/// use oroboros_memory::{BackingStore, Hunk, NoCache};
///
/// let mut hunk = Hunk::new(BackingStore::new(64 * 1024).unwrap());
/// let mark = hunk.low_mark();
/// let level = hunk.allocate_low(4000, "level", &mut NoCache).unwrap();
/// assert!(level > mark);
///
/// // Drop the whole level in one step.
/// hunk.free_to_low_mark(mark).unwrap();
/// assert_eq!(hunk.low_mark(), mark);
/// ```
#[derive(Debug)]
pub struct Hunk {
    store: BackingStore,
    low_used: usize,
    high_used: usize,
    /// High mark to rewind to while a temporary allocation is active.
    temp_mark: Option<usize>,
}

impl Hunk {
    /// Installs the backing store with both watermarks at zero.
    #[must_use]
    pub fn new(store: BackingStore) -> Self {
        Self {
            store,
            low_used: 0,
            high_used: 0,
            temp_mark: None,
        }
    }

    /// The backing store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    /// The backing store, mutably.
    #[inline]
    pub fn store_mut(&mut self) -> &mut BackingStore {
        &mut self.store
    }

    /// Total store size.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.store.size()
    }

    /// The current free middle of the store.
    #[inline]
    #[must_use]
    pub fn gap(&self) -> Gap {
        Gap {
            low: self.low_used,
            high: self.store.size() - self.high_used,
        }
    }

    /// True while a [`temp_alloc`](Self::temp_alloc) result is live.
    #[inline]
    #[must_use]
    pub const fn temp_active(&self) -> bool {
        self.temp_mark.is_some()
    }

    /// Header plus aligned payload; saturates so oversized requests simply
    /// fail the fit check.
    #[inline]
    fn record_size(size: usize) -> usize {
        size.checked_add(RECORD_HEADER + HUNK_ALIGN - 1)
            .map_or(usize::MAX, |padded| padded & !(HUNK_ALIGN - 1))
    }

    fn write_record(&mut self, offset: usize, size: usize, name: &str) -> MemoryResult<usize> {
        self.store.zero(offset, size)?;
        self.store.write(
            offset,
            &RecordHeader {
                tag: HUNK_TAG,
                size: size as u32,
                name: pack_name(name, HUNK_NAME_LEN),
            },
        )?;
        Ok(offset + RECORD_HEADER)
    }

    /// Allocates `size` zeroed bytes on the low side under `name`.
    ///
    /// Returns the payload offset.
    ///
    /// # Errors
    ///
    /// `HunkExhausted` if the gap cannot hold the record; anything the
    /// growth hook reports.
    pub fn allocate_low<H: GrowthHook + ?Sized>(
        &mut self,
        size: usize,
        name: &str,
        hook: &mut H,
    ) -> MemoryResult<usize> {
        let available = self.gap().len();
        let size = Self::record_size(size);
        if available < size {
            return Err(MemoryError::HunkExhausted {
                requested: size,
                available,
            });
        }

        let offset = self.low_used;
        self.low_used += size;
        let gap = self.gap();
        if let Err(err) = hook.reclaim_below(&mut self.store, gap) {
            self.low_used = offset;
            return Err(err);
        }

        let payload = self.write_record(offset, size, name)?;
        tracing::trace!(payload, size, name, low_used = self.low_used, "hunk low alloc");
        Ok(payload)
    }

    /// [`allocate_low`](Self::allocate_low) under the name `"unknown"`.
    ///
    /// # Errors
    ///
    /// Same as `allocate_low`.
    pub fn alloc<H: GrowthHook + ?Sized>(&mut self, size: usize, hook: &mut H) -> MemoryResult<usize> {
        self.allocate_low(size, DEFAULT_NAME, hook)
    }

    /// Allocates `size` zeroed bytes on the high side under `name`.
    ///
    /// An active temporary allocation is rewound first. Running out of room
    /// is not an error here: the caller gets `Ok(None)` and is expected to
    /// defer.
    ///
    /// # Errors
    ///
    /// Anything the growth hook reports.
    pub fn allocate_high<H: GrowthHook + ?Sized>(
        &mut self,
        size: usize,
        name: &str,
        hook: &mut H,
    ) -> MemoryResult<Option<usize>> {
        self.retire_temp()?;

        let available = self.gap().len();
        let size = Self::record_size(size);
        if available < size {
            tracing::warn!(size, available, name, "hunk high alloc failed");
            return Ok(None);
        }

        let previous = self.high_used;
        self.high_used += size;
        let gap = self.gap();
        if let Err(err) = hook.reclaim_above(&mut self.store, gap) {
            self.high_used = previous;
            return Err(err);
        }

        let offset = self.store.size() - self.high_used;
        let payload = self.write_record(offset, size, name)?;
        tracing::trace!(payload, size, name, high_used = self.high_used, "hunk high alloc");
        Ok(Some(payload))
    }

    /// Returns scratch space from the top of the hunk.
    ///
    /// Only one temporary allocation exists at a time: a new one, any high
    /// allocation, reading the high mark or rewinding the high side all
    /// release the previous one.
    ///
    /// # Errors
    ///
    /// Anything the growth hook reports.
    pub fn temp_alloc<H: GrowthHook + ?Sized>(
        &mut self,
        size: usize,
        hook: &mut H,
    ) -> MemoryResult<Option<usize>> {
        let mark = self.high_mark()?;
        let payload = self.allocate_high(size, TEMP_NAME, hook)?;
        if payload.is_some() {
            self.temp_mark = Some(mark);
        }
        Ok(payload)
    }

    /// Current low watermark.
    #[inline]
    #[must_use]
    pub const fn low_mark(&self) -> usize {
        self.low_used
    }

    /// Current high watermark, after releasing any temporary allocation.
    ///
    /// # Errors
    ///
    /// Only fails if the store is corrupt.
    pub fn high_mark(&mut self) -> MemoryResult<usize> {
        self.retire_temp()?;
        Ok(self.high_used)
    }

    /// Rewinds the low side to `mark`, zeroing everything above it.
    ///
    /// # Errors
    ///
    /// `BadMark` if `mark` is greater than the current low watermark.
    pub fn free_to_low_mark(&mut self, mark: usize) -> MemoryResult<()> {
        if mark > self.low_used {
            return Err(MemoryError::BadMark {
                side: HunkSide::Low.label(),
                mark,
                used: self.low_used,
            });
        }
        self.store.zero(mark, self.low_used - mark)?;
        tracing::trace!(from = self.low_used, to = mark, "hunk low rewind");
        self.low_used = mark;
        Ok(())
    }

    /// Rewinds the high side to `mark`, zeroing everything released.
    ///
    /// Any temporary allocation is released before the mark is checked.
    ///
    /// # Errors
    ///
    /// `BadMark` if `mark` is greater than the current high watermark.
    pub fn free_to_high_mark(&mut self, mark: usize) -> MemoryResult<()> {
        self.retire_temp()?;
        self.rewind_high(mark)
    }

    fn retire_temp(&mut self) -> MemoryResult<()> {
        if let Some(mark) = self.temp_mark.take() {
            self.rewind_high(mark)?;
        }
        Ok(())
    }

    fn rewind_high(&mut self, mark: usize) -> MemoryResult<()> {
        if mark > self.high_used {
            return Err(MemoryError::BadMark {
                side: HunkSide::High.label(),
                mark,
                used: self.high_used,
            });
        }
        let start = self.store.size() - self.high_used;
        self.store.zero(start, self.high_used - mark)?;
        tracing::trace!(from = self.high_used, to = mark, "hunk high rewind");
        self.high_used = mark;
        Ok(())
    }

    /// Decodes every record on one side, in address order.
    ///
    /// # Errors
    ///
    /// `Corruption` on a trashed tag, a bad size, or records that do not
    /// end exactly at the watermark.
    pub fn records(&self, side: HunkSide) -> MemoryResult<Vec<HunkRecord>> {
        let capacity = self.store.size();
        let (mut offset, end) = match side {
            HunkSide::Low => (0, self.low_used),
            HunkSide::High => (capacity - self.high_used, capacity),
        };
        let mut records = Vec::new();
        while offset < end {
            let header: RecordHeader = self.store.read(offset)?;
            if header.tag != HUNK_TAG {
                return Err(MemoryError::corruption(
                    "hunk check",
                    format!("trashed sentinel at {} offset {offset}", side.label()),
                ));
            }
            let size = header.size as usize;
            if size < RECORD_HEADER || offset + size > capacity {
                return Err(MemoryError::corruption(
                    "hunk check",
                    format!("bad size {size} at {} offset {offset}", side.label()),
                ));
            }
            records.push(HunkRecord {
                offset,
                size,
                name: unpack_name(&header.name),
            });
            offset += size;
        }
        if offset != end {
            return Err(MemoryError::corruption(
                "hunk check",
                format!("{} records end at {offset}, expected {end}", side.label()),
            ));
        }
        Ok(records)
    }

    /// Validates every record on both sides.
    ///
    /// # Errors
    ///
    /// `Corruption` describing the first bad record.
    pub fn check_integrity(&self) -> MemoryResult<()> {
        self.records(HunkSide::Low)?;
        self.records(HunkSide::High)?;
        Ok(())
    }

    /// Lists the hunk. With `all` every record gets a line; otherwise
    /// consecutive records with the same name are totalled.
    ///
    /// Each line of the report is also logged at `info` level.
    ///
    /// # Errors
    ///
    /// `Corruption` if a record fails validation.
    pub fn dump(&self, all: bool) -> MemoryResult<HunkReport> {
        let mut entries: Vec<HunkReportEntry> = Vec::new();
        let mut total_blocks = 0;
        for side in [HunkSide::Low, HunkSide::High] {
            let mut run: Option<HunkReportEntry> = None;
            for record in self.records(side)? {
                total_blocks += 1;
                if let Some(current) = run.as_mut().filter(|current| !all && current.name == record.name) {
                    current.size += record.size;
                    current.count += 1;
                    continue;
                }
                entries.extend(run.take());
                run = Some(HunkReportEntry {
                    side,
                    offset: record.offset,
                    size: record.size,
                    name: record.name,
                    count: 1,
                });
            }
            entries.extend(run);
        }
        let report = HunkReport {
            capacity: self.capacity(),
            low_used: self.low_used,
            high_used: self.high_used,
            entries,
            all,
            total_blocks,
        };
        for line in report.to_string().lines() {
            tracing::info!("{line}");
        }
        Ok(report)
    }
}
