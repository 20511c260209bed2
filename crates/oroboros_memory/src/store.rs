//! # Backing Store
//!
//! One contiguous byte buffer reserved at startup and never resized.
//!
//! All three allocators address memory as byte offsets into this buffer.
//! Allocator headers are plain-old-data structs encoded in place with
//! `bytemuck`, so every header read or write is bounds-checked instead of
//! going through a raw pointer.

use bytemuck::Pod;

use crate::error::{MemoryError, MemoryResult};

/// Largest store the header encoding can describe (sizes are stored as `u32`).
pub const MAX_STORE_SIZE: usize = u32::MAX as usize - 1;

/// The fixed backing buffer shared by the zone, hunk and cache.
///
/// # Example
///
/// ```rust
/// use oroboros_memory::BackingStore;
///
/// let mut store = BackingStore::new(1024).unwrap();
/// store.bytes_mut(16, 4).unwrap().copy_from_slice(b"quad");
/// assert_eq!(store.bytes(16, 4).unwrap(), b"quad");
/// ```
pub struct BackingStore {
    /// Owned storage, zero-filled at reservation.
    bytes: Box<[u8]>,
}

impl BackingStore {
    /// Reserves a zero-filled store of `size` bytes.
    ///
    /// # Errors
    ///
    /// `InvalidSize` if `size` is zero or larger than [`MAX_STORE_SIZE`].
    pub fn new(size: usize) -> MemoryResult<Self> {
        if size == 0 || size > MAX_STORE_SIZE {
            return Err(MemoryError::InvalidSize {
                context: "backing store",
                size,
            });
        }
        Ok(Self {
            bytes: vec![0u8; size].into_boxed_slice(),
        })
    }

    /// Total size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, offset: usize, len: usize) -> MemoryResult<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(offset..end),
            _ => Err(MemoryError::OutOfBounds {
                offset,
                len,
                size: self.bytes.len(),
            }),
        }
    }

    /// Borrows `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the store.
    pub fn bytes(&self, offset: usize, len: usize) -> MemoryResult<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    /// Mutably borrows `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the store.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> MemoryResult<&mut [u8]> {
        let range = self.range(offset, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Zero-fills `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the store.
    pub fn zero(&mut self, offset: usize, len: usize) -> MemoryResult<()> {
        self.bytes_mut(offset, len)?.fill(0);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
    pub(crate) fn copy_within(&mut self, src: usize, dst: usize, len: usize) -> MemoryResult<()> {
        let from = self.range(src, len)?;
        self.range(dst, len)?;
        self.bytes.copy_within(from, dst);
        Ok(())
    }

    /// Decodes a header of type `T` stored at `offset`.
    pub(crate) fn read<T: Pod>(&self, offset: usize) -> MemoryResult<T> {
        let raw = self.bytes(offset, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(raw))
    }

    /// Encodes `value` at `offset`.
    pub(crate) fn write<T: Pod>(&mut self, offset: usize, value: &T) -> MemoryResult<()> {
        let raw = self.bytes_mut(offset, std::mem::size_of::<T>())?;
        raw.copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    /// Reads a native-endian `u32` marker.
    pub(crate) fn read_u32(&self, offset: usize) -> MemoryResult<u32> {
        self.read::<u32>(offset)
    }

    /// Writes a `u32` marker.
    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) -> MemoryResult<()> {
        self.write(offset, &value)
    }
}

impl std::fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStore")
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// The unused middle of the store: `[low, high)`.
///
/// `low` is the hunk's low watermark, `high` is the store size minus the
/// high watermark. The cache lives entirely inside this range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    /// First byte above the low hunk.
    pub low: usize,
    /// First byte of the high hunk.
    pub high: usize,
}

impl Gap {
    /// Bytes available in the gap.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.high.saturating_sub(self.low)
    }

    /// True when the hunks meet.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// Rounds `value` up to a power-of-two `align`.
#[inline]
#[must_use]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Packs a name into a fixed-size field, truncating to `limit` bytes.
pub(crate) fn pack_name<const N: usize>(name: &str, limit: usize) -> [u8; N] {
    let mut field = [0u8; N];
    let len = name.len().min(limit).min(N);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// Reads a nul-padded name field back into a string.
pub(crate) fn unpack_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
