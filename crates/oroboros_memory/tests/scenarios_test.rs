//! End-to-end scenarios across the zone, hunk and cache.

use oroboros_memory::{BackingStore, Cache, Gap, Hunk, MemoryConfig, MemorySystem, NoCache, Zone};

/// Header plus 16-byte aligned payload.
fn hunk_record(size: usize) -> usize {
    16 + (size + 15) / 16 * 16
}

#[test]
fn test_hunk_mark_and_rewind() {
    let mut hunk = Hunk::new(BackingStore::new(1024 * 1024).unwrap());

    let a = hunk.allocate_low(100, "a", &mut NoCache).unwrap();
    let mark_after_a = hunk.low_mark();
    let b = hunk.allocate_low(200, "b", &mut NoCache).unwrap();
    assert_eq!(hunk.low_mark(), hunk_record(100) + hunk_record(200));

    hunk.store_mut().bytes_mut(a, 100).unwrap().fill(0xaa);
    hunk.store_mut().bytes_mut(b, 200).unwrap().fill(0xbb);

    hunk.free_to_low_mark(mark_after_a).unwrap();
    assert_eq!(hunk.low_mark(), mark_after_a);
    let rest = hunk.capacity() - mark_after_a;
    assert!(hunk.store().bytes(mark_after_a, rest).unwrap().iter().all(|&x| x == 0));
    // Data below the mark is untouched.
    assert!(hunk.store().bytes(a, 100).unwrap().iter().all(|&x| x == 0xaa));
    hunk.check_integrity().unwrap();
}

#[test]
fn test_zone_free_merges_neighbours() {
    let mut store = BackingStore::new(4096).unwrap();
    let mut zone = Zone::new(&mut store, 0, 4096).unwrap();

    let a = zone.allocate(&mut store, 64, 1).unwrap();
    let b = zone.allocate(&mut store, 64, 1).unwrap();
    let c = zone.allocate(&mut store, 64, 1).unwrap();
    let block = b - a;

    zone.free(&mut store, b).unwrap();
    let blocks = zone.blocks(&store).unwrap();
    assert_eq!(blocks.len(), 4);
    assert!(!blocks[0].is_free());
    assert!(blocks[1].is_free());
    assert_eq!(blocks[1].size, block);
    assert!(!blocks[2].is_free());

    zone.free(&mut store, a).unwrap();
    let blocks = zone.blocks(&store).unwrap();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].size, 2 * block);

    zone.free(&mut store, c).unwrap();
    let blocks = zone.blocks(&store).unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].offset + blocks[0].size, 4096);
    zone.check_integrity(&store).unwrap();
}

#[test]
fn test_cache_evicts_least_recently_touched() {
    const PAYLOAD: usize = 192;
    let entry = PAYLOAD + 64;
    let mut store = BackingStore::new(4096).unwrap();
    let gap = Gap {
        low: 512,
        high: 512 + 3 * entry,
    };
    let mut cache = Cache::new();

    let handles: Vec<_> = (0..4).map(|_| cache.create_handle()).collect();
    let first: Vec<_> = handles[..3]
        .iter()
        .map(|&handle| cache.acquire(&mut store, gap, handle, PAYLOAD, "entry").unwrap())
        .collect();
    assert_eq!(cache.stats().evictions, 0);

    cache.acquire(&mut store, gap, handles[3], PAYLOAD, "entry").unwrap();
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.touch(&mut store, handles[0]).unwrap(), None);
    assert_eq!(cache.touch(&mut store, handles[1]).unwrap(), Some(first[1]));
    assert_eq!(cache.touch(&mut store, handles[2]).unwrap(), Some(first[2]));
    cache.check_integrity(&store, gap).unwrap();
}

#[test]
fn test_low_growth_relocates_cache_entries() {
    let config = MemoryConfig {
        store_size: 256 * 1024,
        zone_kilobytes: 16,
    };
    let mut memory = MemorySystem::new(&config).unwrap();

    let handles: Vec<_> = (0..4).map(|_| memory.create_handle()).collect();
    for (fill, &handle) in (1u8..).zip(&handles) {
        let data = memory.cache_acquire(handle, 4096, "texture").unwrap();
        memory.bytes_mut(data, 4096).unwrap().fill(fill);
    }

    memory.alloc_low(10_000, "map").unwrap();
    let low = memory.low_mark();

    for (fill, &handle) in (1u8..).zip(&handles) {
        let data = memory.cache_touch(handle).unwrap().unwrap();
        assert!(data >= low);
        assert!(memory.bytes(data, 4096).unwrap().iter().all(|&x| x == fill));
    }
    assert!(memory.cache().stats().relocations > 0);
    assert_eq!(memory.cache().stats().evictions, 0);
    memory.check_integrity().unwrap();
}

#[test]
fn test_low_growth_evicts_when_the_gap_is_full() {
    let config = MemoryConfig {
        store_size: 64 * 1024,
        zone_kilobytes: 16,
    };
    let mut memory = MemorySystem::new(&config).unwrap();

    let handles: Vec<_> = (0..5).map(|_| memory.create_handle()).collect();
    for (fill, &handle) in (1u8..).zip(&handles) {
        let data = memory.cache_acquire(handle, 8192, "sound").unwrap();
        memory.bytes_mut(data, 8192).unwrap().fill(fill);
    }

    let map = memory.alloc_low(32 * 1024, "map").unwrap();
    assert!(map + 32 * 1024 <= memory.low_mark());

    let mut evicted = 0;
    for (fill, &handle) in (1u8..).zip(&handles) {
        match memory.cache_touch(handle).unwrap() {
            Some(data) => {
                assert!(data >= memory.low_mark());
                assert!(memory.bytes(data, 8192).unwrap().iter().all(|&x| x == fill));
            }
            None => evicted += 1,
        }
    }
    assert!(evicted > 0);
    assert_eq!(memory.cache().stats().evictions, evicted);
    memory.check_integrity().unwrap();
}

#[test]
fn test_high_growth_and_temp_alloc_with_cache() {
    let config = MemoryConfig {
        store_size: 128 * 1024,
        zone_kilobytes: 16,
    };
    let mut memory = MemorySystem::new(&config).unwrap();
    let handle = memory.create_handle();
    memory.cache_acquire(handle, 1024, "model").unwrap();

    // Scratch space from the top stays clear of the cache entry.
    let scratch = memory.temp_alloc(64 * 1024).unwrap().unwrap();
    assert!(scratch > memory.cache_touch(handle).unwrap().unwrap());

    // Asking for more than the whole gap is advisory, not fatal.
    assert_eq!(memory.alloc_high(1024 * 1024, "frame").unwrap(), None);
    assert_eq!(memory.high_mark().unwrap(), 0);
    memory.check_integrity().unwrap();
}
