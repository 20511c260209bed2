//! Property tests for zone tiling and hunk watermark behaviour.

use oroboros_memory::zone::BLOCK_HEADER;
use oroboros_memory::{BackingStore, Hunk, MemoryError, NoCache, Zone, ZoneBlock};
use proptest::prelude::*;

const ZONE_SIZE: usize = 8192;

#[derive(Clone, Debug)]
enum ZoneOp {
    Alloc(usize),
    Free(usize),
}

fn zone_op() -> impl Strategy<Value = ZoneOp> {
    prop_oneof![
        (1usize..700).prop_map(ZoneOp::Alloc),
        any::<usize>().prop_map(ZoneOp::Free),
    ]
}

/// Applies `ops`, returning the live payload offsets.
fn run_zone(zone: &mut Zone, store: &mut BackingStore, ops: &[ZoneOp]) -> Vec<usize> {
    let mut live = Vec::new();
    for op in ops {
        match *op {
            ZoneOp::Alloc(size) => match zone.allocate(store, size, 3) {
                Ok(payload) => live.push(payload),
                Err(MemoryError::OutOfMemory { .. }) => {}
                Err(err) => panic!("unexpected zone error: {err}"),
            },
            ZoneOp::Free(pick) => {
                if !live.is_empty() {
                    let payload = live.swap_remove(pick % live.len());
                    zone.free(store, payload).unwrap();
                }
            }
        }
    }
    live
}

fn assert_tiled(zone: &Zone, blocks: &[ZoneBlock]) {
    let mut expected = zone.base() + BLOCK_HEADER;
    for pair in blocks.windows(2) {
        assert!(!(pair[0].is_free() && pair[1].is_free()), "adjacent free blocks");
    }
    for block in blocks {
        assert_eq!(block.offset, expected, "blocks do not touch");
        expected += block.size;
    }
    assert_eq!(expected, zone.base() + zone.capacity());
}

#[derive(Clone, Debug)]
enum HunkOp {
    Low(usize),
    High(usize),
    Mark,
    Rewind(usize),
}

fn hunk_op() -> impl Strategy<Value = HunkOp> {
    prop_oneof![
        (0usize..3000).prop_map(HunkOp::Low),
        (0usize..3000).prop_map(HunkOp::High),
        Just(HunkOp::Mark),
        any::<usize>().prop_map(HunkOp::Rewind),
    ]
}

proptest! {
    #[test]
    fn prop_zone_stays_tiled(ops in prop::collection::vec(zone_op(), 1..120)) {
        let mut store = BackingStore::new(ZONE_SIZE).unwrap();
        let mut zone = Zone::new(&mut store, 0, ZONE_SIZE).unwrap();
        let live = run_zone(&mut zone, &mut store, &ops);

        zone.check_integrity(&store).unwrap();
        let blocks = zone.blocks(&store).unwrap();
        assert_tiled(&zone, &blocks);
        prop_assert_eq!(blocks.iter().filter(|block| !block.is_free()).count(), live.len());
    }

    #[test]
    fn prop_zone_free_restores_layout(
        ops in prop::collection::vec(zone_op(), 0..60),
        size in 1usize..ZONE_SIZE,
    ) {
        let mut store = BackingStore::new(ZONE_SIZE).unwrap();
        let mut zone = Zone::new(&mut store, 0, ZONE_SIZE).unwrap();
        run_zone(&mut zone, &mut store, &ops);

        let before = zone.blocks(&store).unwrap();
        if let Ok(payload) = zone.allocate(&mut store, size, 9) {
            zone.free(&mut store, payload).unwrap();
        }
        prop_assert_eq!(zone.blocks(&store).unwrap(), before);
    }

    #[test]
    fn prop_hunk_watermarks(ops in prop::collection::vec(hunk_op(), 1..80)) {
        let capacity = 32 * 1024;
        let mut hunk = Hunk::new(BackingStore::new(capacity).unwrap());
        let mut marks: Vec<usize> = Vec::new();

        for op in ops {
            let low = hunk.low_mark();
            let high = hunk.high_mark().unwrap();
            match op {
                HunkOp::Low(size) => {
                    if hunk.allocate_low(size, "prop", &mut NoCache).is_ok() {
                        prop_assert!(hunk.low_mark() > low);
                    } else {
                        prop_assert_eq!(hunk.low_mark(), low);
                    }
                }
                HunkOp::High(size) => {
                    let grown = hunk.allocate_high(size, "prop", &mut NoCache).unwrap().is_some();
                    let now = hunk.high_mark().unwrap();
                    if grown {
                        prop_assert!(now > high);
                    } else {
                        prop_assert_eq!(now, high);
                    }
                }
                HunkOp::Mark => marks.push(low),
                HunkOp::Rewind(pick) => {
                    if !marks.is_empty() {
                        let mark = marks[pick % marks.len()];
                        hunk.free_to_low_mark(mark).unwrap();
                        prop_assert_eq!(hunk.low_mark(), mark);
                        // Twice is the same as once.
                        hunk.free_to_low_mark(mark).unwrap();
                        prop_assert_eq!(hunk.low_mark(), mark);
                        marks.retain(|&kept| kept <= mark);
                    }
                }
            }
            prop_assert!(hunk.low_mark() + hunk.high_mark().unwrap() <= capacity);
        }
        hunk.check_integrity().unwrap();
    }

    #[test]
    fn prop_high_rewind_is_exact(sizes in prop::collection::vec(0usize..2000, 1..20)) {
        let mut hunk = Hunk::new(BackingStore::new(64 * 1024).unwrap());
        let mark = hunk.high_mark().unwrap();
        for size in sizes {
            hunk.allocate_high(size, "frame", &mut NoCache).unwrap();
        }
        hunk.free_to_high_mark(mark).unwrap();
        prop_assert_eq!(hunk.high_mark().unwrap(), mark);
        prop_assert!(hunk.store().bytes(0, 64 * 1024).unwrap().iter().all(|&x| x == 0));
    }
}
