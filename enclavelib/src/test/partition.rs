use crate::config::{LevelParams, SimConfig};
use crate::partition::{OffsetTable, PartitionState, Placement};

fn level(json: &str) -> (LevelParams, usize) {
    let config = SimConfig::from_json(json).unwrap();
    let params = config.caches[0].resolve(0, &config.system).unwrap();
    (params, config.system.cachelet_assoc)
}

const SET_PARTITIONED: &str = r#"{
    "caches": [{
        "name": "L2", "level": 2, "kind": "unified", "shared": true,
        "size_b": 1024, "line_size": 16, "ways": 4,
        "set_partition": true, "enclave_ways": 2, "max_partition": 4
    }]
}"#;

const CACHELETS: &str = r#"{
    "system": { "cachelet_assoc": 2 },
    "caches": [{
        "name": "LLC", "level": 3, "kind": "unified", "shared": true,
        "size_b": 2048, "line_size": 16, "ways": 8,
        "set_partition": true, "use_cachelet": true, "enclave_ways": 4, "max_partition": 4
    }]
}"#;

#[test]
fn offset_table_follows_halving_layout() {
    let (params, _) = level(r#"{
        "caches": [{
            "name": "LLC", "level": 3, "kind": "unified",
            "size_kb": 512, "line_size": 64, "ways": 8,
            "set_partition": true, "enclave_ways": 1, "max_partition": 8
        }]
    }"#);
    assert_eq!(params.geometry.sets, 1024);
    let table = OffsetTable::new(&[params]);
    let offsets: Vec<usize> = (0..8).map(|slot| table.offset(slot, 0)).collect();
    assert_eq!(offsets, vec![0, 512, 256, 768, 128, 640, 384, 896]);
}

#[test]
fn set_bits_shrink_as_slots_fill() {
    let (params, assoc) = level(SET_PARTITIONED);
    let table = OffsetTable::new(&[params]);
    let mut state = PartitionState::new(params, assoc);

    assert_eq!(state.find_free_slot(Some(0), &table), Some(Placement { eway: 0, slot: 0 }));
    assert_eq!(state.eways[0].set_bits, 4);
    assert_eq!(state.find_free_slot(Some(1), &table), Some(Placement { eway: 0, slot: 1 }));
    assert_eq!(state.eways[0].set_bits, 3);
    assert_eq!(state.find_free_slot(Some(2), &table), Some(Placement { eway: 0, slot: 2 }));
    assert_eq!(state.eways[0].set_bits, 2);
    assert_eq!(state.find_free_slot(Some(3), &table), Some(Placement { eway: 0, slot: 3 }));
    assert_eq!(state.eways[0].set_bits, 2);
    assert_eq!(state.range(Placement { eway: 0, slot: 1 }, &table), (8, 12));

    // The first way is full, the next tenant opens the second one
    assert_eq!(state.find_free_slot(Some(4), &table), Some(Placement { eway: 1, slot: 0 }));
    assert_eq!(state.eways[1].set_bits, 4);
    assert_eq!(state.enclave_ways_n, 2);
    for tenant in 5..8 {
        assert!(state.find_free_slot(Some(tenant), &table).is_some());
    }
    assert_eq!(state.find_free_slot(Some(8), &table), None);
}

#[test]
fn released_slot_is_reused_without_growing_back() {
    let (params, assoc) = level(SET_PARTITIONED);
    let table = OffsetTable::new(&[params]);
    let mut state = PartitionState::new(params, assoc);
    for tenant in 0..4 {
        state.find_free_slot(Some(tenant), &table);
    }
    let second = Placement { eway: 0, slot: 1 };
    assert!(state.owns(second, 1));

    // Only the owner can release
    state.release(second, 2, &table);
    assert!(state.owns(second, 1));

    state.release(second, 1, &table);
    assert!(!state.owns(second, 1));
    assert_eq!(state.eways[0].alloc_n, 3);
    assert_eq!(state.eways[0].set_bits, 2);

    assert_eq!(state.find_free_slot(Some(9), &table), Some(second));
    assert!(state.owns(second, 9));
    assert_eq!(state.eways[0].set_bits, 2);
}

#[test]
fn cachelets_claim_ways_in_their_region() {
    let (params, assoc) = level(CACHELETS);
    assert_eq!(params.geometry.sets, 16);
    let table = OffsetTable::new(&[params]);
    let mut state = PartitionState::new(params, assoc);

    assert_eq!(state.find_free_slot(Some(0), &table), Some(Placement { eway: 0, slot: 0 }));
    // Cachelets keep a fixed quarter of the sets
    assert_eq!(state.eways[0].set_bits, 2);
    assert_eq!(state.way_bitmaps, vec![0b11, 0, 0, 0]);

    assert_eq!(state.find_free_slot(Some(1), &table), Some(Placement { eway: 0, slot: 1 }));
    assert_eq!(state.way_bitmaps[2], 0b11);
    assert_eq!(state.bitmap_for_set(9), 0b11);
    assert_eq!(state.eways[0].set_bits, 2);

    state.find_free_slot(Some(2), &table);
    state.find_free_slot(Some(3), &table);
    assert_eq!(state.way_bitmaps, vec![0b11, 0b11, 0b11, 0b11]);

    // Stepping by the cachelet associativity skips way 1
    assert_eq!(state.find_free_slot(Some(4), &table), Some(Placement { eway: 2, slot: 0 }));
    assert_eq!(state.way_bitmaps[0], 0b1111);

    state.release(Placement { eway: 0, slot: 0 }, 0, &table);
    assert_eq!(state.way_bitmaps[0], 0b1100);
}

#[test]
fn reserved_slots_have_no_owner() {
    let (params, assoc) = level(CACHELETS);
    let table = OffsetTable::new(&[params]);
    let mut state = PartitionState::new(params, assoc);
    let reserved = state.find_free_slot(None, &table).unwrap();
    assert!(!state.owns(reserved, 0));
    assert!(state.eways[0].sat[0].valid);
    assert_eq!(state.eways[0].sat[0].owner, None);
}
