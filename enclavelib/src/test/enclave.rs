use std::error::Error;
use crate::error::ConfigError;
use crate::partition::Placement;
use crate::stats::Event;
use crate::test::{enclave_load, load, simulation};

/// Four sets, two ways, one enclave way cut into at most two partitions
const SMALL_SAT: &str = r#"{
    "system": { "seed": 17 },
    "caches": [{
        "name": "L1", "level": 1, "kind": "unified",
        "size_b": 128, "line_size": 16, "ways": 2,
        "set_partition": true, "enclave_ways": 1, "max_partition": 2
    }]
}"#;

fn dynamic(extra: &str) -> String {
    format!(
        r#"{{
            "system": {{ "cachelet_assoc": 2, "dyn_threshold": 2, "dyn_rate": 4, "seed": 23 {extra} }},
            "caches": [{{
                "name": "LLC", "level": 1, "kind": "unified",
                "size_b": 1024, "line_size": 16, "ways": 4,
                "set_partition": true, "use_cachelet": true, "enclave_ways": 2, "max_partition": 4
            }}]
        }}"#
    )
}

#[test]
fn enclave_lines_go_to_the_assigned_way_and_partition() -> Result<(), Box<dyn Error>> {
    let mut sim = simulation(SMALL_SAT);
    let first = sim.add_tenant(0)?;
    let second = sim.add_tenant(0)?;

    sim.access(first, &enclave_load(first, 0x00));
    assert_eq!(sim.tenants()[first].placement(0), Some(Placement { eway: 0, slot: 0 }));
    assert!(sim.caches()[0].line(0, 0).valid);

    // The second tenant halves the way, its partition starts at set 2
    sim.access(second, &enclave_load(second, 0x00));
    assert_eq!(sim.tenants()[second].placement(0), Some(Placement { eway: 0, slot: 1 }));
    assert_eq!(sim.partitions()[0].eways[0].set_bits, 1);
    let line = sim.caches()[0].line(2, 0);
    assert!(line.valid && line.enclave);
    assert_eq!(line.owner, second);
    assert_eq!(sim.tenants()[second].partition_shift, 1);
    assert_eq!(sim.tenants()[second].counters.get(Event::Partition2, true), 1);
    Ok(())
}

#[test]
fn full_sat_takes_over_least_recent_slot() -> Result<(), Box<dyn Error>> {
    let mut sim = simulation(SMALL_SAT);
    let tenants: Vec<usize> = (0..3).map(|_| sim.add_tenant(0)).collect::<Result<_, _>>()?;

    sim.access(tenants[0], &enclave_load(tenants[0], 0x00));
    sim.access(tenants[1], &enclave_load(tenants[1], 0x00));
    sim.access(tenants[2], &enclave_load(tenants[2], 0x00));

    let sat = &sim.partitions()[0].eways[0].sat;
    assert_eq!(sat[0].owner, Some(tenants[2]));
    assert_eq!(sat[1].owner, Some(tenants[1]));
    assert_eq!(sim.tenants()[tenants[0]].placement(0), None);
    let line = sim.caches()[0].line(0, 0);
    assert!(line.valid);
    assert_eq!(line.owner, tenants[2]);

    // The displaced tenant gets a slot back on its next enclave access
    sim.access(tenants[0], &enclave_load(tenants[0], 0x00));
    assert!(sim.tenants()[tenants[0]].placement(0).is_some());
    Ok(())
}

#[test]
fn finished_tenant_frees_its_partition() -> Result<(), Box<dyn Error>> {
    let mut sim = simulation(SMALL_SAT);
    let first = sim.add_tenant(0)?;
    let second = sim.add_tenant(0)?;
    sim.access(first, &enclave_load(first, 0x00));
    sim.access(second, &enclave_load(second, 0x00));
    sim.access(first, &load(first, 0x40));

    sim.free_partition(first, true);
    assert_eq!(sim.tenants()[first].placement(0), None);
    assert!(!sim.partitions()[0].eways[0].sat[0].valid);
    assert_eq!(sim.partitions()[0].eways[0].alloc_n, 1);
    assert!(!sim.caches()[0].line(0, 0).valid);
    // Lines outside the partition's ways survive
    assert!(sim.caches()[0].line(0, 1).valid);
    assert!(sim.caches()[0].line(2, 0).valid);

    // Without finishing, lines go but the slot stays
    sim.free_partition(second, false);
    assert!(!sim.caches()[0].line(2, 0).valid);
    assert!(sim.partitions()[0].owns(Placement { eway: 0, slot: 1 }, second));
    Ok(())
}

#[test]
fn cachelets_double_once_per_checkpoint_up_to_the_limit() -> Result<(), Box<dyn Error>> {
    let mut sim = simulation(&dynamic(""));
    let tenant = sim.add_tenant(0)?;
    assert_eq!(sim.params()[0].geometry.sets, 16);

    let mut address = 0u64;
    let mut next = |sim: &mut crate::hierarchy::Simulation| {
        sim.access(tenant, &enclave_load(tenant, address));
        address += 16;
    };

    for _ in 0..3 {
        next(&mut sim);
    }
    assert_eq!(sim.tenants()[tenant].num_cachelets, 1);
    next(&mut sim);
    assert_eq!(sim.tenants()[tenant].num_cachelets, 2);
    for set in 0..8 {
        for way in 0..2 {
            assert!(!sim.caches()[0].line(set, way).valid, "set {set} way {way} survived the resize");
        }
    }
    assert_eq!(sim.partitions()[0].way_bitmaps, vec![0b11, 0b11, 0, 0]);

    for _ in 0..4 {
        next(&mut sim);
    }
    assert_eq!(sim.tenants()[tenant].num_cachelets, 4);
    for _ in 0..8 {
        next(&mut sim);
    }
    assert_eq!(sim.tenants()[tenant].num_cachelets, 4);

    let counters = &sim.tenants()[tenant].counters;
    assert_eq!(counters.get(Event::ReachedResizeThreshold, true), 4);
    assert_eq!(counters.get(Event::Resized, true), 2);
    assert_eq!(counters.get(Event::MaxMissCounter, true), 4);
    assert_eq!(sim.tenants()[tenant].miss_counter, 0);
    Ok(())
}

#[test]
fn cachelets_halve_but_never_below_one() -> Result<(), Box<dyn Error>> {
    let mut sim = simulation(&dynamic(r#", "dyn_downsize_threshold": 1, "dyn_downsize_rate": 4"#));
    let tenant = sim.add_tenant(0)?;

    for i in 0..4u64 {
        sim.access(tenant, &enclave_load(tenant, i * 16));
    }
    assert_eq!(sim.tenants()[tenant].num_cachelets, 2);

    // One miss then hits, under the downsize threshold
    for _ in 0..4 {
        sim.access(tenant, &enclave_load(tenant, 0x400));
    }
    assert_eq!(sim.tenants()[tenant].num_cachelets, 1);
    assert_eq!(sim.partitions()[0].way_bitmaps, vec![0b11, 0, 0, 0]);

    for _ in 0..8 {
        sim.access(tenant, &enclave_load(tenant, 0x400));
    }
    assert_eq!(sim.tenants()[tenant].num_cachelets, 1);

    let counters = &sim.tenants()[tenant].counters;
    assert_eq!(counters.get(Event::Resized, true), 1);
    assert_eq!(counters.get(Event::Downsized, true), 1);
    assert_eq!(counters.get(Event::ReachedDownsizeThreshold, true), 3);
    Ok(())
}

#[test]
fn dynamic_cachelets_reject_a_second_tenant() {
    let mut sim = simulation(&dynamic(""));
    assert!(sim.add_tenant(0).is_ok());
    assert!(matches!(sim.add_tenant(0), Err(ConfigError::DynamicMultiTenant)));
}

#[test]
fn non_enclave_lines_avoid_claimed_cachelets() -> Result<(), Box<dyn Error>> {
    let mut sim = simulation(r#"{
        "system": { "cachelet_assoc": 2, "seed": 2 },
        "caches": [{
            "name": "LLC", "level": 1, "kind": "unified",
            "size_b": 1024, "line_size": 16, "ways": 4,
            "set_partition": true, "use_cachelet": true, "enclave_ways": 2,
            "max_partition": 4, "static_cachelets": 1
        }]
    }"#);
    let tenant = sim.add_tenant(0)?;
    assert_eq!(sim.partitions()[0].way_bitmaps[0], 0b11);

    // Set 0 sits in the reserved region, so only ways 2 and 3 are usable
    for i in 0..6u64 {
        sim.access(tenant, &load(tenant, i * 0x100));
    }
    let cache = &sim.caches()[0];
    assert!(!cache.line(0, 0).valid);
    assert!(!cache.line(0, 1).valid);
    assert_eq!(cache.valid_in_set(0), 2);
    Ok(())
}
