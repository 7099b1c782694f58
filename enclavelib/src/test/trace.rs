use std::error::Error;
use crate::config::SimConfig;
use crate::error::TraceError;
use crate::hierarchy::Operation;
use crate::simulator::Simulator;
use crate::stats::{Event, EventCount};
use crate::trace::{parse_record, records};

fn simulator(json: &str) -> Simulator {
    Simulator::new(&SimConfig::from_json(json).unwrap()).unwrap()
}

const TWO_CORES: &str = r#"{
    "system": { "cores": 2 },
    "caches": [
        { "name": "L1", "level": 1, "kind": "unified", "size_b": 256, "line_size": 16, "ways": 2 },
        { "name": "L2", "level": 2, "kind": "unified", "shared": true, "size_b": 1024, "line_size": 16, "ways": 4,
          "set_partition": true, "enclave_ways": 1, "max_partition": 4 }
    ]
}"#;

#[test]
fn records_are_parsed() -> Result<(), Box<dyn Error>> {
    let access = parse_record("  3.5 2 0 DEADBEEF 2 ", 7)?.ok_or("expected a record")?;
    assert_eq!(access.timestamp, 3.5);
    assert_eq!(access.owner, 2);
    assert!(!access.enclave);
    assert_eq!(access.address, 0xdeadbeef);
    assert_eq!(access.op, Operation::Fetch);

    assert!(parse_record("", 1)?.is_none());
    assert!(parse_record("# timestamp owner mode address op", 1)?.is_none());
    Ok(())
}

#[test]
fn malformed_records_report_their_line() {
    for text in ["1 0 2 0x10 0", "1 0 0 0xzz 0", "1 0 0 0x10", "one 0 0 0x10 0"] {
        match parse_record(text, 4) {
            Err(TraceError::Malformed { line: 4, .. }) => {}
            other => panic!("{text:?} gave {other:?}"),
        }
    }
}

#[test]
fn blank_and_comment_lines_keep_numbering() -> Result<(), Box<dyn Error>> {
    let trace = b"# header\n0 0 0 0x10 0\n\n1 0 1 0x20 1\n";
    let lines: Vec<usize> = records(trace).map(|r| r.map(|(line, _)| line)).collect::<Result<_, _>>()?;
    assert_eq!(lines, vec![2, 4]);
    Ok(())
}

#[test]
fn simulating_a_trace_registers_tenants_per_core() -> Result<(), Box<dyn Error>> {
    let mut sim = simulator(TWO_CORES);
    let trace = b"0 0 0 0x100 0\n# comment\n\n1 1 1 0x200 1\n2 3 0 0x300 2\n2 3 0 0x300 2\n";
    let report = sim.simulate(trace)?;

    assert_eq!(report.accesses, 4);
    assert_eq!(report.tenants.len(), 4);
    let cores: Vec<usize> = report.tenants.iter().map(|t| t.core).collect();
    assert_eq!(cores, vec![0, 1, 0, 1]);
    assert_eq!(report.global["trace"], EventCount { non_enclave: 3, enclave: 1 });
    assert_eq!(report.global["cache_hit"], EventCount { non_enclave: 1, enclave: 0 });
    assert!(report.tenants[2].counters.is_empty());

    // One L1 per core plus the shared L2
    assert_eq!(report.caches.len(), 3);
    assert_eq!(report.caches[0].core, None);
    let valid: usize = sim.get_valid_line_counts().iter().map(|(_, _, n)| n).sum();
    assert_eq!(valid, 5);
    Ok(())
}

#[test]
fn out_of_order_timestamps_stop_the_simulation() {
    let mut sim = simulator(TWO_CORES);
    let result = sim.simulate(b"5 0 0 0x10 0\n6 0 0 0x20 0\n3 0 0 0x30 0\n");
    match result {
        Err(TraceError::OutOfOrder { line: 3, .. }) => {}
        other => panic!("expected an ordering error, got {other:?}"),
    }
    // Everything before the bad record was replayed
    assert_eq!(sim.simulation().accesses(), 2);
}

#[test]
fn non_enclave_accesses_can_be_skipped() -> Result<(), Box<dyn Error>> {
    let mut sim = simulator(r#"{
        "system": { "ignore_non_enclave": true },
        "caches": [{ "name": "L1", "level": 1, "kind": "unified", "size_b": 256, "line_size": 16, "ways": 2 }]
    }"#);
    let report = sim.simulate(b"0 0 0 0x10 0\n1 0 1 0x20 0\n2 0 0 0x30 0\n")?;
    assert_eq!(report.accesses, 3);
    assert_eq!(report.global["trace"], EventCount { non_enclave: 0, enclave: 1 });
    assert_eq!(sim.get_valid_line_counts()[0].2, 1);
    Ok(())
}

#[test]
fn finished_tenants_give_back_their_partitions() -> Result<(), Box<dyn Error>> {
    let mut sim = simulator(TWO_CORES);
    sim.simulate(b"0 0 1 0x100 0\n1 1 1 0x100 0\n")?;
    assert!(sim.simulation().tenants()[0].placement(1).is_some());

    sim.finish_tenant(0);
    assert_eq!(sim.simulation().tenants()[0].placement(1), None);
    assert!(sim.simulation().tenants()[1].placement(1).is_some());
    assert_eq!(sim.simulation().partitions()[1].eways[0].alloc_n, 1);
    // Unknown tenants are ignored
    sim.finish_tenant(9);
    Ok(())
}

#[test]
fn reported_events_are_described() -> Result<(), Box<dyn Error>> {
    let mut sim = simulator(TWO_CORES);
    let report = sim.simulate(b"0 0 1 0x100 0\n1 1 1 0x100 1\n2 0 0 0x200 2\n")?;
    for name in report.global.keys() {
        let event = Event::ALL.iter().find(|e| e.name() == name).ok_or("unknown event")?;
        assert!(!event.description().is_empty(), "{name} has no description");
    }
    // Inclusion victims are counted whoever caused the eviction
    assert!(!Event::IsInclusionVictim.description().contains("same"));
    assert!(Event::IsInclusionVictimOther.description().contains("another tenant"));
    Ok(())
}
