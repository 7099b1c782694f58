use std::fmt::Write;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use enclavelib::config::SimConfig;
use enclavelib::simulator::Simulator;

const CONFIGS: [(&str, &str); 3] = [
    ("plru", r#"{
        "system": { "cores": 2, "seed": 1 },
        "caches": [
            { "name": "L1I", "level": 1, "kind": "insn", "size_kb": 32, "line_size": 64, "ways": 8 },
            { "name": "L1D", "level": 1, "kind": "data", "size_kb": 32, "line_size": 64, "ways": 8 },
            { "name": "L2", "level": 2, "kind": "unified", "size_kb": 256, "line_size": 64, "ways": 8 },
            { "name": "LLC", "level": 3, "kind": "unified", "shared": true, "inclusion": "inclusive",
              "size_kb": 2048, "line_size": 64, "ways": 16 }
        ]
    }"#),
    ("sgx_plru", r#"{
        "system": { "cores": 2, "seed": 1 },
        "caches": [
            { "name": "L1", "level": 1, "kind": "unified", "size_kb": 32, "line_size": 64, "ways": 8 },
            { "name": "LLC", "level": 2, "kind": "unified", "shared": true, "inclusion": "inclusive",
              "size_kb": 2048, "line_size": 64, "ways": 16, "eviction": "sgx_plru", "sgx_plru_rate": 0.9 }
        ]
    }"#),
    ("cachelets", r#"{
        "system": { "cores": 2, "seed": 1, "cachelet_assoc": 2 },
        "caches": [
            { "name": "L1", "level": 1, "kind": "unified", "size_kb": 32, "line_size": 64, "ways": 8 },
            { "name": "LLC", "level": 2, "kind": "unified", "shared": true,
              "size_kb": 2048, "line_size": 64, "ways": 16,
              "set_partition": true, "use_cachelet": true, "enclave_ways": 8, "max_partition": 16 }
        ]
    }"#),
];

/// A merged trace of several tenants, each walking its own working set
fn synthetic_trace(records: usize, tenants: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut trace = String::with_capacity(records * 24);
    for i in 0..records {
        let owner = rng.gen_range(0..tenants);
        let enclave = rng.gen_bool(0.5) as u8;
        let address = ((owner as u64) << 32) | rng.gen_range(0..1u64 << 22);
        let op = rng.gen_range(0..3);
        writeln!(trace, "{i} {owner} {enclave} {address:#x} {op}").unwrap();
    }
    trace.into_bytes()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Examples");
    let trace = synthetic_trace(100_000, 8);

    for (name, json) in CONFIGS {
        let config = SimConfig::from_json(json).unwrap();
        group.bench_with_input(BenchmarkId::new("Synthetic", name), &(config, &trace), |bench, (conf, buf)| {
            bench.iter(|| {
                Simulator::new(conf).unwrap().simulate(buf).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().significance_level(0.1).sample_size(10);
    targets = criterion_benchmark
);
criterion_main!(benches);
