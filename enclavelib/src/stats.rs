use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// Every observable event the engine counts
///
/// Each counter is kept twice, once for non-enclave and once for enclave accesses
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    Trace,
    Load,
    Store,
    Insn,
    CacheHit,
    CacheMiss,
    CacheColdMiss,
    LlcAccess,
    LlcHit,
    LlcColdMiss,
    EvictInclusionVictim,
    EvictInclusionVictimOther,
    IsInclusionVictim,
    IsInclusionVictimOther,
    NoPartition,
    Partition2,
    Partition4,
    Partition8,
    Partition16,
    Partition32,
    Partition64Plus,
    DirtyLines,
    EvictOther,
    EvictPlru,
    EvictSgxPlru,
    ReachedResizeThreshold,
    Resized,
    MaxMissCounter,
    ReachedDownsizeThreshold,
    Downsized,
}

impl Event {
    pub const COUNT: usize = Event::ALL.len();

    pub const ALL: [Event; 30] = [
        Event::Trace,
        Event::Load,
        Event::Store,
        Event::Insn,
        Event::CacheHit,
        Event::CacheMiss,
        Event::CacheColdMiss,
        Event::LlcAccess,
        Event::LlcHit,
        Event::LlcColdMiss,
        Event::EvictInclusionVictim,
        Event::EvictInclusionVictimOther,
        Event::IsInclusionVictim,
        Event::IsInclusionVictimOther,
        Event::NoPartition,
        Event::Partition2,
        Event::Partition4,
        Event::Partition8,
        Event::Partition16,
        Event::Partition32,
        Event::Partition64Plus,
        Event::DirtyLines,
        Event::EvictOther,
        Event::EvictPlru,
        Event::EvictSgxPlru,
        Event::ReachedResizeThreshold,
        Event::Resized,
        Event::MaxMissCounter,
        Event::ReachedDownsizeThreshold,
        Event::Downsized,
    ];

    /// Stable identifier used in reports
    pub fn name(self) -> &'static str {
        match self {
            Event::Trace => "trace",
            Event::Load => "load",
            Event::Store => "store",
            Event::Insn => "insn",
            Event::CacheHit => "cache_hit",
            Event::CacheMiss => "cache_miss",
            Event::CacheColdMiss => "cache_cold_miss",
            Event::LlcAccess => "llc_access",
            Event::LlcHit => "llc_hit",
            Event::LlcColdMiss => "llc_cold_miss",
            Event::EvictInclusionVictim => "evict_inclusion_victim",
            Event::EvictInclusionVictimOther => "evict_inclusion_victim_other",
            Event::IsInclusionVictim => "is_inclusion_victim",
            Event::IsInclusionVictimOther => "is_inclusion_victim_other",
            Event::NoPartition => "no_partition",
            Event::Partition2 => "partition_1_2",
            Event::Partition4 => "partition_1_4",
            Event::Partition8 => "partition_1_8",
            Event::Partition16 => "partition_1_16",
            Event::Partition32 => "partition_1_32",
            Event::Partition64Plus => "partition_1_64_or_less",
            Event::DirtyLines => "dirty_lines",
            Event::EvictOther => "evict_other",
            Event::EvictPlru => "evict_plru",
            Event::EvictSgxPlru => "evict_sgx_plru",
            Event::ReachedResizeThreshold => "reached_resize_threshold",
            Event::Resized => "resized",
            Event::MaxMissCounter => "max_miss_counter",
            Event::ReachedDownsizeThreshold => "reached_downsize_threshold",
            Event::Downsized => "downsized",
        }
    }

    /// Human readable meaning of the counter
    pub fn description(self) -> &'static str {
        match self {
            Event::Trace => "accesses replayed",
            Event::Load => "load accesses",
            Event::Store => "store accesses",
            Event::Insn => "instruction fetches",
            Event::CacheHit => "hits",
            Event::CacheMiss => "misses",
            Event::CacheColdMiss => "misses filled into an empty way",
            Event::LlcAccess => "accesses reaching the last level",
            Event::LlcHit => "hits in the last level",
            Event::LlcColdMiss => "last level misses filled into an empty way",
            Event::EvictInclusionVictim => "lines evicted to keep an inclusive cache inclusive",
            Event::EvictInclusionVictimOther => "lines of another tenant evicted to keep an inclusive cache inclusive",
            Event::IsInclusionVictim => "lines lost to an inclusion eviction",
            Event::IsInclusionVictimOther => "lines lost to an inclusion eviction caused by another tenant",
            Event::NoPartition => "accesses with the whole enclave way",
            Event::Partition2 => "accesses with 1/2 of an enclave way",
            Event::Partition4 => "accesses with 1/4 of an enclave way",
            Event::Partition8 => "accesses with 1/8 of an enclave way",
            Event::Partition16 => "accesses with 1/16 of an enclave way",
            Event::Partition32 => "accesses with 1/32 of an enclave way",
            Event::Partition64Plus => "accesses with 1/64 of an enclave way or less",
            Event::DirtyLines => "dirty lines evicted",
            Event::EvictOther => "lines of another tenant evicted",
            Event::EvictPlru => "evictions made by plain PLRU",
            Event::EvictSgxPlru => "evictions made by enclave biased PLRU",
            Event::ReachedResizeThreshold => "checkpoints at or above the upsize threshold",
            Event::Resized => "cachelet allocations doubled",
            Event::MaxMissCounter => "largest miss count seen at a checkpoint",
            Event::ReachedDownsizeThreshold => "checkpoints at or below the downsize threshold",
            Event::Downsized => "cachelet allocations halved",
        }
    }

    /// The partition factor bucket for a tenant holding `1 / 2^shift` of an enclave way
    pub fn partition_bucket(shift: u32) -> Event {
        match shift {
            0 => Event::NoPartition,
            1 => Event::Partition2,
            2 => Event::Partition4,
            3 => Event::Partition8,
            4 => Event::Partition16,
            5 => Event::Partition32,
            _ => Event::Partition64Plus,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A set of counters, one `[non_enclave, enclave]` pair per event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counters {
    values: [[u64; 2]; Event::COUNT],
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            values: [[0; 2]; Event::COUNT],
        }
    }
}

impl Counters {
    pub fn increment(&mut self, event: Event, enclave: bool) {
        self.values[event.index()][enclave as usize] += 1;
    }

    /// Keeps the larger of the stored and the given value
    pub fn set_max(&mut self, event: Event, enclave: bool, value: u64) {
        let slot = &mut self.values[event.index()][enclave as usize];
        *slot = (*slot).max(value);
    }

    pub fn get(&self, event: Event, enclave: bool) -> u64 {
        self.values[event.index()][enclave as usize]
    }

    /// Both modes added together
    pub fn total(&self, event: Event) -> u64 {
        self.get(event, false) + self.get(event, true)
    }

    /// The non-zero counters, keyed by event name
    pub fn report(&self) -> BTreeMap<String, EventCount> {
        Event::ALL
            .iter()
            .filter(|event| self.total(**event) > 0)
            .map(|event| {
                (event.name().to_string(), EventCount {
                    non_enclave: self.get(*event, false),
                    enclave: self.get(*event, true),
                })
            })
            .collect()
    }
}

/// Where an event gets recorded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sink {
    Global,
    /// A cache instance, by index into the simulation's caches
    Cache(usize),
    /// A tenant, by id
    Tenant(usize),
}

/// One counter in a report
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Copy)]
pub struct EventCount {
    pub non_enclave: u64,
    pub enclave: u64,
}

/// The result of a simulation. Can be serialised to JSON
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct SimulationReport {
    pub accesses: u64,
    pub global: BTreeMap<String, EventCount>,
    pub caches: Vec<CacheReport>,
    pub tenants: Vec<TenantReport>,
}

/// Counters for one cache instance. Shared caches have no core
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct CacheReport {
    pub name: String,
    pub core: Option<usize>,
    pub counters: BTreeMap<String, EventCount>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct TenantReport {
    pub id: usize,
    pub core: usize,
    pub counters: BTreeMap<String, EventCount>,
}
