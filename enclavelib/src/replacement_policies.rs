use std::ops::Range;
use rand::Rng;
use rand::rngs::StdRng;
use crate::cache::CacheLine;
use crate::plru::PlruTree;
use crate::stats::Event;

/// The eviction policy of a cache level, fixed when the hierarchy is built
///
/// Matched explicitly at every replacement decision rather than spread out over flag checks
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ReplacementPolicy {
    /// Tree pseudo-LRU, bounded by the partition the access is allowed to use
    Plru,
    /// Uniformly random way within the allowed range
    Random,
    /// With probability `rate`, PLRU biased on its last level towards evicting non-enclave lines.
    /// Otherwise plain PLRU
    SgxPlru { rate: f32 },
}

impl ReplacementPolicy {
    /// Whether hits and installs must keep the set's PLRU tree up to date
    pub fn uses_tree(&self) -> bool {
        !matches!(self, ReplacementPolicy::Random)
    }
}

/// How cachelets constrain a replacement in one set
#[derive(Debug, Copy, Clone)]
pub(crate) struct CacheletView {
    /// Ways per cachelet
    pub assoc: usize,
    /// First way of the requesting tenant's cachelet, meaningful for enclave accesses only
    pub group_start: usize,
    /// Ways claimed by enclaves in this region of the cache, one bit per way
    pub occupied: u64,
}

/// Everything a replacement decision needs to know about the access and the set
pub(crate) struct VictimSearch<'a> {
    pub enclave: bool,
    /// Ways the access may replace under way partitioning
    pub bounds: Range<usize>,
    /// Present when the level uses cachelets
    pub cachelet: Option<CacheletView>,
    pub lines: &'a [CacheLine],
}

/// The chosen way, and which eviction counter the choice should be attributed to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Victim {
    pub way: usize,
    pub counted_as: Option<Event>,
}

/// Picks the way to evict from a full set
///
/// Panics if the access has no way it may evict, the hierarchy is inconsistent at that point
pub(crate) fn select_victim(policy: ReplacementPolicy, search: &VictimSearch, tree: &mut PlruTree, rng: &mut StdRng) -> Victim {
    match policy {
        ReplacementPolicy::Plru => Victim {
            way: plru_victim(search, tree),
            counted_as: None,
        },
        ReplacementPolicy::SgxPlru { rate } => {
            if rng.gen::<f32>() <= rate {
                Victim {
                    way: tree.victim_preferring(|way| search.lines[way].enclave),
                    counted_as: Some(Event::EvictSgxPlru),
                }
            } else {
                Victim {
                    way: bounded_victim(&search.bounds, tree),
                    counted_as: Some(Event::EvictPlru),
                }
            }
        }
        ReplacementPolicy::Random => Victim {
            way: random_victim(search, rng),
            counted_as: None,
        },
    }
}

fn plru_victim(search: &VictimSearch, tree: &mut PlruTree) -> usize {
    match search.cachelet {
        // Enclave accesses stay in their own cachelet
        Some(view) if search.enclave => tree.victim_in_group(view.group_start, view.assoc),
        Some(view) => tree
            .victim_avoiding(view.occupied)
            .unwrap_or_else(|| panic!("all ways are occupied by enclaves (bitmap {:#x})", view.occupied)),
        None => bounded_victim(&search.bounds, tree),
    }
}

fn bounded_victim(bounds: &Range<usize>, tree: &mut PlruTree) -> usize {
    tree.victim_within(bounds.start, bounds.end)
        .unwrap_or_else(|| panic!("no way in {bounds:?} can be evicted"))
}

fn random_victim(search: &VictimSearch, rng: &mut StdRng) -> usize {
    let candidates: Vec<usize> = match search.cachelet {
        Some(view) if search.enclave => (view.group_start..view.group_start + view.assoc).collect(),
        Some(view) => (0..search.lines.len())
            .filter(|way| view.occupied & (1 << way) == 0)
            .collect(),
        None => search.bounds.clone().collect(),
    };
    assert!(!candidates.is_empty(), "no way can be evicted for a random replacement");
    candidates[rng.gen_range(0..candidates.len())]
}
