use tracing::debug;
use crate::config::LevelParams;
use crate::plru::PlruTree;

/// Tenants are identified by their dense trace owner id
pub type TenantId = usize;

/// One partition slot of an enclave way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SatEntry {
    pub valid: bool,
    /// `None` marks a slot reserved before the simulation started
    pub owner: Option<TenantId>,
}

/// Bookkeeping for one cache way reserved for enclaves
#[derive(Debug, Clone)]
pub struct EnclaveWay {
    pub valid: bool,
    /// Width of a tenant's set index inside this way. Starts at the full cache width and narrows as
    /// tenants are added, unless cachelets fix it
    pub set_bits: u32,
    pub alloc_n: usize,
    /// Set Allocation Table
    pub sat: Vec<SatEntry>,
    pub sat_plru: PlruTree,
}

impl EnclaveWay {
    fn new(max_partition: usize) -> Self {
        Self {
            valid: false,
            set_bits: 0,
            alloc_n: 0,
            sat: vec![SatEntry::default(); max_partition],
            sat_plru: PlruTree::new(max_partition),
        }
    }
}

/// Where a tenant lives inside one cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// The enclave way, or the first way of the cachelet
    pub eway: usize,
    pub slot: usize,
}

/// Base set of every partition slot, indexed by slot then by cache configuration
///
/// Slot `i` starts where the slot it was split from starts, plus the width of a partition at the
/// granularity `i` introduces. For 1024 sets and 8 slots this gives 0, 512, 256, 768, 128, 640,
/// 384, 896, so every prefix of slots tiles the sets evenly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    offsets: Vec<Vec<usize>>,
}

impl OffsetTable {
    pub fn new(params: &[LevelParams]) -> Self {
        let rows = params.iter().map(|p| p.max_partition).max().unwrap_or(0);
        let mut offsets = vec![vec![0; params.len()]; rows];
        for p in params {
            let mut up = 0;
            let mut sets = p.geometry.sets;
            for i in 1..p.max_partition {
                if i.is_power_of_two() {
                    up = if up == 0 { 1 } else { up * 2 };
                    sets /= 2;
                }
                offsets[i][p.id] = offsets[i - up][p.id] + sets;
            }
        }
        Self { offsets }
    }

    pub fn offset(&self, slot: usize, config: usize) -> usize {
        self.offsets[slot][config]
    }
}

/// Enclave partition state of one cache configuration, shared by all of its instances
#[derive(Debug, Clone)]
pub struct PartitionState {
    pub params: LevelParams,
    cachelet_assoc: usize,
    /// Ways currently reserved for enclaves, the boundary used by way partitioning
    pub enclave_ways_n: usize,
    pub eways: Vec<EnclaveWay>,
    /// Ways claimed by cachelets, one bitmap per `1 / max_partition` region of the sets
    pub way_bitmaps: Vec<u64>,
}

impl PartitionState {
    pub fn new(params: LevelParams, cachelet_assoc: usize) -> Self {
        let eways = if params.set_partition {
            (0..params.enclave_ways).map(|_| EnclaveWay::new(params.max_partition)).collect()
        } else {
            Vec::new()
        };
        let way_bitmaps = if params.use_cachelet {
            vec![0; params.max_partition]
        } else {
            Vec::new()
        };
        Self {
            params,
            cachelet_assoc,
            enclave_ways_n: if params.partition && params.static_partition { params.enclave_ways } else { 0 },
            eways,
            way_bitmaps,
        }
    }

    fn step(&self) -> usize {
        self.params.way_step(self.cachelet_assoc)
    }

    /// Set index width of a cachelet, which never changes
    fn cachelet_set_bits(&self) -> u32 {
        (self.params.geometry.sets / self.params.max_partition).trailing_zeros()
    }

    /// Which way bitmap covers `set`
    pub fn bitmap_index(&self, set: usize) -> usize {
        if self.params.max_partition == 0 {
            return 0;
        }
        let partition_bits = self.params.max_partition.trailing_zeros();
        set >> (self.params.geometry.set_bits - partition_bits)
    }

    /// The enclave occupancy of the region holding `set`. Zero when the level has no cachelets
    pub fn bitmap_for_set(&self, set: usize) -> u64 {
        self.way_bitmaps.get(self.bitmap_index(set)).copied().unwrap_or(0)
    }

    fn cachelet_mask(&self, eway: usize) -> u64 {
        let width = self.step();
        let bits = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        bits << eway
    }

    /// Marks or clears the ways of the cachelet starting at `eway` in the bitmap for `index`
    pub fn mark_cachelet(&mut self, index: usize, eway: usize, claimed: bool) {
        let mask = self.cachelet_mask(eway);
        if let Some(bitmap) = self.way_bitmaps.get_mut(index) {
            if claimed {
                *bitmap |= mask;
            } else {
                *bitmap &= !mask;
            }
        }
    }

    /// Claims a free slot for `owner`, reserving a new enclave way if every valid way is full
    ///
    /// Ways are scanned in order, stepping by the cachelet associativity when cachelets are on.
    /// Without cachelets, a way's set bits narrow so every slot handed out so far still gets an
    /// equal share of the sets. Returns `None` when every enclave way is full
    pub fn find_free_slot(&mut self, owner: Option<TenantId>, offsets: &OffsetTable) -> Option<Placement> {
        let step = self.step();
        let full_bits = self.params.geometry.set_bits;
        let cachelet_bits = if self.params.use_cachelet { self.cachelet_set_bits() } else { full_bits };
        let max_partition = self.params.max_partition;

        let mut w = 0;
        while w < self.eways.len() {
            let eway = &mut self.eways[w];
            let placement = if eway.valid {
                if eway.alloc_n == max_partition {
                    w += step;
                    continue;
                }
                let slot = match eway.sat.iter().position(|entry| !entry.valid) {
                    Some(slot) => slot,
                    None => {
                        w += step;
                        continue;
                    }
                };
                eway.sat[slot] = SatEntry { valid: true, owner };
                eway.alloc_n += 1;
                if !self.params.use_cachelet {
                    let needed = eway.alloc_n.next_power_of_two().trailing_zeros();
                    eway.set_bits = eway.set_bits.min(full_bits.saturating_sub(needed));
                }
                Placement { eway: w, slot }
            } else {
                eway.valid = true;
                eway.set_bits = cachelet_bits;
                eway.alloc_n = 1;
                eway.sat[0] = SatEntry { valid: true, owner };
                self.enclave_ways_n = (self.enclave_ways_n + step).min(self.params.enclave_ways);
                Placement { eway: w, slot: 0 }
            };
            if self.params.use_cachelet {
                let index = self.bitmap_index(offsets.offset(placement.slot, self.params.id));
                self.mark_cachelet(index, placement.eway, true);
            }
            debug!(
                cache = self.params.id,
                eway = placement.eway,
                slot = placement.slot,
                set_bits = self.eways[placement.eway].set_bits,
                "Allocated enclave partition"
            );
            return Some(placement);
        }
        None
    }

    /// Whether `owner` still holds `placement`
    pub fn owns(&self, placement: Placement, owner: TenantId) -> bool {
        self.eways
            .get(placement.eway)
            .and_then(|eway| eway.sat.get(placement.slot))
            .map(|entry| entry.valid && entry.owner == Some(owner))
            .unwrap_or(false)
    }

    /// Sets `[start, end)` covered by a placement
    pub fn range(&self, placement: Placement, offsets: &OffsetTable) -> (usize, usize) {
        let start = offsets.offset(placement.slot, self.params.id);
        let width = 1usize << self.eways[placement.eway].set_bits;
        (start, (start + width).min(self.params.geometry.sets))
    }

    /// The set index width an enclave sees inside `placement`
    pub fn set_bits(&self, placement: Placement) -> u32 {
        self.eways[placement.eway].set_bits
    }

    /// `log2` of how many tenants' worth of partitions the enclave way is cut into
    pub fn partition_shift(&self, placement: Placement) -> u32 {
        self.params.geometry.set_bits - self.set_bits(placement)
    }

    /// Picks a slot to take over when every enclave way is full
    ///
    /// The way is drawn uniformly from the valid enclave ways (using `pick`, which receives the
    /// number of candidates), then the slot from that way's SAT PLRU
    pub fn sat_victim<F>(&mut self, pick: F) -> Placement
    where
        F: FnOnce(usize) -> usize,
    {
        let candidates: Vec<usize> = (0..self.eways.len())
            .step_by(self.step())
            .filter(|w| self.eways[*w].valid)
            .collect();
        assert!(!candidates.is_empty(), "SAT eviction with no valid enclave way in cache {}", self.params.id);
        let eway = candidates[pick(candidates.len())];
        let slot = self.eways[eway].sat_plru.victim();
        Placement { eway, slot }
    }

    pub fn touch(&mut self, placement: Placement) {
        self.eways[placement.eway].sat_plru.touch(placement.slot);
    }

    /// Hands a slot over to a new owner, keeping the slot allocated
    pub fn reassign(&mut self, placement: Placement, owner: TenantId) {
        self.eways[placement.eway].sat[placement.slot] = SatEntry { valid: true, owner: Some(owner) };
    }

    /// Frees a slot held by `owner`, along with the cachelet ways it claimed
    pub fn release(&mut self, placement: Placement, owner: TenantId, offsets: &OffsetTable) {
        if !self.owns(placement, owner) {
            return;
        }
        let eway = &mut self.eways[placement.eway];
        eway.sat[placement.slot] = SatEntry::default();
        eway.alloc_n -= 1;
        if self.params.use_cachelet {
            let index = self.bitmap_index(offsets.offset(placement.slot, self.params.id));
            self.mark_cachelet(index, placement.eway, false);
        }
        debug!(cache = self.params.id, eway = placement.eway, slot = placement.slot, "Released enclave partition");
    }
}
