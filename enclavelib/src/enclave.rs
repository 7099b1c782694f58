//! Enclave partition management on the simulation: handing out SAT slots, taking them back, and
//! resizing dynamic cachelets

use rand::Rng;
use tracing::{debug, info};
use crate::hierarchy::{Access, Simulation};
use crate::partition::{Placement, TenantId};
use crate::stats::{Event, Sink};

impl Simulation {
    /// Returns the tenant's partition in the configuration of `cache`, assigning one if it has
    /// none or lost it. When every enclave way is full another tenant's slot is taken over
    pub(crate) fn assign_or_lookup(&mut self, tenant: TenantId, cache: usize) -> Placement {
        let config = self.caches[cache].config;
        if let Some(placement) = self.tenants[tenant].placement(config) {
            if self.partitions[config].owns(placement, tenant) {
                self.partitions[config].touch(placement);
                return placement;
            }
        }
        let placement = match self.partitions[config].find_free_slot(Some(tenant), &self.offsets) {
            Some(placement) => placement,
            None => self.evict_sat(tenant, config),
        };
        self.tenants[tenant].placements[config] = Some(placement);
        placement
    }

    /// Takes a slot away from its current owner and gives it to `tenant`
    ///
    /// Every line in the slot's sets and ways is invalidated, in every instance of the
    /// configuration. The previous owner keeps running and will be assigned a new slot on its next
    /// enclave access here
    fn evict_sat(&mut self, tenant: TenantId, config: usize) -> Placement {
        let rng = &mut self.rng;
        let victim = self.partitions[config].sat_victim(|candidates| rng.gen_range(0..candidates));
        let previous = self.partitions[config].eways[victim.eway].sat[victim.slot].owner;
        debug!(cache = config, eway = victim.eway, slot = victim.slot, ?previous, tenant, "Evicting SAT entry");

        let (start, end) = self.partitions[config].range(victim, &self.offsets);
        let ways = self.params[config].way_step(self.system.cachelet_assoc);
        let instances: Vec<usize> = (0..self.caches.len()).filter(|c| self.caches[*c].config == config).collect();
        for cache in instances {
            self.invalidate(tenant, cache, start..end, victim.eway..victim.eway + ways);
        }

        if let Some(previous) = previous {
            if self.tenants[previous].placement(config) == Some(victim) {
                self.tenants[previous].placements[config] = None;
            }
        }
        self.partitions[config].reassign(victim, tenant);
        victim
    }

    fn invalidate(&mut self, actor: TenantId, cache: usize, sets: std::ops::Range<usize>, ways: std::ops::Range<usize>) {
        let max_way = self.caches[cache].ways();
        for set in sets {
            for way in ways.clone().take_while(|w| *w < max_way) {
                self.evict_line(actor, cache, set, way);
            }
        }
    }

    /// Invalidates the tenant's enclave partitions throughout its chain
    ///
    /// With `finished` set the partitions are also released, so their slots can be handed out
    /// again, and a tenant whose slot was already taken over is left alone
    pub fn free_partition(&mut self, tenant: TenantId, finished: bool) {
        let core = self.tenants[tenant].core;
        let chain = self.cores[core].chain.clone();
        for tier in chain {
            for cache in self.tiers[tier].caches() {
                let config = self.caches[cache].config;
                if !self.params[config].set_partition {
                    continue;
                }
                let placement = match self.tenants[tenant].placement(config) {
                    Some(placement) => placement,
                    None => continue,
                };
                if finished && !self.partitions[config].owns(placement, tenant) {
                    continue;
                }
                let (start, end) = self.partitions[config].range(placement, &self.offsets);
                let ways = self.params[config].way_step(self.system.cachelet_assoc);
                self.invalidate(tenant, cache, start..end, placement.eway..placement.eway + ways);
            }
        }
        if finished {
            for config in 0..self.params.len() {
                if let Some(placement) = self.tenants[tenant].placement(config) {
                    self.partitions[config].release(placement, tenant, &self.offsets);
                    self.tenants[tenant].placements[config] = None;
                }
            }
            info!(tenant, "Released enclave partitions");
        }
    }

    /// Cachelet enabled caches in the tenant's chain, when dynamic cachelets are on
    fn cachelet_caches(&self, tenant: TenantId) -> Vec<usize> {
        if !self.system.dynamic_cachelets() {
            return Vec::new();
        }
        let core = self.tenants[tenant].core;
        self.cores[core]
            .chain
            .iter()
            .flat_map(|tier| self.tiers[*tier].caches())
            .filter(|cache| self.params[self.caches[*cache].config].use_cachelet)
            .collect()
    }

    /// Whether the tenant's allocation is resized dynamically
    pub(crate) fn dynamic_for(&self, tenant: TenantId) -> bool {
        !self.cachelet_caches(tenant).is_empty()
    }

    /// Runs the up and downsize checkpoints after an enclave access
    ///
    /// At every downsize checkpoint a tenant at or under the downsize threshold gives up half of
    /// its cachelets. At every upsize checkpoint a tenant at or over the threshold doubles them,
    /// the largest miss count is recorded and the miss counter restarts
    pub(crate) fn check_resize(&mut self, tenant: TenantId, request: &Access) {
        if !request.enclave {
            return;
        }
        let caches = self.cachelet_caches(tenant);
        if caches.is_empty() {
            return;
        }
        let count = self.tenants[tenant].enclave_accesses;
        if count == 0 {
            return;
        }
        let max_cachelets = caches
            .iter()
            .map(|cache| self.params[self.caches[*cache].config].max_partition)
            .min()
            .unwrap_or(1);
        let system = self.system.clone();

        if system.dyn_downsize_threshold > 0 && count % system.dyn_downsize_rate == 0 {
            let misses = self.tenants[tenant].miss_counter;
            if misses <= system.dyn_downsize_threshold {
                self.record(Sink::Tenant(tenant), Event::ReachedDownsizeThreshold, true);
                let current = self.tenants[tenant].num_cachelets;
                if current > 1 {
                    self.flush_cachelets(tenant, &caches, current);
                    self.resize(tenant, &caches, current, current / 2);
                    self.record(Sink::Tenant(tenant), Event::Downsized, true);
                    info!(tenant, misses, cachelets = current / 2, "Downsized cachelets");
                }
            }
        }

        if count % system.dyn_rate == 0 {
            let misses = self.tenants[tenant].miss_counter;
            if misses >= system.dyn_threshold {
                self.record(Sink::Tenant(tenant), Event::ReachedResizeThreshold, true);
                let current = self.tenants[tenant].num_cachelets;
                if current * 2 <= max_cachelets {
                    self.resize(tenant, &caches, current, current * 2);
                    self.flush_cachelets(tenant, &caches, current * 2);
                    self.record(Sink::Tenant(tenant), Event::Resized, true);
                    info!(tenant, misses, cachelets = current * 2, "Resized cachelets");
                }
            }
            if self.accesses > self.system.warmup {
                self.tenants[tenant].counters.set_max(Event::MaxMissCounter, true, misses);
            }
            self.tenants[tenant].miss_counter = 0;
        }
    }

    /// Changes the cachelet count, moving the claimed regions in the way bitmaps along with it
    fn resize(&mut self, tenant: TenantId, caches: &[usize], from: usize, to: usize) {
        for cache in caches {
            let config = self.caches[*cache].config;
            let eway = self.tenants[tenant].placement(config).map(|p| p.eway).unwrap_or(0);
            let partition = &mut self.partitions[config];
            if to > from {
                for index in from..to {
                    partition.mark_cachelet(index, eway, true);
                }
            } else {
                for index in to..from {
                    partition.mark_cachelet(index, eway, false);
                }
            }
        }
        self.tenants[tenant].num_cachelets = to;
    }

    /// Evicts every line in the ways of the tenant's cachelet, over the sets `cachelets`
    /// cachelets span
    fn flush_cachelets(&mut self, tenant: TenantId, caches: &[usize], cachelets: usize) {
        let assoc = self.system.cachelet_assoc.max(1);
        for cache in caches {
            let config = self.caches[*cache].config;
            let params = self.params[config];
            let sets = params.geometry.cachelet_sets(params.max_partition, cachelets);
            let eway = self.tenants[tenant].placement(config).map(|p| p.eway).unwrap_or(0);
            self.invalidate(tenant, *cache, 0..sets, eway..eway + assoc);
        }
    }
}
