//! Keeping inclusive caches inclusive
//!
//! When any level is inclusive, evictions from an inclusive cache are mirrored into the caches of
//! the core the evicted line came from, and installs are mirrored so the inclusive cache (or the
//! first level, when starting from the inclusive cache) holds the line too

use tracing::trace;
use crate::hierarchy::{Access, Simulation};
use crate::partition::TenantId;
use crate::stats::{Event, Sink};

impl Simulation {
    /// Evicts the line at `(set, way)` of `cache` on behalf of `actor`, cascading the eviction
    /// into the owner's core first if the cache is inclusive. Evicting an empty way does nothing
    pub(crate) fn evict_line(&mut self, actor: TenantId, cache: usize, set: usize, way: usize) {
        let line = *self.caches[cache].line(set, way);
        if !line.valid {
            return;
        }
        let config = self.caches[cache].config;

        if self.uses_inclusive && self.params[config].inclusive {
            // The owner may have moved partitions since the line was placed
            let address = self.params[config].geometry.address_of(line.tag, set - line.base);
            let core = self.owner_core[line.owner];
            let depth = self.cores[core].chain.len();
            'chain: for pos in 0..depth {
                let tier = self.cores[core].chain[pos];
                for target in self.tiers[tier].caches() {
                    let target_config = self.caches[target].config;
                    if target_config == config {
                        continue;
                    }
                    self.mirror_eviction(actor, target, line.owner, address, line.enclave);
                    if self.params[target_config].inclusive {
                        break 'chain;
                    }
                }
            }
        }

        if line.dirty {
            self.record(Sink::Tenant(actor), Event::DirtyLines, line.enclave);
        }
        if line.owner != actor {
            self.record(Sink::Tenant(actor), Event::EvictOther, line.enclave);
        }
        self.caches[cache].line_mut(set, way).valid = false;
    }

    /// Removes `owner`'s copy of `address` from one cache, if present, counting it as an
    /// inclusion victim
    fn mirror_eviction(&mut self, actor: TenantId, cache: usize, owner: TenantId, address: u64, enclave: bool) {
        let probe = match self.probe(owner, cache, address, enclave, false) {
            Some(probe) => probe,
            None => return,
        };
        let way = match probe.hit {
            Some(way) => way,
            None => return,
        };
        let line = *self.caches[cache].line(probe.set, way);
        trace!(cache = %self.caches[cache].name, set = probe.set, way, owner, actor, "Inclusion victim");
        if line.dirty {
            self.record(Sink::Tenant(actor), Event::DirtyLines, line.enclave);
        }
        self.record(Sink::Tenant(owner), Event::IsInclusionVictim, line.enclave);
        self.record(Sink::Tenant(actor), Event::EvictInclusionVictim, line.enclave);
        if owner != actor {
            self.record(Sink::Tenant(owner), Event::IsInclusionVictimOther, line.enclave);
            self.record(Sink::Tenant(actor), Event::EvictInclusionVictimOther, line.enclave);
        }
        self.caches[cache].line_mut(probe.set, way).valid = false;
    }

    /// Installs the requested line into an empty way, after mirroring the install into the
    /// actor's chain
    ///
    /// Starting from an inclusive cache the line also goes to the first level, starting from a
    /// non-inclusive one it goes to the next inclusive cache. Only one cache receives the mirrored
    /// line, and for split levels the half matching the operation is used
    pub(crate) fn install_line(&mut self, actor: TenantId, request: &Access, cache: usize, set: usize, way: usize, tag: u64) {
        let config = self.caches[cache].config;
        if self.uses_inclusive {
            let start_inclusive = self.params[config].inclusive;
            let core = self.tenants[actor].core;
            let depth = self.cores[core].chain.len();
            for pos in 0..depth {
                let target = self.tiers[self.cores[core].chain[pos]].cache_for(request.op);
                let target_config = self.caches[target].config;
                if target_config == config {
                    continue;
                }
                if start_inclusive && pos != 0 {
                    continue;
                }
                if !start_inclusive && !self.params[target_config].inclusive {
                    continue;
                }
                self.mirror_install(actor, request, target);
                break;
            }
        }
        self.set_line(actor, request, cache, set, way, tag);
    }

    /// Puts the line into `cache` without cascading further, replacing a line if needed
    fn mirror_install(&mut self, actor: TenantId, request: &Access, cache: usize) {
        let probe = self
            .probe(actor, cache, request.address, request.enclave, true)
            .unwrap_or_else(|| panic!("tenant {actor} has no placement in {}", self.caches[cache].name));
        if probe.hit.is_some() {
            return;
        }
        let way = match probe.free {
            Some(way) => way,
            None => {
                let way = self.choose_victim(actor, cache, probe.set, request.enclave);
                self.evict_line(actor, cache, probe.set, way);
                way
            }
        };
        self.set_line(actor, request, cache, probe.set, way, probe.tag);
    }
}
