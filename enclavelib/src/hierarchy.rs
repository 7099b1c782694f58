use std::collections::BTreeMap;
use std::ops::Range;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use crate::cache::{Cache, CacheLine};
use crate::config::{CacheKind, LevelParams, SimConfig, SystemConfig};
use crate::error::ConfigError;
use crate::partition::{OffsetTable, PartitionState, Placement, TenantId};
use crate::replacement_policies::{select_victim, CacheletView, VictimSearch};
use crate::stats::{CacheReport, Counters, Event, SimulationReport, Sink, TenantReport};

/// The kind of memory access
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    Load,
    Store,
    Fetch,
}

impl Operation {
    pub fn event(self) -> Event {
        match self {
            Operation::Load => Event::Load,
            Operation::Store => Event::Store,
            Operation::Fetch => Event::Insn,
        }
    }

    pub fn is_data(self) -> bool {
        !matches!(self, Operation::Fetch)
    }
}

/// One memory access, as fed to the hierarchy
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Access {
    pub owner: TenantId,
    pub enclave: bool,
    pub address: u64,
    pub op: Operation,
    pub timestamp: f64,
}

/// One position in a core's chain of caches
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tier {
    Unified(usize),
    Split { insn: usize, data: usize },
}

impl Tier {
    /// The cache instance an operation goes to
    pub fn cache_for(&self, op: Operation) -> usize {
        match *self {
            Tier::Unified(cache) => cache,
            Tier::Split { insn, .. } if op == Operation::Fetch => insn,
            Tier::Split { data, .. } => data,
        }
    }

    /// Every cache instance in this tier
    pub fn caches(&self) -> Vec<usize> {
        match *self {
            Tier::Unified(cache) => vec![cache],
            Tier::Split { insn, data } => vec![insn, data],
        }
    }
}

/// A core owns its private tiers and references the shared ones. `chain` lists tier indices from
/// the first level outwards
#[derive(Debug, Clone)]
pub struct Core {
    pub id: usize,
    pub chain: Vec<usize>,
}

/// Per tenant state: where its enclave partitions live and its dynamic cachelet allocation
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: TenantId,
    pub core: usize,
    /// One placement per cache configuration
    pub(crate) placements: Vec<Option<Placement>>,
    /// `log2` of how finely the tenant's enclave way is divided, as of its last enclave access
    pub partition_shift: u32,
    pub num_cachelets: usize,
    pub miss_counter: u64,
    pub enclave_accesses: u64,
    pub counters: Counters,
}

impl Tenant {
    pub fn placement(&self, config: usize) -> Option<Placement> {
        self.placements.get(config).copied().flatten()
    }
}

/// The outcome of placing a line in one cache
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Placed {
    /// The line was already there
    Hit,
    /// Installed into an empty way
    Cold,
    /// Installed over an evicted line
    Replaced,
}

/// Where an access may look and install inside a set
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Window {
    /// Enclave lines of a set partitioned level live in exactly one way
    Direct(usize),
    /// A range of ways, minus those set in `skip`
    Ways { bounds: Range<usize>, skip: u64 },
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct Probe {
    pub set: usize,
    pub tag: u64,
    pub hit: Option<usize>,
    pub free: Option<usize>,
}

/// The whole simulated system: every cache instance, the partition state of every cache
/// configuration, the cores, the tenants and the statistics
///
/// Accesses are processed one at a time and every effect is visible to the next access
pub struct Simulation {
    pub(crate) system: SystemConfig,
    pub(crate) params: Vec<LevelParams>,
    pub(crate) partitions: Vec<PartitionState>,
    pub(crate) offsets: OffsetTable,
    pub(crate) caches: Vec<Cache>,
    pub(crate) tiers: Vec<Tier>,
    pub(crate) cores: Vec<Core>,
    pub(crate) tenants: Vec<Tenant>,
    /// Back references from tenant to core, rebuilt whenever a tenant is added
    pub(crate) owner_core: Vec<usize>,
    pub(crate) uses_inclusive: bool,
    pub(crate) rng: StdRng,
    pub(crate) counters: Counters,
    pub(crate) accesses: u64,
}

enum Layout {
    Unified(usize),
    Split { insn: usize, data: usize },
}

fn layout(level: u32, members: &[&LevelParams], scope: &'static str) -> Result<Layout, ConfigError> {
    match members {
        [only] if only.kind == CacheKind::Unified => Ok(Layout::Unified(only.id)),
        [a, b] => match (a.kind, b.kind) {
            (CacheKind::Insn, CacheKind::Data) => Ok(Layout::Split { insn: a.id, data: b.id }),
            (CacheKind::Data, CacheKind::Insn) => Ok(Layout::Split { insn: b.id, data: a.id }),
            _ => Err(ConfigError::InvalidLevel { level, scope }),
        },
        _ => Err(ConfigError::InvalidLevel { level, scope }),
    }
}

fn group_levels(params: &[LevelParams], shared: bool) -> BTreeMap<u32, Vec<&LevelParams>> {
    let mut levels: BTreeMap<u32, Vec<&LevelParams>> = BTreeMap::new();
    for p in params.iter().filter(|p| p.shared == shared) {
        levels.entry(p.level).or_default().push(p);
    }
    levels
}

impl Simulation {
    /// Validates a configuration and builds the hierarchy it describes
    ///
    /// Private levels get one instance per core, shared levels a single instance at the end of
    /// every core's chain. Statically reserved cachelets are claimed before returning
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        let system = config.system.clone();
        system.validate()?;
        if config.caches.is_empty() {
            return Err(ConfigError::NoCaches);
        }
        if system.dynamic_cachelets() && config.caches.iter().all(|c| !c.use_cachelet) {
            return Err(ConfigError::InvalidSystem {
                parameter: "dyn_threshold",
                reason: "dynamic cachelets need a cache with use_cachelet".to_string(),
            });
        }
        let params = config
            .caches
            .iter()
            .enumerate()
            .map(|(id, cache)| cache.resolve(id, &system))
            .collect::<Result<Vec<_>, _>>()?;

        let mut caches = Vec::new();
        let mut tiers = Vec::new();
        let mut instantiate = |layout: &Layout, core: Option<usize>| {
            let mut make = |id: usize| {
                let p = &params[id];
                caches.push(Cache::new(id, core, config.caches[id].name.clone(), p.geometry.sets, p.geometry.ways));
                caches.len() - 1
            };
            let tier = match *layout {
                Layout::Unified(id) => Tier::Unified(make(id)),
                Layout::Split { insn, data } => {
                    let insn = make(insn);
                    let data = make(data);
                    Tier::Split { insn, data }
                }
            };
            tiers.push(tier);
            tiers.len() - 1
        };

        let private = group_levels(&params, false)
            .into_iter()
            .map(|(level, members)| layout(level, &members, "private"))
            .collect::<Result<Vec<_>, _>>()?;
        let shared = group_levels(&params, true)
            .into_iter()
            .map(|(level, members)| layout(level, &members, "shared"))
            .collect::<Result<Vec<_>, _>>()?;

        let shared_tiers: Vec<usize> = shared.iter().map(|l| instantiate(l, None)).collect();
        let mut cores = Vec::with_capacity(system.cores);
        for id in 0..system.cores {
            let mut chain: Vec<usize> = private.iter().map(|l| instantiate(l, Some(id))).collect();
            chain.extend(&shared_tiers);
            cores.push(Core { id, chain });
        }

        let offsets = OffsetTable::new(&params);
        let mut partitions: Vec<PartitionState> = params
            .iter()
            .map(|p| PartitionState::new(*p, system.cachelet_assoc))
            .collect();
        for (p, partition) in params.iter().zip(partitions.iter_mut()) {
            if p.static_cachelets == 0 {
                continue;
            }
            for _ in 0..p.static_cachelets {
                if partition.find_free_slot(None, &offsets).is_none() {
                    return Err(ConfigError::StaticCachelets {
                        cache: config.caches[p.id].name.clone(),
                        requested: p.static_cachelets,
                        capacity: p.enclave_ways / system.cachelet_assoc.max(1) * p.max_partition,
                    });
                }
            }
            info!(cache = %config.caches[p.id].name, cachelets = p.static_cachelets, "Statically allocated cachelets");
        }

        for p in &params {
            info!(
                cache = %config.caches[p.id].name,
                level = p.level,
                shared = p.shared,
                sets = p.geometry.sets,
                ways = p.geometry.ways,
                line_size = p.geometry.line_size,
                inclusive = p.inclusive,
                policy = ?p.policy,
                "Configured cache"
            );
        }
        info!(cores = system.cores, instances = caches.len(), "Built cache hierarchy");

        let rng = match system.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            uses_inclusive: params.iter().any(|p| p.inclusive),
            system,
            params,
            partitions,
            offsets,
            caches,
            tiers,
            cores,
            tenants: Vec::new(),
            owner_core: Vec::new(),
            rng,
            counters: Counters::default(),
            accesses: 0,
        })
    }

    /// Registers a new tenant running on `core` and returns its id
    pub fn add_tenant(&mut self, core: usize) -> Result<TenantId, ConfigError> {
        if core >= self.cores.len() {
            return Err(ConfigError::UnknownCore { core, cores: self.cores.len() });
        }
        if self.system.dynamic_cachelets() && !self.tenants.is_empty() {
            return Err(ConfigError::DynamicMultiTenant);
        }
        let id = self.tenants.len();
        self.tenants.push(Tenant {
            id,
            core,
            placements: vec![None; self.params.len()],
            partition_shift: 0,
            num_cachelets: 1,
            miss_counter: 0,
            enclave_accesses: 0,
            counters: Counters::default(),
        });
        self.owner_core = self.tenants.iter().map(|t| t.core).collect();
        Ok(id)
    }

    pub fn tenants(&self) -> &[Tenant] {
        &self.tenants
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn params(&self) -> &[LevelParams] {
        &self.params
    }

    pub fn partitions(&self) -> &[PartitionState] {
        &self.partitions
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    /// Records an event, unless the simulation is still warming up
    pub(crate) fn record(&mut self, sink: Sink, event: Event, enclave: bool) {
        if self.accesses <= self.system.warmup {
            return;
        }
        match sink {
            Sink::Global => self.counters.increment(event, enclave),
            Sink::Cache(cache) => self.caches[cache].counters.increment(event, enclave),
            Sink::Tenant(tenant) => self.tenants[tenant].counters.increment(event, enclave),
        }
    }

    fn record_access(&mut self, sink: Sink, op: Operation, enclave: bool) {
        self.record(sink, Event::Trace, enclave);
        self.record(sink, op.event(), enclave);
    }

    /// Drives one access through the tenant's chain of caches
    ///
    /// The first hit stops the walk, promoting the line into the first level if it was found
    /// further out. A miss in the last level installs the line into every level of the chain and
    /// prefetches after it if configured
    pub fn access(&mut self, tenant: TenantId, request: &Access) {
        self.accesses += 1;
        let enclave = request.enclave;
        self.record_access(Sink::Global, request.op, enclave);
        self.record_access(Sink::Tenant(tenant), request.op, enclave);
        if enclave {
            self.tenants[tenant].enclave_accesses += 1;
        }

        let core = self.tenants[tenant].core;
        let depth = self.cores[core].chain.len();
        for pos in 0..depth {
            let tier = self.cores[core].chain[pos];
            let cache = self.tiers[tier].cache_for(request.op);
            let config = self.caches[cache].config;
            let last = pos + 1 == depth;

            self.record_access(Sink::Cache(cache), request.op, enclave);
            if last {
                self.record(Sink::Tenant(tenant), Event::LlcAccess, enclave);
            }

            let probe = self
                .probe(tenant, cache, request.address, enclave, true)
                .unwrap_or_else(|| panic!("tenant {tenant} has no placement in {}", self.caches[cache].name));
            if enclave && self.params[config].set_partition {
                let bucket = Event::partition_bucket(self.tenants[tenant].partition_shift);
                self.record(Sink::Tenant(tenant), bucket, enclave);
            }

            if let Some(way) = probe.hit {
                if self.params[config].policy.uses_tree() {
                    self.caches[cache].touch(probe.set, way);
                }
                self.record(Sink::Cache(cache), Event::CacheHit, enclave);
                self.record(Sink::Tenant(tenant), Event::CacheHit, enclave);
                self.record(Sink::Global, Event::CacheHit, enclave);
                if last {
                    self.record(Sink::Tenant(tenant), Event::LlcHit, enclave);
                }
                if pos != 0 {
                    let first = self.tiers[self.cores[core].chain[0]].cache_for(request.op);
                    self.place(tenant, first, request);
                }
                break;
            }

            self.record(Sink::Cache(cache), Event::CacheMiss, enclave);
            if last {
                self.fill_chain(tenant, request, probe.free.is_some());
            }
        }

        self.check_resize(tenant, request);
    }

    /// Handles a miss in the last level: installs the line in every level, then prefetches
    fn fill_chain(&mut self, tenant: TenantId, request: &Access, cold: bool) {
        let enclave = request.enclave;
        self.record(Sink::Tenant(tenant), Event::CacheMiss, enclave);
        self.record(Sink::Global, Event::CacheMiss, enclave);
        if cold {
            self.record(Sink::Tenant(tenant), Event::LlcColdMiss, enclave);
        }
        if enclave && request.op.is_data() && self.dynamic_for(tenant) {
            self.tenants[tenant].miss_counter += 1;
        }

        let core = self.tenants[tenant].core;
        let depth = self.cores[core].chain.len();
        for pos in 0..depth {
            let cache = self.tiers[self.cores[core].chain[pos]].cache_for(request.op);
            if self.place(tenant, cache, request) == Placed::Cold {
                self.record(Sink::Cache(cache), Event::CacheColdMiss, enclave);
            }
        }

        let lines = self.system.prefetch.lines();
        if lines == 0 {
            return;
        }
        for pos in 0..depth {
            let cache = self.tiers[self.cores[core].chain[pos]].cache_for(request.op);
            let line_size = self.params[self.caches[cache].config].geometry.line_size;
            for r in 1..=lines {
                let next = Access {
                    address: request.address.wrapping_add(r * line_size),
                    ..*request
                };
                self.place(tenant, cache, &next);
            }
        }
    }

    /// Places the requested line in one cache, evicting if the allowed ways are full
    pub(crate) fn place(&mut self, tenant: TenantId, cache: usize, request: &Access) -> Placed {
        let probe = self
            .probe(tenant, cache, request.address, request.enclave, true)
            .unwrap_or_else(|| panic!("tenant {tenant} has no placement in {}", self.caches[cache].name));
        if let Some(way) = probe.hit {
            if self.params[self.caches[cache].config].policy.uses_tree() {
                self.caches[cache].touch(probe.set, way);
            }
            return Placed::Hit;
        }
        match probe.free {
            Some(way) => {
                self.install_line(tenant, request, cache, probe.set, way, probe.tag);
                Placed::Cold
            }
            None => {
                let way = self.choose_victim(tenant, cache, probe.set, request.enclave);
                self.evict_line(tenant, cache, probe.set, way);
                self.install_line(tenant, request, cache, probe.set, way, probe.tag);
                Placed::Replaced
            }
        }
    }

    /// Decodes an address for one cache as seen by `owner`
    ///
    /// Enclave accesses to set partitioned levels are confined to the owner's partition. With
    /// `allocate` set a missing partition is assigned (possibly evicting another tenant's),
    /// otherwise `None` is returned for an owner with no partition here
    pub(crate) fn locate(&mut self, owner: TenantId, cache: usize, address: u64, enclave: bool, allocate: bool) -> Option<(usize, u64)> {
        let config = self.caches[cache].config;
        let params = self.params[config];
        if !enclave || !params.set_partition {
            return Some(params.geometry.decode(address));
        }

        let placement = if allocate {
            self.assign_or_lookup(owner, cache)
        } else {
            self.tenants[owner].placement(config)?
        };

        if params.use_cachelet && self.system.dynamic_cachelets() {
            let cachelets = self.tenants[owner].num_cachelets;
            if allocate {
                let shift = (params.max_partition / cachelets).max(1).trailing_zeros();
                self.tenants[owner].partition_shift = shift;
            }
            return Some(params.geometry.decode_cachelets(address, params.max_partition, cachelets));
        }

        let partition = &self.partitions[config];
        let set_bits = partition.set_bits(placement);
        let base = self.offsets.offset(placement.slot, config);
        if allocate {
            self.tenants[owner].partition_shift = partition.partition_shift(placement);
        }
        Some(params.geometry.decode_partitioned(address, set_bits, base))
    }

    /// The first set of `owner`'s enclave partition in one configuration, 0 when it has none
    pub(crate) fn partition_base(&self, owner: TenantId, config: usize, enclave: bool) -> usize {
        let params = &self.params[config];
        if !enclave || !params.set_partition || (params.use_cachelet && self.system.dynamic_cachelets()) {
            return 0;
        }
        self.tenants
            .get(owner)
            .and_then(|t| t.placement(config))
            .map(|p| self.offsets.offset(p.slot, config))
            .unwrap_or(0)
    }

    pub(crate) fn window(&self, owner: TenantId, cache: usize, set: usize, enclave: bool) -> Window {
        let config = self.caches[cache].config;
        let params = &self.params[config];
        let assoc = self.system.cachelet_assoc;
        let ways = params.geometry.ways;
        let eway = self.tenants.get(owner).and_then(|t| t.placement(config)).map(|p| p.eway).unwrap_or(0);

        if enclave && params.enclave_direct_mapped(assoc) {
            return Window::Direct(eway);
        }
        if params.use_cachelet {
            return if enclave {
                Window::Ways { bounds: eway..(eway + assoc).min(ways), skip: 0 }
            } else {
                Window::Ways { bounds: 0..ways, skip: self.partitions[config].bitmap_for_set(set) }
            };
        }
        if params.partition {
            let boundary = self.partitions[config].enclave_ways_n;
            let bounds = if enclave { 0..boundary } else { boundary..ways };
            return Window::Ways { bounds, skip: 0 };
        }
        Window::Ways { bounds: 0..ways, skip: 0 }
    }

    /// Looks for `owner`'s line in one cache, noting the first free way it may use
    pub(crate) fn probe(&mut self, owner: TenantId, cache: usize, address: u64, enclave: bool, allocate: bool) -> Option<Probe> {
        let (set, tag) = self.locate(owner, cache, address, enclave, allocate)?;
        let window = self.window(owner, cache, set, enclave);
        let lines = self.caches[cache].set(set);
        let mut probe = Probe { set, tag, hit: None, free: None };
        match window {
            Window::Direct(way) => {
                let line = &lines[way];
                if line.matches(owner, tag, enclave) {
                    probe.hit = Some(way);
                } else if !line.valid {
                    probe.free = Some(way);
                }
            }
            Window::Ways { bounds, skip } => {
                for way in bounds {
                    if skip & (1u64 << way) != 0 {
                        continue;
                    }
                    let line = &lines[way];
                    if !line.valid && probe.free.is_none() {
                        probe.free = Some(way);
                    }
                    if line.matches(owner, tag, enclave) {
                        probe.hit = Some(way);
                        break;
                    }
                }
            }
        }
        Some(probe)
    }

    /// Picks the way to replace in a full window, per the level's replacement policy
    pub(crate) fn choose_victim(&mut self, owner: TenantId, cache: usize, set: usize, enclave: bool) -> usize {
        let (bounds, skip) = match self.window(owner, cache, set, enclave) {
            Window::Direct(way) => return way,
            Window::Ways { bounds, skip } => (bounds, skip),
        };
        let config = self.caches[cache].config;
        let params = self.params[config];
        let cachelet = params.use_cachelet.then(|| CacheletView {
            assoc: self.system.cachelet_assoc,
            group_start: bounds.start,
            occupied: skip,
        });

        let (lines, tree) = self.caches[cache].set_and_tree(set);
        let search = VictimSearch { enclave, bounds, cachelet, lines };
        let victim = select_victim(params.policy, &search, tree, &mut self.rng);
        let evicted_enclave = lines[victim.way].enclave;
        if let Some(event) = victim.counted_as {
            self.record(Sink::Cache(cache), event, evicted_enclave);
        }
        victim.way
    }

    /// Writes a line into an empty way and marks it most recently used
    pub(crate) fn set_line(&mut self, owner: TenantId, request: &Access, cache: usize, set: usize, way: usize, tag: u64) {
        let config = self.caches[cache].config;
        let uses_tree = self.params[config].policy.uses_tree();
        let base = self.partition_base(owner, config, request.enclave);
        let line = self.caches[cache].line_mut(set, way);
        assert!(!line.valid, "installing over a valid line in set {set}, way {way}");
        *line = CacheLine {
            valid: true,
            owner,
            tag,
            dirty: request.op == Operation::Store,
            enclave: request.enclave,
            base,
        };
        if uses_tree {
            self.caches[cache].touch(set, way);
        }
    }

    /// Total valid lines per cache instance
    pub fn valid_lines(&self) -> Vec<usize> {
        self.caches.iter().map(|c| c.valid_lines()).collect()
    }

    /// Snapshot of every counter, skipping events that never happened
    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            accesses: self.accesses,
            global: self.counters.report(),
            caches: self
                .caches
                .iter()
                .map(|c| CacheReport {
                    name: c.name.clone(),
                    core: c.core,
                    counters: c.counters.report(),
                })
                .collect(),
            tenants: self
                .tenants
                .iter()
                .map(|t| TenantReport {
                    id: t.id,
                    core: t.core,
                    counters: t.counters.report(),
                })
                .collect(),
        }
    }
}
