use std::io::Read;
use serde::Deserialize;
use tracing::debug;
use crate::address::Geometry;
use crate::error::ConfigError;
use crate::replacement_policies::ReplacementPolicy;

/// A full simulation configuration: system-wide parameters and every cache in the hierarchy
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub system: SystemConfig,
    pub caches: Vec<CacheConfig>,
}

impl SimConfig {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Parameters shared by the whole simulated system
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub cores: usize,
    pub prefetch: PrefetchConfig,
    /// Ways per cachelet
    pub cachelet_assoc: usize,
    /// Misses per interval at or above which a tenant's cachelets double. 0 disables dynamic
    /// cachelets
    pub dyn_threshold: u64,
    /// Enclave accesses between upsize checkpoints
    pub dyn_rate: u64,
    /// Misses per interval at or below which a tenant's cachelets halve
    pub dyn_downsize_threshold: u64,
    /// Enclave accesses between downsize checkpoints
    pub dyn_downsize_rate: u64,
    /// Accesses processed before statistics start accumulating
    pub warmup: u64,
    /// Skip every non-enclave access in the trace
    pub ignore_non_enclave: bool,
    pub seed: Option<u64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            prefetch: PrefetchConfig::default(),
            cachelet_assoc: 0,
            dyn_threshold: 0,
            dyn_rate: 0,
            dyn_downsize_threshold: 0,
            dyn_downsize_rate: 0,
            warmup: 0,
            ignore_non_enclave: false,
            seed: None,
        }
    }
}

impl SystemConfig {
    pub fn dynamic_cachelets(&self) -> bool {
        self.dyn_threshold > 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 {
            return Err(ConfigError::NoCores);
        }
        if self.cachelet_assoc > 0 && !self.cachelet_assoc.is_power_of_two() {
            return Err(ConfigError::InvalidSystem {
                parameter: "cachelet_assoc",
                reason: format!("{} is not a power of two", self.cachelet_assoc),
            });
        }
        if self.dyn_threshold > 0 && self.dyn_rate == 0 {
            return Err(ConfigError::InvalidSystem {
                parameter: "dyn_rate",
                reason: "dynamic cachelets need a checkpoint rate".to_string(),
            });
        }
        if self.dyn_downsize_threshold > 0 && self.dyn_downsize_rate == 0 {
            return Err(ConfigError::InvalidSystem {
                parameter: "dyn_downsize_rate",
                reason: "downsizing needs a checkpoint rate".to_string(),
            });
        }
        Ok(())
    }
}

/// Prefetching on a last level miss - none, the next line, or the next two lines
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum PrefetchConfig {
    #[serde(alias = "none")]
    None,
    #[serde(alias = "next_line")]
    NextLine,
    #[serde(alias = "next_two_lines")]
    NextTwoLines,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig::None
    }
}

impl PrefetchConfig {
    /// How many following lines are brought in on a miss
    pub fn lines(self) -> u64 {
        match self {
            PrefetchConfig::None => 0,
            PrefetchConfig::NextLine => 1,
            PrefetchConfig::NextTwoLines => 2,
        }
    }
}

/// A configuration for a single cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    pub level: u32,
    pub kind: CacheKind,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub size_kb: u64,
    /// Size in bytes, used when `size_kb` yields no sets
    #[serde(default)]
    pub size_b: u64,
    pub line_size: u64,
    pub ways: usize,
    #[serde(default = "InclusionPolicyConfig::default")]
    pub inclusion: InclusionPolicyConfig,
    #[serde(default = "ReplacementPolicyConfig::default")]
    pub eviction: ReplacementPolicyConfig,
    #[serde(default = "default_sgx_plru_rate")]
    pub sgx_plru_rate: f32,
    /// Reserve `enclave_ways` ways for enclave lines
    #[serde(default)]
    pub partition: bool,
    /// Give each enclave a range of sets inside an enclave way
    #[serde(default)]
    pub set_partition: bool,
    /// Reserve every enclave way from the start instead of on demand
    #[serde(default)]
    pub static_partition: bool,
    #[serde(default)]
    pub use_cachelet: bool,
    /// Cachelets reserved before the simulation starts
    #[serde(default)]
    pub static_cachelets: usize,
    #[serde(default)]
    pub enclave_ways: usize,
    /// Partitions per enclave way
    #[serde(default)]
    pub max_partition: usize,
}

fn default_sgx_plru_rate() -> f32 {
    1.0
}

/// The kind of cache - instruction, data, or unified
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum CacheKind {
    #[serde(alias = "insn")]
    Insn,
    #[serde(alias = "data")]
    Data,
    #[serde(alias = "unified")]
    Unified,
}

/// Whether the cache must hold every line held by the levels below it. Defaults to non-inclusive
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum InclusionPolicyConfig {
    #[serde(alias = "non_inclusive", alias = "non-inclusive")]
    NonInclusive,
    #[serde(alias = "inclusive")]
    Inclusive,
}

impl Default for InclusionPolicyConfig {
    fn default() -> Self {
        InclusionPolicyConfig::NonInclusive
    }
}

/// The eviction policy - plru, random, or sgx_plru. Defaults to plru
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum ReplacementPolicyConfig {
    #[serde(alias = "plru")]
    Plru,
    #[serde(alias = "random", alias = "rand")]
    Random,
    #[serde(alias = "sgx_plru", alias = "sgx-plru")]
    SgxPlru,
}

impl Default for ReplacementPolicyConfig {
    fn default() -> Self {
        ReplacementPolicyConfig::Plru
    }
}

/// A validated cache configuration with its derived geometry
///
/// Everything in here is `Copy` so the engine can hold a level's parameters while it mutates the
/// level's state
#[derive(Debug, Clone, Copy)]
pub struct LevelParams {
    pub id: usize,
    pub level: u32,
    pub kind: CacheKind,
    pub shared: bool,
    pub inclusive: bool,
    pub policy: ReplacementPolicy,
    pub partition: bool,
    pub set_partition: bool,
    pub static_partition: bool,
    pub use_cachelet: bool,
    pub static_cachelets: usize,
    pub enclave_ways: usize,
    pub max_partition: usize,
    pub geometry: Geometry,
}

impl LevelParams {
    /// Enclave accesses to this level go straight to the tenant's enclave way instead of
    /// searching the set
    pub fn enclave_direct_mapped(&self, cachelet_assoc: usize) -> bool {
        (self.set_partition && !self.use_cachelet) || (self.use_cachelet && cachelet_assoc <= 1)
    }

    /// Ways handed out per enclave way allocation
    pub fn way_step(&self, cachelet_assoc: usize) -> usize {
        if self.use_cachelet {
            cachelet_assoc.max(1)
        } else {
            1
        }
    }
}

impl CacheConfig {
    fn invalid(&self, parameter: &'static str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidParameter {
            cache: self.name.clone(),
            parameter,
            reason: reason.into(),
        }
    }

    fn power_of_two(&self, parameter: &'static str, value: u64) -> Result<(), ConfigError> {
        if value == 0 || !value.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                cache: self.name.clone(),
                parameter,
                value,
            });
        }
        Ok(())
    }

    /// Number of sets, falling back to the byte size when the kilobyte size is too small
    fn sets(&self) -> Result<usize, ConfigError> {
        let set_bytes = self.ways as u64 * self.line_size;
        let mut sets = (self.size_kb * 1024) / set_bytes;
        if sets == 0 && self.size_b > 0 {
            debug!(cache = %self.name, size_b = self.size_b, "Measured cache size in bytes");
            sets = self.size_b / set_bytes;
        }
        if sets == 0 {
            return Err(ConfigError::ZeroSets {
                cache: self.name.clone(),
                size_kb: self.size_kb,
                size_b: self.size_b,
                ways: self.ways,
                line_size: self.line_size,
            });
        }
        self.power_of_two("sets", sets)?;
        Ok(sets as usize)
    }

    /// Validates this configuration and derives its geometry
    pub fn resolve(&self, id: usize, system: &SystemConfig) -> Result<LevelParams, ConfigError> {
        self.power_of_two("line_size", self.line_size)?;
        self.power_of_two("ways", self.ways as u64)?;
        if self.ways > u64::BITS as usize {
            return Err(ConfigError::TooManyWays {
                cache: self.name.clone(),
                ways: self.ways,
            });
        }
        let sets = self.sets()?;

        if self.partition && !self.static_partition && !self.set_partition {
            return Err(self.invalid("partition", "way partitioning needs static_partition or set_partition"));
        }
        if (self.partition || self.set_partition) && (self.enclave_ways == 0 || self.enclave_ways > self.ways) {
            return Err(self.invalid("enclave_ways", format!("must be between 1 and {}, got {}", self.ways, self.enclave_ways)));
        }
        if self.partition && self.enclave_ways == self.ways {
            return Err(self.invalid("enclave_ways", "way partitioning must leave at least one way for non-enclave lines"));
        }
        if self.set_partition {
            self.power_of_two("max_partition", self.max_partition as u64)?;
            if self.max_partition > sets {
                return Err(self.invalid("max_partition", format!("{} partitions don't fit in {sets} sets", self.max_partition)));
            }
        }
        if self.use_cachelet {
            if !self.set_partition {
                return Err(self.invalid("use_cachelet", "cachelets need set_partition"));
            }
            let assoc = system.cachelet_assoc;
            if assoc == 0 || assoc > self.ways {
                return Err(self.invalid("use_cachelet", format!("cachelet_assoc must be between 1 and {}, got {assoc}", self.ways)));
            }
            if self.enclave_ways % assoc != 0 {
                return Err(self.invalid("enclave_ways", format!("{} is not a multiple of the cachelet associativity {assoc}", self.enclave_ways)));
            }
            let capacity = self.enclave_ways / assoc * self.max_partition;
            if self.static_cachelets > capacity {
                return Err(ConfigError::StaticCachelets {
                    cache: self.name.clone(),
                    requested: self.static_cachelets,
                    capacity,
                });
            }
        } else if self.static_cachelets > 0 {
            return Err(self.invalid("static_cachelets", "static cachelets need use_cachelet"));
        }

        let policy = match self.eviction {
            ReplacementPolicyConfig::Plru => ReplacementPolicy::Plru,
            ReplacementPolicyConfig::Random => ReplacementPolicy::Random,
            ReplacementPolicyConfig::SgxPlru => {
                if !(0.0..=1.0).contains(&self.sgx_plru_rate) {
                    return Err(self.invalid("sgx_plru_rate", format!("{} is not a probability", self.sgx_plru_rate)));
                }
                ReplacementPolicy::SgxPlru { rate: self.sgx_plru_rate }
            }
        };

        Ok(LevelParams {
            id,
            level: self.level,
            kind: self.kind,
            shared: self.shared,
            inclusive: self.inclusion == InclusionPolicyConfig::Inclusive,
            policy,
            partition: self.partition,
            set_partition: self.set_partition,
            static_partition: self.static_partition,
            use_cachelet: self.use_cachelet,
            static_cachelets: self.static_cachelets,
            enclave_ways: self.enclave_ways,
            max_partition: self.max_partition,
            geometry: Geometry::new(sets, self.ways, self.line_size),
        })
    }
}
