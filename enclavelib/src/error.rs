use thiserror::Error;

/// Errors detected while turning a configuration into a hierarchy. None of these are recoverable,
/// the simulation must not start with undefined geometry
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't parse the configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("the configuration doesn't contain any caches")]
    NoCaches,

    #[error("the system must have at least one core")]
    NoCores,

    #[error("cache {cache}: geometry yields zero sets (size_kb={size_kb}, size_b={size_b}, ways={ways}, line_size={line_size})")]
    ZeroSets {
        cache: String,
        size_kb: u64,
        size_b: u64,
        ways: usize,
        line_size: u64,
    },

    #[error("cache {cache}: {parameter} must be a power of two, got {value}")]
    NotPowerOfTwo {
        cache: String,
        parameter: &'static str,
        value: u64,
    },

    #[error("cache {cache}: {ways} ways is more than the 64 a way bitmap can track")]
    TooManyWays { cache: String, ways: usize },

    #[error("cache {cache}: {parameter} is invalid: {reason}")]
    InvalidParameter {
        cache: String,
        parameter: &'static str,
        reason: String,
    },

    #[error("system parameter {parameter} is invalid: {reason}")]
    InvalidSystem {
        parameter: &'static str,
        reason: String,
    },

    #[error("level {level} ({scope}) must be one unified cache or an insn + data pair")]
    InvalidLevel { level: u32, scope: &'static str },

    #[error("cache {cache}: cannot statically allocate {requested} cachelets, capacity is {capacity}")]
    StaticCachelets {
        cache: String,
        requested: usize,
        capacity: usize,
    },

    #[error("core {core} does not exist, the system has {cores} cores")]
    UnknownCore { core: usize, cores: usize },

    #[error("dynamic cachelets are only supported for single tenant workloads")]
    DynamicMultiTenant,
}

/// Errors raised while reading a trace
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("line {line}: trace is not valid UTF-8")]
    Encoding { line: usize },

    #[error("line {line}: couldn't parse trace record {text:?}")]
    Malformed { line: usize, text: String },

    #[error("line {line}: timestamp {timestamp} is earlier than the previous access ({previous})")]
    OutOfOrder {
        line: usize,
        timestamp: f64,
        previous: f64,
    },

    #[error("line {line}: couldn't register tenant {owner}: {source}")]
    Tenant {
        line: usize,
        owner: usize,
        #[source]
        source: ConfigError,
    },
}
