use crate::plru::PlruTree;
use crate::stats::Counters;

/// One line of a set
///
/// Lines are only changed by installs and evictions, a line is never written while valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheLine {
    pub valid: bool,
    pub owner: usize,
    pub tag: u64,
    pub dirty: bool,
    pub enclave: bool,
    /// First set of the partition the line was decoded against, 0 outside enclave partitions
    pub base: usize,
}

impl CacheLine {
    /// Whether this line holds `tag` for the given owner and mode
    pub fn matches(&self, owner: usize, tag: u64, enclave: bool) -> bool {
        self.valid && self.tag == tag && self.owner == owner && self.enclave == enclave
    }
}

/// One instance of a configured cache
///
/// Private configurations get one instance per core, shared configurations a single instance.
/// Lines are stored flat, set after set, with a PLRU tree per set
#[derive(Debug)]
pub struct Cache {
    /// The configuration this is an instance of
    pub config: usize,
    /// The owning core, `None` for shared caches
    pub core: Option<usize>,
    pub name: String,
    ways: usize,
    lines: Vec<CacheLine>,
    plru: Vec<PlruTree>,
    pub counters: Counters,
}

impl Cache {
    pub fn new(config: usize, core: Option<usize>, name: String, sets: usize, ways: usize) -> Self {
        Self {
            config,
            core,
            name,
            ways,
            lines: vec![CacheLine::default(); sets * ways],
            plru: vec![PlruTree::new(ways); sets],
            counters: Counters::default(),
        }
    }

    pub fn sets(&self) -> usize {
        self.plru.len()
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    pub fn set(&self, set: usize) -> &[CacheLine] {
        &self.lines[set * self.ways..(set + 1) * self.ways]
    }

    pub fn line(&self, set: usize, way: usize) -> &CacheLine {
        &self.lines[set * self.ways + way]
    }

    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut CacheLine {
        &mut self.lines[set * self.ways + way]
    }

    /// The lines of a set together with its PLRU tree, for replacement decisions
    pub(crate) fn set_and_tree(&mut self, set: usize) -> (&[CacheLine], &mut PlruTree) {
        (&self.lines[set * self.ways..(set + 1) * self.ways], &mut self.plru[set])
    }

    pub fn touch(&mut self, set: usize, way: usize) {
        self.plru[set].touch(way);
    }

    /// Number of valid lines in the cache. Useful for analysing occupancy or debugging
    pub fn valid_lines(&self) -> usize {
        self.lines.iter().filter(|line| line.valid).count()
    }

    /// Number of valid lines in one set
    pub fn valid_in_set(&self, set: usize) -> usize {
        self.set(set).iter().filter(|line| line.valid).count()
    }
}
