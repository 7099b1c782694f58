use std::time::{Duration, Instant};
use tracing::debug;
use crate::config::SimConfig;
use crate::error::{ConfigError, TraceError};
use crate::hierarchy::{Access, Simulation};
use crate::partition::TenantId;
use crate::stats::SimulationReport;
use crate::trace::records;

/// The simulator feeds an already merged trace into the hierarchy, registering tenants as they
/// first appear, and collects the results
///
/// It supports calling simulate multiple times, and will update the time taken to simulate and the
/// results accordingly
pub struct Simulator {
    simulation: Simulation,
    simulation_time: Duration,
    last_timestamp: Option<f64>,
}

impl Simulator {
    /// Creates a new simulator for a given configuration
    ///
    /// # Arguments
    ///
    /// * `config`: A simulation configuration, usually resulting from parsing JSON
    ///
    /// returns: Result<Simulator, ConfigError>
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            simulation: Simulation::new(config)?,
            simulation_time: Duration::new(0, 0),
            last_timestamp: None,
        })
    }

    /// Registers every tenant up to and including `owner`, owner `n` running on core `n % cores`
    fn ensure_tenant(&mut self, owner: TenantId) -> Result<(), ConfigError> {
        let cores = self.simulation.cores().len();
        while self.simulation.tenants().len() <= owner {
            let id = self.simulation.tenants().len();
            self.simulation.add_tenant(id % cores)?;
            debug!(tenant = id, core = id % cores, "Registered tenant");
        }
        Ok(())
    }

    /// Replays a single access
    ///
    /// # Arguments
    ///
    /// * `access`: The access, whose timestamp must not be earlier than the previous one
    /// * `line`: Where the access came from, for errors
    ///
    /// returns: Result<(), TraceError>
    pub fn step(&mut self, access: &Access, line: usize) -> Result<(), TraceError> {
        if let Some(previous) = self.last_timestamp {
            if access.timestamp < previous {
                return Err(TraceError::OutOfOrder {
                    line,
                    timestamp: access.timestamp,
                    previous,
                });
            }
        }
        self.last_timestamp = Some(access.timestamp);
        if self.simulation.system.ignore_non_enclave && !access.enclave {
            self.simulation.accesses += 1;
            return Ok(());
        }
        self.ensure_tenant(access.owner).map_err(|source| TraceError::Tenant {
            line,
            owner: access.owner,
            source,
        })?;
        self.simulation.access(access.owner, access);
        Ok(())
    }

    /// Simulates the hierarchy on a whole trace held in memory
    ///
    /// Reads from the byte array are sequential, so a memory mapped file can be advised as such
    ///
    /// # Arguments
    ///
    /// * `bytes`: The trace, one record per line
    ///
    /// returns: Result<SimulationReport, TraceError>
    pub fn simulate(&mut self, bytes: &[u8]) -> Result<SimulationReport, TraceError> {
        let start = Instant::now();
        let result = records(bytes).try_for_each(|record| {
            let (line, access) = record?;
            self.step(&access, line)
        });
        self.simulation_time += Instant::now() - start;
        result?;
        Ok(self.simulation.report())
    }

    /// Releases a tenant's enclave partitions once it has finished running
    pub fn finish_tenant(&mut self, owner: TenantId) {
        if owner < self.simulation.tenants().len() {
            self.simulation.free_partition(owner, true);
        }
    }

    /// Gets the wall-clock execution time for processing
    pub fn get_execution_time(&self) -> &Duration {
        &self.simulation_time
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Gets the number of valid lines for each cache instance
    pub fn get_valid_line_counts(&self) -> Vec<(String, Option<usize>, usize)> {
        self.simulation
            .caches()
            .iter()
            .map(|c| (c.name.clone(), c.core, c.valid_lines()))
            .collect()
    }
}
