mod enclave;
mod partition;
mod trace;

use crate::config::SimConfig;
use crate::hierarchy::{Access, Operation, Simulation};

pub(crate) fn simulation(json: &str) -> Simulation {
    let config = SimConfig::from_json(json).unwrap();
    Simulation::new(&config).unwrap()
}

pub(crate) fn access(owner: usize, address: u64, op: Operation, enclave: bool) -> Access {
    Access {
        owner,
        enclave,
        address,
        op,
        timestamp: 0.0,
    }
}

pub(crate) fn load(owner: usize, address: u64) -> Access {
    access(owner, address, Operation::Load, false)
}

pub(crate) fn enclave_load(owner: usize, address: u64) -> Access {
    access(owner, address, Operation::Load, true)
}
