//! # EnclaveLib
//!
//! EnclaveLib is a library for trace driven simulation of multi-level cache hierarchies shared by
//! secure enclaves
//!
//! It models per-core private caches in front of shared ones, PLRU based replacement (including
//! an enclave biased and a cachelet aware variant), enclave set partitioning through Set
//! Allocation Tables, dynamically resized cachelets, and inclusive caches kept inclusive across
//! cores. A simulator replays traces against a configured hierarchy and reports the counters

/// Splitting addresses into set and tag, for whole caches and for enclave partitions
pub mod address;

/// Cache lines and cache instances
pub mod cache;

/// Contains definitions for the JSON input format, and the validated per level parameters
pub mod config;

/// Enclave partition bookkeeping on the simulation
mod enclave;

/// Configuration and trace errors
pub mod error;

/// The simulation context and the hierarchy walker
pub mod hierarchy;

/// Mirroring evictions and installs to keep inclusive caches inclusive
mod inclusion;

/// Loading trace files
pub mod io;

/// Set Allocation Tables, the offset table and cachelet way bitmaps
pub mod partition;

/// The tree pseudo-LRU used for ways and for SAT slots
pub mod plru;

/// Contains the provided replacement policies
pub mod replacement_policies;

/// Contains the simulator used to replay a trace against a configured hierarchy
pub mod simulator;

/// Event counters and reports
pub mod stats;

/// Parsing trace records
pub mod trace;

#[cfg(test)]
mod test;
