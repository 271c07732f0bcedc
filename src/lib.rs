// Copyright (c) 2025 - Cowboy AI, Inc.
//! Secure network and managed-database topology provisioning
//!
//! Builds, from a handful of environment parameters, a complete description
//! of a private database deployment: a multi-zone network, the security
//! rules between its tiers, an administrator secret with scheduled rotation,
//! a clustered PostgreSQL-compatible database, a TLS-only connection proxy,
//! a bastion host, and the least-privilege policy that lets clients read the
//! secret.
//!
//! ```no_run
//! use cim_topology::{TopologyBuilder, TopologyConfig};
//!
//! # fn main() -> cim_topology::TopologyResult<()> {
//! let topology = TopologyBuilder::new(TopologyConfig::from_env()?).build()?;
//! println!("{}", topology.outputs().proxy_endpoint);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod errors;
pub mod provision;
pub mod state_machine;
pub mod topology;

// Re-export commonly used types
pub use config::{BuildInputs, TopologyConfig};
pub use errors::{
    AllocationError, PolicyError, ProvisioningError, RotationError, TopologyError, TopologyResult,
};
pub use topology::{ApplicationOutputs, LiveTopology, Topology, TopologyBuilder};
