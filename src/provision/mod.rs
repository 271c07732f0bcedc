// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology components
//!
//! Each component turns plain inputs into resource descriptions and reports
//! every inconsistency as an error before anything is registered. Components
//! reference one another only through [`ResourceId`](crate::domain::ResourceId),
//! [`GroupId`](crate::domain::GroupId) and
//! [`CredentialRef`](crate::domain::CredentialRef).
//!
//! Dependency order, leaf first:
//!
//! ```text
//! network ─▶ security ─▶ vault ─▶ database ─▶ proxy
//!                                     └──────▶ rotation
//!                          vault ─▶ policy ─▶ bastion
//! ```

pub mod bastion;
pub mod database;
pub mod network;
pub mod policy;
pub mod proxy;
pub mod rotation;
pub mod security;
pub mod vault;

pub use bastion::{BastionHost, BastionProvisioner};
pub use database::{
    ClusterChange, ClusterUpdate, DatabaseCluster, DatabaseContext, DatabaseProvisioner,
    DatabaseSpec, InstanceClassCatalog,
};
pub use network::{NetworkAllocator, NetworkSpec, NetworkTopology, SubnetTier, TierSpec};
pub use policy::{AccessPolicy, AccessPolicyIssuer, Role};
pub use proxy::{ConnectionProxy, ProxyContext, ProxyEndpoint};
pub use rotation::{RotationSchedule, RotationScheduler, RotationTarget, TargetError};
pub use security::{DatabaseAccessGroups, SecurityPosture, SecurityRuleGraph};
pub use vault::{CredentialVault, PasswordPolicy, SecretValue};
