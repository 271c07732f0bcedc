// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pure Validation Functions - Topology Invariants
//!
//! Checks a built topology must pass before it is handed out. The builder
//! already refuses inputs that would break these; running them again over
//! the finished graph catches regressions in how components compose.
//!
//! # Invariant Categories
//!
//! 1. **Network**: disjoint subnets inside the base block, every tier in
//!    every zone, isolated subnets without outbound routes
//! 2. **Database**: private, encrypted, isolated placement
//! 3. **Access**: TLS-only proxy, single-secret read policy
//! 4. **Ordering**: every dependency created before its dependents
//!
//! All functions are pure: no I/O, no mutation, deterministic.

use std::collections::HashSet;

use crate::domain::{CredentialRef, ResourceId};
use crate::provision::database::DatabaseCluster;
use crate::provision::network::{NetworkTopology, SubnetTier};
use crate::provision::policy::AccessPolicy;
use crate::provision::proxy::ConnectionProxy;
use crate::topology::registry::ResourceRegistry;

pub type ValidationResult = Result<(), ValidationError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Subnets {0} and {1} overlap")]
    OverlappingSubnets(ResourceId, ResourceId),

    #[error("Subnet {0} lies outside the network block")]
    SubnetOutsideBlock(ResourceId),

    #[error("Tier {tier} has no subnet in zone {zone}")]
    MissingTierInZone { tier: String, zone: String },

    #[error("Isolated subnet {0} has an outbound route")]
    IsolatedSubnetRoute(ResourceId),

    #[error("Database cluster {0} is publicly accessible")]
    PublicDatabase(String),

    #[error("Database cluster {0} storage is not encrypted")]
    UnencryptedDatabase(String),

    #[error("Database subnet {0} is not isolated")]
    DatabaseOutsideIsolatedTier(ResourceId),

    #[error("Proxy {0} accepts plaintext connections")]
    PlaintextProxy(String),

    #[error("Policy {0} grants more than reading one secret")]
    PolicyScope(ResourceId),

    #[error("{resource} is created before its dependency {dependency}")]
    CreationOrder {
        resource: ResourceId,
        dependency: ResourceId,
    },
}

/// Subnets are disjoint, inside the base block, and cover every tier in every zone
///
/// # Rules
/// - No two subnets overlap
/// - Every subnet lies inside the network CIDR
/// - Each tier present anywhere is present in every zone
/// - Isolated subnets carry no routes
pub fn validate_network(network: &NetworkTopology) -> ValidationResult {
    for (i, a) in network.subnets.iter().enumerate() {
        if !network.cidr.contains(&a.cidr) {
            return Err(ValidationError::SubnetOutsideBlock(a.id.clone()));
        }
        if let Some(b) = network.subnets[i + 1..].iter().find(|b| a.cidr.overlaps(&b.cidr)) {
            return Err(ValidationError::OverlappingSubnets(a.id.clone(), b.id.clone()));
        }
        if a.tier == SubnetTier::PrivateIsolated && a.has_outbound_route() {
            return Err(ValidationError::IsolatedSubnetRoute(a.id.clone()));
        }
    }

    let tiers: HashSet<SubnetTier> = network.subnets.iter().map(|s| s.tier).collect();
    for tier in tiers {
        for zone in &network.zones {
            if !network
                .subnets
                .iter()
                .any(|s| s.tier == tier && &s.zone == zone)
            {
                return Err(ValidationError::MissingTierInZone {
                    tier: tier.to_string(),
                    zone: zone.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Cluster is private, encrypted, and placed in isolated subnets only
pub fn validate_cluster(cluster: &DatabaseCluster, network: &NetworkTopology) -> ValidationResult {
    if cluster.publicly_accessible() {
        return Err(ValidationError::PublicDatabase(cluster.identifier().to_string()));
    }
    if !cluster.storage_encrypted() {
        return Err(ValidationError::UnencryptedDatabase(
            cluster.identifier().to_string(),
        ));
    }
    match cluster
        .subnet_group()
        .subnets
        .iter()
        .find(|id| network.subnet(id).map(|s| s.tier) != Some(SubnetTier::PrivateIsolated))
    {
        Some(id) => Err(ValidationError::DatabaseOutsideIsolatedTier(id.clone())),
        None => Ok(()),
    }
}

pub fn validate_proxy(proxy: &ConnectionProxy) -> ValidationResult {
    if !proxy.require_tls() {
        return Err(ValidationError::PlaintextProxy(proxy.name().to_string()));
    }
    Ok(())
}

/// Policy reads exactly the given secret and nothing else
pub fn validate_policy_scope(policy: &AccessPolicy, secret: &CredentialRef) -> ValidationResult {
    match policy.single_secret_read() {
        Some(arn) if arn == secret.arn() => Ok(()),
        _ => Err(ValidationError::PolicyScope(policy.id().clone())),
    }
}

/// Every dependency appears earlier in creation order
pub fn validate_creation_order(registry: &ResourceRegistry) -> ValidationResult {
    let mut created: HashSet<&ResourceId> = HashSet::new();
    for node in registry.nodes() {
        if let Some(dependency) = node.depends_on.iter().find(|d| !created.contains(d)) {
            return Err(ValidationError::CreationOrder {
                resource: node.id.clone(),
                dependency: dependency.clone(),
            });
        }
        created.insert(&node.id);
    }
    Ok(())
}
