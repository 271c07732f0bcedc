// Copyright (c) 2025 - Cowboy AI, Inc.
//! Built topologies
//!
//! A [`Topology`] is the immutable result of one [`TopologyBuilder`] run: the
//! network, security graph, secret, cluster, proxy, rotation schedule,
//! policy, and bastion, together with the resource graph that orders them.
//!
//! ```text
//! Vpc ─┬─ subnets ─┬─ SubnetGroup ── DbCluster ── RdsProxy
//!      │           └─ DbClient (bastion)
//!      └─ security groups ── DbSg ── DbCluster
//! DbAdminSecret ── DbCluster, RdsProxy, rotation, GetSecretValueIamPolicy
//! ```

pub mod builder;
pub mod invariants;
pub mod registry;
pub mod teardown;

pub use builder::TopologyBuilder;
pub use registry::{ResourceNode, ResourceRegistry};
pub use teardown::LiveTopology;

use serde::Serialize;
use std::sync::Arc;

use crate::domain::{CredentialRef, EnvironmentProfile, GroupId, ResourceId};
use crate::provision::bastion::BastionHost;
use crate::provision::database::DatabaseCluster;
use crate::provision::network::NetworkTopology;
use crate::provision::policy::{AccessPolicy, Role};
use crate::provision::proxy::{ConnectionProxy, ProxyEndpoint};
use crate::provision::rotation::{RotationSchedule, RotationScheduler};
use crate::provision::security::{DatabaseAccessGroups, SecurityRuleGraph};
use crate::provision::vault::CredentialVault;

/// What a downstream application needs to reach the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationOutputs {
    pub env_name: String,
    pub proxy_endpoint: ProxyEndpoint,
    pub credential: CredentialRef,
    pub db_client_group: GroupId,
    pub access_policy: ResourceId,
    pub compute_role: ResourceId,
}

impl ApplicationOutputs {
    /// Environment handed to application compute
    pub fn environment_variables(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PG_HOST", self.proxy_endpoint.host.clone()),
            ("SECRET_ID", self.credential.arn().to_string()),
            ("ENV_NAME", self.env_name.clone()),
        ]
    }
}

/// Immutable, fully validated topology
#[derive(Debug, Serialize)]
pub struct Topology {
    profile: EnvironmentProfile,
    env_name: String,
    region: String,
    network: NetworkTopology,
    security: SecurityRuleGraph,
    access_groups: DatabaseAccessGroups,
    credential: CredentialRef,
    cluster: DatabaseCluster,
    proxy: ConnectionProxy,
    rotation: RotationSchedule,
    access_policy: AccessPolicy,
    bastion: BastionHost,
    application_role: Role,
    #[serde(skip)]
    registry: ResourceRegistry,
    #[serde(skip)]
    vault: Arc<CredentialVault>,
    #[serde(skip)]
    scheduler: Arc<RotationScheduler>,
}

impl Topology {
    pub fn profile(&self) -> EnvironmentProfile {
        self.profile
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn network(&self) -> &NetworkTopology {
        &self.network
    }

    pub fn security(&self) -> &SecurityRuleGraph {
        &self.security
    }

    pub fn access_groups(&self) -> &DatabaseAccessGroups {
        &self.access_groups
    }

    /// Reference to the administrator secret; never its value
    pub fn credential(&self) -> &CredentialRef {
        &self.credential
    }

    pub fn cluster(&self) -> &DatabaseCluster {
        &self.cluster
    }

    pub fn proxy(&self) -> &ConnectionProxy {
        &self.proxy
    }

    pub fn rotation(&self) -> &RotationSchedule {
        &self.rotation
    }

    pub fn access_policy(&self) -> &AccessPolicy {
        &self.access_policy
    }

    pub fn bastion(&self) -> &BastionHost {
        &self.bastion
    }

    pub fn application_role(&self) -> &Role {
        &self.application_role
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    /// Scheduler holding this topology's rotation; share it to drive rotations
    pub fn scheduler(&self) -> &Arc<RotationScheduler> {
        &self.scheduler
    }

    pub fn creation_order(&self) -> Vec<ResourceId> {
        self.registry.creation_order()
    }

    pub fn teardown_order(&self) -> Vec<ResourceId> {
        self.registry.teardown_order()
    }

    pub fn to_graph(&self) -> serde_json::Value {
        self.registry.to_graph()
    }

    /// Fresh lifecycle tracker with every resource planned
    pub fn live(&self) -> LiveTopology {
        LiveTopology::plan(&self.registry)
    }

    pub fn outputs(&self) -> ApplicationOutputs {
        ApplicationOutputs {
            env_name: self.env_name.clone(),
            proxy_endpoint: self.proxy.endpoint().clone(),
            credential: self.credential.clone(),
            db_client_group: self.access_groups.db_client.clone(),
            access_policy: self.access_policy.id().clone(),
            compute_role: self.application_role.id.clone(),
        }
    }
}
