// Copyright (c) 2025 - Cowboy AI, Inc.
//! Connection Proxy
//!
//! A pooled, TLS-only front for the database cluster. Downstream compute only
//! ever learns the [`ProxyEndpoint`]; instance churn behind the proxy never
//! changes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::domain::{CredentialRef, GroupId, Port, ResourceId};
use crate::errors::{ProvisioningError, TopologyError, TopologyResult};
use crate::provision::database::DatabaseCluster;
use crate::provision::network::{NetworkTopology, SubnetTier};
use crate::provision::security::SecurityRuleGraph;

/// DNS-stable address of the proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: Port,
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where and how the proxy is stood up
#[derive(Debug, Clone, Copy)]
pub struct ProxyContext<'a> {
    pub env_name: &'a str,
    pub region: &'a str,
    pub network: &'a NetworkTopology,
    pub graph: &'a SecurityRuleGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProxy {
    id: ResourceId,
    name: String,
    target: ResourceId,
    endpoint: ProxyEndpoint,
    require_tls: bool,
    debug_logging: bool,
    security_group: GroupId,
    subnets: Vec<ResourceId>,
    secrets: Vec<CredentialRef>,
}

impl ConnectionProxy {
    /// Front `cluster` with a proxy bound to `security_group`
    ///
    /// # Errors
    /// - `security_group` unknown to the rule graph
    /// - The proxy group has no ingress grant on the cluster's group
    /// - The network has no private-with-egress subnets
    pub fn front(
        cluster: &DatabaseCluster,
        security_group: GroupId,
        ctx: ProxyContext<'_>,
    ) -> Result<Self, ProvisioningError> {
        if !ctx.graph.contains(&security_group) {
            return Err(ProvisioningError::UnknownSecurityGroup(
                security_group.to_string(),
            ));
        }
        if !ctx
            .graph
            .can_reach(&security_group, cluster.security_group(), cluster.port())
        {
            return Err(ProvisioningError::ClosureViolation(format!(
                "proxy group {} cannot reach {} on port {}",
                security_group,
                cluster.security_group(),
                cluster.port()
            )));
        }

        let mut zones: Vec<&str> = Vec::new();
        let mut subnets = Vec::new();
        for subnet in ctx.network.subnets_in(SubnetTier::PrivateWithEgress) {
            if !zones.contains(&subnet.zone.as_str()) {
                zones.push(&subnet.zone);
                subnets.push(subnet.id.clone());
            }
        }
        if subnets.is_empty() {
            return Err(ProvisioningError::MissingTier(
                SubnetTier::PrivateWithEgress.to_string(),
            ));
        }

        let name = format!("{}-db-proxy", ctx.env_name);
        let endpoint = ProxyEndpoint {
            host: format!("{}.proxy.{}.rds.amazonaws.com", name, ctx.region),
            port: cluster.port(),
        };
        info!("Proxy {} fronts cluster {} at {}", name, cluster.identifier(), endpoint);

        Ok(Self {
            id: ResourceId::from_static("RdsProxy"),
            name,
            target: cluster.id().clone(),
            endpoint,
            require_tls: true,
            debug_logging: true,
            security_group,
            subnets,
            secrets: vec![cluster.credential().clone()],
        })
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cluster behind the proxy
    pub fn target(&self) -> &ResourceId {
        &self.target
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn require_tls(&self) -> bool {
        self.require_tls
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    pub fn security_group(&self) -> &GroupId {
        &self.security_group
    }

    pub fn subnets(&self) -> &[ResourceId] {
        &self.subnets
    }

    pub fn secrets(&self) -> &[CredentialRef] {
        &self.secrets
    }

    /// Admit or refuse a client connection from `from`
    ///
    /// Accepted only over TLS and only from groups granted ingress on the
    /// proxy's group at the endpoint port.
    pub fn connect(
        &self,
        graph: &SecurityRuleGraph,
        from: &GroupId,
        tls: bool,
    ) -> TopologyResult<&ProxyEndpoint> {
        if self.require_tls && !tls {
            warn!("Refused plaintext connection from {} to {}", from, self.name);
            return Err(TopologyError::ConnectionRejected(format!(
                "{} requires TLS",
                self.name
            )));
        }
        if !graph.can_reach(from, &self.security_group, self.endpoint.port) {
            warn!("Refused connection from ungranted group {} to {}", from, self.name);
            return Err(TopologyError::ConnectionRejected(format!(
                "group {} has no ingress on {}",
                from, self.security_group
            )));
        }

        debug!("Accepted connection from {} to {}", from, self.endpoint);
        Ok(&self.endpoint)
    }
}
