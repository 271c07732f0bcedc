// Copyright (c) 2025 - Cowboy AI, Inc.
//! Security Rule Graph
//!
//! Named security groups and directed allow-rules between them. A rule on
//! group `to` admits traffic from group `from` on one port. Peers are always
//! group identities; there is no allow-by-CIDR peer, so a rule stays valid
//! when the instances behind a group are replaced.
//!
//! The database access closure for this topology is:
//!
//! ```text
//! db-client ──5432──▶ rds-proxy ──5432──▶ database
//!     └──────────────5432────────────────▶ database
//! rotation-identity ──5432──────────────▶ database
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::domain::{GroupId, Port, Protocol, ResourceId};
use crate::errors::ProvisioningError;

/// Ingress permission held by the receiving group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub source: GroupId,
    pub port: Port,
    pub protocol: Protocol,
    pub description: String,
}

/// A named, referenceable set of ingress rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub vpc: ResourceId,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

/// Directed edge of the rule graph, used for closure comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleEdge {
    pub from: GroupId,
    pub to: GroupId,
    pub port: Port,
    pub protocol: Protocol,
}

impl RuleEdge {
    pub fn tcp(from: &GroupId, to: &GroupId, port: Port) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            port,
            protocol: Protocol::Tcp,
        }
    }
}

/// Security groups of one network and the rules between them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRuleGraph {
    vpc: ResourceId,
    groups: Vec<SecurityGroup>,
}

impl SecurityRuleGraph {
    pub fn new(vpc: ResourceId) -> Self {
        Self {
            vpc,
            groups: Vec::new(),
        }
    }

    /// Create an empty group
    pub fn create_group(
        &mut self,
        id: GroupId,
        name: impl Into<String>,
        description: impl Into<String>,
        allow_all_outbound: bool,
    ) -> Result<GroupId, ProvisioningError> {
        if self.group(&id).is_some() {
            return Err(ProvisioningError::DuplicateSecurityGroup(id.to_string()));
        }

        let name = name.into();
        info!("Created security group {} ({})", id, name);
        self.groups.push(SecurityGroup {
            id: id.clone(),
            name,
            description: description.into(),
            vpc: self.vpc.clone(),
            allow_all_outbound,
            ingress: Vec::new(),
        });
        Ok(id)
    }

    /// Append an ingress rule on `to` admitting `from` over TCP
    ///
    /// # Errors
    /// - Either group unknown
    /// - `from == to`
    /// - The same rule already exists
    pub fn allow(
        &mut self,
        from: &GroupId,
        to: &GroupId,
        port: Port,
        description: impl Into<String>,
    ) -> Result<(), ProvisioningError> {
        if from == to {
            return Err(ProvisioningError::SelfReferencingRule(from.to_string()));
        }
        if self.group(from).is_none() {
            return Err(ProvisioningError::UnknownSecurityGroup(from.to_string()));
        }

        let target = self
            .groups
            .iter_mut()
            .find(|g| &g.id == to)
            .ok_or_else(|| ProvisioningError::UnknownSecurityGroup(to.to_string()))?;

        if target
            .ingress
            .iter()
            .any(|r| &r.source == from && r.port == port && r.protocol == Protocol::Tcp)
        {
            return Err(ProvisioningError::DuplicateRule {
                from: from.to_string(),
                to: to.to_string(),
                port: port.value(),
            });
        }

        debug!("Allow {} -> {} on tcp/{}", from, to, port);
        target.ingress.push(IngressRule {
            source: from.clone(),
            port,
            protocol: Protocol::Tcp,
            description: description.into(),
        });
        Ok(())
    }

    pub fn group(&self, id: &GroupId) -> Option<&SecurityGroup> {
        self.groups.iter().find(|g| &g.id == id)
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.group(id).is_some()
    }

    /// Groups in creation order
    pub fn groups(&self) -> &[SecurityGroup] {
        &self.groups
    }

    pub fn vpc(&self) -> &ResourceId {
        &self.vpc
    }

    /// Every rule as a directed edge
    pub fn rules(&self) -> Vec<RuleEdge> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.ingress.iter().map(move |r| RuleEdge {
                    from: r.source.clone(),
                    to: g.id.clone(),
                    port: r.port,
                    protocol: r.protocol,
                })
            })
            .collect()
    }

    /// Whether `from` may open a TCP connection to `to` on `port`
    pub fn can_reach(&self, from: &GroupId, to: &GroupId, port: Port) -> bool {
        self.group(to).is_some_and(|g| {
            g.ingress
                .iter()
                .any(|r| &r.source == from && r.port == port && r.protocol == Protocol::Tcp)
        })
    }

    /// Groups admitted by `to` on `port`
    pub fn granted_sources(&self, to: &GroupId, port: Port) -> Vec<&GroupId> {
        self.group(to)
            .map(|g| {
                g.ingress
                    .iter()
                    .filter(|r| r.port == port)
                    .map(|r| &r.source)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check the rule set equals the documented closure exactly
    ///
    /// Extra rules break minimality; missing rules break a documented consumer.
    pub fn verify_closure(&self, expected: &[RuleEdge]) -> Result<(), ProvisioningError> {
        let actual: BTreeSet<RuleEdge> = self.rules().into_iter().collect();
        let expected: BTreeSet<RuleEdge> = expected.iter().cloned().collect();

        if let Some(extra) = actual.difference(&expected).next() {
            return Err(ProvisioningError::ClosureViolation(format!(
                "undocumented rule {} -> {} on {}/{}",
                extra.from, extra.to, extra.protocol, extra.port
            )));
        }
        if let Some(missing) = expected.difference(&actual).next() {
            return Err(ProvisioningError::ClosureViolation(format!(
                "missing rule {} -> {} on {}/{}",
                missing.from, missing.to, missing.protocol, missing.port
            )));
        }
        Ok(())
    }
}

/// Which database access paths are granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPosture {
    /// Clients may reach the proxy and, for operators, the database directly
    #[default]
    Standard,
    /// Clients reach the database only through the proxy
    Strict,
}

/// The four groups of the database access closure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseAccessGroups {
    pub db_client: GroupId,
    pub rotation: GroupId,
    pub proxy: GroupId,
    pub database: GroupId,
}

impl DatabaseAccessGroups {
    /// Rules this topology documents a consumer for
    pub fn required_closure(&self, port: Port, posture: SecurityPosture) -> Vec<RuleEdge> {
        let mut edges = vec![
            RuleEdge::tcp(&self.db_client, &self.proxy, port),
            RuleEdge::tcp(&self.rotation, &self.database, port),
            RuleEdge::tcp(&self.proxy, &self.database, port),
        ];
        if posture == SecurityPosture::Standard {
            edges.push(RuleEdge::tcp(&self.db_client, &self.database, port));
        }
        edges
    }
}

/// Create the database access groups and exactly their documented rules
pub fn build_database_access(
    graph: &mut SecurityRuleGraph,
    env_name: &str,
    port: Port,
    posture: SecurityPosture,
) -> Result<DatabaseAccessGroups, ProvisioningError> {
    let db_client = graph.create_group(
        ResourceId::from_static("DbClientSg"),
        format!("{}-db-client-sg", env_name),
        "Database clients",
        true,
    )?;
    let rotation = graph.create_group(
        ResourceId::from_static("RotateSecretsLambdaFunctionSg"),
        format!("{}-rotate-secrets-lambda-sg", env_name),
        "Secret rotation functions",
        true,
    )?;
    let proxy = graph.create_group(
        ResourceId::from_static("RdsProxySg"),
        format!("{}-rds-proxy-sg", env_name),
        "Database proxy",
        true,
    )?;
    graph.allow(&db_client, &proxy, port, "Allow RDS Proxy access from DB Client")?;

    let database = graph.create_group(
        ResourceId::from_static("DbSg"),
        format!("{}-db-sg", env_name),
        "Database cluster",
        true,
    )?;
    graph.allow(
        &rotation,
        &database,
        port,
        "Allow DB access from Lambda Functions that rotate Secrets",
    )?;
    if posture == SecurityPosture::Standard {
        graph.allow(&db_client, &database, port, "Allow DB access from DB Client")?;
    }
    graph.allow(&proxy, &database, port, "Allow DB access from RDS Proxy")?;

    let groups = DatabaseAccessGroups {
        db_client,
        rotation,
        proxy,
        database,
    };
    graph.verify_closure(&groups.required_closure(port, posture))?;
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_access(posture: SecurityPosture) -> (SecurityRuleGraph, DatabaseAccessGroups) {
        let mut graph = SecurityRuleGraph::new(ResourceId::from_static("Vpc"));
        let groups = build_database_access(&mut graph, "dev", Port::POSTGRES, posture).unwrap();
        (graph, groups)
    }

    #[test]
    fn test_standard_closure() {
        let (graph, groups) = graph_with_access(SecurityPosture::Standard);
        assert_eq!(graph.groups().len(), 4);
        assert_eq!(graph.rules().len(), 4);

        let port = Port::POSTGRES;
        assert!(graph.can_reach(&groups.db_client, &groups.proxy, port));
        assert!(graph.can_reach(&groups.db_client, &groups.database, port));
        assert!(graph.can_reach(&groups.proxy, &groups.database, port));
        assert!(graph.can_reach(&groups.rotation, &groups.database, port));
    }

    #[test]
    fn test_strict_closure_drops_direct_path() {
        let (graph, groups) = graph_with_access(SecurityPosture::Strict);
        assert_eq!(graph.rules().len(), 3);
        assert!(!graph.can_reach(&groups.db_client, &groups.database, Port::POSTGRES));
    }

    #[test]
    fn test_group_names() {
        let (graph, groups) = graph_with_access(SecurityPosture::Standard);
        assert_eq!(graph.group(&groups.db_client).unwrap().name, "dev-db-client-sg");
        assert_eq!(
            graph.group(&groups.rotation).unwrap().name,
            "dev-rotate-secrets-lambda-sg"
        );
        assert_eq!(graph.group(&groups.proxy).unwrap().name, "dev-rds-proxy-sg");
        assert_eq!(graph.group(&groups.database).unwrap().name, "dev-db-sg");
    }

    #[test]
    fn test_unlisted_pairs_have_no_rules() {
        let (graph, groups) = graph_with_access(SecurityPosture::Standard);
        let port = Port::POSTGRES;
        assert!(!graph.can_reach(&groups.proxy, &groups.db_client, port));
        assert!(!graph.can_reach(&groups.rotation, &groups.proxy, port));
        assert!(!graph.can_reach(&groups.database, &groups.proxy, port));
        assert!(graph.granted_sources(&groups.db_client, port).is_empty());
        assert!(graph.granted_sources(&groups.rotation, port).is_empty());
    }

    #[test]
    fn test_port_is_part_of_rule() {
        let (graph, groups) = graph_with_access(SecurityPosture::Standard);
        let https = Port::new(443).unwrap();
        assert!(!graph.can_reach(&groups.db_client, &groups.proxy, https));
    }

    #[test]
    fn test_self_grant_rejected() {
        let (mut graph, groups) = graph_with_access(SecurityPosture::Standard);
        let result = graph.allow(&groups.database, &groups.database, Port::POSTGRES, "");
        assert!(matches!(result, Err(ProvisioningError::SelfReferencingRule(_))));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let (mut graph, groups) = graph_with_access(SecurityPosture::Standard);
        let result = graph.allow(&groups.proxy, &groups.database, Port::POSTGRES, "again");
        assert!(matches!(result, Err(ProvisioningError::DuplicateRule { .. })));
    }

    #[test]
    fn test_unknown_group_rejected() {
        let (mut graph, groups) = graph_with_access(SecurityPosture::Standard);
        let ghost = ResourceId::from_static("GhostSg");
        assert!(graph.allow(&ghost, &groups.database, Port::POSTGRES, "").is_err());
        assert!(graph.allow(&groups.database, &ghost, Port::POSTGRES, "").is_err());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let (mut graph, _) = graph_with_access(SecurityPosture::Standard);
        let result = graph.create_group(ResourceId::from_static("DbSg"), "dup", "", true);
        assert!(matches!(result, Err(ProvisioningError::DuplicateSecurityGroup(_))));
    }

    #[test]
    fn test_widening_breaks_closure() {
        let (mut graph, groups) = graph_with_access(SecurityPosture::Standard);
        graph
            .allow(&groups.db_client, &groups.rotation, Port::POSTGRES, "extra")
            .unwrap();
        let result =
            graph.verify_closure(&groups.required_closure(Port::POSTGRES, SecurityPosture::Standard));
        assert!(matches!(result, Err(ProvisioningError::ClosureViolation(_))));
    }

    #[test]
    fn test_missing_rule_breaks_closure() {
        let (graph, groups) = graph_with_access(SecurityPosture::Strict);
        let result =
            graph.verify_closure(&groups.required_closure(Port::POSTGRES, SecurityPosture::Standard));
        assert!(matches!(result, Err(ProvisioningError::ClosureViolation(_))));
    }
}
