// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource registry
//!
//! Every resource of a topology is registered here under its logical id,
//! with the ids it depends on. A dependency must be registered before its
//! dependents, so registration order is always a valid creation order and
//! its reverse a valid teardown order.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::{ResourceId, ResourceKind};
use crate::errors::{TopologyError, TopologyResult};

/// One node of the resource graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub depends_on: Vec<ResourceId>,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource after all of its dependencies
    ///
    /// # Errors
    /// - `id` already registered
    /// - A dependency not yet registered
    /// - `properties` not serializable
    pub fn register<P: Serialize>(
        &mut self,
        id: ResourceId,
        kind: ResourceKind,
        depends_on: Vec<ResourceId>,
        properties: &P,
    ) -> TopologyResult<()> {
        if self.index.contains_key(&id) {
            return Err(TopologyError::DuplicateResource(id));
        }
        if let Some(missing) = depends_on.iter().find(|d| !self.index.contains_key(*d)) {
            return Err(TopologyError::MissingDependency {
                resource: id,
                dependency: missing.clone(),
            });
        }

        let depends_on = depends_on.into_iter().fold(Vec::new(), |mut unique, d| {
            if !unique.contains(&d) {
                unique.push(d);
            }
            unique
        });
        let properties = serde_json::to_value(properties)?;

        debug!("Registered {} {} after {:?}", kind, id, depends_on);
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(ResourceNode {
            id,
            kind,
            depends_on,
            properties,
        });
        Ok(())
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Resolve a logical id, failing on unknown ids
    pub fn resolve(&self, id: &ResourceId) -> TopologyResult<&ResourceNode> {
        self.get(id)
            .ok_or_else(|| TopologyError::UnknownResource(id.clone()))
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in creation order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Ids that directly depend on `id`
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on.contains(id))
            .map(|n| &n.id)
            .collect()
    }

    pub fn creation_order(&self) -> Vec<ResourceId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn teardown_order(&self) -> Vec<ResourceId> {
        self.nodes.iter().rev().map(|n| n.id.clone()).collect()
    }

    /// Graph document for an external reconciler
    pub fn to_graph(&self) -> serde_json::Value {
        json!({ "resources": self.nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &'static str) -> ResourceId {
        ResourceId::from_static(s)
    }

    #[test]
    fn test_register_in_dependency_order() {
        let mut registry = ResourceRegistry::new();
        registry
            .register(id("Vpc"), ResourceKind::Vpc, vec![], &json!({ "cidr": "10.100.0.0/16" }))
            .unwrap();
        registry
            .register(id("VpcPublicSubnet1"), ResourceKind::Subnet, vec![id("Vpc")], &json!({}))
            .unwrap();

        assert_eq!(registry.creation_order(), vec![id("Vpc"), id("VpcPublicSubnet1")]);
        assert_eq!(registry.teardown_order(), vec![id("VpcPublicSubnet1"), id("Vpc")]);
        assert_eq!(registry.dependents_of(&id("Vpc")), vec![&id("VpcPublicSubnet1")]);
        assert_eq!(registry.resolve(&id("Vpc")).unwrap().kind, ResourceKind::Vpc);
    }

    #[test]
    fn test_dependency_must_exist_first() {
        let mut registry = ResourceRegistry::new();
        let result = registry.register(id("DbCluster"), ResourceKind::DatabaseCluster, vec![id("DbSg")], &json!({}));
        assert_eq!(
            result,
            Err(TopologyError::MissingDependency {
                resource: id("DbCluster"),
                dependency: id("DbSg"),
            })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ResourceRegistry::new();
        registry.register(id("Vpc"), ResourceKind::Vpc, vec![], &json!({})).unwrap();
        assert_eq!(
            registry.register(id("Vpc"), ResourceKind::Vpc, vec![], &json!({})),
            Err(TopologyError::DuplicateResource(id("Vpc")))
        );
        assert!(matches!(
            registry.resolve(&id("Nope")),
            Err(TopologyError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_graph_document() {
        let mut registry = ResourceRegistry::new();
        registry.register(id("Vpc"), ResourceKind::Vpc, vec![], &json!({ "cidr": "10.100.0.0/16" })).unwrap();

        assert_eq!(
            registry.to_graph(),
            json!({
                "resources": [{
                    "id": "Vpc",
                    "kind": "vpc",
                    "depends_on": [],
                    "properties": { "cidr": "10.100.0.0/16" },
                }]
            })
        );
    }
}
