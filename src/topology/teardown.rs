// Copyright (c) 2025 - Cowboy AI, Inc.
//! Live topology lifecycle
//!
//! Tracks every resource of a built topology through its lifecycle. A
//! resource is created only after its dependencies are live and removed only
//! once nothing live depends on it, so teardown runs in reverse creation
//! order.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::domain::{ResourceId, ResourceKind};
use crate::errors::{TopologyError, TopologyResult};
use crate::state_machine::{
    LifecycleCommand, ResourceState, StateMachineWithHistory, Transition, TransitionOutput,
};
use crate::topology::registry::ResourceRegistry;

struct Tracked {
    depends_on: Vec<ResourceId>,
    protected: bool,
    machine: StateMachineWithHistory<ResourceState>,
}

/// Lifecycle state of every resource in one topology
pub struct LiveTopology {
    order: Vec<ResourceId>,
    resources: HashMap<ResourceId, Tracked>,
}

impl LiveTopology {
    /// Every resource starts out planned
    ///
    /// Database clusters carry their `deletion_protection` flag into the
    /// lifecycle; removing a protected cluster is refused.
    pub fn plan(registry: &ResourceRegistry) -> Self {
        let resources = registry
            .nodes()
            .iter()
            .map(|node| {
                let protected = node.kind == ResourceKind::DatabaseCluster
                    && node.properties["deletion_protection"].as_bool() == Some(true);
                (
                    node.id.clone(),
                    Tracked {
                        depends_on: node.depends_on.clone(),
                        protected,
                        machine: StateMachineWithHistory::new(ResourceState::Planned),
                    },
                )
            })
            .collect();

        Self {
            order: registry.creation_order(),
            resources,
        }
    }

    fn tracked(&self, id: &ResourceId) -> TopologyResult<&Tracked> {
        self.resources
            .get(id)
            .ok_or_else(|| TopologyError::UnknownResource(id.clone()))
    }

    fn apply(
        &mut self,
        id: &ResourceId,
        command: LifecycleCommand,
        now: DateTime<Utc>,
    ) -> TopologyResult<TransitionOutput> {
        let tracked = self
            .resources
            .get_mut(id)
            .ok_or_else(|| TopologyError::UnknownResource(id.clone()))?;
        tracked
            .machine
            .transition_with_history(command, now)
            .map_err(|source| TopologyError::Lifecycle {
                resource: id.clone(),
                source,
            })
    }

    pub fn state(&self, id: &ResourceId) -> Option<ResourceState> {
        self.resources.get(id).map(|t| *t.machine.current_state())
    }

    pub fn history(&self, id: &ResourceId) -> &[Transition<ResourceState, LifecycleCommand>] {
        self.resources
            .get(id)
            .map(|t| t.machine.history())
            .unwrap_or_default()
    }

    /// Resources that depend on `id` and are currently live
    pub fn live_dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.order
            .iter()
            .filter(|other| {
                self.resources.get(*other).is_some_and(|t| {
                    t.depends_on.contains(id) && t.machine.current_state().is_live()
                })
            })
            .cloned()
            .collect()
    }

    /// Create `id`; every dependency must already be live
    pub fn create(&mut self, id: &ResourceId, now: DateTime<Utc>) -> TopologyResult<TransitionOutput> {
        let tracked = self.tracked(id)?;
        if let Some(missing) = tracked
            .depends_on
            .iter()
            .find(|d| self.state(d).map_or(true, |s| !s.is_live()))
        {
            return Err(TopologyError::MissingDependency {
                resource: id.clone(),
                dependency: missing.clone(),
            });
        }
        self.apply(id, LifecycleCommand::Create, now)
    }

    /// Create every planned resource in creation order
    pub fn create_all(&mut self, now: DateTime<Utc>) -> TopologyResult<()> {
        for id in self.order.clone() {
            if self.state(&id) == Some(ResourceState::Planned) {
                self.create(&id, now)?;
            }
        }
        info!("Created {} resources", self.order.len());
        Ok(())
    }

    pub fn update(&mut self, id: &ResourceId, now: DateTime<Utc>) -> TopologyResult<TransitionOutput> {
        self.apply(id, LifecycleCommand::Update, now)
    }

    /// Remove `id`
    ///
    /// # Errors
    /// - Live resources still depend on `id`
    /// - `id` is a deletion-protected cluster
    /// - `id` is already deleted
    pub fn remove(&mut self, id: &ResourceId, now: DateTime<Utc>) -> TopologyResult<TransitionOutput> {
        let protected = self.tracked(id)?.protected;
        let dependents = self.live_dependents(id);
        if !dependents.is_empty() {
            warn!("Refusing to remove {}: required by {:?}", id, dependents);
            return Err(TopologyError::DependencyViolation {
                resource: id.clone(),
                dependents,
            });
        }
        let output = self.apply(id, LifecycleCommand::Delete { protected }, now)?;
        for warning in &output.warnings {
            warn!("{}: {}", id, warning);
        }
        Ok(output)
    }

    /// Remove every resource in reverse creation order, returning the removed ids
    ///
    /// Stops at the first refusal; resources removed before it stay removed.
    pub fn teardown(&mut self, now: DateTime<Utc>) -> TopologyResult<Vec<ResourceId>> {
        let mut removed = Vec::new();
        for id in self.order.clone().into_iter().rev() {
            if self.state(&id) == Some(ResourceState::Deleted) {
                continue;
            }
            self.remove(&id, now)?;
            removed.push(id);
        }
        info!("Tore down {} resources", removed.len());
        Ok(removed)
    }
}
