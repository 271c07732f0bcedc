// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for the lifecycle of a built topology
//!
//! Resources are created in dependency order and removed in reverse; a
//! resource with live dependents or deletion protection is never removed.

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;

use cim_topology::domain::{EnvironmentProfile, ResourceId};
use cim_topology::state_machine::{ResourceState, TransitionError};
use cim_topology::{Topology, TopologyBuilder, TopologyConfig, TopologyError};

fn test_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn build(profile: EnvironmentProfile) -> Topology {
    TopologyBuilder::new(TopologyConfig::for_profile(profile))
        .build_at(test_timestamp())
        .unwrap()
}

#[test]
fn test_teardown_reverses_creation() {
    let topology = build(EnvironmentProfile::Dev);
    let mut live = topology.live();
    let now = test_timestamp();

    live.create_all(now).unwrap();
    let removed = live.teardown(now).unwrap();

    assert_eq!(removed, topology.teardown_order());
    assert_eq!(removed.last(), Some(&ResourceId::from_static("Vpc")));
    assert!(topology
        .creation_order()
        .iter()
        .all(|id| live.state(id) == Some(ResourceState::Deleted)));
}

#[test]
fn test_network_not_removed_before_cluster() {
    let topology = build(EnvironmentProfile::Dev);
    let mut live = topology.live();
    let now = test_timestamp();
    live.create_all(now).unwrap();

    let vpc = ResourceId::from_static("Vpc");
    assert!(matches!(
        live.remove(&vpc, now),
        Err(TopologyError::DependencyViolation { .. })
    ));

    let subnet_group = ResourceId::from_static("SubnetGroup");
    let Err(TopologyError::DependencyViolation { dependents, .. }) = live.remove(&subnet_group, now)
    else {
        panic!("subnet group removed while the cluster is live");
    };
    assert_eq!(dependents, vec![ResourceId::from_static("DbCluster")]);
    assert_eq!(live.state(&vpc), Some(ResourceState::Active));
}

#[test]
fn test_creation_waits_for_dependencies() {
    let topology = build(EnvironmentProfile::Dev);
    let mut live = topology.live();

    assert!(matches!(
        live.create(&ResourceId::from_static("RdsProxy"), test_timestamp()),
        Err(TopologyError::MissingDependency { .. })
    ));
}

#[test]
fn test_prod_cluster_deletion_protected() {
    let topology = build(EnvironmentProfile::Prod);
    let mut live = topology.live();
    let now = test_timestamp();
    live.create_all(now).unwrap();

    let result = live.teardown(now);
    let cluster = ResourceId::from_static("DbCluster");

    assert!(matches!(
        result,
        Err(TopologyError::Lifecycle {
            ref resource,
            source: TransitionError::PreconditionFailed(_),
        }) if *resource == cluster
    ));
    assert_eq!(live.state(&cluster), Some(ResourceState::Active));
    assert!(live.live_dependents(&cluster).is_empty());
}

#[test]
fn test_update_only_applies_to_live_resources() {
    let topology = build(EnvironmentProfile::Dev);
    let mut live = topology.live();
    let now = test_timestamp();
    let cluster = ResourceId::from_static("DbCluster");

    assert!(matches!(
        live.update(&cluster, now),
        Err(TopologyError::Lifecycle {
            source: TransitionError::InvalidTransition { .. },
            ..
        })
    ));

    live.create_all(now).unwrap();
    live.update(&cluster, now).unwrap();
    assert_eq!(live.state(&cluster), Some(ResourceState::Active));
    assert_eq!(live.history(&cluster).len(), 2);
}
