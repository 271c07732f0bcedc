// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for credential rotation on a built topology
//!
//! Rotation runs against a stand-in database that records the passwords it
//! was given. These tests cover:
//! 1. Single-flight rotation of one secret
//! 2. The grace window of the replaced version
//! 3. Failed rotations leaving the current version in place

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cim_topology::provision::rotation::{RotationTarget, TargetError};
use cim_topology::provision::vault::SecretValue;
use cim_topology::{RotationError, Topology, TopologyBuilder, TopologyConfig};

fn test_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn dev() -> Topology {
    TopologyBuilder::new(TopologyConfig::default())
        .build_at(test_timestamp())
        .unwrap()
}

/// Database stand-in that accepts every password after an optional delay
#[derive(Default)]
struct StubDatabase {
    delay_ms: u64,
    fail: bool,
    passwords_set: AtomicUsize,
}

#[async_trait]
impl RotationTarget for StubDatabase {
    async fn set_password(&self, _principal: &str, secret: &SecretValue) -> Result<(), TargetError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(TargetError("connection refused".to_string()));
        }
        assert!(secret.expose().contains("\"password\""));
        self.passwords_set.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn test_connection(&self, _principal: &str, _secret: &SecretValue) -> Result<(), TargetError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_overlapping_rotations_single_flight() {
    let topology = dev();
    let scheduler = topology.scheduler();
    let secret = topology.credential();
    let database = StubDatabase {
        delay_ms: 50,
        ..StubDatabase::default()
    };
    let now = test_timestamp();

    let (first, second) = tokio::join!(
        scheduler.rotate_now(secret, &database, now),
        scheduler.rotate_now(secret, &database, now)
    );

    assert!(first.is_ok());
    assert_eq!(second, Err(RotationError::AlreadyInFlight(secret.name().to_string())));
    assert_eq!(database.passwords_set.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_in_flight(secret));
}

#[tokio::test]
async fn test_previous_version_valid_through_grace_window() {
    let topology = dev();
    let vault = topology.vault();
    let secret = topology.credential();
    let original = vault.current_version(secret).unwrap();
    let now = test_timestamp();

    let rotated = topology
        .scheduler()
        .rotate_now(secret, &StubDatabase::default(), now)
        .await
        .unwrap();

    assert_eq!(vault.current_version(secret), Some(rotated));
    assert!(vault.is_version_valid(secret, original, now + Duration::minutes(30)));
    assert!(!vault.is_version_valid(secret, original, now + Duration::minutes(60)));
    assert_eq!(topology.scheduler().last_rotated(secret), Some(now));
    assert_eq!(topology.scheduler().next_due(secret), Some(now + Duration::days(3)));
}

#[tokio::test]
async fn test_failed_rotation_keeps_current_version() {
    let topology = dev();
    let vault = topology.vault();
    let secret = topology.credential();
    let original = vault.current_version(secret).unwrap();
    let database = StubDatabase {
        fail: true,
        ..StubDatabase::default()
    };

    let result = topology
        .scheduler()
        .rotate_now(secret, &database, test_timestamp())
        .await;

    assert!(matches!(result, Err(RotationError::TargetUnreachable { .. })));
    assert_eq!(vault.current_version(secret), Some(original));
    assert_eq!(vault.version_stages(secret).len(), 1);
    assert!(!topology.scheduler().is_in_flight(secret));
}

#[tokio::test]
async fn test_run_due_rotates_only_when_due() {
    let topology = dev();
    let database = Arc::new(StubDatabase::default());
    let start = test_timestamp();

    let early = topology
        .scheduler()
        .run_due(database.as_ref(), start + Duration::days(1))
        .await;
    assert!(early.is_empty());

    let due = topology
        .scheduler()
        .run_due(database.as_ref(), start + Duration::days(3))
        .await;
    assert_eq!(due.len(), 1);
    assert_eq!(&due[0].0, topology.credential());
    assert!(due[0].1.is_ok());
    assert_eq!(database.passwords_set.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_schedule_for_same_secret_rejected() {
    let topology = dev();
    let result = topology.scheduler().schedule(
        topology.rotation().clone(),
        topology.security(),
        topology.cluster(),
        test_timestamp(),
    );
    assert_eq!(
        result,
        Err(RotationError::AlreadyScheduled(
            topology.credential().name().to_string()
        ))
    );
}
