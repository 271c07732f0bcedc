// Copyright (c) 2025 - Cowboy AI, Inc.
//! Rotation Scheduler
//!
//! Periodically replaces the administrator password using the single-user
//! procedure:
//!
//! 1. stage a new `Pending` version in the vault
//! 2. set it on the database
//! 3. open a test connection with it
//! 4. promote it to `Current`
//!
//! At most one rotation per secret runs at a time. An overlapping request
//! fails immediately instead of queueing behind the running one.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{CredentialRef, GroupId, ResourceId};
use crate::errors::RotationError;
use crate::provision::database::DatabaseCluster;
use crate::provision::network::{NetworkTopology, SubnetTier};
use crate::provision::security::SecurityRuleGraph;
use crate::provision::vault::{CredentialVault, SecretValue};

/// Largest accepted rotation interval
pub const MAX_ROTATION_INTERVAL_DAYS: u32 = 1000;

/// Failure reported by a rotation target
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TargetError(pub String);

/// Database side of a rotation
#[async_trait]
pub trait RotationTarget: Send + Sync {
    /// Set the password in `secret` for `principal`
    async fn set_password(&self, principal: &str, secret: &SecretValue) -> Result<(), TargetError>;

    /// Authenticate as `principal` with `secret`
    async fn test_connection(&self, principal: &str, secret: &SecretValue)
        -> Result<(), TargetError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationApplication {
    PostgresSingleUser,
}

/// Periodic rotation of one secret against one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSchedule {
    pub id: ResourceId,
    pub secret: CredentialRef,
    pub target: ResourceId,
    pub interval_days: u32,
    pub application: RotationApplication,
    /// Identity the rotation function runs as
    pub security_group: GroupId,
    pub subnets: Vec<ResourceId>,
    pub exclude_characters: String,
}

impl RotationSchedule {
    /// Single-user rotation of the cluster's own credential, placed in the
    /// private-with-egress subnets
    pub fn single_user(
        cluster: &DatabaseCluster,
        network: &NetworkTopology,
        security_group: GroupId,
        interval_days: u32,
        exclude_characters: impl Into<String>,
    ) -> Self {
        Self {
            id: ResourceId::from_static("DbAdminSecretRotation"),
            secret: cluster.credential().clone(),
            target: cluster.id().clone(),
            interval_days,
            application: RotationApplication::PostgresSingleUser,
            security_group,
            subnets: network.subnet_ids(SubnetTier::PrivateWithEgress),
            exclude_characters: exclude_characters.into(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::days(i64::from(self.interval_days))
    }
}

fn due_after(
    secret: &str,
    now: DateTime<Utc>,
    interval: Duration,
) -> Result<DateTime<Utc>, RotationError> {
    now.checked_add_signed(interval)
        .ok_or_else(|| RotationError::TimeOutOfRange {
            secret: secret.to_string(),
            at: now.to_rfc3339(),
        })
}

#[derive(Debug, Clone)]
struct ScheduledRotation {
    schedule: RotationSchedule,
    next_due: DateTime<Utc>,
    last_rotated: Option<DateTime<Utc>>,
}

/// Clears the in-flight mark when a rotation ends, however it ends
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    secret: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.secret);
    }
}

/// Registered rotation schedules and their single-flight guards
#[derive(Debug)]
pub struct RotationScheduler {
    vault: Arc<CredentialVault>,
    schedules: Mutex<BTreeMap<String, ScheduledRotation>>,
    in_flight: Mutex<HashSet<String>>,
}

impl RotationScheduler {
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            vault,
            schedules: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn schedules_lock(&self) -> MutexGuard<'_, BTreeMap<String, ScheduledRotation>> {
        self.schedules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    /// Register `schedule`; the first run is due one interval from `now`
    ///
    /// # Errors
    /// - The vault does not hold the secret
    /// - Interval outside 1 to 1000 days
    /// - The schedule's exclusion set leaves no satisfiable password policy
    /// - The secret already has a schedule
    /// - The rotation identity has no ingress on the cluster's group
    pub fn schedule(
        &self,
        schedule: RotationSchedule,
        graph: &SecurityRuleGraph,
        cluster: &DatabaseCluster,
        now: DateTime<Utc>,
    ) -> Result<(), RotationError> {
        let name = schedule.secret.name().to_string();
        if !self.vault.contains(&schedule.secret) {
            return Err(RotationError::UnknownSecret(name));
        }
        let policy = self
            .vault
            .policy(&schedule.secret)
            .ok_or_else(|| RotationError::UnknownSecret(name.clone()))?;
        if !(1..=MAX_ROTATION_INTERVAL_DAYS).contains(&schedule.interval_days) {
            return Err(RotationError::InvalidInterval(schedule.interval_days));
        }
        policy
            .excluding(&schedule.exclude_characters)
            .validate()
            .map_err(|e| RotationError::UnsatisfiablePolicy {
                secret: name.clone(),
                reason: e.to_string(),
            })?;
        if !graph.can_reach(&schedule.security_group, cluster.security_group(), cluster.port()) {
            warn!(
                "Rotation identity {} cannot reach {} on {}",
                schedule.security_group,
                cluster.security_group(),
                cluster.port()
            );
            return Err(RotationError::TargetUnreachable {
                secret: name,
                reason: format!(
                    "{} has no ingress on {} port {}",
                    schedule.security_group,
                    cluster.security_group(),
                    cluster.port()
                ),
            });
        }

        let mut schedules = self.schedules_lock();
        if schedules.contains_key(&name) {
            return Err(RotationError::AlreadyScheduled(name));
        }

        let next_due = due_after(&name, now, schedule.interval())?;
        info!(
            "Scheduled rotation of {} every {} days, first at {}",
            name, schedule.interval_days, next_due
        );
        schedules.insert(
            name,
            ScheduledRotation {
                schedule,
                next_due,
                last_rotated: None,
            },
        );
        Ok(())
    }

    /// Registered schedules, ordered by secret name
    pub fn schedules(&self) -> Vec<RotationSchedule> {
        self.schedules_lock()
            .values()
            .map(|s| s.schedule.clone())
            .collect()
    }

    pub fn schedule_for(&self, reference: &CredentialRef) -> Option<RotationSchedule> {
        self.schedules_lock()
            .get(reference.name())
            .map(|s| s.schedule.clone())
    }

    pub fn next_due(&self, reference: &CredentialRef) -> Option<DateTime<Utc>> {
        self.schedules_lock().get(reference.name()).map(|s| s.next_due)
    }

    pub fn last_rotated(&self, reference: &CredentialRef) -> Option<DateTime<Utc>> {
        self.schedules_lock()
            .get(reference.name())
            .and_then(|s| s.last_rotated)
    }

    pub fn is_in_flight(&self, reference: &CredentialRef) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(reference.name())
    }

    fn begin(&self, reference: &CredentialRef) -> Result<InFlightGuard<'_>, RotationError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(reference.name().to_string()) {
            warn!("Rejected overlapping rotation of {}", reference.name());
            return Err(RotationError::AlreadyInFlight(reference.name().to_string()));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            secret: reference.name().to_string(),
        })
    }

    /// Rotate `reference` now, returning the promoted version id
    ///
    /// A failed target call discards the pending version; `Current` is left
    /// untouched.
    pub async fn rotate_now(
        &self,
        reference: &CredentialRef,
        target: &dyn RotationTarget,
        now: DateTime<Utc>,
    ) -> Result<Uuid, RotationError> {
        let schedule = self
            .schedule_for(reference)
            .ok_or_else(|| RotationError::NotScheduled(reference.name().to_string()))?;
        let next_due = due_after(reference.name(), now, schedule.interval())?;
        let _guard = self.begin(reference)?;

        let principal = self
            .vault
            .principal(reference)
            .ok_or_else(|| RotationError::UnknownSecret(reference.name().to_string()))?;
        let (version, value) = self
            .vault
            .create_pending(reference, &schedule.exclude_characters, now)?;
        info!("Rotation of {} started (pending {})", reference.name(), version);

        let outcome = match target.set_password(&principal, &value).await {
            Ok(()) => target.test_connection(&principal, &value).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            error!("Rotation of {} failed: {}", reference.name(), e);
            self.vault.discard_pending(reference, version);
            return Err(RotationError::TargetUnreachable {
                secret: reference.name().to_string(),
                reason: e.to_string(),
            });
        }

        if let Err(e) = self.vault.promote(reference, version, now) {
            self.vault.discard_pending(reference, version);
            return Err(e);
        }
        if let Some(entry) = self.schedules_lock().get_mut(reference.name()) {
            entry.last_rotated = Some(now);
            entry.next_due = next_due;
        }
        info!("Rotation of {} finished (current {})", reference.name(), version);
        Ok(version)
    }

    /// Rotate every secret whose next run is at or before `now`
    pub async fn run_due(
        &self,
        target: &dyn RotationTarget,
        now: DateTime<Utc>,
    ) -> Vec<(CredentialRef, Result<Uuid, RotationError>)> {
        let due: Vec<CredentialRef> = self
            .schedules_lock()
            .values()
            .filter(|s| s.next_due <= now)
            .map(|s| s.schedule.secret.clone())
            .collect();

        let results = join_all(due.iter().map(|r| self.rotate_now(r, target, now))).await;
        due.into_iter().zip(results).collect()
    }

    /// Drive [`run_due`](Self::run_due) every `tick` until the task is aborted
    pub fn spawn(
        self: Arc<Self>,
        target: Arc<dyn RotationTarget>,
        tick: std::time::Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                for (reference, result) in self.run_due(target.as_ref(), Utc::now()).await {
                    if let Err(e) = result {
                        warn!("Scheduled rotation of {} failed: {}", reference.name(), e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvironmentProfile, Ipv4Cidr, Port};
    use crate::provision::database::{DatabaseContext, DatabaseProvisioner, DatabaseSpec};
    use crate::provision::network::{NetworkAllocator, NetworkSpec};
    use crate::provision::security::{build_database_access, DatabaseAccessGroups, SecurityPosture};
    use crate::provision::vault::{PasswordPolicy, DEFAULT_EXCLUDE_CHARACTERS, PASSWORD_KEY};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        network: NetworkTopology,
        graph: SecurityRuleGraph,
        groups: DatabaseAccessGroups,
        cluster: DatabaseCluster,
        scheduler: RotationScheduler,
    }

    fn fixture() -> Fixture {
        let spec = NetworkSpec::three_tier(
            "10.100.0.0/16".parse::<Ipv4Cidr>().unwrap(),
            2,
            vec!["ap-northeast-1a".into(), "ap-northeast-1c".into()],
        );
        let network = NetworkAllocator::new().allocate(&spec).unwrap();
        let mut graph = SecurityRuleGraph::new(network.id.clone());
        let groups =
            build_database_access(&mut graph, "dev", Port::POSTGRES, SecurityPosture::Standard)
                .unwrap();
        let vault = Arc::new(CredentialVault::new(
            "ap-northeast-1",
            "123456789012",
            Duration::hours(1),
        ));
        let credential = vault
            .generate(
                "dev-db-cluster/AdminLoginInfo",
                "devAdmin",
                &PasswordPolicy::default(),
                json!({ "username": "devAdmin" }),
                Utc::now(),
            )
            .unwrap();
        let cluster = DatabaseProvisioner::default()
            .provision(
                &DatabaseSpec::for_environment(&EnvironmentProfile::Dev.parameters()),
                DatabaseContext {
                    env_name: "dev",
                    region: "ap-northeast-1",
                    network: &network,
                    graph: &graph,
                    security_group: &groups.database,
                    credential: &credential,
                },
            )
            .unwrap();
        Fixture {
            network,
            graph,
            groups,
            cluster,
            scheduler: RotationScheduler::new(vault),
        }
    }

    fn schedule(f: &Fixture, group: &GroupId) -> RotationSchedule {
        RotationSchedule::single_user(
            &f.cluster,
            &f.network,
            group.clone(),
            3,
            DEFAULT_EXCLUDE_CHARACTERS,
        )
    }

    #[derive(Default)]
    struct CountingTarget {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RotationTarget for CountingTarget {
        async fn set_password(&self, _: &str, _: &SecretValue) -> Result<(), TargetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn test_connection(&self, _: &str, _: &SecretValue) -> Result<(), TargetError> {
            Ok(())
        }
    }

    /// Keeps every password it was asked to set
    #[derive(Default)]
    struct RecordingTarget {
        passwords: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RotationTarget for RecordingTarget {
        async fn set_password(&self, _: &str, secret: &SecretValue) -> Result<(), TargetError> {
            let document: serde_json::Value =
                serde_json::from_str(secret.expose()).map_err(|e| TargetError(e.to_string()))?;
            let password = document[PASSWORD_KEY].as_str().unwrap_or_default().to_string();
            self.passwords.lock().unwrap().push(password);
            Ok(())
        }

        async fn test_connection(&self, _: &str, _: &SecretValue) -> Result<(), TargetError> {
            Ok(())
        }
    }

    #[test]
    fn test_schedule_three_day_rotation() {
        let f = fixture();
        let now = Utc::now();
        f.scheduler
            .schedule(schedule(&f, &f.groups.rotation), &f.graph, &f.cluster, now)
            .unwrap();

        let registered = f.scheduler.schedule_for(f.cluster.credential()).unwrap();
        assert_eq!(registered.interval_days, 3);
        assert_eq!(registered.application, RotationApplication::PostgresSingleUser);
        assert_eq!(
            registered.subnets,
            f.network.subnet_ids(SubnetTier::PrivateWithEgress)
        );
        assert_eq!(
            f.scheduler.next_due(f.cluster.credential()),
            Some(now + Duration::days(3))
        );
    }

    #[test]
    fn test_schedule_twice_rejected() {
        let f = fixture();
        let now = Utc::now();
        f.scheduler
            .schedule(schedule(&f, &f.groups.rotation), &f.graph, &f.cluster, now)
            .unwrap();
        assert!(matches!(
            f.scheduler
                .schedule(schedule(&f, &f.groups.rotation), &f.graph, &f.cluster, now),
            Err(RotationError::AlreadyScheduled(_))
        ));
    }

    #[test]
    fn test_schedule_unreachable_identity() {
        let f = fixture();
        let result = f.scheduler.schedule(
            schedule(&f, &f.groups.proxy.clone().child("Missing")),
            &f.graph,
            &f.cluster,
            Utc::now(),
        );
        assert!(matches!(result, Err(RotationError::TargetUnreachable { .. })));
    }

    #[test]
    fn test_schedule_interval_bounds() {
        let f = fixture();
        let mut zero = schedule(&f, &f.groups.rotation);
        zero.interval_days = 0;
        assert_eq!(
            f.scheduler.schedule(zero, &f.graph, &f.cluster, Utc::now()),
            Err(RotationError::InvalidInterval(0))
        );
    }

    #[test]
    fn test_rotate_unscheduled_secret() {
        let f = fixture();
        let target = CountingTarget::default();
        let result = tokio_test::block_on(f.scheduler.rotate_now(
            f.cluster.credential(),
            &target,
            Utc::now(),
        ));
        assert!(matches!(result, Err(RotationError::NotScheduled(_))));
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rotate_now_promotes_and_reschedules() {
        let f = fixture();
        let now = Utc::now();
        let reference = f.cluster.credential().clone();
        f.scheduler
            .schedule(schedule(&f, &f.groups.rotation), &f.graph, &f.cluster, now)
            .unwrap();
        let before = f.scheduler.vault().current_version(&reference).unwrap();

        let target = CountingTarget::default();
        let later = now + Duration::days(3);
        let version = f.scheduler.rotate_now(&reference, &target, later).await.unwrap();

        assert_ne!(version, before);
        assert_eq!(f.scheduler.vault().current_version(&reference), Some(version));
        assert!(f.scheduler.vault().is_version_valid(&reference, before, later));
        assert_eq!(f.scheduler.last_rotated(&reference), Some(later));
        assert_eq!(f.scheduler.next_due(&reference), Some(later + Duration::days(3)));
        assert!(!f.scheduler.is_in_flight(&reference));
    }

    #[tokio::test]
    async fn test_run_due_only_rotates_due_schedules() {
        let f = fixture();
        let now = Utc::now();
        f.scheduler
            .schedule(schedule(&f, &f.groups.rotation), &f.graph, &f.cluster, now)
            .unwrap();
        let target = CountingTarget::default();

        assert!(f.scheduler.run_due(&target, now + Duration::days(1)).await.is_empty());

        let results = f.scheduler.run_due(&target, now + Duration::days(3)).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rotation_uses_schedule_exclusions() {
        let f = fixture();
        let now = Utc::now();
        let reference = f.cluster.credential().clone();
        let digits = format!("{}0123456789", DEFAULT_EXCLUDE_CHARACTERS);
        let mut no_digits = schedule(&f, &f.groups.rotation);
        no_digits.exclude_characters = digits.clone();
        f.scheduler.schedule(no_digits, &f.graph, &f.cluster, now).unwrap();

        let target = RecordingTarget::default();
        for _ in 0..5 {
            f.scheduler.rotate_now(&reference, &target, now).await.unwrap();
        }

        let passwords = target.passwords.lock().unwrap();
        assert_eq!(passwords.len(), 5);
        for password in passwords.iter() {
            assert!(!password.bytes().any(|b| b.is_ascii_digit()), "{}", password);
            assert!(PasswordPolicy::default().excluding(&digits).is_satisfied_by(password));
        }
    }

    #[test]
    fn test_schedule_unsatisfiable_exclusions_rejected() {
        let f = fixture();
        let mut everything = schedule(&f, &f.groups.rotation);
        everything.exclude_characters = (b'!'..=b'~').map(char::from).collect();

        let result = f.scheduler.schedule(everything, &f.graph, &f.cluster, Utc::now());
        assert!(matches!(result, Err(RotationError::UnsatisfiablePolicy { .. })));
        assert!(f.scheduler.schedules().is_empty());
    }

    #[tokio::test]
    async fn test_rotate_now_at_end_of_time_is_an_error() {
        let f = fixture();
        let reference = f.cluster.credential().clone();
        f.scheduler
            .schedule(schedule(&f, &f.groups.rotation), &f.graph, &f.cluster, Utc::now())
            .unwrap();
        let before = f.scheduler.vault().current_version(&reference);

        let target = CountingTarget::default();
        let result = f
            .scheduler
            .rotate_now(&reference, &target, DateTime::<Utc>::MAX_UTC)
            .await;

        assert!(matches!(result, Err(RotationError::TimeOutOfRange { .. })));
        assert_eq!(f.scheduler.vault().current_version(&reference), before);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_rotates_due_secret_once() {
        let f = fixture();
        let reference = f.cluster.credential().clone();
        let scheduler = Arc::new(RotationScheduler::new(Arc::clone(f.scheduler.vault())));
        scheduler
            .schedule(
                schedule(&f, &f.groups.rotation),
                &f.graph,
                &f.cluster,
                Utc::now() - Duration::days(3),
            )
            .unwrap();
        let before = scheduler.vault().current_version(&reference);

        let target = Arc::new(CountingTarget::default());
        let tick = std::time::Duration::from_secs(60);
        let handle = Arc::clone(&scheduler).spawn(target.clone(), tick);

        tokio::time::sleep(tick * 5).await;
        handle.abort();

        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        assert_ne!(scheduler.vault().current_version(&reference), before);
        assert!(scheduler.next_due(&reference) > Some(Utc::now()));
        assert!(!scheduler.is_in_flight(&reference));
    }
}
