// Copyright (c) 2025 - Cowboy AI, Inc.
//! Database Topology
//!
//! Builds the clustered database, its parameter groups and its subnet group.
//! The cluster is never publicly accessible and its storage is always
//! encrypted; neither can be turned off through [`DatabaseSpec`].
//!
//! After provisioning, only the instance count and the cluster parameter set
//! can change, through [`DatabaseCluster::apply_update`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::{CredentialRef, EnvironmentParameters, GroupId, Port, ResourceId};
use crate::errors::ProvisioningError;
use crate::provision::network::{NetworkTopology, SubnetTier};
use crate::provision::security::SecurityRuleGraph;

/// Largest instance count a cluster accepts
pub const MAX_CLUSTER_INSTANCES: u32 = 15;

const MINUTES_PER_DAY: u32 = 24 * 60;
const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;
const MIN_WINDOW_MINUTES: u32 = 30;
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Engine and version of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineVersion {
    pub engine: String,
    pub version: String,
}

impl EngineVersion {
    pub fn aurora_postgres(version: impl Into<String>) -> Self {
        Self {
            engine: "aurora-postgresql".to_string(),
            version: version.into(),
        }
    }

    /// Parameter group family, e.g. `aurora-postgresql13`
    pub fn family(&self) -> String {
        let major = self.version.split('.').next().unwrap_or(&self.version);
        format!("{}{}", self.engine, major)
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        Self::aurora_postgres("13.4")
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.engine, self.version)
    }
}

fn parse_clock(value: &str) -> Option<u32> {
    let (hours, minutes) = value.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

fn parse_weekday_clock(value: &str) -> Option<u32> {
    let (day, clock) = value.split_once(':')?;
    let day = WEEKDAYS
        .iter()
        .position(|d| d.eq_ignore_ascii_case(day))?;
    Some(day as u32 * MINUTES_PER_DAY + parse_clock(clock)?)
}

fn window_error(name: &str, value: &str, reason: &str) -> ProvisioningError {
    ProvisioningError::InvalidParameter {
        name: name.to_string(),
        reason: format!("{:?} {}", value, reason),
    }
}

/// Daily UTC window `hh24:mi-hh24:mi`, at least 30 minutes long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DailyWindow {
    start: u32,
    end: u32,
}

impl DailyWindow {
    pub fn duration_minutes(&self) -> u32 {
        (self.end + MINUTES_PER_DAY - self.start) % MINUTES_PER_DAY
    }
}

impl FromStr for DailyWindow {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| window_error("backup_window", s, "is not hh24:mi-hh24:mi"))?;
        let start = parse_clock(start)
            .ok_or_else(|| window_error("backup_window", s, "has an invalid start time"))?;
        let end = parse_clock(end)
            .ok_or_else(|| window_error("backup_window", s, "has an invalid end time"))?;
        let window = Self { start, end };
        if window.duration_minutes() < MIN_WINDOW_MINUTES {
            return Err(window_error("backup_window", s, "is shorter than 30 minutes"));
        }
        Ok(window)
    }
}

impl TryFrom<String> for DailyWindow {
    type Error = ProvisioningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DailyWindow> for String {
    fn from(window: DailyWindow) -> Self {
        window.to_string()
    }
}

impl fmt::Display for DailyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

/// Weekly UTC window `ddd:hh24:mi-ddd:hh24:mi`, at least 30 minutes long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeeklyWindow {
    start: u32,
    end: u32,
}

impl WeeklyWindow {
    pub fn duration_minutes(&self) -> u32 {
        (self.end + MINUTES_PER_WEEK - self.start) % MINUTES_PER_WEEK
    }

    fn format_point(minutes: u32, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = WEEKDAYS[(minutes / MINUTES_PER_DAY) as usize % WEEKDAYS.len()];
        let clock = minutes % MINUTES_PER_DAY;
        write!(f, "{}:{:02}:{:02}", day, clock / 60, clock % 60)
    }
}

impl FromStr for WeeklyWindow {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s.split_once('-').ok_or_else(|| {
            window_error("maintenance_window", s, "is not ddd:hh24:mi-ddd:hh24:mi")
        })?;
        let start = parse_weekday_clock(start)
            .ok_or_else(|| window_error("maintenance_window", s, "has an invalid start"))?;
        let end = parse_weekday_clock(end)
            .ok_or_else(|| window_error("maintenance_window", s, "has an invalid end"))?;
        let window = Self { start, end };
        if window.duration_minutes() < MIN_WINDOW_MINUTES {
            return Err(window_error(
                "maintenance_window",
                s,
                "is shorter than 30 minutes",
            ));
        }
        Ok(window)
    }
}

impl TryFrom<String> for WeeklyWindow {
    type Error = ProvisioningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WeeklyWindow> for String {
    fn from(window: WeeklyWindow) -> Self {
        window.to_string()
    }
}

impl fmt::Display for WeeklyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Self::format_point(self.start, f)?;
        write!(f, "-")?;
        Self::format_point(self.end, f)
    }
}

/// Automated backup policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPolicy {
    /// 1 to 35 days
    pub retention_days: u32,
    pub preferred_window: DailyWindow,
    pub delete_automated_backups: bool,
}

/// Cluster parameters enabling statement audit logging
pub fn audit_cluster_parameters() -> BTreeMap<String, String> {
    [
        ("pgaudit.log", "all"),
        ("pgaudit.role", "rds_pgaudit"),
        ("shared_preload_libraries", "pgaudit"),
        ("timezone", "Asia/Tokyo"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Requested cluster shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub cluster_identifier: String,
    pub engine: EngineVersion,
    pub instance_class: String,
    pub instances: u32,
    pub default_database_name: String,
    pub port: Port,
    pub backup: BackupPolicy,
    pub maintenance_window: WeeklyWindow,
    pub deletion_protection: bool,
    pub cluster_parameters: BTreeMap<String, String>,
    pub instance_parameters: BTreeMap<String, String>,
    pub cloudwatch_logs_exports: Vec<String>,
    pub log_retention_days: u32,
    pub monitoring_interval_secs: u32,
    pub performance_insights: bool,
    pub copy_tags_to_snapshot: bool,
    pub iam_authentication: bool,
    pub auto_minor_version_upgrade: bool,
    pub allow_major_version_upgrade: bool,
}

impl DatabaseSpec {
    /// Audited Aurora PostgreSQL cluster for one environment
    pub fn for_environment(params: &EnvironmentParameters) -> Self {
        Self {
            cluster_identifier: format!("{}-db-cluster", params.env_name),
            engine: EngineVersion::default(),
            instance_class: "db.t3.medium".to_string(),
            instances: params.instance_count,
            default_database_name: params.db_name.clone(),
            port: Port::POSTGRES,
            backup: BackupPolicy {
                retention_days: params.backup_retention_days,
                preferred_window: DailyWindow {
                    start: 16 * 60,
                    end: 16 * 60 + 30,
                },
                delete_automated_backups: false,
            },
            maintenance_window: WeeklyWindow {
                start: 5 * MINUTES_PER_DAY + 17 * 60,
                end: 5 * MINUTES_PER_DAY + 17 * 60 + 30,
            },
            deletion_protection: params.deletion_protection,
            cluster_parameters: audit_cluster_parameters(),
            instance_parameters: BTreeMap::new(),
            cloudwatch_logs_exports: vec!["postgresql".to_string()],
            log_retention_days: 365,
            monitoring_interval_secs: 60,
            performance_insights: true,
            copy_tags_to_snapshot: true,
            iam_authentication: false,
            auto_minor_version_upgrade: true,
            allow_major_version_upgrade: false,
        }
    }

    fn validate(&self) -> Result<(), ProvisioningError> {
        let invalid = |name: &str, reason: String| ProvisioningError::InvalidParameter {
            name: name.to_string(),
            reason,
        };

        if self.cluster_identifier.is_empty() {
            return Err(invalid("cluster_identifier", "must not be empty".to_string()));
        }
        if !(1..=35).contains(&self.backup.retention_days) {
            return Err(invalid(
                "backup_retention_days",
                format!("{} is outside 1..=35", self.backup.retention_days),
            ));
        }
        if !(1..=MAX_CLUSTER_INSTANCES).contains(&self.instances) {
            return Err(invalid(
                "instances",
                format!("{} is outside 1..={}", self.instances, MAX_CLUSTER_INSTANCES),
            ));
        }
        if ![0, 1, 5, 10, 15, 30, 60].contains(&self.monitoring_interval_secs) {
            return Err(invalid(
                "monitoring_interval_secs",
                format!("{} is not a supported interval", self.monitoring_interval_secs),
            ));
        }
        if self.default_database_name.is_empty()
            || !self
                .default_database_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid(
                "default_database_name",
                format!("{:?} is not a valid database name", self.default_database_name),
            ));
        }
        validate_parameters(&self.cluster_parameters)?;
        validate_parameters(&self.instance_parameters)
    }
}

fn validate_parameters(parameters: &BTreeMap<String, String>) -> Result<(), ProvisioningError> {
    match parameters.keys().find(|k| k.trim().is_empty()) {
        Some(_) => Err(ProvisioningError::InvalidParameter {
            name: "parameters".to_string(),
            reason: "parameter names must not be empty".to_string(),
        }),
        None => Ok(()),
    }
}

/// Zones in which an instance class is offered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneOffering {
    AllZones,
    Zones(BTreeSet<String>),
}

/// Instance classes each engine offers, per zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceClassCatalog {
    offerings: BTreeMap<String, BTreeMap<String, ZoneOffering>>,
}

impl InstanceClassCatalog {
    pub fn empty() -> Self {
        Self {
            offerings: BTreeMap::new(),
        }
    }

    /// Offer `class` for `engine` in the given zones only
    pub fn offer(mut self, engine: &str, class: &str, offering: ZoneOffering) -> Self {
        self.offerings
            .entry(engine.to_string())
            .or_default()
            .insert(class.to_string(), offering);
        self
    }

    pub fn offers(&self, engine: &str, class: &str, zone: &str) -> bool {
        match self.offerings.get(engine).and_then(|classes| classes.get(class)) {
            Some(ZoneOffering::AllZones) => true,
            Some(ZoneOffering::Zones(zones)) => zones.contains(zone),
            None => false,
        }
    }
}

impl Default for InstanceClassCatalog {
    /// Burstable and memory-optimized classes offered in every zone
    fn default() -> Self {
        [
            "db.t3.medium",
            "db.t3.large",
            "db.t4g.medium",
            "db.t4g.large",
            "db.r5.large",
            "db.r5.xlarge",
            "db.r6g.large",
            "db.r6g.xlarge",
        ]
        .into_iter()
        .fold(Self::empty(), |catalog, class| {
            catalog.offer("aurora-postgresql", class, ZoneOffering::AllZones)
        })
    }
}

/// Cluster or instance parameter group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub id: ResourceId,
    pub family: String,
    pub description: String,
    pub parameters: BTreeMap<String, String>,
}

/// Isolated subnets the cluster is placed in, one per zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroup {
    pub id: ResourceId,
    pub name: String,
    pub description: String,
    pub subnets: Vec<ResourceId>,
    pub zones: Vec<String>,
}

/// One member instance of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    pub id: ResourceId,
    pub identifier: String,
    pub instance_class: String,
    pub zone: String,
    pub parameter_group: ResourceId,
    pub auto_minor_version_upgrade: bool,
    pub allow_major_version_upgrade: bool,
    pub performance_insights: bool,
}

/// Mutation accepted by a provisioned cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub instances: Option<u32>,
    pub cluster_parameters: Option<BTreeMap<String, String>>,
}

/// What an applied [`ClusterUpdate`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterChange {
    pub added_instances: Vec<ResourceId>,
    pub removed_instances: Vec<ResourceId>,
    pub parameters_changed: bool,
}

/// Provisioned database cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseCluster {
    id: ResourceId,
    identifier: String,
    engine: EngineVersion,
    port: Port,
    endpoint: String,
    cluster_parameter_group: ParameterGroup,
    instance_parameter_group: ParameterGroup,
    subnet_group: SubnetGroup,
    security_group: GroupId,
    credential: CredentialRef,
    default_database_name: String,
    instances: Vec<DatabaseInstance>,
    backup: BackupPolicy,
    maintenance_window: WeeklyWindow,
    deletion_protection: bool,
    storage_encrypted: bool,
    publicly_accessible: bool,
    cloudwatch_logs_exports: Vec<String>,
    log_retention_days: u32,
    monitoring_interval_secs: u32,
    copy_tags_to_snapshot: bool,
    iam_authentication: bool,
}

impl DatabaseCluster {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn engine(&self) -> &EngineVersion {
        &self.engine
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// Writer endpoint host
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cluster_parameter_group(&self) -> &ParameterGroup {
        &self.cluster_parameter_group
    }

    pub fn instance_parameter_group(&self) -> &ParameterGroup {
        &self.instance_parameter_group
    }

    pub fn subnet_group(&self) -> &SubnetGroup {
        &self.subnet_group
    }

    pub fn security_group(&self) -> &GroupId {
        &self.security_group
    }

    pub fn credential(&self) -> &CredentialRef {
        &self.credential
    }

    pub fn default_database_name(&self) -> &str {
        &self.default_database_name
    }

    pub fn instances(&self) -> &[DatabaseInstance] {
        &self.instances
    }

    pub fn backup(&self) -> &BackupPolicy {
        &self.backup
    }

    pub fn maintenance_window(&self) -> WeeklyWindow {
        self.maintenance_window
    }

    pub fn deletion_protection(&self) -> bool {
        self.deletion_protection
    }

    pub fn storage_encrypted(&self) -> bool {
        self.storage_encrypted
    }

    pub fn publicly_accessible(&self) -> bool {
        self.publicly_accessible
    }

    pub fn cloudwatch_logs_exports(&self) -> &[String] {
        &self.cloudwatch_logs_exports
    }

    pub fn log_retention_days(&self) -> u32 {
        self.log_retention_days
    }

    pub fn monitoring_interval_secs(&self) -> u32 {
        self.monitoring_interval_secs
    }

    pub fn copy_tags_to_snapshot(&self) -> bool {
        self.copy_tags_to_snapshot
    }

    pub fn iam_authentication(&self) -> bool {
        self.iam_authentication
    }

    fn instance_at(&self, index: usize, template: &DatabaseInstance) -> DatabaseInstance {
        let zones = &self.subnet_group.zones;
        DatabaseInstance {
            id: self.id.child(&format!("Instance{}", index + 1)),
            identifier: format!("{}{}", self.identifier, index + 1),
            zone: zones[index % zones.len()].clone(),
            ..template.clone()
        }
    }

    /// Change instance count and/or cluster parameters
    ///
    /// Nothing else about a provisioned cluster is mutable.
    pub fn apply_update(&mut self, update: ClusterUpdate) -> Result<ClusterChange, ProvisioningError> {
        if let Some(count) = update.instances {
            if !(1..=MAX_CLUSTER_INSTANCES).contains(&count) {
                return Err(ProvisioningError::InvalidParameter {
                    name: "instances".to_string(),
                    reason: format!("{} is outside 1..={}", count, MAX_CLUSTER_INSTANCES),
                });
            }
        }
        if let Some(parameters) = &update.cluster_parameters {
            validate_parameters(parameters)?;
        }

        let mut change = ClusterChange::default();
        if let Some(count) = update.instances {
            let count = count as usize;
            if count < self.instances.len() {
                change.removed_instances = self
                    .instances
                    .drain(count..)
                    .map(|instance| instance.id)
                    .collect();
            } else if let Some(template) = self.instances.first().cloned() {
                for index in self.instances.len()..count {
                    let instance = self.instance_at(index, &template);
                    change.added_instances.push(instance.id.clone());
                    self.instances.push(instance);
                }
            }
        }
        if let Some(parameters) = update.cluster_parameters {
            change.parameters_changed = parameters != self.cluster_parameter_group.parameters;
            self.cluster_parameter_group.parameters = parameters;
        }

        info!(
            "Updated cluster {}: +{} -{} instances, parameters changed: {}",
            self.identifier,
            change.added_instances.len(),
            change.removed_instances.len(),
            change.parameters_changed
        );
        Ok(change)
    }
}

/// Resources the cluster is attached to
#[derive(Debug, Clone, Copy)]
pub struct DatabaseContext<'a> {
    pub env_name: &'a str,
    pub region: &'a str,
    pub network: &'a NetworkTopology,
    pub graph: &'a SecurityRuleGraph,
    pub security_group: &'a GroupId,
    pub credential: &'a CredentialRef,
}

/// Turns a [`DatabaseSpec`] into a [`DatabaseCluster`]
#[derive(Debug, Clone, Default)]
pub struct DatabaseProvisioner {
    catalog: InstanceClassCatalog,
}

impl DatabaseProvisioner {
    pub fn new(catalog: InstanceClassCatalog) -> Self {
        Self { catalog }
    }

    /// Isolated subnets, one per zone
    pub fn subnet_group(
        &self,
        env_name: &str,
        network: &NetworkTopology,
    ) -> Result<SubnetGroup, ProvisioningError> {
        let mut zones = Vec::new();
        let mut subnets = Vec::new();
        for subnet in network.subnets_in(SubnetTier::PrivateIsolated) {
            if !zones.contains(&subnet.zone) {
                zones.push(subnet.zone.clone());
                subnets.push(subnet.id.clone());
            }
        }
        if subnets.is_empty() {
            return Err(ProvisioningError::MissingTier(
                SubnetTier::PrivateIsolated.to_string(),
            ));
        }

        let group = SubnetGroup {
            id: ResourceId::from_static("SubnetGroup"),
            name: format!("{}-SubnetGroup", env_name),
            description: format!("Isolated subnets of the {} database", env_name),
            subnets,
            zones,
        };
        verify_subnet_group(&group, network)?;
        Ok(group)
    }

    /// Provision the cluster, its parameter groups and its subnet group
    ///
    /// # Errors
    /// - Invalid retention, instance count, windows or parameters
    /// - Instance class not offered in every placement zone
    /// - Subnet group not isolated-only or spanning fewer than two zones
    /// - Security group unknown to the rule graph
    pub fn provision(
        &self,
        spec: &DatabaseSpec,
        ctx: DatabaseContext<'_>,
    ) -> Result<DatabaseCluster, ProvisioningError> {
        spec.validate()?;
        if !ctx.graph.contains(ctx.security_group) {
            return Err(ProvisioningError::UnknownSecurityGroup(
                ctx.security_group.to_string(),
            ));
        }

        let subnet_group = self.subnet_group(ctx.env_name, ctx.network)?;
        if let Some(zone) = subnet_group
            .zones
            .iter()
            .find(|zone| !self.catalog.offers(&spec.engine.engine, &spec.instance_class, zone))
        {
            warn!(
                "Instance class {} unavailable for {} in {}",
                spec.instance_class, spec.engine, zone
            );
            return Err(ProvisioningError::InstanceClassUnavailable {
                class: spec.instance_class.clone(),
                engine: spec.engine.to_string(),
                zone: zone.clone(),
            });
        }

        let family = spec.engine.family();
        let cluster_parameter_group = ParameterGroup {
            id: ResourceId::from_static("DbClusterParameterGroup"),
            family: family.clone(),
            description: family.clone(),
            parameters: spec.cluster_parameters.clone(),
        };
        let instance_parameter_group = ParameterGroup {
            id: ResourceId::from_static("DbParameterGroup"),
            family: family.clone(),
            description: family,
            parameters: spec.instance_parameters.clone(),
        };

        let mut cluster = DatabaseCluster {
            id: ResourceId::from_static("DbCluster"),
            identifier: spec.cluster_identifier.clone(),
            engine: spec.engine.clone(),
            port: spec.port,
            endpoint: format!(
                "{}.cluster.{}.rds.amazonaws.com",
                spec.cluster_identifier, ctx.region
            ),
            cluster_parameter_group,
            instance_parameter_group,
            subnet_group,
            security_group: ctx.security_group.clone(),
            credential: ctx.credential.clone(),
            default_database_name: spec.default_database_name.clone(),
            instances: Vec::new(),
            backup: spec.backup.clone(),
            maintenance_window: spec.maintenance_window,
            deletion_protection: spec.deletion_protection,
            storage_encrypted: true,
            publicly_accessible: false,
            cloudwatch_logs_exports: spec.cloudwatch_logs_exports.clone(),
            log_retention_days: spec.log_retention_days,
            monitoring_interval_secs: spec.monitoring_interval_secs,
            copy_tags_to_snapshot: spec.copy_tags_to_snapshot,
            iam_authentication: spec.iam_authentication,
        };

        let template = DatabaseInstance {
            id: cluster.id.child("Instance1"),
            identifier: format!("{}1", cluster.identifier),
            instance_class: spec.instance_class.clone(),
            zone: String::new(),
            parameter_group: cluster.instance_parameter_group.id.clone(),
            auto_minor_version_upgrade: spec.auto_minor_version_upgrade,
            allow_major_version_upgrade: spec.allow_major_version_upgrade,
            performance_insights: spec.performance_insights,
        };
        cluster.instances = (0..spec.instances as usize)
            .map(|index| cluster.instance_at(index, &template))
            .collect();

        info!(
            "Provisioned cluster {} ({}, {} x {}) across {:?}",
            cluster.identifier,
            cluster.engine,
            cluster.instances.len(),
            spec.instance_class,
            cluster.subnet_group.zones
        );
        Ok(cluster)
    }
}

/// Subnet group members must be isolated and span at least two zones
pub fn verify_subnet_group(
    group: &SubnetGroup,
    network: &NetworkTopology,
) -> Result<(), ProvisioningError> {
    for id in &group.subnets {
        match network.subnet(id) {
            Some(subnet) if subnet.tier == SubnetTier::PrivateIsolated => {}
            _ => return Err(ProvisioningError::NonIsolatedSubnet(id.to_string())),
        }
    }
    if group.zones.len() < 2 {
        return Err(ProvisioningError::SubnetGroupTooNarrow(group.zones.len()));
    }
    Ok(())
}
