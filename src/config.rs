// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology configuration
//!
//! A [`TopologyConfig`] starts from the selected [`EnvironmentProfile`] and
//! accepts per-field overrides from the environment (`TOPOLOGY_*`) or JSON.
//! The profile is resolved once, in [`TopologyConfig::into_build_inputs`],
//! and handed to the builder explicitly.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::domain::{EnvironmentParameters, EnvironmentProfile, Ipv4Cidr};
use crate::errors::{TopologyError, TopologyResult};
use crate::provision::bastion::DEFAULT_KEY_PAIR_NAME;
use crate::provision::database::DatabaseSpec;
use crate::provision::network::NetworkSpec;
use crate::provision::security::SecurityPosture;
use crate::provision::vault::PasswordPolicy;

pub const DEFAULT_REGION: &str = "ap-northeast-1";
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";
pub const DEFAULT_CIDR: &str = "10.100.0.0/16";
pub const DEFAULT_ROTATION_INTERVAL_DAYS: u32 = 3;
pub const DEFAULT_ROTATION_GRACE_MINUTES: i64 = 60;
/// Longest accepted grace window, one week
pub const MAX_ROTATION_GRACE_MINUTES: i64 = 7 * 24 * 60;

const ENV_PREFIX: &str = "TOPOLOGY_";

/// User-facing topology inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub environment: EnvironmentProfile,
    pub db_user_name: String,
    pub db_name: String,
    pub cidr: Ipv4Cidr,
    pub az_count: usize,
    /// Zones offered by the region, in preference order
    pub available_zones: Vec<String>,
    pub nat_gateways: usize,
    pub instance_class: String,
    pub instance_count: u32,
    pub backup_retention_days: u32,
    pub deletion_protection: bool,
    pub rotation_interval_days: u32,
    /// How long a rotated-out password keeps authenticating
    pub rotation_grace_minutes: i64,
    pub region: String,
    pub account_id: String,
    pub security_posture: SecurityPosture,
    pub key_pair_name: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self::for_profile(EnvironmentProfile::default())
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> TopologyResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    match lookup(&name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TopologyError::Configuration(format!("{}={:?}: {}", name, raw, e))),
    }
}

impl TopologyConfig {
    /// Defaults for one environment
    pub fn for_profile(profile: EnvironmentProfile) -> Self {
        let params = profile.parameters();
        Self {
            environment: profile,
            db_user_name: params.db_user_name,
            db_name: params.db_name,
            cidr: Ipv4Cidr::DEFAULT_NETWORK,
            az_count: 2,
            available_zones: vec![
                "ap-northeast-1a".to_string(),
                "ap-northeast-1c".to_string(),
                "ap-northeast-1d".to_string(),
            ],
            nat_gateways: 1,
            instance_class: "db.t3.medium".to_string(),
            instance_count: params.instance_count,
            backup_retention_days: params.backup_retention_days,
            deletion_protection: params.deletion_protection,
            rotation_interval_days: DEFAULT_ROTATION_INTERVAL_DAYS,
            rotation_grace_minutes: DEFAULT_ROTATION_GRACE_MINUTES,
            region: DEFAULT_REGION.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            security_posture: SecurityPosture::default(),
            key_pair_name: DEFAULT_KEY_PAIR_NAME.to_string(),
        }
    }

    /// Load from `TOPOLOGY_*` environment variables
    ///
    /// Unset variables keep the profile default; unparsable ones are
    /// reported, never ignored.
    pub fn from_env() -> TopologyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source using the `TOPOLOGY_*` names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TopologyResult<Self> {
        let profile = match lookup("TOPOLOGY_ENV") {
            Some(raw) => raw
                .parse::<EnvironmentProfile>()
                .map_err(|e| TopologyError::Configuration(e.to_string()))?,
            None => EnvironmentProfile::default(),
        };
        let mut config = Self::for_profile(profile);

        if let Some(v) = lookup("TOPOLOGY_DB_USER") {
            config.db_user_name = v;
        }
        if let Some(v) = lookup("TOPOLOGY_DB_NAME") {
            config.db_name = v;
        }
        if let Some(v) = parse_override(&lookup, "CIDR")? {
            config.cidr = v;
        }
        if let Some(v) = parse_override(&lookup, "AZ_COUNT")? {
            config.az_count = v;
        }
        if let Some(v) = lookup("TOPOLOGY_ZONES") {
            config.available_zones = v
                .split(',')
                .map(str::trim)
                .filter(|z| !z.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = parse_override(&lookup, "NAT_GATEWAYS")? {
            config.nat_gateways = v;
        }
        if let Some(v) = lookup("TOPOLOGY_INSTANCE_CLASS") {
            config.instance_class = v;
        }
        if let Some(v) = parse_override(&lookup, "INSTANCE_COUNT")? {
            config.instance_count = v;
        }
        if let Some(v) = parse_override(&lookup, "BACKUP_RETENTION_DAYS")? {
            config.backup_retention_days = v;
        }
        if let Some(v) = parse_override(&lookup, "DELETION_PROTECTION")? {
            config.deletion_protection = v;
        }
        if let Some(v) = parse_override(&lookup, "ROTATION_DAYS")? {
            config.rotation_interval_days = v;
        }
        if let Some(v) = parse_override(&lookup, "ROTATION_GRACE_MINUTES")? {
            config.rotation_grace_minutes = v;
        }
        if let Some(v) = lookup("TOPOLOGY_REGION") {
            config.region = v;
        }
        if let Some(v) = lookup("TOPOLOGY_ACCOUNT_ID") {
            config.account_id = v;
        }
        if let Some(v) = lookup("TOPOLOGY_SECURITY_POSTURE") {
            config.security_posture = match v.trim().to_ascii_lowercase().as_str() {
                "standard" => SecurityPosture::Standard,
                "strict" => SecurityPosture::Strict,
                other => {
                    return Err(TopologyError::Configuration(format!(
                        "TOPOLOGY_SECURITY_POSTURE={:?}: expected standard or strict",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("TOPOLOGY_KEY_PAIR") {
            config.key_pair_name = v;
        }
        Ok(config)
    }

    /// Parse JSON; absent fields take the selected profile's defaults
    pub fn from_json(json: &str) -> TopologyResult<Self> {
        let overrides: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Object(overrides) = overrides else {
            return Err(TopologyError::Configuration(
                "configuration must be a JSON object".to_string(),
            ));
        };

        let profile = match overrides.get("environment") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => EnvironmentProfile::default(),
        };
        let mut merged = serde_json::to_value(Self::for_profile(profile))?;
        if let serde_json::Value::Object(base) = &mut merged {
            base.extend(overrides);
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Validate and resolve into the builder's inputs
    pub fn into_build_inputs(self) -> TopologyResult<BuildInputs> {
        if self.db_user_name.trim().is_empty() {
            return Err(TopologyError::Configuration(
                "database user name must not be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() || self.account_id.trim().is_empty() {
            return Err(TopologyError::Configuration(
                "region and account id are required".to_string(),
            ));
        }
        if !(0..=MAX_ROTATION_GRACE_MINUTES).contains(&self.rotation_grace_minutes) {
            return Err(TopologyError::Configuration(format!(
                "rotation grace window must be between 0 and {} minutes, got {}",
                MAX_ROTATION_GRACE_MINUTES, self.rotation_grace_minutes
            )));
        }
        let rotation_grace = Duration::try_minutes(self.rotation_grace_minutes).ok_or_else(|| {
            TopologyError::Configuration(format!(
                "rotation grace window of {} minutes is out of range",
                self.rotation_grace_minutes
            ))
        })?;

        let parameters = EnvironmentParameters {
            env_name: self.environment.name().to_string(),
            db_user_name: self.db_user_name,
            db_name: self.db_name,
            deletion_protection: self.deletion_protection,
            instance_count: self.instance_count,
            backup_retention_days: self.backup_retention_days,
        };

        let mut network = NetworkSpec::three_tier(self.cidr, self.az_count, self.available_zones);
        network.nat_gateways = self.nat_gateways;

        let mut database = DatabaseSpec::for_environment(&parameters);
        database.instance_class = self.instance_class;

        Ok(BuildInputs {
            profile: self.environment,
            parameters,
            network,
            database,
            password_policy: PasswordPolicy::default(),
            rotation_interval_days: self.rotation_interval_days,
            rotation_grace,
            region: self.region,
            account_id: self.account_id,
            security_posture: self.security_posture,
            key_pair_name: self.key_pair_name,
        })
    }
}

/// Resolved inputs of one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInputs {
    pub profile: EnvironmentProfile,
    pub parameters: EnvironmentParameters,
    pub network: NetworkSpec,
    pub database: DatabaseSpec,
    pub password_policy: PasswordPolicy,
    pub rotation_interval_days: u32,
    pub rotation_grace: Duration,
    pub region: String,
    pub account_id: String,
    pub security_posture: SecurityPosture,
    pub key_pair_name: String,
}
