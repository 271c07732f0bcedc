// Copyright (c) 2025 - Cowboy AI, Inc.
//! Deployment environment profiles
//!
//! The profile is selected once when a build starts and threaded through the
//! builder. Per-environment differences live in [`EnvironmentParameters`],
//! never in string comparisons scattered across components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown environment: {0} (expected dev or prd)")]
pub struct UnknownEnvironment(pub String);

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentProfile {
    #[default]
    #[serde(alias = "development")]
    Dev,
    #[serde(rename = "prd", alias = "prod", alias = "production")]
    Prod,
}

/// Parameter set carried by an environment profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentParameters {
    /// Short environment name used as a resource name prefix
    pub env_name: String,
    /// Database administrator user name
    pub db_user_name: String,
    /// Default database name
    pub db_name: String,
    /// Whether the cluster refuses deletion
    pub deletion_protection: bool,
    /// Number of cluster instances
    pub instance_count: u32,
    /// Automated backup retention in days
    pub backup_retention_days: u32,
}

impl EnvironmentProfile {
    /// Short name, `dev` or `prd`
    pub fn name(&self) -> &'static str {
        match self {
            EnvironmentProfile::Dev => "dev",
            EnvironmentProfile::Prod => "prd",
        }
    }

    /// Default parameter set for this environment
    pub fn parameters(&self) -> EnvironmentParameters {
        let env = self.name();
        match self {
            EnvironmentProfile::Dev => EnvironmentParameters {
                env_name: env.to_string(),
                db_user_name: format!("{}Admin", env),
                db_name: format!("{}_cdk_prisma", env),
                deletion_protection: false,
                instance_count: 1,
                backup_retention_days: 7,
            },
            EnvironmentProfile::Prod => EnvironmentParameters {
                env_name: env.to_string(),
                db_user_name: format!("{}Admin", env),
                db_name: format!("{}_cdk_prisma", env),
                deletion_protection: true,
                instance_count: 2,
                backup_retention_days: 14,
            },
        }
    }
}

impl fmt::Display for EnvironmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EnvironmentProfile {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(EnvironmentProfile::Dev),
            "prd" | "prod" | "production" => Ok(EnvironmentProfile::Prod),
            other => Err(UnknownEnvironment(other.to_string())),
        }
    }
}
