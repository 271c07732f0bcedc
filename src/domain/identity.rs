// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stable resource identities
//!
//! Resources reference each other through these identifiers, never through
//! addresses or live handles, so that a serialized graph can be diffed and a
//! replaced resource does not invalidate the configuration of its consumers.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Resource ID cannot be empty")]
    EmptyResourceId,

    #[error("Resource ID contains invalid characters: {0}")]
    InvalidResourceId(String),
}

/// Logical identifier of a resource inside one topology
///
/// Invariants:
/// - Not empty
/// - ASCII alphanumerics, `-` and `_` only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Cow<'static, str>);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentityError::EmptyResourceId);
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(IdentityError::InvalidResourceId(id));
        }
        Ok(Self(Cow::Owned(id)))
    }

    /// Logical id known at compile time
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// Derive a child id such as `VpcPublicSubnet1`
    pub fn child(&self, suffix: &str) -> Self {
        Self(Cow::Owned(format!("{}{}", self.0, suffix)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Security groups are plain resources referenced by id
pub type GroupId = ResourceId;

/// Amazon Resource Name equivalent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arn(String);

impl Arn {
    /// ARN of a Secrets Manager secret
    pub fn secret(region: &str, account_id: &str, name: &str) -> Self {
        Self(format!(
            "arn:aws:secretsmanager:{}:{}:secret:{}",
            region, account_id, name
        ))
    }

    /// ARN of an AWS managed IAM policy
    pub fn aws_managed_policy(name: &str) -> Self {
        Self(format!("arn:aws:iam::aws:policy/{}", name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pointer to a stored credential
///
/// Holding a `CredentialRef` never grants access to the secret value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialRef {
    name: String,
    arn: Arn,
}

impl CredentialRef {
    pub(crate) fn new(name: impl Into<String>, arn: Arn) -> Self {
        Self {
            name: name.into(),
            arn,
        }
    }

    /// Secret name, e.g. `dev-db-cluster/AdminLoginInfo`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self) -> &Arn {
        &self.arn
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arn)
    }
}

/// Kind of a node in the resource graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    InternetGateway,
    NatGateway,
    SecurityGroup,
    Secret,
    ClusterParameterGroup,
    InstanceParameterGroup,
    SubnetGroup,
    DatabaseCluster,
    DatabaseInstance,
    DatabaseProxy,
    SecretRotation,
    ManagedPolicy,
    Role,
    KeyPair,
    Instance,
    ElasticIp,
    ElasticIpAssociation,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::NatGateway => "nat_gateway",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Secret => "secret",
            ResourceKind::ClusterParameterGroup => "cluster_parameter_group",
            ResourceKind::InstanceParameterGroup => "instance_parameter_group",
            ResourceKind::SubnetGroup => "subnet_group",
            ResourceKind::DatabaseCluster => "database_cluster",
            ResourceKind::DatabaseInstance => "database_instance",
            ResourceKind::DatabaseProxy => "database_proxy",
            ResourceKind::SecretRotation => "secret_rotation",
            ResourceKind::ManagedPolicy => "managed_policy",
            ResourceKind::Role => "role",
            ResourceKind::KeyPair => "key_pair",
            ResourceKind::Instance => "instance",
            ResourceKind::ElasticIp => "elastic_ip",
            ResourceKind::ElasticIpAssociation => "elastic_ip_association",
        };
        write!(f, "{}", name)
    }
}
