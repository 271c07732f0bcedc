// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for topology provisioning
//!
//! Every failure is detected while the resource graph is being built. A build
//! either yields a complete [`Topology`](crate::topology::Topology) or one of
//! these errors; nothing is partially applied.

use thiserror::Error;

use crate::domain::{NetworkError, ResourceId};
use crate::state_machine::TransitionError;
use crate::topology::invariants::ValidationError;

/// Address space or zone count cannot satisfy the requested network
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("At least {minimum} availability zones are required, {requested} requested")]
    TooFewZones { requested: usize, minimum: usize },

    #[error("Requested {requested} availability zones but only {available} are available")]
    InsufficientZones { requested: usize, available: usize },

    #[error("Subnet mask /{mask} for tier {tier} does not fit inside base block {base}")]
    MaskOutsideBlock { tier: String, mask: u8, base: String },

    #[error("Address space {base} exhausted allocating tier {tier} in zone {zone}")]
    AddressSpaceExhausted {
        base: String,
        tier: String,
        zone: String,
    },

    #[error("Tier {0} requires a public tier to host NAT gateways")]
    EgressWithoutPublicTier(String),

    #[error("Tier {0} requires at least one NAT gateway")]
    NoNatGateways(String),

    #[error("Tier kind {0} declared more than once")]
    DuplicateTier(String),

    #[error("No tiers declared")]
    NoTiers,

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Requested resource shape is unavailable or parameters are inconsistent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("Instance class {class} is not offered for {engine} in zone {zone}")]
    InstanceClassUnavailable {
        class: String,
        engine: String,
        zone: String,
    },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Subnet group must use isolated subnets only, found {0}")]
    NonIsolatedSubnet(String),

    #[error("Subnet group must span at least 2 zones, found {0}")]
    SubnetGroupTooNarrow(usize),

    #[error("Unknown security group {0}")]
    UnknownSecurityGroup(String),

    #[error("Security group {0} already exists")]
    DuplicateSecurityGroup(String),

    #[error("Ingress rule {from} -> {to} on port {port} already exists")]
    DuplicateRule { from: String, to: String, port: u16 },

    #[error("Security group {0} cannot grant ingress to itself")]
    SelfReferencingRule(String),

    #[error("Network has no {0} subnets")]
    MissingTier(String),

    #[error("Secret {0} already exists")]
    DuplicateSecret(String),

    #[error("Password policy cannot be satisfied: {0}")]
    UnsatisfiablePasswordPolicy(String),

    #[error("Security rule set differs from the documented closure: {0}")]
    ClosureViolation(String),

    #[error("Access policy is broader than allowed: {0}")]
    PolicyTooBroad(String),
}

/// Credential rotation could not be scheduled or executed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RotationError {
    #[error("Rotation already in flight for {0}")]
    AlreadyInFlight(String),

    #[error("Rotation already scheduled for {0}")]
    AlreadyScheduled(String),

    #[error("Rotation target unreachable for {secret}: {reason}")]
    TargetUnreachable { secret: String, reason: String },

    #[error("No rotation scheduled for {0}")]
    NotScheduled(String),

    #[error("Secret {0} is not held by the vault")]
    UnknownSecret(String),

    #[error("Rotation interval must be between 1 and 1000 days, got {0}")]
    InvalidInterval(u32),

    #[error("Rotation of {secret} cannot generate a password: {reason}")]
    UnsatisfiablePolicy { secret: String, reason: String },

    #[error("Rotation of {secret} at {at} falls outside the representable time range")]
    TimeOutOfRange { secret: String, at: String },
}

/// Access policy could not be issued
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Secret {0} does not exist")]
    UnknownSecret(String),
}

/// Errors that can occur while building or tearing down a topology
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Network allocation failed
    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// Resource provisioning failed
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Credential rotation failed
    #[error("Rotation error: {0}")]
    Rotation(#[from] RotationError),

    /// Access policy issuance failed
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// A resource was removed while live dependents exist
    #[error("Dependency violation: {resource} is still required by {dependents:?}")]
    DependencyViolation {
        resource: ResourceId,
        dependents: Vec<ResourceId>,
    },

    /// A resource was created before one of its dependencies
    #[error("Dependency violation: {resource} requires {dependency}, which is not live")]
    MissingDependency {
        resource: ResourceId,
        dependency: ResourceId,
    },

    /// The same logical id was registered twice
    #[error("Duplicate resource: {0}")]
    DuplicateResource(ResourceId),

    /// A built topology broke one of its invariants
    #[error("Invariant violated: {0}")]
    Invariant(#[from] ValidationError),

    /// A lifecycle transition was refused
    #[error("Lifecycle error on {resource}: {source}")]
    Lifecycle {
        resource: ResourceId,
        source: TransitionError,
    },

    /// A resource id is not registered
    #[error("Unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// A simulated client connection was refused
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;

impl From<serde_json::Error> for TopologyError {
    fn from(err: serde_json::Error) -> Self {
        TopologyError::Serialization(err.to_string())
    }
}

impl From<NetworkError> for TopologyError {
    fn from(err: NetworkError) -> Self {
        TopologyError::Configuration(err.to_string())
    }
}
