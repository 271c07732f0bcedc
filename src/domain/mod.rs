// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology Domain Models
//!
//! Value objects shared by every component.
//!
//! # Value Objects with Invariants
//!
//! - [`Ipv4Cidr`] - IPv4 block with no host bits set
//! - [`Port`] - Non-zero TCP/UDP port
//! - [`ResourceId`] - Stable logical id of a graph node
//! - [`Arn`] / [`CredentialRef`] - Opaque references to platform resources
//! - [`EnvironmentProfile`] - `dev` or `prd`, carrying its parameter set

pub mod environment;
pub mod identity;
pub mod network;

pub use environment::{EnvironmentParameters, EnvironmentProfile, UnknownEnvironment};
pub use identity::{Arn, CredentialRef, GroupId, IdentityError, ResourceId, ResourceKind};
pub use network::{Ipv4Cidr, NetworkError, Port, Protocol};
