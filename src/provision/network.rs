// Copyright (c) 2025 - Cowboy AI, Inc.
//! Network Allocator
//!
//! Derives a virtual network with tiered subnets across availability zones
//! from one base CIDR block. Blocks are carved sequentially, tier by tier and
//! zone by zone, each aligned to its own size:
//!
//! ```text
//! 10.100.0.0/16
//!   Public    a: 10.100.0.0/24   c: 10.100.1.0/24   → internet gateway
//!   Private   a: 10.100.2.0/24   c: 10.100.3.0/24   → NAT gateway
//!   Isolated  a: 10.100.4.0/24   c: 10.100.5.0/24   (no outbound route)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

use crate::domain::{Ipv4Cidr, ResourceId};
use crate::errors::AllocationError;

/// Minimum number of zones a network must span
pub const MIN_AVAILABILITY_ZONES: usize = 2;

/// Routing exposure class of a subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetTier {
    /// Direct route to the internet gateway
    Public,
    /// Outbound only, through a shared NAT gateway
    PrivateWithEgress,
    /// No outbound route at all
    PrivateIsolated,
}

impl fmt::Display for SubnetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetTier::Public => write!(f, "public"),
            SubnetTier::PrivateWithEgress => write!(f, "private_with_egress"),
            SubnetTier::PrivateIsolated => write!(f, "private_isolated"),
        }
    }
}

/// One subnet tier of the requested network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Name used in subnet ids (`Public`, `Private`, `Isolated`)
    pub name: String,
    pub tier: SubnetTier,
    /// Prefix length of each subnet in this tier
    pub cidr_mask: u8,
}

impl TierSpec {
    pub fn new(name: impl Into<String>, tier: SubnetTier, cidr_mask: u8) -> Self {
        Self {
            name: name.into(),
            tier,
            cidr_mask,
        }
    }
}

/// Allocation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub id: ResourceId,
    pub cidr: Ipv4Cidr,
    pub az_count: usize,
    /// Zones offered by the region, in preference order
    pub available_zones: Vec<String>,
    pub nat_gateways: usize,
    pub tiers: Vec<TierSpec>,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
}

impl NetworkSpec {
    /// Three `/24` tiers with a single shared NAT gateway
    pub fn three_tier(cidr: Ipv4Cidr, az_count: usize, available_zones: Vec<String>) -> Self {
        Self {
            id: ResourceId::from_static("Vpc"),
            cidr,
            az_count,
            available_zones,
            nat_gateways: 1,
            tiers: vec![
                TierSpec::new("Public", SubnetTier::Public, 24),
                TierSpec::new("Private", SubnetTier::PrivateWithEgress, 24),
                TierSpec::new("Isolated", SubnetTier::PrivateIsolated, 24),
            ],
            enable_dns_hostnames: true,
            enable_dns_support: true,
        }
    }
}

/// Next hop of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RouteTarget {
    InternetGateway(ResourceId),
    NatGateway(ResourceId),
}

/// Route table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: Ipv4Cidr,
    pub target: RouteTarget,
}

/// An allocated subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: ResourceId,
    pub tier: SubnetTier,
    pub zone: String,
    pub cidr: Ipv4Cidr,
    pub routes: Vec<Route>,
    pub map_public_ip_on_launch: bool,
}

impl Subnet {
    /// Whether any route leaves the network
    pub fn has_outbound_route(&self) -> bool {
        !self.routes.is_empty()
    }
}

/// NAT gateway hosted in a public subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGateway {
    pub id: ResourceId,
    pub subnet: ResourceId,
    pub zone: String,
}

/// Allocated network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub id: ResourceId,
    pub cidr: Ipv4Cidr,
    pub zones: Vec<String>,
    pub subnets: Vec<Subnet>,
    pub internet_gateway: Option<ResourceId>,
    pub nat_gateways: Vec<NatGateway>,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
}

impl NetworkTopology {
    /// Subnets of one tier, in zone order
    pub fn subnets_in(&self, tier: SubnetTier) -> Vec<&Subnet> {
        self.subnets.iter().filter(|s| s.tier == tier).collect()
    }

    /// Ids of the subnets of one tier, in zone order
    pub fn subnet_ids(&self, tier: SubnetTier) -> Vec<ResourceId> {
        self.subnets_in(tier).into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn has_tier(&self, tier: SubnetTier) -> bool {
        self.subnets.iter().any(|s| s.tier == tier)
    }

    pub fn subnet(&self, id: &ResourceId) -> Option<&Subnet> {
        self.subnets.iter().find(|s| &s.id == id)
    }
}

/// Carves [`NetworkTopology`] values out of a [`NetworkSpec`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkAllocator;

impl NetworkAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Allocate subnets for every tier in every zone
    ///
    /// # Errors
    /// - Fewer than two zones, or more zones than the region offers
    /// - A tier mask that cannot fit in the base block
    /// - Address space exhausted
    /// - An egress tier without a public tier or NAT gateway
    pub fn allocate(&self, spec: &NetworkSpec) -> Result<NetworkTopology, AllocationError> {
        Self::validate(spec)?;

        let zones: Vec<String> = spec
            .available_zones
            .iter()
            .take(spec.az_count)
            .cloned()
            .collect();

        let has_public = spec.tiers.iter().any(|t| t.tier == SubnetTier::Public);
        let internet_gateway = has_public.then(|| spec.id.child("IGW"));
        let any_route: Ipv4Cidr = Ipv4Cidr::new(std::net::Ipv4Addr::UNSPECIFIED, 0)?;

        let mut offset = 0u64;
        let mut subnets = Vec::with_capacity(spec.tiers.len() * zones.len());
        for tier in &spec.tiers {
            for (index, zone) in zones.iter().enumerate() {
                let (cidr, next) = spec.cidr.carve(offset, tier.cidr_mask).ok_or_else(|| {
                    AllocationError::AddressSpaceExhausted {
                        base: spec.cidr.to_string(),
                        tier: tier.name.clone(),
                        zone: zone.clone(),
                    }
                })?;
                offset = next;

                let id = spec.id.child(&format!("{}Subnet{}", tier.name, index + 1));
                debug!("Allocated {} subnet {} ({}) in {}", tier.tier, id, cidr, zone);

                subnets.push(Subnet {
                    id,
                    tier: tier.tier,
                    zone: zone.clone(),
                    cidr,
                    routes: Vec::new(),
                    map_public_ip_on_launch: tier.tier == SubnetTier::Public,
                });
            }
        }

        // NAT gateways live in the first public subnets, one per zone at most
        let nat_count = if spec.tiers.iter().any(|t| t.tier == SubnetTier::PrivateWithEgress) {
            spec.nat_gateways.min(zones.len())
        } else {
            0
        };
        let nat_gateways: Vec<NatGateway> = subnets
            .iter()
            .filter(|s| s.tier == SubnetTier::Public)
            .take(nat_count)
            .map(|s| NatGateway {
                id: s.id.child("NATGateway"),
                subnet: s.id.clone(),
                zone: s.zone.clone(),
            })
            .collect();

        for subnet in &mut subnets {
            match subnet.tier {
                SubnetTier::Public => {
                    if let Some(igw) = &internet_gateway {
                        subnet.routes.push(Route {
                            destination: any_route,
                            target: RouteTarget::InternetGateway(igw.clone()),
                        });
                    }
                }
                SubnetTier::PrivateWithEgress => {
                    let nat = nat_gateways
                        .iter()
                        .find(|n| n.zone == subnet.zone)
                        .or_else(|| nat_gateways.first());
                    if let Some(nat) = nat {
                        subnet.routes.push(Route {
                            destination: any_route,
                            target: RouteTarget::NatGateway(nat.id.clone()),
                        });
                    }
                }
                SubnetTier::PrivateIsolated => {}
            }
        }

        info!(
            "Allocated network {} ({}) with {} subnets across {} zones",
            spec.id,
            spec.cidr,
            subnets.len(),
            zones.len()
        );

        Ok(NetworkTopology {
            id: spec.id.clone(),
            cidr: spec.cidr,
            zones,
            subnets,
            internet_gateway,
            nat_gateways,
            enable_dns_hostnames: spec.enable_dns_hostnames,
            enable_dns_support: spec.enable_dns_support,
        })
    }

    fn validate(spec: &NetworkSpec) -> Result<(), AllocationError> {
        if spec.tiers.is_empty() {
            return Err(AllocationError::NoTiers);
        }

        let mut seen = HashSet::new();
        for tier in &spec.tiers {
            if !seen.insert(tier.tier) {
                return Err(AllocationError::DuplicateTier(tier.tier.to_string()));
            }
            if tier.cidr_mask < spec.cidr.prefix_len() || tier.cidr_mask > 32 {
                return Err(AllocationError::MaskOutsideBlock {
                    tier: tier.name.clone(),
                    mask: tier.cidr_mask,
                    base: spec.cidr.to_string(),
                });
            }
        }

        if spec.az_count < MIN_AVAILABILITY_ZONES {
            return Err(AllocationError::TooFewZones {
                requested: spec.az_count,
                minimum: MIN_AVAILABILITY_ZONES,
            });
        }
        if spec.az_count > spec.available_zones.len() {
            return Err(AllocationError::InsufficientZones {
                requested: spec.az_count,
                available: spec.available_zones.len(),
            });
        }

        if let Some(egress) = spec
            .tiers
            .iter()
            .find(|t| t.tier == SubnetTier::PrivateWithEgress)
        {
            if !seen.contains(&SubnetTier::Public) {
                return Err(AllocationError::EgressWithoutPublicTier(egress.name.clone()));
            }
            if spec.nat_gateways == 0 {
                return Err(AllocationError::NoNatGateways(egress.name.clone()));
            }
        }

        Ok(())
    }
}
