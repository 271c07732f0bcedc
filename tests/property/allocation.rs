// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Network Allocation
//!
//! Whatever base block and zone count are requested, an allocation either
//! fails with an error or yields disjoint subnets inside the block, with
//! every tier present in every zone.

use cim_topology::domain::Ipv4Cidr;
use cim_topology::provision::network::{NetworkAllocator, NetworkSpec, SubnetTier};
use cim_topology::topology::invariants::validate_network;
use cim_topology::AllocationError;
use proptest::prelude::*;
use std::net::Ipv4Addr;

const ZONES: [&str; 4] = [
    "ap-northeast-1a",
    "ap-northeast-1c",
    "ap-northeast-1d",
    "ap-northeast-1b",
];

fn base_block() -> impl Strategy<Value = Ipv4Cidr> {
    (any::<u32>(), 8u8..=24).prop_map(|(raw, prefix)| {
        let mask = u32::MAX << (32 - u32::from(prefix));
        Ipv4Cidr::new(Ipv4Addr::from(raw & mask), prefix).unwrap()
    })
}

fn spec(cidr: Ipv4Cidr, az_count: usize) -> NetworkSpec {
    NetworkSpec::three_tier(cidr, az_count, ZONES.iter().map(|z| z.to_string()).collect())
}

proptest! {
    /// Property: subnets never overlap and never leave the base block
    #[test]
    fn prop_subnets_disjoint_inside_block(cidr in base_block(), az_count in 2usize..=4) {
        match NetworkAllocator::new().allocate(&spec(cidr, az_count)) {
            Ok(network) => {
                prop_assert_eq!(network.subnets.len(), 3 * az_count);
                prop_assert!(validate_network(&network).is_ok());
                for (i, a) in network.subnets.iter().enumerate() {
                    prop_assert!(cidr.contains(&a.cidr));
                    for b in &network.subnets[i + 1..] {
                        prop_assert!(!a.cidr.overlaps(&b.cidr));
                    }
                }
            }
            Err(e) => {
                // Only a block too small for nine /24s may fail
                prop_assert!(cidr.prefix_len() > 20, "unexpected failure {:?}", e);
            }
        }
    }

    /// Property: a /20 or larger always holds three /24 tiers in up to four zones
    #[test]
    fn prop_large_blocks_always_allocate(cidr in base_block(), az_count in 2usize..=4) {
        prop_assume!(cidr.prefix_len() <= 20);
        let network = NetworkAllocator::new().allocate(&spec(cidr, az_count)).unwrap();

        for tier in [SubnetTier::Public, SubnetTier::PrivateWithEgress, SubnetTier::PrivateIsolated] {
            prop_assert_eq!(network.subnets_in(tier).len(), az_count);
        }
        prop_assert!(network
            .subnets_in(SubnetTier::PrivateIsolated)
            .iter()
            .all(|s| !s.has_outbound_route()));
    }

    /// Property: fewer than two zones is always refused
    #[test]
    fn prop_single_zone_refused(cidr in base_block(), az_count in 0usize..2) {
        let result = NetworkAllocator::new().allocate(&spec(cidr, az_count));
        let is_too_few = matches!(result, Err(AllocationError::TooFewZones { .. }));
        prop_assert!(is_too_few);
    }
}
