// Copyright (c) 2025 - Cowboy AI, Inc.
//! Network Value Objects with Validation Invariants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Network validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("Invalid prefix length: {0} (must be 0-32 for IPv4)")]
    InvalidPrefixLength(u8),

    #[error("Host bits set in network address: {0}")]
    HostBitsSet(String),

    #[error("Invalid port: {0}")]
    InvalidPort(u16),
}

/// IPv4 network block in CIDR notation
///
/// Invariants:
/// - Prefix length 0-32
/// - Network address has no host bits set
///
/// # Examples
///
/// ```rust
/// use cim_topology::domain::Ipv4Cidr;
///
/// let block: Ipv4Cidr = "10.100.0.0/16".parse().unwrap();
/// assert_eq!(block.prefix_len(), 16);
/// assert_eq!(block.size(), 65536);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// `10.100.0.0/16`, the default base block of a topology network
    pub const DEFAULT_NETWORK: Ipv4Cidr = Ipv4Cidr {
        address: Ipv4Addr::new(10, 100, 0, 0),
        prefix_len: 16,
    };

    /// Create a network block from an address and prefix length
    ///
    /// # Invariants
    /// - Prefix length must be <= 32
    /// - Address must be the network address of the block
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        if prefix_len > 32 {
            return Err(NetworkError::InvalidPrefixLength(prefix_len));
        }

        let raw = u32::from(address);
        if raw & !Self::mask_bits(prefix_len) != 0 {
            return Err(NetworkError::HostBitsSet(format!("{}/{}", address, prefix_len)));
        }

        Ok(Self {
            address,
            prefix_len,
        })
    }

    fn mask_bits(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    /// Network address
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// First address as an integer
    pub fn first(&self) -> u64 {
        u64::from(u32::from(self.address))
    }

    /// Last address as an integer (inclusive)
    pub fn last(&self) -> u64 {
        self.first() + self.size() - 1
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.first() >= self.first() && other.last() <= self.last()
    }

    /// Whether the two blocks share any address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }

    /// Carve a `/prefix_len` block starting at or after `offset` addresses into
    /// this block, aligned to its own size.
    ///
    /// Returns the block and the offset just past it, or `None` when the block
    /// would fall outside this network.
    pub fn carve(&self, offset: u64, prefix_len: u8) -> Option<(Ipv4Cidr, u64)> {
        if prefix_len < self.prefix_len || prefix_len > 32 {
            return None;
        }

        let size = 1u64 << (32 - u32::from(prefix_len));
        let aligned = offset.div_ceil(size) * size;
        if aligned + size > self.size() {
            return None;
        }

        let start = u32::try_from(self.first() + aligned).ok()?;
        let block = Ipv4Cidr::new(Ipv4Addr::from(start), prefix_len).ok()?;
        Some((block, aligned + size))
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, prefix_str) = s
            .split_once('/')
            .ok_or_else(|| NetworkError::InvalidCidr(s.to_string()))?;

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidIpAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidCidr(s.to_string()))?;

        Self::new(address, prefix_len)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(value: Ipv4Cidr) -> Self {
        value.to_string()
    }
}

/// Transport protocol for ingress rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// TCP/UDP port value object
///
/// Invariants:
/// - Port 0 is reserved and rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(u16);

impl Port {
    /// PostgreSQL default port
    pub const POSTGRES: Port = Port(5432);

    pub fn new(port: u16) -> Result<Self, NetworkError> {
        if port == 0 {
            return Err(NetworkError::InvalidPort(port));
        }
        Ok(Self(port))
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
