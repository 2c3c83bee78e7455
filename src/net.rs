//! Dotted-decimal IPv4 arithmetic
//!
//! Thin wrappers over `std::net::Ipv4Addr` and `ipnetwork::Ipv4Network`
//! that keep the strict parsing rules route forms need: no clamping, no
//! non-contiguous masks.

use ipnetwork::{ipv4_mask_to_prefix, Ipv4Network};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),
    #[error("Invalid subnet mask: {0}")]
    InvalidMask(String),
    #[error("Invalid prefix length: {0}")]
    InvalidPrefix(u8),
}

/// An IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkAddress(Ipv4Addr);

impl NetworkAddress {
    pub const fn new(addr: Ipv4Addr) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> Ipv4Addr {
        self.0
    }

    pub fn bits(self) -> u32 {
        u32::from(self.0)
    }

    pub fn octets(self) -> [u8; 4] {
        self.0.octets()
    }
}

impl From<Ipv4Addr> for NetworkAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr)
    }
}

impl From<[u8; 4]> for NetworkAddress {
    fn from(octets: [u8; 4]) -> Self {
        Self(Ipv4Addr::from(octets))
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkAddress {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ipv4(s)
    }
}

/// CIDR prefix length in `0..=32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixLength(u8);

impl PrefixLength {
    pub const HOST: Self = Self(32);
    /// Assumed for directly-connected interfaces whose mask is unknown
    pub const CLASS_C: Self = Self(24);

    pub fn new(value: u8) -> Result<Self, NetError> {
        Ipv4Network::new(Ipv4Addr::UNSPECIFIED, value)
            .map(|_| Self(value))
            .map_err(|_| NetError::InvalidPrefix(value))
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// The network of `addr` at this prefix
    pub fn network_of(self, addr: Ipv4Addr) -> Ipv4Network {
        // `new` already rejected anything above 32
        Ipv4Network::new(addr, self.0).unwrap_or_else(|_| Ipv4Network::from(addr))
    }

    pub fn mask_bits(self) -> u32 {
        u32::from(self.network_of(Ipv4Addr::UNSPECIFIED).mask())
    }

    pub fn to_mask(self) -> NetworkAddress {
        NetworkAddress(self.network_of(Ipv4Addr::UNSPECIFIED).mask())
    }
}

impl fmt::Display for PrefixLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse exactly four dot-separated decimal octets.
///
/// Surrounding whitespace is ignored; anything else that is not four
/// octets in `0..=255` is rejected rather than clamped.
pub fn parse_ipv4(text: &str) -> Result<NetworkAddress, NetError> {
    text.trim()
        .parse::<Ipv4Addr>()
        .map(NetworkAddress)
        .map_err(|_| NetError::InvalidAddress(text.to_string()))
}

/// Convert a dotted-decimal netmask into its prefix length.
///
/// Only contiguous masks (`1*0*`) are accepted.
pub fn mask_to_prefix_length(text: &str) -> Result<PrefixLength, NetError> {
    let mask = parse_ipv4(text).map_err(|_| NetError::InvalidMask(text.to_string()))?;
    ipv4_mask_to_prefix(mask.0)
        .map(PrefixLength)
        .map_err(|_| NetError::InvalidMask(text.to_string()))
}

pub fn network_address(ip: NetworkAddress, prefix: PrefixLength) -> NetworkAddress {
    NetworkAddress(prefix.network_of(ip.0).network())
}

pub fn format_ipv4(addr: NetworkAddress) -> String {
    addr.to_string()
}

/// Split `a.b.c.d/nn` into the address and an optional prefix.
///
/// The address half goes through [`parse_ipv4`], so shortened forms such
/// as `10.0.5/24` are rejected.
pub fn parse_cidr(text: &str) -> Result<(NetworkAddress, Option<PrefixLength>), NetError> {
    match text.trim().split_once('/') {
        Some((addr, prefix)) => {
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| NetError::InvalidAddress(text.to_string()))?;
            let addr = parse_ipv4(addr)?;
            let network = Ipv4Network::new(addr.0, prefix)
                .map_err(|_| NetError::InvalidPrefix(prefix))?;
            Ok((NetworkAddress(network.ip()), Some(PrefixLength(network.prefix()))))
        }
        None => Ok((parse_ipv4(text)?, None)),
    }
}

pub fn looks_like_ipv4(text: &str) -> bool {
    parse_ipv4(text).is_ok()
}
