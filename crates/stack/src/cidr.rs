//! IPv4 CIDR blocks.
//!
//! Only canonical network addresses are accepted: `10.0.0.0/16` is valid,
//! `10.0.0.1/16` is not. This mirrors how the VPC API treats CIDR input for
//! the resources this crate declares.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// A canonical IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// `0.0.0.0/0`, every IPv4 address.
    pub const ANY: Self = Self {
        addr: Ipv4Addr::UNSPECIFIED,
        prefix: 0,
    };

    /// Build a CIDR from an address and prefix length.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix exceeds 32 or the address has host bits set.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, StackError> {
        let invalid = |reason: String| StackError::InvalidCidr {
            value: format!("{addr}/{prefix}"),
            reason,
        };

        if prefix > 32 {
            return Err(invalid(format!("prefix length {prefix} exceeds 32")));
        }

        let bits = u32::from(addr);
        if bits & !Self::mask_bits(prefix) != 0 {
            let network = Ipv4Addr::from(bits & Self::mask_bits(prefix));
            return Err(invalid(format!(
                "host bits are set (network address is {network}/{prefix})"
            )));
        }

        Ok(Self { addr, prefix })
    }

    /// Parse `a.b.c.d/n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a canonical IPv4 CIDR block.
    pub fn parse(value: &str) -> Result<Self, StackError> {
        let invalid = |reason: &str| StackError::InvalidCidr {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("missing '/<prefix>'"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("malformed IPv4 address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| invalid("malformed prefix length"))?;

        Self::new(addr, prefix)
    }

    fn mask_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    /// Network address.
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        self.addr
    }

    /// Prefix length.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Last address in the block.
    #[must_use]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !Self::mask_bits(self.prefix))
    }

    /// Whether `ip` falls inside this block.
    #[must_use]
    pub fn contains_addr(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask_bits(self.prefix) == u32::from(self.addr)
    }

    /// Whether `other` lies entirely inside this block (equal blocks included).
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.prefix >= self.prefix && self.contains_addr(other.addr)
    }

    /// Whether this block lies inside `outer` and is strictly smaller.
    #[must_use]
    pub fn is_strict_subset_of(&self, outer: &Self) -> bool {
        outer.contains(self) && self.prefix > outer.prefix
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ipv4Cidr> for String {
    fn from(value: Ipv4Cidr) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cidr = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.prefix(), 16);
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(10, 0, 255, 255));
    }

    #[test]
    fn test_rejects_host_bits() {
        let err = Ipv4Cidr::parse("10.0.0.1/16").unwrap_err();
        assert!(err.to_string().contains("10.0.0.0/16"));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["10.0.0.0", "10.0.0/16", "10.0.0.0/33", "10.0.0.0/x", ""] {
            assert!(Ipv4Cidr::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_subset_relations() {
        let vpc = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        let subnet = Ipv4Cidr::parse("10.0.1.0/24").unwrap();
        let outside = Ipv4Cidr::parse("10.1.1.0/24").unwrap();

        assert!(vpc.contains(&subnet));
        assert!(subnet.is_strict_subset_of(&vpc));
        assert!(!vpc.is_strict_subset_of(&vpc));
        assert!(vpc.contains(&vpc));
        assert!(!vpc.contains(&outside));
        assert!(!subnet.contains(&vpc));
    }

    #[test]
    fn test_any_contains_everything() {
        let any = Ipv4Cidr::ANY;
        assert_eq!(any.to_string(), "0.0.0.0/0");
        assert!(any.contains_addr(Ipv4Addr::new(203, 0, 113, 7)));
        assert!(any.contains(&Ipv4Cidr::parse("192.168.0.0/24").unwrap()));
    }

    #[test]
    fn test_serde_as_string() {
        let cidr = Ipv4Cidr::parse("10.244.0.0/16").unwrap();
        let json = serde_json::to_string(&cidr).unwrap();
        assert_eq!(json, "\"10.244.0.0/16\"");

        let back: Ipv4Cidr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cidr);

        assert!(serde_json::from_str::<Ipv4Cidr>("\"10.244.0.1/16\"").is_err());
    }
}
