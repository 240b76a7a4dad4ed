//! IPv4 CIDR blocks and subnet carving.

use crate::error::{StackError, StackResult};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation, e.g. `10.0.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    /// `10.0.0.0/16`
    pub const DEFAULT_VPC: Ipv4Cidr = Ipv4Cidr {
        network: 0x0A00_0000,
        prefix: 16,
    };

    /// Build a block, normalising host bits away.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> StackResult<Self> {
        if prefix > 32 {
            return Err(StackError::InvalidCidr(format!("{}/{}", addr, prefix)));
        }
        Ok(Self {
            network: u32::from(addr) & mask(prefix),
            prefix,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// True if `other` lies entirely inside this block.
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix && (other.network & mask(self.prefix)) == self.network
    }

    /// Carve `count` consecutive subnets of length `/prefix` from the start of the block.
    pub fn carve(&self, count: usize, prefix: u8) -> StackResult<Vec<Ipv4Cidr>> {
        let exhausted = || StackError::AddressSpaceExhausted {
            cidr: self.to_string(),
            count,
            prefix,
        };
        if prefix < self.prefix || prefix > 32 {
            return Err(exhausted());
        }
        let step = 1u64 << (32 - u32::from(prefix));
        if step * count as u64 > self.size() {
            return Err(exhausted());
        }

        (0..count as u64)
            .map(|i| {
                let network = u64::from(self.network) + i * step;
                Ok(Ipv4Cidr {
                    network: network as u32,
                    prefix,
                })
            })
            .collect()
    }

    /// Split the block into `count` equal subnets, as large as possible.
    pub fn split_evenly(&self, count: usize) -> StackResult<Vec<Ipv4Cidr>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let extra_bits = usize::BITS - (count - 1).leading_zeros();
        let prefix = u32::from(self.prefix) + extra_bits;
        if prefix > 32 {
            return Err(StackError::AddressSpaceExhausted {
                cidr: self.to_string(),
                count,
                prefix: 32,
            });
        }
        self.carve(count, prefix as u8)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StackError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if u32::from(addr) & !mask(prefix.min(32)) != 0 {
            // Host bits set: "10.0.0.1/16" names an address, not a network.
            return Err(invalid());
        }
        Self::new(addr, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(cidr("10.0.0.0/16").to_string(), "10.0.0.0/16");
        assert_eq!(Ipv4Cidr::DEFAULT_VPC, cidr("10.0.0.0/16"));
        assert_eq!(cidr("0.0.0.0/0").size(), 1u64 << 32);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.300/16".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.1/16".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_split_default_network_into_four() {
        let subnets: Vec<String> = cidr("10.0.0.0/16")
            .split_evenly(4)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            subnets,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn test_split_rounds_up_to_power_of_two() {
        let subnets = cidr("10.0.0.0/16").split_evenly(3).unwrap();
        assert_eq!(subnets.len(), 3);
        assert!(subnets.iter().all(|s| s.prefix() == 18));
    }

    #[test]
    fn test_carve_exhaustion() {
        let err = cidr("10.0.0.0/24").carve(3, 25).unwrap_err();
        assert!(matches!(err, StackError::AddressSpaceExhausted { .. }));
    }

    #[test]
    fn test_contains() {
        let vpc = cidr("10.0.0.0/16");
        assert!(vpc.contains(&cidr("10.0.64.0/18")));
        assert!(!vpc.contains(&cidr("10.1.0.0/18")));
        assert!(!vpc.contains(&cidr("10.0.0.0/8")));
    }
}
