// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Address space of a configured CIDR range.
//!
//! A [CidrRange] maps the usable addresses of a prefix onto a dense, zero-based offset space
//! `0..capacity`. Offset 0 is the first address after the network address. For IPv4 the
//! broadcast address is excluded as well; IPv6 has no broadcast address, so the last address of
//! the prefix is usable.

use std::{
    fmt::{self, Display},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of usable offsets a range may have.
///
/// The allocation state of every offset is kept in memory.
pub const MAX_CAPACITY: u64 = 1 << 24;

/// Range creation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// The string is not a CIDR.
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),
    /// The prefix is too long to leave any usable address.
    #[error("range {0} has no usable addresses")]
    NoUsableAddresses(IpNet),
    /// The prefix contains more usable addresses than supported.
    #[error(
        "range {0} has {1} usable addresses, at most {max} are supported",
        max = MAX_CAPACITY
    )]
    TooLarge(IpNet, u128),
}

/// The address is not a usable address of the range.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("address {address} is not a usable address of range {range}")]
pub struct OutOfRange {
    /// The rejected address.
    pub address: IpAddr,
    /// The range it was checked against.
    pub range: IpNet,
}

/// Address family of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

/// An immutable CIDR range and its usable offset bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    prefix: IpNet,
    /// Address bits of offset 0.
    first: u128,
    capacity: u64,
}

impl CidrRange {
    /// Creates the range for `prefix`. Host bits of `prefix` are ignored.
    pub fn new(prefix: IpNet) -> Result<Self, RangeError> {
        let prefix = prefix.trunc();
        let host_bits = u32::from(prefix.max_prefix_len() - prefix.prefix_len());
        let excluded: u128 = match prefix {
            IpNet::V4(_) => 2,
            IpNet::V6(_) => 1,
        };
        let usable = 1u128
            .checked_shl(host_bits)
            .map_or(u128::MAX, |total| total.saturating_sub(excluded));

        if usable == 0 {
            return Err(RangeError::NoUsableAddresses(prefix));
        }
        let capacity = u64::try_from(usable)
            .ok()
            .filter(|capacity| *capacity <= MAX_CAPACITY)
            .ok_or(RangeError::TooLarge(prefix, usable))?;

        Ok(Self {
            prefix,
            first: addr_bits(prefix.network()) + 1,
            capacity,
        })
    }

    /// The (truncated) prefix of this range.
    pub fn prefix(&self) -> IpNet {
        self.prefix
    }

    /// Address family derived from the prefix.
    pub fn family(&self) -> AddressFamily {
        match self.prefix {
            IpNet::V4(_) => AddressFamily::V4,
            IpNet::V6(_) => AddressFamily::V6,
        }
    }

    /// Number of usable offsets.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the offset of `address`.
    ///
    /// Fails if the address has a different family, lies outside the prefix, or is the network
    /// or (IPv4) broadcast address.
    pub fn offset_of(&self, address: IpAddr) -> Result<u64, OutOfRange> {
        let out_of_range = OutOfRange {
            address,
            range: self.prefix,
        };
        if !self.prefix.contains(&address) {
            return Err(out_of_range);
        }
        addr_bits(address)
            .checked_sub(self.first)
            .and_then(|offset| u64::try_from(offset).ok())
            .filter(|offset| *offset < self.capacity)
            .ok_or(out_of_range)
    }

    /// Returns the address at `offset`.
    ///
    /// `offset` must be below [Self::capacity].
    pub fn address_at(&self, offset: u64) -> IpAddr {
        debug_assert!(
            offset < self.capacity,
            "offset {offset} outside of {}",
            self.prefix
        );
        let bits = self.first + u128::from(offset);
        match self.prefix {
            // Truncation is exact: every offset of an IPv4 range fits into 32 bits.
            IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from_bits(bits as u32)),
            IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from_bits(bits)),
        }
    }
}

impl FromStr for CidrRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix: IpNet = s
            .trim()
            .parse()
            .map_err(|_| RangeError::InvalidCidr(s.to_string()))?;
        Self::new(prefix)
    }
}

impl Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.prefix.fmt(f)
    }
}

fn addr_bits(address: IpAddr) -> u128 {
    match address {
        IpAddr::V4(addr) => u128::from(addr.to_bits()),
        IpAddr::V6(addr) => addr.to_bits(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(cidr: &str) -> CidrRange {
        cidr.parse().expect("valid range")
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn should_round_trip_every_offset() {
        for cidr in ["10.0.0.0/24", "192.168.4.0/30", "2001:db8::/120", "fd00::/127"] {
            let r = range(cidr);
            for offset in 0..r.capacity() {
                let address = r.address_at(offset);
                assert_eq!(r.offset_of(address), Ok(offset), "{cidr} offset {offset}");
            }
        }
    }

    #[test]
    fn should_exclude_network_and_broadcast_for_ipv4() {
        let r = range("10.0.0.0/30");
        assert_eq!(r.capacity(), 2);
        assert_eq!(r.address_at(0), ip("10.0.0.1"));
        assert_eq!(r.address_at(1), ip("10.0.0.2"));
        assert!(r.offset_of(ip("10.0.0.0")).is_err());
        assert!(r.offset_of(ip("10.0.0.3")).is_err());
    }

    #[test]
    fn should_only_exclude_network_for_ipv6() {
        let r = range("2001:db8::/126");
        assert_eq!(r.capacity(), 3);
        assert_eq!(r.family(), AddressFamily::V6);
        assert!(r.offset_of(ip("2001:db8::")).is_err());
        assert_eq!(r.offset_of(ip("2001:db8::3")), Ok(2));

        let single = range("2001:db8::/127");
        assert_eq!(single.capacity(), 1);
        assert_eq!(single.address_at(0), ip("2001:db8::1"));
    }

    #[test]
    fn should_reject_addresses_outside_the_prefix() {
        let r = range("10.0.0.0/24");
        assert_eq!(
            r.offset_of(ip("10.0.1.5")),
            Err(OutOfRange {
                address: ip("10.0.1.5"),
                range: r.prefix(),
            })
        );
        assert!(r.offset_of(ip("9.255.255.255")).is_err());
    }

    #[test]
    fn should_reject_addresses_of_the_other_family() {
        assert!(range("10.0.0.0/24").offset_of(ip("::ffff:10.0.0.1")).is_err());
        assert!(range("fd00::/112").offset_of(ip("10.0.0.1")).is_err());
    }

    #[test]
    fn should_truncate_host_bits() {
        let r = range("10.96.3.7/16");
        assert_eq!(r.prefix(), "10.96.0.0/16".parse::<IpNet>().unwrap());
        assert_eq!(r.capacity(), 65534);
        assert_eq!(r.address_at(0), ip("10.96.0.1"));
    }

    #[test]
    fn should_reject_ranges_without_usable_addresses() {
        for cidr in ["10.0.0.0/31", "10.0.0.1/32", "2001:db8::1/128"] {
            assert!(
                matches!(cidr.parse::<CidrRange>(), Err(RangeError::NoUsableAddresses(_))),
                "{cidr}"
            );
        }
    }

    #[test]
    fn should_reject_oversized_ranges() {
        assert!(matches!(
            "10.0.0.0/7".parse::<CidrRange>(),
            Err(RangeError::TooLarge(_, _))
        ));
        assert!(matches!(
            "2001:db8::/64".parse::<CidrRange>(),
            Err(RangeError::TooLarge(_, _))
        ));
        assert!(matches!(
            "::/0".parse::<CidrRange>(),
            Err(RangeError::TooLarge(_, u128::MAX))
        ));
        assert_eq!(range("10.0.0.0/8").capacity(), (1 << 24) - 2);
    }

    #[test]
    fn should_reject_malformed_cidr() {
        assert_eq!(
            "10.0.0.0".parse::<CidrRange>(),
            Err(RangeError::InvalidCidr("10.0.0.0".to_string()))
        );
    }
}
