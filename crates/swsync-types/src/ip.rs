//! IP address and prefix types with safe parsing.

use crate::{MacAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 address wrapper with switch-side utilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const UNSPECIFIED: Self = Ipv4Address(Ipv4Addr::UNSPECIFIED);
    pub const LOCALHOST: Self = Ipv4Address(Ipv4Addr::LOCALHOST);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn inner(&self) -> Ipv4Addr {
        self.0
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }

    pub fn to_bits(self) -> u32 {
        u32::from_be_bytes(self.0.octets())
    }

    pub fn from_bits(bits: u32) -> Self {
        Ipv4Address(Ipv4Addr::from(bits.to_be_bytes()))
    }

    /// 169.254.0.0/16.
    pub fn is_link_local(&self) -> bool {
        self.0.is_link_local()
    }

    pub fn is_multicast(&self) -> bool {
        self.0.is_multicast()
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

/// An IPv6 address wrapper with switch-side utilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv6Address(Ipv6Addr);

impl Ipv6Address {
    pub const UNSPECIFIED: Self = Ipv6Address(Ipv6Addr::UNSPECIFIED);
    pub const LOCALHOST: Self = Ipv6Address(Ipv6Addr::LOCALHOST);

    #[allow(clippy::too_many_arguments)]
    pub const fn new(a: u16, b: u16, c: u16, d: u16, e: u16, f: u16, g: u16, h: u16) -> Self {
        Ipv6Address(Ipv6Addr::new(a, b, c, d, e, f, g, h))
    }

    pub const fn inner(&self) -> Ipv6Addr {
        self.0
    }

    pub const fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }

    pub const fn segments(&self) -> [u16; 8] {
        self.0.segments()
    }

    pub fn to_bits(self) -> u128 {
        u128::from_be_bytes(self.0.octets())
    }

    pub fn from_bits(bits: u128) -> Self {
        Ipv6Address(Ipv6Addr::from(bits.to_be_bytes()))
    }

    /// fe80::/10.
    pub fn is_link_local(&self) -> bool {
        (self.segments()[0] & 0xffc0) == 0xfe80
    }

    pub fn is_multicast(&self) -> bool {
        self.0.is_multicast()
    }

    /// Computes the EUI-64 link-local address for a device MAC: the MAC with
    /// ff:fe spliced into the middle, the universal/local bit flipped, under
    /// the fe80::/64 prefix.
    pub fn eui64_link_local(mac: MacAddress) -> Self {
        let m = mac.as_bytes();
        let mut o = [0u8; 16];
        o[0] = 0xfe;
        o[1] = 0x80;
        o[8] = m[0] ^ 0x02;
        o[9] = m[1];
        o[10] = m[2];
        o[11] = 0xff;
        o[12] = 0xfe;
        o[13] = m[3];
        o[14] = m[4];
        o[15] = m[5];
        Ipv6Address(Ipv6Addr::from(o))
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv6Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv6Addr>()
            .map(Ipv6Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv6Addr> for Ipv6Address {
    fn from(addr: Ipv6Addr) -> Self {
        Ipv6Address(addr)
    }
}

/// An IP address that can be either IPv4 or IPv6.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(untagged)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// The all-zeroes address of either family; routes use it to mark a
    /// directly attached (interface-only) next hop.
    pub fn is_unspecified(&self) -> bool {
        match self {
            IpAddress::V4(a) => *a == Ipv4Address::UNSPECIFIED,
            IpAddress::V6(a) => *a == Ipv6Address::UNSPECIFIED,
        }
    }

    pub fn is_link_local(&self) -> bool {
        match self {
            IpAddress::V4(a) => a.is_link_local(),
            IpAddress::V6(a) => a.is_link_local(),
        }
    }

    pub fn is_multicast(&self) -> bool {
        match self {
            IpAddress::V4(a) => a.is_multicast(),
            IpAddress::V6(a) => a.is_multicast(),
        }
    }

    /// Unspecified address of the same family, e.g. for default-route keys.
    pub fn unspecified_like(&self) -> IpAddress {
        match self {
            IpAddress::V4(_) => IpAddress::V4(Ipv4Address::UNSPECIFIED),
            IpAddress::V6(_) => IpAddress::V6(Ipv6Address::UNSPECIFIED),
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            s.parse::<Ipv6Address>().map(IpAddress::V6)
        } else {
            s.parse::<Ipv4Address>().map(IpAddress::V4)
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(Ipv4Address(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(Ipv6Address(addr))
    }
}

/// An IP prefix in CIDR notation (e.g. 10.0.0.0/24 or 2001:db8::/32).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IpPrefix {
    address: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    /// Fails if the length exceeds the address family's maximum.
    pub fn new(address: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = match address {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        };
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "{}/{}",
                address, prefix_len
            )));
        }
        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    /// Host prefix covering a single address (/32 or /128).
    pub fn host(address: IpAddress) -> Self {
        let prefix_len = match address {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        };
        IpPrefix {
            address,
            prefix_len,
        }
    }

    /// 0.0.0.0/0.
    pub fn default_v4() -> Self {
        IpPrefix {
            address: IpAddress::V4(Ipv4Address::UNSPECIFIED),
            prefix_len: 0,
        }
    }

    /// ::/0.
    pub fn default_v6() -> Self {
        IpPrefix {
            address: IpAddress::V6(Ipv6Address::UNSPECIFIED),
            prefix_len: 0,
        }
    }

    pub const fn address(&self) -> &IpAddress {
        &self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// /32 for IPv4, /128 for IPv6.
    pub const fn is_full_mask(&self) -> bool {
        match self.address {
            IpAddress::V4(_) => self.prefix_len == 32,
            IpAddress::V6(_) => self.prefix_len == 128,
        }
    }

    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    /// True if `ip` falls inside this prefix. Addresses of the other family
    /// never match.
    pub fn contains(&self, ip: &IpAddress) -> bool {
        match (&self.address, ip) {
            (IpAddress::V4(net), IpAddress::V4(ip)) => {
                let mask = mask_v4(self.prefix_len);
                net.to_bits() & mask == ip.to_bits() & mask
            }
            (IpAddress::V6(net), IpAddress::V6(ip)) => {
                let mask = mask_v6(self.prefix_len);
                net.to_bits() & mask == ip.to_bits() & mask
            }
            _ => false,
        }
    }

    /// True if `other` is fully covered by this prefix.
    pub fn covers(&self, other: &IpPrefix) -> bool {
        self.prefix_len <= other.prefix_len && self.contains(&other.address)
    }

    /// The prefix with host bits zeroed, the canonical bus form.
    pub fn network(&self) -> IpPrefix {
        let address = match self.address {
            IpAddress::V4(a) => {
                IpAddress::V4(Ipv4Address::from_bits(a.to_bits() & mask_v4(self.prefix_len)))
            }
            IpAddress::V6(a) => {
                IpAddress::V6(Ipv6Address::from_bits(a.to_bits() & mask_v6(self.prefix_len)))
            }
        };
        IpPrefix {
            address,
            prefix_len: self.prefix_len,
        }
    }
}

fn mask_v4(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len))
    }
}

fn mask_v6(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(len))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((addr_str, len_str)) => {
                let address: IpAddress = addr_str.parse()?;
                let prefix_len: u8 = len_str
                    .parse()
                    .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;
                IpPrefix::new(address, prefix_len)
            }
            // A bare address is a host prefix.
            None => Ok(IpPrefix::host(s.parse()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_and_display_round_trip() {
        let prefix: IpPrefix = "10.0.0.0/24".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.0/24");
        assert_eq!(prefix.prefix_len(), 24);

        let v6: IpPrefix = "2001:db8::/32".parse().unwrap();
        assert!(v6.is_ipv6());
    }

    #[test]
    fn bare_address_is_host_prefix() {
        let prefix: IpPrefix = "10.1.1.1".parse().unwrap();
        assert!(prefix.is_full_mask());
        assert_eq!(prefix.prefix_len(), 32);
    }

    #[test]
    fn invalid_prefix_length_rejected() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn containment() {
        let prefix: IpPrefix = "10.0.0.0/8".parse().unwrap();
        assert!(prefix.contains(&"10.2.3.4".parse().unwrap()));
        assert!(!prefix.contains(&"11.0.0.1".parse().unwrap()));
        assert!(!prefix.contains(&"2001:db8::1".parse().unwrap()));

        let narrower: IpPrefix = "10.1.0.0/16".parse().unwrap();
        assert!(prefix.covers(&narrower));
        assert!(!narrower.covers(&prefix));
    }

    #[test]
    fn default_prefixes() {
        assert!(IpPrefix::default_v4().is_default());
        assert!(IpPrefix::default_v6().is_default());
        assert_eq!(IpPrefix::default_v4().to_string(), "0.0.0.0/0");
        assert_eq!(IpPrefix::default_v6().to_string(), "::/0");
    }

    #[test]
    fn network_zeroes_host_bits() {
        let prefix: IpPrefix = "10.1.2.3/16".parse().unwrap();
        assert_eq!(prefix.network().to_string(), "10.1.0.0/16");
    }

    #[test]
    fn link_local_detection() {
        let ll: IpAddress = "fe80::1".parse().unwrap();
        assert!(ll.is_link_local());
        let v4ll: IpAddress = "169.254.10.1".parse().unwrap();
        assert!(v4ll.is_link_local());
        let global: IpAddress = "2001:db8::1".parse().unwrap();
        assert!(!global.is_link_local());
    }

    #[test]
    fn eui64_link_local() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let ll = Ipv6Address::eui64_link_local(mac);
        assert_eq!(ll.to_string(), "fe80::211:22ff:fe33:4455");
        assert!(ll.is_link_local());
    }
}
