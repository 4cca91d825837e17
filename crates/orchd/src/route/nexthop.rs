//! Next-hop identity.

use std::fmt;
use std::str::FromStr;

use swsync_types::{IpAddress, Ipv6Address, LabelStack, MacAddress, ParseError};

/// Identity of a single next hop.
///
/// The string form is the stable serialization used in group keys and on
/// the bus: `ip@alias`, extended with `+<labels>` for MPLS, `|<vni>|<mac>`
/// for overlay and `~<segment>~<source>` for SRv6 encapsulation. A weight
/// suffix `#<w>` appears only when non-default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHopKey {
    pub ip: IpAddress,
    pub alias: String,
    pub labels: LabelStack,
    pub srv6_segment: Option<String>,
    pub srv6_source: Option<Ipv6Address>,
    pub vni: u32,
    pub router_mac: Option<MacAddress>,
    pub weight: u32,
}

impl NextHopKey {
    pub fn new(ip: IpAddress, alias: impl Into<String>) -> Self {
        Self {
            ip,
            alias: alias.into(),
            labels: LabelStack::default(),
            srv6_segment: None,
            srv6_source: None,
            vni: 0,
            router_mac: None,
            weight: 0,
        }
    }

    /// Directly attached: no gateway address, just an interface. The
    /// unspecified address stands in for either family.
    pub fn interface_only(alias: impl Into<String>) -> Self {
        Self::new(IpAddress::V4(swsync_types::Ipv4Address::UNSPECIFIED), alias)
    }

    pub fn with_labels(mut self, labels: LabelStack) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_srv6(mut self, segment: impl Into<String>, source: Ipv6Address) -> Self {
        self.srv6_segment = Some(segment.into());
        self.srv6_source = Some(source);
        self
    }

    pub fn with_overlay(mut self, vni: u32, router_mac: MacAddress) -> Self {
        self.vni = vni;
        self.router_mac = Some(router_mac);
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn is_interface_nexthop(&self) -> bool {
        self.ip.is_unspecified()
    }

    pub fn is_mpls(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn is_srv6(&self) -> bool {
        self.srv6_segment.is_some()
    }

    pub fn is_overlay(&self) -> bool {
        self.vni > 0
    }

    /// Synthetic next hops are created on demand by the route path rather
    /// than learned from the neighbor feed.
    pub fn is_synthetic(&self) -> bool {
        self.is_mpls() || self.is_srv6() || self.is_overlay()
    }
}

impl fmt::Display for NextHopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_interface_nexthop() {
            write!(f, "{}", self.alias)?;
        } else {
            write!(f, "{}@{}", self.ip, self.alias)?;
        }
        if !self.labels.is_empty() {
            write!(f, "+{}", self.labels)?;
        }
        if let (Some(segment), Some(source)) = (&self.srv6_segment, &self.srv6_source) {
            write!(f, "~{}~{}", segment, source)?;
        }
        if self.vni > 0 {
            write!(f, "|{}", self.vni)?;
            if let Some(mac) = &self.router_mac {
                write!(f, "|{}", mac)?;
            }
        }
        if self.weight > 0 {
            write!(f, "#{}", self.weight)?;
        }
        Ok(())
    }
}

impl FromStr for NextHopKey {
    type Err = ParseError;

    /// Parses the plain forms `ip@alias` and `alias`; the extended
    /// serializations are produced, not consumed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((ip, alias)) => Ok(NextHopKey::new(ip.parse()?, alias)),
            None => Ok(NextHopKey::interface_only(s)),
        }
    }
}
