//! Semantic primitive types shared by the swsync agents.
//!
//! Entity keys on the bus are strings; this crate provides the typed
//! counterparts they parse into: IP addresses and prefixes, MAC addresses,
//! VLAN ids and MPLS labels. All types implement `FromStr`/`Display` with
//! round-trip-stable serialization, since the string form is the bus-visible
//! identity.

mod ip;
mod label;
mod mac;
mod vlan;

pub use ip::{IpAddress, IpPrefix, Ipv4Address, Ipv6Address};
pub use label::{Label, LabelStack};
pub use mac::MacAddress;
pub use vlan::VlanId;

use thiserror::Error;

/// Error for all primitive-type parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid MAC address: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN id: {0}")]
    InvalidVlanId(String),

    #[error("invalid MPLS label: {0}")]
    InvalidLabel(String),
}
