//! VLAN id type and key parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix used by bus keys naming a VLAN interface.
pub const VLAN_PREFIX: &str = "Vlan";

/// A valid 802.1Q VLAN id (1..=4094).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    pub fn new(id: u16) -> Result<Self, ParseError> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id.to_string()))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// The bus key form, e.g. `Vlan100`.
    pub fn alias(&self) -> String {
        format!("{}{}", VLAN_PREFIX, self.0)
    }

    /// Parses the `Vlan<id>` alias form.
    pub fn from_alias(alias: &str) -> Result<Self, ParseError> {
        let id = alias
            .strip_prefix(VLAN_PREFIX)
            .and_then(|rest| rest.parse::<u16>().ok())
            .ok_or_else(|| ParseError::InvalidVlanId(alias.to_string()))?;
        VlanId::new(id)
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u16 = s
            .parse()
            .map_err(|_| ParseError::InvalidVlanId(s.to_string()))?;
        VlanId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_round_trip() {
        let vid = VlanId::from_alias("Vlan100").unwrap();
        assert_eq!(vid.as_u16(), 100);
        assert_eq!(vid.alias(), "Vlan100");
    }

    #[test]
    fn range_enforced() {
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
    }

    #[test]
    fn rejects_garbage_alias() {
        assert!(VlanId::from_alias("Ethernet0").is_err());
        assert!(VlanId::from_alias("Vlan").is_err());
        assert!(VlanId::from_alias("Vlanx").is_err());
    }
}
