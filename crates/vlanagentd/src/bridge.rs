//! In-process bridge membership tracking.
//!
//! The detach decision on member removal is taken from this table instead
//! of parsing `bridge vlan show` output, which misreads across `bridge`
//! versions.

use std::collections::{BTreeMap, BTreeSet};

/// port alias -> set of vids it belongs to.
#[derive(Debug, Default)]
pub struct BridgeMembership {
    ports: BTreeMap<String, BTreeSet<u16>>,
}

impl BridgeMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this is the port's first membership (it must be attached to
    /// the bridge).
    pub fn add(&mut self, port: &str, vid: u16) -> bool {
        let vids = self.ports.entry(port.to_string()).or_default();
        let first = vids.is_empty();
        vids.insert(vid);
        first
    }

    /// True if this was the port's last membership (it must be detached).
    pub fn remove(&mut self, port: &str, vid: u16) -> bool {
        let Some(vids) = self.ports.get_mut(port) else {
            return false;
        };
        vids.remove(&vid);
        if vids.is_empty() {
            self.ports.remove(port);
            true
        } else {
            false
        }
    }

    pub fn is_member(&self, port: &str, vid: u16) -> bool {
        self.ports.get(port).is_some_and(|vids| vids.contains(&vid))
    }

    pub fn is_attached(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    /// All attached ports (flood-control fan-out).
    pub fn attached_ports(&self) -> Vec<String> {
        self.ports.keys().cloned().collect()
    }

    /// Members of one VLAN.
    pub fn members_of(&self, vid: u16) -> Vec<String> {
        self.ports
            .iter()
            .filter(|(_, vids)| vids.contains(&vid))
            .map(|(port, _)| port.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_detach_boundaries() {
        let mut bridge = BridgeMembership::new();

        assert!(bridge.add("Ethernet6", 10));
        assert!(!bridge.add("Ethernet6", 20));
        assert!(bridge.is_attached("Ethernet6"));

        assert!(!bridge.remove("Ethernet6", 10));
        assert!(bridge.remove("Ethernet6", 20));
        assert!(!bridge.is_attached("Ethernet6"));
    }

    #[test]
    fn vlan_membership_queries() {
        let mut bridge = BridgeMembership::new();
        bridge.add("Ethernet6", 10);
        bridge.add("Ethernet7", 10);
        bridge.add("Ethernet7", 20);

        assert_eq!(bridge.members_of(10).len(), 2);
        assert_eq!(bridge.members_of(20), vec!["Ethernet7".to_string()]);
        assert!(bridge.is_member("Ethernet6", 10));
        assert!(!bridge.is_member("Ethernet6", 20));
        assert_eq!(bridge.attached_ports().len(), 2);
    }

    #[test]
    fn remove_unknown_port_is_noop() {
        let mut bridge = BridgeMembership::new();
        assert!(!bridge.remove("Ethernet9", 10));
    }
}
