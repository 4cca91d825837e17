//! Router-interface table.

use std::collections::BTreeSet;

use swsync_orch::{RefCounted, SyncMap};
use swsync_sai::{RouterInterfaceOid, VirtualRouterOid};
use swsync_types::{IpAddress, IpPrefix};

/// Default router-interface MTU.
pub const DEFAULT_RIF_MTU: u32 = 9100;

/// One router interface: backend id, VRF, MTU, the addresses configured on
/// it, and how many next hops / routes hold it.
#[derive(Debug)]
pub struct RifEntry {
    pub rif_id: RouterInterfaceOid,
    pub vrf: VirtualRouterOid,
    pub mtu: u32,
    pub ip_prefixes: BTreeSet<IpPrefix>,
    ref_count: u32,
}

impl RifEntry {
    pub fn new(rif_id: RouterInterfaceOid, vrf: VirtualRouterOid, mtu: u32) -> Self {
        Self {
            rif_id,
            vrf,
            mtu,
            ip_prefixes: BTreeSet::new(),
            ref_count: 0,
        }
    }

    /// An interface with addresses is still covered even at refcount 0.
    pub fn removable(&self) -> bool {
        self.ref_count == 0 && self.ip_prefixes.is_empty()
    }
}

impl RefCounted for RifEntry {
    fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn inc_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn dec_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }
}

/// alias -> router interface.
pub type RifTable = SyncMap<String, RifEntry>;

/// True if any configured interface address covers `ip` (used for the
/// full-mask direct-route suppression).
pub fn any_rif_subnet_contains(table: &RifTable, ip: &IpAddress) -> bool {
    table
        .values()
        .any(|entry| entry.ip_prefixes.iter().any(|p| p.contains(ip)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removable_gating() {
        let mut entry = RifEntry::new(
            RouterInterfaceOid::from_raw(1),
            VirtualRouterOid::from_raw(1),
            DEFAULT_RIF_MTU,
        );
        assert!(entry.removable());

        entry.inc_ref();
        assert!(!entry.removable());
        entry.dec_ref();

        entry.ip_prefixes.insert("10.1.1.1/24".parse().unwrap());
        assert!(!entry.removable());
    }

    #[test]
    fn subnet_cover_lookup() {
        let mut table = RifTable::new();
        let mut entry = RifEntry::new(
            RouterInterfaceOid::from_raw(1),
            VirtualRouterOid::from_raw(1),
            DEFAULT_RIF_MTU,
        );
        entry.ip_prefixes.insert("10.1.1.1/24".parse().unwrap());
        table.insert("Vlan1".to_string(), entry);

        assert!(any_rif_subnet_contains(&table, &"10.1.1.7".parse().unwrap()));
        assert!(!any_rif_subnet_contains(&table, &"10.2.0.1".parse().unwrap()));
    }
}
