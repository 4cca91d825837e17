//! Process-wide context threaded through the orchestrators.
//!
//! Pointer-stable for the process lifetime; seated once at startup and
//! never re-seated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use swsync_sai::VirtualRouterOid;
use swsync_types::MacAddress;

/// Default VRF name as it appears (omitted) in bus keys.
pub const DEFAULT_VRF: &str = "default";

/// Shared identities and budgets.
pub struct OrchContext {
    switch_mac: MacAddress,
    virtual_router: VirtualRouterOid,
    max_nhg_count: usize,
    /// Live group count across the route-owned and index-owned tables.
    nhg_count: AtomicUsize,
    vrfs: Mutex<HashMap<String, VirtualRouterOid>>,
}

impl OrchContext {
    pub fn new(
        switch_mac: MacAddress,
        virtual_router: VirtualRouterOid,
        max_nhg_count: usize,
    ) -> Self {
        let mut vrfs = HashMap::new();
        vrfs.insert(DEFAULT_VRF.to_string(), virtual_router);
        Self {
            switch_mac,
            virtual_router,
            max_nhg_count,
            nhg_count: AtomicUsize::new(0),
            vrfs: Mutex::new(vrfs),
        }
    }

    pub fn switch_mac(&self) -> MacAddress {
        self.switch_mac
    }

    /// The default virtual router.
    pub fn virtual_router(&self) -> VirtualRouterOid {
        self.virtual_router
    }

    pub fn max_nhg_count(&self) -> usize {
        self.max_nhg_count
    }

    pub fn nhg_count(&self) -> usize {
        self.nhg_count.load(Ordering::SeqCst)
    }

    /// Whether another group fits the budget.
    pub fn nhg_capacity_available(&self) -> bool {
        self.nhg_count() < self.max_nhg_count
    }

    pub fn inc_nhg_count(&self) {
        self.nhg_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_nhg_count(&self) {
        let previous = self.nhg_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "group count underflow");
    }

    /// Registers a VRF name -> virtual-router binding.
    pub fn register_vrf(&self, name: impl Into<String>, vrf: VirtualRouterOid) {
        self.vrfs.lock().unwrap().insert(name.into(), vrf);
    }

    pub fn unregister_vrf(&self, name: &str) {
        self.vrfs.lock().unwrap().remove(name);
    }

    /// Resolves a VRF name; `None` means the VRF is not known yet and the
    /// caller defers.
    pub fn resolve_vrf(&self, name: &str) -> Option<VirtualRouterOid> {
        if name.is_empty() || name == DEFAULT_VRF {
            return Some(self.virtual_router);
        }
        self.vrfs.lock().unwrap().get(name).copied()
    }

    pub fn vrf_name_of(&self, vrf: VirtualRouterOid) -> Option<String> {
        self.vrfs
            .lock()
            .unwrap()
            .iter()
            .find(|(_, v)| **v == vrf)
            .map(|(k, _)| k.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OrchContext {
        OrchContext::new(
            "00:11:22:33:44:55".parse().unwrap(),
            VirtualRouterOid::from_raw(0x1),
            2,
        )
    }

    #[test]
    fn default_vrf_resolves() {
        let ctx = ctx();
        assert_eq!(ctx.resolve_vrf(""), Some(VirtualRouterOid::from_raw(0x1)));
        assert_eq!(
            ctx.resolve_vrf("default"),
            Some(VirtualRouterOid::from_raw(0x1))
        );
        assert_eq!(ctx.resolve_vrf("Vrf-red"), None);
    }

    #[test]
    fn vrf_registration() {
        let ctx = ctx();
        ctx.register_vrf("Vrf-red", VirtualRouterOid::from_raw(0x2));
        assert_eq!(
            ctx.resolve_vrf("Vrf-red"),
            Some(VirtualRouterOid::from_raw(0x2))
        );
        assert_eq!(
            ctx.vrf_name_of(VirtualRouterOid::from_raw(0x2)),
            Some("Vrf-red".to_string())
        );
        ctx.unregister_vrf("Vrf-red");
        assert_eq!(ctx.resolve_vrf("Vrf-red"), None);
    }

    #[test]
    fn nhg_budget() {
        let ctx = ctx();
        assert!(ctx.nhg_capacity_available());
        ctx.inc_nhg_count();
        ctx.inc_nhg_count();
        assert!(!ctx.nhg_capacity_available());
        ctx.dec_nhg_count();
        assert!(ctx.nhg_capacity_available());
    }
}
