//! Entry and object bulkers.
//!
//! A bulker coalesces many single-object calls into one backend batch and
//! hands each staged op a status handle that is filled at `flush()`.
//! Handlers stage during `do_task` and the engine drives one flush per cycle.
//!
//! Ordering inside a flush is removes, then creates, then sets: a DEL
//! followed by a SET for the same key within one window must land as a
//! remove-then-create, which is also why the staging state is peekable
//! through [`EntityBulker::bulk_entry_pending_removal`].

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::api::route::{RouteAttr, RouteBulkApi};
use crate::api::{MemberRequest, SwitchApi};
use crate::{NextHopGroupMemberOid, SaiStatus};

/// Per-entry status handle, readable after `flush()`.
///
/// Until the flush runs it reads `NotExecuted`.
#[derive(Debug, Clone)]
pub struct EntryStatus(Arc<AtomicI32>);

impl EntryStatus {
    fn new() -> Self {
        EntryStatus(Arc::new(AtomicI32::new(SaiStatus::NotExecuted.as_raw())))
    }

    fn fill(&self, status: SaiStatus) {
        self.0.store(status.as_raw(), Ordering::SeqCst);
    }

    pub fn get(&self) -> SaiStatus {
        SaiStatus::from_raw(self.0.load(Ordering::SeqCst))
    }
}

impl Default for EntryStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bulker for keyed entries (routes, label routes).
pub struct EntityBulker<K> {
    creating: Vec<(K, Vec<RouteAttr>, EntryStatus)>,
    creating_counts: HashMap<K, usize>,
    setting: Vec<(K, RouteAttr, EntryStatus)>,
    removing: Vec<(K, EntryStatus)>,
    removing_keys: HashSet<K>,
}

impl<K> EntityBulker<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            creating: Vec::new(),
            creating_counts: HashMap::new(),
            setting: Vec::new(),
            removing: Vec::new(),
            removing_keys: HashSet::new(),
        }
    }

    /// Stages a create; the status handle is filled at `flush()`.
    pub fn create_entry(&mut self, key: K, attrs: Vec<RouteAttr>) -> EntryStatus {
        let status = EntryStatus::new();
        *self.creating_counts.entry(key.clone()).or_insert(0) += 1;
        self.creating.push((key, attrs, status.clone()));
        status
    }

    /// Stages an attribute set on an existing entry.
    pub fn set_entry_attribute(&mut self, key: K, attr: RouteAttr) -> EntryStatus {
        let status = EntryStatus::new();
        self.setting.push((key, attr, status.clone()));
        status
    }

    /// Stages a remove.
    pub fn remove_entry(&mut self, key: K) -> EntryStatus {
        let status = EntryStatus::new();
        self.removing_keys.insert(key.clone());
        self.removing.push((key, status.clone()));
        status
    }

    /// Staged creates for this key, so a handler can tell whether a "set"
    /// must be routed as a create instead.
    pub fn creating_entries_count(&self, key: &K) -> usize {
        self.creating_counts.get(key).copied().unwrap_or(0)
    }

    /// Whether a remove is staged for this key in the current window.
    pub fn bulk_entry_pending_removal(&self, key: &K) -> bool {
        self.removing_keys.contains(key)
    }

    pub fn creating_entries_total(&self) -> usize {
        self.creating.len()
    }

    pub fn setting_entries_count(&self) -> usize {
        self.setting.len()
    }

    pub fn removing_entries_count(&self) -> usize {
        self.removing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creating.is_empty() && self.setting.is_empty() && self.removing.is_empty()
    }

    /// Issues the batch (removes, creates, sets) and fills every status
    /// handle. Staging is reset afterwards.
    pub async fn flush(&mut self, api: &dyn RouteBulkApi<K>) {
        if !self.removing.is_empty() {
            let keys: Vec<K> = self.removing.iter().map(|(k, _)| k.clone()).collect();
            let statuses = api.bulk_remove(&keys).await;
            for ((_, handle), status) in self.removing.iter().zip(statuses) {
                handle.fill(status);
            }
        }

        if !self.creating.is_empty() {
            let entries: Vec<(K, Vec<RouteAttr>)> = self
                .creating
                .iter()
                .map(|(k, attrs, _)| (k.clone(), attrs.clone()))
                .collect();
            let statuses = api.bulk_create(&entries).await;
            for ((_, _, handle), status) in self.creating.iter().zip(statuses) {
                handle.fill(status);
            }
        }

        if !self.setting.is_empty() {
            let entries: Vec<(K, RouteAttr)> = self
                .setting
                .iter()
                .map(|(k, attr, _)| (k.clone(), *attr))
                .collect();
            let statuses = api.bulk_set(&entries).await;
            for ((_, _, handle), status) in self.setting.iter().zip(statuses) {
                handle.fill(status);
            }
        }

        self.creating.clear();
        self.creating_counts.clear();
        self.setting.clear();
        self.removing.clear();
        self.removing_keys.clear();
    }
}

impl<K> Default for EntityBulker<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Bulker for next-hop-group member objects: creates return fresh object
/// ids, removes take them away.
pub struct ObjectBulker {
    creating: Vec<(MemberRequest, MemberCreateHandle)>,
    removing: Vec<(NextHopGroupMemberOid, EntryStatus)>,
}

/// Handle to a staged member create; carries the created id after flush.
#[derive(Debug, Clone)]
pub struct MemberCreateHandle {
    status: EntryStatus,
    oid: Arc<std::sync::atomic::AtomicU64>,
}

impl MemberCreateHandle {
    fn new() -> Self {
        Self {
            status: EntryStatus::new(),
            oid: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> SaiStatus {
        self.status.get()
    }

    pub fn oid(&self) -> NextHopGroupMemberOid {
        NextHopGroupMemberOid::from_raw(self.oid.load(Ordering::SeqCst))
    }
}

impl ObjectBulker {
    pub fn new() -> Self {
        Self {
            creating: Vec::new(),
            removing: Vec::new(),
        }
    }

    pub fn create_member(&mut self, request: MemberRequest) -> MemberCreateHandle {
        let handle = MemberCreateHandle::new();
        self.creating.push((request, handle.clone()));
        handle
    }

    pub fn remove_member(&mut self, member: NextHopGroupMemberOid) -> EntryStatus {
        let status = EntryStatus::new();
        self.removing.push((member, status.clone()));
        status
    }

    pub fn is_empty(&self) -> bool {
        self.creating.is_empty() && self.removing.is_empty()
    }

    /// Removes flush before creates, mirroring the entry bulker.
    pub async fn flush(&mut self, api: &dyn SwitchApi) {
        if !self.removing.is_empty() {
            let oids: Vec<NextHopGroupMemberOid> =
                self.removing.iter().map(|(oid, _)| *oid).collect();
            let results = api.remove_next_hop_group_members(&oids).await;
            for ((_, handle), result) in self.removing.iter().zip(results) {
                handle.fill(match result {
                    Ok(()) => SaiStatus::Success,
                    Err(e) => e.status(),
                });
            }
        }

        if !self.creating.is_empty() {
            let requests: Vec<MemberRequest> =
                self.creating.iter().map(|(r, _)| r.clone()).collect();
            let results = api.create_next_hop_group_members(&requests).await;
            for ((_, handle), result) in self.creating.iter().zip(results) {
                match result {
                    Ok(oid) => {
                        handle.oid.store(oid.as_raw(), Ordering::SeqCst);
                        handle.status.fill(SaiStatus::Success);
                    }
                    Err(e) => handle.status.fill(e.status()),
                }
            }
        }

        self.creating.clear();
        self.removing.clear();
    }
}

impl Default for ObjectBulker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::route::RouteKey;
    use crate::mock::MockSwitch;
    use crate::VirtualRouterOid;
    use swsync_types::IpPrefix;

    fn key(prefix: &str) -> RouteKey {
        RouteKey::new(VirtualRouterOid::from_raw(1), prefix.parse::<IpPrefix>().unwrap())
    }

    #[test]
    fn statuses_read_not_executed_before_flush() {
        let mut bulker: EntityBulker<RouteKey> = EntityBulker::new();
        let status = bulker.create_entry(key("10.0.0.0/24"), vec![]);
        assert_eq!(status.get(), SaiStatus::NotExecuted);
    }

    #[test]
    fn staging_peeks() {
        let mut bulker: EntityBulker<RouteKey> = EntityBulker::new();
        let k = key("10.0.0.0/24");

        assert_eq!(bulker.creating_entries_count(&k), 0);
        assert!(!bulker.bulk_entry_pending_removal(&k));

        bulker.remove_entry(k);
        bulker.create_entry(k, vec![]);

        assert_eq!(bulker.creating_entries_count(&k), 1);
        assert!(bulker.bulk_entry_pending_removal(&k));
        assert_eq!(bulker.removing_entries_count(), 1);
    }

    #[tokio::test]
    async fn flush_orders_remove_before_create() {
        let mock = MockSwitch::new();
        let mut bulker: EntityBulker<RouteKey> = EntityBulker::new();
        let k = key("10.0.0.0/24");

        // Seed an existing entry.
        bulker.create_entry(k, vec![]);
        bulker.flush(&mock).await;
        assert_eq!(mock.route_count(), 1);

        // DEL + SET in the same window: both must succeed.
        let del = bulker.remove_entry(k);
        let add = bulker.create_entry(k, vec![]);
        bulker.flush(&mock).await;

        assert_eq!(del.get(), SaiStatus::Success);
        assert_eq!(add.get(), SaiStatus::Success);
        assert_eq!(mock.route_count(), 1);
        assert!(bulker.is_empty());
    }

    #[tokio::test]
    async fn set_on_missing_entry_fails() {
        let mock = MockSwitch::new();
        let mut bulker: EntityBulker<RouteKey> = EntityBulker::new();

        let status = bulker.set_entry_attribute(
            key("10.9.0.0/16"),
            RouteAttr::PacketAction(crate::api::PacketAction::Drop),
        );
        bulker.flush(&mock).await;
        assert_eq!(status.get(), SaiStatus::ItemNotFound);
    }
}
