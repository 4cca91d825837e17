//! Flow-counter binding state.
//!
//! Routes matching a configured pattern get a generic counter bound, capped
//! per pattern; overflow prefixes wait in an unbound cache and are promoted
//! when capacity frees. The state here is pure bookkeeping; the route
//! orchestrator drives the backend calls and the bulker staging.

use std::collections::{BTreeMap, BTreeSet};

use swsync_sai::CounterOid;
use swsync_types::IpPrefix;

/// State-bus table carrying `(vrf, prefix, max_match_count)` patterns.
pub const FLOW_COUNTER_ROUTE_PATTERN_TABLE: &str = "FLOW_COUNTER_ROUTE_PATTERN_TABLE";

/// Identity of a pattern: VRF name plus prefix.
pub type PatternId = (String, IpPrefix);

/// A configured route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    pub vrf_name: String,
    pub prefix: IpPrefix,
    pub max_match_count: usize,
    /// Default-route patterns match only the default route itself.
    pub exact_match: bool,
}

impl RoutePattern {
    pub fn new(vrf_name: impl Into<String>, prefix: IpPrefix, max_match_count: usize) -> Self {
        Self {
            vrf_name: vrf_name.into(),
            prefix,
            max_match_count,
            exact_match: prefix.is_default(),
        }
    }

    pub fn id(&self) -> PatternId {
        (self.vrf_name.clone(), self.prefix)
    }

    pub fn is_match(&self, vrf_name: &str, prefix: &IpPrefix) -> bool {
        if self.vrf_name != vrf_name {
            return false;
        }
        if self.exact_match {
            *prefix == self.prefix
        } else {
            self.prefix.covers(prefix)
        }
    }

    /// Two patterns overlap when either would match the other's prefix
    /// space in the same VRF.
    pub fn overlaps(&self, other: &RoutePattern) -> bool {
        if self.vrf_name != other.vrf_name {
            return false;
        }
        self.prefix.covers(&other.prefix) || other.prefix.covers(&self.prefix)
    }
}

/// What the caller must do after a pattern update.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PatternUpdate {
    /// Bind counters for these prefixes (pulled from the unbound cache).
    pub to_bind: Vec<IpPrefix>,
    /// Unbind counters for these prefixes (cap shrank).
    pub to_unbind: Vec<IpPrefix>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern overlaps existing {0}:{1}")]
    Overlap(String, IpPrefix),
}

/// All flow-counter bookkeeping for one route orchestrator.
#[derive(Default)]
pub struct FlowCounterState {
    patterns: Vec<RoutePattern>,
    bound: BTreeMap<PatternId, BTreeMap<IpPrefix, CounterOid>>,
    unbound: BTreeMap<PatternId, BTreeSet<IpPrefix>>,
    /// Freshly bound, awaiting the promotion timer.
    pending_flex: Vec<(PatternId, IpPrefix, CounterOid)>,
    /// Route churn observed this cycle, not yet acted on.
    pending_bind: Vec<(PatternId, IpPrefix)>,
    pending_unbind: Vec<(PatternId, IpPrefix)>,
}

impl FlowCounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(&self, id: &PatternId) -> Option<&RoutePattern> {
        self.patterns.iter().find(|p| p.id() == *id)
    }

    pub fn find_match(&self, vrf_name: &str, prefix: &IpPrefix) -> Option<PatternId> {
        self.patterns
            .iter()
            .find(|p| p.is_match(vrf_name, prefix))
            .map(RoutePattern::id)
    }

    /// Inserts or updates a pattern. Overlapping inserts are rejected; a
    /// max-match-count change returns the binds/unbinds needed to restore
    /// the cap invariant.
    pub fn set_pattern(
        &mut self,
        pattern: RoutePattern,
    ) -> Result<PatternUpdate, PatternError> {
        if let Some(existing) = self.patterns.iter_mut().find(|p| p.id() == pattern.id()) {
            let old_max = existing.max_match_count;
            existing.max_match_count = pattern.max_match_count;
            let id = pattern.id();
            let new_max = pattern.max_match_count;
            let mut update = PatternUpdate::default();

            if new_max < old_max {
                // Shrink: prefer dropping pending binds, then bound entries.
                let bound = self.bound.entry(id.clone()).or_default();
                let mut excess = bound.len().saturating_sub(new_max);
                let pending: Vec<IpPrefix> = self
                    .pending_bind
                    .iter()
                    .filter(|(p, _)| *p == id)
                    .map(|(_, prefix)| *prefix)
                    .collect();
                for prefix in pending {
                    if excess == 0 {
                        break;
                    }
                    self.pending_bind.retain(|(p, x)| !(*p == id && *x == prefix));
                    self.unbound.entry(id.clone()).or_default().insert(prefix);
                    excess = excess.saturating_sub(1);
                }
                let surplus: Vec<IpPrefix> =
                    bound.keys().rev().take(excess).copied().collect();
                update.to_unbind = surplus;
            } else if new_max > old_max {
                let headroom = new_max - self.bound.get(&id).map_or(0, BTreeMap::len);
                let unbound = self.unbound.entry(id.clone()).or_default();
                for _ in 0..headroom {
                    match unbound.iter().next().copied() {
                        Some(prefix) => {
                            unbound.remove(&prefix);
                            update.to_bind.push(prefix);
                        }
                        None => break,
                    }
                }
            }
            return Ok(update);
        }

        if let Some(existing) = self.patterns.iter().find(|p| p.overlaps(&pattern)) {
            return Err(PatternError::Overlap(
                existing.vrf_name.clone(),
                existing.prefix,
            ));
        }
        self.patterns.push(pattern);
        Ok(PatternUpdate::default())
    }

    /// Drops a pattern; returns the counters to unbind.
    pub fn remove_pattern(&mut self, id: &PatternId) -> Vec<(IpPrefix, CounterOid)> {
        self.patterns.retain(|p| p.id() != *id);
        self.unbound.remove(id);
        self.pending_bind.retain(|(p, _)| p != id);
        self.pending_unbind.retain(|(p, _)| p != id);
        self.pending_flex.retain(|(p, _, _)| p != id);
        self.bound
            .remove(id)
            .map(|bound| bound.into_iter().collect())
            .unwrap_or_default()
    }

    /// Route lifecycle hook: a matching created route wants a counter.
    pub fn cache_route_add(&mut self, vrf_name: &str, prefix: &IpPrefix) {
        if let Some(id) = self.find_match(vrf_name, prefix) {
            self.pending_bind.push((id, *prefix));
        }
    }

    /// Route lifecycle hook: a matching removed route releases its counter.
    pub fn cache_route_remove(&mut self, vrf_name: &str, prefix: &IpPrefix) {
        if let Some(id) = self.find_match(vrf_name, prefix) {
            self.pending_unbind.push((id, *prefix));
        }
    }

    pub fn take_pending(&mut self) -> (Vec<(PatternId, IpPrefix)>, Vec<(PatternId, IpPrefix)>) {
        (
            std::mem::take(&mut self.pending_bind),
            std::mem::take(&mut self.pending_unbind),
        )
    }

    pub fn bound_count(&self, id: &PatternId) -> usize {
        self.bound.get(id).map_or(0, BTreeMap::len)
    }

    pub fn has_headroom(&self, id: &PatternId) -> bool {
        match self.pattern(id) {
            Some(pattern) => self.bound_count(id) < pattern.max_match_count,
            None => false,
        }
    }

    pub fn insert_bound(&mut self, id: &PatternId, prefix: IpPrefix, counter: CounterOid) {
        self.bound.entry(id.clone()).or_default().insert(prefix, counter);
        self.pending_flex.push((id.clone(), prefix, counter));
    }

    pub fn remove_bound(&mut self, id: &PatternId, prefix: &IpPrefix) -> Option<CounterOid> {
        self.pending_flex.retain(|(p, x, _)| !(p == id && x == prefix));
        self.bound.get_mut(id)?.remove(prefix)
    }

    pub fn is_bound(&self, id: &PatternId, prefix: &IpPrefix) -> bool {
        self.bound.get(id).is_some_and(|b| b.contains_key(prefix))
    }

    pub fn add_unbound(&mut self, id: &PatternId, prefix: IpPrefix) {
        self.unbound.entry(id.clone()).or_default().insert(prefix);
    }

    pub fn remove_unbound(&mut self, id: &PatternId, prefix: &IpPrefix) -> bool {
        self.unbound
            .get_mut(id)
            .map(|set| set.remove(prefix))
            .unwrap_or(false)
    }

    /// Pops one waiting prefix to fill a freed slot.
    pub fn pop_unbound(&mut self, id: &PatternId) -> Option<IpPrefix> {
        let set = self.unbound.get_mut(id)?;
        let prefix = set.iter().next().copied()?;
        set.remove(&prefix);
        Some(prefix)
    }

    pub fn unbound_len(&self, id: &PatternId) -> usize {
        self.unbound.get(id).map_or(0, BTreeSet::len)
    }

    /// Freshly bound counters ready for the flex promotion tick.
    pub fn take_flex_batch(&mut self) -> Vec<(PatternId, IpPrefix, CounterOid)> {
        std::mem::take(&mut self.pending_flex)
    }

    /// The public map key: `<prefix>` in the default VRF, else
    /// `<vrf>|<prefix>`.
    pub fn map_key(id: &PatternId, prefix: &IpPrefix) -> String {
        if id.0.is_empty() {
            prefix.to_string()
        } else {
            format!("{}|{}", id.0, prefix)
        }
    }

    /// Cap invariant: bound <= max, and a non-empty unbound cache implies
    /// the cap is met exactly.
    #[cfg(test)]
    pub fn check_cap_invariant(&self) -> bool {
        self.patterns.iter().all(|p| {
            let id = p.id();
            let bound = self.bound_count(&id);
            bound <= p.max_match_count
                && (self.unbound_len(&id) == 0 || bound == p.max_match_count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    fn pattern(vrf: &str, p: &str, max: usize) -> RoutePattern {
        RoutePattern::new(vrf, prefix(p), max)
    }

    #[test]
    fn matching_and_exact_default() {
        let p = pattern("", "10.0.0.0/8", 2);
        assert!(p.is_match("", &prefix("10.1.0.0/16")));
        assert!(!p.is_match("", &prefix("11.0.0.0/16")));
        assert!(!p.is_match("Vrf-red", &prefix("10.1.0.0/16")));

        let default = pattern("", "0.0.0.0/0", 1);
        assert!(default.exact_match);
        assert!(default.is_match("", &prefix("0.0.0.0/0")));
        assert!(!default.is_match("", &prefix("10.0.0.0/8")));
    }

    #[test]
    fn overlap_rejected_on_insert() {
        let mut state = FlowCounterState::new();
        state.set_pattern(pattern("", "10.0.0.0/8", 2)).unwrap();
        let err = state.set_pattern(pattern("", "10.1.0.0/16", 1));
        assert!(matches!(err, Err(PatternError::Overlap(_, _))));

        // A different VRF does not overlap.
        state.set_pattern(pattern("Vrf-red", "10.0.0.0/8", 2)).unwrap();
    }

    #[test]
    fn bind_up_to_cap_then_queue() {
        let mut state = FlowCounterState::new();
        state.set_pattern(pattern("", "10.0.0.0/8", 2)).unwrap();
        let id = ("".to_string(), prefix("10.0.0.0/8"));

        state.insert_bound(&id, prefix("10.1.0.0/16"), CounterOid::from_raw(1));
        state.insert_bound(&id, prefix("10.2.0.0/16"), CounterOid::from_raw(2));
        assert!(!state.has_headroom(&id));
        state.add_unbound(&id, prefix("10.3.0.0/16"));
        assert!(state.check_cap_invariant());

        // Freeing a slot lets the waiter in.
        state.remove_bound(&id, &prefix("10.1.0.0/16")).unwrap();
        assert_eq!(state.pop_unbound(&id), Some(prefix("10.3.0.0/16")));
        state.insert_bound(&id, prefix("10.3.0.0/16"), CounterOid::from_raw(3));
        assert!(state.check_cap_invariant());
    }

    #[test]
    fn max_match_decrease_unbinds_surplus() {
        let mut state = FlowCounterState::new();
        state.set_pattern(pattern("", "10.0.0.0/8", 3)).unwrap();
        let id = ("".to_string(), prefix("10.0.0.0/8"));
        for (i, p) in ["10.1.0.0/16", "10.2.0.0/16", "10.3.0.0/16"].iter().enumerate() {
            state.insert_bound(&id, prefix(p), CounterOid::from_raw(i as u64 + 1));
        }

        let update = state.set_pattern(pattern("", "10.0.0.0/8", 1)).unwrap();
        assert_eq!(update.to_unbind.len(), 2);
        assert!(update.to_bind.is_empty());
    }

    #[test]
    fn max_match_increase_pulls_from_unbound() {
        let mut state = FlowCounterState::new();
        state.set_pattern(pattern("", "10.0.0.0/8", 1)).unwrap();
        let id = ("".to_string(), prefix("10.0.0.0/8"));
        state.insert_bound(&id, prefix("10.1.0.0/16"), CounterOid::from_raw(1));
        state.add_unbound(&id, prefix("10.2.0.0/16"));
        state.add_unbound(&id, prefix("10.3.0.0/16"));

        let update = state.set_pattern(pattern("", "10.0.0.0/8", 3)).unwrap();
        assert_eq!(update.to_bind.len(), 2);
    }

    #[test]
    fn route_hooks_queue_pending_work() {
        let mut state = FlowCounterState::new();
        state.set_pattern(pattern("", "10.0.0.0/8", 2)).unwrap();

        state.cache_route_add("", &prefix("10.1.0.0/16"));
        state.cache_route_add("", &prefix("11.0.0.0/8"));
        state.cache_route_remove("", &prefix("10.2.0.0/16"));

        let (binds, unbinds) = state.take_pending();
        assert_eq!(binds.len(), 1);
        assert_eq!(unbinds.len(), 1);
        let (again, _) = state.take_pending();
        assert!(again.is_empty());
    }

    #[test]
    fn map_key_forms() {
        let id = ("".to_string(), prefix("10.0.0.0/8"));
        assert_eq!(FlowCounterState::map_key(&id, &prefix("10.1.0.0/16")), "10.1.0.0/16");
        let vrf_id = ("Vrf-red".to_string(), prefix("10.0.0.0/8"));
        assert_eq!(
            FlowCounterState::map_key(&vrf_id, &prefix("10.1.0.0/16")),
            "Vrf-red|10.1.0.0/16"
        );
    }
}
