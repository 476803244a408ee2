use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of comparing two [`VectorClock`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Equal,
    Before,
    After,
    Concurrent,
}

/// `{controller_id: sequence}`, merged by component-wise max.
///
/// A `BTreeMap` keeps serialization and iteration order deterministic, which
/// matters for anything that hashes or diffs the encoded clock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clocks: BTreeMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(clocks: BTreeMap<String, u64>) -> Self {
        Self { clocks }
    }

    pub fn get(&self, controller_id: &str) -> u64 {
        self.clocks.get(controller_id).copied().unwrap_or(0)
    }

    pub fn as_map(&self) -> &BTreeMap<String, u64> {
        &self.clocks
    }

    pub fn into_map(self) -> BTreeMap<String, u64> {
        self.clocks
    }

    /// Increments this node's own component and returns the new value.
    pub fn increment(&mut self, controller_id: &str) -> u64 {
        let entry = self.clocks.entry(controller_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Component-wise max merge of `other` into `self`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (controller_id, seq) in &other.clocks {
            let entry = self.clocks.entry(controller_id.clone()).or_insert(0);
            if *seq > *entry {
                *entry = *seq;
            }
        }
    }

    /// `self <= other` component-wise (missing components treated as 0).
    pub fn le(&self, other: &VectorClock) -> bool {
        self.clocks
            .iter()
            .all(|(id, seq)| *seq <= other.get(id))
    }

    /// Strict causal precedence: `self <= other` and not `other <= self`.
    /// Uses the lattice comparison both ways rather than derived equality, so
    /// two clocks that are equal in value but differ in which zero
    /// components are stored (e.g. `{c1:0}` vs `{}`) still compare `Equal`.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.le(other) && !other.le(self)
    }

    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }

    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let le = self.le(other);
        let ge = other.le(self);
        match (le, ge) {
            (true, true) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (false, false) => ClockOrdering::Concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(pairs: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_map(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[test]
    fn increment_is_monotonic() {
        let mut a = VectorClock::new();
        assert_eq!(a.increment("c1"), 1);
        assert_eq!(a.increment("c1"), 2);
        assert_eq!(a.get("c1"), 2);
    }

    #[test]
    fn merge_is_componentwise_max() {
        let mut a = vc(&[("c1", 3), ("c2", 1)]);
        let b = vc(&[("c1", 1), ("c2", 5), ("c3", 2)]);
        a.merge(&b);
        assert_eq!(a.get("c1"), 3);
        assert_eq!(a.get("c2"), 5);
        assert_eq!(a.get("c3"), 2);
    }

    #[test]
    fn ordering_detects_before_after_concurrent_equal() {
        let a = vc(&[("c1", 1), ("c2", 1)]);
        let b = vc(&[("c1", 2), ("c2", 1)]);
        let c = vc(&[("c1", 1), ("c2", 2)]);

        assert_eq!(a.compare(&a), ClockOrdering::Equal);
        assert_eq!(a.compare(&b), ClockOrdering::Before);
        assert_eq!(b.compare(&a), ClockOrdering::After);
        assert_eq!(b.compare(&c), ClockOrdering::Concurrent);
        assert!(b.is_concurrent(&c));
    }

    #[test]
    fn missing_components_default_to_zero() {
        let a = vc(&[("c1", 0)]);
        let b = VectorClock::new();
        assert_eq!(a.compare(&b), ClockOrdering::Equal);
    }
}
