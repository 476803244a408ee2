//! Deferred-application queue, grounded on the `_deferred_operations` /
//! `_operation_dependencies` module-level state in
//! `examples/original_source/controller/replication/operation_applier.py`.
//! Per SPEC_FULL.md §4.3: a single mutex protects both the waiter map and
//! its reverse dependency index, so a waiter is retried at most once per
//! dependency satisfaction.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use ts_api_types::Operation;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    waiters: HashMap<Uuid, Operation>,
    by_dependency: HashMap<String, HashSet<Uuid>>,
}

#[derive(Default)]
pub struct DeferredQueue {
    inner: Mutex<Inner>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, dependency_key: String, op: Operation) {
        let mut inner = self.inner.lock();
        inner.by_dependency.entry(dependency_key).or_default().insert(op.op_id);
        inner.waiters.insert(op.op_id, op);
    }

    /// Pops every waiter registered against `dependency_key`, for the
    /// caller to retry applying. A waiter is removed from both maps the
    /// moment it's popped, so no double-retry can happen even if the
    /// caller re-defers it under the same key.
    pub fn take_waiters(&self, dependency_key: &str) -> Vec<Operation> {
        let mut inner = self.inner.lock();
        let Some(op_ids) = inner.by_dependency.remove(dependency_key) else {
            return Vec::new();
        };
        op_ids.into_iter().filter_map(|id| inner.waiters.remove(&id)).collect()
    }

    /// Snapshot of every currently-deferred op, for the periodic sweeper
    /// (`start_deferred_operations_manager`'s 10s loop in the original).
    pub fn snapshot(&self) -> Vec<Operation> {
        self.inner.lock().waiters.values().cloned().collect()
    }

    /// Drops a waiter without retrying it -- used by the sweeper when it
    /// discovers the op was already applied through another path.
    pub fn remove(&self, op_id: Uuid) {
        let mut inner = self.inner.lock();
        inner.waiters.remove(&op_id);
        inner.by_dependency.retain(|_, ids| {
            ids.remove(&op_id);
            !ids.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_api_types::{OperationPayload, TagsAddedPayload, VectorClock};

    fn waiter_op(file_id: Uuid) -> Operation {
        Operation {
            op_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            timestamp_ms: 1,
            vector_clock: VectorClock::new(),
            payload: OperationPayload::TagsAdded(TagsAddedPayload { file_id, tags: vec!["x".into()] }),
            applied: false,
            created_at_ms: 1,
        }
    }

    #[test]
    fn take_waiters_returns_and_clears_registered_ops() {
        let queue = DeferredQueue::new();
        let file_id = Uuid::new_v4();
        let dep_key = format!("file:{file_id}");
        let op = waiter_op(file_id);
        queue.defer(dep_key.clone(), op.clone());
        assert_eq!(queue.len(), 1);

        let waiters = queue.take_waiters(&dep_key);
        assert_eq!(waiters.len(), 1);
        assert_eq!(waiters[0].op_id, op.op_id);
        assert!(queue.is_empty());
        assert!(queue.take_waiters(&dep_key).is_empty());
    }

    #[test]
    fn remove_clears_both_maps() {
        let queue = DeferredQueue::new();
        let file_id = Uuid::new_v4();
        let dep_key = format!("file:{file_id}");
        let op = waiter_op(file_id);
        queue.defer(dep_key.clone(), op.clone());
        queue.remove(op.op_id);
        assert!(queue.is_empty());
        assert!(queue.take_waiters(&dep_key).is_empty());
    }
}
