//! Vector-clock persistence, grounded on
//! `examples/original_source/controller/replication/operation_emitter.py`'s
//! `get_and_increment_vector_clock` and
//! `operation_applier.py`'s `_merge_vector_clock`.

use std::collections::BTreeMap;

use rusqlite::params;
use ts_api_types::VectorClock;

use crate::error::MetaResult;
use crate::store::Store;

impl Store {
    /// The full vector clock as last persisted, across every controller
    /// component this node has ever observed.
    pub fn current_vc(&self) -> MetaResult<VectorClock> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT controller_id, sequence FROM vector_clock_state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (controller_id, sequence) = row?;
            map.insert(controller_id, sequence);
        }
        Ok(VectorClock::from_map(map))
    }

    /// Atomically bumps this node's own component and returns the resulting
    /// full vector clock, the way `get_and_increment_vector_clock` returns
    /// the merged dict rather than just the bumped component.
    pub fn increment_local(&self) -> MetaResult<VectorClock> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vector_clock_state (controller_id, sequence) VALUES (?1, 1)
             ON CONFLICT(controller_id) DO UPDATE SET sequence = sequence + 1",
            params![self.controller_id()],
        )?;
        let mut stmt = conn.prepare("SELECT controller_id, sequence FROM vector_clock_state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (controller_id, sequence) = row?;
            map.insert(controller_id, sequence);
        }
        Ok(VectorClock::from_map(map))
    }

    /// Component-wise max merge of a remote clock into the persisted one.
    pub fn merge_remote_vc(&self, remote: &VectorClock) -> MetaResult<()> {
        let conn = self.conn.lock();
        for (controller_id, seq) in remote.as_map() {
            conn.execute(
                "INSERT INTO vector_clock_state (controller_id, sequence) VALUES (?1, ?2)
                 ON CONFLICT(controller_id) DO UPDATE SET sequence = MAX(sequence, excluded.sequence)",
                params![controller_id, *seq as i64],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_local_is_monotonic_and_returns_full_clock() {
        let store = Store::open_in_memory("c1").unwrap();
        let vc1 = store.increment_local().unwrap();
        assert_eq!(vc1.get("c1"), 1);
        let vc2 = store.increment_local().unwrap();
        assert_eq!(vc2.get("c1"), 2);
    }

    #[test]
    fn merge_remote_takes_componentwise_max() {
        let store = Store::open_in_memory("c1").unwrap();
        store.increment_local().unwrap();
        let remote = VectorClock::from_map(BTreeMap::from([("c2".to_string(), 5u64)]));
        store.merge_remote_vc(&remote).unwrap();
        let merged = store.current_vc().unwrap();
        assert_eq!(merged.get("c1"), 1);
        assert_eq!(merged.get("c2"), 5);
    }
}
