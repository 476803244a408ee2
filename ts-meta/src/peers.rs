//! Coordinator peer registry, grounded on
//! `examples/original_source/controller/replication/gossip_manager.py`'s
//! `_update_peer_state`/`_mark_peer_suspected_dead`. Keyed by `address`
//! rather than `node_id`, matching the original's `peer_state` table (`PK
//! peer_address`, `ON CONFLICT(peer_address)`) -- a peer's identity for
//! liveness tracking is the address gossiped with, and `node_id` /
//! `last_vector_clock` are mutable attributes of that address.

use rusqlite::params;
use ts_api_types::{CoordinatorPeerRecord, VectorClock};

use crate::error::MetaResult;
use crate::store::Store;

fn row_to_peer(row: &rusqlite::Row) -> rusqlite::Result<CoordinatorPeerRecord> {
    let vc_json: String = row.get("last_vector_clock")?;
    let last_vector_clock: VectorClock = serde_json::from_str(&vc_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?;
    Ok(CoordinatorPeerRecord {
        node_id: row.get("node_id")?,
        address: row.get("address")?,
        last_seen_at_ms: row.get("last_seen_at_ms")?,
        last_vector_clock,
        is_alive: row.get::<_, i64>("is_alive")? != 0,
    })
}

impl Store {
    pub fn update_peer_state(&self, address: &str, node_id: &str, vc: &VectorClock, now_ms: i64) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO peer_state (address, node_id, last_seen_at_ms, last_vector_clock, is_alive)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(address) DO UPDATE SET
                node_id = excluded.node_id,
                last_seen_at_ms = excluded.last_seen_at_ms,
                last_vector_clock = excluded.last_vector_clock,
                is_alive = 1",
            params![
                address,
                node_id,
                now_ms,
                serde_json::to_string(vc).expect("vector clock always serializes"),
            ],
        )?;
        Ok(())
    }

    pub fn mark_peer_suspected_dead(&self, address: &str) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE peer_state SET is_alive = 0 WHERE address = ?1", params![address])?;
        Ok(())
    }

    pub fn get_all_peers(&self) -> MetaResult<Vec<CoordinatorPeerRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT address, node_id, last_seen_at_ms, last_vector_clock, is_alive FROM peer_state")?;
        let rows = stmt.query_map([], row_to_peer)?;
        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_mark_dead_round_trips() {
        let store = Store::open_in_memory("c1").unwrap();
        store.update_peer_state("10.0.0.2:9100", "c2", &VectorClock::new(), 1).unwrap();
        let peers = store.get_all_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].is_alive);

        store.mark_peer_suspected_dead("10.0.0.2:9100").unwrap();
        let peers = store.get_all_peers().unwrap();
        assert!(!peers[0].is_alive);
    }
}
