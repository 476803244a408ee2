//! Chunk placement, storage-node registry, and GC liveness marks. Grounded
//! on `examples/original_source/controller/chunk_placement.py`,
//! `chunkserver_registry.py`, and
//! `controller/replication/chunk_gc_manager.py`'s `chunk_liveness` table.

use rusqlite::{params, OptionalExtension};
use ts_api_types::{StorageNodeRecord, StorageNodeStatus};
use uuid::Uuid;

use crate::error::MetaResult;
use crate::store::Store;

fn status_str(status: StorageNodeStatus) -> &'static str {
    match status {
        StorageNodeStatus::Active => "active",
        StorageNodeStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> StorageNodeStatus {
    match s {
        "active" => StorageNodeStatus::Active,
        _ => StorageNodeStatus::Failed,
    }
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<StorageNodeRecord> {
    Ok(StorageNodeRecord {
        node_id: Uuid::parse_str(&row.get::<_, String>("node_id")?).expect("stored uuid is valid"),
        address: row.get("address")?,
        last_heartbeat_at_ms: row.get("last_heartbeat_at_ms")?,
        capacity_bytes: row.get::<_, i64>("capacity_bytes")? as u64,
        used_bytes: row.get::<_, i64>("used_bytes")? as u64,
        status: parse_status(&row.get::<_, String>("status")?),
    })
}

impl Store {
    // ---- chunk placement --------------------------------------------------

    pub fn record_chunk_location(&self, chunk_id: Uuid, storage_node_id: Uuid, now_ms: i64) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO chunk_locations (chunk_id, storage_node_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![chunk_id.to_string(), storage_node_id.to_string(), now_ms],
        )?;
        Ok(())
    }

    pub fn remove_chunk_location(&self, chunk_id: Uuid, storage_node_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM chunk_locations WHERE chunk_id = ?1 AND storage_node_id = ?2",
            params![chunk_id.to_string(), storage_node_id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_chunk_locations(&self, chunk_id: Uuid) -> MetaResult<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT storage_node_id FROM chunk_locations WHERE chunk_id = ?1")?;
        let rows = stmt.query_map(params![chunk_id.to_string()], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(Uuid::parse_str(&row?).expect("stored uuid is valid"));
        }
        Ok(ids)
    }

    /// All chunk ids known to the manifest, the placement target set for
    /// repair -- `chunk_placement.py`'s `get_all_chunk_ids` reads from the
    /// `chunks` (manifest) table, not `chunk_locations`.
    pub fn get_all_chunk_ids(&self) -> MetaResult<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT chunk_id FROM chunks")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(Uuid::parse_str(&row?).expect("stored uuid is valid"));
        }
        Ok(ids)
    }

    // ---- storage-node registry ---------------------------------------------

    pub fn record_heartbeat(&self, node_id: Uuid, address: &str, capacity_bytes: u64, used_bytes: u64, now_ms: i64) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO storage_nodes (node_id, address, last_heartbeat_at_ms, capacity_bytes, used_bytes, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active')
             ON CONFLICT(node_id) DO UPDATE SET
                address = excluded.address,
                last_heartbeat_at_ms = excluded.last_heartbeat_at_ms,
                capacity_bytes = excluded.capacity_bytes,
                used_bytes = excluded.used_bytes,
                status = 'active'",
            params![node_id.to_string(), address, now_ms, capacity_bytes as i64, used_bytes as i64],
        )?;
        Ok(())
    }

    pub fn mark_storage_node_failed(&self, node_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE storage_nodes SET status = 'failed' WHERE node_id = ?1",
            params![node_id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_storage_node_healthy(&self, node_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE storage_nodes SET status = 'active' WHERE node_id = ?1",
            params![node_id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_healthy_storage_nodes(&self) -> MetaResult<Vec<StorageNodeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT node_id, address, last_heartbeat_at_ms, capacity_bytes, used_bytes, status
             FROM storage_nodes WHERE status = 'active'",
        )?;
        let rows = stmt.query_map([], row_to_node)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    pub fn get_all_storage_nodes(&self) -> MetaResult<Vec<StorageNodeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT node_id, address, last_heartbeat_at_ms, capacity_bytes, used_bytes, status FROM storage_nodes",
        )?;
        let rows = stmt.query_map([], row_to_node)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    pub fn get_storage_node(&self, node_id: Uuid) -> MetaResult<Option<StorageNodeRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT node_id, address, last_heartbeat_at_ms, capacity_bytes, used_bytes, status
                 FROM storage_nodes WHERE node_id = ?1",
                params![node_id.to_string()],
                row_to_node,
            )
            .optional()?)
    }

    // ---- chunk GC liveness marks -------------------------------------------

    pub fn mark_chunk_for_gc(&self, chunk_id: Uuid, now_ms: i64) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chunk_liveness (chunk_id, marked_for_gc, last_verified_at_ms) VALUES (?1, 1, ?2)
             ON CONFLICT(chunk_id) DO UPDATE SET marked_for_gc = 1, last_verified_at_ms = excluded.last_verified_at_ms",
            params![chunk_id.to_string(), now_ms],
        )?;
        Ok(())
    }

    pub fn unmark_chunk_for_gc(&self, chunk_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE chunk_liveness SET marked_for_gc = 0 WHERE chunk_id = ?1",
            params![chunk_id.to_string()],
        )?;
        Ok(())
    }

    /// Batches by 10 per round, matching `_get_chunks_marked_for_gc`'s
    /// `LIMIT 10` -- bounds a single GC round's RPC fan-out.
    pub fn get_chunks_marked_for_gc(&self, limit: u32) -> MetaResult<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT chunk_id FROM chunk_liveness WHERE marked_for_gc = 1 LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(Uuid::parse_str(&row?).expect("stored uuid is valid"));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_list_chunk_locations() {
        let store = Store::open_in_memory("c1").unwrap();
        let chunk_id = Uuid::new_v4();
        let node_a = Uuid::new_v4();
        let node_b = Uuid::new_v4();
        store.record_chunk_location(chunk_id, node_a, 1).unwrap();
        store.record_chunk_location(chunk_id, node_b, 2).unwrap();
        let mut locations = store.get_chunk_locations(chunk_id).unwrap();
        locations.sort();
        let mut expected = vec![node_a, node_b];
        expected.sort();
        assert_eq!(locations, expected);
    }

    #[test]
    fn heartbeat_upserts_and_marks_active() {
        let store = Store::open_in_memory("c1").unwrap();
        let node_id = Uuid::new_v4();
        store.record_heartbeat(node_id, "10.0.0.1:9200", 1000, 10, 1).unwrap();
        store.mark_storage_node_failed(node_id).unwrap();
        assert!(store.get_healthy_storage_nodes().unwrap().is_empty());
        store.record_heartbeat(node_id, "10.0.0.1:9200", 1000, 20, 2).unwrap();
        assert_eq!(store.get_healthy_storage_nodes().unwrap().len(), 1);
    }

    #[test]
    fn gc_marks_round_trip() {
        let store = Store::open_in_memory("c1").unwrap();
        let chunk_id = Uuid::new_v4();
        store.mark_chunk_for_gc(chunk_id, 1).unwrap();
        assert_eq!(store.get_chunks_marked_for_gc(10).unwrap(), vec![chunk_id]);
        store.unmark_chunk_for_gc(chunk_id).unwrap();
        assert!(store.get_chunks_marked_for_gc(10).unwrap().is_empty());
    }
}
