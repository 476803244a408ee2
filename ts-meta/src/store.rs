//! Embedded SQLite metadata store: one file holding every table named in
//! SPEC_FULL.md §3. All access goes through a single `parking_lot::Mutex`
//! per §5 ("the operation log and VC tracker: single serializing mutex") —
//! the log is not a hot path, so one connection behind one lock is enough,
//! matching the teacher's preference for a single embedded database per
//! datastore (`pbs-datastore`'s chunk store uses a comparable single-writer
//! discipline).

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::MetaResult;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS operations (
    op_id           TEXT PRIMARY KEY,
    op_type         TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    timestamp_ms    INTEGER NOT NULL,
    vector_clock    TEXT NOT NULL,
    payload         TEXT NOT NULL,
    applied         INTEGER NOT NULL DEFAULT 0,
    created_at_ms   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operations_user ON operations(user_id);
CREATE INDEX IF NOT EXISTS idx_operations_timestamp ON operations(timestamp_ms);

CREATE TABLE IF NOT EXISTS vector_clock_state (
    controller_id   TEXT PRIMARY KEY,
    sequence        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    user_id             TEXT PRIMARY KEY,
    username            TEXT NOT NULL UNIQUE,
    password_hash       TEXT NOT NULL,
    api_key             TEXT UNIQUE,
    created_at_ms       INTEGER NOT NULL,
    key_updated_at_ms   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    file_id         TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    size            INTEGER NOT NULL,
    owner_id        TEXT NOT NULL,
    created_at_ms   INTEGER NOT NULL,
    UNIQUE(owner_id, name)
);

CREATE TABLE IF NOT EXISTS file_tombstones (
    owner_id                    TEXT NOT NULL,
    name                        TEXT NOT NULL,
    file_id                     TEXT NOT NULL,
    deleted_at_ms               INTEGER NOT NULL,
    deleted_by_controller_id    TEXT NOT NULL,
    operation_id                TEXT NOT NULL,
    PRIMARY KEY (owner_id, name)
);

CREATE TABLE IF NOT EXISTS tags (
    file_id     TEXT NOT NULL,
    tag         TEXT NOT NULL,
    PRIMARY KEY (file_id, tag)
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id        TEXT PRIMARY KEY,
    file_id         TEXT NOT NULL,
    chunk_index     INTEGER NOT NULL,
    size            INTEGER NOT NULL,
    checksum        TEXT NOT NULL,
    UNIQUE(file_id, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id);

CREATE TABLE IF NOT EXISTS chunk_locations (
    chunk_id            TEXT NOT NULL,
    storage_node_id     TEXT NOT NULL,
    created_at_ms       INTEGER NOT NULL,
    PRIMARY KEY (chunk_id, storage_node_id)
);

CREATE TABLE IF NOT EXISTS storage_nodes (
    node_id                 TEXT PRIMARY KEY,
    address                 TEXT NOT NULL,
    last_heartbeat_at_ms    INTEGER NOT NULL,
    capacity_bytes          INTEGER NOT NULL,
    used_bytes              INTEGER NOT NULL,
    status                  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS peer_state (
    address             TEXT PRIMARY KEY,
    node_id             TEXT NOT NULL,
    last_seen_at_ms     INTEGER NOT NULL,
    last_vector_clock   TEXT NOT NULL,
    is_alive            INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunk_liveness (
    chunk_id            TEXT PRIMARY KEY,
    marked_for_gc       INTEGER NOT NULL,
    last_verified_at_ms INTEGER NOT NULL
);
"#;

pub struct Store {
    pub(crate) conn: Mutex<Connection>,
    controller_id: String,
}

impl Store {
    pub fn open(path: &Path, controller_id: impl Into<String>) -> MetaResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| anyhow::anyhow!(err))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn), controller_id: controller_id.into() })
    }

    /// An in-memory store for tests.
    pub fn open_in_memory(controller_id: impl Into<String>) -> MetaResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn), controller_id: controller_id.into() })
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_store_and_creates_schema() {
        let store = Store::open_in_memory("c1").unwrap();
        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='operations'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
