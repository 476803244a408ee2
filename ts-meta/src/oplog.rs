//! Operation log CRUD, grounded on
//! `examples/original_source/controller/replication/operation_log.py`.
//! Timestamps are stored as the integer `created_at_ms` the Rust domain
//! model already committed to (`Operation::created_at_ms`), diverging from
//! the Python source's ISO-8601 `created_at` string by design.

use std::str::FromStr;

use rusqlite::{params, OptionalExtension};
use ts_api_types::{Operation, OperationPayload, OperationSummary, OpType, VectorClock};
use uuid::Uuid;

use crate::error::MetaResult;
use crate::store::Store;

fn inner_payload_json(payload: &OperationPayload) -> serde_json::Value {
    match payload {
        OperationPayload::UserCreated(p) => serde_json::to_value(p),
        OperationPayload::ApiKeyUpdated(p) => serde_json::to_value(p),
        OperationPayload::FileCreated(p) => serde_json::to_value(p),
        OperationPayload::FileDeleted(p) => serde_json::to_value(p),
        OperationPayload::TagsAdded(p) => serde_json::to_value(p),
        OperationPayload::TagsRemoved(p) => serde_json::to_value(p),
        OperationPayload::ChunksCreated(p) => serde_json::to_value(p),
    }
    .expect("payload structs always serialize")
}

fn build_payload(op_type: OpType, value: serde_json::Value) -> anyhow::Result<OperationPayload> {
    Ok(match op_type {
        OpType::UserCreated => OperationPayload::UserCreated(serde_json::from_value(value)?),
        OpType::ApiKeyUpdated => OperationPayload::ApiKeyUpdated(serde_json::from_value(value)?),
        OpType::FileCreated => OperationPayload::FileCreated(serde_json::from_value(value)?),
        OpType::FileDeleted => OperationPayload::FileDeleted(serde_json::from_value(value)?),
        OpType::TagsAdded => OperationPayload::TagsAdded(serde_json::from_value(value)?),
        OpType::TagsRemoved => OperationPayload::TagsRemoved(serde_json::from_value(value)?),
        OpType::ChunksCreated => OperationPayload::ChunksCreated(serde_json::from_value(value)?),
    })
}

fn row_to_operation(row: &rusqlite::Row) -> rusqlite::Result<Operation> {
    let op_id: String = row.get("op_id")?;
    let op_type: String = row.get("op_type")?;
    let user_id: String = row.get("user_id")?;
    let timestamp_ms: i64 = row.get("timestamp_ms")?;
    let vector_clock: String = row.get("vector_clock")?;
    let payload: String = row.get("payload")?;
    let applied: i64 = row.get("applied")?;
    let created_at_ms: i64 = row.get("created_at_ms")?;

    let op_type = OpType::from_str(&op_type)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, err.into()))?;
    let payload_value: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?;
    let payload = build_payload(op_type, payload_value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, err.into()))?;
    let vector_clock: VectorClock = serde_json::from_str(&vector_clock)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?;

    Ok(Operation {
        op_id: Uuid::parse_str(&op_id)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?,
        user_id: Uuid::parse_str(&user_id)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?,
        timestamp_ms,
        vector_clock,
        payload,
        applied: applied != 0,
        created_at_ms,
    })
}

impl Store {
    /// Idempotent on `op_id`: a duplicate insert is a no-op, matching
    /// `insert_operation`'s `INSERT OR IGNORE` in the original.
    pub fn insert_op(&self, op: &Operation) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO operations
                (op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                op.op_id.to_string(),
                op.op_type().as_str(),
                op.user_id.to_string(),
                op.timestamp_ms,
                serde_json::to_string(&op.vector_clock).expect("vector clock always serializes"),
                serde_json::to_string(&inner_payload_json(&op.payload)).expect("value always serializes"),
                op.applied as i64,
                op.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn mark_applied(&self, op_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE operations SET applied = 1 WHERE op_id = ?1",
            params![op_id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_op(&self, op_id: Uuid) -> MetaResult<Option<Operation>> {
        let conn = self.conn.lock();
        let op = conn
            .query_row(
                "SELECT op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms
                 FROM operations WHERE op_id = ?1",
                params![op_id.to_string()],
                row_to_operation,
            )
            .optional()?;
        Ok(op)
    }

    pub fn get_all_op_ids(&self) -> MetaResult<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT op_id FROM operations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(Uuid::parse_str(&row?).expect("stored op_id is always a valid uuid"));
        }
        Ok(ids)
    }

    pub fn get_ops_by_ids(&self, ids: &[Uuid]) -> MetaResult<Vec<Operation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms
             FROM operations WHERE op_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let params = rusqlite::params_from_iter(id_strings.iter());
        let rows = stmt.query_map(params, row_to_operation)?;
        let mut ops = Vec::new();
        for row in rows {
            ops.push(row?);
        }
        Ok(ops)
    }

    pub fn get_ops_for_user(&self, user_id: Uuid) -> MetaResult<Vec<Operation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms
             FROM operations WHERE user_id = ?1 ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_operation)?;
        let mut ops = Vec::new();
        for row in rows {
            ops.push(row?);
        }
        Ok(ops)
    }

    pub fn get_ops_by_type_for_user(&self, user_id: Uuid, op_type: OpType) -> MetaResult<Vec<Operation>> {
        Ok(self
            .get_ops_for_user(user_id)?
            .into_iter()
            .filter(|op| op.op_type() == op_type)
            .collect())
    }

    /// All ops of the given type whose username matches, across *every*
    /// candidate `user_id` — used to resolve concurrent `USER_CREATED`s for
    /// the same username regardless of which `user_id` each node minted.
    pub fn get_user_created_ops_for_username(&self, username: &str) -> MetaResult<Vec<Operation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms
             FROM operations WHERE op_type = 'USER_CREATED'",
        )?;
        let rows = stmt.query_map([], row_to_operation)?;
        let mut ops = Vec::new();
        for row in rows {
            let op: Operation = row?;
            if let OperationPayload::UserCreated(payload) = &op.payload {
                if payload.username == username {
                    ops.push(op);
                }
            }
        }
        Ok(ops)
    }

    /// All `FILE_CREATED` ops for a given `(owner_id, name)`, used to
    /// resolve concurrent file creation.
    pub fn get_file_created_ops_for_name(&self, owner_id: Uuid, name: &str) -> MetaResult<Vec<Operation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms
             FROM operations WHERE op_type = 'FILE_CREATED'",
        )?;
        let rows = stmt.query_map([], row_to_operation)?;
        let mut ops = Vec::new();
        for row in rows {
            let op: Operation = row?;
            if let OperationPayload::FileCreated(payload) = &op.payload {
                if payload.owner_id == owner_id && payload.name == name {
                    ops.push(op);
                }
            }
        }
        Ok(ops)
    }

    pub fn get_recent_summaries(&self, limit: u32) -> MetaResult<Vec<OperationSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT op_id, op_type, user_id, timestamp_ms, vector_clock, payload, applied, created_at_ms
             FROM operations ORDER BY timestamp_ms DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_operation)?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?.summary());
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_api_types::UserCreatedPayload;

    fn sample_op(username: &str) -> Operation {
        Operation {
            op_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            timestamp_ms: 1000,
            vector_clock: VectorClock::new(),
            payload: OperationPayload::UserCreated(UserCreatedPayload {
                user_id: Uuid::new_v4(),
                username: username.to_string(),
                password_hash: "hash".to_string(),
                api_key: None,
                created_at_ms: 1000,
            }),
            applied: false,
            created_at_ms: 1000,
        }
    }

    #[test]
    fn insert_is_idempotent_on_op_id() {
        let store = Store::open_in_memory("c1").unwrap();
        let op = sample_op("alice");
        store.insert_op(&op).unwrap();
        store.insert_op(&op).unwrap();
        assert_eq!(store.get_all_op_ids().unwrap().len(), 1);
    }

    #[test]
    fn mark_applied_flips_the_flag() {
        let store = Store::open_in_memory("c1").unwrap();
        let op = sample_op("alice");
        store.insert_op(&op).unwrap();
        store.mark_applied(op.op_id).unwrap();
        let reloaded = store.get_op(op.op_id).unwrap().unwrap();
        assert!(reloaded.applied);
    }

    #[test]
    fn get_ops_by_ids_returns_only_requested_and_handles_empty() {
        let store = Store::open_in_memory("c1").unwrap();
        let a = sample_op("alice");
        let b = sample_op("bob");
        store.insert_op(&a).unwrap();
        store.insert_op(&b).unwrap();

        assert!(store.get_ops_by_ids(&[]).unwrap().is_empty());
        let fetched = store.get_ops_by_ids(&[a.op_id]).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].op_id, a.op_id);
    }

    #[test]
    fn username_lookup_finds_all_candidates() {
        let store = Store::open_in_memory("c1").unwrap();
        let a = sample_op("alice");
        let b = sample_op("alice");
        store.insert_op(&a).unwrap();
        store.insert_op(&b).unwrap();
        assert_eq!(store.get_user_created_ops_for_username("alice").unwrap().len(), 2);
        assert!(store.get_user_created_ops_for_username("carol").unwrap().is_empty());
    }
}
