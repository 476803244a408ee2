use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `User: (user_id, username unique, password_hash, api_key unique nullable,
/// created_at, key_updated_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub api_key: Option<String>,
    pub created_at_ms: i64,
    pub key_updated_at_ms: i64,
}

/// `File: (file_id, name, size, owner_id, created_at, deleted_flag)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: Uuid,
    pub name: String,
    pub size: u64,
    pub owner_id: Uuid,
    pub created_at_ms: i64,
}

/// `(file_id, owner_id, name, deleted_at, deleted_by_controller_id, operation_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTombstone {
    pub file_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub deleted_at_ms: i64,
    pub deleted_by_controller_id: String,
    pub operation_id: Uuid,
}

/// `(chunk_id, file_id, chunk_index, size, checksum)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifestRow {
    pub chunk_id: Uuid,
    pub file_id: Uuid,
    pub chunk_index: u32,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageNodeStatus {
    Active,
    Failed,
}

/// `(node_id, address, last_heartbeat_at, capacity_bytes, used_bytes, status)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNodeRecord {
    pub node_id: Uuid,
    pub address: String,
    pub last_heartbeat_at_ms: i64,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub status: StorageNodeStatus,
}

/// `(node_id, address, last_seen_at, last_vector_clock)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorPeerRecord {
    pub node_id: String,
    pub address: String,
    pub last_seen_at_ms: i64,
    pub last_vector_clock: crate::vector_clock::VectorClock,
    pub is_alive: bool,
}

/// `(chunk_id, marked_for_gc_bool, last_verified_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLivenessHint {
    pub chunk_id: Uuid,
    pub marked_for_gc: bool,
    pub last_verified_at_ms: i64,
}
