use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of a chunk for gossip payloads; mirrors a chunk-index row minus
/// the blob path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: Uuid,
    pub checksum: String,
    pub size: u64,
}

/// `(chunk_id, deleted_at, checksum)`, retained indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TombstoneEntry {
    pub chunk_id: Uuid,
    pub deleted_at_ms: i64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: Uuid,
    pub file_id: Uuid,
    pub chunk_index: u32,
    pub total_size: u64,
    pub checksum: String,
}
