//! Request/response bodies for every RPC method in the external interfaces
//! section. Every message is a plain JSON object; binary chunk pieces are
//! base64-encoded so they fit the same envelope as everything else.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk_wire::{ChunkMetadata, TombstoneEntry};
use crate::operation::{Operation, OperationSummary};
use crate::vector_clock::VectorClock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Empty {}

// ---- coordinator <-> coordinator -----------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMessage {
    pub sender_id: String,
    pub sender_address: String,
    pub vector_clock: VectorClock,
    pub recent_summaries: Vec<OperationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipResponse {
    pub peer_id: String,
    pub vector_clock: VectorClock,
    pub missing_operation_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub peer_id: String,
    pub vector_clock: VectorClock,
    pub operation_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOperationsRequest {
    pub operation_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOperationsResponse {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOperationsRequest {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOperationsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryChunkLivenessRequest {
    pub chunk_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryChunkLivenessResponse {
    pub chunk_id: Uuid,
    pub is_live: bool,
    pub referenced_by_files: Vec<Uuid>,
}

// ---- storage <-> storage ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGossipMessage {
    pub sender_address: String,
    pub recent_chunk_summaries: Vec<crate::chunk_wire::ChunkSummary>,
    pub recent_tombstones: Vec<TombstoneEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGossipResponse {
    pub peer_address: String,
    pub missing_chunk_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStateSummary {
    pub chunk_ids: Vec<Uuid>,
    pub tombstone_ids: Vec<Uuid>,
    pub chunk_count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTombstonesRequest {
    pub tombstones: Vec<TombstoneEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTombstonesResponse {
    pub success: bool,
    pub processed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchChunkDataRequest {
    pub chunk_id: Uuid,
}

/// One frame of the `FetchChunkData`/`ReadChunk` response stream: either the
/// metadata header or a base64-encoded data piece, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChunkStreamFrame {
    Metadata(ChunkMetadata),
    Data(#[serde(with = "base64_bytes")] Vec<u8>),
}

// ---- coordinator -> storage -------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadChunkRequest {
    pub chunk_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkRequest {
    pub chunk_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateChunkRequest {
    pub chunk_id: Uuid,
    pub source_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateChunkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteChunkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub available: bool,
}

// ---- storage -> coordinator (HTTP heartbeat) -------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: Uuid,
    pub address: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_stream_frame_round_trips_binary_data() {
        let frame = ChunkStreamFrame::Data(vec![0, 1, 2, 255]);
        let encoded = serde_json::to_string(&frame).unwrap();
        let decoded: ChunkStreamFrame = serde_json::from_str(&encoded).unwrap();
        match decoded {
            ChunkStreamFrame::Data(bytes) => assert_eq!(bytes, vec![0, 1, 2, 255]),
            _ => panic!("expected data frame"),
        }
    }
}
