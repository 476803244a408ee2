use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vector_clock::VectorClock;

/// Discriminant for [`OperationPayload`], kept as its own type so summaries
/// and log queries can filter by kind without deserializing the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    #[serde(rename = "USER_CREATED")]
    UserCreated,
    #[serde(rename = "API_KEY_UPDATED")]
    ApiKeyUpdated,
    #[serde(rename = "FILE_CREATED")]
    FileCreated,
    #[serde(rename = "FILE_DELETED")]
    FileDeleted,
    #[serde(rename = "TAGS_ADDED")]
    TagsAdded,
    #[serde(rename = "TAGS_REMOVED")]
    TagsRemoved,
    #[serde(rename = "CHUNKS_CREATED")]
    ChunksCreated,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::UserCreated => "USER_CREATED",
            OpType::ApiKeyUpdated => "API_KEY_UPDATED",
            OpType::FileCreated => "FILE_CREATED",
            OpType::FileDeleted => "FILE_DELETED",
            OpType::TagsAdded => "TAGS_ADDED",
            OpType::TagsRemoved => "TAGS_REMOVED",
            OpType::ChunksCreated => "CHUNKS_CREATED",
        }
    }
}

impl std::str::FromStr for OpType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "USER_CREATED" => OpType::UserCreated,
            "API_KEY_UPDATED" => OpType::ApiKeyUpdated,
            "FILE_CREATED" => OpType::FileCreated,
            "FILE_DELETED" => OpType::FileDeleted,
            "TAGS_ADDED" => OpType::TagsAdded,
            "TAGS_REMOVED" => OpType::TagsRemoved,
            "CHUNKS_CREATED" => OpType::ChunksCreated,
            other => anyhow::bail!("unknown op_type '{other}'"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifestEntry {
    pub chunk_id: Uuid,
    pub chunk_index: u32,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreatedPayload {
    pub user_id: Uuid,
    pub username: String,
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyUpdatedPayload {
    pub user_id: Uuid,
    pub new_api_key: String,
    pub key_updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCreatedPayload {
    pub file_id: Uuid,
    pub name: String,
    pub size: u64,
    pub owner_id: Uuid,
    pub created_at_ms: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeletedPayload {
    pub file_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub deleted_at_ms: i64,
    pub deleted_by_controller_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsAddedPayload {
    pub file_id: Uuid,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsRemovedPayload {
    pub file_id: Uuid,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunksCreatedPayload {
    pub file_id: Uuid,
    pub chunks: Vec<ChunkManifestEntry>,
}

/// The mutation carried by an [`Operation`], modeled as a tagged union so the
/// applier can dispatch with a `match` instead of a string-keyed lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op_type", content = "payload")]
pub enum OperationPayload {
    #[serde(rename = "USER_CREATED")]
    UserCreated(UserCreatedPayload),
    #[serde(rename = "API_KEY_UPDATED")]
    ApiKeyUpdated(ApiKeyUpdatedPayload),
    #[serde(rename = "FILE_CREATED")]
    FileCreated(FileCreatedPayload),
    #[serde(rename = "FILE_DELETED")]
    FileDeleted(FileDeletedPayload),
    #[serde(rename = "TAGS_ADDED")]
    TagsAdded(TagsAddedPayload),
    #[serde(rename = "TAGS_REMOVED")]
    TagsRemoved(TagsRemovedPayload),
    #[serde(rename = "CHUNKS_CREATED")]
    ChunksCreated(ChunksCreatedPayload),
}

impl OperationPayload {
    pub fn op_type(&self) -> OpType {
        match self {
            OperationPayload::UserCreated(_) => OpType::UserCreated,
            OperationPayload::ApiKeyUpdated(_) => OpType::ApiKeyUpdated,
            OperationPayload::FileCreated(_) => OpType::FileCreated,
            OperationPayload::FileDeleted(_) => OpType::FileDeleted,
            OperationPayload::TagsAdded(_) => OpType::TagsAdded,
            OperationPayload::TagsRemoved(_) => OpType::TagsRemoved,
            OperationPayload::ChunksCreated(_) => OpType::ChunksCreated,
        }
    }

    /// The dependency key this payload supplies once applied, e.g. a
    /// `FILE_CREATED` satisfies `file:<file_id>` for any waiter.
    pub fn satisfies_dependency(&self) -> Option<String> {
        match self {
            OperationPayload::FileCreated(p) => Some(format!("file:{}", p.file_id)),
            OperationPayload::UserCreated(p) => Some(format!("user:{}", p.user_id)),
            _ => None,
        }
    }
}

/// A full metadata-log entry: `(op_id, op_type, user_id, timestamp_ms,
/// vector_clock, payload, applied, created_at)` per the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: Uuid,
    pub user_id: Uuid,
    pub timestamp_ms: i64,
    pub vector_clock: VectorClock,
    #[serde(flatten)]
    pub payload: OperationPayload,
    pub applied: bool,
    pub created_at_ms: i64,
}

impl Operation {
    pub fn op_type(&self) -> OpType {
        self.payload.op_type()
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            op_id: self.op_id,
            op_type: self.op_type(),
            user_id: self.user_id,
            timestamp_ms: self.timestamp_ms,
            vector_clock: self.vector_clock.clone(),
        }
    }
}

/// An operation stripped of its payload, used to bound gossip message size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub op_id: Uuid,
    pub op_type: OpType,
    pub user_id: Uuid,
    pub timestamp_ms: i64,
    pub vector_clock: VectorClock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_round_trips_through_json() {
        let op = Operation {
            op_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            timestamp_ms: 1234,
            vector_clock: VectorClock::new(),
            payload: OperationPayload::FileCreated(FileCreatedPayload {
                file_id: Uuid::new_v4(),
                name: "report.pdf".into(),
                size: 42,
                owner_id: Uuid::new_v4(),
                created_at_ms: 1234,
                tags: vec!["invoice".into()],
            }),
            applied: true,
            created_at_ms: 1234,
        };

        let encoded = serde_json::to_string(&op).unwrap();
        assert!(encoded.contains("\"op_type\":\"FILE_CREATED\""));

        let decoded: Operation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.op_id, op.op_id);
        assert_eq!(decoded.op_type(), OpType::FileCreated);
    }

    #[test]
    fn file_created_satisfies_file_dependency() {
        let payload = OperationPayload::FileCreated(FileCreatedPayload {
            file_id: Uuid::nil(),
            name: "x".into(),
            size: 0,
            owner_id: Uuid::nil(),
            created_at_ms: 0,
            tags: vec![],
        });
        assert_eq!(
            payload.satisfies_dependency(),
            Some(format!("file:{}", Uuid::nil()))
        );
    }
}
