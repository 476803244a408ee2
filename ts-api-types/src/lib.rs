//! Shared domain, operation-log and wire types for the tagstore replication
//! core. Nothing in this crate talks to a socket or a disk; it only defines
//! the shapes that cross those boundaries so coordinator and storage code
//! can agree on them without depending on each other.

pub mod chunk_wire;
pub mod domain;
pub mod operation;
pub mod vector_clock;
pub mod wire;

pub use domain::{
    ChunkLivenessHint, ChunkManifestRow, CoordinatorPeerRecord, FileRecord, FileTombstone,
    StorageNodeRecord, StorageNodeStatus, User,
};
pub use operation::{
    ApiKeyUpdatedPayload, ChunkManifestEntry, ChunksCreatedPayload, FileCreatedPayload, FileDeletedPayload,
    Operation, OperationPayload, OperationSummary, OpType, TagsAddedPayload, TagsRemovedPayload, UserCreatedPayload,
};
pub use vector_clock::{ClockOrdering, VectorClock};
pub use wire::{
    ChunkGossipMessage, ChunkGossipResponse, ChunkStateSummary, ChunkStreamFrame, DeleteChunkRequest,
    DeleteChunkResponse, Empty, FetchChunkDataRequest, FetchOperationsRequest, FetchOperationsResponse,
    GossipMessage, GossipResponse, HeartbeatRequest, PingResponse, PushOperationsRequest, PushOperationsResponse,
    PushTombstonesRequest, PushTombstonesResponse, QueryChunkLivenessRequest, QueryChunkLivenessResponse,
    ReadChunkRequest, ReplicateChunkRequest, ReplicateChunkResponse, StateSummary, WriteChunkResponse,
};
