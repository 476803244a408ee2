//! Storage-tier RPC surface: server-side handlers for every storage<->storage
//! and coordinator->storage method in SPEC_FULL.md §6, plus client-side call
//! helpers, grounded on
//! `examples/original_source/chunkserver/replication/chunk_replication_service.py`
//! (server handlers) and `chunk_replication_client.py` (client calls), adapted
//! to `ts-wire`'s length-delimited JSON framing instead of gRPC.
//!
//! Streaming methods (`FetchChunkData`/`ReadChunk`/`WriteChunk`) don't rely on
//! a dedicated end-of-stream frame or a half-closed socket: the metadata frame
//! carries `total_size`, and the reader keeps pulling `Data` frames until it
//! has accumulated that many bytes. A missing chunk on a fetch is signalled by
//! closing the connection without writing any frame at all, which `read_json`
//! already surfaces as `None` -- the same "nothing to do" shape §7 uses for
//! every other not-found case.

use std::sync::Arc;

use async_trait::async_trait;
use ts_api_types::chunk_wire::ChunkMetadata;
use ts_api_types::{
    ChunkGossipMessage, ChunkGossipResponse, ChunkStateSummary, ChunkStreamFrame, DeleteChunkRequest,
    DeleteChunkResponse, Empty, FetchChunkDataRequest, PingResponse, PushTombstonesRequest, PushTombstonesResponse,
    ReadChunkRequest, ReplicateChunkRequest, ReplicateChunkResponse, WriteChunkResponse,
};
use ts_wire::{call_unary, dial_method, read_json, read_json_required, write_json, JsonFramed, RpcHandler};
use uuid::Uuid;

use crate::blobstore::BlobStore;
use crate::checksum;
use crate::gossip;
use crate::index::{ChunkIndex, ChunkIndexEntry};

pub struct ChunkGossipHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
    pub advertise_addr: String,
}

#[async_trait]
impl RpcHandler for ChunkGossipHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: ChunkGossipMessage = read_json_required(&mut conn).await?;
        let missing_chunk_ids = gossip::apply_gossip(&self.index, &self.blobstore, &request);
        let response = ChunkGossipResponse { peer_address: self.advertise_addr.clone(), missing_chunk_ids };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

pub struct GetChunkStateSummaryHandler {
    pub index: Arc<ChunkIndex>,
}

#[async_trait]
impl RpcHandler for GetChunkStateSummaryHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let _request: Empty = read_json_required(&mut conn).await?;
        let chunk_ids = self.index.get_all_chunk_ids();
        let response = ChunkStateSummary {
            chunk_count: chunk_ids.len() as u64,
            total_size_bytes: self.index.total_size_bytes(),
            chunk_ids,
            tombstone_ids: self.index.get_all_tombstone_ids(),
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

pub struct PushTombstonesHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
}

#[async_trait]
impl RpcHandler for PushTombstonesHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: PushTombstonesRequest = read_json_required(&mut conn).await?;
        let processed = apply_tombstones(&self.index, &self.blobstore, &request.tombstones);
        let response = PushTombstonesResponse { success: true, processed_count: processed as u64, error_message: None };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

/// Shared by gossip application and the explicit `PushTombstones` method:
/// delete the local blob (if any) before recording the tombstone.
fn apply_tombstones(index: &ChunkIndex, blobstore: &BlobStore, tombstones: &[ts_api_types::chunk_wire::TombstoneEntry]) -> usize {
    let mut processed = 0;
    for tombstone in tombstones {
        if !index.is_tombstoned(tombstone.chunk_id) {
            if index.chunk_exists(tombstone.chunk_id) {
                if let Err(err) = blobstore.delete_chunk(tombstone.chunk_id) {
                    log::warn!("push tombstones: failed to delete blob for chunk {}: {err}", tombstone.chunk_id);
                }
                index.remove_chunk(tombstone.chunk_id);
            }
            index.add_tombstone(tombstone.chunk_id, tombstone.deleted_at_ms, tombstone.checksum.clone());
        }
        processed += 1;
    }
    processed
}

pub struct FetchChunkDataHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
}

#[async_trait]
impl RpcHandler for FetchChunkDataHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: FetchChunkDataRequest = read_json_required(&mut conn).await?;
        serve_chunk_stream(&mut conn, &self.index, &self.blobstore, request.chunk_id).await
    }
}

pub struct ReadChunkHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
}

#[async_trait]
impl RpcHandler for ReadChunkHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: ReadChunkRequest = read_json_required(&mut conn).await?;
        serve_chunk_stream(&mut conn, &self.index, &self.blobstore, request.chunk_id).await
    }
}

/// Writes the `Metadata` then `Data` frames for a chunk, or closes the
/// connection without writing anything when the chunk isn't known locally.
async fn serve_chunk_stream(conn: &mut JsonFramed, index: &ChunkIndex, blobstore: &BlobStore, chunk_id: Uuid) -> anyhow::Result<()> {
    let Some(entry) = index.get_chunk(chunk_id) else {
        log::debug!("fetch/read chunk: {chunk_id} not found locally, closing without a frame");
        return Ok(());
    };
    let metadata = ChunkMetadata {
        chunk_id: entry.chunk_id,
        file_id: entry.file_id,
        chunk_index: entry.chunk_index,
        total_size: entry.size,
        checksum: entry.checksum.clone(),
    };
    write_json(conn, &ChunkStreamFrame::Metadata(metadata)).await?;

    let pieces = blobstore.read_chunk_streaming(chunk_id)?;
    for piece in pieces {
        let piece = piece?;
        write_json(conn, &ChunkStreamFrame::Data(piece)).await?;
    }
    Ok(())
}

pub struct WriteChunkHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
}

#[async_trait]
impl RpcHandler for WriteChunkHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let response = match receive_chunk_stream(&mut conn, &self.index, &self.blobstore).await {
            Ok(()) => WriteChunkResponse { success: true, error_message: None },
            Err(err) => WriteChunkResponse { success: false, error_message: Some(err.to_string()) },
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

/// Reads a `Metadata` frame then `Data` frames until `total_size` bytes have
/// been accumulated, verifies the checksum, and stores the chunk. A checksum
/// mismatch is a hard error here (unlike anti-entropy's silent discard,
/// §4.7) since this is a direct write the caller is actively waiting on.
async fn receive_chunk_stream(conn: &mut JsonFramed, index: &ChunkIndex, blobstore: &BlobStore) -> anyhow::Result<()> {
    let frame: ChunkStreamFrame = read_json_required(conn).await?;
    let ChunkStreamFrame::Metadata(metadata) = frame else {
        anyhow::bail!("expected metadata frame first");
    };

    let mut data = Vec::with_capacity(metadata.total_size as usize);
    while (data.len() as u64) < metadata.total_size {
        let frame: ChunkStreamFrame = read_json_required(conn).await?;
        match frame {
            ChunkStreamFrame::Data(piece) => data.extend(piece),
            ChunkStreamFrame::Metadata(_) => anyhow::bail!("unexpected second metadata frame"),
        }
    }

    if !checksum::verify_checksum(&data, &metadata.checksum) {
        anyhow::bail!("checksum mismatch for chunk {}", metadata.chunk_id);
    }

    let blob_path = blobstore.write_chunk(metadata.chunk_id, &data)?;
    index.add_chunk(ChunkIndexEntry {
        chunk_id: metadata.chunk_id,
        file_id: metadata.file_id,
        chunk_index: metadata.chunk_index,
        size: metadata.total_size,
        checksum: metadata.checksum,
        blob_path,
    });
    Ok(())
}

pub struct DeleteChunkHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
}

/// Grounded on `grpc_server.py`'s `DeleteChunk`: deleting an absent chunk is
/// still a success (`error_message` just notes it), matching §7's "not found
/// is nothing to do" policy. A tombstone is recorded on every delete
/// regardless -- the Python source's handler never builds one, but §4.9
/// requires this RPC to be the seed of tombstone gossip, so this repo adds
/// it here (see DESIGN.md).
#[async_trait]
impl RpcHandler for DeleteChunkHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: DeleteChunkRequest = read_json_required(&mut conn).await?;
        let existed = self.index.get_chunk(request.chunk_id);
        self.blobstore.delete_chunk(request.chunk_id).ok();
        self.index.remove_chunk(request.chunk_id);

        let checksum = existed.map(|entry| entry.checksum).unwrap_or_default();
        self.index.add_tombstone(request.chunk_id, ts_tools::now_ms(), checksum);

        let response = if self.blobstore.chunk_exists(request.chunk_id) {
            DeleteChunkResponse { success: false, error_message: Some("failed to remove chunk blob".to_string()) }
        } else {
            DeleteChunkResponse { success: true, error_message: None }
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

pub struct ReplicateChunkHandler {
    pub index: Arc<ChunkIndex>,
    pub blobstore: Arc<BlobStore>,
}

#[async_trait]
impl RpcHandler for ReplicateChunkHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: ReplicateChunkRequest = read_json_required(&mut conn).await?;
        let response = match fetch_and_store_chunk(&self.index, &self.blobstore, &request.source_address, request.chunk_id).await {
            Ok(true) => ReplicateChunkResponse { success: true, error: None },
            Ok(false) => ReplicateChunkResponse { success: false, error: Some("chunk not found on source or locally tombstoned".to_string()) },
            Err(err) => ReplicateChunkResponse { success: false, error: Some(err.to_string()) },
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

pub struct PingHandler;

#[async_trait]
impl RpcHandler for PingHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let _request: Empty = read_json_required(&mut conn).await?;
        write_json(&mut conn, &PingResponse { available: true }).await?;
        Ok(())
    }
}

// ---- shared fetch helper, used by ReplicateChunk and anti-entropy ----------

/// Fetches one chunk from `source_address` and stores it locally, honoring
/// the resurrection guard (§4.7): a locally-tombstoned chunk is never
/// fetched, only ever re-created by a fresh client write. Returns `Ok(false)`
/// for "nothing to do" cases (not found on source, locally tombstoned,
/// already present) rather than treating them as errors, per §7.
pub async fn fetch_and_store_chunk(index: &ChunkIndex, blobstore: &BlobStore, source_address: &str, chunk_id: Uuid) -> anyhow::Result<bool> {
    if index.is_tombstoned(chunk_id) {
        log::debug!("fetch_and_store_chunk: {chunk_id} is locally tombstoned, refusing to resurrect");
        return Ok(false);
    }
    if index.chunk_exists(chunk_id) {
        return Ok(true);
    }

    let Some((metadata, data)) = call_fetch_chunk_data(source_address, chunk_id).await? else {
        return Ok(false);
    };

    if !checksum::verify_checksum(&data, &metadata.checksum) {
        log::warn!("fetch_and_store_chunk: checksum mismatch for {chunk_id} from {source_address}, discarding");
        return Ok(false);
    }

    let blob_path = blobstore.write_chunk(chunk_id, &data)?;
    index.add_chunk(ChunkIndexEntry {
        chunk_id,
        file_id: metadata.file_id,
        chunk_index: metadata.chunk_index,
        size: metadata.total_size,
        checksum: metadata.checksum,
        blob_path,
    });
    Ok(true)
}

// ---- client-side call helpers ----------------------------------------------

pub async fn call_chunk_gossip(addr: &str, request: &ChunkGossipMessage) -> anyhow::Result<ChunkGossipResponse> {
    call_unary(addr, "ChunkGossip", request).await
}

pub async fn call_get_chunk_state_summary(addr: &str) -> anyhow::Result<ChunkStateSummary> {
    call_unary(addr, "GetChunkStateSummary", &Empty {}).await
}

pub async fn call_push_tombstones(addr: &str, tombstones: Vec<ts_api_types::chunk_wire::TombstoneEntry>) -> anyhow::Result<PushTombstonesResponse> {
    call_unary(addr, "PushTombstones", &PushTombstonesRequest { tombstones }).await
}

pub async fn call_ping(addr: &str) -> anyhow::Result<PingResponse> {
    call_unary(addr, "Ping", &Empty {}).await
}

/// Streams `FetchChunkData`, returning `Ok(None)` when the peer closed the
/// connection without sending a metadata frame (chunk not found there).
pub async fn call_fetch_chunk_data(addr: &str, chunk_id: Uuid) -> anyhow::Result<Option<(ChunkMetadata, Vec<u8>)>> {
    let mut conn = dial_method(addr, "FetchChunkData").await?;
    write_json(&mut conn, &FetchChunkDataRequest { chunk_id }).await?;

    let Some(frame) = read_json::<ChunkStreamFrame>(&mut conn).await? else {
        return Ok(None);
    };
    let ChunkStreamFrame::Metadata(metadata) = frame else {
        anyhow::bail!("expected metadata frame first from {addr}");
    };

    let mut data = Vec::with_capacity(metadata.total_size as usize);
    while (data.len() as u64) < metadata.total_size {
        let frame: ChunkStreamFrame = read_json_required(&mut conn).await?;
        match frame {
            ChunkStreamFrame::Data(piece) => data.extend(piece),
            ChunkStreamFrame::Metadata(_) => anyhow::bail!("unexpected second metadata frame from {addr}"),
        }
    }
    Ok(Some((metadata, data)))
}

/// Streams `WriteChunk`: metadata frame, then the blob in
/// `blobstore::STREAM_PIECE_SIZE_BYTES` pieces.
pub async fn call_write_chunk(addr: &str, metadata: ChunkMetadata, data: &[u8]) -> anyhow::Result<WriteChunkResponse> {
    let mut conn = dial_method(addr, "WriteChunk").await?;
    write_json(&mut conn, &ChunkStreamFrame::Metadata(metadata)).await?;
    for piece in data.chunks(crate::blobstore::STREAM_PIECE_SIZE_BYTES) {
        write_json(&mut conn, &ChunkStreamFrame::Data(piece.to_vec())).await?;
    }
    read_json_required(&mut conn).await
}
