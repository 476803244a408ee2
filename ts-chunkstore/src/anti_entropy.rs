//! Chunk-tier pull anti-entropy, grounded on
//! `examples/original_source/chunkserver/replication/chunk_anti_entropy_manager.py`:
//! once per tick, pick one random peer, exchange complete chunk-state
//! summaries, fetch what's missing locally and push what the peer is
//! missing, then exchange tombstone deltas.
//!
//! The original's `push_chunk_data` client call is a stub that logs success
//! without transmitting any bytes (`chunk_replication_client.py`). §4.6/§4.7
//! and the GLOSSARY's "full replication" entry treat eventual full
//! replication as a hard guarantee, so a faithful no-op here would silently
//! break it. This repo pushes for real: rather than inventing a push-shaped
//! RPC, it asks the peer to pull from us via the existing `ReplicateChunk`
//! method (`{chunk_id, source_address: <this node>}`), which is already
//! wired to call back into `rpc::fetch_and_store_chunk` on the peer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use ts_api_types::{ReplicateChunkRequest, ReplicateChunkResponse};
use ts_discovery::PeerCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::blobstore::BlobStore;
use crate::index::ChunkIndex;
use crate::rpc;

#[allow(clippy::too_many_arguments)]
pub fn spawn_chunk_anti_entropy_loop(
    index: Arc<ChunkIndex>,
    blobstore: Arc<BlobStore>,
    peer_cache: Arc<PeerCache>,
    advertise_addr: String,
    chunkserver_service_name: String,
    chunkserver_port: u16,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    anti_entropy_round(&index, &blobstore, &peer_cache, &advertise_addr, &chunkserver_service_name, chunkserver_port).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("chunk anti-entropy loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

async fn anti_entropy_round(
    index: &Arc<ChunkIndex>,
    blobstore: &Arc<BlobStore>,
    peer_cache: &Arc<PeerCache>,
    advertise_addr: &str,
    chunkserver_service_name: &str,
    chunkserver_port: u16,
) {
    let peers: Vec<String> = ts_discovery::discover_peers(peer_cache, chunkserver_service_name, chunkserver_port)
        .into_iter()
        .filter(|addr| addr != advertise_addr)
        .collect();
    let Some(peer) = peers.choose(&mut rand::thread_rng()) else {
        log::debug!("chunk anti-entropy round: no peers discovered");
        return;
    };

    let peer_summary = match rpc::call_get_chunk_state_summary(peer).await {
        Ok(summary) => summary,
        Err(err) => {
            log::warn!("chunk anti-entropy round: failed to reach {peer}: {err}");
            return;
        }
    };

    let my_chunk_ids: HashSet<Uuid> = index.get_all_chunk_ids().into_iter().collect();
    let my_tombstone_ids: HashSet<Uuid> = index.get_all_tombstone_ids().into_iter().collect();
    let peer_chunk_ids: HashSet<Uuid> = peer_summary.chunk_ids.into_iter().collect();
    let peer_tombstone_ids: HashSet<Uuid> = peer_summary.tombstone_ids.into_iter().collect();

    let missing_from_me: Vec<Uuid> = peer_chunk_ids.difference(&my_chunk_ids).copied().filter(|id| !my_tombstone_ids.contains(id)).collect();
    let missing_from_peer: Vec<Uuid> = my_chunk_ids.difference(&peer_chunk_ids).copied().filter(|id| !peer_tombstone_ids.contains(id)).collect();

    if !missing_from_me.is_empty() {
        fetch_chunks_from_peer(index, blobstore, peer, &missing_from_me).await;
    }
    if !missing_from_peer.is_empty() {
        push_chunks_to_peer(advertise_addr, peer, &missing_from_peer).await;
    }

    let tombstone_delta: Vec<_> = my_tombstone_ids
        .difference(&peer_tombstone_ids)
        .filter_map(|id| index.get_tombstone(*id))
        .collect();
    if !tombstone_delta.is_empty() {
        match rpc::call_push_tombstones(peer, tombstone_delta).await {
            Ok(response) if !response.success => {
                log::warn!("chunk anti-entropy round: {peer} rejected tombstone push: {:?}", response.error_message)
            }
            Ok(_) => {}
            Err(err) => log::warn!("chunk anti-entropy round: failed to push tombstones to {peer}: {err}"),
        }
    }
}

/// Fetches each missing chunk, verifying its checksum and discarding it
/// silently on mismatch (no exception in the original -- it just `continue`s
/// and lets the next round retry, possibly from a different source).
async fn fetch_chunks_from_peer(index: &ChunkIndex, blobstore: &BlobStore, peer: &str, chunk_ids: &[Uuid]) {
    for &chunk_id in chunk_ids {
        match rpc::fetch_and_store_chunk(index, blobstore, peer, chunk_id).await {
            Ok(true) => log::debug!("chunk anti-entropy round: fetched {chunk_id} from {peer}"),
            Ok(false) => {}
            Err(err) => log::warn!("chunk anti-entropy round: failed to fetch {chunk_id} from {peer}: {err}"),
        }
    }
}

/// Asks `peer` to pull each chunk back from this node via `ReplicateChunk`.
async fn push_chunks_to_peer(advertise_addr: &str, peer: &str, chunk_ids: &[Uuid]) {
    for &chunk_id in chunk_ids {
        let request = ReplicateChunkRequest { chunk_id, source_address: advertise_addr.to_string() };
        match ts_wire::call_unary::<_, ReplicateChunkResponse>(peer, "ReplicateChunk", &request).await {
            Ok(response) if response.success => log::debug!("chunk anti-entropy round: pushed {chunk_id} to {peer}"),
            Ok(response) => log::warn!("chunk anti-entropy round: {peer} failed to pull {chunk_id}: {:?}", response.error),
            Err(err) => log::warn!("chunk anti-entropy round: failed to ask {peer} to pull {chunk_id}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_from_me_excludes_tombstoned_chunks() {
        let mine: HashSet<Uuid> = HashSet::new();
        let mut my_tombstones = HashSet::new();
        let tombstoned = Uuid::new_v4();
        let wanted = Uuid::new_v4();
        my_tombstones.insert(tombstoned);
        let mut peer_chunks = HashSet::new();
        peer_chunks.insert(tombstoned);
        peer_chunks.insert(wanted);

        let missing: Vec<Uuid> = peer_chunks.difference(&mine).copied().filter(|id| !my_tombstones.contains(id)).collect();
        assert_eq!(missing, vec![wanted]);
    }
}
