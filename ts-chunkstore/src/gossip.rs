//! Chunk-tier push gossip, grounded on
//! `examples/original_source/chunkserver/replication/chunk_gossip_manager.py`:
//! every tick, send bounded recent chunk summaries and tombstones to a
//! random fan-out of peers; each peer applies the tombstones first (the
//! resurrection guard, §4.7), then reports back which summarized chunks it
//! is missing so anti-entropy can pick them up.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use ts_api_types::ChunkGossipMessage;
use ts_discovery::PeerCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::blobstore::BlobStore;
use crate::index::ChunkIndex;
use crate::rpc;

const RECENT_CHUNK_SUMMARIES_LIMIT: usize = 100;
const RECENT_TOMBSTONES_LIMIT: usize = 50;
const FAN_OUT: usize = 2;

#[allow(clippy::too_many_arguments)]
pub fn spawn_chunk_gossip_loop(
    index: Arc<ChunkIndex>,
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
                    gossip_round(&index, &peer_cache, &advertise_addr, &chunkserver_service_name, chunkserver_port).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("chunk gossip loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

async fn gossip_round(
    index: &Arc<ChunkIndex>,
    peer_cache: &Arc<PeerCache>,
    advertise_addr: &str,
    chunkserver_service_name: &str,
    chunkserver_port: u16,
) {
    let peers: Vec<String> = ts_discovery::discover_peers(peer_cache, chunkserver_service_name, chunkserver_port)
        .into_iter()
        .filter(|addr| addr != advertise_addr)
        .collect();
    if peers.is_empty() {
        log::debug!("chunk gossip round: no peers discovered");
        return;
    }

    let targets = select_fanout(peers, FAN_OUT);
    let message = ChunkGossipMessage {
        sender_address: advertise_addr.to_string(),
        recent_chunk_summaries: index.recent_chunk_summaries(RECENT_CHUNK_SUMMARIES_LIMIT),
        recent_tombstones: index.recent_tombstones(RECENT_TOMBSTONES_LIMIT),
    };

    for peer in targets {
        match rpc::call_chunk_gossip(&peer, &message).await {
            Ok(response) => {
                if !response.missing_chunk_ids.is_empty() {
                    log::info!(
                        "chunk gossip round: peer {peer} missing {} chunks, will be fetched via anti-entropy",
                        response.missing_chunk_ids.len()
                    );
                }
            }
            Err(err) => log::warn!("chunk gossip round: failed to reach {peer}: {err}"),
        }
    }
}

fn select_fanout(mut peers: Vec<String>, fan_out: usize) -> Vec<String> {
    if peers.len() <= fan_out {
        return peers;
    }
    peers.shuffle(&mut rand::thread_rng());
    peers.truncate(fan_out);
    peers
}

/// Applies an incoming gossip message's tombstones, then reports which of
/// the sender's summarized chunks this node lacks. Shared with `rpc.rs`'s
/// `ChunkGossip` handler so the gossip-apply logic lives in one place.
pub fn apply_gossip(index: &ChunkIndex, blobstore: &BlobStore, message: &ChunkGossipMessage) -> Vec<uuid::Uuid> {
    for tombstone in &message.recent_tombstones {
        if !index.is_tombstoned(tombstone.chunk_id) {
            if index.chunk_exists(tombstone.chunk_id) {
                if let Err(err) = blobstore.delete_chunk(tombstone.chunk_id) {
                    log::warn!("chunk gossip: failed to delete blob for tombstoned chunk {}: {err}", tombstone.chunk_id);
                }
                index.remove_chunk(tombstone.chunk_id);
            }
            index.add_tombstone(tombstone.chunk_id, tombstone.deleted_at_ms, tombstone.checksum.clone());
            log::info!("chunk gossip: applied tombstone for chunk {}", tombstone.chunk_id);
        }
    }

    message
        .recent_chunk_summaries
        .iter()
        .map(|summary| summary.chunk_id)
        .filter(|chunk_id| !index.chunk_exists(*chunk_id) && !index.is_tombstoned(*chunk_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_api_types::chunk_wire::{ChunkSummary, TombstoneEntry};
    use uuid::Uuid;

    #[test]
    fn select_fanout_returns_all_when_fewer_than_fanout() {
        let peers = vec!["a".to_string(), "b".to_string()];
        assert_eq!(select_fanout(peers.clone(), 5), peers);
    }

    #[test]
    fn select_fanout_truncates_to_requested_size() {
        let peers: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let selected = select_fanout(peers, 2);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn apply_gossip_reports_missing_chunks_and_skips_tombstoned() {
        let dir = tempfile::tempdir().unwrap();
        let blobstore = BlobStore::new(dir.path()).unwrap();
        let index = ChunkIndex::new();
        let missing_id = Uuid::new_v4();
        let tombstoned_id = Uuid::new_v4();
        index.add_tombstone(tombstoned_id, 1, "x".to_string());

        let message = ChunkGossipMessage {
            sender_address: "peer:1".to_string(),
            recent_chunk_summaries: vec![
                ChunkSummary { chunk_id: missing_id, checksum: "a".to_string(), size: 1 },
                ChunkSummary { chunk_id: tombstoned_id, checksum: "b".to_string(), size: 1 },
            ],
            recent_tombstones: vec![],
        };

        let missing = apply_gossip(&index, &blobstore, &message);
        assert_eq!(missing, vec![missing_id]);
    }

    #[test]
    fn apply_gossip_applies_new_tombstones_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let blobstore = BlobStore::new(dir.path()).unwrap();
        let index = ChunkIndex::new();
        let chunk_id = Uuid::new_v4();
        let message = ChunkGossipMessage {
            sender_address: "peer:1".to_string(),
            recent_chunk_summaries: vec![],
            recent_tombstones: vec![TombstoneEntry { chunk_id, deleted_at_ms: 5, checksum: "z".to_string() }],
        };
        apply_gossip(&index, &blobstore, &message);
        apply_gossip(&index, &blobstore, &message);
        assert!(index.is_tombstoned(chunk_id));
    }

    #[test]
    fn apply_gossip_deletes_blob_when_tombstoning_an_existing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let blobstore = BlobStore::new(dir.path()).unwrap();
        let index = ChunkIndex::new();
        let chunk_id = Uuid::new_v4();
        blobstore.write_chunk(chunk_id, b"data").unwrap();
        index.add_chunk(crate::index::ChunkIndexEntry {
            chunk_id,
            file_id: Uuid::new_v4(),
            chunk_index: 0,
            size: 4,
            checksum: "z".to_string(),
            blob_path: dir.path().join(format!("{chunk_id}.chk")),
        });

        let message = ChunkGossipMessage {
            sender_address: "peer:1".to_string(),
            recent_chunk_summaries: vec![],
            recent_tombstones: vec![TombstoneEntry { chunk_id, deleted_at_ms: 5, checksum: "z".to_string() }],
        };
        apply_gossip(&index, &blobstore, &message);
        assert!(!blobstore.chunk_exists(chunk_id));
        assert!(!index.chunk_exists(chunk_id));
        assert!(index.is_tombstoned(chunk_id));
    }
}
