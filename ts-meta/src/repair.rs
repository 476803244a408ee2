//! Coordinator-triggered chunk repair loop, grounded on
//! `examples/original_source/controller/chunk_repair.py`: for every chunk
//! missing from any healthy storage node, pick the first available live
//! replica as the source (no randomization, matching the original's
//! list-order selection) and tell every missing node to pull a copy. §4.5 is
//! explicit that this targets full replication, not an N-replica quorum: "it
//! writes to every currently-visible active S-node."

use std::sync::Arc;
use std::time::Duration;

use ts_api_types::{ReplicateChunkRequest, ReplicateChunkResponse, StorageNodeRecord};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::store::Store;

pub fn spawn_repair_loop(store: Arc<Store>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    repair_round(&store).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("repair loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

async fn repair_round(store: &Arc<Store>) {
    let healthy_nodes = match store.get_healthy_storage_nodes() {
        Ok(nodes) => nodes,
        Err(err) => {
            log::warn!("repair round: failed to list healthy storage nodes: {err}");
            return;
        }
    };
    if healthy_nodes.is_empty() {
        log::warn!("repair round: no healthy storage nodes, skipping");
        return;
    }

    let chunk_ids = match store.get_all_chunk_ids() {
        Ok(ids) => ids,
        Err(err) => {
            log::warn!("repair round: failed to list chunk ids: {err}");
            return;
        }
    };

    for chunk_id in chunk_ids {
        repair_chunk(store, chunk_id, &healthy_nodes).await;
    }
}

async fn repair_chunk(store: &Arc<Store>, chunk_id: Uuid, healthy_nodes: &[StorageNodeRecord]) {
    let locations = match store.get_chunk_locations(chunk_id) {
        Ok(locations) => locations,
        Err(err) => {
            log::warn!("repair round: failed to list locations for chunk {chunk_id}: {err}");
            return;
        }
    };
    let live_locations: Vec<Uuid> =
        locations.into_iter().filter(|id| healthy_nodes.iter().any(|node| node.node_id == *id)).collect();
    if live_locations.len() >= healthy_nodes.len() {
        return;
    }

    let Some(source_id) = live_locations.first() else {
        log::error!("repair round: chunk {chunk_id} has no live replica, cannot repair");
        return;
    };
    let Some(source_node) = healthy_nodes.iter().find(|node| node.node_id == *source_id) else {
        return;
    };

    let targets = healthy_nodes.iter().filter(|node| !live_locations.contains(&node.node_id));

    for target in targets {
        let request = ReplicateChunkRequest { chunk_id, source_address: source_node.address.clone() };
        match ts_wire::call_unary::<_, ReplicateChunkResponse>(&target.address, "ReplicateChunk", &request).await {
            Ok(response) if response.success => {
                if let Err(err) = store.record_chunk_location(chunk_id, target.node_id, ts_tools::now_ms()) {
                    log::warn!("repair round: failed to record new location for chunk {chunk_id}: {err}");
                }
            }
            Ok(response) => {
                log::warn!(
                    "repair round: replicate chunk {chunk_id} to {} failed: {}",
                    target.address,
                    response.error.unwrap_or_default()
                );
            }
            Err(err) => log::warn!("repair round: replicate chunk {chunk_id} to {} failed: {err}", target.address),
        }
    }
}
