//! Distributed chunk garbage collection, grounded on
//! `examples/original_source/controller/replication/chunk_gc_manager.py`.
//! A chunk marked for GC is only deleted once every discovered peer
//! unanimously confirms it no longer references it -- any peer reporting it
//! live, or any peer being unreachable, aborts that chunk's collection this
//! round (fail-safe toward keeping data). If zero peers are discovered the
//! entire round is skipped, preserving the original's literal behavior
//! rather than treating "no peers" as "no one objects."

use std::sync::Arc;
use std::time::Duration;

use ts_api_types::{DeleteChunkRequest, DeleteChunkResponse};
use ts_discovery::PeerCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::rpc;
use crate::store::Store;

const GC_BATCH_LIMIT: u32 = 10;

#[allow(clippy::too_many_arguments)]
pub fn spawn_gc_loop(
    store: Arc<Store>,
    peer_cache: Arc<PeerCache>,
    advertise_addr: String,
    controller_service_name: String,
    controller_port: u16,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    gc_round(&store, &peer_cache, &advertise_addr, &controller_service_name, controller_port).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("gc loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

async fn gc_round(
    store: &Arc<Store>,
    peer_cache: &Arc<PeerCache>,
    advertise_addr: &str,
    controller_service_name: &str,
    controller_port: u16,
) {
    let peers: Vec<String> = ts_discovery::discover_peers(peer_cache, controller_service_name, controller_port)
        .into_iter()
        .filter(|addr| addr != advertise_addr)
        .collect();
    if peers.is_empty() {
        log::info!("gc round: no peers discovered, skipping entire round");
        return;
    }

    let marked = match store.get_chunks_marked_for_gc(GC_BATCH_LIMIT) {
        Ok(ids) => ids,
        Err(err) => {
            log::warn!("gc round: failed to list chunks marked for gc: {err}");
            return;
        }
    };

    for chunk_id in marked {
        collect_chunk(store, &peers, chunk_id).await;
    }
}

async fn collect_chunk(store: &Arc<Store>, peers: &[String], chunk_id: Uuid) {
    match store.chunk_is_live_locally(chunk_id) {
        Ok(true) => {
            let _ = store.unmark_chunk_for_gc(chunk_id);
            return;
        }
        Ok(false) => {}
        Err(err) => {
            log::warn!("gc round: failed to check local liveness for chunk {chunk_id}: {err}");
            return;
        }
    }

    for peer in peers {
        match rpc::call_query_chunk_liveness(peer, chunk_id).await {
            Ok(response) if response.is_live => {
                log::debug!("gc round: chunk {chunk_id} still live per peer {peer}, aborting collection");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("gc round: could not confirm liveness of chunk {chunk_id} with peer {peer}: {err}, aborting collection");
                return;
            }
        }
    }

    let locations = match store.get_chunk_locations(chunk_id) {
        Ok(locations) => locations,
        Err(err) => {
            log::warn!("gc round: failed to list locations for chunk {chunk_id}: {err}");
            return;
        }
    };

    // Per SPEC_FULL.md S4.9: issue the delete to a single S-node holding the
    // chunk; it propagates to every other replica via chunk-tier tombstone
    // gossip, rather than the coordinator fanning the delete out itself.
    let Some(&storage_node_id) = locations.first() else {
        if let Err(err) = store.unmark_chunk_for_gc(chunk_id) {
            log::warn!("gc round: failed to unmark chunk {chunk_id} with no locations: {err}");
        }
        return;
    };
    let node = match store.get_storage_node(storage_node_id) {
        Ok(Some(node)) => node,
        Ok(None) => {
            log::warn!("gc round: chunk {chunk_id} placed on unknown storage node {storage_node_id}");
            return;
        }
        Err(err) => {
            log::warn!("gc round: failed to look up storage node {storage_node_id}: {err}");
            return;
        }
    };

    let request = DeleteChunkRequest { chunk_id };
    match ts_wire::call_unary::<_, DeleteChunkResponse>(&node.address, "DeleteChunk", &request).await {
        Ok(response) if response.success => {
            for location in locations {
                if let Err(err) = store.remove_chunk_location(chunk_id, location) {
                    log::warn!("gc round: failed to remove location record for chunk {chunk_id}: {err}");
                }
            }
            if let Err(err) = store.unmark_chunk_for_gc(chunk_id) {
                log::warn!("gc round: failed to unmark chunk {chunk_id} after collection: {err}");
            }
        }
        Ok(response) => log::warn!(
            "gc round: delete chunk {chunk_id} on {} failed: {}",
            node.address,
            response.error_message.unwrap_or_default()
        ),
        Err(err) => log::warn!("gc round: delete chunk {chunk_id} rpc to {} failed: {err}", node.address),
    }
}
