//! Push-gossip background loop for the metadata log, grounded on
//! `examples/original_source/controller/replication/gossip_manager.py`'s
//! `_gossip_round`: every interval, push a vector clock and a bounded window
//! of recent operation summaries to a random fanout of peers, then pull back
//! whatever each peer reports missing.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use ts_api_types::GossipMessage;
use ts_discovery::PeerCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::applier::Applier;
use crate::rpc;
use crate::store::Store;

/// Bounds gossip message size, matching §4.4's "a vector clock and a bounded
/// window of recent operation summaries."
const RECENT_SUMMARIES_LIMIT: u32 = 100;

#[allow(clippy::too_many_arguments)]
pub fn spawn_gossip_loop(
    store: Arc<Store>,
    applier: Arc<Applier>,
    peer_cache: Arc<PeerCache>,
    node_id: String,
    advertise_addr: String,
    controller_service_name: String,
    controller_port: u16,
    fanout: usize,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    gossip_round(
                        &store,
                        &applier,
                        &peer_cache,
                        &node_id,
                        &advertise_addr,
                        &controller_service_name,
                        controller_port,
                        fanout,
                    )
                    .await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("gossip loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn gossip_round(
    store: &Arc<Store>,
    applier: &Arc<Applier>,
    peer_cache: &Arc<PeerCache>,
    node_id: &str,
    advertise_addr: &str,
    controller_service_name: &str,
    controller_port: u16,
    fanout: usize,
) {
    let peers: Vec<String> = ts_discovery::discover_peers(peer_cache, controller_service_name, controller_port)
        .into_iter()
        .filter(|addr| addr != advertise_addr)
        .collect();
    if peers.is_empty() {
        log::debug!("gossip round: no peers discovered, skipping");
        return;
    }

    let targets = select_fanout(&peers, fanout);
    let vector_clock = match store.current_vc() {
        Ok(vc) => vc,
        Err(err) => {
            log::warn!("gossip round: failed to read local vector clock: {err}");
            return;
        }
    };
    let recent_summaries = match store.get_recent_summaries(RECENT_SUMMARIES_LIMIT) {
        Ok(summaries) => summaries,
        Err(err) => {
            log::warn!("gossip round: failed to read recent operation summaries: {err}");
            return;
        }
    };

    for addr in targets {
        let message = GossipMessage {
            sender_id: node_id.to_string(),
            sender_address: advertise_addr.to_string(),
            vector_clock: vector_clock.clone(),
            recent_summaries: recent_summaries.clone(),
        };
        match rpc::call_gossip(&addr, &message).await {
            Ok(response) => {
                if let Err(err) = store.merge_remote_vc(&response.vector_clock) {
                    log::warn!("gossip round: failed to merge vector clock from {addr}: {err}");
                }
                if !response.missing_operation_ids.is_empty() {
                    fetch_and_apply(store, applier, &addr, response.missing_operation_ids).await;
                }
            }
            Err(err) => log::warn!("gossip round: request to {addr} failed: {err}"),
        }
    }
}

async fn fetch_and_apply(store: &Arc<Store>, applier: &Arc<Applier>, addr: &str, operation_ids: Vec<uuid::Uuid>) {
    match rpc::call_fetch_operations(addr, operation_ids).await {
        Ok(response) => {
            for op in response.operations {
                let op_id = op.op_id;
                if let Err(err) = applier.apply_operation(op) {
                    log::warn!("gossip round: failed to apply operation {op_id} fetched from {addr}: {err}");
                }
            }
        }
        Err(err) => log::warn!("gossip round: fetch operations from {addr} failed: {err}"),
    }
    let _ = store;
}

fn select_fanout(peers: &[String], fanout: usize) -> Vec<String> {
    let mut chosen = peers.to_vec();
    chosen.shuffle(&mut rand::thread_rng());
    chosen.truncate(fanout.min(chosen.len()));
    chosen
}
