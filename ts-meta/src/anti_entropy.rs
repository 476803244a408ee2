//! Pull-based anti-entropy for the metadata log, grounded on
//! `examples/original_source/controller/replication/anti_entropy_manager.py`:
//! periodically pick one peer, diff the full set of operation ids against the
//! local log, and fetch whatever's missing. Runs far less often than gossip
//! (§4.4) as the full-reconciliation backstop for gossip's bounded window.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use ts_discovery::PeerCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::applier::Applier;
use crate::rpc;
use crate::store::Store;

#[allow(clippy::too_many_arguments)]
pub fn spawn_anti_entropy_loop(
    store: Arc<Store>,
    applier: Arc<Applier>,
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
                    anti_entropy_round(&store, &applier, &peer_cache, &advertise_addr, &controller_service_name, controller_port).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("anti-entropy loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}

async fn anti_entropy_round(
    store: &Arc<Store>,
    applier: &Arc<Applier>,
    peer_cache: &Arc<PeerCache>,
    advertise_addr: &str,
    controller_service_name: &str,
    controller_port: u16,
) {
    let peers: Vec<String> = ts_discovery::discover_peers(peer_cache, controller_service_name, controller_port)
        .into_iter()
        .filter(|addr| addr != advertise_addr)
        .collect();
    let Some(addr) = peers.choose(&mut rand::thread_rng()) else {
        log::debug!("anti-entropy round: no peers discovered, skipping");
        return;
    };

    let summary = match rpc::call_get_state_summary(addr).await {
        Ok(summary) => summary,
        Err(err) => {
            log::warn!("anti-entropy round: GetStateSummary against {addr} failed: {err}");
            return;
        }
    };

    if let Err(err) = store.merge_remote_vc(&summary.vector_clock) {
        log::warn!("anti-entropy round: failed to merge vector clock from {addr}: {err}");
    }

    let local_ids: HashSet<uuid::Uuid> = match store.get_all_op_ids() {
        Ok(ids) => ids.into_iter().collect(),
        Err(err) => {
            log::warn!("anti-entropy round: failed to read local operation ids: {err}");
            return;
        }
    };
    let missing: Vec<uuid::Uuid> = summary.operation_ids.into_iter().filter(|id| !local_ids.contains(id)).collect();
    if missing.is_empty() {
        return;
    }

    match rpc::call_fetch_operations(addr, missing).await {
        Ok(response) => {
            for op in response.operations {
                let op_id = op.op_id;
                if let Err(err) = applier.apply_operation(op) {
                    log::warn!("anti-entropy round: failed to apply operation {op_id} from {addr}: {err}");
                }
            }
        }
        Err(err) => log::warn!("anti-entropy round: fetch operations from {addr} failed: {err}"),
    }
}
