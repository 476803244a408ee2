//! The composed `discover_peers` contract from SPEC_FULL.md §4.8: DNS is
//! authoritative, the persistent cache is a fallback for resolver outages,
//! never a second source of truth gossip can promote peers into.

use std::sync::Arc;
use std::time::Duration;

use crate::dns::discover_peers_dns_only;
use crate::peer_cache::PeerCache;

pub fn discover_peers(cache: &PeerCache, hostname: &str, port: u16) -> Vec<String> {
    match discover_peers_dns_only(hostname, port) {
        Ok(peers) => {
            if !peers.is_empty() {
                cache.update_cache(hostname, port, &peers);
            }
            peers
        }
        Err(err) => {
            log::warn!("DNS discovery failed for '{hostname}': {err}, using cache fallback");
            let cached = cache.get_cached_peers(hostname, port);
            if cached.is_empty() {
                log::warn!("no cached peers available for {hostname}:{port}");
            } else {
                log::info!("cache fallback returned {} peer(s) for {hostname}", cached.len());
            }
            cached
        }
    }
}

/// Spawns the background refresh task from §4.8: every `refresh_interval`,
/// re-resolve every `(hostname, port)` pair, refresh the cache on success,
/// and prune stale entries regardless of whether DNS succeeded.
pub fn spawn_background_refresh(
    cache: Arc<PeerCache>,
    targets: Vec<(String, u16)>,
    refresh_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (hostname, port) in &targets {
                        match discover_peers_dns_only(hostname, *port) {
                            Ok(peers) if !peers.is_empty() => cache.update_cache(hostname, *port, &peers),
                            Ok(_) => {}
                            Err(err) => log::warn!("cache refresh failed for {hostname}:{port}: {err}"),
                        }
                        cache.prune_stale_entries(hostname, *port);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("peer cache refresh task shutting down");
                        break;
                    }
                }
            }
        }
    })
}
