//! Storage (S-node) daemon: boots the chunk index and blob store, the
//! storage<->storage/coordinator->storage RPC server, the chunk gossip and
//! anti-entropy loops, and the heartbeat broadcast to every discovered
//! coordinator. Wiring mirrors `coordinatord.rs` and the teacher's
//! `src/bin/*` daemons: read config and identity, open storage, register RPC
//! handlers, spawn background tasks, wait for a shutdown signal, then join
//! everything.

use std::sync::Arc;

use tagstore::chunkstore::anti_entropy::spawn_chunk_anti_entropy_loop;
use tagstore::chunkstore::blobstore::BlobStore;
use tagstore::chunkstore::gossip::spawn_chunk_gossip_loop;
use tagstore::chunkstore::heartbeat::{spawn_heartbeat_loop, HeartbeatTracker};
use tagstore::chunkstore::index::ChunkIndex;
use tagstore::chunkstore::rpc;
use tagstore::config::{load_or_create_node_id, StorageConfig};
use tagstore::discovery::{spawn_background_refresh, PeerCache};
use tagstore::wire::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Consecutive heartbeat failures before a coordinator is dropped from this
/// node's broadcast list, matching `CoordinatorConfig::heartbeat_failure_threshold`'s
/// default on the other tier.
const HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tagstore::tools::logging::init("storaged");

    let config = StorageConfig::from_env()?;
    let node_id_str = load_or_create_node_id(&config.node_id_path)?;
    let node_id = uuid::Uuid::parse_str(&node_id_str)?;
    log::info!("storage node {node_id} starting, advertising {}", config.advertise_addr);

    let blobstore = Arc::new(BlobStore::new(&config.data_dir)?);
    let index = Arc::new(ChunkIndex::new());
    let index_path = config.data_dir.join("chunk_index.json");
    let loaded = index.load_from_disk(&index_path).unwrap_or_else(|err| {
        log::warn!("failed to load chunk index from {}: {err}", index_path.display());
        false
    });
    if !loaded {
        log::info!("no chunk index file found, rebuilding from blob directory");
        index.rebuild_from_directory(&blobstore, true)?;
    }

    let peer_cache = Arc::new(PeerCache::load(&config.peer_cache_path, config.peer_cache_stale_after));
    let heartbeat_tracker = Arc::new(HeartbeatTracker::new(HEARTBEAT_FAILURE_THRESHOLD));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let rpc_handle = spawn_rpc_server(index.clone(), blobstore.clone(), config.advertise_addr.clone(), config.listen_port, shutdown_rx.clone()).await?;

    let refresh_handle = spawn_background_refresh(
        peer_cache.clone(),
        vec![
            (config.chunkserver_service_name.clone(), config.listen_port),
            (config.controller_service_name.clone(), config.controller_heartbeat_port),
        ],
        config.peer_cache_refresh_interval,
        shutdown_rx.clone(),
    );

    let gossip_handle = spawn_chunk_gossip_loop(
        index.clone(),
        peer_cache.clone(),
        config.advertise_addr.clone(),
        config.chunkserver_service_name.clone(),
        config.listen_port,
        config.chunk_gossip_interval,
        shutdown_rx.clone(),
    );
    let anti_entropy_handle = spawn_chunk_anti_entropy_loop(
        index.clone(),
        blobstore.clone(),
        peer_cache.clone(),
        config.advertise_addr.clone(),
        config.chunkserver_service_name.clone(),
        config.listen_port,
        config.chunk_anti_entropy_interval,
        shutdown_rx.clone(),
    );
    let heartbeat_handle = spawn_heartbeat_loop(
        node_id,
        config.advertise_addr.clone(),
        config.data_dir.clone(),
        peer_cache.clone(),
        config.controller_service_name.clone(),
        config.controller_heartbeat_port,
        config.heartbeat_interval,
        heartbeat_tracker,
        shutdown_rx.clone(),
    );

    tokio::signal::ctrl_c().await?;
    log::info!("storage node {node_id} received shutdown signal");
    shutdown_tx.send(true).ok();

    for handle in [rpc_handle, refresh_handle, gossip_handle, anti_entropy_handle, heartbeat_handle] {
        let _ = handle.await;
    }

    if let Err(err) = index.save_to_disk(&index_path) {
        log::error!("failed to save chunk index to {}: {err}", index_path.display());
    }
    log::info!("storage node {node_id} shut down cleanly");
    Ok(())
}

async fn spawn_rpc_server(
    index: Arc<ChunkIndex>,
    blobstore: Arc<BlobStore>,
    advertise_addr: String,
    port: u16,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut router = Router::new();
    router.register("ChunkGossip", Arc::new(rpc::ChunkGossipHandler { index: index.clone(), blobstore: blobstore.clone(), advertise_addr }));
    router.register("GetChunkStateSummary", Arc::new(rpc::GetChunkStateSummaryHandler { index: index.clone() }));
    router.register("PushTombstones", Arc::new(rpc::PushTombstonesHandler { index: index.clone(), blobstore: blobstore.clone() }));
    router.register("FetchChunkData", Arc::new(rpc::FetchChunkDataHandler { index: index.clone(), blobstore: blobstore.clone() }));
    router.register("ReadChunk", Arc::new(rpc::ReadChunkHandler { index: index.clone(), blobstore: blobstore.clone() }));
    router.register("WriteChunk", Arc::new(rpc::WriteChunkHandler { index: index.clone(), blobstore: blobstore.clone() }));
    router.register("DeleteChunk", Arc::new(rpc::DeleteChunkHandler { index: index.clone(), blobstore: blobstore.clone() }));
    router.register("ReplicateChunk", Arc::new(rpc::ReplicateChunkHandler { index: index.clone(), blobstore: blobstore.clone() }));
    router.register("Ping", Arc::new(rpc::PingHandler));
    let router = Arc::new(router);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("storage rpc server listening on :{port}");
    Ok(tokio::spawn(async move {
        if let Err(err) = router.serve(listener, shutdown).await {
            log::error!("storage rpc server failed: {err}");
        }
    }))
}
