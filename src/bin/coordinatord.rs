//! Coordinator (C-node) daemon: boots the metadata store, the
//! coordinator<->coordinator RPC server, the HTTP heartbeat listener storage
//! nodes POST to, and the four background loops (gossip, anti-entropy,
//! repair, GC). Wiring mirrors the teacher's `src/bin/*` daemons: read
//! config and identity, open storage, register RPC handlers, spawn
//! background tasks, wait for a shutdown signal, then join everything.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tagstore::api_types::HeartbeatRequest;
use tagstore::config::{load_or_create_node_id, CoordinatorConfig};
use tagstore::discovery::{spawn_background_refresh, PeerCache};
use tagstore::meta::{spawn_anti_entropy_loop, spawn_gc_loop, spawn_gossip_loop, spawn_repair_loop, Applier, DeferredQueue, Store};
use tagstore::wire::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tagstore::tools::logging::init("coordinatord");

    let config = CoordinatorConfig::from_env()?;
    let node_id = load_or_create_node_id(&config.node_id_path)?;
    log::info!("coordinator {node_id} starting, advertising {}", config.advertise_addr);

    let store = Arc::new(Store::open(&config.database_path, node_id.clone())?);
    let deferred = Arc::new(DeferredQueue::new());
    let applier = Arc::new(Applier::new(store.clone(), deferred));

    let peer_cache = Arc::new(PeerCache::load(&config.peer_cache_path, config.peer_cache_stale_after));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let rpc_handle = spawn_rpc_server(store.clone(), applier.clone(), node_id.clone(), config.listen_port, shutdown_rx.clone()).await?;
    let heartbeat_handle = spawn_heartbeat_server(store.clone(), config.heartbeat_listen_port, shutdown_rx.clone());

    let refresh_handle = spawn_background_refresh(
        peer_cache.clone(),
        vec![(config.controller_service_name.clone(), config.listen_port)],
        config.peer_cache_refresh_interval,
        shutdown_rx.clone(),
    );

    let gossip_handle = spawn_gossip_loop(
        store.clone(),
        applier.clone(),
        peer_cache.clone(),
        node_id.clone(),
        config.advertise_addr.clone(),
        config.controller_service_name.clone(),
        config.listen_port,
        config.gossip_fanout,
        config.gossip_interval,
        shutdown_rx.clone(),
    );
    let anti_entropy_handle = spawn_anti_entropy_loop(
        store.clone(),
        applier.clone(),
        peer_cache.clone(),
        config.advertise_addr.clone(),
        config.controller_service_name.clone(),
        config.listen_port,
        config.anti_entropy_interval,
        shutdown_rx.clone(),
    );
    let repair_handle = spawn_repair_loop(store.clone(), config.repair_interval, shutdown_rx.clone());
    let gc_handle = spawn_gc_loop(
        store.clone(),
        peer_cache.clone(),
        config.advertise_addr.clone(),
        config.controller_service_name.clone(),
        config.listen_port,
        config.gc_interval,
        shutdown_rx.clone(),
    );

    tokio::signal::ctrl_c().await?;
    log::info!("coordinator {node_id} received shutdown signal");
    shutdown_tx.send(true).ok();

    for handle in [rpc_handle, heartbeat_handle, refresh_handle, gossip_handle, anti_entropy_handle, repair_handle, gc_handle] {
        let _ = handle.await;
    }
    log::info!("coordinator {node_id} shut down cleanly");
    Ok(())
}

async fn spawn_rpc_server(
    store: Arc<Store>,
    applier: Arc<Applier>,
    node_id: String,
    port: u16,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut router = Router::new();
    router.register("Gossip", Arc::new(tagstore::meta::rpc::GossipHandler { store: store.clone(), node_id: node_id.clone() }));
    router.register("GetStateSummary", Arc::new(tagstore::meta::rpc::GetStateSummaryHandler { store: store.clone(), node_id }));
    router.register("FetchOperations", Arc::new(tagstore::meta::rpc::FetchOperationsHandler { store: store.clone() }));
    router.register("PushOperations", Arc::new(tagstore::meta::rpc::PushOperationsHandler { applier }));
    router.register("QueryChunkLiveness", Arc::new(tagstore::meta::rpc::QueryChunkLivenessHandler { store }));
    let router = Arc::new(router);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("coordinator rpc server listening on :{port}");
    Ok(tokio::spawn(async move {
        if let Err(err) = router.serve(listener, shutdown).await {
            log::error!("coordinator rpc server failed: {err}");
        }
    }))
}

/// HTTP POST `/internal/chunkserver/heartbeat` listener storage nodes report
/// in to (§6 "storage-to-coordinator"). Kept on HTTP/hyper rather than the
/// `ts-wire` framed protocol since that's exactly what the spec names.
fn spawn_heartbeat_server(store: Arc<Store>, port: u16, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let make_svc = make_service_fn(move |_conn| {
            let store = store.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle_heartbeat(req, store.clone()))) }
        });
        let server = Server::bind(&addr).serve(make_svc);
        log::info!("coordinator heartbeat listener on :{port}");
        let graceful = server.with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });
        if let Err(err) = graceful.await {
            log::error!("coordinator heartbeat server failed: {err}");
        }
    })
}

async fn handle_heartbeat(req: Request<Body>, store: Arc<Store>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != "/internal/chunkserver/heartbeat" {
        return Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap());
    }

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(err) => {
            log::warn!("heartbeat: failed to read request body: {err}");
            return Ok(Response::builder().status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap());
        }
    };
    let request: HeartbeatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("heartbeat: failed to decode request: {err}");
            return Ok(Response::builder().status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap());
        }
    };

    let result = store.record_heartbeat(request.node_id, &request.address, request.capacity_bytes, request.used_bytes, ts_tools::now_ms());
    match result {
        Ok(()) => Ok(Response::builder().status(StatusCode::OK).body(Body::empty()).unwrap()),
        Err(err) => {
            log::warn!("heartbeat: failed to record heartbeat from {}: {err}", request.node_id);
            Ok(Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty()).unwrap())
        }
    }
}
