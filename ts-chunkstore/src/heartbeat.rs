//! Periodic heartbeat broadcast from a storage node to every discovered
//! coordinator, grounded on
//! `examples/original_source/chunkserver/heartbeat_service.py`. Also
//! reproduces the per-coordinator failure counter from
//! `examples/original_source/chunkserver/controller_discovery.py`'s
//! `mark_success`/`mark_failure` as `HeartbeatTracker` (SPEC_FULL.md Part
//! C.3) so one flaky coordinator doesn't stop heartbeats to the others.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hyper::{Body, Client, Method, Request};
use parking_lot::Mutex;
use ts_api_types::HeartbeatRequest;
use ts_discovery::PeerCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

const HEARTBEAT_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// Tracks consecutive heartbeat failures per coordinator address.
/// `mark_success` resets the counter; `mark_failure` increments it and, at
/// `threshold`, excludes the address from this node's broadcast list until
/// a future DNS discovery round re-surfaces it (`forget`).
pub struct HeartbeatTracker {
    failures: Mutex<HashMap<String, u32>>,
    excluded: Mutex<HashSet<String>>,
    threshold: u32,
}

impl HeartbeatTracker {
    pub fn new(threshold: u32) -> Self {
        Self { failures: Mutex::new(HashMap::new()), excluded: Mutex::new(HashSet::new()), threshold }
    }

    pub fn mark_success(&self, address: &str) {
        self.failures.lock().remove(address);
        self.excluded.lock().remove(address);
    }

    pub fn mark_failure(&self, address: &str) {
        let mut failures = self.failures.lock();
        let count = failures.entry(address.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            self.excluded.lock().insert(address.to_string());
            log::warn!("removing coordinator {address} from heartbeat targets after {} consecutive failures", *count);
        }
    }

    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded.lock().contains(address)
    }

    /// Gives a rediscovered address a fresh start; called before each round
    /// for addresses no longer expected to carry a stale exclusion.
    pub fn forget(&self, address: &str) {
        self.failures.lock().remove(address);
        self.excluded.lock().remove(address);
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_heartbeat_loop(
    node_id: Uuid,
    advertise_addr: String,
    data_dir: PathBuf,
    peer_cache: Arc<PeerCache>,
    controller_service_name: String,
    controller_port: u16,
    interval: Duration,
    tracker: Arc<HeartbeatTracker>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = Client::new();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    heartbeat_round(&client, node_id, &advertise_addr, &data_dir, &peer_cache, &controller_service_name, controller_port, &tracker).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("heartbeat loop shutting down, sending final heartbeat");
                        heartbeat_round(&client, node_id, &advertise_addr, &data_dir, &peer_cache, &controller_service_name, controller_port, &tracker).await;
                        break;
                    }
                }
            }
        }
    })
}

async fn heartbeat_round(
    client: &Client<hyper::client::HttpConnector>,
    node_id: Uuid,
    advertise_addr: &str,
    data_dir: &Path,
    peer_cache: &Arc<PeerCache>,
    controller_service_name: &str,
    controller_port: u16,
    tracker: &Arc<HeartbeatTracker>,
) {
    let controllers = ts_discovery::discover_peers(peer_cache, controller_service_name, controller_port);
    if controllers.is_empty() {
        log::debug!("heartbeat round: no controllers discovered");
        return;
    }

    let (capacity_bytes, used_bytes) = get_storage_stats(data_dir);
    let request = HeartbeatRequest { node_id, address: advertise_addr.to_string(), capacity_bytes, used_bytes };

    let mut tasks = Vec::new();
    for controller in controllers {
        if tracker.is_excluded(&controller) {
            continue;
        }
        let client = client.clone();
        let request = request.clone();
        let tracker = tracker.clone();
        tasks.push(tokio::spawn(async move {
            let success = send_heartbeat(&client, &controller, &request).await;
            if success {
                tracker.mark_success(&controller);
            } else {
                tracker.mark_failure(&controller);
            }
            success
        }));
    }

    let total = tasks.len();
    let mut success_count = 0;
    for task in tasks {
        if matches!(task.await, Ok(true)) {
            success_count += 1;
        }
    }
    log::debug!("heartbeat round: {success_count}/{total} controllers acknowledged");
}

async fn send_heartbeat(
    client: &Client<hyper::client::HttpConnector>,
    controller_address: &str,
    request: &HeartbeatRequest,
) -> bool {
    let body = match serde_json::to_vec(request) {
        Ok(body) => body,
        Err(err) => {
            log::warn!("heartbeat round: failed to encode request for {controller_address}: {err}");
            return false;
        }
    };
    let http_request = match Request::builder()
        .method(Method::POST)
        .uri(format!("http://{controller_address}/internal/chunkserver/heartbeat"))
        .header("content-type", "application/json")
        .body(Body::from(body))
    {
        Ok(req) => req,
        Err(err) => {
            log::warn!("heartbeat round: failed to build request for {controller_address}: {err}");
            return false;
        }
    };

    match tokio::time::timeout(HEARTBEAT_HTTP_TIMEOUT, client.request(http_request)).await {
        Ok(Ok(response)) if response.status().is_success() => true,
        Ok(Ok(response)) => {
            log::warn!("heartbeat round: {controller_address} responded {}", response.status());
            false
        }
        Ok(Err(err)) => {
            log::warn!("heartbeat round: request to {controller_address} failed: {err}");
            false
        }
        Err(_) => {
            log::warn!("heartbeat round: request to {controller_address} timed out");
            false
        }
    }
}

/// Real disk usage via `statvfs(2)`, falling back to `(0, 0)` on any error
/// the same way the original's `shutil.disk_usage` wrapper swallows
/// platform failures and reports zero capacity rather than crashing the
/// heartbeat loop.
fn get_storage_stats(data_dir: &Path) -> (u64, u64) {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let Ok(c_path) = CString::new(data_dir.as_os_str().as_bytes()) else {
            return (0, 0);
        };
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return (0, 0);
            }
            let block_size = stat.f_frsize as u64;
            let total = block_size.saturating_mul(stat.f_blocks as u64);
            let available = block_size.saturating_mul(stat.f_bavail as u64);
            let used = total.saturating_sub(available);
            (total, used)
        }
    }
    #[cfg(not(unix))]
    {
        let _ = data_dir;
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_excludes_after_threshold_failures() {
        let tracker = HeartbeatTracker::new(3);
        assert!(!tracker.is_excluded("10.0.0.1:9100"));
        tracker.mark_failure("10.0.0.1:9100");
        tracker.mark_failure("10.0.0.1:9100");
        assert!(!tracker.is_excluded("10.0.0.1:9100"));
        tracker.mark_failure("10.0.0.1:9100");
        assert!(tracker.is_excluded("10.0.0.1:9100"));
    }

    #[test]
    fn tracker_success_resets_failure_count() {
        let tracker = HeartbeatTracker::new(3);
        tracker.mark_failure("10.0.0.1:9100");
        tracker.mark_failure("10.0.0.1:9100");
        tracker.mark_success("10.0.0.1:9100");
        tracker.mark_failure("10.0.0.1:9100");
        assert!(!tracker.is_excluded("10.0.0.1:9100"));
    }

    #[test]
    fn a_flaky_coordinator_does_not_exclude_a_healthy_one() {
        let tracker = HeartbeatTracker::new(3);
        for _ in 0..3 {
            tracker.mark_failure("flaky:9100");
        }
        tracker.mark_success("healthy:9100");
        assert!(tracker.is_excluded("flaky:9100"));
        assert!(!tracker.is_excluded("healthy:9100"));
    }

    #[test]
    fn disk_stats_never_panics_on_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (total, used) = get_storage_stats(dir.path());
        assert!(used <= total || total == 0);
    }
}
