//! Persistent JSON peer cache, the fallback discovery uses when DNS is
//! unavailable. Grounded on `common/peer_cache.py`: a bucket per
//! `hostname:port`, entries timestamped on every refresh, staleness pruning,
//! a reentrant-in-spirit split between a data lock and a disk-I/O lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerCacheEntry {
    pub address: String,
    pub last_seen: DateTime<Utc>,
    pub dns_hostname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheBucket {
    peers: Vec<PeerCacheEntry>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Thread-safe, disk-backed cache of the last successful DNS discovery per
/// `(hostname, port)`. The data lock (`buckets`) and the disk lock
/// (`file_lock`) are separate so a save never blocks a concurrent read, the
/// same split the original `PeerCache` makes between `_cache_lock` and
/// `_file_lock`.
pub struct PeerCache {
    path: PathBuf,
    buckets: Mutex<HashMap<String, CacheBucket>>,
    file_lock: Mutex<()>,
    stale_after: Duration,
}

impl PeerCache {
    pub fn load(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        let path = path.into();
        let buckets = Self::read_from_disk(&path).unwrap_or_default();
        log::info!(
            "peer cache loaded from {} ({} bucket(s))",
            path.display(),
            buckets.len()
        );
        Self {
            path,
            buckets: Mutex::new(buckets),
            file_lock: Mutex::new(()),
            stale_after,
        }
    }

    fn read_from_disk(path: &Path) -> Option<HashMap<String, CacheBucket>> {
        if !path.exists() {
            return None;
        }
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(data) => Some(data),
            Err(err) => {
                log::warn!("failed to parse peer cache at {}: {err}, starting empty", path.display());
                None
            }
        }
    }

    fn cache_key(hostname: &str, port: u16) -> String {
        format!("{hostname}:{port}")
    }

    pub fn get_cached_peers(&self, hostname: &str, port: u16) -> Vec<String> {
        let key = Self::cache_key(hostname, port);
        let buckets = self.buckets.lock();
        buckets
            .get(&key)
            .map(|bucket| bucket.peers.iter().map(|e| e.address.clone()).collect())
            .unwrap_or_default()
    }

    pub fn update_cache(&self, hostname: &str, port: u16, peers: &[String]) {
        let key = Self::cache_key(hostname, port);
        let now = Utc::now();
        let entries: Vec<PeerCacheEntry> = peers
            .iter()
            .map(|address| PeerCacheEntry {
                address: address.clone(),
                last_seen: now,
                dns_hostname: hostname.to_string(),
            })
            .collect();

        {
            let mut buckets = self.buckets.lock();
            buckets.insert(
                key,
                CacheBucket {
                    peers: entries,
                    last_refresh: Some(now),
                },
            );
        }
        self.save_to_disk();
    }

    /// Removes entries older than `stale_after`. Returns the number pruned.
    pub fn prune_stale_entries(&self, hostname: &str, port: u16) -> usize {
        let key = Self::cache_key(hostname, port);
        let cutoff = Utc::now() - chrono::Duration::from_std(self.stale_after).unwrap_or_default();

        let pruned = {
            let mut buckets = self.buckets.lock();
            match buckets.get_mut(&key) {
                Some(bucket) => {
                    let before = bucket.peers.len();
                    bucket.peers.retain(|entry| entry.last_seen > cutoff);
                    before - bucket.peers.len()
                }
                None => 0,
            }
        };

        if pruned > 0 {
            log::info!("pruned {pruned} stale peer(s) for {hostname}:{port}");
            self.save_to_disk();
        }
        pruned
    }

    fn save_to_disk(&self) {
        let snapshot = self.buckets.lock().clone();
        let _guard = self.file_lock.lock();
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                log::warn!("failed to create peer cache directory {}: {err}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    log::warn!("failed to save peer cache to {}: {err}", self.path.display());
                }
            }
            Err(err) => log::warn!("failed to serialize peer cache: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("peer_cache.json");

        let cache = PeerCache::load(&path, Duration::from_secs(300));
        cache.update_cache("controller", 8000, &["10.0.0.1:8000".to_string()]);

        let reloaded = PeerCache::load(&path, Duration::from_secs(300));
        assert_eq!(reloaded.get_cached_peers("controller", 8000), vec!["10.0.0.1:8000"]);
    }

    #[test]
    fn missing_bucket_returns_empty() {
        let dir = tempdir().unwrap();
        let cache = PeerCache::load(dir.path().join("peer_cache.json"), Duration::from_secs(300));
        assert!(cache.get_cached_peers("controller", 8000).is_empty());
    }

    #[test]
    fn prune_removes_entries_older_than_threshold() {
        let dir = tempdir().unwrap();
        let cache = PeerCache::load(dir.path().join("peer_cache.json"), Duration::from_millis(1));
        cache.update_cache("controller", 8000, &["10.0.0.1:8000".to_string()]);
        std::thread::sleep(Duration::from_millis(20));
        let pruned = cache.prune_stale_entries("controller", 8000);
        assert_eq!(pruned, 1);
        assert!(cache.get_cached_peers("controller", 8000).is_empty());
    }
}
