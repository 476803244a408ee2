//! Environment configuration for the two daemon kinds. Defaults mirror the
//! original `distributed_config.py` modules for controller and chunkserver;
//! see SPEC_FULL.md Part B.3 for the full variable list.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::env;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub node_id_path: PathBuf,
    pub advertise_addr: String,
    pub listen_port: u16,
    pub heartbeat_listen_port: u16,
    pub database_path: PathBuf,
    pub controller_service_name: String,
    pub chunkserver_service_name: String,
    pub gossip_interval: Duration,
    pub anti_entropy_interval: Duration,
    pub gossip_fanout: usize,
    pub repair_interval: Duration,
    pub gc_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub heartbeat_failure_threshold: u32,
    pub peer_cache_path: PathBuf,
    pub peer_cache_refresh_interval: Duration,
    pub peer_cache_stale_after: Duration,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        let node_id_path: PathBuf = env::string("CONTROLLER_ID_PATH", "./data/controller_id.txt").into();
        let node_id_hint = std::fs::read_to_string(&node_id_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let default_advertise = format!("{}:8000", env::outbound_local_address());
        let node_suffix = node_id_hint.unwrap_or_else(|| "default".to_string());

        Ok(Self {
            advertise_addr: env::string("CONTROLLER_ADVERTISE_ADDR", &default_advertise),
            listen_port: env::parsed("CONTROLLER_LISTEN_PORT", 9100u16)?,
            heartbeat_listen_port: env::parsed("CONTROLLER_HEARTBEAT_PORT", 8000u16)?,
            database_path: env::string(
                "DATABASE_PATH",
                &format!("./data/controller-{node_suffix}/tagstore.db"),
            )
            .into(),
            controller_service_name: env::string("CONTROLLER_SERVICE_NAME", "controller"),
            chunkserver_service_name: env::string("CHUNKSERVER_SERVICE_NAME", "chunkserver"),
            gossip_interval: Duration::from_secs(env::parsed("GOSSIP_INTERVAL_SECS", 5)?),
            anti_entropy_interval: Duration::from_secs(env::parsed("ANTI_ENTROPY_INTERVAL_SECS", 30)?),
            gossip_fanout: env::parsed("GOSSIP_FANOUT", 2usize)?,
            repair_interval: Duration::from_secs(env::parsed("REPAIR_INTERVAL_SECS", 60)?),
            gc_interval: Duration::from_secs(env::parsed("GC_INTERVAL_SECS", 60)?),
            heartbeat_timeout: Duration::from_secs(env::parsed("HEARTBEAT_TIMEOUT_SECS", 30)?),
            heartbeat_failure_threshold: env::parsed("HEARTBEAT_FAILURE_THRESHOLD", 3)?,
            peer_cache_path: env::string("PEER_CACHE_PATH", "./data/peer_cache.json").into(),
            peer_cache_refresh_interval: Duration::from_secs(env::parsed("PEER_CACHE_REFRESH_SECS", 30)?),
            peer_cache_stale_after: Duration::from_secs(env::parsed("PEER_CACHE_STALE_SECS", 300)?),
            node_id_path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub node_id_path: PathBuf,
    pub advertise_addr: String,
    pub listen_port: u16,
    pub data_dir: PathBuf,
    pub controller_service_name: String,
    pub chunkserver_service_name: String,
    pub controller_heartbeat_port: u16,
    pub chunk_gossip_interval: Duration,
    pub chunk_anti_entropy_interval: Duration,
    pub gossip_fanout: usize,
    pub heartbeat_interval: Duration,
    pub peer_cache_path: PathBuf,
    pub peer_cache_refresh_interval: Duration,
    pub peer_cache_stale_after: Duration,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let default_advertise = format!("{}:9200", env::outbound_local_address());
        Ok(Self {
            node_id_path: env::string("STORAGE_NODE_ID_PATH", "./data/storage_node_id.txt").into(),
            advertise_addr: env::string("STORAGE_ADVERTISE_ADDR", &default_advertise),
            listen_port: env::parsed("STORAGE_LISTEN_PORT", 9200u16)?,
            data_dir: env::string("STORAGE_DATA_DIR", "./data/chunks").into(),
            controller_service_name: env::string("CONTROLLER_SERVICE_NAME", "controller"),
            chunkserver_service_name: env::string("CHUNKSERVER_SERVICE_NAME", "chunkserver"),
            controller_heartbeat_port: env::parsed("CONTROLLER_HEARTBEAT_PORT", 8000u16)?,
            chunk_gossip_interval: Duration::from_secs(env::parsed("CHUNK_GOSSIP_INTERVAL_SECS", 2)?),
            chunk_anti_entropy_interval: Duration::from_secs(env::parsed(
                "CHUNK_ANTI_ENTROPY_INTERVAL_SECS",
                30,
            )?),
            gossip_fanout: env::parsed("GOSSIP_FANOUT", 2usize)?,
            heartbeat_interval: Duration::from_secs(env::parsed("HEARTBEAT_INTERVAL_SECS", 10)?),
            peer_cache_path: env::string("PEER_CACHE_PATH", "./data/peer_cache.json").into(),
            peer_cache_refresh_interval: Duration::from_secs(env::parsed("PEER_CACHE_REFRESH_SECS", 30)?),
            peer_cache_stale_after: Duration::from_secs(env::parsed("PEER_CACHE_STALE_SECS", 300)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // env::var is process-global; serialize the two tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn coordinator_config_has_sane_defaults_with_no_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("GOSSIP_FANOUT");
        let cfg = CoordinatorConfig::from_env().unwrap();
        assert_eq!(cfg.gossip_fanout, 2);
        assert_eq!(cfg.gossip_interval, Duration::from_secs(5));
        assert_eq!(cfg.anti_entropy_interval, Duration::from_secs(30));
    }

    #[test]
    fn invalid_numeric_env_var_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("GOSSIP_FANOUT", "not-a-number");
        let result = CoordinatorConfig::from_env();
        std::env::remove_var("GOSSIP_FANOUT");
        assert!(result.is_err());
    }
}
