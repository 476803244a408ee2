//! In-memory chunk index: `chunk_id -> (file_id, chunk_index, size,
//! checksum, blob_path)`, an explicit tombstone set, and an
//! insertion-ordered recent-chunk queue for bounding gossip payloads.
//! Grounded on `examples/original_source/chunkserver/chunk_index.py`.
//!
//! The Python source's tombstone accessors (`is_tombstoned`, `add_tombstone`,
//! `get_tombstone`, `get_all_tombstone_ids`) are called from
//! `chunk_gossip_manager.py`/`chunk_anti_entropy_manager.py`/
//! `chunk_replication_service.py` but the module implementing them was not
//! present in the retrieved source; §3's chunk-tombstone shape
//! (`chunk_id, deleted_at, checksum`) and §4.7's "applying a tombstone"
//! behavior are used to design this store's tombstone half fresh, in the
//! same in-memory-plus-JSON-persistence shape as the chunk half.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ts_api_types::chunk_wire::{ChunkSummary, TombstoneEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkIndexEntry {
    pub chunk_id: Uuid,
    pub file_id: Uuid,
    pub chunk_index: u32,
    pub size: u64,
    pub checksum: String,
    pub blob_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexState {
    chunks: HashMap<Uuid, ChunkIndexEntry>,
    tombstones: HashMap<Uuid, TombstoneEntry>,
    #[serde(default)]
    recent_chunk_order: VecDeque<Uuid>,
    #[serde(default)]
    recent_tombstone_order: VecDeque<Uuid>,
}

/// Recent-queues are capped well above the largest gossip window (100
/// summaries / 50 tombstones, §4.7) so a slow gossip tick never starves the
/// summary selection of truly-recent entries.
const RECENT_QUEUE_CAP: usize = 10_000;

pub struct ChunkIndex {
    state: Mutex<IndexState>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self { state: Mutex::new(IndexState::default()) }
    }

    pub fn add_chunk(&self, entry: ChunkIndexEntry) {
        let mut state = self.state.lock();
        let chunk_id = entry.chunk_id;
        state.chunks.insert(chunk_id, entry);
        state.recent_chunk_order.push_back(chunk_id);
        if state.recent_chunk_order.len() > RECENT_QUEUE_CAP {
            state.recent_chunk_order.pop_front();
        }
    }

    pub fn get_chunk(&self, chunk_id: Uuid) -> Option<ChunkIndexEntry> {
        self.state.lock().chunks.get(&chunk_id).cloned()
    }

    pub fn remove_chunk(&self, chunk_id: Uuid) -> bool {
        self.state.lock().chunks.remove(&chunk_id).is_some()
    }

    pub fn chunk_exists(&self, chunk_id: Uuid) -> bool {
        self.state.lock().chunks.contains_key(&chunk_id)
    }

    pub fn get_all_chunk_ids(&self) -> Vec<Uuid> {
        self.state.lock().chunks.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Sum of `size` across every locally stored chunk, for the
    /// `ChunkStateSummary.total_size_bytes` field (§6).
    pub fn total_size_bytes(&self) -> u64 {
        self.state.lock().chunks.values().map(|entry| entry.size).sum()
    }

    pub fn is_tombstoned(&self, chunk_id: Uuid) -> bool {
        self.state.lock().tombstones.contains_key(&chunk_id)
    }

    pub fn add_tombstone(&self, chunk_id: Uuid, deleted_at_ms: i64, checksum: String) {
        let mut state = self.state.lock();
        state.tombstones.insert(chunk_id, TombstoneEntry { chunk_id, deleted_at_ms, checksum });
        state.recent_tombstone_order.push_back(chunk_id);
        if state.recent_tombstone_order.len() > RECENT_QUEUE_CAP {
            state.recent_tombstone_order.pop_front();
        }
    }

    pub fn get_tombstone(&self, chunk_id: Uuid) -> Option<TombstoneEntry> {
        self.state.lock().tombstones.get(&chunk_id).cloned()
    }

    pub fn get_all_tombstone_ids(&self) -> Vec<Uuid> {
        self.state.lock().tombstones.keys().copied().collect()
    }

    /// Summaries of the most recently added chunks, newest-bounded, for the
    /// bounded gossip payload (<=100, §4.7).
    pub fn recent_chunk_summaries(&self, limit: usize) -> Vec<ChunkSummary> {
        let state = self.state.lock();
        state
            .recent_chunk_order
            .iter()
            .rev()
            .filter_map(|id| state.chunks.get(id))
            .take(limit)
            .map(|entry| ChunkSummary { chunk_id: entry.chunk_id, checksum: entry.checksum.clone(), size: entry.size })
            .collect()
    }

    /// Most recently added tombstones, newest-bounded (<=50, §4.7).
    pub fn recent_tombstones(&self, limit: usize) -> Vec<TombstoneEntry> {
        let state = self.state.lock();
        state.recent_tombstone_order.iter().rev().filter_map(|id| state.tombstones.get(id)).take(limit).cloned().collect()
    }

    pub fn load_from_disk(&self, path: &Path) -> Result<bool> {
        if !path.exists() {
            log::warn!("chunk index file not found at {}", path.display());
            return Ok(false);
        }
        let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let loaded: IndexState = serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
        let count = loaded.chunks.len();
        *self.state.lock() = loaded;
        log::info!("loaded {count} chunks from index file {}", path.display());
        Ok(true)
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let state = self.state.lock();
        let json = serde_json::to_string_pretty(&*state)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("saved {} chunks to index file {}", state.chunks.len(), path.display());
        Ok(())
    }

    /// Rebuilds the index by scanning the blob directory. `file_id` and
    /// `chunk_index` are unrecoverable from the raw filename and set to
    /// `Uuid::nil()`/`u32::MAX` as the Rust-typed equivalent of the
    /// original's `"unknown"`/`-1` sentinel -- logged loudly since it is a
    /// lossy recovery path, matching the original's own warning.
    pub fn rebuild_from_directory(&self, blobstore: &crate::blobstore::BlobStore, verify_checksums: bool) -> Result<usize> {
        log::warn!("rebuilding chunk index from disk: file_id and chunk_index metadata will be lost");
        let chunk_ids = blobstore.list_all_chunks()?;
        let mut state = self.state.lock();
        state.chunks.clear();
        state.recent_chunk_order.clear();

        for chunk_id in chunk_ids {
            let Some(size) = blobstore.get_chunk_size(chunk_id) else { continue };
            let checksum = if verify_checksums {
                match blobstore.read_chunk(chunk_id) {
                    Ok(data) => crate::checksum::compute_checksum(&data),
                    Err(err) => {
                        log::error!("failed to compute checksum for {chunk_id} during rebuild: {err}");
                        continue;
                    }
                }
            } else {
                String::new()
            };

            let entry = ChunkIndexEntry {
                chunk_id,
                file_id: Uuid::nil(),
                chunk_index: u32::MAX,
                size,
                checksum,
                blob_path: blobstore.dir().join(format!("{chunk_id}.chk")),
            };
            state.recent_chunk_order.push_back(chunk_id);
            state.chunks.insert(chunk_id, entry);
        }
        log::info!("rebuilt index with {} chunks", state.chunks.len());
        Ok(state.chunks.len())
    }
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunk_id: Uuid) -> ChunkIndexEntry {
        ChunkIndexEntry {
            chunk_id,
            file_id: Uuid::new_v4(),
            chunk_index: 0,
            size: 42,
            checksum: "abc".to_string(),
            blob_path: PathBuf::from(format!("{chunk_id}.chk")),
        }
    }

    #[test]
    fn add_get_remove_round_trip() {
        let index = ChunkIndex::new();
        let chunk_id = Uuid::new_v4();
        index.add_chunk(entry(chunk_id));
        assert!(index.chunk_exists(chunk_id));
        assert_eq!(index.get_chunk(chunk_id).unwrap().size, 42);
        assert!(index.remove_chunk(chunk_id));
        assert!(!index.chunk_exists(chunk_id));
    }

    #[test]
    fn tombstone_prevents_resurrection_bookkeeping() {
        let index = ChunkIndex::new();
        let chunk_id = Uuid::new_v4();
        assert!(!index.is_tombstoned(chunk_id));
        index.add_tombstone(chunk_id, 1000, "abc".to_string());
        assert!(index.is_tombstoned(chunk_id));
        assert_eq!(index.get_all_tombstone_ids(), vec![chunk_id]);
    }

    #[test]
    fn recent_summaries_respect_limit_and_recency() {
        let index = ChunkIndex::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            index.add_chunk(entry(*id));
        }
        let summaries = index.recent_chunk_summaries(2);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].chunk_id, ids[4]);
        assert_eq!(summaries[1].chunk_id, ids[3]);
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk_index.json");
        let index = ChunkIndex::new();
        let chunk_id = Uuid::new_v4();
        index.add_chunk(entry(chunk_id));
        index.add_tombstone(Uuid::new_v4(), 123, "x".to_string());
        index.save_to_disk(&path).unwrap();

        let reloaded = ChunkIndex::new();
        assert!(reloaded.load_from_disk(&path).unwrap());
        assert!(reloaded.chunk_exists(chunk_id));
        assert_eq!(reloaded.get_all_tombstone_ids().len(), 1);
    }
}
