//! Stable node identity, persisted across restarts.
//!
//! Vector clocks and the storage-node registry are keyed by node identity;
//! losing it on restart would make every operation this node ever emitted
//! look like it came from a stranger. Grounded on the original
//! `controller_id.py`: read the file if present, otherwise mint a UUIDv4 and
//! write it back.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

pub fn load_or_create_node_id(path: &Path) -> Result<String> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read node id from {}", path.display()))?;
        let id = contents.trim().to_string();
        if !id.is_empty() {
            log::info!("loaded existing node id: {id}");
            return Ok(id);
        }
        log::warn!("node id file {} was empty, generating a new one", path.display());
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, &id).with_context(|| format!("failed to write node id to {}", path.display()))?;
    log::info!("generated and saved new node id: {id}");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_a_new_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_id.txt");
        let id = load_or_create_node_id(&path).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap(), id);
    }

    #[test]
    fn reuses_existing_id_on_second_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_id.txt");
        let first = load_or_create_node_id(&path).unwrap();
        let second = load_or_create_node_id(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tolerates_trailing_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_id.txt");
        fs::write(&path, "abc-123\n").unwrap();
        assert_eq!(load_or_create_node_id(&path).unwrap(), "abc-123");
    }
}
