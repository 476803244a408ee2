//! Physical chunk blob storage, grounded on
//! `examples/original_source/chunkserver/chunk_storage.py`: one file per
//! chunk, named `<chunk_id>.chk`, under a configured directory.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

/// Size of each piece yielded by `read_chunk_streaming`, matching the
/// original's `STREAM_PIECE_SIZE_BYTES` default of 64 KiB.
pub const STREAM_PIECE_SIZE_BYTES: usize = 64 * 1024;

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create chunk storage dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn chunk_path(&self, chunk_id: Uuid) -> PathBuf {
        self.dir.join(format!("{chunk_id}.chk"))
    }

    pub fn write_chunk(&self, chunk_id: Uuid, data: &[u8]) -> Result<PathBuf> {
        let path = self.chunk_path(chunk_id);
        let mut file = fs::File::create(&path)
            .with_context(|| format!("failed to create chunk file {}", path.display()))?;
        file.write_all(data).with_context(|| format!("failed to write chunk file {}", path.display()))?;
        Ok(path)
    }

    pub fn read_chunk(&self, chunk_id: Uuid) -> Result<Vec<u8>> {
        let path = self.chunk_path(chunk_id);
        fs::read(&path).with_context(|| format!("failed to read chunk file {}", path.display()))
    }

    /// Reads a chunk in `STREAM_PIECE_SIZE_BYTES` pieces, matching
    /// `read_chunk_streaming`'s generator shape without holding the whole
    /// blob in memory at once.
    pub fn read_chunk_streaming(&self, chunk_id: Uuid) -> Result<ChunkPieceReader> {
        let path = self.chunk_path(chunk_id);
        let file = fs::File::open(&path).with_context(|| format!("failed to open chunk file {}", path.display()))?;
        Ok(ChunkPieceReader { file })
    }

    pub fn delete_chunk(&self, chunk_id: Uuid) -> Result<bool> {
        let path = self.chunk_path(chunk_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("failed to delete chunk file {}", path.display()))?;
        Ok(true)
    }

    pub fn chunk_exists(&self, chunk_id: Uuid) -> bool {
        self.chunk_path(chunk_id).exists()
    }

    pub fn get_chunk_size(&self, chunk_id: Uuid) -> Option<u64> {
        fs::metadata(self.chunk_path(chunk_id)).ok().map(|meta| meta.len())
    }

    /// Lists every chunk id currently on disk by globbing `*.chk` and
    /// parsing the stem, mirroring `list_all_chunks`.
    pub fn list_all_chunks(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("failed to list {}", self.dir.display()))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("chk") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub struct ChunkPieceReader {
    file: fs::File,
}

impl Iterator for ChunkPieceReader {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; STREAM_PIECE_SIZE_BYTES];
        match self.file.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let chunk_id = Uuid::new_v4();
        store.write_chunk(chunk_id, b"hello chunk").unwrap();
        assert!(store.chunk_exists(chunk_id));
        assert_eq!(store.read_chunk(chunk_id).unwrap(), b"hello chunk");
        assert_eq!(store.get_chunk_size(chunk_id), Some(11));
    }

    #[test]
    fn delete_chunk_removes_file_and_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let chunk_id = Uuid::new_v4();
        store.write_chunk(chunk_id, b"data").unwrap();
        assert!(store.delete_chunk(chunk_id).unwrap());
        assert!(!store.chunk_exists(chunk_id));
        assert!(!store.delete_chunk(chunk_id).unwrap());
    }

    #[test]
    fn streaming_read_reassembles_to_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let chunk_id = Uuid::new_v4();
        let data = vec![7u8; STREAM_PIECE_SIZE_BYTES * 2 + 37];
        store.write_chunk(chunk_id, &data).unwrap();

        let mut reassembled = Vec::new();
        for piece in store.read_chunk_streaming(chunk_id).unwrap() {
            reassembled.extend(piece.unwrap());
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn list_all_chunks_finds_written_chunks_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.write_chunk(a, b"a").unwrap();
        store.write_chunk(b, b"b").unwrap();
        fs::write(dir.path().join("not-a-chunk.txt"), b"ignore me").unwrap();

        let mut ids = store.list_all_chunks().unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
