//! Error boundary for the coordinator-tier metadata store, mirroring the
//! per-module `thiserror` enums the teacher uses (e.g.
//! `pbs-tape::tape_read::BlockReadError`).

use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum MetaError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("dependency not met: {0}")]
    DependencyNotMet(String),

    #[error("chunk {chunk_id} of file {file_id} already exists with a different checksum")]
    ChunkChecksumMismatch { file_id: Uuid, chunk_id: Uuid },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type MetaResult<T> = Result<T, MetaError>;

impl MetaError {
    pub fn dependency(key: impl Into<String>) -> Self {
        MetaError::DependencyNotMet(key.into())
    }
}
