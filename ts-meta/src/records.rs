//! Domain-table CRUD for users, files, tombstones, tags, and chunk
//! manifests. Grounded on the SQL shapes embedded throughout
//! `examples/original_source/controller/replication/operation_applier.py`
//! (e.g. its `INSERT OR REPLACE`/`UPDATE ... WHERE username=?` calls).

use rusqlite::{params, OptionalExtension};
use ts_api_types::{ChunkManifestRow, FileRecord, FileTombstone, User};
use uuid::Uuid;

use crate::error::MetaResult;
use crate::store::Store;

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        user_id: Uuid::parse_str(&row.get::<_, String>("user_id")?).expect("stored uuid is valid"),
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        api_key: row.get("api_key")?,
        created_at_ms: row.get("created_at_ms")?,
        key_updated_at_ms: row.get("key_updated_at_ms")?,
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: Uuid::parse_str(&row.get::<_, String>("file_id")?).expect("stored uuid is valid"),
        name: row.get("name")?,
        size: row.get::<_, i64>("size")? as u64,
        owner_id: Uuid::parse_str(&row.get::<_, String>("owner_id")?).expect("stored uuid is valid"),
        created_at_ms: row.get("created_at_ms")?,
    })
}

fn row_to_tombstone(row: &rusqlite::Row) -> rusqlite::Result<FileTombstone> {
    Ok(FileTombstone {
        file_id: Uuid::parse_str(&row.get::<_, String>("file_id")?).expect("stored uuid is valid"),
        owner_id: Uuid::parse_str(&row.get::<_, String>("owner_id")?).expect("stored uuid is valid"),
        name: row.get("name")?,
        deleted_at_ms: row.get("deleted_at_ms")?,
        deleted_by_controller_id: row.get("deleted_by_controller_id")?,
        operation_id: Uuid::parse_str(&row.get::<_, String>("operation_id")?).expect("stored uuid is valid"),
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<ChunkManifestRow> {
    Ok(ChunkManifestRow {
        chunk_id: Uuid::parse_str(&row.get::<_, String>("chunk_id")?).expect("stored uuid is valid"),
        file_id: Uuid::parse_str(&row.get::<_, String>("file_id")?).expect("stored uuid is valid"),
        chunk_index: row.get::<_, i64>("chunk_index")? as u32,
        size: row.get::<_, i64>("size")? as u64,
        checksum: row.get("checksum")?,
    })
}

impl Store {
    // ---- users --------------------------------------------------------

    pub fn get_user_by_username(&self, username: &str) -> MetaResult<Option<User>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT user_id, username, password_hash, api_key, created_at_ms, key_updated_at_ms
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get_user_by_id(&self, user_id: Uuid) -> MetaResult<Option<User>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT user_id, username, password_hash, api_key, created_at_ms, key_updated_at_ms
                 FROM users WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_user,
            )
            .optional()?)
    }

    pub fn insert_user(&self, user: &User) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (user_id, username, password_hash, api_key, created_at_ms, key_updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.user_id.to_string(),
                user.username,
                user.password_hash,
                user.api_key,
                user.created_at_ms,
                user.key_updated_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Rewrites the existing row for `username` with the winning op's
    /// identity, per SPEC_FULL.md §4.2's USER_CREATED refinement.
    pub fn overwrite_user_by_username(&self, username: &str, winner: &User) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET user_id = ?1, password_hash = ?2, api_key = ?3,
                created_at_ms = ?4, key_updated_at_ms = ?5 WHERE username = ?6",
            params![
                winner.user_id.to_string(),
                winner.password_hash,
                winner.api_key,
                winner.created_at_ms,
                winner.key_updated_at_ms,
                username,
            ],
        )?;
        Ok(())
    }

    pub fn update_user_api_key(&self, user_id: Uuid, new_api_key: &str, key_updated_at_ms: i64) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET api_key = ?1, key_updated_at_ms = ?2 WHERE user_id = ?3",
            params![new_api_key, key_updated_at_ms, user_id.to_string()],
        )?;
        Ok(())
    }

    // ---- files & tombstones --------------------------------------------

    pub fn get_file_by_owner_name(&self, owner_id: Uuid, name: &str) -> MetaResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT file_id, name, size, owner_id, created_at_ms FROM files
                 WHERE owner_id = ?1 AND name = ?2",
                params![owner_id.to_string(), name],
                row_to_file,
            )
            .optional()?)
    }

    pub fn get_file_by_id(&self, file_id: Uuid) -> MetaResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT file_id, name, size, owner_id, created_at_ms FROM files WHERE file_id = ?1",
                params![file_id.to_string()],
                row_to_file,
            )
            .optional()?)
    }

    pub fn insert_file(&self, file: &FileRecord) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (file_id, name, size, owner_id, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file.file_id.to_string(),
                file.name,
                file.size as i64,
                file.owner_id.to_string(),
                file.created_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Rewrites the `(owner_id, name)` row's identity to the winning file,
    /// per the FILE_CREATED-vs-existing-file refinement.
    pub fn replace_file(&self, owner_id: Uuid, name: &str, winner: &FileRecord) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE files SET file_id = ?1, size = ?2, created_at_ms = ?3 WHERE owner_id = ?4 AND name = ?5",
            params![
                winner.file_id.to_string(),
                winner.size as i64,
                winner.created_at_ms,
                owner_id.to_string(),
                name,
            ],
        )?;
        Ok(())
    }

    pub fn delete_file(&self, file_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM files WHERE file_id = ?1", params![file_id.to_string()])?;
        Ok(())
    }

    pub fn get_tombstone(&self, owner_id: Uuid, name: &str) -> MetaResult<Option<FileTombstone>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT file_id, owner_id, name, deleted_at_ms, deleted_by_controller_id, operation_id
                 FROM file_tombstones WHERE owner_id = ?1 AND name = ?2",
                params![owner_id.to_string(), name],
                row_to_tombstone,
            )
            .optional()?)
    }

    pub fn delete_tombstone(&self, owner_id: Uuid, name: &str) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM file_tombstones WHERE owner_id = ?1 AND name = ?2",
            params![owner_id.to_string(), name],
        )?;
        Ok(())
    }

    pub fn upsert_tombstone(&self, tombstone: &FileTombstone) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO file_tombstones
                (owner_id, name, file_id, deleted_at_ms, deleted_by_controller_id, operation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(owner_id, name) DO UPDATE SET
                file_id = excluded.file_id,
                deleted_at_ms = excluded.deleted_at_ms,
                deleted_by_controller_id = excluded.deleted_by_controller_id,
                operation_id = excluded.operation_id",
            params![
                tombstone.owner_id.to_string(),
                tombstone.name,
                tombstone.file_id.to_string(),
                tombstone.deleted_at_ms,
                tombstone.deleted_by_controller_id,
                tombstone.operation_id.to_string(),
            ],
        )?;
        Ok(())
    }

    // ---- tags -----------------------------------------------------------

    pub fn get_tags_for_file(&self, file_id: Uuid) -> MetaResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT tag FROM tags WHERE file_id = ?1")?;
        let rows = stmt.query_map(params![file_id.to_string()], |row| row.get::<_, String>(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    pub fn add_tags(&self, file_id: Uuid, tags: &[String]) -> MetaResult<()> {
        let conn = self.conn.lock();
        for tag in tags {
            conn.execute(
                "INSERT OR IGNORE INTO tags (file_id, tag) VALUES (?1, ?2)",
                params![file_id.to_string(), tag],
            )?;
        }
        Ok(())
    }

    pub fn remove_tags(&self, file_id: Uuid, tags: &[String]) -> MetaResult<()> {
        let conn = self.conn.lock();
        for tag in tags {
            conn.execute(
                "DELETE FROM tags WHERE file_id = ?1 AND tag = ?2",
                params![file_id.to_string(), tag],
            )?;
        }
        Ok(())
    }

    pub fn delete_tags_for_file(&self, file_id: Uuid) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tags WHERE file_id = ?1", params![file_id.to_string()])?;
        Ok(())
    }

    // ---- chunk manifest ---------------------------------------------------

    pub fn get_chunk_by_file_index(&self, file_id: Uuid, chunk_index: u32) -> MetaResult<Option<ChunkManifestRow>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT chunk_id, file_id, chunk_index, size, checksum FROM chunks
                 WHERE file_id = ?1 AND chunk_index = ?2",
                params![file_id.to_string(), chunk_index],
                row_to_chunk,
            )
            .optional()?)
    }

    pub fn insert_chunk(&self, chunk: &ChunkManifestRow) -> MetaResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chunks (chunk_id, file_id, chunk_index, size, checksum) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chunk.chunk_id.to_string(),
                chunk.file_id.to_string(),
                chunk.chunk_index,
                chunk.size as i64,
                chunk.checksum,
            ],
        )?;
        Ok(())
    }

    pub fn get_chunks_for_file(&self, file_id: Uuid) -> MetaResult<Vec<ChunkManifestRow>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT chunk_id, file_id, chunk_index, size, checksum FROM chunks WHERE file_id = ?1")?;
        let rows = stmt.query_map(params![file_id.to_string()], row_to_chunk)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// Deletes every manifest row for `file_id` and returns the chunk ids
    /// that were removed, so the caller can mark them for GC.
    pub fn delete_chunks_for_file(&self, file_id: Uuid) -> MetaResult<Vec<Uuid>> {
        let chunk_ids: Vec<Uuid> = self.get_chunks_for_file(file_id)?.into_iter().map(|c| c.chunk_id).collect();
        let conn = self.conn.lock();
        conn.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id.to_string()])?;
        Ok(chunk_ids)
    }

    /// `true` if any non-deleted file still references `chunk_id`.
    pub fn chunk_is_live_locally(&self, chunk_id: Uuid) -> MetaResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE chunk_id = ?1",
            params![chunk_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(username: &str, created_at_ms: i64) -> User {
        User {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            api_key: None,
            created_at_ms,
            key_updated_at_ms: created_at_ms,
        }
    }

    #[test]
    fn insert_and_fetch_user_round_trips() {
        let store = Store::open_in_memory("c1").unwrap();
        let user = sample_user("alice", 100);
        store.insert_user(&user).unwrap();
        let fetched = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(fetched.user_id, user.user_id);
    }

    #[test]
    fn overwrite_user_by_username_rewrites_identity() {
        let store = Store::open_in_memory("c1").unwrap();
        let loser = sample_user("alice", 200);
        store.insert_user(&loser).unwrap();
        let winner = sample_user("alice", 100);
        store.overwrite_user_by_username("alice", &winner).unwrap();
        let fetched = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(fetched.user_id, winner.user_id);
    }

    #[test]
    fn remove_tags_leaving_none_is_caller_responsibility() {
        let store = Store::open_in_memory("c1").unwrap();
        let file_id = Uuid::new_v4();
        store.add_tags(file_id, &["a".to_string(), "b".to_string()]).unwrap();
        store.remove_tags(file_id, &["a".to_string(), "b".to_string()]).unwrap();
        assert!(store.get_tags_for_file(file_id).unwrap().is_empty());
    }

    #[test]
    fn delete_chunks_for_file_returns_removed_ids() {
        let store = Store::open_in_memory("c1").unwrap();
        let file_id = Uuid::new_v4();
        let chunk = ChunkManifestRow {
            chunk_id: Uuid::new_v4(),
            file_id,
            chunk_index: 0,
            size: 10,
            checksum: "abc".to_string(),
        };
        store.insert_chunk(&chunk).unwrap();
        let removed = store.delete_chunks_for_file(file_id).unwrap();
        assert_eq!(removed, vec![chunk.chunk_id]);
        assert!(!store.chunk_is_live_locally(chunk.chunk_id).unwrap());
    }
}
