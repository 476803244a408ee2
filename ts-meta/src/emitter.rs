//! Operation emission for the (out-of-scope) request path, grounded on
//! `examples/original_source/controller/replication/operation_emitter.py`.
//! Only `emit_user_created`/`emit_api_key_updated` exist in the retrieved
//! source; the other five follow the same recipe (§4.10: bump the local VC,
//! mint an `op_id`, write the domain-table mutation, insert the op with
//! `applied=1`).

use std::sync::Arc;

use ts_api_types::{
    ApiKeyUpdatedPayload, ChunkManifestEntry, ChunkManifestRow, ChunksCreatedPayload, FileCreatedPayload,
    FileDeletedPayload, FileRecord, FileTombstone, Operation, OperationPayload, TagsAddedPayload, TagsRemovedPayload,
    User, UserCreatedPayload,
};
use uuid::Uuid;

use crate::error::MetaResult;
use crate::store::Store;

pub struct Emitter {
    store: Arc<Store>,
}

impl Emitter {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn emit_user_created(
        &self,
        user_id: Uuid,
        username: String,
        password_hash: String,
        api_key: Option<String>,
    ) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        self.store.insert_user(&User {
            user_id,
            username: username.clone(),
            password_hash: password_hash.clone(),
            api_key: api_key.clone(),
            created_at_ms: now,
            key_updated_at_ms: now,
        })?;

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::UserCreated(UserCreatedPayload {
                user_id,
                username,
                password_hash,
                api_key,
                created_at_ms: now,
            }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    pub fn emit_api_key_updated(&self, user_id: Uuid, new_api_key: String) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        self.store.update_user_api_key(user_id, &new_api_key, now)?;

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::ApiKeyUpdated(ApiKeyUpdatedPayload {
                user_id,
                new_api_key,
                key_updated_at_ms: now,
            }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    pub fn emit_file_created(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        owner_id: Uuid,
        name: String,
        size: u64,
        tags: Vec<String>,
    ) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        self.store.insert_file(&FileRecord { file_id, name: name.clone(), size, owner_id, created_at_ms: now })?;
        self.store.add_tags(file_id, &tags)?;

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::FileCreated(FileCreatedPayload {
                file_id,
                name,
                size,
                owner_id,
                created_at_ms: now,
                tags,
            }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    pub fn emit_file_deleted(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        owner_id: Uuid,
        name: String,
        deleted_by_controller_id: String,
    ) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        let chunk_ids = self.store.delete_chunks_for_file(file_id)?;
        self.store.delete_tags_for_file(file_id)?;
        self.store.delete_file(file_id)?;
        for chunk_id in chunk_ids {
            self.store.mark_chunk_for_gc(chunk_id, now)?;
        }
        self.store.upsert_tombstone(&FileTombstone {
            file_id,
            owner_id,
            name: name.clone(),
            deleted_at_ms: now,
            deleted_by_controller_id: deleted_by_controller_id.clone(),
            operation_id: op_id,
        })?;

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::FileDeleted(FileDeletedPayload {
                file_id,
                owner_id,
                name,
                deleted_at_ms: now,
                deleted_by_controller_id,
            }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    pub fn emit_tags_added(&self, user_id: Uuid, file_id: Uuid, tags: Vec<String>) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        self.store.add_tags(file_id, &tags)?;

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::TagsAdded(TagsAddedPayload { file_id, tags }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    pub fn emit_tags_removed(&self, user_id: Uuid, file_id: Uuid, tags: Vec<String>) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        self.store.remove_tags(file_id, &tags)?;

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::TagsRemoved(TagsRemovedPayload { file_id, tags }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    pub fn emit_chunks_created(&self, user_id: Uuid, file_id: Uuid, chunks: Vec<ChunkManifestEntry>) -> MetaResult<Uuid> {
        let now = ts_tools::now_ms();
        let vc = self.store.increment_local()?;
        let op_id = Uuid::new_v4();

        for chunk in &chunks {
            self.store.insert_chunk(&ChunkManifestRow {
                chunk_id: chunk.chunk_id,
                file_id,
                chunk_index: chunk.chunk_index,
                size: chunk.size,
                checksum: chunk.checksum.clone(),
            })?;
        }

        let op = Operation {
            op_id,
            user_id,
            timestamp_ms: now,
            vector_clock: vc,
            payload: OperationPayload::ChunksCreated(ChunksCreatedPayload { file_id, chunks }),
            applied: true,
            created_at_ms: now,
        };
        self.store.insert_op(&op)?;
        Ok(op_id)
    }

    /// Emits FILE_DELETED for the old file then FILE_CREATED for the new
    /// one back-to-back so their VC components are monotonically
    /// increasing, the only replication-level requirement §9's resolved
    /// open question states for file replacement on upload. Each call is
    /// still a separate `Store` write (see DESIGN.md): true cross-call
    /// transactional atomicity is unnecessary here because the only other
    /// writer to this node's store is this same single-threaded emission
    /// path -- the HTTP surface that would call it concurrently is
    /// out of scope.
    #[allow(clippy::too_many_arguments)]
    pub fn replace_file_transaction(
        &self,
        user_id: Uuid,
        old_file_id: Uuid,
        old_owner_id: Uuid,
        old_name: String,
        deleted_by_controller_id: String,
        new_file_id: Uuid,
        new_owner_id: Uuid,
        new_name: String,
        new_size: u64,
        new_tags: Vec<String>,
    ) -> MetaResult<(Uuid, Uuid)> {
        let delete_op = self.emit_file_deleted(user_id, old_file_id, old_owner_id, old_name, deleted_by_controller_id)?;
        let create_op = self.emit_file_created(user_id, new_file_id, new_owner_id, new_name, new_size, new_tags)?;
        Ok((delete_op, create_op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_user_created_writes_domain_row_and_applied_op() {
        let store = Arc::new(Store::open_in_memory("c1").unwrap());
        let emitter = Emitter::new(store.clone());
        let user_id = Uuid::new_v4();
        let op_id = emitter.emit_user_created(user_id, "alice".into(), "hash".into(), None).unwrap();

        let op = store.get_op(op_id).unwrap().unwrap();
        assert!(op.applied);
        assert_eq!(op.vector_clock.get("c1"), 1);
        let user = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.user_id, user_id);
    }

    #[test]
    fn replace_file_transaction_bumps_vc_monotonically() {
        let store = Arc::new(Store::open_in_memory("c1").unwrap());
        let emitter = Emitter::new(store.clone());
        let owner = Uuid::new_v4();
        let old_file_id = Uuid::new_v4();
        emitter.emit_file_created(owner, old_file_id, owner, "f.bin".into(), 10, vec!["x".into()]).unwrap();

        let new_file_id = Uuid::new_v4();
        let (delete_op, create_op) = emitter
            .replace_file_transaction(
                owner,
                old_file_id,
                owner,
                "f.bin".into(),
                "c1".into(),
                new_file_id,
                owner,
                "f.bin".into(),
                20,
                vec!["y".into()],
            )
            .unwrap();

        let delete_vc = store.get_op(delete_op).unwrap().unwrap().vector_clock;
        let create_vc = store.get_op(create_op).unwrap().unwrap().vector_clock;
        assert!(delete_vc.get("c1") < create_vc.get("c1"));

        let file = store.get_file_by_owner_name(owner, "f.bin").unwrap().unwrap();
        assert_eq!(file.file_id, new_file_id);
    }
}
