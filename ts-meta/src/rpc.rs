//! Coordinator RPC surface: server-side handlers plus client-side call
//! helpers for the coordinator<->coordinator methods in SPEC_FULL.md §6
//! (`Gossip`, `GetStateSummary`, `FetchOperations`, `PushOperations`,
//! `QueryChunkLiveness`), grounded on
//! `examples/original_source/controller/replication/gossip_manager.py`'s
//! request/response shapes and `ts-wire`'s unary-call convention.

use std::sync::Arc;

use async_trait::async_trait;
use ts_api_types::{
    FetchOperationsRequest, FetchOperationsResponse, GossipMessage, GossipResponse, PushOperationsRequest,
    PushOperationsResponse, QueryChunkLivenessRequest, QueryChunkLivenessResponse, StateSummary,
};
use ts_wire::{call_unary, read_json_required, write_json, JsonFramed, RpcHandler};
use uuid::Uuid;

use crate::applier::Applier;
use crate::store::Store;

pub struct GossipHandler {
    pub store: Arc<Store>,
    pub node_id: String,
}

#[async_trait]
impl RpcHandler for GossipHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: GossipMessage = read_json_required(&mut conn).await?;
        self.store.merge_remote_vc(&request.vector_clock)?;
        self.store.update_peer_state(&request.sender_address, &request.sender_id, &request.vector_clock, ts_tools::now_ms())?;

        let mut missing = Vec::new();
        for summary in &request.recent_summaries {
            if self.store.get_op(summary.op_id)?.is_none() {
                missing.push(summary.op_id);
            }
        }

        let response = GossipResponse {
            peer_id: self.node_id.clone(),
            vector_clock: self.store.current_vc()?,
            missing_operation_ids: missing,
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

pub struct GetStateSummaryHandler {
    pub store: Arc<Store>,
    pub node_id: String,
}

#[async_trait]
impl RpcHandler for GetStateSummaryHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let _request: ts_api_types::Empty = read_json_required(&mut conn).await?;
        let response = StateSummary {
            peer_id: self.node_id.clone(),
            vector_clock: self.store.current_vc()?,
            operation_ids: self.store.get_all_op_ids()?,
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

pub struct FetchOperationsHandler {
    pub store: Arc<Store>,
}

#[async_trait]
impl RpcHandler for FetchOperationsHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: FetchOperationsRequest = read_json_required(&mut conn).await?;
        let operations = self.store.get_ops_by_ids(&request.operation_ids)?;
        write_json(&mut conn, &FetchOperationsResponse { operations }).await?;
        Ok(())
    }
}

pub struct PushOperationsHandler {
    pub applier: Arc<Applier>,
}

#[async_trait]
impl RpcHandler for PushOperationsHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: PushOperationsRequest = read_json_required(&mut conn).await?;
        let response = match apply_pushed_operations(&self.applier, request.operations) {
            Ok(()) => PushOperationsResponse { success: true, error_message: None },
            Err(err) => PushOperationsResponse { success: false, error_message: Some(err.to_string()) },
        };
        write_json(&mut conn, &response).await?;
        Ok(())
    }
}

/// Applies every op, logging (not failing the whole batch on) per-op
/// errors other than a missing dependency, which `Applier::apply_operation`
/// already defers internally -- matches §7's "log and continue" policy for
/// background replication paths.
fn apply_pushed_operations(applier: &Applier, operations: Vec<ts_api_types::Operation>) -> anyhow::Result<()> {
    for op in operations {
        let op_id = op.op_id;
        if let Err(err) = applier.apply_operation(op) {
            log::warn!("failed to apply pushed operation {op_id}: {err}");
        }
    }
    Ok(())
}

pub struct QueryChunkLivenessHandler {
    pub store: Arc<Store>,
}

#[async_trait]
impl RpcHandler for QueryChunkLivenessHandler {
    async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
        let request: QueryChunkLivenessRequest = read_json_required(&mut conn).await?;
        let is_live = self.store.chunk_is_live_locally(request.chunk_id)?;
        let referenced_by_files = if is_live {
            self.store.get_all_chunk_ids()?.into_iter().filter(|id| *id == request.chunk_id).collect()
        } else {
            Vec::new()
        };
        write_json(&mut conn, &QueryChunkLivenessResponse { chunk_id: request.chunk_id, is_live, referenced_by_files }).await?;
        Ok(())
    }
}

// ---- client-side call helpers ----------------------------------------------

pub async fn call_gossip(addr: &str, request: &GossipMessage) -> anyhow::Result<GossipResponse> {
    call_unary(addr, "Gossip", request).await
}

pub async fn call_get_state_summary(addr: &str) -> anyhow::Result<StateSummary> {
    call_unary(addr, "GetStateSummary", &ts_api_types::Empty {}).await
}

pub async fn call_fetch_operations(addr: &str, operation_ids: Vec<Uuid>) -> anyhow::Result<FetchOperationsResponse> {
    call_unary(addr, "FetchOperations", &FetchOperationsRequest { operation_ids }).await
}

pub async fn call_push_operations(addr: &str, operations: Vec<ts_api_types::Operation>) -> anyhow::Result<PushOperationsResponse> {
    call_unary(addr, "PushOperations", &PushOperationsRequest { operations }).await
}

pub async fn call_query_chunk_liveness(addr: &str, chunk_id: Uuid) -> anyhow::Result<QueryChunkLivenessResponse> {
    call_unary(addr, "QueryChunkLiveness", &QueryChunkLivenessRequest { chunk_id }).await
}
