//! Client-side call helpers. Every call opens a fresh connection, sends a
//! method envelope, then speaks whatever shape that method defines (one
//! request/response pair for unary, a run of frames for streaming).
//! Opening per-call rather than pooling connections trades a little
//! latency for never having to reason about a stale pooled socket across a
//! peer restart -- acceptable here because none of gossip, anti-entropy,
//! repair, or GC are on a client-facing hot path (§5 backpressure notes
//! apply to payload size, not connection count).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::transport::{self, JsonFramed};

/// First frame sent on every connection; routes the request to a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub method: String,
}

pub async fn dial(addr: &str) -> Result<JsonFramed> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    Ok(transport::framed(stream))
}

/// One request frame, one response frame, connection closes.
pub async fn call_unary<Req, Resp>(addr: &str, method: &str, request: &Req) -> Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut conn = dial(addr).await?;
    transport::write_json(&mut conn, &RpcEnvelope { method: method.to_string() }).await?;
    transport::write_json(&mut conn, request).await?;
    transport::read_json_required(&mut conn).await
}

/// Opens a connection and sends only the method envelope, leaving the
/// caller to drive whatever request/stream frames follow. Used by
/// client-streaming and server-streaming methods where the shape beyond
/// the envelope isn't a plain request/response pair.
pub async fn dial_method(addr: &str, method: &str) -> Result<JsonFramed> {
    let mut conn = dial(addr).await?;
    transport::write_json(&mut conn, &RpcEnvelope { method: method.to_string() }).await?;
    Ok(conn)
}
