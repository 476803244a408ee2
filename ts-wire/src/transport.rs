//! Raw framing: a length-delimited codec carrying one JSON object per frame,
//! the wire shape §6 specifies for both unary and streaming methods.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub type JsonFramed = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed(stream: TcpStream) -> JsonFramed {
    stream.set_nodelay(true).ok();
    Framed::new(stream, LengthDelimitedCodec::new())
}

pub async fn write_json<T: Serialize>(conn: &mut JsonFramed, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).context("failed to encode message")?;
    conn.send(Bytes::from(bytes)).await.context("failed to write frame")?;
    Ok(())
}

/// Returns `Ok(None)` on a clean connection close, which every streaming
/// method shape treats as end-of-stream rather than an error.
pub async fn read_json<T: DeserializeOwned>(conn: &mut JsonFramed) -> Result<Option<T>> {
    match conn.next().await {
        Some(Ok(bytes)) => {
            let value = serde_json::from_slice(&bytes).context("failed to decode message")?;
            Ok(Some(value))
        }
        Some(Err(err)) => Err(anyhow!(err).context("transport read failed")),
        None => Ok(None),
    }
}

pub async fn read_json_required<T: DeserializeOwned>(conn: &mut JsonFramed) -> Result<T> {
    read_json(conn).await?.ok_or_else(|| anyhow!("peer closed connection before sending expected frame"))
}
