pub mod rpc;
pub mod server;
pub mod transport;

pub use rpc::{call_unary, dial, dial_method, RpcEnvelope};
pub use server::{Router, RpcHandler};
pub use transport::{framed, read_json, read_json_required, write_json, JsonFramed};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PingRequest {
        nonce: u32,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PingReply {
        nonce: u32,
    }

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, mut conn: JsonFramed) -> anyhow::Result<()> {
            let request: PingRequest = read_json_required(&mut conn).await?;
            write_json(&mut conn, &PingReply { nonce: request.nonce }).await
        }
    }

    #[tokio::test]
    async fn unary_call_round_trips_through_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut router = Router::new();
        router.register("Ping", Arc::new(EchoHandler));
        let router = Arc::new(router);

        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(router.serve(listener, rx));

        let reply: PingReply = call_unary(&addr, "Ping", &PingRequest { nonce: 42 }).await.unwrap();
        assert_eq!(reply, PingReply { nonce: 42 });
    }
}
