use std::sync::Arc;
use std::time::Duration;

use axon_mcp::server::McpServer;
use axon_mcp::transport::channel::{ChannelClientHandle, ChannelTransportProvider};
use axon_mcp::transport::McpServerTransportProvider;
use axon_mcp::types::LATEST_PROTOCOL_VERSION;

/// Install a tracing subscriber honoring `RUST_LOG`, once per test binary.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Accept one in-process connection against `server`.
#[allow(dead_code)]
pub async fn connect(server: &Arc<McpServer>) -> ChannelClientHandle {
    init_tracing();
    let provider = ChannelTransportProvider::new();
    provider.set_session_factory(server.session_factory());
    provider.connect().await.expect("connect failed")
}

/// Read the next server message, failing the test after two seconds.
#[allow(dead_code)]
pub async fn recv(handle: &mut ChannelClientHandle) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(2), handle.recv_value())
        .await
        .expect("timed out waiting for server message")
        .expect("connection closed")
}

/// Run the full initialize handshake with the given client capabilities and
/// return the initialize response.
#[allow(dead_code)]
pub async fn initialize_with_capabilities(
    handle: &mut ChannelClientHandle,
    capabilities: serde_json::Value,
) -> serde_json::Value {
    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": capabilities,
                "clientInfo": { "name": "test-client", "version": "1.0" }
            }
        }))
        .expect("send initialize failed");
    let response = recv(handle).await;
    assert_eq!(response["id"], 1, "unexpected handshake response: {response}");

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .expect("send initialized failed");
    response
}

/// Run the full initialize handshake with empty client capabilities.
#[allow(dead_code)]
pub async fn initialize(handle: &mut ChannelClientHandle) -> serde_json::Value {
    initialize_with_capabilities(handle, serde_json::json!({})).await
}

/// Answer a server-initiated request observed on the outbound channel.
#[allow(dead_code)]
pub fn respond(
    handle: &ChannelClientHandle,
    id: &serde_json::Value,
    result: serde_json::Value,
) {
    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        }))
        .expect("send response failed");
}
