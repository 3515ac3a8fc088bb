//! Axon MCP - server-side runtime for the Model Context Protocol
//!
//! This library implements the session/protocol core of an MCP server: the
//! lifecycle state machine, per-session request/response correlation over an
//! asynchronous transport, capability negotiation, and the dispatch engine
//! routing inbound JSON-RPC requests and notifications to registered tool,
//! resource, prompt, and completion handlers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `types`: JSON-RPC envelope and MCP domain payloads, wire-exact
//! - `transport`: the transport contract plus an in-process channel binding
//! - `session`: single-stream and streamable session variants
//! - `server`: registries, dispatch tables, the exchange facade, and the
//!   stateful/stateless server variants
//! - `validation`: structured-output schema validation decorator
//! - `uri_template`: `{var}` URI template matching for resources
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use axon_mcp::server::{handler_fn, McpServer, ToolSpec};
//! use axon_mcp::transport::channel::ChannelTransportProvider;
//! use axon_mcp::transport::McpServerTransportProvider;
//! use axon_mcp::types::{
//!     CallToolResult, Implementation, ServerCapabilities, Tool, ToolsCapability,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::builder()
//!         .server_info(Implementation::new("axon-mcp", "0.2.0"))
//!         .capabilities(ServerCapabilities {
//!             tools: Some(ToolsCapability { list_changed: Some(true) }),
//!             ..Default::default()
//!         })
//!         .tool(ToolSpec::new(
//!             Tool {
//!                 name: "echo".to_string(),
//!                 title: None,
//!                 description: Some("Echoes its arguments".to_string()),
//!                 input_schema: serde_json::json!({"type": "object"}),
//!                 output_schema: None,
//!                 annotations: None,
//!                 meta: None,
//!             },
//!             handler_fn(|_exchange, params| async move {
//!                 Ok(CallToolResult::from_text(format!("{:?}", params.arguments)))
//!             }),
//!         )?)
//!         .build()?;
//!
//!     let provider = ChannelTransportProvider::new();
//!     provider.set_session_factory(server.session_factory());
//!     // Transports now create one session per accepted connection.
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;
pub mod uri_template;
pub mod validation;

// Re-export commonly used types
pub use error::{McpServerError, Result};
pub use server::{
    McpServer, McpServerBuilder, McpServerExchange, McpStatelessServer, ToolSpec,
};
pub use session::{McpServerSession, McpStreamableServerSession, SessionPhase};
pub use transport::{McpServerTransport, McpServerTransportProvider};
pub use validation::SchemaValidator;
