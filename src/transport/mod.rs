//! Transport abstraction consumed by the session/protocol core
//!
//! This module defines the [`McpServerTransport`] trait that all concrete
//! transport bindings must satisfy, plus the [`McpServerTransportProvider`]
//! seam through which a transport obtains per-connection session objects.
//! Concrete implementations live in submodules:
//!
//! - [`channel::ChannelTransport`] -- in-process duplex pair used by tests
//!   and embedders.
//!
//! HTTP/SSE and other network bindings are external collaborators: they
//! decode bytes into [`JsonRpcMessage`] values, feed them to a session's
//! `handle`, and implement this trait for the outbound direction.
//!
//! # Design
//!
//! The trait is intentionally minimal: the core calls `send_message` with one
//! complete JSON-RPC message and the transport owns framing. Typed
//! deserialization of payloads is handled with serde generics at the call
//! sites, so no unmarshalling hook is needed here.

use std::fmt;
use std::sync::Arc;

use crate::error::{McpServerError, Result};
use crate::session::McpServerSession;
use crate::types::JsonRpcMessage;

pub mod channel;

/// Abstraction over the outbound half of a server transport.
///
/// `send_message` must report failure through its returned future, never by
/// panicking; a failed send must leave the session usable.
#[async_trait::async_trait]
pub trait McpServerTransport: Send + Sync + fmt::Debug {
    /// Transmit one complete JSON-RPC message to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Transport`] when the underlying channel is
    /// closed or the I/O operation fails.
    async fn send_message(&self, message: JsonRpcMessage) -> Result<()>;

    /// Flush and close the transport, reporting failures.
    async fn close_gracefully(&self) -> Result<()>;

    /// Fire-and-forget close; any shutdown failure is swallowed.
    fn close(&self);
}

/// Factory a transport provider calls once per accepted logical connection.
pub type SessionFactory =
    Arc<dyn Fn(Arc<dyn McpServerTransport>) -> Arc<McpServerSession> + Send + Sync>;

/// The wiring point between a server and its transport binding.
///
/// The server installs a [`SessionFactory`] at construction; the provider
/// invokes it whenever a new logical connection is accepted, handing the
/// per-connection transport in and receiving the session that will handle
/// its inbound messages.
#[async_trait::async_trait]
pub trait McpServerTransportProvider: Send + Sync {
    /// Install the factory used to create per-connection sessions.
    fn set_session_factory(&self, factory: SessionFactory);

    /// Stop accepting new connections and release transport resources.
    async fn close_gracefully(&self) -> Result<()>;
}

/// Sentinel transport standing in for a stream that is gone.
///
/// A streamable session whose listening stream has closed falls back to this
/// transport; every send fails fast with a descriptive error instead of
/// hanging.
#[derive(Debug, Default)]
pub struct MissingMcpTransport;

#[async_trait::async_trait]
impl McpServerTransport for MissingMcpTransport {
    async fn send_message(&self, _message: JsonRpcMessage) -> Result<()> {
        Err(McpServerError::Transport(
            "no active listening stream: the transport is missing or disconnected".to_string(),
        )
        .into())
    }

    async fn close_gracefully(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}
