//! In-process channel transport for tests and embedders
//!
//! This module provides [`ChannelTransportProvider`] and
//! [`ChannelClientHandle`], an in-process pair that replaces real network or
//! process I/O. Messages cross the boundary as serialized JSON strings, so
//! tests exercise the same wire shapes a network binding would.
//!
//! # Channel Wiring
//!
//! From the **client** perspective:
//!
//! - "outbound" = what the server *sends* = what the test reads via
//!   `handle.outbound_rx`.
//! - "inbound"  = what the server *receives* = what the test injects via
//!   `handle.inbound_tx`.
//!
//! ```text
//! session send_message() --> outbound_tx --> outbound_rx (handle reads)
//! handle inbound_tx -------> inbound_rx  --> session.handle() (read loop)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::error::{McpServerError, Result};
use crate::transport::{McpServerTransport, McpServerTransportProvider, SessionFactory};
use crate::types::{JsonRpcMessage, JsonRpcResponse, JsonRpcError, ERROR_PARSE};

/// Outbound half of an in-process connection.
///
/// Serializes each message to a JSON string and pushes it onto the channel
/// drained by the test-side [`ChannelClientHandle`].
#[derive(Debug)]
pub struct ChannelTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Bare transport over a raw outbound channel, for driving a session or
    /// one streamable stream without a provider.
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound_tx,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl McpServerTransport for ChannelTransport {
    async fn send_message(&self, message: JsonRpcMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpServerError::Transport("transport is closed".to_string()).into());
        }
        let line = serde_json::to_string(&message)?;
        self.outbound_tx
            .send(line)
            .map_err(|_| McpServerError::Transport("outbound channel closed".to_string()))?;
        Ok(())
    }

    async fn close_gracefully(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The client-side handle for an in-process connection.
///
/// Use this to read messages the server sent (`outbound_rx`) and to inject
/// client messages the server will receive (`inbound_tx`).
#[derive(Debug)]
pub struct ChannelClientHandle {
    /// Receives serialized messages the server sent.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends serialized client messages into the server's read loop.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// The session created for this connection.
    pub session: Arc<crate::session::McpServerSession>,
}

impl ChannelClientHandle {
    /// Inject a client message as a [`serde_json::Value`].
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Transport`] when the read loop has exited.
    pub fn send_value(&self, value: serde_json::Value) -> Result<()> {
        self.inbound_tx
            .send(value.to_string())
            .map_err(|_| McpServerError::Transport("inbound channel closed".to_string()))?;
        Ok(())
    }

    /// Receive the next server message, parsed back into a value.
    ///
    /// Returns `None` when the connection has closed.
    pub async fn recv_value(&mut self) -> Option<serde_json::Value> {
        let line = self.outbound_rx.recv().await?;
        serde_json::from_str(&line).ok()
    }
}

/// In-process transport provider.
///
/// The server installs its [`SessionFactory`] through
/// [`McpServerTransportProvider::set_session_factory`]; each call to
/// [`ChannelTransportProvider::connect`] then accepts one logical connection,
/// creating a session and pumping injected messages into it.
#[derive(Default)]
pub struct ChannelTransportProvider {
    factory: RwLock<Option<SessionFactory>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ChannelTransportProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransportProvider")
            .field(
                "factory",
                &self
                    .factory
                    .read()
                    .map(|g| g.is_some())
                    .unwrap_or(false),
            )
            .field("closed", &self.closed)
            .finish()
    }
}

impl ChannelTransportProvider {
    /// Create a provider with no factory installed yet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept a new logical connection.
    ///
    /// Creates the per-connection transport, asks the installed factory for a
    /// session, and spawns a read loop that feeds injected messages to
    /// `session.handle`. Malformed JSON injected by the client yields a
    /// `-32700 Parse error` response on the outbound channel. When the
    /// client side drops its `inbound_tx`, the read loop closes the session,
    /// failing any pending server-initiated requests.
    ///
    /// # Errors
    ///
    /// Fails when the provider has been closed or no factory is installed.
    pub async fn connect(&self) -> Result<ChannelClientHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(
                McpServerError::Transport("transport provider is closed".to_string()).into(),
            );
        }
        let factory = self
            .factory
            .read()
            .expect("session factory lock poisoned")
            .clone()
            .ok_or_else(|| {
                McpServerError::Session("no session factory installed".to_string())
            })?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();

        let transport = Arc::new(ChannelTransport {
            outbound_tx,
            closed: AtomicBool::new(false),
        });
        let session = factory(Arc::clone(&transport) as Arc<dyn McpServerTransport>);

        let loop_session = Arc::clone(&session);
        let loop_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            while let Some(line) = inbound_rx.recv().await {
                match serde_json::from_str::<JsonRpcMessage>(&line) {
                    Ok(message) => {
                        if let Err(e) = loop_session.handle(message).await {
                            tracing::warn!(
                                session_id = %loop_session.id(),
                                "error handling inbound message: {e}"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!("malformed inbound JSON: {e}");
                        let response = JsonRpcResponse::failure(
                            None,
                            JsonRpcError {
                                code: ERROR_PARSE,
                                message: format!("Parse error: {e}"),
                                data: None,
                            },
                        );
                        let _ = loop_transport
                            .send_message(JsonRpcMessage::Response(response))
                            .await;
                    }
                }
            }
            // Client side hung up; fail pending requests rather than leak them.
            if let Err(e) = loop_session.close_gracefully().await {
                tracing::debug!(
                    session_id = %loop_session.id(),
                    "session close after disconnect reported: {e}"
                );
            }
        });

        Ok(ChannelClientHandle {
            outbound_rx,
            inbound_tx,
            session,
        })
    }
}

#[async_trait::async_trait]
impl McpServerTransportProvider for ChannelTransportProvider {
    fn set_session_factory(&self, factory: SessionFactory) {
        *self
            .factory
            .write()
            .expect("session factory lock poisoned") = Some(factory);
    }

    async fn close_gracefully(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
