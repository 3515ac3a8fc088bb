//! Session layer: lifecycle, correlation, and inbound dispatch
//!
//! A session is one object per logical client connection. It owns the
//! lifecycle state machine (uninitialized → initializing → initialized), the
//! outbound-request correlation table, and the minimum-logging-level filter.
//! Two variants exist:
//!
//! - [`McpServerSession`] -- single-stream: request/response pairing happens
//!   on one channel.
//! - [`streamable::McpStreamableServerSession`] -- requests may arrive and
//!   depart on independently opened streams, requiring a redirectable
//!   "listening stream" reference plus per-request stream routing.
//!
//! Both variants dispatch inbound requests through handler maps built by the
//! server layer and expose [`ClientChannel`] so the per-call
//! [`McpServerExchange`](crate::server::exchange::McpServerExchange) can push
//! server-initiated traffic back to the client.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{McpServerError, Result};
use crate::server::exchange::McpServerExchange;
use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, JsonRpcError,
    LoggingLevel,
};

pub mod server_session;
pub mod streamable;

pub use server_session::McpServerSession;
pub use streamable::{McpStreamableServerSession, StreamHandle};

/// Default timeout applied to session-initiated requests when the server is
/// not configured with one. Deliberately very long: the timeout is a safety
/// net against leaked pending entries, not a normal control path.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60 * 60);

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Handler for the `initialize` request, producing the negotiated result.
pub type InitRequestHandler =
    std::sync::Arc<dyn Fn(InitializeParams) -> BoxFuture<'static, Result<InitializeResult>> + Send + Sync>;

/// Handler for one inbound request method. Receives the per-call exchange
/// and the raw `params` value; returns the raw `result` value.
pub type RequestHandler = std::sync::Arc<
    dyn Fn(McpServerExchange, Option<serde_json::Value>) -> BoxFuture<'static, Result<serde_json::Value>>
        + Send
        + Sync,
>;

/// Handler for one inbound notification method.
pub type NotificationHandler = std::sync::Arc<
    dyn Fn(McpServerExchange, Option<serde_json::Value>) -> BoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Lifecycle phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a session. Transitions are monotonic; there is no
/// reverse edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    /// No `initialize` request has been seen yet.
    Uninitialized = 0,
    /// `initialize` received; waiting for `notifications/initialized`.
    Initializing = 1,
    /// Handshake complete; the exchange is published.
    Initialized = 2,
}

impl SessionPhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            2 => SessionPhase::Initialized,
            1 => SessionPhase::Initializing,
            _ => SessionPhase::Uninitialized,
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange publication gate
// ---------------------------------------------------------------------------

/// Resolved-once, multi-consumer cell carrying the materialized exchange.
///
/// Non-initialize handlers await [`InitGate::wait`] before running, giving a
/// happens-before edge between handshake completion and capability-dependent
/// logic. Consumers that start waiting after publication observe the resolved
/// value immediately.
pub(crate) struct InitGate {
    tx: watch::Sender<Option<McpServerExchange>>,
}

impl InitGate {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish the exchange. Later calls overwrite, which only happens if a
    /// client re-sends `notifications/initialized`; waiters have already
    /// observed the first value by then.
    pub(crate) fn publish(&self, exchange: McpServerExchange) {
        self.tx.send_replace(Some(exchange));
    }

    /// Wait until the exchange has been published.
    ///
    /// # Errors
    ///
    /// Fails when the session is dropped before initialization completes.
    pub(crate) async fn wait(&self) -> Result<McpServerExchange> {
        let mut rx = self.tx.subscribe();
        let guard = rx
            .wait_for(|value| value.is_some())
            .await
            .map_err(|_| {
                McpServerError::Session(
                    "session closed before initialization completed".to_string(),
                )
            })?;
        Ok(guard
            .clone()
            .expect("watch guard matched Some"))
    }
}

// ---------------------------------------------------------------------------
// Client channel
// ---------------------------------------------------------------------------

/// The session surface an exchange needs to push server-initiated traffic.
///
/// Implemented by both session variants and by the detached channel used by
/// the stateless server.
#[async_trait::async_trait]
pub trait ClientChannel: Send + Sync {
    /// Identifier of the underlying session.
    fn session_id(&self) -> String;

    /// Issue a server-initiated request and await the raw result value.
    async fn send_request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Send a notification to the client.
    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Whether a log message at `level` passes the session's minimum-level
    /// filter.
    fn allows_logging(&self, level: LoggingLevel) -> bool;

    /// Update the session's minimum logging level.
    fn set_min_logging_level(&self, level: LoggingLevel);
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Convert a handler failure into the JSON-RPC error surfaced to the peer.
///
/// Typed protocol errors keep their code; anything else becomes a `-32603`
/// internal error so a handler failure can never kill the session.
pub(crate) fn to_jsonrpc_error(err: &anyhow::Error) -> JsonRpcError {
    if let Some(McpServerError::Protocol { code, message }) =
        err.downcast_ref::<McpServerError>()
    {
        JsonRpcError {
            code: *code,
            message: message.clone(),
            data: None,
        }
    } else {
        JsonRpcError::internal(err.to_string())
    }
}

/// Snapshot of negotiated client identity stored by a session.
#[derive(Debug, Default)]
pub(crate) struct NegotiatedClient {
    pub capabilities: Option<ClientCapabilities>,
    pub info: Option<Implementation>,
}
