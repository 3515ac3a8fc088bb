//! Streamable server session: one logical session, many physical streams
//!
//! In the streamable-transport variant a logical session may have zero or
//! more physical streams open concurrently. The session keeps:
//!
//! - a swappable reference to the "currently listening" stream, used for
//!   session-initiated sends when no specific stream is targeted;
//! - a pending table whose entries remember which stream issued each
//!   outstanding request, so a response arriving on *any* physical
//!   connection resolves the right caller, and a closing stream can fail
//!   exactly its own requests.
//!
//! When the listening stream closes, the reference falls back to
//! [`MissingMcpTransport`], whose every send fails fast with a descriptive
//! error instead of hanging.
//!
//! Replay by last-event-id is not yet implemented: [`replay`] always returns
//! an empty batch.
//!
//! [`replay`]: McpStreamableServerSession::replay

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, RwLock as AsyncRwLock};

use crate::error::{McpServerError, Result};
use crate::server::exchange::McpServerExchange;
use crate::session::{
    to_jsonrpc_error, ClientChannel, InitGate, InitRequestHandler, NegotiatedClient,
    NotificationHandler, RequestHandler, SessionPhase,
};
use crate::transport::{McpServerTransport, MissingMcpTransport};
use crate::types::{
    InitializeParams, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, LoggingLevel, RequestId, METHOD_INITIALIZE, NOTIF_INITIALIZED,
};

/// One physical stream of a streamable session.
pub type StreamHandle = Arc<dyn McpServerTransport>;

/// A pending session-initiated request: the completion to resolve and the
/// stream that issued it.
struct PendingEntry {
    sender: oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>,
    stream: StreamHandle,
}

/// One logical client connection multiplexed over independent streams.
pub struct McpStreamableServerSession {
    id: String,
    request_timeout: Duration,
    request_counter: AtomicU64,
    phase: AtomicU8,
    min_logging_level: AtomicU8,
    client: RwLock<NegotiatedClient>,
    pending: Mutex<HashMap<String, PendingEntry>>,
    listening: AsyncRwLock<StreamHandle>,
    init_handler: InitRequestHandler,
    request_handlers: HashMap<String, RequestHandler>,
    notification_handlers: HashMap<String, NotificationHandler>,
    gate: InitGate,
}

impl std::fmt::Debug for McpStreamableServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpStreamableServerSession")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl McpStreamableServerSession {
    /// Create a streamable session with no stream attached yet.
    ///
    /// Until [`McpStreamableServerSession::attach_listening_stream`] is
    /// called, session-initiated sends fail fast through the missing-transport
    /// sentinel.
    pub fn new(
        id: String,
        request_timeout: Duration,
        init_handler: InitRequestHandler,
        request_handlers: HashMap<String, RequestHandler>,
        notification_handlers: HashMap<String, NotificationHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            request_timeout,
            request_counter: AtomicU64::new(1),
            phase: AtomicU8::new(SessionPhase::Uninitialized as u8),
            min_logging_level: AtomicU8::new(LoggingLevel::Debug.severity()),
            client: RwLock::new(NegotiatedClient::default()),
            pending: Mutex::new(HashMap::new()),
            listening: AsyncRwLock::new(Arc::new(MissingMcpTransport) as StreamHandle),
            init_handler,
            request_handlers,
            notification_handlers,
            gate: InitGate::new(),
        })
    }

    /// Session identifier (assigned by the streamable transport).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn advance_phase(&self, to: SessionPhase) {
        self.phase.fetch_max(to as u8, Ordering::SeqCst);
    }

    /// Redirect session-initiated sends onto `stream`.
    pub async fn attach_listening_stream(&self, stream: StreamHandle) {
        *self.listening.write().await = stream;
    }

    /// Feed one decoded inbound message that arrived on `stream`.
    ///
    /// Responses to inbound requests are written back to the stream the
    /// request arrived on; inbound responses resolve the pending table no
    /// matter which stream delivered them.
    pub async fn handle(
        self: &Arc<Self>,
        message: JsonRpcMessage,
        stream: StreamHandle,
    ) -> Result<()> {
        match message {
            JsonRpcMessage::Request(request) => {
                if request.method == METHOD_INITIALIZE {
                    self.handle_initialize(request, stream).await
                } else {
                    self.dispatch_request(request, stream).await
                }
            }
            JsonRpcMessage::Notification(notification) => {
                if notification.method == NOTIF_INITIALIZED {
                    self.handle_initialized();
                } else {
                    self.dispatch_notification(notification);
                }
                Ok(())
            }
            JsonRpcMessage::Response(response) => {
                self.handle_response(response).await;
                Ok(())
            }
        }
    }

    async fn handle_initialize(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        stream: StreamHandle,
    ) -> Result<()> {
        let params: InitializeParams = match request
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(p)) => p,
            Ok(None) | Err(_) => {
                let response = JsonRpcResponse::failure(
                    Some(request.id),
                    JsonRpcError::invalid_params("initialize requires valid params"),
                );
                return stream.send_message(JsonRpcMessage::Response(response)).await;
            }
        };

        self.advance_phase(SessionPhase::Initializing);
        {
            let mut client = self.client.write().expect("client state lock poisoned");
            client.capabilities = Some(params.capabilities.clone());
            client.info = Some(params.client_info.clone());
        }

        let response = match (self.init_handler)(params).await {
            Ok(result) => JsonRpcResponse::success(request.id, serde_json::to_value(result)?),
            Err(e) => {
                tracing::warn!(session_id = %self.id, "initialize handler failed: {e}");
                JsonRpcResponse::failure(Some(request.id), to_jsonrpc_error(&e))
            }
        };
        stream.send_message(JsonRpcMessage::Response(response)).await
    }

    fn handle_initialized(self: &Arc<Self>) {
        self.advance_phase(SessionPhase::Initialized);
        let (capabilities, info) = {
            let client = self.client.read().expect("client state lock poisoned");
            (client.capabilities.clone(), client.info.clone())
        };
        let channel: Arc<dyn ClientChannel> = Arc::clone(self) as Arc<dyn ClientChannel>;
        self.gate
            .publish(McpServerExchange::new(channel, capabilities, info));
    }

    async fn dispatch_request(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        stream: StreamHandle,
    ) -> Result<()> {
        let handler = match self.request_handlers.get(&request.method) {
            Some(handler) => Arc::clone(handler),
            None => {
                let response = JsonRpcResponse::failure(
                    Some(request.id),
                    JsonRpcError::method_not_found(&request.method),
                );
                return stream.send_message(JsonRpcMessage::Response(response)).await;
            }
        };

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match session.gate.wait().await {
                Ok(exchange) => handler(exchange, request.params).await,
                Err(e) => Err(e),
            };
            let response = match outcome {
                Ok(value) => JsonRpcResponse::success(request.id, value),
                Err(e) => JsonRpcResponse::failure(Some(request.id), to_jsonrpc_error(&e)),
            };
            if let Err(e) = stream.send_message(JsonRpcMessage::Response(response)).await {
                tracing::warn!(session_id = %session.id, "failed to send response: {e}");
            }
        });
        Ok(())
    }

    fn dispatch_notification(self: &Arc<Self>, notification: JsonRpcNotification) {
        let handler = match self.notification_handlers.get(&notification.method) {
            Some(handler) => Arc::clone(handler),
            None => {
                tracing::debug!(
                    session_id = %self.id,
                    "no handler for notification '{}'; ignoring",
                    notification.method
                );
                return;
            }
        };
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match session.gate.wait().await {
                Ok(exchange) => handler(exchange, notification.params).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                tracing::warn!(
                    session_id = %session.id,
                    "notification handler for '{}' failed: {e}",
                    notification.method
                );
            }
        });
    }

    async fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            tracing::warn!(session_id = %self.id, "response without id; dropping");
            return;
        };
        let key = id.to_string();
        let entry = self.pending.lock().await.remove(&key);
        let Some(entry) = entry else {
            tracing::warn!(
                session_id = %self.id,
                "response for unknown request id '{key}'; dropping"
            );
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(error),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        };
        let _ = entry.sender.send(outcome);
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Issue a session-initiated request over the current listening stream
    /// and await the typed response.
    pub async fn send_request<R>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let value = self.send_request_value(method, params).await?;
        serde_json::from_value(value).map_err(|e| McpServerError::Serialization(e).into())
    }

    /// Request variant whose result payload is irrelevant.
    pub async fn send_request_void(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.send_request_value(method, params).await.map(|_| ())
    }

    async fn send_request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let sequence = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}-{}", self.id, sequence);
        let stream = Arc::clone(&*self.listening.read().await);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            key.clone(),
            PendingEntry {
                sender: tx,
                stream: Arc::clone(&stream),
            },
        );

        let request = JsonRpcRequest::new(method, RequestId::String(key.clone()), params);
        if let Err(e) = stream.send_message(JsonRpcMessage::Request(request)).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        let outcome = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(received) => received,
            Err(_) => {
                self.pending.lock().await.remove(&key);
                return Err(McpServerError::Timeout {
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            McpServerError::Transport("stream closed before response arrived".to_string())
        })?;
        rpc_result.map_err(|e| {
            McpServerError::Protocol {
                code: e.code,
                message: e.message,
            }
            .into()
        })
    }

    /// Send a notification over the current listening stream.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let stream = Arc::clone(&*self.listening.read().await);
        stream
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(
                method, params,
            )))
            .await
    }

    // -----------------------------------------------------------------------
    // Stream lifecycle
    // -----------------------------------------------------------------------

    /// Tear down one physical stream.
    ///
    /// Fails exactly the pending requests issued on that stream and purges
    /// their routing entries. If the closed stream was the listening stream,
    /// the listening reference falls back to the missing-transport sentinel.
    pub async fn close_stream(&self, stream: &StreamHandle) {
        let failed = {
            let mut pending = self.pending.lock().await;
            let keys: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| Arc::ptr_eq(&entry.stream, stream))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key))
                .collect::<Vec<_>>()
        };
        for entry in failed {
            let _ = entry.sender.send(Err(JsonRpcError::internal(
                "stream closed before response arrived",
            )));
        }

        let mut listening = self.listening.write().await;
        if Arc::ptr_eq(&listening, stream) {
            tracing::debug!(
                session_id = %self.id,
                "listening stream closed; falling back to missing transport"
            );
            *listening = Arc::new(MissingMcpTransport) as StreamHandle;
        }
    }

    /// Replay messages after `last_event_id` on a resumed stream.
    ///
    /// Not yet implemented: the session keeps no event history, so the
    /// replay batch is always empty.
    pub fn replay(&self, last_event_id: &str) -> Vec<JsonRpcMessage> {
        tracing::debug!(
            session_id = %self.id,
            "replay requested from event id '{last_event_id}'; replay is not implemented"
        );
        Vec::new()
    }

    /// Close the whole logical session, failing every pending request.
    pub async fn close_gracefully(&self) -> Result<()> {
        let failed: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, entry)| entry).collect()
        };
        if !failed.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                "failing {} pending request(s) on close",
                failed.len()
            );
        }
        for entry in failed {
            let _ = entry
                .sender
                .send(Err(JsonRpcError::internal("session closed")));
        }
        *self.listening.write().await = Arc::new(MissingMcpTransport) as StreamHandle;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ClientChannel for McpStreamableServerSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    async fn send_request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        McpStreamableServerSession::send_request_value(self, method, params).await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        McpStreamableServerSession::send_notification(self, method, params).await
    }

    fn allows_logging(&self, level: LoggingLevel) -> bool {
        level.severity() >= self.min_logging_level.load(Ordering::SeqCst)
    }

    fn set_min_logging_level(&self, level: LoggingLevel) {
        self.min_logging_level
            .store(level.severity(), Ordering::SeqCst);
    }
}
