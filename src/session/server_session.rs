//! Single-stream server session
//!
//! [`McpServerSession`] pairs requests and responses on one channel. It owns
//! the lifecycle state machine, the pending-response correlation table, and
//! the logging-level filter, and routes inbound requests to the handler maps
//! built by the server layer.
//!
//! # Design
//!
//! - Outbound request ids are `"{session_id}-{counter}"`, so ids never
//!   collide across concurrently outstanding requests of one session.
//! - The pending slot is registered *before* the request is transmitted, so
//!   a fast response can never arrive before the session is ready for it.
//! - Inbound requests are dispatched on spawned tasks that first await the
//!   initialization gate: traffic arriving before the handshake completes
//!   queues against the gate instead of failing, and handler completion
//!   order across concurrent requests is deliberately unordered.
//! - A handler failure becomes a JSON-RPC error response; it never
//!   propagates out of the dispatch task, so one bad request cannot kill
//!   the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::error::{McpServerError, Result};
use crate::session::{
    to_jsonrpc_error, ClientChannel, InitGate, InitRequestHandler, NegotiatedClient,
    NotificationHandler, RequestHandler, SessionPhase,
};
use crate::server::exchange::McpServerExchange;
use crate::transport::McpServerTransport;
use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LoggingLevel, RequestId,
    METHOD_INITIALIZE, NOTIF_INITIALIZED,
};

/// The pending-response map: request id → oneshot resolving with the raw
/// `result` value or the peer's error object.
type PendingMap =
    HashMap<String, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// One logical client connection over a single stream.
pub struct McpServerSession {
    id: String,
    request_timeout: Duration,
    transport: Arc<dyn McpServerTransport>,
    /// Monotonically increasing outbound request counter.
    request_counter: AtomicU64,
    phase: AtomicU8,
    min_logging_level: AtomicU8,
    client: RwLock<NegotiatedClient>,
    pending: Mutex<PendingMap>,
    init_handler: InitRequestHandler,
    request_handlers: HashMap<String, RequestHandler>,
    notification_handlers: HashMap<String, NotificationHandler>,
    gate: InitGate,
}

impl std::fmt::Debug for McpServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerSession")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl McpServerSession {
    /// Create a session bound to `transport`.
    ///
    /// # Arguments
    ///
    /// * `id` - Generated or transport-assigned session identifier.
    /// * `request_timeout` - Overall timeout for session-initiated requests.
    /// * `transport` - The outbound half of the connection.
    /// * `init_handler` - Produces the `InitializeResult` during handshake.
    /// * `request_handlers` - Method → handler map for inbound requests.
    /// * `notification_handlers` - Method → handler map for inbound
    ///   notifications.
    pub fn new(
        id: String,
        request_timeout: Duration,
        transport: Arc<dyn McpServerTransport>,
        init_handler: InitRequestHandler,
        request_handlers: HashMap<String, RequestHandler>,
        notification_handlers: HashMap<String, NotificationHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            request_timeout,
            transport,
            request_counter: AtomicU64::new(1),
            phase: AtomicU8::new(SessionPhase::Uninitialized as u8),
            min_logging_level: AtomicU8::new(LoggingLevel::Debug.severity()),
            client: RwLock::new(NegotiatedClient::default()),
            pending: Mutex::new(HashMap::new()),
            init_handler,
            request_handlers,
            notification_handlers,
            gate: InitGate::new(),
        })
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Negotiated client capabilities, available once `initialize` was seen.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client
            .read()
            .expect("client state lock poisoned")
            .capabilities
            .clone()
    }

    /// Negotiated client implementation info.
    pub fn client_info(&self) -> Option<Implementation> {
        self.client
            .read()
            .expect("client state lock poisoned")
            .info
            .clone()
    }

    /// Advance the phase monotonically; a stale transition is a no-op.
    fn advance_phase(&self, to: SessionPhase) {
        self.phase.fetch_max(to as u8, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Feed one decoded inbound message to the session.
    ///
    /// Requests and notifications are dispatched on background tasks after
    /// awaiting the initialization gate; responses resolve their pending
    /// entry inline. Per-message failures are reported to the peer or
    /// logged, never returned, so the transport read loop stays alive.
    pub async fn handle(self: &Arc<Self>, message: JsonRpcMessage) -> Result<()> {
        match message {
            JsonRpcMessage::Request(request) => {
                if request.method == METHOD_INITIALIZE {
                    self.handle_initialize(request).await
                } else {
                    self.dispatch_request(request).await
                }
            }
            JsonRpcMessage::Notification(notification) => {
                if notification.method == NOTIF_INITIALIZED {
                    self.handle_initialized();
                    Ok(())
                } else {
                    self.dispatch_notification(notification);
                    Ok(())
                }
            }
            JsonRpcMessage::Response(response) => {
                self.handle_response(response).await;
                Ok(())
            }
        }
    }

    /// Run the `initialize` handshake: store the negotiated client identity
    /// and answer with the init handler's result.
    async fn handle_initialize(self: &Arc<Self>, request: JsonRpcRequest) -> Result<()> {
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
                return self
                    .transport
                    .send_message(JsonRpcMessage::Response(response))
                    .await;
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
        self.transport
            .send_message(JsonRpcMessage::Response(response))
            .await
    }

    /// Complete the handshake: publish the exchange so queued handlers run.
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

    /// Route a non-initialize request to its handler on a background task.
    async fn dispatch_request(self: &Arc<Self>, request: JsonRpcRequest) -> Result<()> {
        let handler = match self.request_handlers.get(&request.method) {
            Some(handler) => Arc::clone(handler),
            None => {
                let response = JsonRpcResponse::failure(
                    Some(request.id),
                    JsonRpcError::method_not_found(&request.method),
                );
                return self
                    .transport
                    .send_message(JsonRpcMessage::Response(response))
                    .await;
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
            if let Err(e) = session
                .transport
                .send_message(JsonRpcMessage::Response(response))
                .await
            {
                tracing::warn!(session_id = %session.id, "failed to send response: {e}");
            }
        });
        Ok(())
    }

    /// Route a notification to its handler, if one is registered.
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

    /// Resolve the pending entry matching an inbound response.
    ///
    /// Unmatched responses are a protocol anomaly: logged and dropped, never
    /// a crash.
    async fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            tracing::warn!(session_id = %self.id, "response without id; dropping");
            return;
        };
        let key = id.to_string();

        let sender = self.pending.lock().await.remove(&key);
        let Some(sender) = sender else {
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
        // The caller may have timed out already; a failed send is fine.
        let _ = sender.send(outcome);
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Issue a session-initiated request and await the typed response.
    ///
    /// The pending entry is owned by this call: it is removed on response,
    /// timeout, and transmission failure alike, so exactly one outcome is
    /// ever observed and no entry is leaked.
    ///
    /// # Errors
    ///
    /// [`McpServerError::Transport`] when transmission fails or the session
    /// closes first, [`McpServerError::Timeout`] on expiry, and
    /// [`McpServerError::Protocol`] when the client answers with a JSON-RPC
    /// error. There is no automatic retry.
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

    /// Like [`McpServerSession::send_request`] for requests whose result
    /// payload is irrelevant; completes with no value.
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

        // Register the pending slot before sending so the response can never
        // arrive before we are ready to receive it.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(key.clone(), tx);

        let request = JsonRpcRequest::new(method, RequestId::String(key.clone()), params);
        if let Err(e) = self
            .transport
            .send_message(JsonRpcMessage::Request(request))
            .await
        {
            // Do not leave an orphaned pending entry behind a failed send.
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
            McpServerError::Transport("session closed before response arrived".to_string())
        })?;

        rpc_result.map_err(|e| {
            McpServerError::Protocol {
                code: e.code,
                message: e.message,
            }
            .into()
        })
    }

    /// Send a notification to the client.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.transport
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(
                method, params,
            )))
            .await
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Close the session, failing every pending completion and closing the
    /// transport.
    pub async fn close_gracefully(&self) -> Result<()> {
        self.fail_pending().await;
        self.transport.close_gracefully().await
    }

    /// Fire-and-forget close.
    pub async fn close(&self) {
        self.fail_pending().await;
        self.transport.close();
    }

    /// Drop every pending sender so awaiting callers observe a failure
    /// rather than hanging.
    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                "failing {} pending request(s) on close",
                pending.len()
            );
        }
        pending.clear();
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ClientChannel for McpServerSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    async fn send_request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        McpServerSession::send_request_value(self, method, params).await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        McpServerSession::send_notification(self, method, params).await
    }

    fn allows_logging(&self, level: LoggingLevel) -> bool {
        level.severity() >= self.min_logging_level.load(Ordering::SeqCst)
    }

    fn set_min_logging_level(&self, level: LoggingLevel) {
        self.min_logging_level
            .store(level.severity(), Ordering::SeqCst);
    }
}
