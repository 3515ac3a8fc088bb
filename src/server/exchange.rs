//! Per-call exchange facade
//!
//! An [`McpServerExchange`] is handed to every request and notification
//! handler. It is bound to the session that received the call and lets
//! handler code push server-initiated requests (sampling, elicitation,
//! listing client roots) and notifications (logging, progress) back to the
//! client, with capability gating and logging-level filtering applied here
//! rather than in every handler.

use std::sync::Arc;

use crate::error::{McpServerError, Result};
use crate::session::ClientChannel;
use crate::types::{
    ClientCapabilities, CreateMessageParams, CreateMessageResult, ElicitParams, ElicitResult,
    Implementation, ListRootsResult, LoggingLevel, LoggingMessageParams, PaginatedParams,
    ProgressParams, Root, METHOD_ELICITATION_CREATE, METHOD_PING, METHOD_ROOTS_LIST,
    METHOD_SAMPLING_CREATE_MESSAGE, NOTIF_MESSAGE, NOTIF_PROGRESS,
};

/// A per-call facade bound to one session.
///
/// Cheap to clone; clones share the underlying session channel.
#[derive(Clone)]
pub struct McpServerExchange {
    channel: Arc<dyn ClientChannel>,
    client_capabilities: Option<ClientCapabilities>,
    client_info: Option<Implementation>,
}

impl std::fmt::Debug for McpServerExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerExchange")
            .field("session_id", &self.channel.session_id())
            .field("client_info", &self.client_info)
            .finish_non_exhaustive()
    }
}

impl McpServerExchange {
    pub(crate) fn new(
        channel: Arc<dyn ClientChannel>,
        client_capabilities: Option<ClientCapabilities>,
        client_info: Option<Implementation>,
    ) -> Self {
        Self {
            channel,
            client_capabilities,
            client_info,
        }
    }

    /// Identifier of the session this exchange is bound to.
    pub fn session_id(&self) -> String {
        self.channel.session_id()
    }

    /// Capabilities the client negotiated at initialize time.
    pub fn client_capabilities(&self) -> Option<&ClientCapabilities> {
        self.client_capabilities.as_ref()
    }

    /// Implementation info the client sent at initialize time.
    pub fn client_info(&self) -> Option<&Implementation> {
        self.client_info.as_ref()
    }

    pub(crate) fn channel(&self) -> &Arc<dyn ClientChannel> {
        &self.channel
    }

    /// Ask the client to generate a completion via `sampling/createMessage`.
    ///
    /// # Errors
    ///
    /// Fails with [`McpServerError::Capability`] when the client did not
    /// negotiate the sampling capability; otherwise propagates transport,
    /// timeout, and protocol errors from the underlying request.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult> {
        let has_sampling = self
            .client_capabilities
            .as_ref()
            .map(|caps| caps.sampling.is_some())
            .unwrap_or(false);
        if !has_sampling {
            return Err(McpServerError::Capability(
                "Client must be configured with sampling capabilities".to_string(),
            )
            .into());
        }
        let value = self
            .channel
            .send_request_value(
                METHOD_SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(params)?),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| McpServerError::Serialization(e).into())
    }

    /// Ask the client to collect structured user input via
    /// `elicitation/create`.
    ///
    /// # Errors
    ///
    /// Fails with [`McpServerError::Capability`] when the client did not
    /// negotiate the elicitation capability.
    pub async fn create_elicitation(&self, params: ElicitParams) -> Result<ElicitResult> {
        let has_elicitation = self
            .client_capabilities
            .as_ref()
            .map(|caps| caps.elicitation.is_some())
            .unwrap_or(false);
        if !has_elicitation {
            return Err(McpServerError::Capability(
                "Client must be configured with elicitation capabilities".to_string(),
            )
            .into());
        }
        let value = self
            .channel
            .send_request_value(METHOD_ELICITATION_CREATE, Some(serde_json::to_value(params)?))
            .await?;
        serde_json::from_value(value).map_err(|e| McpServerError::Serialization(e).into())
    }

    /// List the client's filesystem roots, following `nextCursor` pagination
    /// until the last page and returning the accumulated list.
    pub async fn list_roots(&self) -> Result<Vec<Root>> {
        let mut roots = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = serde_json::to_value(PaginatedParams {
                cursor: cursor.clone(),
            })?;
            let value = self
                .channel
                .send_request_value(METHOD_ROOTS_LIST, Some(params))
                .await?;
            let page: ListRootsResult = serde_json::from_value(value)?;

            roots.extend(page.roots);

            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(roots)
    }

    /// Push a log message to the client.
    ///
    /// Messages below the session's minimum logging level are silently
    /// dropped; this is the level negotiated via `logging/setLevel`.
    pub async fn logging_notification(&self, params: LoggingMessageParams) -> Result<()> {
        if !self.channel.allows_logging(params.level) {
            tracing::debug!(
                session_id = %self.channel.session_id(),
                "dropping log notification below the session's minimum level"
            );
            return Ok(());
        }
        self.channel
            .send_notification(NOTIF_MESSAGE, Some(serde_json::to_value(params)?))
            .await
    }

    /// Push a progress update to the client.
    pub async fn progress_notification(&self, params: ProgressParams) -> Result<()> {
        self.channel
            .send_notification(NOTIF_PROGRESS, Some(serde_json::to_value(params)?))
            .await
    }

    /// Ping the client and wait for its acknowledgement.
    pub async fn ping(&self) -> Result<()> {
        self.channel
            .send_request_value(METHOD_PING, None)
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Detached channel (stateless servers)
// ---------------------------------------------------------------------------

/// Client channel with no session behind it.
///
/// Used by the stateless server variant: handlers run normally, but any
/// attempt at client interaction fails fast with a descriptive error.
pub(crate) struct DetachedClientChannel;

#[async_trait::async_trait]
impl ClientChannel for DetachedClientChannel {
    fn session_id(&self) -> String {
        "stateless".to_string()
    }

    async fn send_request_value(
        &self,
        method: &str,
        _params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        Err(McpServerError::Transport(format!(
            "cannot send '{}': no client session is available in a stateless server",
            method
        ))
        .into())
    }

    async fn send_notification(
        &self,
        method: &str,
        _params: Option<serde_json::Value>,
    ) -> Result<()> {
        Err(McpServerError::Transport(format!(
            "cannot send '{}': no client session is available in a stateless server",
            method
        ))
        .into())
    }

    fn allows_logging(&self, _level: LoggingLevel) -> bool {
        true
    }

    fn set_min_logging_level(&self, _level: LoggingLevel) {}
}

/// Exchange bound to the detached channel.
pub(crate) fn detached_exchange() -> McpServerExchange {
    McpServerExchange::new(Arc::new(DetachedClientChannel), None, None)
}
