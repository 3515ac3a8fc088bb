//! Stateful and stateless MCP servers
//!
//! [`McpServer`] owns the registries, the capability flags, and the dispatch
//! tables shared by every session it creates. It tracks connected sessions so
//! registry mutations can broadcast `*/list_changed` notifications, runs the
//! optional keep-alive scheduler, and drains sessions on graceful shutdown.
//!
//! [`McpStatelessServer`] shares the same dispatch shape but holds no
//! sessions: each request runs against a detached exchange whose
//! client-facing operations fail fast.
//!
//! Both are constructed through [`McpServerBuilder`], whose `build` step
//! fails for missing mandatory fields instead of deferring the error to
//! first use.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{McpServerError, Result};
use crate::server::exchange::detached_exchange;
use crate::server::handlers::{build_handler_maps, HandlerMaps};
use crate::server::specs::{CompletionSpec, PromptSpec, ResourceSpec, RootsChangedHandler, ToolSpec};
use crate::session::{
    ClientChannel, InitRequestHandler, McpServerSession, McpStreamableServerSession,
    NotificationHandler, RequestHandler, DEFAULT_REQUEST_TIMEOUT,
};
use crate::transport::{McpServerTransport, McpServerTransportProvider, SessionFactory};
use crate::types::{
    CompletionReference, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
    ERROR_METHOD_NOT_FOUND, METHOD_PING, NOTIF_PROMPTS_LIST_CHANGED,
    NOTIF_RESOURCES_LIST_CHANGED, NOTIF_RESOURCES_UPDATED, NOTIF_TOOLS_LIST_CHANGED,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::validation::SchemaValidator;

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// The mutable registries behind the dispatch tables.
///
/// Tools, prompts, and completions are keyed maps; resources keep
/// registration order because concrete-URI lookup is first-match. Insertion
/// is insert-if-absent: a duplicate key fails and leaves the registry
/// unchanged.
#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) tools: RwLock<HashMap<String, ToolSpec>>,
    pub(crate) resources: RwLock<Vec<ResourceSpec>>,
    pub(crate) prompts: RwLock<HashMap<String, PromptSpec>>,
    pub(crate) completions: RwLock<HashMap<CompletionReference, CompletionSpec>>,
    /// Active `resources/subscribe` registrations as (session id, uri).
    pub(crate) subscriptions: RwLock<HashSet<(String, String)>>,
}

impl Registries {
    pub(crate) async fn insert_tool(&self, spec: ToolSpec) -> Result<()> {
        let name = spec.tool.name.clone();
        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(
                McpServerError::Registry(format!("Tool with name '{name}' already exists")).into(),
            );
        }
        tools.insert(name, spec);
        Ok(())
    }

    pub(crate) async fn remove_tool(&self, name: &str) -> Result<()> {
        let mut tools = self.tools.write().await;
        if tools.remove(name).is_none() {
            return Err(
                McpServerError::Registry(format!("Tool with name '{name}' does not exist")).into(),
            );
        }
        Ok(())
    }

    pub(crate) async fn insert_resource(&self, spec: ResourceSpec) -> Result<()> {
        let mut resources = self.resources.write().await;
        if resources.iter().any(|r| r.resource.uri == spec.resource.uri) {
            return Err(McpServerError::Registry(format!(
                "Resource with URI '{}' already exists",
                spec.resource.uri
            ))
            .into());
        }
        resources.push(spec);
        Ok(())
    }

    pub(crate) async fn remove_resource(&self, uri: &str) -> Result<()> {
        let mut resources = self.resources.write().await;
        let before = resources.len();
        resources.retain(|r| r.resource.uri != uri);
        if resources.len() == before {
            return Err(
                McpServerError::Registry(format!("Resource with URI '{uri}' does not exist"))
                    .into(),
            );
        }
        Ok(())
    }

    pub(crate) async fn insert_prompt(&self, spec: PromptSpec) -> Result<()> {
        let name = spec.prompt.name.clone();
        let mut prompts = self.prompts.write().await;
        if prompts.contains_key(&name) {
            return Err(McpServerError::Registry(format!(
                "Prompt with name '{name}' already exists"
            ))
            .into());
        }
        prompts.insert(name, spec);
        Ok(())
    }

    pub(crate) async fn remove_prompt(&self, name: &str) -> Result<()> {
        let mut prompts = self.prompts.write().await;
        if prompts.remove(name).is_none() {
            return Err(McpServerError::Registry(format!(
                "Prompt with name '{name}' does not exist"
            ))
            .into());
        }
        Ok(())
    }

    pub(crate) async fn insert_completion(&self, spec: CompletionSpec) -> Result<()> {
        let reference = spec.reference.clone();
        let mut completions = self.completions.write().await;
        if completions.contains_key(&reference) {
            return Err(McpServerError::Registry(format!(
                "Completion for reference {reference:?} already exists"
            ))
            .into());
        }
        completions.insert(reference, spec);
        Ok(())
    }

    pub(crate) async fn remove_completion(&self, reference: &CompletionReference) -> Result<()> {
        let mut completions = self.completions.write().await;
        if completions.remove(reference).is_none() {
            return Err(McpServerError::Registry(format!(
                "Completion for reference {reference:?} does not exist"
            ))
            .into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn require_capability(present: bool, what: &str) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(McpServerError::Capability(format!(
            "Server must be configured with {what} capabilities"
        ))
        .into())
    }
}

/// Pick the protocol version for a session.
///
/// The client's requested version is echoed when the server supports it;
/// otherwise the server's newest version is suggested with a warning. An
/// unsupported but well-formed version never rejects the connection.
fn negotiate_protocol_version(supported: &[String], requested: &str) -> String {
    if supported.iter().any(|v| v == requested) {
        return requested.to_string();
    }
    let fallback = supported
        .last()
        .cloned()
        .unwrap_or_else(|| crate::types::LATEST_PROTOCOL_VERSION.to_string());
    tracing::warn!(
        "client requested unsupported protocol version '{requested}'; suggesting '{fallback}'"
    );
    fallback
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`McpServer`] and [`McpStatelessServer`].
///
/// # Examples
///
/// ```no_run
/// use axon_mcp::server::McpServerBuilder;
/// use axon_mcp::types::{Implementation, ServerCapabilities, ToolsCapability};
///
/// # fn main() -> anyhow::Result<()> {
/// let server = McpServerBuilder::new()
///     .server_info(Implementation::new("axon-mcp", "0.2.0"))
///     .capabilities(ServerCapabilities {
///         tools: Some(ToolsCapability { list_changed: Some(true) }),
///         ..Default::default()
///     })
///     .build()?;
/// # let _ = server;
/// # Ok(())
/// # }
/// ```
pub struct McpServerBuilder {
    server_info: Option<Implementation>,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    protocol_versions: Vec<String>,
    request_timeout: Duration,
    keep_alive_interval: Option<Duration>,
    validator: Arc<SchemaValidator>,
    tools: Vec<ToolSpec>,
    resources: Vec<ResourceSpec>,
    prompts: Vec<PromptSpec>,
    completions: Vec<CompletionSpec>,
    roots_changed: Option<RootsChangedHandler>,
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl McpServerBuilder {
    /// Start a builder with no server info and all capabilities disabled.
    pub fn new() -> Self {
        Self {
            server_info: None,
            capabilities: ServerCapabilities::default(),
            instructions: None,
            protocol_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keep_alive_interval: None,
            validator: Arc::new(SchemaValidator::new()),
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            completions: Vec::new(),
            roots_changed: None,
        }
    }

    /// Set the implementation info advertised during initialization.
    /// Mandatory.
    pub fn server_info(mut self, info: Implementation) -> Self {
        self.server_info = Some(info);
        self
    }

    /// Set the advertised capabilities. The logging capability is patched in
    /// unconditionally at build time.
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the usage instructions returned from `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Override the accepted protocol versions, newest last.
    pub fn protocol_versions(mut self, versions: Vec<String>) -> Self {
        self.protocol_versions = versions;
        self
    }

    /// Set the overall timeout for session-initiated requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Ping every connected session at this interval. Individual ping
    /// failures are logged, not propagated.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Inject the schema validator used for structured-output checks.
    pub fn validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Register a tool at construction time.
    pub fn tool(mut self, spec: ToolSpec) -> Self {
        self.tools.push(spec);
        self
    }

    /// Register a resource at construction time.
    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    /// Register a prompt at construction time.
    pub fn prompt(mut self, spec: PromptSpec) -> Self {
        self.prompts.push(spec);
        self
    }

    /// Register a completion target at construction time.
    pub fn completion(mut self, spec: CompletionSpec) -> Self {
        self.completions.push(spec);
        self
    }

    /// Install a consumer for the client's `notifications/roots/list_changed`.
    pub fn on_roots_changed(mut self, handler: RootsChangedHandler) -> Self {
        self.roots_changed = Some(handler);
        self
    }

    /// Validate the configuration and seed the registries.
    fn prepare(
        &mut self,
    ) -> Result<(Implementation, ServerCapabilities, Arc<Registries>, HandlerMaps)> {
        let server_info = self.server_info.take().ok_or_else(|| {
            McpServerError::Validation("server info must be set before build".to_string())
        })?;
        if self.protocol_versions.is_empty() {
            return Err(McpServerError::Validation(
                "at least one protocol version must be supported".to_string(),
            )
            .into());
        }

        // Logging is always advertised, whatever the caller configured.
        let mut capabilities = self.capabilities.clone();
        if capabilities.logging.is_none() {
            capabilities.logging = Some(serde_json::json!({}));
        }

        let mut tools: HashMap<String, ToolSpec> = HashMap::new();
        require_capability(
            capabilities.tools.is_some() || self.tools.is_empty(),
            "tool",
        )?;
        for spec in self.tools.drain(..) {
            let spec = spec.with_output_validation(Arc::clone(&self.validator));
            let name = spec.tool.name.clone();
            if tools.insert(name.clone(), spec).is_some() {
                return Err(McpServerError::Registry(format!(
                    "Tool with name '{name}' already exists"
                ))
                .into());
            }
        }

        let mut resources: Vec<ResourceSpec> = Vec::new();
        require_capability(
            capabilities.resources.is_some() || self.resources.is_empty(),
            "resource",
        )?;
        for spec in self.resources.drain(..) {
            if resources.iter().any(|r| r.resource.uri == spec.resource.uri) {
                return Err(McpServerError::Registry(format!(
                    "Resource with URI '{}' already exists",
                    spec.resource.uri
                ))
                .into());
            }
            resources.push(spec);
        }

        let mut prompts: HashMap<String, PromptSpec> = HashMap::new();
        require_capability(
            capabilities.prompts.is_some() || self.prompts.is_empty(),
            "prompt",
        )?;
        for spec in self.prompts.drain(..) {
            let name = spec.prompt.name.clone();
            if prompts.insert(name.clone(), spec).is_some() {
                return Err(McpServerError::Registry(format!(
                    "Prompt with name '{name}' already exists"
                ))
                .into());
            }
        }

        let mut completions: HashMap<CompletionReference, CompletionSpec> = HashMap::new();
        require_capability(
            capabilities.completions.is_some() || self.completions.is_empty(),
            "completion",
        )?;
        for spec in self.completions.drain(..) {
            let reference = spec.reference.clone();
            if completions.insert(reference.clone(), spec).is_some() {
                return Err(McpServerError::Registry(format!(
                    "Completion for reference {reference:?} already exists"
                ))
                .into());
            }
        }

        let registries = Arc::new(Registries {
            tools: RwLock::new(tools),
            resources: RwLock::new(resources),
            prompts: RwLock::new(prompts),
            completions: RwLock::new(completions),
            subscriptions: RwLock::new(HashSet::new()),
        });

        let maps = build_handler_maps(&registries, &capabilities, self.roots_changed.take());
        Ok((server_info, capabilities, registries, maps))
    }

    /// Build a stateful server.
    ///
    /// # Errors
    ///
    /// Fails when server info is missing, the protocol version list is
    /// empty, an initial spec duplicates a key, or an initial spec's
    /// capability is not enabled.
    pub fn build(mut self) -> Result<Arc<McpServer>> {
        let (server_info, capabilities, registries, maps) = self.prepare()?;
        let server = Arc::new(McpServer {
            server_info,
            capabilities,
            instructions: self.instructions,
            protocol_versions: self.protocol_versions,
            request_timeout: self.request_timeout,
            validator: self.validator,
            registries,
            request_handlers: maps.requests,
            notification_handlers: maps.notifications,
            sessions: SyncRwLock::new(HashMap::new()),
            streamable_sessions: SyncRwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            keep_alive_cancel: CancellationToken::new(),
        });
        if let Some(interval) = self.keep_alive_interval {
            server.spawn_keep_alive(interval);
        }
        Ok(server)
    }

    /// Build a stateless server. The keep-alive interval is ignored: there
    /// are no sessions to ping.
    ///
    /// # Errors
    ///
    /// Same conditions as [`McpServerBuilder::build`].
    pub fn build_stateless(mut self) -> Result<McpStatelessServer> {
        let (server_info, capabilities, registries, maps) = self.prepare()?;
        Ok(McpStatelessServer {
            server_info,
            capabilities,
            instructions: self.instructions,
            protocol_versions: self.protocol_versions,
            validator: self.validator,
            registries,
            request_handlers: maps.requests,
        })
    }
}

// ---------------------------------------------------------------------------
// Stateful server
// ---------------------------------------------------------------------------

/// Stateful MCP server: registries, dispatch tables, connected sessions.
pub struct McpServer {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    protocol_versions: Vec<String>,
    request_timeout: Duration,
    validator: Arc<SchemaValidator>,
    registries: Arc<Registries>,
    request_handlers: HashMap<String, RequestHandler>,
    notification_handlers: HashMap<String, NotificationHandler>,
    sessions: SyncRwLock<HashMap<String, Arc<McpServerSession>>>,
    streamable_sessions: SyncRwLock<HashMap<String, Arc<McpStreamableServerSession>>>,
    accepting: AtomicBool,
    keep_alive_cancel: CancellationToken,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("server_info", &self.server_info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Start building a server.
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    /// The capabilities this server advertises (logging always included).
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// The implementation info this server advertises.
    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    // -----------------------------------------------------------------------
    // Session wiring
    // -----------------------------------------------------------------------

    /// Install this server's session factory into a transport provider.
    pub fn bind(self: &Arc<Self>, provider: &dyn McpServerTransportProvider) {
        provider.set_session_factory(self.session_factory());
    }

    /// The factory a transport provider calls once per accepted connection.
    ///
    /// After [`McpServer::close_gracefully`], freshly created sessions are
    /// closed immediately instead of being tracked.
    pub fn session_factory(self: &Arc<Self>) -> SessionFactory {
        let server = Arc::clone(self);
        Arc::new(move |transport: Arc<dyn McpServerTransport>| {
            let id = uuid::Uuid::new_v4().to_string();
            let session = McpServerSession::new(
                id.clone(),
                server.request_timeout,
                Arc::clone(&transport),
                server.init_handler(),
                server.request_handlers.clone(),
                server.notification_handlers.clone(),
            );
            if server.accepting.load(Ordering::SeqCst) {
                server
                    .sessions
                    .write()
                    .expect("session map lock poisoned")
                    .insert(id, Arc::clone(&session));
            } else {
                tracing::warn!(session_id = %id, "server is shut down; refusing new session");
                transport.close();
            }
            session
        })
    }

    /// Create a streamable session sharing this server's dispatch tables.
    ///
    /// `id` is the transport-assigned session identifier. The session starts
    /// with no stream attached.
    ///
    /// # Errors
    ///
    /// Fails when the server has been shut down or the id is already in use.
    pub fn streamable_session(
        self: &Arc<Self>,
        id: impl Into<String>,
    ) -> Result<Arc<McpStreamableServerSession>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(
                McpServerError::Session("server is shut down; refusing new session".to_string())
                    .into(),
            );
        }
        let id = id.into();
        let session = McpStreamableServerSession::new(
            id.clone(),
            self.request_timeout,
            self.init_handler(),
            self.request_handlers.clone(),
            self.notification_handlers.clone(),
        );
        let mut sessions = self
            .streamable_sessions
            .write()
            .expect("streamable session map lock poisoned");
        if sessions.contains_key(&id) {
            return Err(
                McpServerError::Session(format!("session '{id}' already exists")).into(),
            );
        }
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Forget a session after its transport disconnected, failing its
    /// pending requests.
    pub async fn disconnect_session(&self, id: &str) {
        let session = self
            .sessions
            .write()
            .expect("session map lock poisoned")
            .remove(id);
        if let Some(session) = session {
            session.close().await;
            return;
        }
        let session = self
            .streamable_sessions
            .write()
            .expect("streamable session map lock poisoned")
            .remove(id);
        if let Some(session) = session {
            if let Err(e) = session.close_gracefully().await {
                tracing::debug!(session_id = %id, "streamable session close reported: {e}");
            }
        }
        self.registries
            .subscriptions
            .write()
            .await
            .retain(|(session_id, _)| session_id != id);
    }

    fn init_handler(self: &Arc<Self>) -> InitRequestHandler {
        let server = Arc::clone(self);
        Arc::new(move |params: InitializeParams| {
            let server = Arc::clone(&server);
            Box::pin(async move {
                let protocol_version =
                    negotiate_protocol_version(&server.protocol_versions, &params.protocol_version);
                Ok(InitializeResult {
                    protocol_version,
                    capabilities: server.capabilities.clone(),
                    server_info: server.server_info.clone(),
                    instructions: server.instructions.clone(),
                })
            })
        })
    }

    // -----------------------------------------------------------------------
    // Registry mutation
    // -----------------------------------------------------------------------

    /// Register a tool, broadcasting `notifications/tools/list_changed` when
    /// the capability's `listChanged` flag is set.
    ///
    /// # Errors
    ///
    /// [`McpServerError::Capability`] when tools are not enabled,
    /// [`McpServerError::Registry`] on a duplicate name; the registry is
    /// unchanged in both cases.
    pub async fn add_tool(&self, spec: ToolSpec) -> Result<()> {
        require_capability(self.capabilities.tools.is_some(), "tool")?;
        let spec = spec.with_output_validation(Arc::clone(&self.validator));
        self.registries.insert_tool(spec).await?;
        if self.tools_list_changed() {
            self.broadcast_notification(NOTIF_TOOLS_LIST_CHANGED, None)
                .await;
        }
        Ok(())
    }

    /// Remove a tool by name; see [`McpServer::add_tool`] for the
    /// notification and error contract.
    pub async fn remove_tool(&self, name: &str) -> Result<()> {
        require_capability(self.capabilities.tools.is_some(), "tool")?;
        self.registries.remove_tool(name).await?;
        if self.tools_list_changed() {
            self.broadcast_notification(NOTIF_TOOLS_LIST_CHANGED, None)
                .await;
        }
        Ok(())
    }

    /// Register a resource, broadcasting
    /// `notifications/resources/list_changed` when enabled.
    pub async fn add_resource(&self, spec: ResourceSpec) -> Result<()> {
        require_capability(self.capabilities.resources.is_some(), "resource")?;
        self.registries.insert_resource(spec).await?;
        if self.resources_list_changed() {
            self.broadcast_notification(NOTIF_RESOURCES_LIST_CHANGED, None)
                .await;
        }
        Ok(())
    }

    /// Remove a resource by URI.
    pub async fn remove_resource(&self, uri: &str) -> Result<()> {
        require_capability(self.capabilities.resources.is_some(), "resource")?;
        self.registries.remove_resource(uri).await?;
        if self.resources_list_changed() {
            self.broadcast_notification(NOTIF_RESOURCES_LIST_CHANGED, None)
                .await;
        }
        Ok(())
    }

    /// Register a prompt, broadcasting `notifications/prompts/list_changed`
    /// when enabled.
    pub async fn add_prompt(&self, spec: PromptSpec) -> Result<()> {
        require_capability(self.capabilities.prompts.is_some(), "prompt")?;
        self.registries.insert_prompt(spec).await?;
        if self.prompts_list_changed() {
            self.broadcast_notification(NOTIF_PROMPTS_LIST_CHANGED, None)
                .await;
        }
        Ok(())
    }

    /// Remove a prompt by name.
    pub async fn remove_prompt(&self, name: &str) -> Result<()> {
        require_capability(self.capabilities.prompts.is_some(), "prompt")?;
        self.registries.remove_prompt(name).await?;
        if self.prompts_list_changed() {
            self.broadcast_notification(NOTIF_PROMPTS_LIST_CHANGED, None)
                .await;
        }
        Ok(())
    }

    /// Register a completion target. No list-changed notification exists for
    /// completions.
    pub async fn add_completion(&self, spec: CompletionSpec) -> Result<()> {
        require_capability(self.capabilities.completions.is_some(), "completion")?;
        self.registries.insert_completion(spec).await
    }

    /// Remove a completion target.
    pub async fn remove_completion(&self, reference: &CompletionReference) -> Result<()> {
        require_capability(self.capabilities.completions.is_some(), "completion")?;
        self.registries.remove_completion(reference).await
    }

    fn tools_list_changed(&self) -> bool {
        self.capabilities
            .tools
            .as_ref()
            .and_then(|c| c.list_changed)
            .unwrap_or(false)
    }

    fn resources_list_changed(&self) -> bool {
        self.capabilities
            .resources
            .as_ref()
            .and_then(|c| c.list_changed)
            .unwrap_or(false)
    }

    fn prompts_list_changed(&self) -> bool {
        self.capabilities
            .prompts
            .as_ref()
            .and_then(|c| c.list_changed)
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    fn channels(&self) -> Vec<(String, Arc<dyn ClientChannel>)> {
        let mut channels: Vec<(String, Arc<dyn ClientChannel>)> = Vec::new();
        for (id, session) in self
            .sessions
            .read()
            .expect("session map lock poisoned")
            .iter()
        {
            channels.push((id.clone(), Arc::clone(session) as Arc<dyn ClientChannel>));
        }
        for (id, session) in self
            .streamable_sessions
            .read()
            .expect("streamable session map lock poisoned")
            .iter()
        {
            channels.push((id.clone(), Arc::clone(session) as Arc<dyn ClientChannel>));
        }
        channels
    }

    /// Send a notification to every connected session, logging individual
    /// delivery failures.
    pub async fn broadcast_notification(&self, method: &str, params: Option<serde_json::Value>) {
        for (id, channel) in self.channels() {
            if let Err(e) = channel.send_notification(method, params.clone()).await {
                tracing::warn!(session_id = %id, "failed to broadcast '{method}': {e}");
            }
        }
    }

    /// Notify sessions subscribed to `uri` that its content changed.
    ///
    /// # Errors
    ///
    /// [`McpServerError::Capability`] when resources are not enabled.
    pub async fn notify_resource_updated(&self, uri: &str) -> Result<()> {
        require_capability(self.capabilities.resources.is_some(), "resource")?;
        let subscribers: HashSet<String> = self
            .registries
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, subscribed_uri)| subscribed_uri == uri)
            .map(|(session_id, _)| session_id.clone())
            .collect();
        if subscribers.is_empty() {
            return Ok(());
        }
        let params = serde_json::json!({ "uri": uri });
        for (id, channel) in self.channels() {
            if !subscribers.contains(&id) {
                continue;
            }
            if let Err(e) = channel
                .send_notification(NOTIF_RESOURCES_UPDATED, Some(params.clone()))
                .await
            {
                tracing::warn!(session_id = %id, "failed to notify resource update: {e}");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Keep-alive and shutdown
    // -----------------------------------------------------------------------

    fn spawn_keep_alive(self: &Arc<Self>, interval: Duration) {
        let server = Arc::clone(self);
        let cancel = self.keep_alive_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so pings start one
            // interval after construction.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for (id, channel) in server.channels() {
                            let ping = channel.send_request_value(METHOD_PING, None);
                            match tokio::time::timeout(interval, ping).await {
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => {
                                    tracing::warn!(session_id = %id, "keep-alive ping failed: {e}");
                                }
                                Err(_) => {
                                    tracing::warn!(session_id = %id, "keep-alive ping timed out");
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Shut the server down: stop accepting sessions, drain existing ones
    /// concurrently, then stop the keep-alive scheduler.
    ///
    /// A session that fails to close is logged and does not abort the
    /// shutdown of the others.
    pub async fn close_gracefully(&self) -> Result<()> {
        self.accepting.store(false, Ordering::SeqCst);

        let sessions: Vec<Arc<McpServerSession>> = self
            .sessions
            .write()
            .expect("session map lock poisoned")
            .drain()
            .map(|(_, session)| session)
            .collect();
        let streamable: Vec<Arc<McpStreamableServerSession>> = self
            .streamable_sessions
            .write()
            .expect("streamable session map lock poisoned")
            .drain()
            .map(|(_, session)| session)
            .collect();

        let results = join_all(
            sessions
                .iter()
                .map(|session| session.close_gracefully())
                .collect::<Vec<_>>(),
        )
        .await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(session_id = %session.id(), "session close failed: {e}");
            }
        }

        let results = join_all(
            streamable
                .iter()
                .map(|session| session.close_gracefully())
                .collect::<Vec<_>>(),
        )
        .await;
        for (session, result) in streamable.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(session_id = %session.id(), "session close failed: {e}");
            }
        }

        // Only after every session is drained.
        self.keep_alive_cancel.cancel();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.read().expect("session map lock poisoned").len()
    }
}

// ---------------------------------------------------------------------------
// Stateless server
// ---------------------------------------------------------------------------

/// Sessionless server variant: same registries and dispatch tables, no
/// lifecycle.
///
/// Each call to [`McpStatelessServer::handle_request`] runs against a
/// detached exchange, so handlers that try to interact with the client fail
/// fast with a descriptive error.
pub struct McpStatelessServer {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    protocol_versions: Vec<String>,
    validator: Arc<SchemaValidator>,
    registries: Arc<Registries>,
    request_handlers: HashMap<String, RequestHandler>,
}

impl std::fmt::Debug for McpStatelessServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpStatelessServer")
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl McpStatelessServer {
    /// Start a builder; finish with
    /// [`McpServerBuilder::build_stateless`].
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    /// The capabilities this server advertises.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Handle one request and return its raw result value.
    ///
    /// # Errors
    ///
    /// [`McpServerError::Protocol`] with `-32601` for an unknown method;
    /// handler failures propagate for the caller's transport layer to
    /// convert into an error response.
    pub async fn handle_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if method == crate::types::METHOD_INITIALIZE {
            let params: InitializeParams = params
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| {
                    McpServerError::Protocol {
                        code: crate::types::ERROR_INVALID_PARAMS,
                        message: format!("Invalid params: {e}"),
                    }
                })?
                .ok_or_else(|| McpServerError::Protocol {
                    code: crate::types::ERROR_INVALID_PARAMS,
                    message: "initialize requires valid params".to_string(),
                })?;
            let protocol_version =
                negotiate_protocol_version(&self.protocol_versions, &params.protocol_version);
            return Ok(serde_json::to_value(InitializeResult {
                protocol_version,
                capabilities: self.capabilities.clone(),
                server_info: self.server_info.clone(),
                instructions: self.instructions.clone(),
            })?);
        }

        let Some(handler) = self.request_handlers.get(method) else {
            return Err(McpServerError::Protocol {
                code: ERROR_METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
            }
            .into());
        };
        handler(detached_exchange(), params).await
    }

    /// Register a tool. Stateless servers have no sessions, so no
    /// list-changed notification is broadcast.
    pub async fn add_tool(&self, spec: ToolSpec) -> Result<()> {
        require_capability(self.capabilities.tools.is_some(), "tool")?;
        let spec = spec.with_output_validation(Arc::clone(&self.validator));
        self.registries.insert_tool(spec).await
    }

    /// Remove a tool by name.
    pub async fn remove_tool(&self, name: &str) -> Result<()> {
        require_capability(self.capabilities.tools.is_some(), "tool")?;
        self.registries.remove_tool(name).await
    }

    /// Register a resource.
    pub async fn add_resource(&self, spec: ResourceSpec) -> Result<()> {
        require_capability(self.capabilities.resources.is_some(), "resource")?;
        self.registries.insert_resource(spec).await
    }

    /// Remove a resource by URI.
    pub async fn remove_resource(&self, uri: &str) -> Result<()> {
        require_capability(self.capabilities.resources.is_some(), "resource")?;
        self.registries.remove_resource(uri).await
    }

    /// Register a prompt.
    pub async fn add_prompt(&self, spec: PromptSpec) -> Result<()> {
        require_capability(self.capabilities.prompts.is_some(), "prompt")?;
        self.registries.insert_prompt(spec).await
    }

    /// Remove a prompt by name.
    pub async fn remove_prompt(&self, name: &str) -> Result<()> {
        require_capability(self.capabilities.prompts.is_some(), "prompt")?;
        self.registries.remove_prompt(name).await
    }
}
