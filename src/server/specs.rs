//! Handler-bearing registry entries
//!
//! A spec pairs a protocol-visible metadata record (tool, resource, prompt,
//! completion reference) with the handler invoked when the client exercises
//! it. Specs validate their metadata at construction so registry insertion
//! can assume well-formed entries.

use std::sync::Arc;

use crate::error::{McpServerError, Result};
use crate::server::exchange::McpServerExchange;
use crate::session::BoxFuture;
use crate::types::{
    CallToolParams, CallToolResult, CompleteParams, CompleteResult, CompletionReference,
    GetPromptParams, GetPromptResult, Prompt, ReadResourceParams, ReadResourceResult, Resource,
    ResourceTemplate, Tool,
};
use crate::uri_template::UriTemplate;

// ---------------------------------------------------------------------------
// Execution policy
// ---------------------------------------------------------------------------

/// Where a synchronous handler body runs when adapted into the async
/// pipeline. This is a scheduling choice only; behavior and ordering
/// contracts are identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Run the body inline on the calling task. Suitable for fast,
    /// non-blocking bodies.
    Inline,
    /// Run the body on the blocking worker pool so it cannot starve the
    /// I/O-handling tasks.
    Blocking,
}

// ---------------------------------------------------------------------------
// Tool handlers
// ---------------------------------------------------------------------------

/// Handler invoked for a `tools/call` targeting one tool.
pub trait ToolCallHandler: Send + Sync {
    /// Execute the tool call.
    fn call(
        &self,
        exchange: McpServerExchange,
        params: CallToolParams,
    ) -> BoxFuture<'static, Result<CallToolResult>>;

    /// Whether this handler already validates structured output.
    ///
    /// The structured-output decorator checks this to keep wrapping
    /// idempotent.
    fn validates_output(&self) -> bool {
        false
    }
}

struct FnToolHandler<F> {
    f: F,
}

impl<F, Fut> ToolCallHandler for FnToolHandler<F>
where
    F: Fn(McpServerExchange, CallToolParams) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<CallToolResult>> + Send + 'static,
{
    fn call(
        &self,
        exchange: McpServerExchange,
        params: CallToolParams,
    ) -> BoxFuture<'static, Result<CallToolResult>> {
        Box::pin((self.f)(exchange, params))
    }
}

/// Wrap an async closure as a [`ToolCallHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolCallHandler>
where
    F: Fn(McpServerExchange, CallToolParams) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<CallToolResult>> + Send + 'static,
{
    Arc::new(FnToolHandler { f })
}

/// Adapter for synchronous tool bodies.
struct SyncToolHandler {
    f: Arc<dyn Fn(McpServerExchange, CallToolParams) -> Result<CallToolResult> + Send + Sync>,
    execution: Execution,
}

impl ToolCallHandler for SyncToolHandler {
    fn call(
        &self,
        exchange: McpServerExchange,
        params: CallToolParams,
    ) -> BoxFuture<'static, Result<CallToolResult>> {
        let f = Arc::clone(&self.f);
        match self.execution {
            Execution::Inline => Box::pin(async move { f(exchange, params) }),
            Execution::Blocking => Box::pin(async move {
                match tokio::task::spawn_blocking(move || f(exchange, params)).await {
                    Ok(result) => result,
                    Err(e) => Err(McpServerError::Session(format!(
                        "synchronous tool handler panicked: {e}"
                    ))
                    .into()),
                }
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Other handler aliases
// ---------------------------------------------------------------------------

/// Handler for `resources/read` against one registered resource.
pub type ReadResourceHandler = Arc<
    dyn Fn(McpServerExchange, ReadResourceParams) -> BoxFuture<'static, Result<ReadResourceResult>>
        + Send
        + Sync,
>;

/// Handler for `prompts/get` against one registered prompt.
pub type GetPromptHandler = Arc<
    dyn Fn(McpServerExchange, GetPromptParams) -> BoxFuture<'static, Result<GetPromptResult>>
        + Send
        + Sync,
>;

/// Handler for `completion/complete` against one registered reference.
pub type CompleteHandler = Arc<
    dyn Fn(McpServerExchange, CompleteParams) -> BoxFuture<'static, Result<CompleteResult>>
        + Send
        + Sync,
>;

/// Consumer invoked when the client reports a changed root list.
pub type RootsChangedHandler =
    Arc<dyn Fn(McpServerExchange) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`ReadResourceHandler`].
pub fn resource_handler_fn<F, Fut>(f: F) -> ReadResourceHandler
where
    F: Fn(McpServerExchange, ReadResourceParams) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ReadResourceResult>> + Send + 'static,
{
    Arc::new(move |exchange, params| Box::pin(f(exchange, params)))
}

/// Wrap an async closure as a [`GetPromptHandler`].
pub fn prompt_handler_fn<F, Fut>(f: F) -> GetPromptHandler
where
    F: Fn(McpServerExchange, GetPromptParams) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<GetPromptResult>> + Send + 'static,
{
    Arc::new(move |exchange, params| Box::pin(f(exchange, params)))
}

/// Wrap an async closure as a [`CompleteHandler`].
pub fn completion_handler_fn<F, Fut>(f: F) -> CompleteHandler
where
    F: Fn(McpServerExchange, CompleteParams) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<CompleteResult>> + Send + 'static,
{
    Arc::new(move |exchange, params| Box::pin(f(exchange, params)))
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// A registered tool: metadata plus its call handler.
#[derive(Clone)]
pub struct ToolSpec {
    /// Protocol-visible tool metadata.
    pub tool: Tool,
    pub(crate) handler: Arc<dyn ToolCallHandler>,
}

impl ToolSpec {
    /// Create a tool spec from an async handler.
    ///
    /// # Errors
    ///
    /// Fails when the tool name is empty.
    pub fn new(tool: Tool, handler: Arc<dyn ToolCallHandler>) -> Result<Self> {
        if tool.name.is_empty() {
            return Err(McpServerError::Validation("tool name must not be empty".into()).into());
        }
        Ok(Self { tool, handler })
    }

    /// Create a tool spec from a synchronous body, adapted into the async
    /// pipeline according to `execution`.
    pub fn sync<F>(tool: Tool, f: F, execution: Execution) -> Result<Self>
    where
        F: Fn(McpServerExchange, CallToolParams) -> Result<CallToolResult>
            + Send
            + Sync
            + 'static,
    {
        Self::new(
            tool,
            Arc::new(SyncToolHandler {
                f: Arc::new(f),
                execution,
            }),
        )
    }

    /// Wrap the handler with structured-output validation.
    ///
    /// A no-op when the handler already validates.
    pub(crate) fn with_output_validation(
        mut self,
        validator: Arc<crate::validation::SchemaValidator>,
    ) -> Self {
        self.handler = crate::validation::StructuredOutputHandler::wrap(
            self.handler,
            self.tool.output_schema.clone(),
            validator,
        );
        self
    }

    pub(crate) fn handler(&self) -> Arc<dyn ToolCallHandler> {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("tool", &self.tool.name)
            .finish_non_exhaustive()
    }
}

/// A registered resource: metadata, its compiled URI template, and the read
/// handler.
#[derive(Clone)]
pub struct ResourceSpec {
    /// Protocol-visible resource metadata.
    pub resource: Resource,
    pub(crate) template: UriTemplate,
    pub(crate) handler: ReadResourceHandler,
}

impl ResourceSpec {
    /// Create a resource spec, compiling its URI template eagerly.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or the URI template is malformed.
    pub fn new(resource: Resource, handler: ReadResourceHandler) -> Result<Self> {
        if resource.name.is_empty() {
            return Err(
                McpServerError::Validation("resource name must not be empty".into()).into(),
            );
        }
        let template = UriTemplate::new(&resource.uri)?;
        Ok(Self {
            resource,
            template,
            handler,
        })
    }

    /// Whether the resource URI contains `{var}` placeholders.
    pub fn is_templated(&self) -> bool {
        self.template.is_templated()
    }

    /// Whether a concrete URI matches this resource's URI (template).
    pub fn matches(&self, uri: &str) -> bool {
        self.template.matches(uri)
    }

    /// Variables declared by the URI template.
    pub fn variable_names(&self) -> &[String] {
        self.template.variable_names()
    }

    /// Synthesize the template record surfaced through
    /// `resources/templates/list`; `None` for literal resources.
    pub fn to_resource_template(&self) -> Option<ResourceTemplate> {
        if !self.is_templated() {
            return None;
        }
        Some(ResourceTemplate {
            uri_template: self.resource.uri.clone(),
            name: self.resource.name.clone(),
            description: self.resource.description.clone(),
            mime_type: self.resource.mime_type.clone(),
        })
    }
}

impl std::fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSpec")
            .field("uri", &self.resource.uri)
            .finish_non_exhaustive()
    }
}

/// A registered prompt: metadata plus its render handler.
#[derive(Clone)]
pub struct PromptSpec {
    /// Protocol-visible prompt metadata.
    pub prompt: Prompt,
    pub(crate) handler: GetPromptHandler,
}

impl PromptSpec {
    /// Create a prompt spec.
    ///
    /// # Errors
    ///
    /// Fails when the prompt name is empty.
    pub fn new(prompt: Prompt, handler: GetPromptHandler) -> Result<Self> {
        if prompt.name.is_empty() {
            return Err(McpServerError::Validation("prompt name must not be empty".into()).into());
        }
        Ok(Self { prompt, handler })
    }

    /// Whether the prompt declares an argument named `name`.
    pub fn declares_argument(&self, name: &str) -> bool {
        self.prompt
            .arguments
            .as_ref()
            .map(|args| args.iter().any(|a| a.name == name))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for PromptSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptSpec")
            .field("prompt", &self.prompt.name)
            .finish_non_exhaustive()
    }
}

/// A registered completion target: a reference key plus its handler.
#[derive(Clone)]
pub struct CompletionSpec {
    /// The prompt or resource-template reference this completion serves.
    pub reference: CompletionReference,
    pub(crate) handler: CompleteHandler,
}

impl CompletionSpec {
    /// Create a completion spec.
    pub fn new(reference: CompletionReference, handler: CompleteHandler) -> Self {
        Self { reference, handler }
    }
}

impl std::fmt::Debug for CompletionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSpec")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}
