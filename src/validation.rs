//! Structured-output validation for tool call results
//!
//! Tools may declare an `outputSchema`. When they do, their call handler is
//! wrapped in [`StructuredOutputHandler`], which checks the produced
//! `structuredContent` against the schema and repairs or rejects the result:
//!
//! - no schema declared but structured content present: warn and pass through;
//! - schema declared but no structured content: replace with an error result;
//! - structured content invalid: replace with an error result carrying the
//!   validator's message;
//! - valid structured content with no text items: synthesize one text content
//!   item holding the canonical JSON rendering, so text-only clients still
//!   see the payload.
//!
//! Wrapping is idempotent: a handler that already validates is returned
//! unchanged, so specs flowing through multiple builder layers are never
//! validated twice.

use std::sync::Arc;

use jsonschema::JSONSchema;

use crate::error::{McpServerError, Result};
use crate::server::exchange::McpServerExchange;
use crate::server::specs::ToolCallHandler;
use crate::session::BoxFuture;
use crate::types::{CallToolParams, CallToolResult, Content};

/// JSON Schema validator handle.
///
/// Constructed once at server build time and threaded through the specs that
/// need it; there is no hidden global instance.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Validate `instance` against `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Validation`] when the schema itself does not
    /// compile or when the instance violates it; the message aggregates every
    /// violation with its instance path.
    pub fn validate(&self, schema: &serde_json::Value, instance: &serde_json::Value) -> Result<()> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| McpServerError::Validation(format!("invalid output schema: {}", e)))?;

        let mut messages = Vec::new();
        if let Err(errors) = compiled.validate(instance) {
            for error in errors {
                messages.push(format!("{} (at '{}')", error, error.instance_path));
            }
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(McpServerError::Validation(messages.join("; ")).into())
        }
    }
}

/// Decorator that validates a tool handler's structured output against the
/// tool's declared `outputSchema`.
pub struct StructuredOutputHandler {
    inner: Arc<dyn ToolCallHandler>,
    output_schema: Option<serde_json::Value>,
    validator: Arc<SchemaValidator>,
}

impl StructuredOutputHandler {
    /// Wrap `inner` so its results are checked against `output_schema`.
    ///
    /// Returns `inner` unchanged when it already validates output, making
    /// repeated wrapping a no-op.
    pub fn wrap(
        inner: Arc<dyn ToolCallHandler>,
        output_schema: Option<serde_json::Value>,
        validator: Arc<SchemaValidator>,
    ) -> Arc<dyn ToolCallHandler> {
        if inner.validates_output() {
            return inner;
        }
        Arc::new(Self {
            inner,
            output_schema,
            validator,
        })
    }
}

impl ToolCallHandler for StructuredOutputHandler {
    fn call(
        &self,
        exchange: McpServerExchange,
        params: CallToolParams,
    ) -> BoxFuture<'static, Result<CallToolResult>> {
        let schema = self.output_schema.clone();
        let validator = Arc::clone(&self.validator);
        let inner = self.inner.call(exchange, params);
        Box::pin(async move {
            let result = inner.await?;
            Ok(apply_output_schema(result, schema.as_ref(), &validator))
        })
    }

    fn validates_output(&self) -> bool {
        true
    }
}

/// Enforce the structured-output contract on a finished tool result.
pub(crate) fn apply_output_schema(
    mut result: CallToolResult,
    schema: Option<&serde_json::Value>,
    validator: &SchemaValidator,
) -> CallToolResult {
    let structured = result.structured_content.clone();
    match (schema, structured) {
        (None, None) => result,
        (None, Some(_)) => {
            tracing::warn!("tool returned structured content but declares no output schema");
            result
        }
        (Some(_), None) => CallToolResult::error_text(
            "Response missing structured content which is expected when calling tool with non-empty outputSchema",
        ),
        (Some(schema), Some(structured)) => match validator.validate(schema, &structured) {
            Err(e) => CallToolResult::error_text(e.to_string()),
            Ok(()) => {
                let has_text = result
                    .content
                    .iter()
                    .any(|c| matches!(c, Content::Text { .. }));
                if !has_text {
                    // Text-only clients still need to see the payload.
                    let rendered = serde_json::to_string(&structured)
                        .unwrap_or_else(|_| structured.to_string());
                    result.content.push(Content::text(rendered));
                }
                result
            }
        },
    }
}
