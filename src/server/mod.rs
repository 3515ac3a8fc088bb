//! Dispatch/registry server layer
//!
//! This module holds the mutable registries of tools, resources, prompts,
//! and completions, the capability flags, and the method-name → handler maps
//! sessions dispatch through. Two server variants share the same dispatch
//! shape:
//!
//! - [`McpServer`] -- stateful: tracks connected sessions, broadcasts
//!   `*/list_changed` notifications, and drains sessions on shutdown.
//! - [`McpStatelessServer`] -- sessionless: each request is handled with a
//!   detached exchange whose client-facing operations fail fast.
//!
//! Registry mutation uses atomic insert-if-absent / remove semantics:
//! duplicate adds and removals of missing entries fail with descriptive
//! errors instead of silently succeeding.

pub mod core;
pub mod exchange;
pub(crate) mod handlers;
pub mod specs;

pub use self::core::{McpServer, McpServerBuilder, McpStatelessServer};
pub use exchange::McpServerExchange;
pub use specs::{
    completion_handler_fn, handler_fn, prompt_handler_fn, resource_handler_fn, CompleteHandler,
    CompletionSpec, Execution, GetPromptHandler, PromptSpec, ReadResourceHandler, ResourceSpec,
    RootsChangedHandler, ToolCallHandler, ToolSpec,
};
