//! Built-in request/notification handlers and the handler-map builder
//!
//! The method → handler maps are built once at server construction from
//! whichever capability flags are non-null: `tools/list` and `tools/call`
//! exist only when the tools capability is enabled, and so on. `ping` is
//! always present (`initialize` is handled by the session directly and never
//! enters these maps).
//!
//! Handler failures surface as typed protocol errors where a JSON-RPC code is
//! mandated (unknown tool, unknown resource, bad params) and as plain errors
//! otherwise; the session converts both into error responses.

use std::sync::Arc;

use crate::error::{McpServerError, Result};
use crate::server::core::Registries;
use crate::server::specs::RootsChangedHandler;
use crate::session::{NotificationHandler, RequestHandler};
use crate::types::{
    CallToolParams, CompleteParams, CompletionReference, GetPromptParams, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, ReadResourceParams,
    ServerCapabilities, SetLevelParams, SubscribeParams, ERROR_INVALID_PARAMS,
    METHOD_COMPLETION_COMPLETE, METHOD_LOGGING_SET_LEVEL, METHOD_PING, METHOD_PROMPTS_GET,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_RESOURCES_SUBSCRIBE, METHOD_RESOURCES_TEMPLATES_LIST, METHOD_RESOURCES_UNSUBSCRIBE,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, NOTIF_ROOTS_LIST_CHANGED,
};

/// The capability-gated dispatch tables a session routes through.
pub(crate) struct HandlerMaps {
    pub(crate) requests: std::collections::HashMap<String, RequestHandler>,
    pub(crate) notifications: std::collections::HashMap<String, NotificationHandler>,
}

/// Build the dispatch tables for `capabilities` over `registries`.
pub(crate) fn build_handler_maps(
    registries: &Arc<Registries>,
    capabilities: &ServerCapabilities,
    roots_changed: Option<RootsChangedHandler>,
) -> HandlerMaps {
    let mut requests = std::collections::HashMap::new();
    let mut notifications: std::collections::HashMap<String, NotificationHandler> =
        std::collections::HashMap::new();

    requests.insert(METHOD_PING.to_string(), ping_handler());

    if capabilities.tools.is_some() {
        requests.insert(
            METHOD_TOOLS_LIST.to_string(),
            tools_list_handler(Arc::clone(registries)),
        );
        requests.insert(
            METHOD_TOOLS_CALL.to_string(),
            tools_call_handler(Arc::clone(registries)),
        );
    }

    if let Some(resources) = &capabilities.resources {
        requests.insert(
            METHOD_RESOURCES_LIST.to_string(),
            resources_list_handler(Arc::clone(registries)),
        );
        requests.insert(
            METHOD_RESOURCES_TEMPLATES_LIST.to_string(),
            resource_templates_list_handler(Arc::clone(registries)),
        );
        requests.insert(
            METHOD_RESOURCES_READ.to_string(),
            resources_read_handler(Arc::clone(registries)),
        );
        if resources.subscribe == Some(true) {
            requests.insert(
                METHOD_RESOURCES_SUBSCRIBE.to_string(),
                resources_subscribe_handler(Arc::clone(registries)),
            );
            requests.insert(
                METHOD_RESOURCES_UNSUBSCRIBE.to_string(),
                resources_unsubscribe_handler(Arc::clone(registries)),
            );
        }
    }

    if capabilities.prompts.is_some() {
        requests.insert(
            METHOD_PROMPTS_LIST.to_string(),
            prompts_list_handler(Arc::clone(registries)),
        );
        requests.insert(
            METHOD_PROMPTS_GET.to_string(),
            prompts_get_handler(Arc::clone(registries)),
        );
    }

    if capabilities.completions.is_some() {
        requests.insert(
            METHOD_COMPLETION_COMPLETE.to_string(),
            completion_complete_handler(Arc::clone(registries)),
        );
    }

    if capabilities.logging.is_some() {
        requests.insert(METHOD_LOGGING_SET_LEVEL.to_string(), set_level_handler());
    }

    if let Some(consumer) = roots_changed {
        notifications.insert(
            NOTIF_ROOTS_LIST_CHANGED.to_string(),
            roots_changed_handler(consumer),
        );
    }

    HandlerMaps {
        requests,
        notifications,
    }
}

// ---------------------------------------------------------------------------
// Param helpers
// ---------------------------------------------------------------------------

/// Deserialize a request's raw params, treating an absent object as `{}`.
///
/// A shape mismatch becomes a `-32602 Invalid params` protocol error so the
/// session answers with the standard code instead of `-32603`.
fn parse_params<T>(params: Option<serde_json::Value>) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let value = params.unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
    serde_json::from_value(value).map_err(|e| {
        McpServerError::Protocol {
            code: ERROR_INVALID_PARAMS,
            message: format!("Invalid params: {e}"),
        }
        .into()
    })
}

fn invalid_params(message: String) -> anyhow::Error {
    McpServerError::Protocol {
        code: ERROR_INVALID_PARAMS,
        message,
    }
    .into()
}

// ---------------------------------------------------------------------------
// Always-on handlers
// ---------------------------------------------------------------------------

fn ping_handler() -> RequestHandler {
    Arc::new(|_exchange, _params| Box::pin(async { Ok(serde_json::json!({})) }))
}

fn set_level_handler() -> RequestHandler {
    Arc::new(|exchange, params| {
        Box::pin(async move {
            let params: SetLevelParams = parse_params(params)?;
            exchange.channel().set_min_logging_level(params.level);
            Ok(serde_json::json!({}))
        })
    })
}

// ---------------------------------------------------------------------------
// Tool handlers
// ---------------------------------------------------------------------------

fn tools_list_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |_exchange, _params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let mut tools: Vec<_> = registries
                .tools
                .read()
                .await
                .values()
                .map(|spec| spec.tool.clone())
                .collect();
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(serde_json::to_value(ListToolsResult {
                tools,
                next_cursor: None,
            })?)
        })
    })
}

fn tools_call_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |exchange, params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let params: CallToolParams = parse_params(params)?;
            let handler = {
                let tools = registries.tools.read().await;
                match tools.get(&params.name) {
                    Some(spec) => spec.handler(),
                    None => return Err(invalid_params(format!("Unknown tool: {}", params.name))),
                }
            };
            let result = handler.call(exchange, params).await?;
            Ok(serde_json::to_value(result)?)
        })
    })
}

// ---------------------------------------------------------------------------
// Resource handlers
// ---------------------------------------------------------------------------

fn resources_list_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |_exchange, _params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            // Templated registrations surface through resources/templates/list
            // instead.
            let resources: Vec<_> = registries
                .resources
                .read()
                .await
                .iter()
                .filter(|spec| !spec.is_templated())
                .map(|spec| spec.resource.clone())
                .collect();
            Ok(serde_json::to_value(ListResourcesResult {
                resources,
                next_cursor: None,
            })?)
        })
    })
}

fn resource_templates_list_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |_exchange, _params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let resource_templates: Vec<_> = registries
                .resources
                .read()
                .await
                .iter()
                .filter_map(|spec| spec.to_resource_template())
                .collect();
            Ok(serde_json::to_value(ListResourceTemplatesResult {
                resource_templates,
                next_cursor: None,
            })?)
        })
    })
}

fn resources_read_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |exchange, params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let params: ReadResourceParams = parse_params(params)?;
            // First match in registration order; no specificity ranking.
            let handler = {
                let resources = registries.resources.read().await;
                resources
                    .iter()
                    .find(|spec| spec.matches(&params.uri))
                    .map(|spec| Arc::clone(&spec.handler))
            };
            let Some(handler) = handler else {
                return Err(invalid_params(format!("Unknown resource: {}", params.uri)));
            };
            let result = handler(exchange, params).await?;
            Ok(serde_json::to_value(result)?)
        })
    })
}

fn resources_subscribe_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |exchange, params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let params: SubscribeParams = parse_params(params)?;
            let known = registries
                .resources
                .read()
                .await
                .iter()
                .any(|spec| spec.matches(&params.uri));
            if !known {
                return Err(invalid_params(format!("Unknown resource: {}", params.uri)));
            }
            registries
                .subscriptions
                .write()
                .await
                .insert((exchange.session_id(), params.uri));
            Ok(serde_json::json!({}))
        })
    })
}

fn resources_unsubscribe_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |exchange, params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let params: SubscribeParams = parse_params(params)?;
            let removed = registries
                .subscriptions
                .write()
                .await
                .remove(&(exchange.session_id(), params.uri.clone()));
            if !removed {
                return Err(invalid_params(format!(
                    "No subscription for resource: {}",
                    params.uri
                )));
            }
            Ok(serde_json::json!({}))
        })
    })
}

// ---------------------------------------------------------------------------
// Prompt handlers
// ---------------------------------------------------------------------------

fn prompts_list_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |_exchange, _params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let mut prompts: Vec<_> = registries
                .prompts
                .read()
                .await
                .values()
                .map(|spec| spec.prompt.clone())
                .collect();
            prompts.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(serde_json::to_value(ListPromptsResult {
                prompts,
                next_cursor: None,
            })?)
        })
    })
}

fn prompts_get_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |exchange, params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let params: GetPromptParams = parse_params(params)?;
            let handler = {
                let prompts = registries.prompts.read().await;
                match prompts.get(&params.name) {
                    Some(spec) => Arc::clone(&spec.handler),
                    None => {
                        return Err(invalid_params(format!("Unknown prompt: {}", params.name)))
                    }
                }
            };
            let result = handler(exchange, params).await?;
            Ok(serde_json::to_value(result)?)
        })
    })
}

// ---------------------------------------------------------------------------
// Completion handler
// ---------------------------------------------------------------------------

fn completion_complete_handler(registries: Arc<Registries>) -> RequestHandler {
    Arc::new(move |exchange, params| {
        let registries = Arc::clone(&registries);
        Box::pin(async move {
            let params: CompleteParams = parse_params(params)?;
            validate_completion_target(&registries, &params).await?;

            let handler = {
                let completions = registries.completions.read().await;
                match completions.get(&params.reference) {
                    Some(spec) => Arc::clone(&spec.handler),
                    None => {
                        return Err(invalid_params(format!(
                            "No completion handler registered for reference {:?}",
                            params.reference
                        )))
                    }
                }
            };
            let result = handler(exchange, params).await?;
            Ok(serde_json::to_value(result)?)
        })
    })
}

/// Check that the referenced prompt declares the argument being completed,
/// or that the referenced resource's URI template declares the variable.
///
/// A mismatch fails before the completion handler is invoked, so handlers
/// never see an argument their target does not define.
async fn validate_completion_target(
    registries: &Registries,
    params: &CompleteParams,
) -> Result<()> {
    match &params.reference {
        CompletionReference::Prompt { name } => {
            let prompts = registries.prompts.read().await;
            let Some(spec) = prompts.get(name) else {
                return Err(invalid_params(format!("Unknown prompt: {name}")));
            };
            if !spec.declares_argument(&params.argument.name) {
                return Err(invalid_params(format!(
                    "Prompt '{}' does not declare argument '{}'",
                    name, params.argument.name
                )));
            }
        }
        CompletionReference::Resource { uri } => {
            let resources = registries.resources.read().await;
            let Some(spec) = resources.iter().find(|spec| spec.resource.uri == *uri) else {
                return Err(invalid_params(format!("Unknown resource: {uri}")));
            };
            if !spec
                .variable_names()
                .iter()
                .any(|v| v == &params.argument.name)
            {
                return Err(invalid_params(format!(
                    "URI template '{}' does not declare variable '{}'",
                    uri, params.argument.name
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Notification handlers
// ---------------------------------------------------------------------------

fn roots_changed_handler(consumer: RootsChangedHandler) -> NotificationHandler {
    Arc::new(move |exchange, _params| {
        let consumer = Arc::clone(&consumer);
        Box::pin(async move { consumer(exchange).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::exchange::detached_exchange;
    use crate::server::specs::{
        completion_handler_fn, handler_fn, prompt_handler_fn, resource_handler_fn, PromptSpec,
        ResourceSpec, ToolSpec,
    };
    use crate::types::{
        CallToolResult, CompleteCompletion, CompleteResult, GetPromptResult, Prompt,
        PromptArgument, ReadResourceResult, Resource, ResourcesCapability, Tool, ToolsCapability,
    };

    fn registries() -> Arc<Registries> {
        Arc::new(Registries::default())
    }

    fn full_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            completions: Some(serde_json::json!({})),
            experimental: None,
            logging: Some(serde_json::json!({})),
            prompts: Some(Default::default()),
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: None,
            }),
            tools: Some(ToolsCapability::default()),
        }
    }

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: None,
            meta: None,
        }
    }

    async fn seed_tool(registries: &Registries, name: &str) {
        let spec = ToolSpec::new(
            tool(name),
            handler_fn(|_e, p| async move { Ok(CallToolResult::from_text(format!("ran {}", p.name))) }),
        )
        .unwrap();
        registries
            .tools
            .write()
            .await
            .insert(name.to_string(), spec);
    }

    async fn seed_resource(registries: &Registries, uri: &str, name: &str) {
        let spec = ResourceSpec::new(
            Resource {
                uri: uri.to_string(),
                name: name.to_string(),
                description: None,
                mime_type: None,
                meta: None,
            },
            resource_handler_fn(|_e, p| async move {
                Ok(ReadResourceResult {
                    contents: vec![crate::types::ResourceContents::Text(
                        crate::types::TextResourceContents {
                            uri: p.uri,
                            mime_type: None,
                            text: "content".to_string(),
                        },
                    )],
                })
            }),
        )
        .unwrap();
        registries.resources.write().await.push(spec);
    }

    #[test]
    fn test_handler_maps_gated_by_capabilities() {
        let maps = build_handler_maps(&registries(), &ServerCapabilities::default(), None);
        assert!(maps.requests.contains_key(METHOD_PING));
        assert!(!maps.requests.contains_key(METHOD_TOOLS_LIST));
        assert!(!maps.requests.contains_key(METHOD_RESOURCES_READ));
        assert!(!maps.requests.contains_key(METHOD_PROMPTS_GET));
        assert!(!maps.requests.contains_key(METHOD_COMPLETION_COMPLETE));
        assert!(!maps.requests.contains_key(METHOD_LOGGING_SET_LEVEL));

        let maps = build_handler_maps(&registries(), &full_capabilities(), None);
        for method in [
            METHOD_PING,
            METHOD_TOOLS_LIST,
            METHOD_TOOLS_CALL,
            METHOD_RESOURCES_LIST,
            METHOD_RESOURCES_TEMPLATES_LIST,
            METHOD_RESOURCES_READ,
            METHOD_RESOURCES_SUBSCRIBE,
            METHOD_RESOURCES_UNSUBSCRIBE,
            METHOD_PROMPTS_LIST,
            METHOD_PROMPTS_GET,
            METHOD_COMPLETION_COMPLETE,
            METHOD_LOGGING_SET_LEVEL,
        ] {
            assert!(maps.requests.contains_key(method), "missing {method}");
        }
    }

    #[test]
    fn test_subscribe_handlers_require_subscribe_flag() {
        let mut capabilities = full_capabilities();
        capabilities.resources = Some(ResourcesCapability::default());
        let maps = build_handler_maps(&registries(), &capabilities, None);
        assert!(maps.requests.contains_key(METHOD_RESOURCES_READ));
        assert!(!maps.requests.contains_key(METHOD_RESOURCES_SUBSCRIBE));
    }

    #[tokio::test]
    async fn test_ping_returns_empty_object() {
        let maps = build_handler_maps(&registries(), &ServerCapabilities::default(), None);
        let handler = maps.requests.get(METHOD_PING).unwrap();
        let result = handler(detached_exchange(), None).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool_is_invalid_params() {
        let registries = registries();
        let handler = tools_call_handler(Arc::clone(&registries));
        let err = handler(
            detached_exchange(),
            Some(serde_json::json!({"name": "nope"})),
        )
        .await
        .unwrap_err();
        let protocol = err.downcast_ref::<McpServerError>().unwrap();
        assert!(matches!(
            protocol,
            McpServerError::Protocol {
                code: ERROR_INVALID_PARAMS,
                ..
            }
        ));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_tools_list_sorted_by_name() {
        let registries = registries();
        seed_tool(&registries, "zeta").await;
        seed_tool(&registries, "alpha").await;

        let handler = tools_list_handler(Arc::clone(&registries));
        let result = handler(detached_exchange(), None).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "alpha");
        assert_eq!(result["tools"][1]["name"], "zeta");
        assert!(result.get("nextCursor").is_none());
    }

    #[tokio::test]
    async fn test_resource_listing_partition() {
        let registries = registries();
        seed_resource(&registries, "memo://status", "status").await;
        seed_resource(&registries, "items/{id}", "item").await;

        let list = resources_list_handler(Arc::clone(&registries));
        let result = list(detached_exchange(), None).await.unwrap();
        let resources = result["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0]["uri"], "memo://status");

        let templates = resource_templates_list_handler(Arc::clone(&registries));
        let result = templates(detached_exchange(), None).await.unwrap();
        let templates = result["resourceTemplates"].as_array().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0]["uriTemplate"], "items/{id}");
    }

    #[tokio::test]
    async fn test_resources_read_matches_template_in_registration_order() {
        let registries = registries();
        seed_resource(&registries, "items/{id}", "item").await;

        let read = resources_read_handler(Arc::clone(&registries));
        let result = read(
            detached_exchange(),
            Some(serde_json::json!({"uri": "items/42"})),
        )
        .await
        .unwrap();
        assert_eq!(result["contents"][0]["uri"], "items/42");

        let err = read(
            detached_exchange(),
            Some(serde_json::json!({"uri": "other/42"})),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("other/42"));
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscription_fails() {
        let registries = registries();
        seed_resource(&registries, "memo://status", "status").await;

        let unsubscribe = resources_unsubscribe_handler(Arc::clone(&registries));
        let err = unsubscribe(
            detached_exchange(),
            Some(serde_json::json!({"uri": "memo://status"})),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("No subscription"));

        let subscribe = resources_subscribe_handler(Arc::clone(&registries));
        subscribe(
            detached_exchange(),
            Some(serde_json::json!({"uri": "memo://status"})),
        )
        .await
        .unwrap();
        unsubscribe(
            detached_exchange(),
            Some(serde_json::json!({"uri": "memo://status"})),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_completion_validates_prompt_argument() {
        let registries = registries();
        let prompt_spec = PromptSpec::new(
            Prompt {
                name: "greet".to_string(),
                title: None,
                description: None,
                arguments: Some(vec![PromptArgument {
                    name: "who".to_string(),
                    description: None,
                    required: Some(true),
                }]),
            },
            prompt_handler_fn(|_e, _p| async {
                Ok(GetPromptResult {
                    description: None,
                    messages: vec![],
                })
            }),
        )
        .unwrap();
        registries
            .prompts
            .write()
            .await
            .insert("greet".to_string(), prompt_spec);
        registries.completions.write().await.insert(
            CompletionReference::Prompt {
                name: "greet".to_string(),
            },
            crate::server::specs::CompletionSpec::new(
                CompletionReference::Prompt {
                    name: "greet".to_string(),
                },
                completion_handler_fn(|_e, _p| async {
                    Ok(CompleteResult {
                        completion: CompleteCompletion {
                            values: vec!["world".to_string()],
                            total: None,
                            has_more: None,
                        },
                    })
                }),
            ),
        );

        let complete = completion_complete_handler(Arc::clone(&registries));

        let result = complete(
            detached_exchange(),
            Some(serde_json::json!({
                "ref": {"type": "ref/prompt", "name": "greet"},
                "argument": {"name": "who", "value": "wo"}
            })),
        )
        .await
        .unwrap();
        assert_eq!(result["completion"]["values"][0], "world");

        // An argument the prompt does not declare fails before the handler.
        let err = complete(
            detached_exchange(),
            Some(serde_json::json!({
                "ref": {"type": "ref/prompt", "name": "greet"},
                "argument": {"name": "when", "value": ""}
            })),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("does not declare argument"));

        let err = complete(
            detached_exchange(),
            Some(serde_json::json!({
                "ref": {"type": "ref/prompt", "name": "missing"},
                "argument": {"name": "who", "value": ""}
            })),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Unknown prompt"));
    }

    #[tokio::test]
    async fn test_completion_validates_resource_template_variable() {
        let registries = registries();
        seed_resource(&registries, "items/{id}", "item").await;
        registries.completions.write().await.insert(
            CompletionReference::Resource {
                uri: "items/{id}".to_string(),
            },
            crate::server::specs::CompletionSpec::new(
                CompletionReference::Resource {
                    uri: "items/{id}".to_string(),
                },
                completion_handler_fn(|_e, _p| async { Ok(CompleteResult::default()) }),
            ),
        );

        let complete = completion_complete_handler(Arc::clone(&registries));

        complete(
            detached_exchange(),
            Some(serde_json::json!({
                "ref": {"type": "ref/resource", "uri": "items/{id}"},
                "argument": {"name": "id", "value": "4"}
            })),
        )
        .await
        .unwrap();

        let err = complete(
            detached_exchange(),
            Some(serde_json::json!({
                "ref": {"type": "ref/resource", "uri": "items/{id}"},
                "argument": {"name": "color", "value": ""}
            })),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("does not declare variable"));
    }

    #[tokio::test]
    async fn test_malformed_params_become_invalid_params() {
        let registries = registries();
        let read = resources_read_handler(Arc::clone(&registries));
        let err = read(
            detached_exchange(),
            Some(serde_json::json!({"no_uri": true})),
        )
        .await
        .unwrap_err();
        let protocol = err.downcast_ref::<McpServerError>().unwrap();
        assert!(matches!(
            protocol,
            McpServerError::Protocol {
                code: ERROR_INVALID_PARAMS,
                ..
            }
        ));
    }
}
