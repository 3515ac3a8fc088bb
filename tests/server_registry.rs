//! Registry mutation and capability-gating integration tests
//!
//! Exercises add/remove of tools, resources, prompts, and completions against
//! connected sessions: list results track the registered set, list-changed
//! notifications are broadcast exactly once per successful mutation (and not
//! at all when disabled), and the resource/completion validation rules hold
//! on the wire.

mod common;

use std::sync::Arc;

use axon_mcp::server::{
    completion_handler_fn, handler_fn, prompt_handler_fn, resource_handler_fn, CompletionSpec,
    McpServer, PromptSpec, ResourceSpec, ToolSpec,
};
use axon_mcp::types::{
    CallToolResult, CompleteCompletion, CompleteResult, CompletionReference, Content,
    GetPromptResult, Implementation, Prompt, PromptArgument, PromptMessage, PromptsCapability,
    ReadResourceResult, Resource, ResourceContents, ResourcesCapability, Role,
    ServerCapabilities, TextResourceContents, Tool, ToolsCapability,
};

use common::{connect, initialize, recv};

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

fn echo_spec(name: &str) -> ToolSpec {
    ToolSpec::new(
        tool(name),
        handler_fn(|_e, p| async move { Ok(CallToolResult::from_text(format!("ran {}", p.name))) }),
    )
    .unwrap()
}

fn resource_spec(uri: &str, name: &str) -> ResourceSpec {
    ResourceSpec::new(
        Resource {
            uri: uri.to_string(),
            name: name.to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
            meta: None,
        },
        resource_handler_fn(|_e, params| async move {
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::Text(TextResourceContents {
                    uri: params.uri,
                    mime_type: Some("text/plain".to_string()),
                    text: "contents".to_string(),
                })],
            })
        }),
    )
    .unwrap()
}

fn tools_server(list_changed: bool) -> Arc<McpServer> {
    McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(list_changed),
            }),
            ..Default::default()
        })
        .build()
        .unwrap()
}

async fn list_tool_names(
    handle: &mut axon_mcp::transport::channel::ChannelClientHandle,
    id: i64,
) -> Vec<String> {
    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": id}))
        .unwrap();
    let response = recv(handle).await;
    assert_eq!(response["id"], id);
    response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_tool_list_tracks_mutations_with_single_broadcasts() {
    let server = tools_server(true);
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    server.add_tool(echo_spec("alpha")).await.unwrap();
    let notification = recv(&mut handle).await;
    assert_eq!(notification["method"], "notifications/tools/list_changed");
    assert!(notification.get("id").is_none());

    assert_eq!(list_tool_names(&mut handle, 2).await, vec!["alpha"]);

    server.add_tool(echo_spec("beta")).await.unwrap();
    let notification = recv(&mut handle).await;
    assert_eq!(notification["method"], "notifications/tools/list_changed");
    assert_eq!(list_tool_names(&mut handle, 3).await, vec!["alpha", "beta"]);

    server.remove_tool("alpha").await.unwrap();
    let notification = recv(&mut handle).await;
    assert_eq!(notification["method"], "notifications/tools/list_changed");
    assert_eq!(list_tool_names(&mut handle, 4).await, vec!["beta"]);
}

#[tokio::test]
async fn test_failed_mutations_broadcast_nothing() {
    let server = tools_server(true);
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    server.add_tool(echo_spec("alpha")).await.unwrap();
    let notification = recv(&mut handle).await;
    assert_eq!(notification["method"], "notifications/tools/list_changed");

    // Duplicate add and missing remove both fail and must stay silent; the
    // very next outbound message is the list response, not a notification.
    server.add_tool(echo_spec("alpha")).await.unwrap_err();
    server.remove_tool("ghost").await.unwrap_err();
    assert_eq!(list_tool_names(&mut handle, 2).await, vec!["alpha"]);
}

#[tokio::test]
async fn test_no_broadcast_when_list_changed_disabled() {
    let server = tools_server(false);
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    server.add_tool(echo_spec("alpha")).await.unwrap();
    // The mutation succeeded and produced zero notifications: the next
    // message on the wire is the list response.
    assert_eq!(list_tool_names(&mut handle, 2).await, vec!["alpha"]);
}

#[tokio::test]
async fn test_registered_tool_is_callable() {
    let server = tools_server(false);
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    server.add_tool(echo_spec("echo")).await.unwrap();
    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 2,
            "params": { "name": "echo", "arguments": {} }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["result"]["content"][0]["text"], "ran echo");
    assert_eq!(response["result"]["isError"], false);
}

#[tokio::test]
async fn test_resource_listing_partition_and_template_read() {
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            resources: Some(ResourcesCapability::default()),
            ..Default::default()
        })
        .resource(resource_spec("memo://status", "status"))
        .resource(resource_spec("items/{id}", "item"))
        .build()
        .unwrap();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "resources/list", "id": 2}))
        .unwrap();
    let response = recv(&mut handle).await;
    let resources = response["result"]["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["uri"], "memo://status");

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "resources/templates/list",
            "id": 3
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    let templates = response["result"]["resourceTemplates"].as_array().unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0]["uriTemplate"], "items/{id}");

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 4,
            "params": { "uri": "items/42" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["result"]["contents"][0]["uri"], "items/42");

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 5,
            "params": { "uri": "other/42" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["error"]["code"], -32602);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("other/42"));
}

#[tokio::test]
async fn test_subscription_gets_resource_updated_notifications() {
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: None,
            }),
            ..Default::default()
        })
        .resource(resource_spec("memo://status", "status"))
        .build()
        .unwrap();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    // Updates before any subscription go nowhere.
    server.notify_resource_updated("memo://status").await.unwrap();

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "resources/subscribe",
            "id": 2,
            "params": { "uri": "memo://status" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 2);

    server.notify_resource_updated("memo://status").await.unwrap();
    let notification = recv(&mut handle).await;
    assert_eq!(notification["method"], "notifications/resources/updated");
    assert_eq!(notification["params"]["uri"], "memo://status");

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "resources/unsubscribe",
            "id": 3,
            "params": { "uri": "memo://status" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 3);

    // After unsubscribing, updates are silent again; verify with a ping.
    server.notify_resource_updated("memo://status").await.unwrap();
    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 4}))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 4);
}

#[tokio::test]
async fn test_prompt_get_and_completion_flow() {
    let prompt = PromptSpec::new(
        Prompt {
            name: "greet".to_string(),
            title: None,
            description: Some("Greets someone".to_string()),
            arguments: Some(vec![PromptArgument {
                name: "who".to_string(),
                description: None,
                required: Some(true),
            }]),
        },
        prompt_handler_fn(|_e, params| async move {
            let who = params
                .arguments
                .as_ref()
                .and_then(|args| args.get("who").cloned())
                .unwrap_or_default();
            Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: Content::text(format!("Say hello to {who}")),
                }],
            })
        }),
    )
    .unwrap();
    let completion = CompletionSpec::new(
        CompletionReference::Prompt {
            name: "greet".to_string(),
        },
        completion_handler_fn(|_e, params| async move {
            let values = ["world", "wombat"]
                .iter()
                .filter(|v| v.starts_with(&params.argument.value))
                .map(|v| v.to_string())
                .collect();
            Ok(CompleteResult {
                completion: CompleteCompletion {
                    values,
                    total: None,
                    has_more: Some(false),
                },
            })
        }),
    );
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            prompts: Some(PromptsCapability::default()),
            completions: Some(serde_json::json!({})),
            ..Default::default()
        })
        .prompt(prompt)
        .completion(completion)
        .build()
        .unwrap();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "prompts/list", "id": 2}))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["result"]["prompts"][0]["name"], "greet");

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "prompts/get",
            "id": 3,
            "params": { "name": "greet", "arguments": { "who": "world" } }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(
        response["result"]["messages"][0]["content"]["text"],
        "Say hello to world"
    );

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "completion/complete",
            "id": 4,
            "params": {
                "ref": { "type": "ref/prompt", "name": "greet" },
                "argument": { "name": "who", "value": "wo" }
            }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(
        response["result"]["completion"]["values"],
        serde_json::json!(["world", "wombat"])
    );

    // Completing an argument the prompt does not declare fails before the
    // handler runs.
    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "completion/complete",
            "id": 5,
            "params": {
                "ref": { "type": "ref/prompt", "name": "greet" },
                "argument": { "name": "when", "value": "" }
            }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["error"]["code"], -32602);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("does not declare argument"));
}

#[tokio::test]
async fn test_invalid_structured_output_becomes_error_result() {
    let mut bad_tool = tool("broken");
    bad_tool.output_schema = Some(serde_json::json!({
        "type": "object",
        "properties": { "id": { "type": "integer" } },
        "required": ["id"]
    }));
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        })
        .tool(
            ToolSpec::new(
                bad_tool,
                handler_fn(|_e, _p| async {
                    Ok(CallToolResult {
                        content: vec![],
                        is_error: None,
                        structured_content: Some(serde_json::json!({"id": "not-an-integer"})),
                        meta: None,
                    })
                }),
            )
            .unwrap(),
        )
        .build()
        .unwrap();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 2,
            "params": { "name": "broken" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    // Never silently invalid: the result is flagged as an error.
    assert_eq!(response["result"]["isError"], true);
}

#[tokio::test]
async fn test_list_changed_broadcast_reaches_every_session() {
    let server = tools_server(true);
    let mut first = connect(&server).await;
    let mut second = connect(&server).await;
    initialize(&mut first).await;
    initialize(&mut second).await;

    server.add_tool(echo_spec("shared")).await.unwrap();

    let notification = recv(&mut first).await;
    assert_eq!(notification["method"], "notifications/tools/list_changed");
    let notification = recv(&mut second).await;
    assert_eq!(notification["method"], "notifications/tools/list_changed");
}
