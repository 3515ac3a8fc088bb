//! Session lifecycle integration tests
//!
//! Drives full sessions through the in-process channel transport: the
//! initialize handshake and version negotiation, the initialization gate,
//! inbound dispatch error codes, exchange-driven client interaction, and
//! keep-alive/shutdown behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axon_mcp::server::{handler_fn, McpServer, ToolSpec};
use axon_mcp::types::{
    CallToolResult, Content, CreateMessageParams, Implementation, LoggingLevel,
    LoggingMessageParams, ServerCapabilities, Tool, ToolsCapability, LATEST_PROTOCOL_VERSION,
};

use common::{connect, initialize, initialize_with_capabilities, recv, respond};

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

fn plain_server() -> Arc<McpServer> {
    McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        })
        .build()
        .expect("server build failed")
}

#[tokio::test]
async fn test_initialize_echoes_requested_version() {
    let server = plain_server();
    let mut handle = connect(&server).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "c", "version": "1" }
            }
        }))
        .unwrap();

    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(response["result"]["serverInfo"]["name"], "axon-test");
    // Logging is always advertised, tools were configured.
    assert!(response["result"]["capabilities"]["logging"].is_object());
    assert!(response["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn test_unsupported_version_falls_back_without_rejecting() {
    let server = plain_server();
    let mut handle = connect(&server).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": "1999-12-31",
                "capabilities": {},
                "clientInfo": { "name": "c", "version": "1" }
            }
        }))
        .unwrap();

    let response = recv(&mut handle).await;
    assert!(response.get("error").is_none(), "mismatch must not reject");
    assert_eq!(
        response["result"]["protocolVersion"],
        LATEST_PROTOCOL_VERSION
    );
}

#[tokio::test]
async fn test_ping_succeeds_after_initialized() {
    let server = plain_server();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 2}))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"], serde_json::json!({}));
}

#[tokio::test]
async fn test_requests_queue_until_initialized_notification() {
    let server = plain_server();
    let mut handle = connect(&server).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "c", "version": "1" }
            }
        }))
        .unwrap();
    let init_response = recv(&mut handle).await;
    assert_eq!(init_response["id"], 1);

    // The ping arrives before notifications/initialized: it must wait, not
    // fail.
    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 2}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        handle.outbound_rx.try_recv().is_err(),
        "ping must not be answered before initialization completes"
    );

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"], serde_json::json!({}));
}

#[tokio::test]
async fn test_unknown_method_yields_method_not_found() {
    let server = plain_server();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    handle
        .send_value(serde_json::json!({"jsonrpc": "2.0", "method": "no/such", "id": 9}))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 9);
    assert_eq!(response["error"]["code"], -32601);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("no/such"));
}

#[tokio::test]
async fn test_malformed_json_yields_parse_error() {
    let server = plain_server();
    let mut handle = connect(&server).await;

    handle
        .inbound_tx
        .send("{definitely not json".to_string())
        .unwrap();
    let response = recv(&mut handle).await;
    assert!(response["id"].is_null());
    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn test_unknown_tool_yields_invalid_params_error() {
    let server = plain_server();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 3,
            "params": { "name": "ghost" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 3);
    assert_eq!(response["error"]["code"], -32602);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("ghost"));
}

#[tokio::test]
async fn test_tool_can_sample_through_exchange() {
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        })
        .tool(
            ToolSpec::new(
                tool("summarize"),
                handler_fn(|exchange, _params| async move {
                    let result = exchange
                        .create_message(CreateMessageParams {
                            messages: vec![],
                            model_preferences: None,
                            system_prompt: None,
                            include_context: None,
                            temperature: None,
                            max_tokens: Some(64),
                            stop_sequences: None,
                            metadata: None,
                        })
                        .await?;
                    Ok(CallToolResult::from_text(format!(
                        "sampled from {}",
                        result.model
                    )))
                }),
            )
            .unwrap(),
        )
        .build()
        .unwrap();

    let mut handle = connect(&server).await;
    initialize_with_capabilities(&mut handle, serde_json::json!({"sampling": {}})).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 5,
            "params": { "name": "summarize" }
        }))
        .unwrap();

    // The handler turns around and asks the client to sample.
    let sampling_request = recv(&mut handle).await;
    assert_eq!(sampling_request["method"], "sampling/createMessage");
    respond(
        &handle,
        &sampling_request["id"],
        serde_json::json!({
            "role": "assistant",
            "content": { "type": "text", "text": "summary" },
            "model": "mock-model"
        }),
    );

    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 5);
    assert_eq!(
        response["result"]["content"][0]["text"],
        "sampled from mock-model"
    );
}

#[tokio::test]
async fn test_tool_list_roots_follows_pagination() {
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        })
        .tool(
            ToolSpec::new(
                tool("count_roots"),
                handler_fn(|exchange, _params| async move {
                    let roots = exchange.list_roots().await?;
                    Ok(CallToolResult::from_text(format!("{} roots", roots.len())))
                }),
            )
            .unwrap(),
        )
        .build()
        .unwrap();

    let mut handle = connect(&server).await;
    initialize_with_capabilities(&mut handle, serde_json::json!({"roots": {}})).await;

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 6,
            "params": { "name": "count_roots" }
        }))
        .unwrap();

    let first_page = recv(&mut handle).await;
    assert_eq!(first_page["method"], "roots/list");
    respond(
        &handle,
        &first_page["id"],
        serde_json::json!({
            "roots": [{ "uri": "file:///a" }, { "uri": "file:///b" }],
            "nextCursor": "page-2"
        }),
    );

    let second_page = recv(&mut handle).await;
    assert_eq!(second_page["method"], "roots/list");
    assert_eq!(second_page["params"]["cursor"], "page-2");
    respond(
        &handle,
        &second_page["id"],
        serde_json::json!({ "roots": [{ "uri": "file:///c" }] }),
    );

    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 6);
    assert_eq!(response["result"]["content"][0]["text"], "3 roots");
}

#[tokio::test]
async fn test_set_level_filters_log_notifications() {
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        })
        .tool(
            ToolSpec::new(
                tool("chatty"),
                handler_fn(|exchange, _params| async move {
                    exchange
                        .logging_notification(LoggingMessageParams {
                            level: LoggingLevel::Info,
                            logger: None,
                            data: serde_json::json!("filtered"),
                        })
                        .await?;
                    exchange
                        .logging_notification(LoggingMessageParams {
                            level: LoggingLevel::Error,
                            logger: None,
                            data: serde_json::json!("delivered"),
                        })
                        .await?;
                    Ok(CallToolResult::from_text("done"))
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
            "method": "logging/setLevel",
            "id": 2,
            "params": { "level": "warning" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"], serde_json::json!({}));

    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 3,
            "params": { "name": "chatty" }
        }))
        .unwrap();

    // Only the error-level message passes the filter; then comes the call
    // response.
    let notification = recv(&mut handle).await;
    assert_eq!(notification["method"], "notifications/message");
    assert_eq!(notification["params"]["level"], "error");
    assert_eq!(notification["params"]["data"], "delivered");

    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 3);
    assert_eq!(response["result"]["content"][0]["text"], "done");
}

#[tokio::test]
async fn test_keep_alive_pings_connected_sessions() {
    let server = McpServer::builder()
        .server_info(Implementation::new("axon-test", "0.2.0"))
        .keep_alive_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut handle = connect(&server).await;
    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "c", "version": "1" }
            }
        }))
        .unwrap();
    handle
        .send_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();

    // Keep-alive pings interleave freely with the handshake response;
    // answer two of them to show the scheduler keeps going.
    let mut pings_answered = 0;
    while pings_answered < 2 {
        let message = recv(&mut handle).await;
        if message["method"] == "ping" {
            assert!(message["id"].is_string());
            respond(&handle, &message["id"], serde_json::json!({}));
            pings_answered += 1;
        } else {
            assert_eq!(message["id"], 1, "unexpected message: {message}");
        }
    }
}

#[tokio::test]
async fn test_graceful_shutdown_fails_pending_requests() {
    let server = plain_server();
    let mut handle = connect(&server).await;
    initialize(&mut handle).await;

    let session = Arc::clone(&handle.session);
    let requester = tokio::spawn(async move {
        session
            .send_request::<serde_json::Value>("roots/list", None)
            .await
    });

    let request = recv(&mut handle).await;
    assert_eq!(request["method"], "roots/list");

    server.close_gracefully().await.unwrap();

    let err = requester.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("closed"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_structured_tool_result_reaches_wire_with_text() {
    let mut output_tool = tool("lookup");
    output_tool.output_schema = Some(serde_json::json!({
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
                output_tool,
                handler_fn(|_exchange, _params| async move {
                    Ok(CallToolResult {
                        content: vec![],
                        is_error: None,
                        structured_content: Some(serde_json::json!({"id": 7})),
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
            "id": 4,
            "params": { "name": "lookup" }
        }))
        .unwrap();
    let response = recv(&mut handle).await;
    assert_eq!(response["id"], 4);
    assert_eq!(response["result"]["structuredContent"]["id"], 7);
    // A text rendering is synthesized for text-only clients.
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed, serde_json::json!({"id": 7}));

    // Sanity-check the typed shape too.
    let typed: CallToolResult =
        serde_json::from_value(response["result"].clone()).unwrap();
    assert!(matches!(typed.content[0], Content::Text { .. }));
}
