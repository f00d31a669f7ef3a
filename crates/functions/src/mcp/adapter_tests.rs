use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::manifest::VariableInfo;
use crate::registry::{Gram, ToolDefinition};
use crate::schema::{Field, Shape};

use super::protocol::{
    ErrorCode, JsonRpcRequest, JsonRpcResponse, ServerInfo,
};
use super::transport::McpServer;
use super::{from_gram, with_gram, McpResourceCall, McpToolCall, WithGramOptions};

/// A minimal MCP server scripted for the tests. Records every `tools/call`
/// params payload it sees.
struct FakeServer {
    with_resources: bool,
    fail_resource_listing: bool,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl FakeServer {
    fn new() -> Self {
        Self {
            with_resources: false,
            fail_resource_listing: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl McpServer for FakeServer {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "serverInfo": {"name": "fake", "version": "1.0.0"},
                }),
            ),
            "tools/list" => JsonRpcResponse::success(
                request.id,
                json!({
                    "tools": [{
                        "name": "lookup",
                        "description": "Looks things up",
                        "inputSchema": {"type": "object", "properties": {}},
                        "annotations": {"title": "Lookup", "readOnlyHint": true},
                        "_meta": {"fake/origin": "scripted"},
                    }],
                }),
            ),
            "resources/list" if self.fail_resource_listing => JsonRpcResponse::error(
                request.id,
                ErrorCode::INTERNAL_ERROR,
                "listing exploded",
            ),
            "resources/list" if self.with_resources => JsonRpcResponse::success(
                request.id,
                json!({
                    "resources": [{
                        "name": "docs",
                        "uri": "fake://docs",
                        "mimeType": "text/markdown",
                    }],
                }),
            ),
            "resources/list" => JsonRpcResponse::error(
                request.id,
                ErrorCode::METHOD_NOT_FOUND,
                "Method not found: resources/list",
            ),
            "tools/call" => {
                if let (Ok(mut calls), Some(params)) = (self.calls.lock(), request.params) {
                    calls.push(params);
                }
                JsonRpcResponse::success(
                    request.id,
                    json!({"content": [{"type": "text", "text": "looked up"}]}),
                )
            }
            "resources/read" => JsonRpcResponse::success(
                request.id,
                json!({"contents": [{"uri": "fake://docs", "text": "# Docs"}]}),
            ),
            other => JsonRpcResponse::error(
                request.id,
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }
}

#[tokio::test]
async fn wrapped_manifest_tags_entries_as_passthrough() {
    let wrapped = with_gram(FakeServer::new(), WithGramOptions::default())
        .await
        .unwrap();

    let manifest = wrapped.manifest();
    assert_eq!(manifest.version, "0.0.0");

    let tools = manifest.tools.as_ref().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");
    let meta = tools[0].meta.as_ref().unwrap();
    assert_eq!(meta["gram.ai/kind"], "mcp-passthrough");
    // Existing meta keys from the server survive the tagging.
    assert_eq!(meta["fake/origin"], "scripted");
}

#[tokio::test]
async fn wrapped_manifest_preserves_server_annotations() {
    let wrapped = with_gram(FakeServer::new(), WithGramOptions::default())
        .await
        .unwrap();

    let manifest = wrapped.manifest();
    let annotations = manifest.tools.as_ref().unwrap()[0]
        .annotations
        .as_ref()
        .unwrap();
    assert_eq!(annotations.title.as_deref(), Some("Lookup"));
    assert_eq!(annotations.read_only_hint, Some(true));
}

#[tokio::test]
async fn wrapped_manifest_applies_declared_variables() {
    let mut options = WithGramOptions::default();
    options.variables.insert(
        "UPSTREAM_KEY".to_string(),
        VariableInfo {
            description: Some("Key for the upstream service".to_string()),
        },
    );

    let wrapped = with_gram(FakeServer::new(), options).await.unwrap();
    let manifest = wrapped.manifest();
    let vars = manifest.tools.as_ref().unwrap()[0].variables.as_ref().unwrap();
    assert!(vars.contains_key("UPSTREAM_KEY"));
}

#[tokio::test]
async fn missing_resource_listing_means_empty_resources() {
    let wrapped = with_gram(FakeServer::new(), WithGramOptions::default())
        .await
        .unwrap();

    let manifest = wrapped.manifest();
    // resources is present but empty for a tools-only server.
    assert_eq!(manifest.resources, Some(vec![]));
}

/// A server that only answers `initialize`, like a minimal or outdated peer.
struct BareServer;

#[async_trait]
impl McpServer for BareServer {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "serverInfo": {"name": "bare", "version": "1.0.0"},
                }),
            ),
            other => JsonRpcResponse::error(
                request.id,
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }
}

#[tokio::test]
async fn missing_listings_mean_empty_capabilities() {
    let wrapped = with_gram(BareServer, WithGramOptions::default())
        .await
        .unwrap();

    let manifest = wrapped.manifest();
    assert_eq!(manifest.tools, Some(vec![]));
    assert_eq!(manifest.resources, Some(vec![]));
}

#[tokio::test]
async fn failing_resource_listing_rejects_the_wrap() {
    let server = FakeServer {
        fail_resource_listing: true,
        ..FakeServer::new()
    };

    let Err(err) = with_gram(server, WithGramOptions::default()).await else {
        panic!("expected the wrap to be rejected");
    };
    assert!(err.to_string().contains("listing exploded"));
}

#[tokio::test]
async fn resource_listing_is_snapshotted() {
    let server = FakeServer {
        with_resources: true,
        ..FakeServer::new()
    };

    let wrapped = with_gram(server, WithGramOptions::default()).await.unwrap();
    let manifest = wrapped.manifest();
    let resources = manifest.resources.as_ref().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uri, "fake://docs");
    assert_eq!(
        resources[0].meta.as_ref().unwrap()["gram.ai/kind"],
        "mcp-passthrough"
    );
}

#[tokio::test]
async fn tool_calls_pass_through_with_marker_content_type() {
    let server = FakeServer::new();
    let calls = Arc::clone(&server.calls);
    let wrapped = with_gram(server, WithGramOptions::default()).await.unwrap();

    let response = wrapped
        .handle_tool_call(McpToolCall {
            name: "lookup".to_string(),
            input: json!({"q": "rust"}),
            meta: Some(json!({"trace": "abc"})),
        })
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.content_type(),
        Some("application/json; mcp=tools_call")
    );
    let body: Value = response.json_body().unwrap();
    assert_eq!(body["content"][0]["text"], "looked up");

    let seen = calls.lock().unwrap();
    assert_eq!(seen[0]["name"], "lookup");
    assert_eq!(seen[0]["arguments"], json!({"q": "rust"}));
    assert_eq!(seen[0]["_meta"], json!({"trace": "abc"}));
}

#[tokio::test]
async fn resource_reads_pass_through() {
    let server = FakeServer {
        with_resources: true,
        ..FakeServer::new()
    };
    let wrapped = with_gram(server, WithGramOptions::default()).await.unwrap();

    let response = wrapped
        .handle_resources(McpResourceCall {
            uri: "fake://docs".to_string(),
            meta: None,
        })
        .await
        .unwrap();

    assert_eq!(response.content_type(), Some("application/json"));
    let body: Value = response.json_body().unwrap();
    assert_eq!(body["contents"][0]["text"], "# Docs");
}

fn registry() -> Gram {
    Gram::new()
        .tool(
            ToolDefinition::builder("shout")
                .description("Uppercases the input")
                .input(Shape::new().field("text", Field::string()))
                .execute(|ctx, input| async move {
                    let text = input["text"].as_str().unwrap_or_default();
                    Ok(ctx.text(text.to_uppercase()))
                }),
        )
        .tool(
            ToolDefinition::builder("picture")
                .execute(|_, _| async move {
                    Ok(crate::response::Response::new(200)
                        .with_header("Content-Type", "image/png")
                        .with_body(vec![0x89, 0x50, 0x4e, 0x47]))
                }),
        )
        .tool(
            ToolDefinition::builder("binary")
                .execute(|_, _| async move {
                    Ok(crate::response::Response::new(200)
                        .with_header("Content-Type", "application/octet-stream")
                        .with_body(vec![0, 1, 2]))
                }),
        )
}

fn server_info() -> ServerInfo {
    ServerInfo {
        name: "registry-under-test".to_string(),
        version: "0.0.0".to_string(),
    }
}

#[tokio::test]
async fn from_gram_lists_registry_tools() {
    let server = from_gram(registry(), server_info());

    let response = server
        .handle(JsonRpcRequest::new(1, "tools/list", None))
        .await;
    let result = response.result.unwrap();
    let tools = result["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 3);
    assert_eq!(tools[0]["name"], "shout");
    assert_eq!(tools[0]["inputSchema"]["required"], json!(["text"]));
}

#[tokio::test]
async fn from_gram_maps_text_responses_to_text_content() {
    let server = from_gram(registry(), server_info());

    let response = server
        .handle(JsonRpcRequest::new(
            2,
            "tools/call",
            Some(json!({"name": "shout", "arguments": {"text": "hello"}})),
        ))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["content"][0]["text"], "HELLO");
    assert!(result.get("isError").is_none());
}

#[tokio::test]
async fn from_gram_encodes_image_responses_as_base64() {
    use base64::Engine as _;

    let server = from_gram(registry(), server_info());
    let response = server
        .handle(JsonRpcRequest::new(
            3,
            "tools/call",
            Some(json!({"name": "picture", "arguments": {}})),
        ))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["content"][0]["type"], "image");
    assert_eq!(result["content"][0]["mimeType"], "image/png");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(result["content"][0]["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, vec![0x89, 0x50, 0x4e, 0x47]);
}

#[tokio::test]
async fn from_gram_flags_unhandled_content_types() {
    let server = from_gram(registry(), server_info());
    let response = server
        .handle(JsonRpcRequest::new(
            4,
            "tools/call",
            Some(json!({"name": "binary", "arguments": {}})),
        ))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("application/octet-stream"));
}

#[tokio::test]
async fn from_gram_reports_unknown_tools_as_invalid_requests() {
    let server = from_gram(registry(), server_info());
    let response = server
        .handle(JsonRpcRequest::new(
            5,
            "tools/call",
            Some(json!({"name": "nope", "arguments": {}})),
        ))
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::INVALID_REQUEST);
    assert!(error.message.contains("nope"));
}

#[tokio::test]
async fn from_gram_surfaces_handler_failures_in_band() {
    let gram = Gram::new().tool(
        ToolDefinition::builder("fragile")
            .execute(|ctx, _| async move { Err(ctx.fail(json!({"error": "snapped"}))) }),
    );
    let server = from_gram(gram, server_info());

    let response = server
        .handle(JsonRpcRequest::new(
            6,
            "tools/call",
            Some(json!({"name": "fragile", "arguments": {}})),
        ))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    let text: Value =
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(text["error"], "snapped");
}

#[tokio::test]
async fn registry_round_trips_through_both_adapters() {
    let wrapped = with_gram(
        from_gram(registry(), server_info()),
        WithGramOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        wrapped.tool_names(),
        vec!["shout", "picture", "binary"]
    );

    let response = wrapped
        .handle_tool_call(McpToolCall {
            name: "shout".to_string(),
            input: json!({"text": "round trip"}),
            meta: None,
        })
        .await
        .unwrap();

    let body: Value = response.json_body().unwrap();
    assert_eq!(body["content"][0]["text"], "ROUND TRIP");
}
