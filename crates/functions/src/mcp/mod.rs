//! Bridges between the tool registry and the Model Context Protocol.
//!
//! Two directions are supported. [`with_gram`] wraps an existing
//! [`McpServer`] so its tools and resources are served through the same
//! named-call contract as native registry tools. [`from_gram`] goes the other
//! way and serves a [`Gram`] registry to MCP clients.

pub mod protocol;
pub mod transport;

#[cfg(test)]
mod adapter_tests;

use std::sync::Arc;

use base64::Engine as _;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::manifest::{
    Manifest, ManifestResource, ManifestTool, ManifestVariables, MANIFEST_VERSION,
};
use crate::registry::{CallError, CallOptions, Gram, ToolCallRequest};
use crate::response::Response;

use protocol::{
    CallToolParams, CallToolResult, ClientInfo, Content, ErrorCode, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpProtocolVersion, McpResource, McpTool,
    ServerInfo,
};
use transport::{serve, McpClient, Transport};

pub use transport::{McpError, McpServer};

const PASSTHROUGH_KIND: &str = "mcp-passthrough";

/// Options for [`with_gram`].
#[derive(Debug, Clone, Default)]
pub struct WithGramOptions {
    /// Environment variables to declare on every wrapped tool and resource.
    /// The wrapped server reads its own process environment; this only
    /// records the requirement in the manifest.
    pub variables: ManifestVariables,
}

/// A named tool call routed to a wrapped MCP server.
#[derive(Debug, Clone)]
pub struct McpToolCall {
    pub name: String,
    pub input: Value,
    pub meta: Option<Value>,
}

/// A resource read routed to a wrapped MCP server.
#[derive(Debug, Clone)]
pub struct McpResourceCall {
    pub uri: String,
    pub meta: Option<Value>,
}

/// Wrap an MCP server so its capabilities are exposed through the registry
/// contract.
///
/// The server's tool and resource lists are snapshotted once, here. A server
/// that does not implement `resources/list` (method not found) is treated as
/// having no resources; any other listing failure rejects the wrap. Servers
/// whose capability lists change after startup will serve stale manifests.
pub async fn with_gram<S: McpServer>(
    server: S,
    options: WithGramOptions,
) -> Result<WrappedMcpServer, McpError> {
    let (client_end, server_end) = Transport::linked_pair();
    let server_task = serve(Arc::new(server), server_end);
    let client = McpClient::connect(client_end);

    client
        .initialize(ClientInfo {
            name: "gram-functions-mcp".to_string(),
            version: "0.0.0".to_string(),
        })
        .await?;

    let tools = match client.list_tools().await {
        Ok(listing) => listing.tools,
        Err(err) if err.is_method_not_found() => {
            warn!("server does not implement tools/list, assuming none");
            Vec::new()
        }
        Err(err) => return Err(err),
    };
    let resources = match client.list_resources().await {
        Ok(listing) => listing.resources,
        Err(err) if err.is_method_not_found() => {
            warn!("server does not implement resources/list, assuming none");
            Vec::new()
        }
        Err(err) => return Err(err),
    };

    Ok(WrappedMcpServer {
        client,
        tools,
        resources,
        variables: options.variables,
        _server_task: AbortOnDrop(server_task),
    })
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// An MCP server adapted to the registry contract. Produced by [`with_gram`].
pub struct WrappedMcpServer {
    client: McpClient,
    tools: Vec<McpTool>,
    resources: Vec<McpResource>,
    variables: ManifestVariables,
    _server_task: AbortOnDrop,
}

impl WrappedMcpServer {
    /// Names of the snapshotted tools.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Forward a tool call to the wrapped server.
    ///
    /// The raw `tools/call` result is returned verbatim as the JSON body;
    /// the content type carries an `mcp=tools_call` parameter so the
    /// platform knows to interpret it as an MCP result rather than plain
    /// tool output.
    pub async fn handle_tool_call(&self, call: McpToolCall) -> Result<Response, McpError> {
        let result = self
            .client
            .call_tool(&call.name, Some(call.input), call.meta)
            .await?;
        Ok(Response::new(200)
            .with_header("Content-Type", "application/json; mcp=tools_call")
            .with_body(serde_json::to_vec(&result)?))
    }

    /// Forward a resource read to the wrapped server.
    pub async fn handle_resources(&self, call: McpResourceCall) -> Result<Response, McpError> {
        let result = self.client.read_resource(&call.uri, call.meta).await?;
        Ok(Response::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(serde_json::to_vec(&result)?))
    }

    /// The manifest for the snapshotted capabilities.
    ///
    /// Unlike native registries, `resources` is always present, even when
    /// empty, and every entry is tagged as a passthrough in its meta.
    pub fn manifest(&self) -> Manifest {
        let variables = if self.variables.is_empty() {
            None
        } else {
            Some(self.variables.clone())
        };

        let tools = self
            .tools
            .iter()
            .map(|tool| ManifestTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
                annotations: tool
                    .annotations
                    .clone()
                    .and_then(|a| serde_json::from_value(a).ok()),
                variables: variables.clone(),
                meta: Some(passthrough_meta(tool.meta.as_ref())),
            })
            .collect();

        let resources = self
            .resources
            .iter()
            .map(|resource| ManifestResource {
                name: resource.name.clone(),
                title: resource.title.clone(),
                description: resource.description.clone(),
                uri: resource.uri.clone(),
                mime_type: resource.mime_type.clone(),
                variables: variables.clone(),
                meta: Some(passthrough_meta(resource.meta.as_ref())),
            })
            .collect();

        Manifest {
            version: MANIFEST_VERSION.to_string(),
            tools: Some(tools),
            resources: Some(resources),
        }
    }
}

fn passthrough_meta(existing: Option<&Value>) -> Value {
    let mut meta = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    meta.insert(
        "gram.ai/kind".to_string(),
        Value::String(PASSTHROUGH_KIND.to_string()),
    );
    Value::Object(meta)
}

/// Serve a [`Gram`] registry to MCP clients.
///
/// The returned server answers `initialize`, `tools/list` and `tools/call`;
/// registry tools carry no resources. Tool responses are mapped into MCP
/// content blocks by content type.
pub fn from_gram(gram: Gram, info: ServerInfo) -> GramMcpServer {
    GramMcpServer {
        gram: Arc::new(gram),
        info,
    }
}

/// MCP-facing view of a registry. Produced by [`from_gram`].
pub struct GramMcpServer {
    gram: Arc<Gram>,
    info: ServerInfo,
}

#[async_trait::async_trait]
impl McpServer for GramMcpServer {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: McpProtocolVersion::V1,
                    capabilities: json!({"tools": {}}),
                    server_info: self.info.clone(),
                };
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(err) => JsonRpcResponse::error(
                        request.id,
                        ErrorCode::INTERNAL_ERROR,
                        err.to_string(),
                    ),
                }
            }
            "tools/list" => {
                let tools = self
                    .gram
                    .manifest()
                    .tools
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tool| McpTool {
                        name: tool.name,
                        description: tool.description,
                        input_schema: tool.input_schema,
                        annotations: tool
                            .annotations
                            .and_then(|a| serde_json::to_value(a).ok()),
                        meta: tool.meta,
                    })
                    .collect();
                match serde_json::to_value(ListToolsResult { tools }) {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(err) => JsonRpcResponse::error(
                        request.id,
                        ErrorCode::INTERNAL_ERROR,
                        err.to_string(),
                    ),
                }
            }
            "tools/call" => self.call_tool(request).await,
            other => JsonRpcResponse::error(
                request.id,
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }
}

impl GramMcpServer {
    async fn call_tool(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: CallToolParams = match request
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) => {
                return JsonRpcResponse::error(
                    request.id,
                    ErrorCode::INVALID_PARAMS,
                    "missing params",
                )
            }
            Err(err) => {
                return JsonRpcResponse::error(
                    request.id,
                    ErrorCode::INVALID_PARAMS,
                    err.to_string(),
                )
            }
        };

        let input = params.arguments.unwrap_or_else(|| json!({}));
        let outcome = self
            .gram
            .handle_tool_call(
                ToolCallRequest {
                    name: params.name.clone(),
                    input,
                },
                CallOptions::default(),
            )
            .await;

        let result = match outcome {
            Ok(response) => response_to_call_result(&response),
            Err(CallError::ToolNotFound(name)) => {
                return JsonRpcResponse::error(
                    request.id,
                    ErrorCode::INVALID_REQUEST,
                    format!("Tool '{name}' not found"),
                )
            }
            // Failure responses become in-band tool errors, matching how
            // MCP clients expect handler failures to surface.
            Err(CallError::Failure(response)) => CallToolResult {
                content: vec![Content::Text {
                    text: response.body_text(),
                }],
                is_error: Some(true),
            },
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(err) => {
                JsonRpcResponse::error(request.id, ErrorCode::INTERNAL_ERROR, err.to_string())
            }
        }
    }
}

fn response_to_call_result(response: &Response) -> CallToolResult {
    let content_type = response.content_type().unwrap_or("");

    if is_textual(content_type) {
        return CallToolResult {
            content: vec![Content::Text {
                text: response.body_text(),
            }],
            is_error: None,
        };
    }

    let engine = base64::engine::general_purpose::STANDARD;
    if content_type.starts_with("image/") {
        return CallToolResult {
            content: vec![Content::Image {
                data: engine.encode(response.body()),
                mime_type: content_type.to_string(),
            }],
            is_error: None,
        };
    }
    if content_type.starts_with("audio/") {
        return CallToolResult {
            content: vec![Content::Audio {
                data: engine.encode(response.body()),
                mime_type: content_type.to_string(),
            }],
            is_error: None,
        };
    }

    CallToolResult {
        content: vec![Content::Text {
            text: format!("Unhandled content type: {content_type}"),
        }],
        is_error: Some(true),
    }
}

/// Text content is anything under `text/`, plus structured formats whose
/// type tokens mark them as readable (`application/json`,
/// `application/problem+json`, `image/svg+xml` and so on).
fn is_textual(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if essence.starts_with("text/") {
        return true;
    }
    essence
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| {
            matches!(token, "json" | "yaml" | "yml" | "toml" | "xml" | "xhtml")
        })
}
