//! In-process MCP plumbing: a linked transport pair, the server trait and a
//! small request/response-correlating client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use super::protocol::{
    CallToolParams, CallToolResult, ClientInfo, ErrorCode, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListResourcesResult, ListToolsResult, McpProtocolVersion,
    ReadResourceParams,
};

/// Failures from the client side of an MCP conversation.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("rpc error {}: {}", .code.0, .message)]
    Rpc { code: ErrorCode, message: String },
    #[error("transport closed")]
    TransportClosed,
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl McpError {
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == ErrorCode::METHOD_NOT_FOUND)
    }
}

#[derive(Debug)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

/// One end of a bidirectional in-process message channel.
pub struct Transport {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

impl Transport {
    /// Two transports wired back to back: what one sends, the other
    /// receives.
    pub fn linked_pair() -> (Transport, Transport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Transport { tx: a_tx, rx: a_rx },
            Transport { tx: b_tx, rx: b_rx },
        )
    }
}

/// A server that answers MCP requests one at a time.
#[async_trait]
pub trait McpServer: Send + Sync + 'static {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse;
}

/// Pump requests from `transport` into `server` until the peer hangs up.
pub fn serve(server: Arc<dyn McpServer>, mut transport: Transport) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = transport.rx.recv().await {
            match message {
                JsonRpcMessage::Request(request) => {
                    let response = server.handle(request).await;
                    if transport.tx.send(JsonRpcMessage::Response(response)).is_err() {
                        break;
                    }
                }
                JsonRpcMessage::Response(_) => {
                    warn!("server transport received a response message, ignoring");
                }
            }
        }
    })
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// Client half of an MCP conversation, correlating responses by request id.
pub struct McpClient {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    pending: PendingMap,
    next_id: AtomicI64,
    reader: JoinHandle<()>,
}

impl McpClient {
    pub fn connect(transport: Transport) -> Self {
        let Transport { tx, mut rx } = transport;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    match message {
                        JsonRpcMessage::Response(response) => {
                            let waiter = match pending.lock() {
                                Ok(mut map) => map.remove(&response.id),
                                Err(_) => return,
                            };
                            match waiter {
                                // Receiver may be gone if the caller gave up.
                                Some(sender) => {
                                    let _ = sender.send(response);
                                }
                                None => warn!(id = response.id, "unmatched response id"),
                            }
                        }
                        JsonRpcMessage::Request(request) => {
                            warn!(method = %request.method, "client received a request, ignoring");
                        }
                    }
                }
            })
        };

        Self {
            tx,
            pending,
            next_id: AtomicI64::new(1),
            reader,
        }
    }

    /// Send one request and wait for its response, decoding the result.
    pub async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> Result<R, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = match params {
            Some(p) => Some(serde_json::to_value(p)?),
            None => None,
        };
        let request = JsonRpcRequest::new(id, method, params);

        let (sender, receiver) = oneshot::channel();
        {
            let mut map = self.pending.lock().map_err(|_| McpError::TransportClosed)?;
            map.insert(id, sender);
        }

        if self
            .tx
            .send(JsonRpcMessage::Request(request))
            .is_err()
        {
            if let Ok(mut map) = self.pending.lock() {
                map.remove(&id);
            }
            return Err(McpError::TransportClosed);
        }

        let response = receiver.await.map_err(|_| McpError::TransportClosed)?;
        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    pub async fn initialize(&self, client_info: ClientInfo) -> Result<InitializeResult, McpError> {
        self.request(
            "initialize",
            Some(InitializeParams {
                protocol_version: McpProtocolVersion::V1,
                capabilities: serde_json::json!({}),
                client_info,
            }),
        )
        .await
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult, McpError> {
        self.request::<Value, _>("tools/list", None).await
    }

    pub async fn list_resources(&self) -> Result<ListResourcesResult, McpError> {
        self.request::<Value, _>("resources/list", None).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        meta: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        self.request(
            "tools/call",
            Some(CallToolParams {
                name: name.to_string(),
                arguments,
                meta,
            }),
        )
        .await
    }

    pub async fn read_resource(
        &self,
        uri: &str,
        meta: Option<Value>,
    ) -> Result<Value, McpError> {
        self.request(
            "resources/read",
            Some(ReadResourceParams {
                uri: uri.to_string(),
                meta,
            }),
        )
        .await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
