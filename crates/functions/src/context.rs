//! The per-call execution context handed to tool handlers.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::registry::Failure;
use crate::response::Response;

/// Ephemeral context for a single tool call.
///
/// Constructed fresh for every dispatch and dropped when the call returns.
/// It exposes only the environment variables the invoked tool declared —
/// never the full process environment — plus the caller's cancellation
/// signal and response-building helpers.
#[derive(Debug)]
pub struct ToolContext {
    env: BTreeMap<String, String>,
    signal: CancellationToken,
}

impl ToolContext {
    pub(crate) fn new(signal: CancellationToken, env: BTreeMap<String, String>) -> Self {
        Self { env, signal }
    }

    /// The value of a declared environment variable, if it was present in
    /// the environment the owning registry resolves against.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    /// All resolved environment variables for this call.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The cancellation signal for this call. Handlers doing long-running
    /// work should observe it; the framework never kills in-flight handler
    /// code on its own.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// A 200 response with `data` serialized to JSON.
    pub fn json<T: Serialize>(&self, data: &T) -> Response {
        Response::json(data)
    }

    /// A 200 plain-text response.
    pub fn text(&self, data: impl Into<String>) -> Response {
        Response::text(data)
    }

    /// A 200 Markdown response.
    pub fn markdown(&self, data: impl Into<String>) -> Response {
        Response::markdown(data)
    }

    /// A 200 HTML response.
    pub fn html(&self, data: impl Into<String>) -> Response {
        Response::html(data)
    }

    /// Terminate the call with a 500 failure response built from `data`.
    ///
    /// Returns the [`Failure`] for the handler to propagate:
    /// `return Err(ctx.fail(json!({"error": "boom"})))`.
    pub fn fail(&self, data: Value) -> Failure {
        Failure::new(data)
    }

    /// Like [`ToolContext::fail`] with an explicit HTTP status.
    pub fn fail_with_status(&self, data: Value, status: u16) -> Failure {
        Failure::with_status(data, status)
    }
}
