//! The tool registry: registration, dispatch and manifest derivation.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ToolContext;
use crate::manifest::{
    Manifest, ManifestTool, ManifestVariables, ToolAnnotations, VariableInfo, MANIFEST_VERSION,
};
use crate::response::Response;
use crate::schema::Shape;

type Handler =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Response, Failure>> + Send + Sync>;

/// Options for constructing a [`Gram`] registry.
#[derive(Debug, Clone, Default)]
pub struct GramOptions {
    /// When true, input that fails schema validation is passed through to
    /// the handler unvalidated as long as it is a plain object. A
    /// compatibility escape hatch for schema drift; off by default.
    pub lax: bool,
    /// A fixed environment snapshot resolved against instead of the live
    /// process environment. Useful for testing and local development.
    pub env: Option<BTreeMap<String, String>>,
}

/// A registry of named tools.
///
/// Built once at startup with chained [`Gram::tool`] calls, then read by the
/// platform through [`Gram::handle_tool_call`] and [`Gram::manifest`]. The
/// registry holds no per-call state: concurrent dispatches only share the
/// read-only tool map.
pub struct Gram {
    tools: Vec<ToolConfig>,
    lax: bool,
    env: Option<Arc<BTreeMap<String, String>>>,
}

struct ToolConfig {
    name: String,
    description: Option<String>,
    input_schema: Shape,
    annotations: Option<ToolAnnotations>,
    variables: ManifestVariables,
    handler: Handler,
    // Captured from the owning instance at registration time, so tools
    // merged in via `extend` keep resolving against the environment and
    // validation mode of the registry that declared them.
    lax: bool,
    env: Option<Arc<BTreeMap<String, String>>>,
}

impl Default for Gram {
    fn default() -> Self {
        Self::new()
    }
}

impl Gram {
    pub fn new() -> Self {
        Self::with_options(GramOptions::default())
    }

    pub fn with_options(options: GramOptions) -> Self {
        Self {
            tools: Vec::new(),
            lax: options.lax,
            env: options.env.map(Arc::new),
        }
    }

    /// Register a tool, returning the registry for chaining.
    ///
    /// Registering a second tool under an existing name silently replaces
    /// the earlier definition; the entry keeps its original position so
    /// manifest order stays stable.
    #[must_use]
    pub fn tool(mut self, definition: ToolDefinition) -> Self {
        let config = ToolConfig {
            name: definition.name,
            description: definition.description,
            input_schema: definition.input_schema,
            annotations: definition.annotations,
            variables: definition.variables,
            handler: definition.handler,
            lax: self.lax,
            env: self.env.clone(),
        };
        self.insert(config);
        self
    }

    fn insert(&mut self, config: ToolConfig) {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name == config.name) {
            debug!(name = %config.name, "replacing existing tool registration");
            *slot = config;
        } else {
            self.tools.push(config);
        }
    }

    /// Merge every tool from `other` into this registry and return it.
    ///
    /// Name collisions favor `other`'s definition, the same last-write-wins
    /// rule as direct re-registration. Merged tools keep resolving their
    /// declared variables against the environment snapshot their original
    /// registry held; `other`'s fixed environment entries are folded into
    /// this registry's snapshot for tools registered from here on. This
    /// registry's own `lax` flag is unaffected.
    #[must_use]
    pub fn extend(mut self, other: Gram) -> Self {
        if let Some(other_env) = other.env {
            let mut merged = self.env.as_deref().cloned().unwrap_or_default();
            merged.extend(other_env.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.env = Some(Arc::new(merged));
        }
        for tool in other.tools {
            self.insert(tool);
        }
        self
    }

    /// The names of all registered tools, in registration order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Dispatch a tool call by name.
    ///
    /// Unknown names fail with [`CallError::ToolNotFound`]. Input failing
    /// schema validation short-circuits with a 400 failure response (unless
    /// the owning registry was lax and the raw input is an object, in which
    /// case the raw input is passed through). The handler's response is
    /// returned unchanged.
    pub async fn handle_tool_call(
        &self,
        request: ToolCallRequest,
        options: CallOptions,
    ) -> Result<Response, CallError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == request.name)
            .ok_or_else(|| CallError::ToolNotFound(request.name.clone()))?;

        let signal = options.signal.unwrap_or_default();
        let ctx = ToolContext::new(signal, tool.resolve_env());

        let input = match tool.input_schema.validate(&request.input) {
            Ok(validated) => validated,
            Err(_) if tool.lax && request.input.is_object() => request.input,
            Err(err) => {
                let failure = Failure::with_status(
                    serde_json::json!({
                        "error": err.message,
                        "issues": err.issues,
                    }),
                    400,
                );
                return Err(CallError::Failure(failure.into_response()));
            }
        };

        (tool.handler)(ctx, input)
            .await
            .map_err(|failure| CallError::Failure(failure.into_response()))
    }

    /// Derive the manifest from current registry state.
    ///
    /// Recomputed on every call; tools appear in registration order and a
    /// tool's `variables` key is present only when it declared at least one
    /// variable.
    pub fn manifest(&self) -> Manifest {
        let tools = self
            .tools
            .iter()
            .map(|tool| ManifestTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.to_json_schema(),
                annotations: tool.annotations.clone(),
                variables: if tool.variables.is_empty() {
                    None
                } else {
                    Some(tool.variables.clone())
                },
                meta: None,
            })
            .collect();

        Manifest {
            version: MANIFEST_VERSION.to_string(),
            tools: Some(tools),
            resources: None,
        }
    }
}

impl ToolConfig {
    /// Build the least-privilege environment for one call: the declared
    /// variable names intersected with the fixed snapshot, or with the live
    /// process environment when no snapshot was supplied.
    fn resolve_env(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        match &self.env {
            Some(fixed) => {
                for name in self.variables.keys() {
                    if let Some(value) = fixed.get(name) {
                        out.insert(name.clone(), value.clone());
                    }
                }
            }
            None => {
                for name in self.variables.keys() {
                    if let Ok(value) = std::env::var(name) {
                        out.insert(name.clone(), value);
                    }
                }
            }
        }
        out
    }
}

/// A named tool-call request.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub input: Value,
}

/// Out-of-band options for a single dispatch.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Cancellation signal forwarded into the tool context. When absent the
    /// handler sees a signal that never fires.
    pub signal: Option<CancellationToken>,
}

/// The two failure channels of [`Gram::handle_tool_call`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The requested name is not registered. A plain error, distinct from
    /// the response-carrying channel below.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    /// A ready-made failure response: validation rejection or a handler
    /// `assert`/`fail`. Callers should return it to the platform as-is.
    #[error("tool call failed with status {}", .0.status())]
    Failure(Response),
}

/// A short-circuit failure carrying a ready-made HTTP response.
///
/// Handlers propagate it with `?` from [`assert`] or return it from
/// [`ToolContext::fail`]; dispatch surfaces it as [`CallError::Failure`].
pub struct Failure {
    response: Response,
}

impl Failure {
    /// A 500 failure whose JSON body is `data` plus a captured `stack`.
    pub fn new(data: Value) -> Self {
        Self::with_status(data, 500)
    }

    /// A failure with an explicit HTTP status.
    pub fn with_status(data: Value, status: u16) -> Self {
        let mut body = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("error".to_string(), other);
                map
            }
        };
        body.insert(
            "stack".to_string(),
            Value::String(Backtrace::force_capture().to_string()),
        );

        Self {
            response: Response::json_with_status(status, &Value::Object(body)),
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status()
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("status", &self.response.status())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool call failed with status {}", self.response.status())
    }
}

impl std::error::Error for Failure {}

/// Fail the current call with a 500 response when `cond` is false.
///
/// ```no_run
/// # use gram_functions::assert;
/// # use serde_json::json;
/// # fn check(balance: i64) -> Result<(), gram_functions::Failure> {
/// assert(balance >= 0, json!({"error": "balance went negative"}))?;
/// # Ok(())
/// # }
/// ```
pub fn assert(cond: bool, data: Value) -> Result<(), Failure> {
    assert_with_status(cond, data, 500)
}

/// Like [`assert`] with an explicit HTTP status for the failure response.
pub fn assert_with_status(cond: bool, data: Value, status: u16) -> Result<(), Failure> {
    if cond {
        Ok(())
    } else {
        Err(Failure::with_status(data, status))
    }
}

/// A complete tool definition, produced by [`ToolDefinition::builder`].
pub struct ToolDefinition {
    name: String,
    description: Option<String>,
    input_schema: Shape,
    annotations: Option<ToolAnnotations>,
    variables: ManifestVariables,
    handler: Handler,
}

impl ToolDefinition {
    /// Start building a tool definition. The builder is finalized by
    /// [`ToolBuilder::execute`], which supplies the handler.
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder {
            name: name.into(),
            description: None,
            input_schema: Shape::new(),
            annotations: None,
            variables: ManifestVariables::new(),
        }
    }
}

/// Builder for a [`ToolDefinition`].
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    input_schema: Shape,
    annotations: Option<ToolAnnotations>,
    variables: ManifestVariables,
}

impl ToolBuilder {
    /// A useful description of the tool, presented to LLMs.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The input field shape validated before the handler runs.
    #[must_use]
    pub fn input(mut self, shape: Shape) -> Self {
        self.input_schema = shape;
        self
    }

    /// Behavior hints advertised in the manifest.
    #[must_use]
    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Declare an environment variable this tool may read. Only declared
    /// variables are resolvable through the tool context.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, description: Option<&str>) -> Self {
        self.variables.insert(
            name.into(),
            VariableInfo {
                description: description.map(str::to_string),
            },
        );
        self
    }

    /// Supply the async handler and finalize the definition.
    pub fn execute<F, Fut>(self, handler: F) -> ToolDefinition
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Failure>> + Send + 'static,
    {
        ToolDefinition {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            annotations: self.annotations,
            variables: self.variables,
            handler: Arc::new(move |ctx, input| Box::pin(handler(ctx, input))),
        }
    }
}
