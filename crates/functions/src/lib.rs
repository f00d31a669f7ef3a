//! # Gram Functions
//!
//! Runtime for building Gram Functions: small, schema-validated tools that a
//! hosting platform invokes by name and that respond with HTTP-style
//! responses.
//!
//! A function binary registers its tools on a [`Gram`] registry and hands the
//! registry to the platform:
//!
//! ```no_run
//! use gram_functions::prelude::*;
//!
//! let gram = Gram::new().tool(
//!     ToolDefinition::builder("echo")
//!         .description("Echoes the input")
//!         .input(Shape::new().field("message", Field::string()))
//!         .execute(|ctx, input| async move {
//!             Ok(ctx.json(&json!({ "echoed": input["message"] })))
//!         }),
//! );
//!
//! if gram_functions::maybe_emit_manifest(&gram) {
//!     return;
//! }
//! ```
//!
//! Existing MCP servers can be exposed through the same contract with
//! [`mcp::with_gram`], and a registry can itself be served over MCP with
//! [`mcp::from_gram`].

pub mod context;
pub mod manifest;
pub mod mcp;
pub mod registry;
pub mod response;
pub mod schema;


pub use context::ToolContext;
pub use manifest::{
    Manifest, ManifestResource, ManifestTool, ManifestVariables, ToolAnnotations, VariableInfo,
    MANIFEST_VERSION,
};
pub use registry::{
    assert, assert_with_status, CallError, CallOptions, Failure, Gram, GramOptions,
    ToolCallRequest, ToolDefinition,
};
pub use response::Response;
pub use schema::{Field, Shape};

/// Convenient re-exports for function binaries.
pub mod prelude {
    pub use serde_json::{self, json};

    pub use crate::{
        assert, Field, Gram, Response, Shape, ToolContext, ToolDefinition,
    };
}

/// Entry helper for function binaries.
///
/// When the binary is invoked with the single argument `manifest` (which is
/// what `gram build` does to inspect the compiled function), prints the
/// registry manifest as pretty JSON to stdout and returns `true` so the
/// caller can exit without starting its normal runtime.
pub fn maybe_emit_manifest(gram: &Gram) -> bool {
    if std::env::args().nth(1).as_deref() != Some("manifest") {
        return false;
    }
    match serde_json::to_string_pretty(&gram.manifest()) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("failed to serialize manifest: {err}");
            std::process::exit(2);
        }
    }
    true
}
