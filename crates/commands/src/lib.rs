//! Command implementations for the Gram CLI
//!
//! This crate contains the build and push pipeline for Gram Functions
//! projects: configuration loading, compiling the function binary,
//! extracting its manifest, archiving, and uploading to the platform.

/// Command implementations module
pub mod commands;

/// Project configuration (gram.toml)
pub mod config;

/// HTTP client for the Gram platform API
pub mod api_client;

pub use commands::{build, push};
pub use config::{load_config, ConfigError, UserConfig};
