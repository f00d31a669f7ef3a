//! Project configuration file format (gram.toml)
//!
//! This module defines the per-project configuration read by the build and
//! push commands. Every field has a default, so projects without a config
//! file build with the standard layout.

use std::path::{Path, PathBuf};

use garde::Validate;
use serde::{Deserialize, Serialize};

/// File names probed, in order, when no explicit path is given.
pub const CONFIG_FILENAMES: &[&str] = &["gram.toml", ".gram.toml"];

/// Root configuration structure for gram.toml
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Source file of the function binary's entrypoint, relative to `cwd`
    #[serde(default = "default_entrypoint")]
    #[garde(length(min = 1))]
    pub entrypoint: String,

    /// Directory build artifacts are written into, relative to `cwd`
    #[serde(default = "default_out_dir")]
    #[garde(length(min = 1))]
    pub out_dir: String,

    /// Project root the build runs from
    #[serde(default = "default_cwd")]
    #[garde(length(min = 1))]
    pub cwd: String,

    /// Where push records its staging metadata
    #[serde(default = "default_deploy_staging_file")]
    #[garde(length(min = 1))]
    pub deploy_staging_file: String,

    /// Platform project to deploy into
    #[serde(default)]
    #[garde(skip)]
    pub deploy_project: Option<String>,

    /// Deployment slug. Inferred from the cargo package name when absent
    #[serde(default)]
    #[garde(custom(validate_slug))]
    pub slug: Option<String>,

    /// Whether push may open the dashboard in a browser afterwards
    #[serde(default)]
    #[garde(skip)]
    pub open_browser_after_deploy: Option<bool>,
}

fn default_entrypoint() -> String {
    "src/gram.rs".to_string()
}

fn default_out_dir() -> String {
    "dist".to_string()
}

fn default_cwd() -> String {
    ".".to_string()
}

fn default_deploy_staging_file() -> String {
    "gram.deploy.json".to_string()
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            entrypoint: default_entrypoint(),
            out_dir: default_out_dir(),
            cwd: default_cwd(),
            deploy_staging_file: default_deploy_staging_file(),
            deploy_project: None,
            slug: None,
            open_browser_after_deploy: None,
        }
    }
}

fn validate_slug(slug: &Option<String>, _ctx: &()) -> garde::Result {
    let Some(slug) = slug else { return Ok(()) };
    if slug.is_empty() {
        return Err(garde::Error::new("slug must not be empty"));
    }
    let valid = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(garde::Error::new(
            "slug must be lowercase alphanumeric with interior hyphens",
        ))
    }
}

/// Errors from locating, reading or validating gram.toml
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("invalid configuration in {path}: {report}")]
    Invalid { path: PathBuf, report: garde::Report },
}

/// Load project configuration.
///
/// With an explicit `path` the file must exist. Otherwise the well-known
/// file names are probed in the current directory and a missing file means
/// all defaults.
pub fn load_config(path: Option<&Path>) -> Result<UserConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match CONFIG_FILENAMES.iter().map(Path::new).find(|p| p.exists()) {
            Some(found) => found.to_path_buf(),
            None => return Ok(UserConfig::default()),
        },
    };

    load_config_file(&path)
}

fn load_config_file(path: &Path) -> Result<UserConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: UserConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;

    config.validate().map_err(|report| ConfigError::Invalid {
        path: path.to_path_buf(),
        report,
    })?;

    Ok(config)
}
