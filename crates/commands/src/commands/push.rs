//! Push command implementation.
//!
//! Uploads the archive produced by `gram build` to the platform, records a
//! staging file describing what was pushed, and optionally opens the
//! dashboard in a browser.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api_client::{ApiClient, ApiConfig};
use crate::commands::build::resolve_artifact_paths;
use crate::config::{UserConfig, CONFIG_FILENAMES};

const DASHBOARD_URL: &str = "https://app.getgram.ai?from=cli";

/// Flags accepted by `gram push`.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Overrides `deploy_project` from gram.toml.
    pub project: Option<String>,
}

/// Record of what was pushed, written next to the project for tooling to
/// pick up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStaging {
    pub slug: String,
    /// Path of the uploaded archive, relative to the project root.
    pub location: String,
}

/// Execute the push command.
pub async fn execute(config: &UserConfig, options: PushOptions) -> Result<()> {
    let cwd = std::fs::canonicalize(&config.cwd)
        .with_context(|| format!("project directory {} does not exist", config.cwd))?;

    let (_, _, zip_path, _) = resolve_artifact_paths(config, &cwd);
    if !zip_path.exists() {
        bail!(
            "no archive at {}. Run `gram build` first.",
            zip_path.display()
        );
    }

    let slug = match &config.slug {
        Some(slug) => slug.clone(),
        None => infer_slug(&cwd)?,
    };
    let project = options.project.as_deref().or(config.deploy_project.as_deref());

    let staging = DeployStaging {
        slug: slug.clone(),
        location: relative_to(&zip_path, &cwd)
            .to_string_lossy()
            .into_owned(),
    };
    let staging_path = cwd.join(&config.deploy_staging_file);
    let staging_json =
        serde_json::to_string_pretty(&staging).context("failed to serialize staging record")?;
    std::fs::write(&staging_path, staging_json)
        .with_context(|| format!("failed to write {}", staging_path.display()))?;
    debug!(path = %staging_path.display(), "wrote deploy staging record");

    let client = ApiClient::new(ApiConfig::from_env()?)?;
    let response = client.push_function(&slug, project, &zip_path).await?;

    match response.url {
        Some(url) => info!(%slug, %url, "deployment uploaded"),
        None => info!(%slug, "deployment uploaded"),
    }

    handle_open_browser(config);
    Ok(())
}

/// Derive a deployment slug from the cargo package name.
fn infer_slug(cwd: &Path) -> Result<String> {
    let metadata = cargo_metadata::MetadataCommand::new()
        .current_dir(cwd)
        .no_deps()
        .exec()
        .context("failed to read cargo metadata to infer a slug")?;

    let package = metadata
        .root_package()
        .context("no root package. Set `slug` in gram.toml.")?;
    Ok(sanitize_slug(&package.name.to_string()))
}

fn sanitize_slug(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Offer to open the dashboard after a successful push.
///
/// Skipped when the project opted out, in CI, or when stdin is not a
/// terminal. Declining once persists the opt-out to gram.toml.
fn handle_open_browser(config: &UserConfig) {
    if config.open_browser_after_deploy == Some(false) {
        return;
    }
    if std::env::var_os("CI").is_some() {
        return;
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt("Open the Gram dashboard in your browser?")
        .default(true)
        .interact_opt();

    match confirmed {
        Ok(Some(true)) => {
            if let Err(err) = webbrowser::open(DASHBOARD_URL) {
                warn!(%err, "could not open browser, visit {DASHBOARD_URL} manually");
            }
        }
        Ok(Some(false)) => {
            if let Err(err) = persist_browser_preference() {
                debug!(%err, "could not persist browser preference");
            }
        }
        // Interrupted prompt or no terminal attached.
        Ok(None) | Err(_) => {}
    }
}

/// Record `open_browser_after_deploy = false` in the project config,
/// keeping existing formatting and comments intact.
fn persist_browser_preference() -> Result<()> {
    let path = CONFIG_FILENAMES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new(CONFIG_FILENAMES[0]));

    let content = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    } else {
        String::new()
    };
    let mut doc: toml_edit::DocumentMut = content
        .parse()
        .with_context(|| format!("failed to parse {}", path.display()))?;
    doc["open_browser_after_deploy"] = toml_edit::value(false);
    std::fs::write(path, doc.to_string())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn staging_record_serializes_with_plain_keys() {
        let staging = DeployStaging {
            slug: "my-tools".to_string(),
            location: "dist/gram.zip".to_string(),
        };
        let json = serde_json::to_value(&staging).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"slug": "my-tools", "location": "dist/gram.zip"})
        );
    }

    #[test]
    fn relative_to_strips_the_base_prefix() {
        let path = Path::new("/project/dist/gram.zip");
        assert_eq!(
            relative_to(path, Path::new("/project")),
            Path::new("dist/gram.zip")
        );
        // Paths outside the base are kept absolute rather than mangled.
        assert_eq!(relative_to(path, Path::new("/elsewhere")), path);
    }

    #[test]
    fn slugs_are_lowercased_and_hyphenated() {
        assert_eq!(sanitize_slug("My_Tool Server"), "my-tool-server");
        assert_eq!(sanitize_slug("already-fine"), "already-fine");
        assert_eq!(sanitize_slug("_leading"), "leading");
    }
}
