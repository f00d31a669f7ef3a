//! Build command implementation.
//!
//! Compiles the project's function binary in release mode, asks the built
//! binary for its manifest, and packages binary plus manifest into a zip
//! archive ready for `gram push`.

use std::fs::File;
use std::io::{copy, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use gram_functions::Manifest;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::UserConfig;

/// File name of the compiled function binary inside the archive.
pub const BINARY_NAME: &str = "functions.bin";

/// File name of the manifest inside the archive.
pub const MANIFEST_NAME: &str = "manifest.json";

/// File name of the deployable archive.
pub const ARCHIVE_NAME: &str = "gram.zip";

/// Everything the build writes into the output directory.
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    pub out_dir: PathBuf,
    pub binary_path: PathBuf,
    pub manifest_path: PathBuf,
    pub zip_path: PathBuf,
    pub zip_size: u64,
    pub manifest: Manifest,
}

/// Output paths for a given configuration, resolved against `cwd`.
pub fn resolve_artifact_paths(config: &UserConfig, cwd: &Path) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
    let out_dir = cwd.join(&config.out_dir);
    (
        out_dir.join(BINARY_NAME),
        out_dir.join(MANIFEST_NAME),
        out_dir.join(ARCHIVE_NAME),
        out_dir,
    )
}

/// Execute the build command.
pub async fn execute(config: &UserConfig) -> Result<BuildArtifacts> {
    let cwd = std::fs::canonicalize(&config.cwd)
        .with_context(|| format!("project directory {} does not exist", config.cwd))?;

    let entrypoint = cwd.join(&config.entrypoint);
    if !entrypoint.exists() {
        bail!(
            "entrypoint {} not found. Set `entrypoint` in gram.toml to the source file of your function binary.",
            entrypoint.display()
        );
    }

    let target = resolve_bin_target(&cwd, &entrypoint)?;
    info!(package = %target.package, bin = %target.bin, "building function binary");

    let artifact = compile(&cwd, &target).await?;
    let manifest = extract_manifest(&artifact).await?;

    let (binary_path, manifest_path, zip_path, out_dir) = resolve_artifact_paths(config, &cwd);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    let manifest_json = serde_json::to_string_pretty(&manifest)
        .context("failed to serialize manifest")?;
    std::fs::write(&manifest_path, &manifest_json)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    std::fs::copy(&artifact, &binary_path).with_context(|| {
        format!(
            "failed to copy {} to {}",
            artifact.display(),
            binary_path.display()
        )
    })?;

    create_zip_archive(
        &zip_path,
        &[(BINARY_NAME, &binary_path), (MANIFEST_NAME, &manifest_path)],
    )?;

    let zip_size = std::fs::metadata(&zip_path)
        .with_context(|| format!("failed to stat {}", zip_path.display()))?
        .len();
    let tool_count = manifest.tools.as_ref().map_or(0, Vec::len);
    info!(
        archive = %zip_path.display(),
        bytes = zip_size,
        tools = tool_count,
        "build complete"
    );

    Ok(BuildArtifacts {
        out_dir,
        binary_path,
        manifest_path,
        zip_path,
        zip_size,
        manifest,
    })
}

struct BinTarget {
    package: String,
    bin: String,
    release_dir: PathBuf,
}

/// Find the cargo `[[bin]]` target whose source file is the configured
/// entrypoint.
fn resolve_bin_target(cwd: &Path, entrypoint: &Path) -> Result<BinTarget> {
    let metadata = cargo_metadata::MetadataCommand::new()
        .current_dir(cwd)
        .exec()
        .context("failed to read cargo metadata. Is this a cargo project?")?;

    let entrypoint = std::fs::canonicalize(entrypoint)
        .with_context(|| format!("failed to resolve {}", entrypoint.display()))?;

    for package in metadata.workspace_packages() {
        for target in &package.targets {
            if !target.is_bin() {
                continue;
            }
            let src_path = std::path::Path::new(target.src_path.as_str());
            let Ok(src_path) = std::fs::canonicalize(src_path) else {
                continue;
            };
            if src_path == entrypoint {
                return Ok(BinTarget {
                    package: package.name.to_string(),
                    bin: target.name.clone(),
                    release_dir: metadata.target_directory.join("release").into(),
                });
            }
        }
    }

    bail!(
        "no [[bin]] target has {} as its source file. Declare one in Cargo.toml or point `entrypoint` at an existing binary target.",
        entrypoint.display()
    )
}

async fn compile(cwd: &Path, target: &BinTarget) -> Result<PathBuf> {
    let status = tokio::process::Command::new("cargo")
        .args(["build", "--release", "--package", &target.package, "--bin", &target.bin])
        .current_dir(cwd)
        .status()
        .await
        .context("failed to run cargo build")?;

    if !status.success() {
        bail!("cargo build failed");
    }

    let artifact = target.release_dir.join(&target.bin);
    if !artifact.exists() {
        bail!("expected build artifact at {}", artifact.display());
    }
    Ok(artifact)
}

/// Run the built binary with the `manifest` argument and parse its output.
async fn extract_manifest(artifact: &Path) -> Result<Manifest> {
    debug!(binary = %artifact.display(), "extracting manifest");

    let output = tokio::process::Command::new(artifact)
        .arg("manifest")
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {}", artifact.display()))?;

    if !output.status.success() {
        bail!(
            "function binary exited with {} when asked for its manifest: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    serde_json::from_slice(&output.stdout).context(
        "function binary did not print a manifest. Make sure main() calls gram_functions::maybe_emit_manifest before starting its runtime.",
    )
}

/// Write `entries` into a fresh zip archive at `zip_path`.
fn create_zip_archive(zip_path: &Path, entries: &[(&str, &PathBuf)]) -> Result<()> {
    let file = File::create(zip_path)
        .with_context(|| format!("failed to create {}", zip_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in entries {
        writer
            .start_file(*name, options)
            .with_context(|| format!("failed to add {name} to archive"))?;
        let mut reader = BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        );
        copy(&mut reader, &mut writer)
            .with_context(|| format!("failed to write {name} into archive"))?;
    }

    let mut file = writer.finish().context("failed to finalize archive")?;
    file.flush().context("failed to flush archive")?;
    Ok(())
}
