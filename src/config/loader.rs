use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::Manifest;

/// Load a manifest from a file using the config crate
/// Supports YAML, JSON and TOML, picked by file extension
pub async fn load_manifest(manifest_path: &str) -> Result<Manifest> {
    load_manifest_sync(manifest_path)
}

/// Load a manifest synchronously
pub fn load_manifest_sync(manifest_path: &str) -> Result<Manifest> {
    let manifest_path = Path::new(manifest_path);

    let format = match manifest_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            manifest_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", manifest_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;

    let manifest: Manifest = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize manifest from {}",
            manifest_path.display()
        )
    })?;

    tracing::debug!(
        "Loaded manifest from {} ({} rules, {} auditors)",
        manifest_path.display(),
        manifest.route_rules.len(),
        manifest.auditors.len()
    );
    Ok(manifest)
}
