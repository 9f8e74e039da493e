mod schema;

pub use schema::*;

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Input source for manifest loading
#[derive(Debug, Clone)]
pub enum ManifestSource {
    File(PathBuf),
    Stdin,
}

impl ManifestSource {
    /// Parse from command line argument
    pub fn from_arg(arg: &str) -> Self {
        match arg {
            "-" => Self::Stdin,
            s => Self::File(PathBuf::from(s)),
        }
    }
}

/// Load and check a manifest from any supported source
pub fn load(source: &ManifestSource) -> Result<Manifest> {
    let manifest = match source {
        ManifestSource::File(path) => load_from_file(path)?,
        ManifestSource::Stdin => load_from_stdin()?,
    };
    validate(&manifest)?;
    Ok(manifest)
}

/// Load manifest from a file (YAML, JSON or TOML)
fn load_from_file(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "yaml" | "yml" => parse_yaml(&content),
        "json" => parse_json(&content),
        "toml" => parse_toml(&content),
        _ => parse_auto(&content),
    }
}

/// Load manifest from stdin
fn load_from_stdin() -> Result<Manifest> {
    let mut content = String::new();
    io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read manifest from stdin")?;
    parse_auto(&content)
}

fn validate(manifest: &Manifest) -> Result<()> {
    if manifest.storage.fsset.root.is_empty() {
        bail!("Manifest does not name a root device");
    }
    manifest
        .storage
        .root_device()
        .context("Root device is not part of the storage layout")?;

    let target = &manifest.bootloader.target;
    if !target.is_empty() {
        manifest
            .storage
            .get(target)
            .with_context(|| format!("Bootloader target {} is not part of the storage layout", target))?;
    }
    Ok(())
}

fn parse_yaml(content: &str) -> Result<Manifest> {
    serde_yaml::from_str(content).context("Failed to parse YAML manifest")
}

fn parse_json(content: &str) -> Result<Manifest> {
    serde_json::from_str(content).context("Failed to parse JSON manifest")
}

fn parse_toml(content: &str) -> Result<Manifest> {
    toml::from_str(content).context("Failed to parse TOML manifest")
}

/// Auto-detect format and parse
fn parse_auto(content: &str) -> Result<Manifest> {
    let trimmed = content.trim();

    if trimmed.starts_with('{') {
        parse_json(content)
    } else {
        // YAML is a superset of JSON; TOML is tried last
        parse_yaml(content).or_else(|yaml_err| {
            parse_toml(content).map_err(|toml_err| {
                tracing::debug!("TOML fallback failed: {:#}", toml_err);
                yaml_err
            })
        })
    }
}
