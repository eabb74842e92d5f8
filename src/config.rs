//! Site configuration module.
//!
//! Handles loading, validating, and merging `swim.toml`. Stock defaults are
//! serialized to a TOML table and the user's file is merged on top of it, so
//! a config file only needs the keys it wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! listen = "127.0.0.1:8000"
//! database = "swim.db"
//! # workers = 8              # Max concurrent request workers (omit for auto = CPU cores)
//!
//! [media]
//! root = "media"
//! url = "/media/"
//!
//! [images]
//! backend = "rust"
//! jpeg_optimize = true
//! jpeg_quality = 85          # 0-100
//! placeholder_url = "/media/placeholder.png"
//!
//! [images.variants.admin_thumb]
//! algorithm = "thumbnail"    # thumbnail | crop | crop_and_scale
//! arguments = [150, 150]
//! jit_generation = false
//!
//! [templates]
//! default_payload_type = "resource"
//! per_host = true
//! accept_fallback_first = true
//! # error_template = "templates/500.html"
//!
//! [log]
//! level = "info"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Algorithm, VariantDecl};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `swim.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// HTTP listener, database location and worker cap.
    pub server: ServerConfig,
    /// Where uploads and derived images live and the URL they are served under.
    pub media: MediaConfig,
    /// Image encoding settings and image-field default variants.
    pub images: ImagesConfig,
    /// Template selection switches.
    pub templates: TemplatesConfig,
    /// Logging defaults (overridden by `RUST_LOG`).
    pub log: LogConfig,
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.jpeg_quality > 100 {
            return Err(ConfigError::Validation(
                "images.jpeg_quality must be 0-100".into(),
            ));
        }
        if self.templates.default_payload_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "templates.default_payload_type must not be empty".into(),
            ));
        }
        if !self.media.url.starts_with('/') || self.media.url.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "media.url must be an absolute path below the site root, e.g. \"/media/\"".into(),
            ));
        }
        if self.server.workers == Some(0) {
            return Err(ConfigError::Validation(
                "server.workers must be at least 1".into(),
            ));
        }
        for (key, variant) in &self.images.variants {
            variant
                .to_decl(key)
                .validate()
                .map_err(|e| ConfigError::Validation(format!("images.variants.{key}: {e}")))?;
        }
        Ok(())
    }

    /// Image-field default variants, in key order.
    pub fn default_variants(&self) -> Vec<VariantDecl> {
        self.images
            .variants
            .iter()
            .map(|(key, v)| v.to_decl(key))
            .collect()
    }
}

/// HTTP service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub listen: String,
    /// SQLite database file.
    pub database: PathBuf,
    /// Maximum number of requests handled concurrently.
    /// When absent, defaults to the number of CPU cores.
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
            database: PathBuf::from("swim.db"),
            workers: None,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ServerConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Media storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    /// Filesystem root for uploads and generated variants.
    pub root: PathBuf,
    /// URL prefix the media root is served under.
    pub url: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
            url: "/media/".to_string(),
        }
    }
}

impl MediaConfig {
    /// Public URL of a file stored at `relative` under the media root.
    pub fn url_for(&self, relative: &Path) -> String {
        let rel = relative.to_string_lossy().replace('\\', "/");
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            rel.trim_start_matches('/')
        )
    }
}

/// Which image backend renders variants. Only the pure-Rust backend exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Rust,
}

/// Image encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub backend: BackendKind,
    /// Spend extra encoder effort on smaller files.
    pub jpeg_optimize: bool,
    /// JPEG encoding quality (0 = worst, 100 = best).
    pub jpeg_quality: u32,
    /// Returned instead of a variant URL when generation fails.
    pub placeholder_url: String,
    /// Variants every image gets, keyed by variant key.
    pub variants: BTreeMap<String, VariantConfig>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        let mut variants = BTreeMap::new();
        variants.insert(
            "admin_thumb".to_string(),
            VariantConfig {
                algorithm: Algorithm::Thumbnail,
                arguments: vec![150, 150],
                jit_generation: false,
            },
        );
        Self {
            backend: BackendKind::Rust,
            jpeg_optimize: true,
            jpeg_quality: 85,
            placeholder_url: "/media/placeholder.png".to_string(),
            variants,
        }
    }
}

/// One `[images.variants.<key>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub algorithm: Algorithm,
    pub arguments: Vec<u32>,
    #[serde(default)]
    pub jit_generation: bool,
}

impl VariantConfig {
    pub fn to_decl(&self, key: &str) -> VariantDecl {
        VariantDecl {
            key: key.to_string(),
            algorithm: self.algorithm,
            arguments: self.arguments.clone(),
            jit_generation: self.jit_generation,
        }
    }
}

/// Template selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplatesConfig {
    /// Content type title used when choosing the page-level template.
    pub default_payload_type: String,
    /// Let templates linked to a host outrank generic ones.
    pub per_host: bool,
    /// With no Accept header, take the first declared template.
    pub accept_fallback_first: bool,
    /// Filesystem template rendered for 500 responses.
    pub error_template: Option<PathBuf>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            default_payload_type: "resource".to_string(),
            per_host: true,
            accept_fallback_first: true,
            error_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default `tracing` filter directive.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file, falling back to stock defaults when the
/// file is absent.
pub fn load_config(path: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `swim.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Swim Configuration
# ==================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP service
# ---------------------------------------------------------------------------
[server]
# Address the HTTP listener binds to.
listen = "127.0.0.1:8000"

# SQLite database file. Created on first start.
database = "swim.db"

# Maximum number of requests rendered concurrently.
# Omit or comment out to auto-detect (= number of CPU cores).
# workers = 8

# ---------------------------------------------------------------------------
# Media storage
# ---------------------------------------------------------------------------
[media]
# Uploads land in <root>/content/<kind>/<yymmdd-hhmmss>/<name>.<ext>;
# variants next to them in <name>-variants/<variant-key>/<name>.<ext>.
root = "media"

# URL prefix the media root is served under.
url = "/media/"

# ---------------------------------------------------------------------------
# Images
# ---------------------------------------------------------------------------
[images]
# Rendering backend. "rust" is the only one available.
backend = "rust"

# Spend extra encoder effort on smaller files.
jpeg_optimize = true

# JPEG encoding quality (0 = worst, 100 = best).
jpeg_quality = 85

# Served in place of a variant whose generation failed.
placeholder_url = "/media/placeholder.png"

# Variants every image gets. Algorithms:
#   thumbnail       [width, height]                              fit inside the box
#   crop            [width, height]                              scale down, centre crop
#   crop_and_scale  [left, top, right, bottom, width, height]    crop, then scale
# jit_generation = true defers generation to the first request for the variant.
[images.variants.admin_thumb]
algorithm = "thumbnail"
arguments = [150, 150]
jit_generation = false

# ---------------------------------------------------------------------------
# Templates
# ---------------------------------------------------------------------------
[templates]
# Content type whose templates render a whole resource.
default_payload_type = "resource"

# Templates linked to a host outrank generic templates for that host.
per_host = true

# With no Accept header, the first declared template wins.
accept_fallback_first = true

# Filesystem template used for 500 responses (never loaded from the database).
# error_template = "templates/500.html"

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[log]
# Default filter; RUST_LOG takes precedence.
level = "info"
"##
}
