//! Engine configuration module.
//!
//! Handles loading, validating, and merging `brand-pdf.toml`. Stock defaults
//! are overridden by the user file, which only needs the keys it changes.
//! Brand directories use the same layering (see [`crate::brand`]), so the
//! merge helpers here are shared.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [paths]
//! brands_root = "brands"        # One sub-directory per brand
//! output_root = "output"        # Where generated PDFs are stored
//!
//! [pool]
//! max_sessions = 2              # Concurrent headless sessions
//! acquire_timeout_ms = 30000    # Queue wait before PoolExhausted
//! render_timeout_ms = 60000     # Hard limit for one render
//! transient_retries = 1         # Retries inside the same session
//! max_renders_per_session = 50  # Recycle after this many renders
//! max_idle_secs = 300           # Recycle sessions idle this long
//! maintenance_interval_secs = 30
//!
//! [chrome]
//! # executable = "/usr/bin/chromium"
//! sandbox = true
//! window_width = 1280
//! window_height = 1024
//! navigation_timeout_ms = 20000
//!
//! [pdf]
//! page_size = "Letter"          # Engine-wide page defaults
//!
//! [logging]
//! level = "info"                # RUST_LOG overrides this
//! format = "compact"            # compact | json
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::pdf::options::{PdfOptions, PdfOverrides};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "brand-pdf.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `brand-pdf.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Brand and output directories.
    pub paths: PathsConfig,
    /// Session pool sizing, timeouts and recycling.
    pub pool: PoolSettings,
    /// Headless Chrome launch settings.
    pub chrome: ChromeSettings,
    /// Engine-wide page-setup defaults, lowest layer under brand and request.
    pub pdf: PdfOverrides,
    /// Log level and formatter.
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.pool;
        if pool.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "pool.max_sessions must be at least 1".into(),
            ));
        }
        if pool.acquire_timeout_ms == 0 || pool.render_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "pool timeouts must be non-zero".into(),
            ));
        }
        if pool.transient_retries > 5 {
            return Err(ConfigError::Validation(
                "pool.transient_retries must be 0-5".into(),
            ));
        }
        if pool.max_renders_per_session == 0 {
            return Err(ConfigError::Validation(
                "pool.max_renders_per_session must be at least 1".into(),
            ));
        }
        if pool.maintenance_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "pool.maintenance_interval_secs must be non-zero".into(),
            ));
        }
        if self.chrome.navigation_timeout_ms >= pool.render_timeout_ms {
            return Err(ConfigError::Validation(
                "chrome.navigation_timeout_ms must be less than pool.render_timeout_ms".into(),
            ));
        }
        if self.chrome.window_width == 0 || self.chrome.window_height == 0 {
            return Err(ConfigError::Validation(
                "chrome window dimensions must be non-zero".into(),
            ));
        }
        if let Err(problems) = PdfOptions::resolve(&[&self.pdf]) {
            return Err(ConfigError::Validation(format!(
                "pdf: {}",
                problems.join("; ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub brands_root: PathBuf,
    pub output_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            brands_root: PathBuf::from("brands"),
            output_root: PathBuf::from("output"),
        }
    }
}

/// Session pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Upper bound on live sessions, and therefore on concurrent renders.
    pub max_sessions: usize,
    /// How long a request may wait in the queue for a free session.
    pub acquire_timeout_ms: u64,
    /// Hard limit for one render; exceeding it discards the session.
    pub render_timeout_ms: u64,
    /// Retries of a transient failure within the same session.
    pub transient_retries: u32,
    /// Idle sessions that reached this many renders are recycled.
    pub max_renders_per_session: u64,
    /// Sessions idle at least this long are recycled.
    pub max_idle_secs: u64,
    /// Period of the background maintenance task.
    pub maintenance_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            acquire_timeout_ms: 30_000,
            render_timeout_ms: 60_000,
            transient_retries: 1,
            max_renders_per_session: 50,
            max_idle_secs: 300,
            maintenance_interval_secs: 30,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Headless Chrome launch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChromeSettings {
    /// Explicit browser binary. When absent, `headless_chrome` auto-detects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    /// Disable only in containers that lack user namespaces.
    pub sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Per-navigation timeout; exceeding it is a transient failure.
    pub navigation_timeout_ms: u64,
}

impl Default for ChromeSettings {
    fn default() -> Self {
        Self {
            executable: None,
            sandbox: true,
            window_width: 1280,
            window_height: 1024,
            navigation_timeout_ms: 20_000,
        }
    }
}

impl ChromeSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// An `EnvFilter` directive such as `info` or `brand_pdf=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(EngineConfig::default())?)
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

/// Read a TOML file as a raw value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_toml(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
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
) -> Result<EngineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `brand-pdf.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the stock defaults.
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    load_config_file(&dir.join(CONFIG_FILE_NAME))
}

/// Load config from an explicit file path (the `--config` flag).
pub fn load_config_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_toml(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `brand-pdf.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# brand-pdf Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Paths
# ---------------------------------------------------------------------------
[paths]
# One sub-directory per brand, each containing a brand.toml.
brands_root = "brands"

# Generated PDFs land in <output_root>/<brand>/.
output_root = "output"

# ---------------------------------------------------------------------------
# Session pool
# ---------------------------------------------------------------------------
[pool]
# Maximum number of live headless sessions (and concurrent renders).
max_sessions = 2

# How long a request waits for a free session before failing (ms).
acquire_timeout_ms = 30000

# Hard limit for a single render; the session is replaced after a timeout (ms).
render_timeout_ms = 60000

# Transient failures are retried this many times in the same session.
transient_retries = 1

# Idle sessions are recycled after serving this many renders...
max_renders_per_session = 50

# ...or after sitting idle this long (seconds).
max_idle_secs = 300

# How often the maintenance task checks idle sessions (seconds).
maintenance_interval_secs = 30

# ---------------------------------------------------------------------------
# Headless Chrome
# ---------------------------------------------------------------------------
[chrome]
# Browser binary. Omit to let headless_chrome locate one.
# executable = "/usr/bin/chromium"

# Disable only when running in a container without user namespaces.
sandbox = true

window_width = 1280
window_height = 1024

# Per-navigation timeout; exceeding it counts as a transient failure (ms).
# Must be below pool.render_timeout_ms.
navigation_timeout_ms = 20000

# ---------------------------------------------------------------------------
# Engine-wide page defaults (brand [pdf] and request options override these)
# ---------------------------------------------------------------------------
[pdf]
# page_size = "Letter"        # A3, A4, A5, Letter, Legal, Tabloid
# orientation = "portrait"    # portrait | landscape
# margin = "1in"              # in, cm, mm, pt, px
# header = false
# footer = false
# print_background = true
# scale = 1.0                 # 0.1 - 2.0

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# EnvFilter directive; RUST_LOG takes precedence when set.
level = "info"

# compact | json
format = "compact"
"##
}
