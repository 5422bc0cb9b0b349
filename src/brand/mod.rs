//! Brand registry: load, validate, cache and protect brand configurations.
//!
//! A brand is a directory under the brands root holding a `brand.toml` (see
//! [`config`] for the format). Loading layers three TOML sources with the
//! same merge used for engine config:
//!
//! 1. Stock defaults ([`BrandFile::default`])
//! 2. `brand.toml`
//! 3. `protection.toml`, if present, replacing the `[protection]` table
//!
//! The merged file is validated in one pass. Every problem is collected so an
//! operator sees the complete list, except path escapes which fail at once
//! as [`BrandError::Isolation`].
//!
//! Loaded brands are cached as `Arc<BrandConfig>`. Reload, update and
//! lock/unlock build the complete new record first and then swap the cache
//! entry, so a reader holds either the old or the new config, never a mix.
//! Update and delete refuse a locked brand.

pub mod assets;
pub mod config;

pub use assets::{AssetEntry, AssetKind};
pub use config::{
    BACKUP_FILE_NAME, BRAND_FILE_NAME, BrandConfig, BrandFile, FontSpec, PROTECTION_FILE_NAME, ProtectionLevel,
    ProtectionState,
};

use crate::config::merge_toml;
use crate::pdf::options::PdfOptions;
use crate::render::is_builtin_template;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

const MAX_ID_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum BrandError {
    #[error("brand not found: {brand_id}")]
    NotFound { brand_id: String },
    #[error("invalid brand id '{brand_id}': use 1-64 characters of a-z, 0-9, '-' or '_'")]
    InvalidId { brand_id: String },
    #[error("IO error for brand {brand_id} at {}: {source}", path.display())]
    Io {
        brand_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error in brand {brand_id}: {source}")]
    Toml {
        brand_id: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("TOML serialize error in brand {brand_id}: {source}")]
    Serialize {
        brand_id: String,
        #[source]
        source: toml::ser::Error,
    },
    #[error("brand {brand_id} is invalid:\n  - {}", problems.join("\n  - "))]
    Validation {
        brand_id: String,
        problems: Vec<String>,
    },
    #[error("brand {brand_id}: path '{path}' escapes the brand directory")]
    Isolation { brand_id: String, path: String },
    #[error("brand {brand_id} declares no asset named '{asset}'")]
    UnknownAsset { brand_id: String, asset: String },
    #[error("brand {brand_id} is protected ({level}); unlock it before modifying assets")]
    Protected {
        brand_id: String,
        level: ProtectionLevel,
    },
    #[error("brand {brand_id}: '{path}' is managed by the registry and cannot be written directly")]
    ReservedPath { brand_id: String, path: String },
    #[error("brand {brand_id} is strictly locked by {locked_by}")]
    AlreadyLocked { brand_id: String, locked_by: String },
    #[error("storage error for brand {brand_id}: {source}")]
    Storage {
        brand_id: String,
        #[source]
        source: crate::storage::StorageError,
    },
}

impl BrandError {
    pub fn brand_id(&self) -> &str {
        match self {
            BrandError::NotFound { brand_id }
            | BrandError::InvalidId { brand_id }
            | BrandError::Io { brand_id, .. }
            | BrandError::Toml { brand_id, .. }
            | BrandError::Serialize { brand_id, .. }
            | BrandError::Validation { brand_id, .. }
            | BrandError::Isolation { brand_id, .. }
            | BrandError::UnknownAsset { brand_id, .. }
            | BrandError::Protected { brand_id, .. }
            | BrandError::ReservedPath { brand_id, .. }
            | BrandError::AlreadyLocked { brand_id, .. }
            | BrandError::Storage { brand_id, .. } => brand_id,
        }
    }
}

/// Brand ids double as directory names, so they are restricted to a safe set.
pub fn validate_id(id: &str) -> Result<(), BrandError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(BrandError::InvalidId {
            brand_id: id.to_string(),
        })
    }
}

/// Explicit registry instance; share it by `Arc`.
#[derive(Debug)]
pub struct BrandRegistry {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<BrandConfig>>>,
    /// Serializes lock/unlock so the read-check-write of the sidecar is atomic.
    mutation: Mutex<()>,
}

impl BrandRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
            mutation: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical directory for `id`, checked to sit directly under the root.
    pub fn brand_dir(&self, id: &str) -> Result<PathBuf, BrandError> {
        validate_id(id)?;
        let not_found = || BrandError::NotFound {
            brand_id: id.to_string(),
        };
        let root = self.root.canonicalize().map_err(|_| not_found())?;
        let dir = root.join(id).canonicalize().map_err(|_| not_found())?;
        if dir.parent() != Some(root.as_path()) {
            return Err(BrandError::Isolation {
                brand_id: id.to_string(),
                path: id.to_string(),
            });
        }
        if !dir.join(BRAND_FILE_NAME).is_file() {
            return Err(not_found());
        }
        Ok(dir)
    }

    /// Return the cached brand, loading it on first use.
    pub fn load_brand(&self, id: &str) -> Result<Arc<BrandConfig>, BrandError> {
        if let Some(cached) = self.cached(id) {
            return Ok(cached);
        }
        let built = Arc::new(self.build(id)?);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent loader may have won; keep its entry so callers share one Arc.
        let entry = cache.entry(id.to_string()).or_insert(built);
        Ok(Arc::clone(entry))
    }

    /// Rebuild from disk and replace the cache entry.
    pub fn reload_brand(&self, id: &str) -> Result<Arc<BrandConfig>, BrandError> {
        let built = Arc::new(self.build(id)?);
        self.swap(id, Arc::clone(&built));
        info!(brand_id = id, "brand reloaded");
        Ok(built)
    }

    /// Sorted ids of every directory under the root that holds a `brand.toml`.
    pub fn list_brands(&self) -> Result<Vec<String>, BrandError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BrandError::Io {
                    brand_id: String::new(),
                    path: self.root.clone(),
                    source,
                });
            }
        };
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(BRAND_FILE_NAME).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| validate_id(name).is_ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Built-in template names plus the brand's overrides, sorted.
    pub fn available_templates(&self, id: &str) -> Result<Vec<String>, BrandError> {
        let brand = self.load_brand(id)?;
        let mut names: Vec<String> = crate::render::BUILTIN_TEMPLATES
            .iter()
            .map(|t| t.name.to_string())
            .chain(brand.template_overrides.keys().cloned())
            .filter(|name| !crate::render::is_layout_template(name))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Absolute path of the brand's asset called `logical`.
    pub fn resolve_asset(&self, id: &str, logical: &str) -> Result<PathBuf, BrandError> {
        let brand = self.load_brand(id)?;
        let declared = if logical == config::STYLESHEET_ASSET {
            brand.stylesheet_path.as_ref()
        } else {
            brand.asset_paths.get(logical)
        };
        let path = declared.ok_or_else(|| BrandError::UnknownAsset {
            brand_id: id.to_string(),
            asset: logical.to_string(),
        })?;
        // Re-check at resolution time in case a symlink changed after load.
        let real = path.canonicalize().map_err(|source| BrandError::Io {
            brand_id: id.to_string(),
            path: path.clone(),
            source,
        })?;
        if !real.starts_with(&brand.root) {
            return Err(BrandError::Isolation {
                brand_id: id.to_string(),
                path: logical.to_string(),
            });
        }
        Ok(real)
    }

    /// Fail with [`BrandError::Protected`] unless the brand is unlocked.
    pub fn assert_mutable(&self, id: &str) -> Result<(), BrandError> {
        ensure_unlocked(id, &self.load_brand(id)?.protection)
    }

    /// Merge `patch` into `brand.toml`, keeping the previous file as
    /// [`BACKUP_FILE_NAME`].
    ///
    /// The merged file is validated like a load before anything is written.
    /// `[protection]` cannot be patched; use [`Self::lock_brand`].
    pub fn update_brand(
        &self,
        id: &str,
        patch: toml::Value,
    ) -> Result<Arc<BrandConfig>, BrandError> {
        let Some(patch_table) = patch.as_table() else {
            return Err(BrandError::Validation {
                brand_id: id.to_string(),
                problems: vec!["an update must be a TOML table".to_string()],
            });
        };
        if patch_table.contains_key("protection") {
            return Err(BrandError::ReservedPath {
                brand_id: id.to_string(),
                path: "protection".to_string(),
            });
        }

        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = self.brand_dir(id)?;
        let current = read_brand_layers(id, &dir)?;
        let current_file = brand_file_from(id, current.file.clone(), current.sidecar.clone())?;
        ensure_unlocked(id, &current_file.protection)?;

        let next = merge_toml(current.file, patch);
        let file = brand_file_from(id, next.clone(), current.sidecar)?;
        let built = Arc::new(validate_brand(id, &dir, file)?);

        let body = toml::to_string_pretty(&next).map_err(|source| BrandError::Serialize {
            brand_id: id.to_string(),
            source,
        })?;
        let path = dir.join(BRAND_FILE_NAME);
        let backup = dir.join(BACKUP_FILE_NAME);
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| BrandError::Io {
                brand_id: id.to_string(),
                path,
                source,
            }
        };
        std::fs::copy(&path, &backup).map_err(io(&backup))?;
        crate::storage::write_atomic(&path, body.as_bytes()).map_err(io(&path))?;

        self.swap(id, Arc::clone(&built));
        info!(brand_id = id, "brand updated");
        Ok(built)
    }

    /// Remove the brand directory and its cache entry.
    pub fn delete_brand(&self, id: &str) -> Result<(), BrandError> {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = self.brand_dir(id)?;
        // Checked from disk; the brand need not pass validation to be deleted.
        let file = load_brand_file(id, &dir)?;
        ensure_unlocked(id, &file.protection)?;

        std::fs::remove_dir_all(&dir).map_err(|source| BrandError::Io {
            brand_id: id.to_string(),
            path: dir.clone(),
            source,
        })?;
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.remove(id);
        info!(brand_id = id, "brand deleted");
        Ok(())
    }

    pub fn check_protection(&self, id: &str) -> Result<ProtectionState, BrandError> {
        Ok(self.load_brand(id)?.protection.clone())
    }

    /// Set the protection level, recording who locked it and why.
    ///
    /// A strict lock held by someone else cannot be replaced.
    /// `ProtectionLevel::None` clears the lock under the same rule.
    pub fn lock_brand(
        &self,
        id: &str,
        by: &str,
        reason: Option<&str>,
        level: ProtectionLevel,
    ) -> Result<ProtectionState, BrandError> {
        let state = if level == ProtectionLevel::None {
            ProtectionState::default()
        } else {
            ProtectionState {
                level,
                locked_by: Some(by.to_string()),
                reason: reason.map(str::to_string),
                locked_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            }
        };
        self.transition(id, by, state)
    }

    /// Clear the lock. A strict lock can only be cleared by its holder.
    pub fn unlock_brand(&self, id: &str, by: &str) -> Result<ProtectionState, BrandError> {
        self.transition(id, by, ProtectionState::default())
    }

    fn transition(
        &self,
        id: &str,
        by: &str,
        next: ProtectionState,
    ) -> Result<ProtectionState, BrandError> {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);

        // Always start from disk so an edit made outside this process is honored.
        let current = self.build(id)?;
        if !current.protection.can_change(by) {
            return Err(BrandError::AlreadyLocked {
                brand_id: id.to_string(),
                locked_by: current.protection.locked_by.clone().unwrap_or_default(),
            });
        }

        let sidecar = current.root.join(PROTECTION_FILE_NAME);
        let body = toml::to_string(&next).map_err(|source| BrandError::Serialize {
            brand_id: id.to_string(),
            source,
        })?;
        crate::storage::write_atomic(&sidecar, body.as_bytes()).map_err(|source| {
            BrandError::Io {
                brand_id: id.to_string(),
                path: sidecar.clone(),
                source,
            }
        })?;

        let mut updated = current;
        updated.protection = next.clone();
        self.swap(id, Arc::new(updated));
        info!(
            brand_id = id,
            level = %next.level,
            by,
            "brand protection changed"
        );
        Ok(next)
    }

    fn cached(&self, id: &str) -> Option<Arc<BrandConfig>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(id).cloned()
    }

    fn swap(&self, id: &str, brand: Arc<BrandConfig>) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(id.to_string(), brand);
    }

    fn build(&self, id: &str) -> Result<BrandConfig, BrandError> {
        let dir = self.brand_dir(id)?;
        let brand = build_brand(id, &dir)?;
        debug!(brand_id = id, root = %dir.display(), "brand loaded");
        Ok(brand)
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

fn read_toml(id: &str, path: &Path) -> Result<Option<toml::Value>, BrandError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(BrandError::Io {
                brand_id: id.to_string(),
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&text)
        .map(Some)
        .map_err(|source| BrandError::Toml {
            brand_id: id.to_string(),
            source,
        })
}

fn ensure_unlocked(id: &str, protection: &ProtectionState) -> Result<(), BrandError> {
    if protection.is_locked() {
        return Err(BrandError::Protected {
            brand_id: id.to_string(),
            level: protection.level,
        });
    }
    Ok(())
}

/// Raw `brand.toml` and `protection.toml` contents.
struct BrandLayers {
    file: toml::Value,
    sidecar: Option<toml::Value>,
}

fn read_brand_layers(id: &str, dir: &Path) -> Result<BrandLayers, BrandError> {
    let file = read_toml(id, &dir.join(BRAND_FILE_NAME))?.ok_or_else(|| BrandError::NotFound {
        brand_id: id.to_string(),
    })?;
    let sidecar = read_toml(id, &dir.join(PROTECTION_FILE_NAME))?;
    Ok(BrandLayers { file, sidecar })
}

/// Layer stock defaults, `file` and the protection sidecar into a [`BrandFile`].
///
/// The sidecar replaces `[protection]` outright, so no field of a lock
/// written in `brand.toml` survives an unlock.
fn brand_file_from(
    id: &str,
    file: toml::Value,
    sidecar: Option<toml::Value>,
) -> Result<BrandFile, BrandError> {
    let stock = toml::Value::try_from(BrandFile::default()).map_err(|source| {
        BrandError::Serialize {
            brand_id: id.to_string(),
            source,
        }
    })?;
    let mut merged = merge_toml(stock, file);
    if let (Some(sidecar), toml::Value::Table(table)) = (sidecar, &mut merged) {
        table.insert("protection".to_string(), sidecar);
    }
    merged.try_into().map_err(|source| BrandError::Toml {
        brand_id: id.to_string(),
        source,
    })
}

/// Merge the three layers into a typed [`BrandFile`].
pub fn load_brand_file(id: &str, dir: &Path) -> Result<BrandFile, BrandError> {
    let layers = read_brand_layers(id, dir)?;
    brand_file_from(id, layers.file, layers.sidecar)
}

/// Resolve `relative` inside `root` (canonical).
///
/// Returns `Ok(None)` when the path is well-formed but nothing exists there.
fn resolve_within(id: &str, root: &Path, relative: &str) -> Result<Option<PathBuf>, BrandError> {
    let isolation = || BrandError::Isolation {
        brand_id: id.to_string(),
        path: relative.to_string(),
    };
    let rel = Path::new(relative);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(isolation());
    }
    match root.join(rel).canonicalize() {
        Ok(real) if real.starts_with(root) => Ok(Some(real)),
        Ok(_) => Err(isolation()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BrandError::Io {
            brand_id: id.to_string(),
            path: root.join(rel),
            source,
        }),
    }
}

/// Resolve every declared path of one table, recording missing files as problems.
fn resolve_paths(
    id: &str,
    root: &Path,
    section: &str,
    declared: &BTreeMap<String, String>,
    problems: &mut Vec<String>,
) -> Result<BTreeMap<String, PathBuf>, BrandError> {
    let mut resolved = BTreeMap::new();
    for (name, relative) in declared {
        if relative.trim().is_empty() {
            problems.push(format!("{section}.{name} is empty"));
            continue;
        }
        match resolve_within(id, root, relative)? {
            Some(path) if path.is_file() => {
                resolved.insert(name.clone(), path);
            }
            Some(_) => problems.push(format!("{section}.{name}: '{relative}' is not a file")),
            None => problems.push(format!("{section}.{name}: '{relative}' does not exist")),
        }
    }
    Ok(resolved)
}

/// Build a validated [`BrandConfig`] from the brand directory `dir` (canonical).
pub fn build_brand(id: &str, dir: &Path) -> Result<BrandConfig, BrandError> {
    validate_brand(id, dir, load_brand_file(id, dir)?)
}

fn validate_brand(id: &str, dir: &Path, file: BrandFile) -> Result<BrandConfig, BrandError> {
    let mut problems = Vec::new();

    if file.brand.name.trim().is_empty() {
        problems.push("brand.name is required".to_string());
    }
    match file.colors.get("primary") {
        None => problems.push("colors.primary is required".to_string()),
        Some(c) if c.trim().is_empty() => problems.push("colors.primary is empty".to_string()),
        Some(_) => {}
    }
    for (role, color) in &file.colors {
        if role != "primary" && color.trim().is_empty() {
            problems.push(format!("colors.{role} is empty"));
        }
    }
    if file.typography.primary_font.trim().is_empty() {
        problems.push("typography.primary_font is empty".to_string());
    }

    let mut assets = resolve_paths(id, dir, "assets", &file.assets, &mut problems)?;
    let stylesheet_path = assets.remove(config::STYLESHEET_ASSET);
    let template_overrides = resolve_paths(id, dir, "templates", &file.templates, &mut problems)?;

    let template_known =
        |name: &str| is_builtin_template(name) || file.templates.contains_key(name);
    let default_template = file.brand.default_template.trim().to_string();
    if default_template.is_empty() {
        problems.push("brand.default_template is empty".to_string());
    } else if !template_known(&default_template) {
        problems.push(format!(
            "brand.default_template '{default_template}' is neither built in nor declared in [templates]"
        ));
    }
    for name in file.template_options.keys() {
        if !template_known(name) {
            problems.push(format!(
                "template_options.{name} refers to an unknown template"
            ));
        }
    }

    if let Err(pdf_problems) = PdfOptions::resolve(&[&file.pdf]) {
        problems.extend(pdf_problems.into_iter().map(|p| format!("pdf: {p}")));
    }

    if file.protection.level == ProtectionLevel::Strict && file.protection.locked_by.is_none() {
        problems.push("protection: a strict lock needs locked_by".to_string());
    }

    if !problems.is_empty() {
        return Err(BrandError::Validation {
            brand_id: id.to_string(),
            problems,
        });
    }

    let stylesheet_css = match &stylesheet_path {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|source| BrandError::Io {
            brand_id: id.to_string(),
            path: path.clone(),
            source,
        })?),
        None => None,
    };

    let typography = file.typography;
    let fallback = typography.fallback.clone();
    let primary = FontSpec {
        family: typography.primary_font.clone(),
        fallback: fallback.clone(),
    };
    let secondary = FontSpec {
        family: typography
            .secondary_font
            .clone()
            .unwrap_or_else(|| typography.primary_font.clone()),
        fallback,
    };
    let fonts = BTreeMap::from([
        ("primary".to_string(), primary),
        ("secondary".to_string(), secondary),
    ]);

    let template_options = file
        .template_options
        .into_iter()
        .map(|(name, table)| (name, toml_table_to_json(table)))
        .collect();

    Ok(BrandConfig {
        id: id.to_string(),
        root: dir.to_path_buf(),
        name: file.brand.name,
        tagline: file.brand.tagline,
        website: file.brand.website,
        default_template,
        colors: file.colors,
        fonts,
        font_sizes: typography.sizes,
        font_weights: typography.weights,
        layout: file.layout,
        asset_paths: assets,
        stylesheet_path,
        stylesheet_css,
        template_overrides,
        template_options,
        pdf: file.pdf,
        protection: file.protection,
    })
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(toml_table_to_json(table)),
    }
}

fn toml_table_to_json(table: toml::Table) -> serde_json::Map<String, serde_json::Value> {
    table
        .into_iter()
        .map(|(k, v)| (k, toml_to_json(v)))
        .collect()
}
