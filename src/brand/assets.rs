//! Asset listing and protected asset writes.
//!
//! Writes go through [`BrandRegistry::assert_mutable`] and a
//! [`LocalStorage`] rooted at the brand directory, so they inherit its
//! key checks and atomic rename. Cached configs are not refreshed; callers
//! that change a declared stylesheet or template reload the brand.

use super::{BACKUP_FILE_NAME, BRAND_FILE_NAME, BrandError, BrandRegistry, PROTECTION_FILE_NAME};
use crate::storage::{LocalStorage, Locator, Storage, StorageError};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Font,
    Css,
    Template,
    Other,
}

impl AssetKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => AssetKind::Image,
            "ttf" | "otf" | "woff" | "woff2" => AssetKind::Font,
            "css" => AssetKind::Css,
            "html" | "htm" | "tera" => AssetKind::Template,
            _ => AssetKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Font => "font",
            AssetKind::Css => "css",
            AssetKind::Template => "template",
            AssetKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    /// Path relative to the brand directory, `/`-separated.
    pub relative_path: String,
    pub kind: AssetKind,
    pub size_bytes: u64,
}

fn is_managed_file(relative: &str) -> bool {
    [BRAND_FILE_NAME, PROTECTION_FILE_NAME, BACKUP_FILE_NAME].contains(&relative)
}

fn is_bookkeeping(name: &str) -> bool {
    name.ends_with(".meta.json") || name.starts_with(".tmp-")
}

impl BrandRegistry {
    /// Every file in the brand directory except registry-managed files, sorted by path.
    pub fn list_assets(&self, id: &str) -> Result<Vec<AssetEntry>, BrandError> {
        let dir = self.brand_dir(id)?;
        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|err| BrandError::Io {
                brand_id: id.to_string(),
                path: err.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone()),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let file_name = entry.file_name().to_string_lossy();
            if is_managed_file(&relative_path) || is_bookkeeping(&file_name) {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(AssetEntry {
                kind: AssetKind::from_path(relative),
                relative_path,
                size_bytes,
            });
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(entries)
    }

    /// Write an asset file. Fails when the brand is locked.
    pub async fn write_asset(
        &self,
        id: &str,
        relative_path: &str,
        bytes: Bytes,
    ) -> Result<PathBuf, BrandError> {
        let (storage, locator) = self.mutable_target(id, relative_path)?;
        let mut metadata = Map::new();
        metadata.insert(
            "kind".into(),
            Value::from(AssetKind::from_path(Path::new(relative_path)).as_str()),
        );
        metadata.insert("size_bytes".into(), Value::from(bytes.len()));
        storage
            .store(&locator.key, bytes, &metadata)
            .await
            .map_err(|err| storage_error(id, relative_path, err))?;
        tracing::info!(brand_id = id, path = relative_path, "asset written");
        storage
            .path_of(&locator)
            .map_err(|err| storage_error(id, relative_path, err))
    }

    /// Delete an asset file. Fails when the brand is locked.
    pub async fn delete_asset(&self, id: &str, relative_path: &str) -> Result<(), BrandError> {
        let (storage, locator) = self.mutable_target(id, relative_path)?;
        if !storage
            .exists(&locator)
            .await
            .map_err(|err| storage_error(id, relative_path, err))?
        {
            return Err(storage_error(
                id,
                relative_path,
                StorageError::NotFound(locator),
            ));
        }
        storage
            .delete(&locator)
            .await
            .map_err(|err| storage_error(id, relative_path, err))?;
        tracing::info!(brand_id = id, path = relative_path, "asset deleted");
        Ok(())
    }

    fn mutable_target(
        &self,
        id: &str,
        relative_path: &str,
    ) -> Result<(LocalStorage, Locator), BrandError> {
        self.assert_mutable(id)?;
        let normalized = relative_path.trim_start_matches("./");
        if is_managed_file(normalized) {
            return Err(BrandError::ReservedPath {
                brand_id: id.to_string(),
                path: relative_path.to_string(),
            });
        }
        let dir = self.brand_dir(id)?;
        let storage = LocalStorage::new(&dir);
        let locator = Locator::new(normalized);
        let target = storage
            .path_of(&locator)
            .map_err(|err| storage_error(id, relative_path, err))?;
        ensure_inside(id, &dir, &target, relative_path)?;
        Ok((storage, locator))
    }
}

/// The deepest existing ancestor of `target` must resolve inside `dir`,
/// which catches symlinked sub-directories.
fn ensure_inside(id: &str, dir: &Path, target: &Path, relative: &str) -> Result<(), BrandError> {
    let mut ancestor = target;
    loop {
        if let Ok(real) = ancestor.canonicalize() {
            return if real.starts_with(dir) {
                Ok(())
            } else {
                Err(BrandError::Isolation {
                    brand_id: id.to_string(),
                    path: relative.to_string(),
                })
            };
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => return Ok(()),
        }
    }
}

fn storage_error(id: &str, relative: &str, err: StorageError) -> BrandError {
    match err {
        StorageError::InvalidKey { .. } => BrandError::Isolation {
            brand_id: id.to_string(),
            path: relative.to_string(),
        },
        other => BrandError::Storage {
            brand_id: id.to_string(),
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brand::ProtectionLevel;
    use crate::test_helpers::{BrandFixture, acme_registry};
    use tempfile::TempDir;

    #[test]
    fn list_assets_skips_managed_files() {
        let tmp = TempDir::new().unwrap();
        BrandFixture::new("acme")
            .asset("logo", "assets/logo.svg", b"<svg/>")
            .template("letter", "{{ content | safe }}")
            .write(tmp.path());
        let registry = BrandRegistry::new(tmp.path());
        registry
            .lock_brand("acme", "u", None, ProtectionLevel::Moderate)
            .unwrap();

        let assets = registry.list_assets("acme").unwrap();
        let paths: Vec<&str> = assets.iter().map(|a| a.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["assets/logo.svg", "templates/letter.html"]);
        assert_eq!(assets[0].kind, AssetKind::Image);
        assert_eq!(assets[0].size_bytes, 6);
        assert_eq!(assets[1].kind, AssetKind::Template);
    }

    #[tokio::test]
    async fn write_and_delete_when_unlocked() {
        let (tmp, registry) = acme_registry();
        let path = registry
            .write_asset("acme", "assets/new.css", Bytes::from_static(b"p{}"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"p{}");
        assert!(path.starts_with(tmp.path().canonicalize().unwrap()));

        registry.delete_asset("acme", "assets/new.css").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn locked_brand_rejects_writes() {
        let (tmp, registry) = acme_registry();
        registry
            .lock_brand("acme", "u", Some("frozen"), ProtectionLevel::Strict)
            .unwrap();
        let err = registry
            .write_asset("acme", "assets/evil.css", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrandError::Protected { .. }));
        assert!(!tmp.path().join("acme/assets/evil.css").exists());

        let err = registry.delete_asset("acme", "brand.toml").await.unwrap_err();
        assert!(matches!(err, BrandError::Protected { .. }));
    }

    #[tokio::test]
    async fn managed_files_are_reserved() {
        let (_tmp, registry) = acme_registry();
        for path in ["brand.toml", "protection.toml", "./protection.toml", "brand.toml.bak"] {
            let err = registry
                .write_asset("acme", path, Bytes::from_static(b"level = \"none\""))
                .await
                .unwrap_err();
            assert!(matches!(err, BrandError::ReservedPath { .. }), "{path}");
        }
    }

    #[tokio::test]
    async fn escaping_writes_are_isolation() {
        let (tmp, registry) = acme_registry();
        for path in ["../other/x.css", "/tmp/x.css"] {
            let err = registry
                .write_asset("acme", path, Bytes::from_static(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, BrandError::Isolation { .. }), "{path}");
        }
        assert!(!tmp.path().join("other").exists());
    }

    #[tokio::test]
    async fn delete_missing_asset_is_storage_not_found() {
        let (_tmp, registry) = acme_registry();
        let err = registry.delete_asset("acme", "assets/none.png").await.unwrap_err();
        assert!(matches!(
            err,
            BrandError::Storage {
                source: StorageError::NotFound(_),
                ..
            }
        ));
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(AssetKind::from_path(Path::new("a/B.WOFF2")), AssetKind::Font);
        assert_eq!(AssetKind::from_path(Path::new("x.css")), AssetKind::Css);
        assert_eq!(AssetKind::from_path(Path::new("README")), AssetKind::Other);
    }
}
