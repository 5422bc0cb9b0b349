//! Artifact and asset persistence.
//!
//! [`Storage`] is the seam between the pipeline and wherever PDFs end up.
//! [`LocalStorage`] maps keys onto a directory tree:
//!
//! ```text
//! <root>/
//! ├── acme/
//! │   ├── 20240301T101500.218004Z-3f2a9c1b7d4e-5d0e7a13.pdf
//! │   └── 20240301T101500.218004Z-3f2a9c1b7d4e-5d0e7a13.pdf.meta.json
//! ```
//!
//! Writes go to a temporary file in the target directory and are renamed
//! into place, so a reader sees either the old object or the complete new
//! one. The metadata sidecar is persisted before the object itself.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

const META_SUFFIX: &str = ".meta.json";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("object not found: {0}")]
    NotFound(Locator),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error for {locator}: {source}")]
    Metadata {
        locator: Locator,
        #[source]
        source: serde_json::Error,
    },
}

/// Where a stored object lives. Opaque to callers beyond its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub key: String,
}

impl Locator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// A persistence backend for generated artifacts and brand assets.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist `bytes` under `key`, replacing any previous object.
    async fn store(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &Map<String, Value>,
    ) -> Result<Locator, StorageError>;

    async fn retrieve(&self, locator: &Locator) -> Result<Bytes, StorageError>;

    /// Remove an object and its metadata. Missing objects are treated as success.
    async fn delete(&self, locator: &Locator) -> Result<(), StorageError>;

    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError>;

    /// Metadata recorded at store time, if any.
    async fn metadata(&self, locator: &Locator) -> Result<Map<String, Value>, StorageError>;
}

/// Filesystem-backed storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Storage rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path for a locator.
    pub fn path_of(&self, locator: &Locator) -> Result<PathBuf, StorageError> {
        self.resolve(&locator.key)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason| StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        let relative = Path::new(key);
        if relative.is_absolute() {
            return Err(invalid("key must be relative"));
        }
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    if part.to_string_lossy().starts_with(TEMP_PREFIX) {
                        return Err(invalid("key uses the reserved temporary prefix"));
                    }
                }
                Component::CurDir => {}
                Component::ParentDir => return Err(invalid("key must not contain '..'")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("key must be relative"));
                }
            }
        }
        if key.ends_with(META_SUFFIX) {
            return Err(invalid("key uses the reserved metadata suffix"));
        }
        if key.ends_with('/') {
            return Err(invalid("key names a directory"));
        }
        Ok(self.root.join(relative))
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

/// Write `bytes` to `path` through a temporary file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &Map<String, Value>,
    ) -> Result<Locator, StorageError> {
        let locator = Locator::new(key);
        let path = self.resolve(key)?;
        let meta = serde_json::to_vec_pretty(metadata).map_err(|source| StorageError::Metadata {
            locator: locator.clone(),
            source,
        })?;
        let size = bytes.len();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            write_atomic(&sidecar_path(&path), &meta)?;
            write_atomic(&path, &bytes)
        })
        .await
        .map_err(std::io::Error::other)??;

        tracing::debug!(key, size_bytes = size, "stored object");
        Ok(locator)
    }

    async fn retrieve(&self, locator: &Locator) -> Result<Bytes, StorageError> {
        let path = self.resolve(&locator.key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(locator.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, locator: &Locator) -> Result<(), StorageError> {
        let path = self.resolve(&locator.key)?;
        remove_if_present(&path).await?;
        remove_if_present(&sidecar_path(&path)).await
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError> {
        let path = self.resolve(&locator.key)?;
        Ok(fs::try_exists(&path).await? && fs::metadata(&path).await?.is_file())
    }

    async fn metadata(&self, locator: &Locator) -> Result<Map<String, Value>, StorageError> {
        let path = sidecar_path(&self.resolve(&locator.key)?);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(locator.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&raw).map_err(|source| StorageError::Metadata {
            locator: locator.clone(),
            source,
        })
    }
}
