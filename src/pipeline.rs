//! One generation request end to end.
//!
//! ```text
//! raw content ─► content::parse ─► context::prepare ─► render::render
//!                                   (brand registry)        │
//!                                                           ▼
//!          storage.store ◄──────────────────────────── PdfEngine::generate
//! ```
//!
//! Every failure is a [`PipelineError`], which exposes a stable
//! [`ErrorKind`] plus the brand and template involved when known.

use crate::brand::{BrandError, BrandRegistry};
use crate::config::{ConfigError, EngineConfig};
use crate::content::{self, ContentError, ContentRecord};
use crate::context::{self, ContextError};
use crate::pdf::{PdfArtifact, PdfEngine, PdfError, PdfOverrides};
use crate::render::{self, RenderError};
use crate::storage::{LocalStorage, Locator, Storage, StorageError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use time::macros::format_description;
use tracing::info;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{source}")]
    Content {
        brand_id: String,
        #[source]
        source: ContentError,
    },
    #[error(transparent)]
    Brand(#[from] BrandError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error("storing PDF for brand {brand_id} failed: {source}")]
    Storage {
        brand_id: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Stable error classes for callers and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    BrandNotFound,
    BrandValidation,
    BrandIsolation,
    BrandProtected,
    AlreadyLocked,
    UnknownAsset,
    ReservedKey,
    UnknownTemplate,
    TemplateRender,
    InvalidOptions,
    PoolExhausted,
    PoolClosed,
    PdfGeneration,
    Storage,
    Io,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::BrandNotFound => "brand_not_found",
            ErrorKind::BrandValidation => "brand_validation",
            ErrorKind::BrandIsolation => "brand_isolation",
            ErrorKind::BrandProtected => "brand_protected",
            ErrorKind::AlreadyLocked => "already_locked",
            ErrorKind::UnknownAsset => "unknown_asset",
            ErrorKind::ReservedKey => "reserved_key",
            ErrorKind::UnknownTemplate => "unknown_template",
            ErrorKind::TemplateRender => "template_render",
            ErrorKind::InvalidOptions => "invalid_options",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::PoolClosed => "pool_closed",
            ErrorKind::PdfGeneration => "pdf_generation",
            ErrorKind::Storage => "storage",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    /// Attach the requested brand to a content failure.
    pub fn content(brand_id: &str, source: ContentError) -> Self {
        PipelineError::Content {
            brand_id: brand_id.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Content { source, .. } => match source {
                ContentError::MalformedInput { .. } => ErrorKind::MalformedInput,
                ContentError::Io { .. } => ErrorKind::Io,
            },
            PipelineError::Brand(err) => match err {
                BrandError::NotFound { .. } => ErrorKind::BrandNotFound,
                BrandError::InvalidId { .. } | BrandError::Isolation { .. } => {
                    ErrorKind::BrandIsolation
                }
                BrandError::Toml { .. } | BrandError::Validation { .. } => {
                    ErrorKind::BrandValidation
                }
                BrandError::Protected { .. } | BrandError::ReservedPath { .. } => {
                    ErrorKind::BrandProtected
                }
                BrandError::AlreadyLocked { .. } => ErrorKind::AlreadyLocked,
                BrandError::UnknownAsset { .. } => ErrorKind::UnknownAsset,
                BrandError::Io { .. } | BrandError::Serialize { .. } => ErrorKind::Io,
                BrandError::Storage { .. } => ErrorKind::Storage,
            },
            PipelineError::Context(ContextError::ReservedKey { .. }) => ErrorKind::ReservedKey,
            PipelineError::Context(ContextError::UnknownTemplate { .. }) => {
                ErrorKind::UnknownTemplate
            }
            PipelineError::Render(RenderError::Template { .. }) => ErrorKind::TemplateRender,
            PipelineError::Render(RenderError::Io { .. }) => ErrorKind::Io,
            PipelineError::Pdf(err) => match err {
                PdfError::InvalidOptions { .. } => ErrorKind::InvalidOptions,
                PdfError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
                PdfError::PoolClosed { .. } => ErrorKind::PoolClosed,
                PdfError::Generation { .. } => ErrorKind::PdfGeneration,
            },
            PipelineError::Storage { .. } => ErrorKind::Storage,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn brand_id(&self) -> Option<&str> {
        match self {
            PipelineError::Brand(err) => Some(err.brand_id()),
            PipelineError::Context(
                ContextError::ReservedKey { brand_id, .. }
                | ContextError::UnknownTemplate { brand_id, .. },
            )
            | PipelineError::Render(
                RenderError::Template { brand_id, .. } | RenderError::Io { brand_id, .. },
            )
            | PipelineError::Pdf(
                PdfError::InvalidOptions { brand_id, .. }
                | PdfError::PoolExhausted { brand_id, .. }
                | PdfError::PoolClosed { brand_id }
                | PdfError::Generation { brand_id, .. },
            )
            | PipelineError::Content { brand_id, .. }
            | PipelineError::Storage { brand_id, .. } => Some(brand_id.as_str()),
            _ => None,
        }
    }

    pub fn template(&self) -> Option<&str> {
        match self {
            PipelineError::Context(ContextError::UnknownTemplate { template, .. })
            | PipelineError::Render(
                RenderError::Template { template, .. } | RenderError::Io { template, .. },
            )
            | PipelineError::Pdf(PdfError::Generation { template, .. }) => Some(template.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub content: String,
    pub brand_id: String,
    pub template_name: Option<String>,
    pub options: PdfOverrides,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub artifact: PdfArtifact,
    pub locator: Locator,
}

/// Storage key: `<brand_id>/<YYYYMMDDTHHMMSS.ffffffZ>-<hash12>-<nonce8>.pdf`.
///
/// The random nonce keeps two renders of the same content in the same
/// microsecond from sharing a key.
pub fn artifact_key(artifact: &PdfArtifact) -> String {
    let stamp = artifact
        .created_at
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day]T[hour][minute][second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default();
    let hash = &artifact.source_content_hash[..12.min(artifact.source_content_hash.len())];
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{stamp}-{hash}-{}.pdf", artifact.brand_id, &nonce[..8])
}

fn artifact_metadata(artifact: &PdfArtifact, record: &ContentRecord) -> Map<String, Value> {
    let mut metadata = match serde_json::to_value(artifact) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(path) = &record.source_path {
        metadata.insert("source_path".into(), Value::from(path.display().to_string()));
    }
    metadata
}

pub struct Pipeline {
    registry: Arc<BrandRegistry>,
    engine: Arc<PdfEngine>,
    storage: Arc<dyn Storage>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<BrandRegistry>,
        engine: Arc<PdfEngine>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            registry,
            engine,
            storage,
        }
    }

    /// Registry at `paths.brands_root`, Chrome engine, local storage at
    /// `paths.output_root`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(BrandRegistry::new(&config.paths.brands_root)),
            Arc::new(PdfEngine::with_chrome(config)),
            Arc::new(LocalStorage::new(&config.paths.output_root)),
        )
    }

    pub fn registry(&self) -> &Arc<BrandRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<PdfEngine> {
        &self.engine
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, PipelineError> {
        let record = content::parse(&request.content)
            .map_err(|err| PipelineError::content(&request.brand_id, err))?;
        self.generate_record(
            &record,
            &request.brand_id,
            request.template_name.as_deref(),
            &request.options,
        )
        .await
    }

    /// Generate from an already-parsed record (e.g. from `content::parse_file`).
    pub async fn generate_record(
        &self,
        record: &ContentRecord,
        brand_id: &str,
        template_name: Option<&str>,
        options: &PdfOverrides,
    ) -> Result<GenerationOutcome, PipelineError> {
        let brand = self.registry.load_brand(brand_id)?;
        let context = context::prepare(record, &brand, template_name)?;
        let doc = render::render(&brand, &context)?;
        let artifact = self.engine.generate(&doc, &brand, options).await?;

        let key = artifact_key(&artifact);
        let locator = self
            .storage
            .store(
                &key,
                artifact.bytes.clone(),
                &artifact_metadata(&artifact, record),
            )
            .await
            .map_err(|source| PipelineError::Storage {
                brand_id: brand.id.clone(),
                source,
            })?;
        info!(
            brand_id = %brand.id,
            template = %artifact.template_name,
            locator = %locator,
            page_count = artifact.page_count,
            "document stored"
        );
        Ok(GenerationOutcome { artifact, locator })
    }

    /// Close the engine's session pool.
    pub async fn shutdown(&self) {
        self.engine.close().await;
    }
}
