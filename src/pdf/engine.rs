//! HTML to PDF conversion on top of the session pool.
//!
//! One `generate` call:
//!
//! 1. Resolve page options: engine `[pdf]` ← brand `[pdf]` ← request.
//!    Invalid options fail here, before any session is touched.
//! 2. Acquire a lease (queue wait bounded by `acquire_timeout_ms`).
//! 3. Print under `render_timeout_ms`. A transient failure is retried in the
//!    same session up to `transient_retries` times.
//! 4. Check the bytes look like a PDF with at least one page.
//! 5. Release the session, or discard it on any failure.

use super::backend::{BackendError, PrintJob, RenderBackend};
use super::chrome::ChromeBackend;
use super::options::{PdfOptions, PdfOverrides};
use super::pool::{PoolError, PoolStats, SessionPool};
use crate::brand::BrandConfig;
use crate::config::EngineConfig;
use crate::render::RenderedDocument;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum GenerationCause {
    #[error("render timed out after {0}ms")]
    Timeout(u64),
    #[error(transparent)]
    Backend(BackendError),
    #[error("corrupt output: {0}")]
    Corrupt(&'static str),
}

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Invalid PDF options for brand {brand_id}:\n{}", bullets(problems))]
    InvalidOptions {
        brand_id: String,
        problems: Vec<String>,
    },
    #[error("No rendering session for brand {brand_id} within {waited_ms}ms")]
    PoolExhausted { brand_id: String, waited_ms: u64 },
    #[error("PDF engine is closed (brand {brand_id})")]
    PoolClosed { brand_id: String },
    #[error("PDF generation failed for brand {brand_id} (template {template}): {cause}")]
    Generation {
        brand_id: String,
        template: String,
        cause: GenerationCause,
    },
}

fn bullets(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A generated PDF plus what produced it.
#[derive(Debug, Clone, Serialize)]
pub struct PdfArtifact {
    #[serde(skip)]
    pub bytes: Bytes,
    pub size_bytes: u64,
    pub page_count: usize,
    pub brand_id: String,
    pub template_name: String,
    /// SHA-256 over the HTML and the resolved options, hex encoded.
    pub source_content_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub options: PdfOptions,
}

pub struct PdfEngine {
    pool: SessionPool,
    defaults: PdfOverrides,
    render_timeout: Duration,
    transient_retries: u32,
}

impl PdfEngine {
    pub fn new(backend: Arc<dyn RenderBackend>, config: &EngineConfig) -> Self {
        Self {
            pool: SessionPool::new(backend, config.pool.clone()),
            defaults: config.pdf.clone(),
            render_timeout: config.pool.render_timeout(),
            transient_retries: config.pool.transient_retries,
        }
    }

    /// Engine backed by headless Chrome, with background maintenance running.
    pub fn with_chrome(config: &EngineConfig) -> Self {
        let idle_timeout = config.pool.max_idle() + config.pool.maintenance_interval() * 2;
        let backend = ChromeBackend::new(config.chrome.clone(), idle_timeout);
        let engine = Self::new(Arc::new(backend), config);
        engine.pool.spawn_maintenance();
        engine
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn resolve_options(
        &self,
        brand: &BrandConfig,
        request: &PdfOverrides,
    ) -> Result<PdfOptions, PdfError> {
        PdfOptions::resolve(&[&self.defaults, &brand.pdf, request]).map_err(|problems| {
            PdfError::InvalidOptions {
                brand_id: brand.id.clone(),
                problems,
            }
        })
    }

    pub async fn generate(
        &self,
        doc: &RenderedDocument,
        brand: &BrandConfig,
        request: &PdfOverrides,
    ) -> Result<PdfArtifact, PdfError> {
        let options = self.resolve_options(brand, request)?;
        let source_content_hash = content_hash(&doc.html, &options);
        let job = PrintJob {
            html: doc.html.clone(),
            header_html: options.header.then(|| header_html(brand)),
            footer_html: options.footer.then(|| footer_html(brand)),
            options,
        };
        let failed = |cause| PdfError::Generation {
            brand_id: doc.brand_id.clone(),
            template: doc.template_name.clone(),
            cause,
        };

        let started = Instant::now();
        let mut lease = self.pool.acquire().await.map_err(|err| match err {
            PoolError::Exhausted { waited_ms } => PdfError::PoolExhausted {
                brand_id: doc.brand_id.clone(),
                waited_ms,
            },
            PoolError::Closed => PdfError::PoolClosed {
                brand_id: doc.brand_id.clone(),
            },
            PoolError::Backend(err) => failed(GenerationCause::Backend(err)),
        })?;
        let session_id = lease.session_id();

        let mut attempt = 0;
        let (bytes, page_count) = loop {
            let printed = tokio::time::timeout(self.render_timeout, lease.print(&job)).await;
            let cause = match printed {
                Err(_) => GenerationCause::Timeout(self.render_timeout.as_millis() as u64),
                Ok(Ok(bytes)) => match inspect_pdf(&bytes) {
                    Ok(pages) => break (bytes, pages),
                    Err(reason) => GenerationCause::Corrupt(reason),
                },
                Ok(Err(err)) if err.is_transient() && attempt < self.transient_retries => {
                    attempt += 1;
                    warn!(
                        brand_id = %doc.brand_id,
                        session_id = ?session_id,
                        attempt,
                        error = %err,
                        "transient render failure; retrying"
                    );
                    continue;
                }
                Ok(Err(err)) => GenerationCause::Backend(err),
            };
            warn!(
                brand_id = %doc.brand_id,
                template = %doc.template_name,
                session_id = ?session_id,
                cause = %cause,
                "render failed; discarding session"
            );
            lease.discard().await;
            return Err(failed(cause));
        };
        lease.release().await;

        info!(
            brand_id = %doc.brand_id,
            template = %doc.template_name,
            session_id = ?session_id,
            page_count,
            size_bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pdf generated"
        );
        Ok(PdfArtifact {
            size_bytes: bytes.len() as u64,
            bytes: Bytes::from(bytes),
            page_count,
            brand_id: doc.brand_id.clone(),
            template_name: doc.template_name.clone(),
            source_content_hash,
            created_at: OffsetDateTime::now_utc(),
            options: job.options,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub fn content_hash(html: &str, options: &PdfOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(html.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(options).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// Reject empty or non-PDF output and count page objects.
pub fn inspect_pdf(bytes: &[u8]) -> Result<usize, &'static str> {
    if bytes.is_empty() {
        return Err("empty output");
    }
    if !bytes.starts_with(b"%PDF-") {
        return Err("missing %PDF- header");
    }
    match count_pages(bytes) {
        0 => Err("no pages"),
        pages => Ok(pages),
    }
}

/// Count `/Type /Page` dictionaries, skipping `/Type /Pages` tree nodes.
fn count_pages(bytes: &[u8]) -> usize {
    const TYPE: &[u8] = b"/Type";
    const PAGE: &[u8] = b"/Page";
    let mut count = 0;
    let mut rest = bytes;
    while let Some(at) = find(rest, TYPE) {
        rest = &rest[at + TYPE.len()..];
        let value = rest.trim_ascii_start();
        if value.starts_with(PAGE) && !value[PAGE.len()..].first().is_some_and(u8::is_ascii_alphanumeric) {
            count += 1;
        }
    }
    count
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn band_style(brand: &BrandConfig) -> String {
    let font = brand
        .primary_font()
        .map(|f| f.css_stack())
        .unwrap_or_else(|| "sans-serif".into());
    let color = brand.colors.get("primary").map(String::as_str).unwrap_or("#333");
    tera::escape_html(&format!(
        "width:100%;font-size:9px;padding:0 0.5in;font-family:{font};color:{color};"
    ))
}

/// Chrome header band: the brand name.
pub fn header_html(brand: &BrandConfig) -> String {
    format!(
        r#"<div style="{}">{}</div>"#,
        band_style(brand),
        tera::escape_html(&brand.name)
    )
}

/// Chrome footer band: page x of y.
pub fn footer_html(brand: &BrandConfig) -> String {
    format!(
        r#"<div style="{}text-align:center;">Page <span class="pageNumber"></span> of <span class="totalPages"></span></div>"#,
        band_style(brand)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;
    use crate::context;
    use crate::pdf::backend::mock::{MockBackend, MockOutcome, fake_pdf};
    use crate::render;
    use crate::test_helpers::acme_registry;

    fn engine(backend: &MockBackend, pool: crate::config::PoolSettings) -> PdfEngine {
        let config = EngineConfig {
            pool,
            ..EngineConfig::default()
        };
        PdfEngine::new(Arc::new(backend.clone()), &config)
    }

    fn acme_doc() -> (tempfile::TempDir, Arc<BrandConfig>, RenderedDocument) {
        let (tmp, registry) = acme_registry();
        let brand = registry.load_brand("acme").unwrap();
        let record = content::parse("---\ntitle: Test\n---\n# Hi").unwrap();
        let ctx = context::prepare(&record, &brand, None).unwrap();
        let doc = render::render(&brand, &ctx).unwrap();
        (tmp, brand, doc)
    }

    #[tokio::test]
    async fn generates_artifact_with_pages_and_hash() {
        let backend = MockBackend::with_script(vec![MockOutcome::Pdf(fake_pdf(3))]);
        let engine = engine(&backend, Default::default());
        let (_tmp, brand, doc) = acme_doc();

        let artifact = engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap();
        assert_eq!(artifact.page_count, 3);
        assert_eq!(artifact.size_bytes, artifact.bytes.len() as u64);
        assert_eq!(artifact.brand_id, "acme");
        assert_eq!(artifact.template_name, "document");
        assert_eq!(artifact.source_content_hash.len(), 64);
        assert_eq!(
            artifact.source_content_hash,
            content_hash(&doc.html, &artifact.options)
        );
        assert_eq!(engine.stats().idle, 1);
    }

    #[tokio::test]
    async fn hash_depends_on_options() {
        let html = "<p>x</p>";
        let a = PdfOptions::default();
        let b = PdfOptions {
            scale: 0.5,
            ..PdfOptions::default()
        };
        assert_eq!(content_hash(html, &a), content_hash(html, &a));
        assert_ne!(content_hash(html, &a), content_hash(html, &b));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_acquisition() {
        let backend = MockBackend::new();
        let engine = engine(&backend, Default::default());
        let (_tmp, brand, doc) = acme_doc();
        let request = PdfOverrides {
            page_size: Some("B7".into()),
            scale: Some(9.0),
            ..Default::default()
        };

        let err = engine.generate(&doc, &brand, &request).await.unwrap_err();
        let PdfError::InvalidOptions { problems, .. } = err else {
            panic!("expected invalid options, got {err:?}");
        };
        assert_eq!(problems.len(), 2);
        assert_eq!(backend.launches(), 0);
        assert_eq!(engine.stats().peak_active, 0);
    }

    #[tokio::test]
    async fn request_options_override_brand_and_engine() {
        let backend = MockBackend::new();
        let config = EngineConfig {
            pdf: PdfOverrides {
                page_size: Some("A4".into()),
                footer: Some(true),
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        let engine = PdfEngine::new(Arc::new(backend.clone()), &config);
        let (_tmp, brand, doc) = acme_doc();
        let request = PdfOverrides {
            orientation: Some("landscape".into()),
            ..Default::default()
        };

        engine.generate(&doc, &brand, &request).await.unwrap();
        let job = &backend.recorded()[0].job;
        assert_eq!(job.options.page_size, super::super::options::PageSize::A4);
        assert_eq!(job.options.orientation, super::super::options::Orientation::Landscape);
        assert!(job.header_html.is_none());
        let footer = job.footer_html.as_deref().unwrap();
        assert!(footer.contains(r#"class="pageNumber""#));
    }

    #[tokio::test]
    async fn transient_failure_retried_once_in_same_session() {
        let backend = MockBackend::with_script(vec![MockOutcome::Transient]);
        let engine = engine(&backend, Default::default());
        let (_tmp, brand, doc) = acme_doc();

        engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap();
        let sessions: Vec<usize> = backend.recorded().iter().map(|r| r.session_id).collect();
        assert_eq!(sessions, vec![0, 0]);
        assert_eq!(backend.launches(), 1);
        assert_eq!(backend.closes(), 0);
    }

    #[tokio::test]
    async fn second_transient_failure_discards_session() {
        let backend = MockBackend::with_script(vec![MockOutcome::Transient, MockOutcome::Transient]);
        let engine = engine(&backend, Default::default());
        let (_tmp, brand, doc) = acme_doc();

        let err = engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PdfError::Generation {
                cause: GenerationCause::Backend(BackendError::Transient(_)),
                ..
            }
        ));
        assert_eq!(backend.prints(), 2);
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let backend = MockBackend::with_script(vec![MockOutcome::Fatal]);
        let engine = engine(&backend, Default::default());
        let (_tmp, brand, doc) = acme_doc();

        let err = engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PdfError::Generation { .. }));
        assert_eq!(backend.prints(), 1);
    }

    #[tokio::test]
    async fn corrupt_output_is_a_failure() {
        for (bytes, reason) in [
            (Vec::new(), "empty output"),
            (b"<html>".to_vec(), "missing %PDF- header"),
            (fake_pdf(0), "no pages"),
        ] {
            let backend = MockBackend::with_script(vec![MockOutcome::Pdf(bytes)]);
            let engine = engine(&backend, Default::default());
            let (_tmp, brand, doc) = acme_doc();
            let err = engine
                .generate(&doc, &brand, &PdfOverrides::default())
                .await
                .unwrap_err();
            assert!(
                matches!(&err, PdfError::Generation { cause: GenerationCause::Corrupt(r), .. } if *r == reason),
                "{err:?}"
            );
            assert_eq!(backend.closes(), 1);
        }
    }

    #[tokio::test]
    async fn render_timeout_replaces_only_that_session() {
        let backend = MockBackend::with_script(vec![MockOutcome::Hang]);
        let engine = engine(
            &backend,
            crate::config::PoolSettings {
                render_timeout_ms: 30,
                ..Default::default()
            },
        );
        let (_tmp, brand, doc) = acme_doc();

        let err = engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PdfError::Generation {
                cause: GenerationCause::Timeout(30),
                ..
            }
        ));
        assert_eq!(backend.closes(), 1);

        let artifact = engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap();
        assert!(artifact.page_count >= 1);
        assert_eq!(engine.stats().closed, 1);
    }

    #[tokio::test]
    async fn closed_engine_rejects_requests() {
        let backend = MockBackend::new();
        let engine = engine(&backend, Default::default());
        let (_tmp, brand, doc) = acme_doc();
        engine.close().await;
        let err = engine
            .generate(&doc, &brand, &PdfOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PdfError::PoolClosed { ref brand_id } if brand_id == "acme"));
    }

    #[test]
    fn page_counting_skips_page_tree_nodes() {
        assert_eq!(count_pages(&fake_pdf(2)), 2);
        assert_eq!(count_pages(b"%PDF-1.4 <</Type/Page>> <</Type /Pages>>"), 1);
        assert_eq!(count_pages(b"%PDF-1.4 <</Type\n/Page /Parent 2 0 R>>"), 1);
    }

    #[test]
    fn header_escapes_brand_name() {
        let (_tmp, registry) = acme_registry();
        let mut brand = (*registry.load_brand("acme").unwrap()).clone();
        brand.name = "<Acme & Co>".into();
        let header = header_html(&brand);
        assert!(header.contains("&lt;Acme &amp; Co&gt;"));
        assert!(header.contains("#112233"));
    }
}
