//! # Brand PDF
//!
//! Turns Markdown documents into brand-consistent PDFs. Each brand is a
//! directory of configuration, assets and template overrides; a document is
//! Markdown with optional YAML front-matter. The two meet in an HTML template
//! that a headless Chrome session prints to PDF.
//!
//! # Architecture
//!
//! ```text
//! 1. Parse     input.md         →  ContentRecord     (front-matter + body)
//! 2. Resolve   brands/<id>/     →  BrandConfig       (validated, cached)
//! 3. Context   record + brand   →  RenderContext     (layered values)
//! 4. Render    context          →  RenderedDocument  (HTML via Tera)
//! 5. Print     HTML + options   →  PdfArtifact       (pooled Chrome sessions)
//! 6. Store     artifact         →  Locator           (output/<id>/<key>.pdf)
//! ```
//!
//! Stages 1 to 4 are synchronous and pure apart from brand loading, so they
//! are tested without a browser. Stage 5 talks to Chrome through the
//! [`pdf::RenderBackend`] trait; tests swap in a scripted mock.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`content`] | Front-matter splitting, Markdown to HTML, word counts |
//! | [`brand`] | Brand registry: discovery, validation, isolation, assets, protection locks |
//! | [`context`] | Template selection and the layered render context |
//! | [`render`] | Built-in Tera templates, brand overrides, template validation |
//! | [`pdf`] | Page options, the session pool, the Chrome backend, the PDF engine |
//! | [`storage`] | Key/value artifact storage with a local filesystem implementation |
//! | [`pipeline`] | End-to-end orchestration and the unified error taxonomy |
//! | [`config`] | `brand-pdf.toml` loading, stock defaults, validation |
//! | [`telemetry`] | `tracing` subscriber setup |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Brand Isolation
//!
//! Every path a brand names (assets, stylesheet, template overrides) is
//! canonicalized and must stay inside that brand's directory. Symlinks out of
//! the brand and `..` segments are rejected at load time, not at render time,
//! so a loaded [`brand::BrandConfig`] only ever points at its own files.
//!
//! ## Reserved `brand` Namespace
//!
//! Document front-matter is merged into the render context last, but it can
//! never write to `brand`, `brand.*` or the brand-derived `hasLogo`,
//! `brand_css` and `css_variables`. A document that tries is rejected rather
//! than silently filtered, so authors find out.
//!
//! ## Bounded Session Pool
//!
//! Chrome is expensive to start and easy to leak. [`pdf::SessionPool`] caps
//! live sessions, hands each one to a single render at a time, recycles
//! sessions after a render count or idle period, and discards any session
//! whose render failed or timed out. Callers wait up to the acquire timeout
//! and then get [`pdf::PoolError::Exhausted`].

pub mod brand;
pub mod config;
pub mod content;
pub mod context;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod render;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_helpers;
