//! CLI output formatting.
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.
//!
//! # Output Format
//!
//! ## Generate
//!
//! ```text
//! Acme Corp / document → output/acme/20261014T093000.412907Z-3f2a9c01d4e7-9b1c04e2.pdf
//!     Pages: 3
//!     Size: 41.2 KB
//!     Hash: 3f2a9c01d4e7
//! ```
//!
//! ## Check
//!
//! ```text
//! Acme Corp (acme)
//!     Tagline: Quality since 1901
//!     Default template: document
//!     Colors: primary #112233
//!     Fonts: primary 'Helvetica', sans-serif
//!     Logo: none
//!     Templates: cover, document, letter, report
//!     Protection: none
//! ```
//!
//! ## List brands
//!
//! ```text
//! 001 Acme Corp (acme)
//! 002 (broken) error: brand broken is invalid: ...
//! ```

use crate::brand::{BrandConfig, ProtectionLevel, ProtectionState};
use crate::pipeline::{GenerationOutcome, PipelineError};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte size: `512 B`, `41.2 KB`, `3.0 MB`.
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

/// One-line protection summary.
pub fn describe_protection(state: &ProtectionState) -> String {
    if state.level == ProtectionLevel::None {
        return "none".to_string();
    }
    let mut text = state.level.to_string();
    if let Some(by) = &state.locked_by {
        text.push_str(&format!(", locked by {by}"));
    }
    if let Some(at) = &state.locked_at {
        text.push_str(&format!(" at {at}"));
    }
    if let Some(reason) = &state.reason {
        text.push_str(&format!(" ({reason})"));
    }
    text
}

// ============================================================================
// Generate
// ============================================================================

pub fn format_generate_output(
    outcome: &GenerationOutcome,
    brand_name: &str,
    output_root: &Path,
) -> Vec<String> {
    let artifact = &outcome.artifact;
    let hash = &artifact.source_content_hash[..12.min(artifact.source_content_hash.len())];
    vec![
        format!(
            "{} / {} \u{2192} {}",
            brand_name,
            artifact.template_name,
            output_root.join(&outcome.locator.key).display()
        ),
        format!("{}Pages: {}", indent(1), artifact.page_count),
        format!("{}Size: {}", indent(1), format_size(artifact.size_bytes)),
        format!("{}Hash: {}", indent(1), hash),
    ]
}

pub fn print_generate_output(outcome: &GenerationOutcome, brand_name: &str, output_root: &Path) {
    for line in format_generate_output(outcome, brand_name, output_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Brand summary plus per-template warnings.
pub fn format_check_output(
    brand: &BrandConfig,
    templates: &[String],
    warnings: &[(String, Vec<String>)],
) -> Vec<String> {
    let mut lines = vec![format!("{} ({})", brand.name, brand.id)];
    let detail = indent(1);

    if let Some(tagline) = &brand.tagline {
        lines.push(format!("{detail}Tagline: {tagline}"));
    }
    if let Some(website) = &brand.website {
        lines.push(format!("{detail}Website: {website}"));
    }
    lines.push(format!("{detail}Default template: {}", brand.default_template));

    let colors: Vec<String> = brand
        .colors
        .iter()
        .map(|(role, value)| format!("{role} {value}"))
        .collect();
    lines.push(format!("{detail}Colors: {}", colors.join(", ")));

    let fonts: Vec<String> = brand
        .fonts
        .iter()
        .map(|(role, font)| format!("{role} {}", font.css_stack()))
        .collect();
    lines.push(format!("{detail}Fonts: {}", fonts.join(", ")));

    let logo = brand
        .asset_paths
        .get(crate::brand::config::LOGO_ASSET)
        .and_then(|path| path.strip_prefix(&brand.root).ok())
        .map(|rel| rel.display().to_string())
        .unwrap_or_else(|| "none".to_string());
    lines.push(format!("{detail}Logo: {logo}"));
    lines.push(format!("{detail}Templates: {}", templates.join(", ")));
    lines.push(format!(
        "{detail}Protection: {}",
        describe_protection(&brand.protection)
    ));

    let warned: Vec<_> = warnings.iter().filter(|(_, w)| !w.is_empty()).collect();
    if !warned.is_empty() {
        lines.push(format!("{detail}Warnings:"));
        for (template, messages) in warned {
            for message in messages {
                lines.push(format!("{}{template}: {message}", indent(2)));
            }
        }
    }
    lines
}

pub fn print_check_output(
    brand: &BrandConfig,
    templates: &[String],
    warnings: &[(String, Vec<String>)],
) {
    for line in format_check_output(brand, templates, warnings) {
        println!("{}", line);
    }
}

// ============================================================================
// Brands and templates
// ============================================================================

/// `entries` pairs each brand id with its display name or load error.
pub fn format_brand_list(entries: &[(String, Result<String, String>)]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["No brands found".to_string()];
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, (id, loaded))| match loaded {
            Ok(name) => format!("{} {} ({})", format_index(i + 1), name, id),
            Err(err) => format!("{} ({}) error: {}", format_index(i + 1), id, err),
        })
        .collect()
}

pub fn print_brand_list(entries: &[(String, Result<String, String>)]) {
    for line in format_brand_list(entries) {
        println!("{}", line);
    }
}

pub fn format_templates(brand: &BrandConfig, templates: &[String]) -> Vec<String> {
    let mut lines = vec![format!("Templates for {} ({})", brand.name, brand.id)];
    for (i, name) in templates.iter().enumerate() {
        let source = match brand.template_overrides.get(name) {
            Some(path) => {
                let shown = path.strip_prefix(&brand.root).unwrap_or(path);
                format!("override: {}", shown.display())
            }
            None => "built-in".to_string(),
        };
        let default = if *name == brand.default_template {
            ", default"
        } else {
            ""
        };
        lines.push(format!(
            "{}{} {} ({}{})",
            indent(1),
            format_index(i + 1),
            name,
            source,
            default
        ));
    }
    lines
}

pub fn print_templates(brand: &BrandConfig, templates: &[String]) {
    for line in format_templates(brand, templates) {
        println!("{}", line);
    }
}

pub fn format_protection(brand_id: &str, state: &ProtectionState) -> Vec<String> {
    vec![format!("{brand_id}: {}", describe_protection(state))]
}

pub fn print_protection(brand_id: &str, state: &ProtectionState) {
    for line in format_protection(brand_id, state) {
        println!("{}", line);
    }
}

// ============================================================================
// Errors
// ============================================================================

/// `error[kind]: message` plus brand/template context lines.
pub fn format_error(err: &PipelineError) -> Vec<String> {
    let mut lines = vec![format!("error[{}]: {}", err.kind(), err)];
    if let Some(brand_id) = err.brand_id() {
        lines.push(format!("{}Brand: {brand_id}", indent(1)));
    }
    if let Some(template) = err.template() {
        lines.push(format!("{}Template: {template}", indent(1)));
    }
    lines
}

pub fn print_error(err: &PipelineError) {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
}
