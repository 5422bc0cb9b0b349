//! HTML rendering through Tera.
//!
//! Each render builds a fresh `Tera` instance holding only the selected
//! template and, when it extends one, the `base` layout. One brand's templates
//! are never visible to another, and a broken override only breaks itself. Overrides replace built-ins by name, including the `base` layout.
//! Template names are registered with an `.html` suffix so autoescaping
//! applies; body HTML is emitted with `{{ content | safe }}`.
//!
//! Nothing is cached; the same context always produces the same HTML.

use crate::brand::BrandConfig;
use crate::context::RenderContext;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tera::Tera;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template '{template}' failed for brand {brand_id}: {message}")]
    Template {
        brand_id: String,
        template: String,
        message: String,
    },
    #[error("IO error reading template '{template}' for brand {brand_id}: {source}")]
    Io {
        brand_id: String,
        template: String,
        #[source]
        source: std::io::Error,
    },
}

/// A template compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTemplate {
    pub name: &'static str,
    pub source: &'static str,
}

/// Name of the shared layout; it cannot be selected directly.
pub const LAYOUT_TEMPLATE: &str = "base";

pub const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[
    BuiltinTemplate {
        name: LAYOUT_TEMPLATE,
        source: include_str!("templates/base.html"),
    },
    BuiltinTemplate {
        name: "document",
        source: include_str!("templates/document.html"),
    },
    BuiltinTemplate {
        name: "cover",
        source: include_str!("templates/cover.html"),
    },
    BuiltinTemplate {
        name: "letter",
        source: include_str!("templates/letter.html"),
    },
    BuiltinTemplate {
        name: "report",
        source: include_str!("templates/report.html"),
    },
];

pub fn is_layout_template(name: &str) -> bool {
    name == LAYOUT_TEMPLATE
}

/// Whether `name` is a selectable built-in template.
pub fn is_builtin_template(name: &str) -> bool {
    !is_layout_template(name) && BUILTIN_TEMPLATES.iter().any(|t| t.name == name)
}

/// Default variables each built-in template expects.
pub fn builtin_defaults(name: &str) -> Map<String, Value> {
    let defaults = match name {
        "document" => json!({ "show_meta": true }),
        "cover" => json!({ "show_tagline": true }),
        "letter" => json!({ "show_signature": true, "closing": "Sincerely" }),
        "report" => json!({ "show_meta": true, "confidential": false }),
        _ => json!({}),
    };
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Final HTML for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub html: String,
    pub brand_id: String,
    pub template_name: String,
    pub generated_at: OffsetDateTime,
}

fn tera_name(template: &str) -> String {
    format!("{template}.html")
}

fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Template sources visible to `brand`, overrides replacing built-ins.
fn template_sources(brand: &BrandConfig) -> Result<BTreeMap<String, String>, RenderError> {
    let mut sources: BTreeMap<String, String> = BUILTIN_TEMPLATES
        .iter()
        .map(|t| (t.name.to_string(), t.source.to_string()))
        .collect();
    for (name, path) in &brand.template_overrides {
        let source = std::fs::read_to_string(path).map_err(|source| RenderError::Io {
            brand_id: brand.id.clone(),
            template: name.clone(),
            source,
        })?;
        sources.insert(name.clone(), source);
    }
    Ok(sources)
}

fn extends_layout(source: &str) -> bool {
    source.contains("{% extends") || source.contains("{%- extends")
}

/// Compile only what `selected` needs: the layout when it extends one, then
/// the template itself. A failure names the template that failed to parse.
fn build_tera(brand: &BrandConfig, selected: &str) -> Result<Tera, RenderError> {
    let sources = template_sources(brand)?;
    let compile_error = |template: &str, err: tera::Error| RenderError::Template {
        brand_id: brand.id.clone(),
        template: template.to_string(),
        message: error_chain(&err),
    };

    let mut tera = Tera::default();
    let Some(source) = sources.get(selected) else {
        return Ok(tera);
    };
    if extends_layout(source) && selected != LAYOUT_TEMPLATE {
        if let Some(layout) = sources.get(LAYOUT_TEMPLATE) {
            tera.add_raw_template(&tera_name(LAYOUT_TEMPLATE), layout)
                .map_err(|err| compile_error(LAYOUT_TEMPLATE, err))?;
        }
    }
    tera.add_raw_template(&tera_name(selected), source)
        .map_err(|err| compile_error(selected, err))?;
    Ok(tera)
}

/// Render the context's selected template for `brand`.
pub fn render(brand: &BrandConfig, context: &RenderContext) -> Result<RenderedDocument, RenderError> {
    let template = context.template_name.as_str();
    let template_error = |err: tera::Error| RenderError::Template {
        brand_id: brand.id.clone(),
        template: template.to_string(),
        message: error_chain(&err),
    };

    let tera = build_tera(brand, template)?;
    let ctx = tera::Context::from_value(Value::Object(context.values.clone()))
        .map_err(template_error)?;
    let html = tera.render(&tera_name(template), &ctx).map_err(template_error)?;

    tracing::debug!(
        brand_id = %brand.id,
        template,
        html_bytes = html.len(),
        "template rendered"
    );
    Ok(RenderedDocument {
        html,
        brand_id: brand.id.clone(),
        template_name: template.to_string(),
        generated_at: OffsetDateTime::now_utc(),
    })
}

const EXPECTED_VARIABLES: [&str; 3] = ["content", "brand", "title"];

/// Whether `source` mentions `var` inside a `{{ }}` or `{% %}` tag.
fn references_variable(source: &str, var: &str) -> bool {
    let mut rest = source;
    while let Some(open) = rest.find(['{']) {
        let after = &rest[open + 1..];
        let close = match after.chars().next() {
            Some('{') => "}}",
            Some('%') => "%}",
            _ => {
                rest = after;
                continue;
            }
        };
        let Some(end) = after[1..].find(close).map(|i| i + 1) else {
            return false;
        };
        let tag = &after[1..end];
        let mentioned = tag
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .any(|word| word == var);
        if mentioned {
            return true;
        }
        rest = &after[end + close.len()..];
    }
    false
}

/// Check a template for problems without rendering it.
///
/// Returns warnings: compile failures and expected variables that the
/// template (or its built-in layout) never references. An empty list means
/// the template looks complete.
pub fn validate_template(brand: &BrandConfig, name: &str) -> Result<Vec<String>, RenderError> {
    let sources = template_sources(brand)?;
    let Some(source) = sources.get(name) else {
        return Ok(vec![format!("template not found: {name}")]);
    };

    let mut warnings = Vec::new();
    if let Err(RenderError::Template {
        template, message, ..
    }) = build_tera(brand, name)
    {
        warnings.push(format!("template '{template}' does not compile: {message}"));
    }

    let mut combined = source.clone();
    if source.contains("extends") {
        if let Some(layout) = sources.get(LAYOUT_TEMPLATE) {
            combined.push_str(layout);
        }
    }
    for var in EXPECTED_VARIABLES {
        if !references_variable(&combined, var) {
            warnings.push(format!("template may be missing required variable: {var}"));
        }
    }
    Ok(warnings)
}
