//! Template context construction.
//!
//! Layers, lowest precedence first:
//!
//! | Layer           | Keys                                                      |
//! |-----------------|-----------------------------------------------------------|
//! | Template        | built-in defaults, `[template_options.<name>]`, `template_options` |
//! | Brand           | `brand.*`, `hasLogo`, `brand_css`, `css_variables`        |
//! | Content         | `content`, `title`, `subtitle`, `author`, `date`, `word_count`, `metadata`, `template` |
//! | Metadata        | every front-matter key, verbatim                          |
//!
//! The brand layer is authoritative: front-matter keys named `brand`,
//! starting with `brand.`, or naming one of [`BRAND_DERIVED_KEYS`] are
//! rejected.

use crate::brand::BrandConfig;
use crate::brand::config::CssValue;
use crate::content::ContentRecord;
use crate::render::{builtin_defaults, is_builtin_template, is_layout_template};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

pub const RESERVED_NAMESPACE: &str = "brand";

/// Top-level keys computed from the brand alongside the `brand` namespace.
pub const BRAND_DERIVED_KEYS: &[&str] = &["hasLogo", "brand_css", "css_variables"];

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("metadata key '{key}' is reserved for brand {brand_id}")]
    ReservedKey { brand_id: String, key: String },
    #[error("brand {brand_id} has no template '{template}' (available: {})", available.join(", "))]
    UnknownTemplate {
        brand_id: String,
        template: String,
        available: Vec<String>,
    },
}

/// The merged variables for one render plus the template they are for.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub template_name: String,
    pub values: Map<String, Value>,
}

impl RenderContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Follow a dotted path such as `brand.colors.primary`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = self.values.get(parts.next()?)?;
        parts.try_fold(first, |value, part| value.get(part))
    }
}

/// Print styles appended after the brand stylesheet.
pub const DEFAULT_PRINT_CSS: &str = r#"/* Default print styles */
body {
    font-family: var(--font-primary, sans-serif);
    line-height: 1.4;
    color: var(--color-text, #333);
    font-size: 11pt;
}

h1, h2, h3, h4, h5, h6 {
    font-family: var(--font-secondary, var(--font-primary, sans-serif));
    color: var(--color-primary, #1E3A8A);
    page-break-after: avoid;
    margin-top: 1em;
    margin-bottom: 0.5em;
}

.page-break {
    page-break-before: always;
}

.no-break {
    page-break-inside: avoid;
}

.info-box, .warning-box, .success-box {
    padding: 0.75em 1em;
    margin: 1em 0;
    border-left: 4px solid;
    page-break-inside: avoid;
}

.info-box {
    border-color: var(--color-primary, #1E3A8A);
    background: var(--color-info-light, #E0E7FF);
}

.warning-box {
    border-color: var(--color-warning, #F59E0B);
    background: var(--color-warning-light, #FEF3C7);
}

.success-box {
    border-color: var(--color-success, #10B981);
    background: var(--color-success-light, #D1FAE5);
}

.footer {
    margin-top: 2em;
    padding-top: 1em;
    border-top: 1px solid var(--color-text-light, #6B7280);
    font-size: 0.9em;
    color: var(--color-text-light, #6B7280);
}
"#;

fn is_reserved(key: &str) -> bool {
    BRAND_DERIVED_KEYS.contains(&key)
        || key == RESERVED_NAMESPACE
        || key
            .strip_prefix(RESERVED_NAMESPACE)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Template names available to `brand`, sorted.
fn available_templates(brand: &BrandConfig) -> Vec<String> {
    let mut names: Vec<String> = crate::render::BUILTIN_TEMPLATES
        .iter()
        .map(|t| t.name.to_string())
        .chain(brand.template_overrides.keys().cloned())
        .filter(|name| !is_layout_template(name))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Pick the template: explicit request, then `metadata.template`, then the
/// brand default. A name that is neither built in nor overridden fails.
pub fn select_template(
    requested: Option<&str>,
    content: &ContentRecord,
    brand: &BrandConfig,
) -> Result<String, ContextError> {
    let name = match (requested, content.metadata.get("template")) {
        (Some(name), _) => name.to_string(),
        (None, Some(Value::String(name))) => name.clone(),
        (None, Some(other)) => other.to_string(),
        (None, None) => brand.default_template.clone(),
    };
    let known = !is_layout_template(&name)
        && (is_builtin_template(&name) || brand.template_overrides.contains_key(&name));
    if known {
        Ok(name)
    } else {
        Err(ContextError::UnknownTemplate {
            brand_id: brand.id.clone(),
            template: name,
            available: available_templates(brand),
        })
    }
}

/// Built-in defaults for `template` overlaid with the brand's
/// `[template_options.<template>]`.
pub fn template_defaults(brand: &BrandConfig, template: &str) -> Map<String, Value> {
    let mut defaults = builtin_defaults(template);
    if let Some(options) = brand.template_options.get(template) {
        defaults.extend(options.clone());
    }
    defaults.insert(
        "template_options".to_string(),
        serde_json::to_value(&brand.template_options).unwrap_or(Value::Null),
    );
    defaults
}

fn file_url(path: &std::path::Path) -> String {
    format!("file://{}", path.display())
}

fn css_map(values: &BTreeMap<String, CssValue>) -> Map<String, Value> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.to_string())))
        .collect()
}

/// The `brand` namespace and the other brand-derived top-level keys.
fn brand_layer(brand: &BrandConfig) -> Map<String, Value> {
    let assets: Map<String, Value> = brand
        .asset_paths
        .iter()
        .map(|(name, path)| (name.clone(), Value::String(file_url(path))))
        .collect();
    let fonts: Map<String, Value> = brand
        .fonts
        .iter()
        .map(|(role, font)| {
            (
                role.clone(),
                json!({ "family": font.family, "fallback": font.fallback, "stack": font.css_stack() }),
            )
        })
        .collect();
    let css_variables = brand.css_variables();

    let mut namespace = json!({
        "id": brand.id,
        "name": brand.name,
        "tagline": brand.tagline,
        "website": brand.website,
        "colors": brand.colors,
        "fonts": fonts,
        "typography": {
            "primary_font": brand.fonts.get("primary").map(|f| f.family.clone()),
            "secondary_font": brand.fonts.get("secondary").map(|f| f.family.clone()),
            "sizes": css_map(&brand.font_sizes),
            "weights": css_map(&brand.font_weights),
        },
        "layout": css_map(&brand.layout),
        "assets": assets,
    });
    if let (Some(logo), Value::Object(ns)) =
        (brand.asset_paths.get(crate::brand::config::LOGO_ASSET), &mut namespace)
    {
        ns.insert("logo_url".to_string(), Value::String(file_url(logo)));
    }

    let mut brand_css = vec![css_variables.clone()];
    if let Some(sheet) = &brand.stylesheet_css {
        brand_css.push(sheet.clone());
    }
    brand_css.push(DEFAULT_PRINT_CSS.to_string());

    let mut layer = Map::new();
    layer.insert(RESERVED_NAMESPACE.to_string(), namespace);
    layer.insert("hasLogo".to_string(), Value::Bool(brand.has_logo()));
    layer.insert("brand_css".to_string(), Value::String(brand_css.join("\n\n")));
    layer.insert("css_variables".to_string(), Value::String(css_variables));
    layer
}

fn content_layer(content: &ContentRecord) -> Map<String, Value> {
    let today = OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default();
    let meta = |key: &str| content.metadata.get(key).cloned().unwrap_or(Value::Null);

    let mut layer = Map::new();
    layer.insert("content".into(), Value::String(content.to_html()));
    layer.insert("title".into(), Value::String(content.title().unwrap_or_default()));
    layer.insert("subtitle".into(), meta("subtitle"));
    layer.insert("author".into(), meta("author"));
    layer.insert("date".into(), meta("date"));
    layer.insert("word_count".into(), Value::from(content.word_count()));
    layer.insert("metadata".into(), Value::Object(content.metadata.clone()));
    layer.insert("generated_date".into(), Value::String(today));
    layer
}

/// Merge template defaults, brand variables, content variables and metadata.
pub fn build_context(
    content: &ContentRecord,
    brand: &BrandConfig,
    template_defaults: &Map<String, Value>,
) -> Result<Map<String, Value>, ContextError> {
    if let Some(key) = content.metadata.keys().find(|k| is_reserved(k)) {
        return Err(ContextError::ReservedKey {
            brand_id: brand.id.clone(),
            key: key.clone(),
        });
    }

    let mut values = template_defaults.clone();
    values.extend(brand_layer(brand));
    values.extend(content_layer(content));
    values.extend(
        content
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    Ok(values)
}

/// Select the template and build its full context.
pub fn prepare(
    content: &ContentRecord,
    brand: &BrandConfig,
    requested: Option<&str>,
) -> Result<RenderContext, ContextError> {
    let template_name = select_template(requested, content, brand)?;
    let defaults = template_defaults(brand, &template_name);
    let mut values = build_context(content, brand, &defaults)?;
    values.insert("template".into(), Value::String(template_name.clone()));
    Ok(RenderContext {
        template_name,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brand::BrandRegistry;
    use crate::content;
    use crate::test_helpers::{BrandFixture, acme_registry};
    use tempfile::TempDir;

    fn acme_context(raw: &str, requested: Option<&str>) -> Result<RenderContext, ContextError> {
        let (_tmp, registry) = acme_registry();
        let brand = registry.load_brand("acme").unwrap();
        prepare(&content::parse(raw).unwrap(), &brand, requested)
    }

    #[test]
    fn acme_scenario_context() {
        let ctx = acme_context("---\ntitle: Test\ntemplate: document\n---\n# Hi", None).unwrap();
        assert_eq!(ctx.template_name, "document");
        assert_eq!(ctx.get("title"), Some(&json!("Test")));
        assert_eq!(ctx.lookup("brand.colors.primary"), Some(&json!("#112233")));
        assert_eq!(ctx.get("hasLogo"), Some(&json!(false)));
        assert!(ctx.lookup("brand.logo_url").is_none());
    }

    #[test]
    fn reserved_keys_rejected() {
        for key in ["brand", "brand.colors.primary", "brand.name"] {
            let raw = format!("---\n\"{key}\": evil\n---\nbody");
            let err = acme_context(&raw, None).unwrap_err();
            assert!(
                matches!(&err, ContextError::ReservedKey { key: k, .. } if k == key),
                "{key}: {err:?}"
            );
        }
    }

    #[test]
    fn brand_derived_keys_rejected() {
        for (key, value) in [
            ("hasLogo", "true"),
            ("brand_css", "\"body{display:none}\""),
            ("css_variables", "\":root{}\""),
        ] {
            let raw = format!("---\n{key}: {value}\n---\nbody");
            let err = acme_context(&raw, None).unwrap_err();
            assert!(
                matches!(&err, ContextError::ReservedKey { key: k, .. } if k == key),
                "{key}: {err:?}"
            );
        }
    }

    #[test]
    fn brand_prefixed_but_not_namespaced_is_allowed() {
        let ctx = acme_context("---\nbranding: bold\nbrand_tone: warm\n---\n", None).unwrap();
        assert_eq!(ctx.get("branding"), Some(&json!("bold")));
        assert_eq!(ctx.get("brand_tone"), Some(&json!("warm")));
    }

    #[test]
    fn metadata_overrides_template_defaults() {
        let ctx = acme_context("---\nshow_meta: false\n---\n", Some("document")).unwrap();
        assert_eq!(ctx.get("show_meta"), Some(&json!(false)));
        let ctx = acme_context("---\n---\n", Some("document")).unwrap();
        assert_eq!(ctx.get("show_meta"), Some(&json!(true)));
    }

    #[test]
    fn metadata_overrides_derived_content_values() {
        let ctx = acme_context("---\nword_count: 1000\nauthor: Jane\n---\nthree words here", None)
            .unwrap();
        assert_eq!(ctx.get("word_count"), Some(&json!(1000)));
        assert_eq!(ctx.get("author"), Some(&json!("Jane")));
    }

    #[test]
    fn unknown_keys_pass_through() {
        let ctx = acme_context("---\nclient:\n  name: Globex\n---\n", None).unwrap();
        assert_eq!(ctx.lookup("client.name"), Some(&json!("Globex")));
        assert_eq!(ctx.lookup("metadata.client.name"), Some(&json!("Globex")));
    }

    #[test]
    fn title_falls_back_to_heading_then_empty() {
        let ctx = acme_context("# From Heading\n\ntext", None).unwrap();
        assert_eq!(ctx.get("title"), Some(&json!("From Heading")));
        let ctx = acme_context("no heading", None).unwrap();
        assert_eq!(ctx.get("title"), Some(&json!("")));
        assert_eq!(ctx.get("author"), Some(&Value::Null));
    }

    #[test]
    fn brand_css_combines_variables_stylesheet_and_print_styles() {
        let tmp = TempDir::new().unwrap();
        BrandFixture::new("acme")
            .asset("stylesheet", "assets/brand.css", b".brand-only { color: red; }")
            .write(tmp.path());
        let registry = BrandRegistry::new(tmp.path());
        let brand = registry.load_brand("acme").unwrap();
        let ctx = prepare(&content::parse("x").unwrap(), &brand, None).unwrap();
        let css = ctx.get("brand_css").and_then(Value::as_str).unwrap();
        let vars = css.find("--color-primary").unwrap();
        let sheet = css.find(".brand-only").unwrap();
        let print = css.find("Default print styles").unwrap();
        assert!(vars < sheet && sheet < print);
        assert!(ctx.get("css_variables").unwrap().as_str().unwrap().starts_with(":root"));
    }

    #[test]
    fn logo_exposed_as_file_url() {
        let tmp = TempDir::new().unwrap();
        BrandFixture::new("acme")
            .asset("logo", "assets/logo.svg", b"<svg/>")
            .write(tmp.path());
        let registry = BrandRegistry::new(tmp.path());
        let brand = registry.load_brand("acme").unwrap();
        let ctx = prepare(&content::parse("x").unwrap(), &brand, None).unwrap();
        assert_eq!(ctx.get("hasLogo"), Some(&json!(true)));
        let url = ctx.lookup("brand.logo_url").and_then(Value::as_str).unwrap();
        assert!(url.starts_with("file://") && url.ends_with("assets/logo.svg"));
    }

    // =========================================================================
    // Template selection
    // =========================================================================

    #[test]
    fn request_beats_metadata_beats_brand_default() {
        let tmp = TempDir::new().unwrap();
        BrandFixture::new("acme")
            .toml("[brand]\nname = \"Acme\"\ndefault_template = \"report\"\n[colors]\nprimary = \"#000\"\n")
            .write(tmp.path());
        let registry = BrandRegistry::new(tmp.path());
        let brand = registry.load_brand("acme").unwrap();
        let with_meta = content::parse("---\ntemplate: letter\n---\n").unwrap();
        let without = content::parse("").unwrap();

        assert_eq!(select_template(Some("cover"), &with_meta, &brand).unwrap(), "cover");
        assert_eq!(select_template(None, &with_meta, &brand).unwrap(), "letter");
        assert_eq!(select_template(None, &without, &brand).unwrap(), "report");
    }

    #[test]
    fn global_default_is_document() {
        let ctx = acme_context("", None).unwrap();
        assert_eq!(ctx.template_name, "document");
        assert_eq!(ctx.get("template"), Some(&json!("document")));
    }

    #[test]
    fn unknown_template_never_falls_back() {
        let err = acme_context("---\ntemplate: brochure\n---\n", None).unwrap_err();
        let ContextError::UnknownTemplate {
            template, available, ..
        } = err
        else {
            panic!("expected unknown template, got {err:?}");
        };
        assert_eq!(template, "brochure");
        assert!(available.contains(&"document".to_string()));

        assert!(matches!(
            acme_context("", Some("base")),
            Err(ContextError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn brand_template_options_layer_over_builtin_defaults() {
        let tmp = TempDir::new().unwrap();
        BrandFixture::new("acme")
            .toml(
                r##"
[brand]
name = "Acme"

[colors]
primary = "#112233"

[template_options.letter]
closing = "Warm regards"
stamp = true
"##,
            )
            .write(tmp.path());
        let registry = BrandRegistry::new(tmp.path());
        let brand = registry.load_brand("acme").unwrap();
        let ctx = prepare(&content::parse("").unwrap(), &brand, Some("letter")).unwrap();
        assert_eq!(ctx.get("closing"), Some(&json!("Warm regards")));
        assert_eq!(ctx.get("stamp"), Some(&json!(true)));
        assert_eq!(ctx.get("show_signature"), Some(&json!(true)));
        assert_eq!(
            ctx.lookup("template_options.letter.closing"),
            Some(&json!("Warm regards"))
        );
    }
}
