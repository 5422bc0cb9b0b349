//! The `brand.toml` file model and the resolved [`BrandConfig`].
//!
//! ## Brand Directory Layout
//!
//! ```text
//! brands/
//! └── acme/
//!     ├── brand.toml             # Brand configuration (required)
//!     ├── protection.toml        # Lock sidecar, written by lock/unlock
//!     ├── assets/
//!     │   ├── logo.svg
//!     │   └── brand.css
//!     └── templates/
//!         └── letter.html        # Overrides the built-in "letter"
//! ```
//!
//! ## brand.toml
//!
//! ```toml
//! [brand]
//! name = "Acme Corp"                # required
//! tagline = "Quality since 1901"
//! website = "https://acme.example"
//! default_template = "document"
//!
//! [colors]
//! primary = "#112233"               # required
//! accent = "#ff6600"                # any role; becomes --color-accent
//!
//! [typography]
//! primary_font = "Inter"
//! secondary_font = "Georgia"        # defaults to primary_font
//! fallback = "sans-serif"
//!
//! [typography.sizes]
//! body = "11pt"
//!
//! [typography.weights]
//! heading = 700
//!
//! [layout]
//! content_width = "6.5in"
//!
//! [assets]
//! logo = "assets/logo.svg"          # relative to the brand directory
//! stylesheet = "assets/brand.css"   # inlined into brand_css
//!
//! [templates]
//! letter = "templates/letter.html"
//!
//! [template_options.letter]
//! show_signature = true
//!
//! [pdf]
//! page_size = "A4"
//! footer = true
//!
//! [protection]
//! level = "none"                    # none | moderate | strict
//! ```

use crate::pdf::options::PdfOverrides;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const BRAND_FILE_NAME: &str = "brand.toml";
pub const PROTECTION_FILE_NAME: &str = "protection.toml";
/// Previous `brand.toml`, kept by [`super::BrandRegistry::update_brand`].
pub const BACKUP_FILE_NAME: &str = "brand.toml.bak";

/// Asset name that is inlined as CSS rather than exposed as a path.
pub const STYLESHEET_ASSET: &str = "stylesheet";
pub const LOGO_ASSET: &str = "logo";

// =============================================================================
// File model
// =============================================================================

/// `brand.toml` as written on disk, after merging over stock defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrandFile {
    pub brand: BrandSection,
    pub colors: BTreeMap<String, String>,
    pub typography: TypographySection,
    pub layout: BTreeMap<String, CssValue>,
    pub assets: BTreeMap<String, String>,
    pub templates: BTreeMap<String, String>,
    pub template_options: BTreeMap<String, toml::Table>,
    pub pdf: PdfOverrides,
    pub protection: ProtectionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrandSection {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub default_template: String,
}

impl Default for BrandSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            tagline: None,
            website: None,
            default_template: "document".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypographySection {
    pub primary_font: String,
    /// Falls back to `primary_font` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_font: Option<String>,
    /// Generic family appended to every font stack.
    pub fallback: String,
    pub sizes: BTreeMap<String, CssValue>,
    pub weights: BTreeMap<String, CssValue>,
}

impl Default for TypographySection {
    fn default() -> Self {
        Self {
            primary_font: "Helvetica".to_string(),
            secondary_font: None,
            fallback: "sans-serif".to_string(),
            sizes: BTreeMap::new(),
            weights: BTreeMap::new(),
        }
    }
}

/// A CSS value written as a TOML string or number (`"11pt"`, `700`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CssValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for CssValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CssValue::Int(v) => write!(f, "{v}"),
            CssValue::Float(v) => write!(f, "{v}"),
            CssValue::Text(v) => f.write_str(v),
        }
    }
}

// =============================================================================
// Protection
// =============================================================================

/// Policy gate for asset mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    #[default]
    None,
    /// Assets are read-only; anyone may unlock.
    Moderate,
    /// Assets are read-only; only the locker may re-lock or unlock.
    Strict,
}

impl ProtectionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtectionLevel::None => "none",
            ProtectionLevel::Moderate => "moderate",
            ProtectionLevel::Strict => "strict",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(ProtectionLevel::None),
            "moderate" => Some(ProtectionLevel::Moderate),
            "strict" => Some(ProtectionLevel::Strict),
            _ => None,
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtectionState {
    pub level: ProtectionLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// RFC 3339 timestamp of the last lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<String>,
}

impl ProtectionState {
    pub fn is_locked(&self) -> bool {
        self.level != ProtectionLevel::None
    }

    /// Whether `user` may change this lock.
    pub fn can_change(&self, user: &str) -> bool {
        self.level != ProtectionLevel::Strict || self.locked_by.as_deref() == Some(user)
    }
}

// =============================================================================
// Resolved configuration
// =============================================================================

/// A font family plus the generic fallback used in CSS stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FontSpec {
    pub family: String,
    pub fallback: String,
}

impl FontSpec {
    /// CSS `font-family` value, e.g. `'Inter', sans-serif`.
    pub fn css_stack(&self) -> String {
        format!("'{}', {}", self.family.replace('\'', "\\'"), self.fallback)
    }
}

/// A loaded, validated brand. Shared read-only via `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrandConfig {
    pub id: String,
    /// Canonical brand directory; every path below is inside it.
    pub root: PathBuf,
    pub name: String,
    pub tagline: Option<String>,
    pub website: Option<String>,
    pub default_template: String,
    pub colors: BTreeMap<String, String>,
    /// `primary` and `secondary` always present.
    pub fonts: BTreeMap<String, FontSpec>,
    pub font_sizes: BTreeMap<String, CssValue>,
    pub font_weights: BTreeMap<String, CssValue>,
    pub layout: BTreeMap<String, CssValue>,
    /// Absolute paths for every declared asset except the stylesheet.
    pub asset_paths: BTreeMap<String, PathBuf>,
    pub stylesheet_path: Option<PathBuf>,
    /// Contents of the stylesheet, read at load time.
    #[serde(skip)]
    pub stylesheet_css: Option<String>,
    pub template_overrides: BTreeMap<String, PathBuf>,
    pub template_options: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
    pub pdf: PdfOverrides,
    pub protection: ProtectionState,
}

impl BrandConfig {
    pub fn has_logo(&self) -> bool {
        self.asset_paths.contains_key(LOGO_ASSET)
    }

    pub fn primary_font(&self) -> Option<&FontSpec> {
        self.fonts.get("primary")
    }

    /// `:root` block of CSS custom properties for colors, typography and layout.
    pub fn css_variables(&self) -> String {
        let mut css = String::from(":root {\n");
        let mut push = |name: String, value: String| {
            css.push_str(&format!("  --{name}: {value};\n"));
        };
        for (role, color) in &self.colors {
            push(format!("color-{}", css_ident(role)), color.clone());
        }
        for (role, font) in &self.fonts {
            push(format!("font-{}", css_ident(role)), font.css_stack());
        }
        for (name, size) in &self.font_sizes {
            push(format!("font-size-{}", css_ident(name)), size.to_string());
        }
        for (name, weight) in &self.font_weights {
            push(format!("font-weight-{}", css_ident(name)), weight.to_string());
        }
        for (name, value) in &self.layout {
            push(format!("layout-{}", css_ident(name)), value.to_string());
        }
        css.push('}');
        css
    }
}

fn css_ident(name: &str) -> String {
    name.replace('_', "-")
}
