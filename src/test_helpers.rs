//! Shared test utilities for the brand-pdf test suite.
//!
//! Builds brand directories in a temp dir so every test gets an isolated,
//! mutable copy.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! BrandFixture::new("acme")
//!     .asset("logo", "assets/logo.svg", b"<svg/>")
//!     .template("letter", "<p>{{ content | safe }}</p>")
//!     .write(tmp.path());
//! let registry = BrandRegistry::new(tmp.path());
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::brand::{BRAND_FILE_NAME, BrandRegistry};

pub const ACME_TOML: &str = r##"[brand]
name = "Acme Corp"
tagline = "Quality since 1901"

[colors]
primary = "#112233"
"##;

// =========================================================================
// Fixture setup
// =========================================================================

/// A brand directory to be written under a brands root.
pub struct BrandFixture {
    id: String,
    toml: String,
    files: Vec<(String, Vec<u8>)>,
    assets: Vec<(String, String)>,
    templates: Vec<(String, String)>,
}

impl BrandFixture {
    /// A minimal valid brand: a name derived from `id` and a primary color.
    pub fn new(id: &str) -> Self {
        let mut name = id.to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        Self {
            id: id.to_string(),
            toml: format!("[brand]\nname = \"{name} Corp\"\n\n[colors]\nprimary = \"#112233\"\n"),
            files: Vec::new(),
            assets: Vec::new(),
            templates: Vec::new(),
        }
    }

    /// Replace the base `brand.toml` body.
    pub fn toml(mut self, toml: &str) -> Self {
        self.toml = toml.to_string();
        self
    }

    /// Write a file and declare it under `[assets]`.
    pub fn asset(mut self, name: &str, relative: &str, bytes: &[u8]) -> Self {
        self.files.push((relative.to_string(), bytes.to_vec()));
        self.asset_decl(name, relative)
    }

    /// Declare an asset without writing it.
    pub fn asset_decl(mut self, name: &str, relative: &str) -> Self {
        self.assets.push((name.to_string(), relative.to_string()));
        self
    }

    /// Write `templates/<name>.html` and declare it under `[templates]`.
    pub fn template(mut self, name: &str, body: &str) -> Self {
        let relative = format!("templates/{name}.html");
        self.files.push((relative.clone(), body.as_bytes().to_vec()));
        self.templates.push((name.to_string(), relative));
        self
    }

    /// Write an undeclared file into the brand directory.
    pub fn file(mut self, relative: &str, bytes: &[u8]) -> Self {
        self.files.push((relative.to_string(), bytes.to_vec()));
        self
    }

    pub fn write(self, brands_root: &Path) {
        let dir = brands_root.join(&self.id);
        std::fs::create_dir_all(&dir).unwrap();
        for (relative, bytes) in &self.files {
            let path = dir.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        }
        let mut toml = self.toml;
        append_table(&mut toml, "assets", &self.assets);
        append_table(&mut toml, "templates", &self.templates);
        std::fs::write(dir.join(BRAND_FILE_NAME), toml).unwrap();
    }
}

fn append_table(toml: &mut String, table: &str, entries: &[(String, String)]) {
    if entries.is_empty() {
        return;
    }
    toml.push_str(&format!("\n[{table}]\n"));
    for (key, value) in entries {
        toml.push_str(&format!("{key} = '{value}'\n"));
    }
}

/// A brands root holding only the `acme` brand (primary `#112233`, no logo).
pub fn acme_registry() -> (TempDir, BrandRegistry) {
    let tmp = TempDir::new().unwrap();
    BrandFixture::new("acme").toml(ACME_TOML).write(tmp.path());
    let registry = BrandRegistry::new(tmp.path());
    (tmp, registry)
}
