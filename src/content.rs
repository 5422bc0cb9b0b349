//! Content parsing: front-matter metadata plus a Markdown body.
//!
//! Input is UTF-8 text with an optional YAML front-matter block:
//!
//! ```text
//! ---
//! title: Quarterly Report
//! author: Jane
//! template: report
//! ---
//! # Heading
//!
//! Body text in Markdown.
//! ```
//!
//! The block must start on the very first line and end with a `---` or
//! `...` line. Metadata keys are kept verbatim and YAML values are carried
//! over as JSON values without coercion (`date: 2024-01-01` stays a string).
//!
//! The body is converted to HTML with pulldown-cmark after expanding the
//! document shortcodes:
//!
//! | Shortcode                    | Output                               |
//! |------------------------------|--------------------------------------|
//! | `[PAGE_BREAK]`, `[BREAK]`    | `<div class="page-break"></div>`     |
//! | `[INFO]…[/INFO]`             | `<div class="info-box">…</div>`      |
//! | `[WARNING]…[/WARNING]`       | `<div class="warning-box">…</div>`   |
//! | `[SUCCESS]…[/SUCCESS]`       | `<div class="success-box">…</div>`   |
//! | `[TOC]`                      | removed                              |
//!
//! Input over [`MAX_CONTENT_BYTES`] or [`MAX_CONTENT_LINES`] is rejected, as
//! is a body carrying script tags, `javascript:` or `file://` URLs, base64
//! `data:` URLs, or `../` path segments. The body reaches the template
//! unescaped, so these checks stand in for HTML sanitizing. Metadata is
//! escaped by the templates and is not scanned.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ContentError {
    fn malformed(reason: impl Into<String>) -> Self {
        ContentError::MalformedInput {
            reason: reason.into(),
        }
    }
}

/// Parsed content. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub metadata: Map<String, Value>,
    pub body: String,
    pub source_path: Option<PathBuf>,
}

impl ContentRecord {
    /// A string-valued metadata entry.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// `title` from metadata, else the text of the first level-1 heading.
    pub fn title(&self) -> Option<String> {
        match self.meta_str("title") {
            Some(title) => Some(title.to_string()),
            None => first_heading(&self.body),
        }
    }

    /// Body rendered to HTML, shortcodes included.
    pub fn to_html(&self) -> String {
        markdown_to_html(&expand_shortcodes(&self.body))
    }

    /// Words in the body, excluding code spans and code blocks.
    pub fn word_count(&self) -> usize {
        word_count(&self.body)
    }
}

pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;
pub const MAX_CONTENT_LINES: usize = 10_000;

/// Lowercase markers that reject a body outright.
const BLOCKED_MARKERS: &[&str] = &["<script", "javascript:", "file://", "../"];

/// Split raw input into metadata and body.
pub fn parse(raw: &str) -> Result<ContentRecord, ContentError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    check_limits(raw)?;
    let (metadata, body) = match split_front_matter(raw)? {
        Some((yaml, body)) => (parse_metadata(yaml)?, body),
        None => (Map::new(), raw),
    };
    check_body(body)?;
    Ok(ContentRecord {
        metadata,
        body: body.to_string(),
        source_path: None,
    })
}

/// Read and parse a UTF-8 file, recording its path.
pub fn parse_file(path: &Path) -> Result<ContentRecord, ContentError> {
    let bytes = std::fs::read(path).map_err(|source| ContentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|e| {
        ContentError::malformed(format!(
            "{} is not valid UTF-8 (byte {})",
            path.display(),
            e.utf8_error().valid_up_to()
        ))
    })?;
    let mut record = parse(&text)?;
    record.source_path = Some(path.to_path_buf());
    Ok(record)
}

fn check_limits(raw: &str) -> Result<(), ContentError> {
    if raw.len() > MAX_CONTENT_BYTES {
        return Err(ContentError::malformed(format!(
            "content is {} bytes, limit is {MAX_CONTENT_BYTES}",
            raw.len()
        )));
    }
    let lines = raw.lines().count();
    if lines > MAX_CONTENT_LINES {
        return Err(ContentError::malformed(format!(
            "content has {lines} lines, limit is {MAX_CONTENT_LINES}"
        )));
    }
    Ok(())
}

fn check_body(body: &str) -> Result<(), ContentError> {
    let lower = body.to_ascii_lowercase();
    if let Some(marker) = BLOCKED_MARKERS.iter().find(|m| lower.contains(**m)) {
        return Err(ContentError::malformed(format!(
            "content contains disallowed `{marker}`"
        )));
    }
    // `data:` then `base64` on the same line.
    let inline_data = lower.lines().any(|line| {
        line.find("data:")
            .is_some_and(|at| line[at..].contains("base64"))
    });
    if inline_data {
        return Err(ContentError::malformed(
            "content contains an inline base64 `data:` URL",
        ));
    }
    Ok(())
}

/// Returns `(front_matter, body)` when the input opens with a `---` line.
fn split_front_matter(raw: &str) -> Result<Option<(&str, &str)>, ContentError> {
    let first_end = raw.find('\n').unwrap_or(raw.len());
    if raw[..first_end].trim_end() != "---" {
        return Ok(None);
    }
    if first_end == raw.len() {
        return Err(ContentError::malformed("front-matter block is not terminated"));
    }

    let yaml_start = first_end + 1;
    let mut offset = yaml_start;
    for line in raw[yaml_start..].split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let body_start = offset + line.len();
            return Ok(Some((&raw[yaml_start..offset], &raw[body_start..])));
        }
        offset += line.len();
    }
    Err(ContentError::malformed("front-matter block is not terminated"))
}

fn parse_metadata(yaml: &str) -> Result<Map<String, Value>, ContentError> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml)
        .map_err(|e| ContentError::malformed(format!("invalid front-matter YAML: {e}")))?;
    match value {
        serde_yaml::Value::Null => Ok(Map::new()),
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, value) in mapping {
                let serde_yaml::Value::String(key) = key else {
                    return Err(ContentError::malformed(format!(
                        "front-matter keys must be strings, got {key:?}"
                    )));
                };
                out.insert(key, yaml_to_json(value)?);
            }
            Ok(out)
        }
        other => Err(ContentError::malformed(format!(
            "front-matter must be a mapping, got {}",
            yaml_kind(&other)
        ))),
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, ContentError> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                serde_json::Number::from_f64(f).map(Value::Number).ok_or_else(|| {
                    ContentError::malformed(format!("front-matter number {n} is not finite"))
                })?
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(ContentError::malformed(format!(
                            "nested front-matter key must be a scalar, got {}",
                            yaml_kind(&other)
                        )));
                    }
                };
                out.insert(key, yaml_to_json(value)?);
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

// =============================================================================
// Markdown
// =============================================================================

fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
}

/// Render Markdown to an HTML fragment.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, markdown_options());
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn first_heading(markdown: &str) -> Option<String> {
    let mut in_h1 = false;
    let mut text = String::new();
    for event in Parser::new_ext(markdown, markdown_options()) {
        match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) => {
                in_h1 = true;
                text.clear();
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                let title = text.trim();
                if !title.is_empty() {
                    return Some(title.to_string());
                }
                in_h1 = false;
            }
            Event::Text(t) | Event::Code(t) if in_h1 => text.push_str(&t),
            _ => {}
        }
    }
    None
}

fn word_count(markdown: &str) -> usize {
    // The parser may split one word across several text events, so collect
    // prose first and break only at element boundaries.
    let mut in_code_block = false;
    let mut prose = String::with_capacity(markdown.len());
    for event in Parser::new_ext(markdown, markdown_options()) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(t) if !in_code_block => prose.push_str(&t),
            Event::Code(_) | Event::SoftBreak | Event::HardBreak | Event::End(_) => {
                prose.push(' ')
            }
            _ => {}
        }
    }
    prose.split_whitespace().count()
}

// =============================================================================
// Shortcodes
// =============================================================================

const PAGE_BREAK: &str = "<div class=\"page-break\"></div>";

const CALLOUTS: [(&str, &str, &str); 3] = [
    ("[INFO]", "[/INFO]", "info-box"),
    ("[WARNING]", "[/WARNING]", "warning-box"),
    ("[SUCCESS]", "[/SUCCESS]", "success-box"),
];

/// Expand document shortcodes. Tags are matched case-insensitively.
pub fn expand_shortcodes(body: &str) -> String {
    let mut out = replace_ci(body, "[TOC]", "");
    out = replace_ci(&out, "[PAGE_BREAK]", PAGE_BREAK);
    out = replace_ci(&out, "[BREAK]", PAGE_BREAK);
    for (open, close, class) in CALLOUTS {
        out = wrap_ci(&out, open, close, class);
    }
    out
}

fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

fn replace_ci(haystack: &str, needle: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(at) = find_ci(haystack, needle, cursor) {
        out.push_str(&haystack[cursor..at]);
        out.push_str(replacement);
        cursor = at + needle.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}

/// Wrap each `open … close` span in a div. Unclosed tags are left untouched.
fn wrap_ci(haystack: &str, open: &str, close: &str, class: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(start) = find_ci(haystack, open, cursor) {
        let inner_start = start + open.len();
        let Some(end) = find_ci(haystack, close, inner_start) else {
            break;
        };
        out.push_str(&haystack[cursor..start]);
        // Blank lines around the inner text keep it parsed as Markdown.
        out.push_str(&format!("<div class=\"{class}\">\n\n"));
        out.push_str(haystack[inner_start..end].trim());
        out.push_str("\n\n</div>");
        cursor = end + close.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}
