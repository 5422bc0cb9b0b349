//! Page-setup options for a print job.
//!
//! Options arrive as sparse [`PdfOverrides`] layers (engine defaults from
//! `brand-pdf.toml`, the brand's `[pdf]` section, the request) and are
//! resolved into a fully-typed [`PdfOptions`]. Every value is checked against
//! an enumerated set before a rendering session is touched, and all problems
//! are reported together.
//!
//! ```toml
//! [pdf]
//! page_size = "A4"          # A3, A4, A5, Letter, Legal, Tabloid
//! orientation = "portrait"  # portrait | landscape
//! margin = "1in"            # all sides; margin_top etc. override per side
//! header = true             # brand-styled running header
//! footer = true             # page x / y footer
//! print_background = true
//! scale = 1.0               # 0.1 - 2.0
//! ```

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Minimum margin that leaves room for Chrome's header/footer band.
pub const MIN_BAND_MARGIN_IN: f64 = 0.4;

const SCALE_RANGE: std::ops::RangeInclusive<f64> = 0.1..=2.0;

/// Paper sizes supported by the print backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageSize {
    A3,
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PageSize {
    pub const ALL: [PageSize; 6] = [
        PageSize::A3,
        PageSize::A4,
        PageSize::A5,
        PageSize::Letter,
        PageSize::Legal,
        PageSize::Tabloid,
    ];

    /// Portrait `(width, height)` in inches.
    pub fn dimensions_in(self) -> (f64, f64) {
        match self {
            PageSize::A3 => (11.69, 16.54),
            PageSize::A4 => (8.27, 11.69),
            PageSize::A5 => (5.83, 8.27),
            PageSize::Letter => (8.5, 11.0),
            PageSize::Legal => (8.5, 14.0),
            PageSize::Tabloid => (11.0, 17.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageSize::A3 => "A3",
            PageSize::A4 => "A4",
            PageSize::A5 => "A5",
            PageSize::Letter => "Letter",
            PageSize::Legal => "Legal",
            PageSize::Tabloid => "Tabloid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|size| size.name().eq_ignore_ascii_case(value.trim()))
    }
}

/// Page orientation; landscape swaps the effective width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "portrait" => Some(Orientation::Portrait),
            "landscape" => Some(Orientation::Landscape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    In,
    Cm,
    Mm,
    Pt,
    Px,
}

impl LengthUnit {
    fn suffix(self) -> &'static str {
        match self {
            LengthUnit::In => "in",
            LengthUnit::Cm => "cm",
            LengthUnit::Mm => "mm",
            LengthUnit::Pt => "pt",
            LengthUnit::Px => "px",
        }
    }

    fn per_inch(self) -> f64 {
        match self {
            LengthUnit::In => 1.0,
            LengthUnit::Cm => 2.54,
            LengthUnit::Mm => 25.4,
            LengthUnit::Pt => 72.0,
            LengthUnit::Px => 96.0,
        }
    }
}

/// A CSS-style print length such as `1in`, `20mm` or `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub const fn inches(value: f64) -> Self {
        Self {
            value,
            unit: LengthUnit::In,
        }
    }

    /// Parse `"<number><unit>"`. A bare `0` is accepted without a unit.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == "0" {
            return Some(Self::inches(0.0));
        }
        const UNITS: [LengthUnit; 5] = [
            LengthUnit::In,
            LengthUnit::Cm,
            LengthUnit::Mm,
            LengthUnit::Pt,
            LengthUnit::Px,
        ];
        let unit = UNITS.into_iter().find(|u| raw.ends_with(u.suffix()))?;
        let number = raw[..raw.len() - unit.suffix().len()].trim();
        let value: f64 = number.parse().ok()?;
        value.is_finite().then_some(Self { value, unit })
    }

    pub fn to_inches(self) -> f64 {
        self.value / self.unit.per_inch()
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl Serialize for Length {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Margins {
    pub top: Length,
    pub right: Length,
    pub bottom: Length,
    pub left: Length,
}

impl Margins {
    pub const fn uniform(length: Length) -> Self {
        Self {
            top: length,
            right: length,
            bottom: length,
            left: length,
        }
    }
}

/// Fully-resolved, validated page setup for one print job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfOptions {
    pub page_size: PageSize,
    pub orientation: Orientation,
    pub margins: Margins,
    pub header: bool,
    pub footer: bool,
    pub print_background: bool,
    pub scale: f64,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::Letter,
            orientation: Orientation::Portrait,
            margins: Margins::uniform(Length::inches(1.0)),
            header: false,
            footer: false,
            print_background: true,
            scale: 1.0,
        }
    }
}

impl PdfOptions {
    /// Effective `(width, height)` in inches after applying orientation.
    pub fn paper_in(&self) -> (f64, f64) {
        let (w, h) = self.page_size.dimensions_in();
        match self.orientation {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        }
    }

    /// Resolve override layers (lowest precedence first) on top of the
    /// built-in defaults and validate the result.
    ///
    /// Returns every problem found, not just the first one.
    pub fn resolve(layers: &[&PdfOverrides]) -> Result<Self, Vec<String>> {
        let merged = layers
            .iter()
            .fold(PdfOverrides::default(), |acc, layer| acc.layer(layer));
        merged.into_options()
    }
}

/// A sparse layer of page-setup values, as written in TOML or sent with a
/// request. `None` means "inherit from the layer below".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PdfOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    /// Applies to all four sides unless a per-side value is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_right: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_bottom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_background: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl PdfOverrides {
    /// Return a new layer where every value set in `over` wins.
    ///
    /// A uniform `margin` in `over` also resets the per-side values inherited
    /// from `self`, so "margin = 0.5in" on a request means all four sides.
    pub fn layer(&self, over: &PdfOverrides) -> PdfOverrides {
        let side = |base: &Option<String>, top: &Option<String>| {
            top.clone().or_else(|| {
                if over.margin.is_some() {
                    None
                } else {
                    base.clone()
                }
            })
        };
        PdfOverrides {
            page_size: over.page_size.clone().or_else(|| self.page_size.clone()),
            orientation: over.orientation.clone().or_else(|| self.orientation.clone()),
            margin: over.margin.clone().or_else(|| self.margin.clone()),
            margin_top: side(&self.margin_top, &over.margin_top),
            margin_right: side(&self.margin_right, &over.margin_right),
            margin_bottom: side(&self.margin_bottom, &over.margin_bottom),
            margin_left: side(&self.margin_left, &over.margin_left),
            header: over.header.or(self.header),
            footer: over.footer.or(self.footer),
            print_background: over.print_background.or(self.print_background),
            scale: over.scale.or(self.scale),
        }
    }

    fn into_options(self) -> Result<PdfOptions, Vec<String>> {
        let defaults = PdfOptions::default();
        let mut problems = Vec::new();

        let page_size = match self.page_size.as_deref() {
            None => defaults.page_size,
            Some(raw) => PageSize::parse(raw).unwrap_or_else(|| {
                let known: Vec<&str> = PageSize::ALL.iter().map(|s| s.name()).collect();
                problems.push(format!(
                    "unknown page size '{raw}' (expected one of {})",
                    known.join(", ")
                ));
                defaults.page_size
            }),
        };

        let orientation = match self.orientation.as_deref() {
            None => defaults.orientation,
            Some(raw) => Orientation::parse(raw).unwrap_or_else(|| {
                problems.push(format!(
                    "unknown orientation '{raw}' (expected portrait or landscape)"
                ));
                defaults.orientation
            }),
        };

        let mut length = |field: &str, raw: Option<&str>, fallback: Length| match raw {
            None => fallback,
            Some(raw) => match Length::parse(raw) {
                Some(len) if len.value >= 0.0 => len,
                Some(_) => {
                    problems.push(format!("{field} must not be negative, got '{raw}'"));
                    fallback
                }
                None => {
                    problems.push(format!(
                        "{field} '{raw}' is not a length (use in, cm, mm, pt or px)"
                    ));
                    fallback
                }
            },
        };

        let uniform = length("margin", self.margin.as_deref(), defaults.margins.top);
        let margins = Margins {
            top: length("margin_top", self.margin_top.as_deref(), uniform),
            right: length("margin_right", self.margin_right.as_deref(), uniform),
            bottom: length("margin_bottom", self.margin_bottom.as_deref(), uniform),
            left: length("margin_left", self.margin_left.as_deref(), uniform),
        };

        let scale = self.scale.unwrap_or(defaults.scale);
        if !scale.is_finite() || !SCALE_RANGE.contains(&scale) {
            problems.push(format!(
                "scale must be between {} and {}, got {scale}",
                SCALE_RANGE.start(),
                SCALE_RANGE.end()
            ));
        }

        let options = PdfOptions {
            page_size,
            orientation,
            margins,
            header: self.header.unwrap_or(defaults.header),
            footer: self.footer.unwrap_or(defaults.footer),
            print_background: self.print_background.unwrap_or(defaults.print_background),
            scale,
        };

        let (width, height) = options.paper_in();
        if margins.left.to_inches() + margins.right.to_inches() >= width {
            problems.push(format!(
                "left and right margins leave no printable width on {} {:?}",
                page_size.name(),
                orientation
            ));
        }
        if margins.top.to_inches() + margins.bottom.to_inches() >= height {
            problems.push(format!(
                "top and bottom margins leave no printable height on {} {:?}",
                page_size.name(),
                orientation
            ));
        }
        if options.header && margins.top.to_inches() < MIN_BAND_MARGIN_IN {
            problems.push(format!(
                "header needs a top margin of at least {MIN_BAND_MARGIN_IN}in, got {}",
                margins.top
            ));
        }
        if options.footer && margins.bottom.to_inches() < MIN_BAND_MARGIN_IN {
            problems.push(format!(
                "footer needs a bottom margin of at least {MIN_BAND_MARGIN_IN}in, got {}",
                margins.bottom
            ));
        }

        if problems.is_empty() {
            Ok(options)
        } else {
            Err(problems)
        }
    }
}
