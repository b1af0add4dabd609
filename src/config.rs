//! Configuration for region mapping and legend styling
//!
//! Two documents configure the engine:
//! - the region mapping document (`{ "regionWmsMap": { <regionType>: {...} } }`),
//!   parsed into [`RegionMappingConfig`] with entries kept in document order;
//! - the table style ([`TableStyle`]), which controls color maps, binning and
//!   legend labels for the active column.
//!
//! All default values live in [`defaults`] so there is a single source of truth.

use crate::region::error::{RegionError, Result};
use serde::{Deserialize, Serialize};

/// Default values shared by the legend and matching code
pub mod defaults {
    /// Number of color bins when the style does not say otherwise
    pub const COLOR_BINS: u32 = 7;

    /// Above this many values, `auto` binning switches from ckmeans to quantiles
    pub const AUTO_QUANTILE_THRESHOLD: usize = 1000;

    /// Label used for the null-value legend swatch
    pub const NULL_LABEL: &str = "(No value)";

    /// Unique-id property name for region features
    pub const UNIQUE_ID_PROP: &str = "FID";

    /// Server type for region providers
    pub const SERVER_TYPE: &str = "MVT";

    /// Color used when there is no active column and no region provider
    pub const COLOR_ARRAY: [u8; 4] = [32, 32, 32, 128];

    /// Fully transparent; null color for region-mapped data
    pub const NO_COLOR_ARRAY: [u8; 4] = [0, 0, 0, 0];

    /// Gradient used for scalar columns
    pub const SCALAR_COLOR_MAP: [(f64, &str); 5] = [
        (0.0, "rgba(239,210,193,1.0)"),
        (0.25, "rgba(221,139,116,1.0)"),
        (0.5, "rgba(255,127,46,1.0)"),
        (0.75, "rgba(255,65,43,1.0)"),
        (1.0, "rgba(111,0,54,1.0)"),
    ];

    /// ColorBrewer 9-class Set1, for small categorical columns
    pub const ENUM_COLOR_CODES: [&str; 9] = [
        "#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00", "#ffff33", "#a65628", "#f781bf",
        "#999999",
    ];

    /// High-contrast palette for large categorical columns and no-column colors.
    /// The last entry is the "other values" color.
    pub const LARGE_ENUM_COLOR_CODES: [&str; 20] = [
        "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#bcbd22",
        "#17becf", "#aec7e8", "#ffbb78", "#98df8a", "#ff9896", "#c5b0d5", "#c49c94", "#f7b6d2",
        "#dbdb8d", "#9edae5", "#7f7f7f", "#c7c7c7",
    ];
}

/// What to do when a code matches several regions and nothing narrows it down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AmbiguityPolicy {
    /// Warn and use the first-registered candidate
    #[default]
    FirstCandidate,
    /// Treat the code as unmatched
    Reject,
}

/// One entry of the region mapping document
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionProviderConfig {
    /// Feature attribute holding each region's code
    pub region_prop: Option<String>,
    /// Feature attribute holding a user-facing region name
    pub name_prop: Option<String>,
    pub description: Option<String>,
    pub layer_name: Option<String>,
    /// Tile server URL; a provider without one cannot load its IDs
    pub server: Option<String>,
    /// "MVT" (default) or "WMS"
    pub server_type: Option<String>,
    pub server_subdomains: Option<Vec<String>>,
    pub server_min_zoom: Option<u32>,
    pub server_max_zoom: Option<u32>,
    pub server_max_native_zoom: Option<u32>,
    /// Bounding box [w, s, e, n]
    pub bbox: Option<Vec<f64>>,
    /// Column names this region type is recognised by (defaults to the region type)
    pub aliases: Option<Vec<String>>,
    /// Rules applied to canonical IDs while loading
    pub server_replacements: Vec<(String, String)>,
    /// Rules applied to user data before lookup
    pub data_replacements: Vec<(String, String)>,
    /// Feature attribute used to tell same-named regions apart
    pub disambig_prop: Option<String>,
    /// Region type whose aliases and replacements describe the disambiguation column
    pub disambig_region_id: Option<String>,
    pub unique_id_prop: Option<String>,
    pub text_codes: bool,
    /// JSON `{ "values": [...] }` list of region IDs in feature order
    pub region_ids_file: Option<String>,
    /// As `region_ids_file`, for the disambiguation property
    pub region_disambig_ids_file: Option<String>,
    pub ambiguity_policy: AmbiguityPolicy,
}

/// Parsed region mapping document, entries in registration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionMappingConfig {
    pub entries: Vec<(String, RegionProviderConfig)>,
}

impl RegionMappingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Build from an already-parsed document.
    ///
    /// Object key order is preserved, so providers are registered in the
    /// order the document lists them.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let map = value
            .get("regionWmsMap")
            .and_then(|m| m.as_object())
            .ok_or_else(|| {
                RegionError::Config("Region mapping document has no 'regionWmsMap' object".to_string())
            })?;

        let entries = map
            .iter()
            .map(|(region_type, entry)| {
                let config: RegionProviderConfig = serde_json::from_value(entry.clone())
                    .map_err(|e| {
                        RegionError::Config(format!(
                            "Invalid region mapping entry '{}': {}",
                            region_type, e
                        ))
                    })?;
                Ok((region_type.clone(), config))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }
}

/// How a column's values are turned into color bins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ColorBinMethod {
    /// Quantile for large scalar columns, ckmeans otherwise; `top` for enums
    #[default]
    Auto,
    Quantile,
    Ckmeans,
    /// No discrete bins
    None,
    /// Enums: color the first values, lump the rest into "other"
    Top,
    /// Enums: reuse colors cyclically
    Cycle,
}

impl ColorBinMethod {
    /// Parse from string value (case-insensitive, unknown values mean `Auto`)
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "quantile" => Self::Quantile,
            "ckmeans" => Self::Ckmeans,
            "none" => Self::None,
            "top" => Self::Top,
            "cycle" => Self::Cycle,
            _ => Self::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Quantile => "quantile",
            Self::Ckmeans => "ckmeans",
            Self::None => "none",
            Self::Top => "top",
            Self::Cycle => "cycle",
        }
    }
}

impl From<String> for ColorBinMethod {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ColorBinMethod> for String {
    fn from(method: ColorBinMethod) -> Self {
        method.as_str().to_string()
    }
}

/// A gradient stop as written in a style document
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ColorStopSpec {
    pub offset: f64,
    pub color: String,
}

/// Color map as written in a style document
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ColorMapSpec {
    /// Hyphen-delimited CSS colors, e.g. `"red-orange-#ffff00"`
    Delimited(String),
    /// CSS colors spaced evenly from 0 to 1
    Colors(Vec<String>),
    Stops(Vec<ColorStopSpec>),
}

/// An explicit categorical color; a missing value sets the "other" color
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CategoryColorSpec {
    #[serde(default)]
    pub value: Option<String>,
    pub color: String,
}

/// Color bins as written in a style document
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ColorBinsSpec {
    /// Number of bins; 0 means continuous coloring from the gradient
    Count(u32),
    /// Explicit upper bounds for scalar columns
    Boundaries(Vec<f64>),
    /// Explicit value → color pairs for categorical columns
    Categories(Vec<CategoryColorSpec>),
}

/// Styling for a table's active column
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableStyle {
    pub color_map: Option<ColorMapSpec>,
    pub color_bins: Option<ColorBinsSpec>,
    pub color_bin_method: ColorBinMethod,
    pub null_color: Option<String>,
    pub null_label: Option<String>,
    /// Legend title; defaults to the column name
    pub legend_name: Option<String>,
    /// Extra labels on a smooth gradient legend
    pub legend_ticks: u32,
    pub min_display_value: Option<f64>,
    pub max_display_value: Option<f64>,
    pub clamp_display_value: bool,
    pub scale: f64,
    pub scale_by_value: bool,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            color_map: None,
            color_bins: None,
            color_bin_method: ColorBinMethod::Auto,
            null_color: None,
            null_label: None,
            legend_name: None,
            legend_ticks: 0,
            min_display_value: None,
            max_display_value: None,
            clamp_display_value: false,
            scale: 1.0,
            scale_by_value: false,
        }
    }
}

impl TableStyle {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn null_label(&self) -> &str {
        self.null_label.as_deref().unwrap_or(defaults::NULL_LABEL)
    }
}
