//! Legend and value→color mapping for the active display column
//!
//! A [`LegendHelper`] brings together a [`TableStyle`], the active
//! [`TableColumn`] (if any) and the region provider (if region mapped). Bins
//! and the legend are computed on first use and kept; when the active column
//! changes, build a new helper with [`LegendHelper::for_column`].
//!
//! Coloring by case:
//! - scalar column: bins from ckmeans, quantiles or explicit boundaries, or a
//!   continuous gradient when `colorBins` is 0;
//! - enum column: palette colors per unique value (`top` or `cycle`), or an
//!   explicit value→color list;
//! - no column but a region provider: the region indices `0..regionCount`
//!   are binned like a scalar column;
//! - neither: one color derived from the layer name.

use super::binning::{boundary_bins, ckmeans_bins, quantile_bins, ColorBin};
use super::color::{
    color_array_to_css, no_column_color, parse_css_color, ColorArray, ENUM_COLORS,
    LARGE_ENUM_COLORS,
};
use super::color_map::{ColorMap, DEFAULT_SCALAR_COLOR_MAP};
use super::description::{format_label, Legend, LegendItem};
use super::error::{LegendError, Result};
use crate::config::{defaults, ColorBinMethod, ColorBinsSpec, TableStyle};
use crate::region::RegionProvider;
use crate::table::TableColumn;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Explicit value→color list from the style; `None` value sets "other"
type ExplicitCategories = Vec<(Option<String>, ColorArray)>;

#[derive(Debug, Clone)]
struct CategoryColors {
    /// Colored values in legend order
    assigned: Vec<(String, ColorArray)>,
    lookup: HashMap<String, ColorArray>,
    other: ColorArray,
    /// Set when colors repeat; the legend shows them in one item
    cycle: Option<Vec<ColorArray>>,
}

impl CategoryColors {
    fn new(assigned: Vec<(String, ColorArray)>, other: ColorArray) -> Self {
        let lookup = assigned.iter().cloned().collect();
        Self {
            assigned,
            lookup,
            other,
            cycle: None,
        }
    }

    fn color_for(&self, label: &str) -> ColorArray {
        self.lookup.get(label).copied().unwrap_or(self.other)
    }
}

#[derive(Debug, Clone)]
enum Coloring {
    /// Binning disabled
    None,
    Bins(Vec<ColorBin>),
    /// Continuous coloring by fractional value
    Gradient,
    Categories(CategoryColors),
}

#[derive(Debug)]
struct Built {
    /// `None` once built means there is nothing to show
    legend: Option<Legend>,
    coloring: Coloring,
}

/// Numeric values to bin, with the range used for labels and gradients
struct ScalarData {
    values: Vec<f64>,
    extremes: Option<(f64, f64)>,
    has_nulls: bool,
    title: String,
}

#[derive(Debug)]
pub struct LegendHelper {
    style: TableStyle,
    color_map: Option<ColorMap>,
    null_color: Option<ColorArray>,
    explicit_categories: Option<ExplicitCategories>,
    column: Option<TableColumn>,
    region_provider: Option<Arc<RegionProvider>>,
    name: Option<String>,
    built: OnceLock<Built>,
}

impl LegendHelper {
    /// Create a helper for `style`, validating its colors up front.
    pub fn new(style: TableStyle) -> Result<Self> {
        let color_map = style
            .color_map
            .as_ref()
            .map(ColorMap::from_spec)
            .transpose()?;
        let null_color = style
            .null_color
            .as_deref()
            .map(|css| parse_css_color(css).ok_or_else(|| LegendError::InvalidColor(css.to_string())))
            .transpose()?;
        let explicit_categories = match &style.color_bins {
            Some(ColorBinsSpec::Categories(bins)) => Some(
                bins.iter()
                    .map(|bin| {
                        let color = parse_css_color(&bin.color)
                            .ok_or_else(|| LegendError::InvalidColor(bin.color.clone()))?;
                        Ok((bin.value.clone(), color))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => None,
        };

        Ok(Self {
            style,
            color_map,
            null_color,
            explicit_categories,
            column: None,
            region_provider: None,
            name: None,
            built: OnceLock::new(),
        })
    }

    pub fn with_column(mut self, column: TableColumn) -> Self {
        self.column = Some(column);
        self.built = OnceLock::new();
        self
    }

    /// Region provider used when there is no active column.
    ///
    /// Its region IDs should be loaded before the legend is first used.
    pub fn with_region_provider(mut self, provider: Arc<RegionProvider>) -> Self {
        self.region_provider = Some(provider);
        self.built = OnceLock::new();
        self
    }

    /// Layer name, shown when there is no active column
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.built = OnceLock::new();
        self
    }

    /// A fresh helper with the same style, provider and name for another column
    pub fn for_column(&self, column: Option<TableColumn>) -> Self {
        Self {
            style: self.style.clone(),
            color_map: self.color_map.clone(),
            null_color: self.null_color,
            explicit_categories: self.explicit_categories.clone(),
            column,
            region_provider: self.region_provider.clone(),
            name: self.name.clone(),
            built: OnceLock::new(),
        }
    }

    pub fn style(&self) -> &TableStyle {
        &self.style
    }

    pub fn column(&self) -> Option<&TableColumn> {
        self.column.as_ref()
    }

    fn color_map(&self) -> &ColorMap {
        self.color_map.as_ref().unwrap_or(&DEFAULT_SCALAR_COLOR_MAP)
    }

    /// Color for missing values
    pub fn null_color(&self) -> ColorArray {
        self.null_color.unwrap_or(if self.region_provider.is_some() {
            defaults::NO_COLOR_ARRAY
        } else {
            defaults::COLOR_ARRAY
        })
    }

    fn no_column_color(&self) -> ColorArray {
        no_column_color(self.name.as_deref().unwrap_or(""))
    }

    fn has_data(&self) -> bool {
        self.column.is_some() || self.region_provider.is_some()
    }

    fn built(&self) -> &Built {
        self.built.get_or_init(|| self.build())
    }

    /// The legend, or `None` if there is nothing to show
    pub fn legend(&self) -> Option<&Legend> {
        self.built().legend.as_ref()
    }

    /// The legend as a base64 JSON `data:` URL
    pub fn legend_url(&self) -> Option<String> {
        let legend = self.legend()?;
        match legend.to_data_url() {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "Failed to encode legend");
                None
            }
        }
    }

    /// Numeric color bins; empty for enum, gradient and unbinned coloring
    pub fn bins(&self) -> &[ColorBin] {
        match &self.built().coloring {
            Coloring::Bins(bins) => bins,
            _ => &[],
        }
    }

    /// Category values that have their own color
    pub fn colored_categories(&self) -> Vec<&str> {
        match &self.built().coloring {
            Coloring::Categories(colors) => {
                colors.assigned.iter().map(|(v, _)| v.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Color for a numeric value.
    ///
    /// Missing values and unbinned coloring use the null color. Values above
    /// the last bin take its color.
    pub fn get_color_array_from_value(&self, value: Option<f64>) -> ColorArray {
        if !self.has_data() {
            return self.no_column_color();
        }
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            return self.null_color();
        };

        match &self.built().coloring {
            Coloring::Gradient => self.color_map().sample(self.fractional_value(value)),
            Coloring::Categories(colors) => colors.color_for(&value.to_string()),
            Coloring::Bins(bins) => bins
                .iter()
                .find(|bin| value <= bin.upper_bound)
                .or(bins.last())
                .map_or(self.null_color(), |bin| bin.color),
            Coloring::None => self.null_color(),
        }
    }

    /// Color for a categorical label; numeric text falls back to value lookup.
    pub fn get_color_array_from_category(&self, label: Option<&str>) -> ColorArray {
        if !self.has_data() {
            return self.no_column_color();
        }
        let Some(label) = label else {
            return self.null_color();
        };
        match &self.built().coloring {
            Coloring::Categories(colors) => colors.color_for(label),
            _ => self.get_color_array_from_value(label.trim().parse().ok()),
        }
    }

    /// Point scale for a value; with `scaleByValue` it grows with the
    /// fractional value, missing values scaling like the minimum.
    pub fn get_scale_from_value(&self, value: Option<f64>) -> f64 {
        let scale = self.style.scale;
        if !self.style.scale_by_value {
            return scale;
        }
        let fraction = value.map_or(0.0, |v| self.fractional_value(v));
        if fraction.is_nan() {
            0.5
        } else {
            scale * (fraction + 0.5)
        }
    }

    /// Column range, with the display overrides applied when the range is not empty
    fn extremes(&self) -> Option<(f64, f64)> {
        let (min, max) = match (&self.column, &self.region_provider) {
            (Some(column), _) => (column.minimum_value()?, column.maximum_value()?),
            (None, Some(provider)) if provider.region_count() > 0 => {
                (0.0, (provider.region_count() - 1) as f64)
            }
            _ => return None,
        };
        if min == max {
            return Some((min, max));
        }
        Some((
            self.style.min_display_value.unwrap_or(min),
            self.style.max_display_value.unwrap_or(max),
        ))
    }

    /// Position of `value` in the column range, e.g. 20 in 0..100 → 0.2
    fn fractional_value(&self, value: f64) -> f64 {
        let Some((min, max)) = self.extremes() else {
            return f64::NAN;
        };
        let f = if max == min {
            0.0
        } else {
            (value - min) / (max - min)
        };
        if self.style.clamp_display_value {
            f.clamp(0.0, 1.0)
        } else {
            f
        }
    }

    fn title(&self, fallback: Option<&str>) -> Option<String> {
        self.style
            .legend_name
            .clone()
            .or_else(|| fallback.map(str::to_string))
    }

    fn build(&self) -> Built {
        match (&self.column, &self.region_provider) {
            (Some(column), _) if column.is_enum() => self.build_categories(column),
            (Some(column), _) => self.build_scalar(ScalarData {
                values: column.numerical_values(),
                extremes: self.extremes(),
                has_nulls: column.has_nulls(),
                title: self.title(Some(column.name())).unwrap_or_default(),
            }),
            (None, Some(provider)) => {
                let fallback = self.name.as_deref().unwrap_or(provider.region_type());
                self.build_scalar(ScalarData {
                    values: (0..provider.region_count()).map(|i| i as f64).collect(),
                    extremes: self.extremes(),
                    has_nulls: false,
                    title: self.title(Some(fallback)).unwrap_or_default(),
                })
            }
            (None, None) => Built {
                legend: self.name.as_ref().map(|name| Legend {
                    items: vec![LegendItem {
                        title: Some(name.clone()),
                        color: Some(color_array_to_css(self.no_column_color())),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                coloring: Coloring::None,
            },
        }
    }

    fn build_scalar(&self, data: ScalarData) -> Built {
        let color_map = self.color_map();
        let coloring = match &self.style.color_bins {
            Some(ColorBinsSpec::Boundaries(bounds)) if !bounds.is_empty() => {
                Coloring::Bins(match data.extremes {
                    Some((min, max)) => boundary_bins(bounds, min, max, color_map),
                    None => Vec::new(),
                })
            }
            Some(ColorBinsSpec::Count(0)) => Coloring::Gradient,
            _ if self.style.color_bin_method == ColorBinMethod::None => Coloring::None,
            spec => {
                let count = match spec {
                    Some(ColorBinsSpec::Count(n)) => *n as usize,
                    _ => defaults::COLOR_BINS as usize,
                };
                Coloring::Bins(self.bin_values(&data.values, count, color_map))
            }
        };

        let legend = if color_map.len() == 1 {
            // A single fixed color needs no legend
            None
        } else {
            let mut legend = match &coloring {
                Coloring::Bins(bins) => threshold_legend(bins, data.extremes),
                _ => self.gradient_legend(color_map, data.extremes),
            };
            legend.title = Some(data.title);
            if data.has_nulls {
                legend.items.insert(0, self.null_item(8.0));
            }
            Some(legend)
        };

        Built { legend, coloring }
    }

    fn bin_values(&self, values: &[f64], count: usize, color_map: &ColorMap) -> Vec<ColorBin> {
        if values.is_empty() || count == 0 {
            return Vec::new();
        }
        let use_quantiles = match self.style.color_bin_method {
            ColorBinMethod::Quantile => true,
            ColorBinMethod::Auto => values.len() > defaults::AUTO_QUANTILE_THRESHOLD,
            _ => false,
        };
        let bins = if use_quantiles {
            quantile_bins(values, count, color_map)
        } else {
            ckmeans_bins(values, count, color_map)
        };
        debug!(
            values = values.len(),
            requested = count,
            bins = bins.len(),
            method = if use_quantiles { "quantile" } else { "ckmeans" },
            "Built color bins"
        );
        bins
    }

    fn gradient_legend(&self, color_map: &ColorMap, extremes: Option<(f64, f64)>) -> Legend {
        let items = match extremes {
            Some((min, max)) => {
                let segments = 2 + self.style.legend_ticks;
                (1..=segments)
                    .map(|i| LegendItem {
                        title_above: Some(format_label(
                            min + (max - min) * (i as f64 / segments as f64),
                        )),
                        title_below: (i == 1).then(|| format_label(min)),
                        ..Default::default()
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        Legend {
            items,
            gradient_color_map: Some(color_map.stops().to_vec()),
            bar_height_min: Some(130),
            label_tick_color: Some("darkgray".to_string()),
            ..Default::default()
        }
    }

    fn build_categories(&self, column: &TableColumn) -> Built {
        let unique = column.unique_values();
        let colors = match &self.explicit_categories {
            Some(explicit) => explicit_category_colors(explicit, &unique),
            None => self.palette_category_colors(&unique),
        };

        let mut items = match &colors.cycle {
            Some(cycle) => vec![LegendItem {
                title: Some(format!("{} values", unique.len())),
                multiple_colors: Some(cycle.iter().copied().map(color_array_to_css).collect()),
                ..Default::default()
            }],
            None => {
                let mut items: Vec<LegendItem> = colors
                    .assigned
                    .iter()
                    .map(|(value, color)| LegendItem {
                        title: Some(value.clone()),
                        color: Some(color_array_to_css(*color)),
                        ..Default::default()
                    })
                    .collect();
                if unique.len() > colors.assigned.len() {
                    items.push(LegendItem {
                        title: Some(format!(
                            "{} other values",
                            unique.len() - colors.assigned.len()
                        )),
                        color: Some(color_array_to_css(colors.other)),
                        ..Default::default()
                    });
                }
                items
            }
        };
        // First value on top
        items.reverse();
        if column.has_nulls() {
            items.insert(0, self.null_item(0.0));
        }

        let legend = Legend {
            title: self.title(Some(column.name())),
            items,
            item_spacing: 2.0,
            ..Default::default()
        };
        Built {
            legend: Some(legend),
            coloring: Coloring::Categories(colors),
        }
    }

    fn palette_category_colors(&self, unique: &[String]) -> CategoryColors {
        let requested = match &self.style.color_bins {
            Some(ColorBinsSpec::Count(n)) => *n as usize,
            _ => unique.len(),
        };
        let large = &*LARGE_ENUM_COLORS;
        let bin_count = requested.min(unique.len()).min(large.len());
        let palette = if bin_count <= ENUM_COLORS.len() {
            &*ENUM_COLORS
        } else {
            large
        };
        let codes: Vec<ColorArray> = palette.iter().copied().take(bin_count).collect();

        let cycle = self.style.color_bin_method == ColorBinMethod::Cycle;
        let values_count = if codes.is_empty() || self.style.color_bin_method == ColorBinMethod::None {
            0
        } else if cycle || unique.len() <= codes.len() {
            unique.len()
        } else {
            // Last color is kept for the remaining values
            codes.len() - 1
        };

        let assigned = unique
            .iter()
            .take(values_count)
            .enumerate()
            .map(|(i, value)| (value.clone(), codes[i % codes.len()]))
            .collect();
        let mut colors = CategoryColors::new(assigned, default_other_color());
        if cycle && unique.len() > codes.len() {
            colors.cycle = Some(codes);
        }
        colors
    }

    fn null_item(&self, spacing_above: f64) -> LegendItem {
        LegendItem {
            title: Some(self.style.null_label().to_string()),
            color: Some(color_array_to_css(self.null_color())),
            spacing_above: Some(spacing_above),
            ..Default::default()
        }
    }
}

fn default_other_color() -> ColorArray {
    LARGE_ENUM_COLORS
        .last()
        .copied()
        .unwrap_or(defaults::COLOR_ARRAY)
}

/// Colors from an explicit list, skipping values absent from the column
fn explicit_category_colors(explicit: &ExplicitCategories, unique: &[String]) -> CategoryColors {
    let mut assigned: Vec<(String, ColorArray)> = Vec::new();
    let mut other = default_other_color();
    for (value, color) in explicit {
        match value {
            Some(value) if unique.contains(value) => {
                match assigned.iter_mut().find(|(v, _)| v == value) {
                    Some(existing) => existing.1 = *color,
                    None => assigned.push((value.clone(), *color)),
                }
            }
            Some(_) => {}
            None => other = *color,
        }
    }
    CategoryColors::new(assigned, other)
}

/// Numeric legend: thresholds between touching boxes plus the minimum below
fn threshold_legend(bins: &[ColorBin], extremes: Option<(f64, f64)>) -> Legend {
    let min = extremes.map(|(min, _)| min);
    let last = bins.len().saturating_sub(1);
    let items = bins
        .iter()
        .enumerate()
        .map(|(i, bin)| {
            // Skip the top label when it repeats the one below it
            let show_above = i == 0 || i < last || bin.upper_bound > bins[i - 1].upper_bound;
            LegendItem {
                title_above: show_above.then(|| format_label(bin.upper_bound)),
                title_below: min
                    .filter(|&min| i == 0 && bin.upper_bound != min)
                    .map(format_label),
                color: Some(color_array_to_css(bin.color)),
                ..Default::default()
            }
        })
        .collect();
    Legend {
        items,
        item_spacing: 0.0,
        ..Default::default()
    }
}
