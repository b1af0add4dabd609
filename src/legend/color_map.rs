//! Gradient color maps
//!
//! A [`ColorMap`] is an ordered list of `{offset, color}` stops. On
//! construction the stops are rendered into a 256-entry RGBA table which is
//! then indexed by `floor(fraction × 255)`.

use super::color::{parse_css_color, ColorArray};
use super::error::{LegendError, Result};
use crate::config::{defaults, ColorMapSpec, ColorStopSpec};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::error;

const TABLE_SIZE: usize = 256;

/// Default gradient for scalar columns
pub static DEFAULT_SCALAR_COLOR_MAP: Lazy<ColorMap> = Lazy::new(|| {
    let stops: Vec<ColorStopSpec> = defaults::SCALAR_COLOR_MAP
        .iter()
        .map(|(offset, color)| ColorStopSpec {
            offset: *offset,
            color: color.to_string(),
        })
        .collect();
    ColorMap::from_stops(&stops).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build default color map");
        ColorMap::solid(defaults::COLOR_ARRAY)
    })
});

/// A gradient stop as shown in legends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorStop {
    pub offset: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorMap {
    stops: Vec<ColorStop>,
    table: Vec<ColorArray>,
}

impl ColorMap {
    pub fn from_spec(spec: &ColorMapSpec) -> Result<Self> {
        match spec {
            ColorMapSpec::Delimited(s) => Self::from_delimited(s),
            ColorMapSpec::Colors(colors) => Self::from_colors(colors),
            ColorMapSpec::Stops(stops) => Self::from_stops(stops),
        }
    }

    /// Parse `"red-orange-#ffff00"`; colors are spaced evenly from 0 to 1.
    pub fn from_delimited(s: &str) -> Result<Self> {
        let colors: Vec<&str> = s.split('-').map(str::trim).collect();
        Self::from_colors(&colors)
    }

    /// Colors spaced evenly from 0 to 1.
    pub fn from_colors<S: AsRef<str>>(colors: &[S]) -> Result<Self> {
        let last = colors.len().saturating_sub(1);
        let stops: Vec<ColorStopSpec> = colors
            .iter()
            .enumerate()
            .map(|(i, color)| ColorStopSpec {
                offset: if last == 0 { 0.0 } else { i as f64 / last as f64 },
                color: color.as_ref().to_string(),
            })
            .collect();
        Self::from_stops(&stops)
    }

    pub fn from_stops(specs: &[ColorStopSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(LegendError::InvalidColorMap("no color stops".to_string()));
        }

        let mut parsed = Vec::with_capacity(specs.len());
        for spec in specs {
            if !(0.0..=1.0).contains(&spec.offset) {
                return Err(LegendError::InvalidColorMap(format!(
                    "offset {} is outside [0, 1]",
                    spec.offset
                )));
            }
            let color = parse_css_color(&spec.color)
                .ok_or_else(|| LegendError::InvalidColor(spec.color.clone()))?;
            parsed.push((spec.offset, color));
        }
        // Stable, so equal offsets keep their listed order
        parsed.sort_by(|a, b| a.0.total_cmp(&b.0));

        let table = (0..TABLE_SIZE)
            .map(|i| interpolate(&parsed, i as f64 / (TABLE_SIZE - 1) as f64))
            .collect();
        let stops = specs
            .iter()
            .map(|s| ColorStop {
                offset: s.offset,
                color: s.color.clone(),
            })
            .collect();

        Ok(Self { stops, table })
    }

    /// Single-color map
    pub fn solid(color: ColorArray) -> Self {
        Self {
            stops: vec![ColorStop {
                offset: 0.0,
                color: super::color::color_array_to_css(color),
            }],
            table: vec![color; TABLE_SIZE],
        }
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Color at a fraction of the gradient; out-of-range fractions clamp.
    pub fn sample(&self, fraction: f64) -> ColorArray {
        let index = if fraction.is_nan() {
            0
        } else {
            (fraction * (TABLE_SIZE - 1) as f64)
                .floor()
                .clamp(0.0, (TABLE_SIZE - 1) as f64) as usize
        };
        self.table[index]
    }
}

fn interpolate(stops: &[(f64, ColorArray)], t: f64) -> ColorArray {
    let (first_offset, first) = stops[0];
    if t <= first_offset {
        return first;
    }
    let (last_offset, last) = stops[stops.len() - 1];
    if t >= last_offset {
        return last;
    }

    let idx = stops.partition_point(|(offset, _)| *offset <= t);
    let (lo_offset, lo) = stops[idx - 1];
    let (hi_offset, hi) = stops[idx];
    let span = hi_offset - lo_offset;
    let frac = if span > 0.0 { (t - lo_offset) / span } else { 1.0 };

    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (lo[c] as f64 * (1.0 - frac) + hi[c] as f64 * frac).round() as u8;
    }
    out
}
