//! CSS color parsing and the default palettes
//!
//! Colors are handled as `[r, g, b, a]` arrays with every channel in 0..=255.

use crate::config::defaults;
use once_cell::sync::Lazy;
use tracing::warn;

/// RGBA color, alpha in 0..=255
pub type ColorArray = [u8; 4];

/// Small categorical palette (ColorBrewer Set1)
pub static ENUM_COLORS: Lazy<Vec<ColorArray>> =
    Lazy::new(|| parse_palette(&defaults::ENUM_COLOR_CODES));

/// High-contrast palette for large categorical columns
pub static LARGE_ENUM_COLORS: Lazy<Vec<ColorArray>> =
    Lazy::new(|| parse_palette(&defaults::LARGE_ENUM_COLOR_CODES));

fn parse_palette(codes: &[&str]) -> Vec<ColorArray> {
    codes
        .iter()
        .filter_map(|code| {
            let color = parse_css_color(code);
            if color.is_none() {
                warn!(color = %code, "Skipping invalid palette color");
            }
            color
        })
        .collect()
}

/// Parse a CSS color string.
///
/// Accepts every CSS color form: hex (`#RGB` to `#RRGGBBAA`), `rgb()`/`rgba()`,
/// `hsl()`/`hsla()`, `hwb()` and the full set of named colors.
pub fn parse_css_color(css: &str) -> Option<ColorArray> {
    csscolorparser::parse(css.trim())
        .ok()
        .map(|color| color.to_rgba8())
}

/// Render as `rgba(r,g,b,a)` with alpha as a fraction
pub fn color_array_to_css(color: ColorArray) -> String {
    let alpha = (color[3] as f64 / 255.0 * 1000.0).round() / 1000.0;
    format!("rgba({},{},{},{})", color[0], color[1], color[2], alpha)
}

/// Stable 31-bit hash of a string, used to pick a color for a layer name
pub fn hash_from_string(s: &str) -> u32 {
    let hash = s
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32));
    hash.unsigned_abs()
}

/// Color for layers without an active column, derived from the layer name
pub fn no_column_color(name: &str) -> ColorArray {
    let palette = &*LARGE_ENUM_COLORS;
    if palette.is_empty() {
        return defaults::COLOR_ARRAY;
    }
    palette[hash_from_string(name) as usize % palette.len()]
}
