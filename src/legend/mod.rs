//! Color bins, color maps and legends for the active display column
//!
//! [`LegendHelper`] is the entry point: it turns a [`crate::config::TableStyle`]
//! and a [`crate::table::TableColumn`] into per-value colors and a
//! [`Legend`] description.

pub mod binning;
pub mod color;
pub mod color_map;
pub mod description;
pub mod error;
pub mod helper;

pub use binning::ColorBin;
pub use color::{color_array_to_css, parse_css_color, ColorArray};
pub use color_map::{ColorMap, ColorStop};
pub use description::{Legend, LegendItem};
pub use error::{LegendError, Result};
pub use helper::LegendHelper;
