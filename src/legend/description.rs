//! Legend description handed to the (external) legend renderer

use super::color_map::ColorStop;
use super::error::Result;
use base64::Engine;
use serde::Serialize;

/// One legend entry. Items are listed bottom to top.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendItem {
    /// Label centred on the box
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Label on the boundary above the box
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_above: Option<String>,
    /// Label on the boundary below the box
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_below: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Several colors sharing one box (cycled categories)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_colors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing_above: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Legend {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub items: Vec<LegendItem>,
    pub item_spacing: f64,
    /// Present for smooth gradient legends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient_color_map: Option<Vec<ColorStop>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bar_height_min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_tick_color: Option<String>,
}

impl Legend {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The legend as a base64 `data:` URL
    pub fn to_data_url(&self) -> Result<String> {
        let json = self.to_json()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json.as_bytes());
        Ok(format!("data:application/json;base64,{}", encoded))
    }
}

/// Format a legend number with at most two decimal places
pub fn format_label(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        // Avoid "-0"
        return "0".to_string();
    }
    rounded.to_string()
}
