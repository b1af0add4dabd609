//! Region matching and choropleth binning
//!
//! Module organization:
//! - `config`: region mapping and table style configuration
//! - `region`: region providers, ID loading and code matching
//! - `table`: dataset columns
//! - `legend`: color bins, color maps and legend descriptions
//! - `logging`: tracing subscriber setup

pub mod config;
pub mod legend;
pub mod logging;
pub mod region;
pub mod table;
