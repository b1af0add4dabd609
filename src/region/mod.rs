//! Region matching
//!
//! Providers load authoritative region-ID lists through a [`RegionFetcher`]
//! and match messy user codes against them, using regex normalization and a
//! disambiguation column when codes collide.

pub mod error;
pub mod fetch;
pub mod provider;
pub mod provider_list;
pub mod replacements;

pub use error::{FetchError, RegionError, Result};
pub use fetch::{FileFetcher, RegionFetcher};
pub use provider::{IndexEntry, Region, RegionProvider, TimeFilter, TimeInterval};
pub use provider_list::{RegionDetails, RegionProviderList};
pub use replacements::{DisambigSettings, ReplacementCache, ReplacementChain, ReplacementSet};
