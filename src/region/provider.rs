//! Matching of user-supplied region codes against one region type
//!
//! A [`RegionProvider`] owns the canonical ID list for a region type (e.g.
//! "SA4" or "STE"), fetched lazily through a [`RegionFetcher`]. Once loaded it
//! keeps an index from normalized code to feature index, which is used to map
//! every row of a dataset onto a region.

use super::error::{FetchError, RegionError, Result};
use super::fetch::RegionFetcher;
use super::replacements::{
    base_normalize, DisambigSettings, ReplacementCache, ReplacementChain, ReplacementSet,
};
use crate::config::{AmbiguityPolicy, RegionProviderConfig};
use crate::legend::color::ColorArray;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use regex::RegexBuilder;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

/// One canonical region, identified by its position in the ID list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    /// Feature id; equals the position in the ID list
    pub fid: usize,
    /// ID as listed by the server (numbers rendered as text)
    pub id: Option<String>,
    /// ID after server replacements
    pub normalized_id: Option<String>,
    /// Disambiguation value, lower-cased
    pub disambig: Option<String>,
    /// Disambiguation value after the disambiguation server replacements
    pub normalized_disambig: Option<String>,
    numeric: bool,
}

/// Lookup index entry for a normalized code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEntry {
    Unique(usize),
    Ambiguous(Vec<usize>),
}

impl IndexEntry {
    fn push(&mut self, fid: usize) {
        match self {
            IndexEntry::Unique(existing) => *self = IndexEntry::Ambiguous(vec![*existing, fid]),
            IndexEntry::Ambiguous(candidates) => candidates.push(fid),
        }
    }
}

/// Validity interval of a time-varying row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub start_included: bool,
    pub stop_included: bool,
}

impl TimeInterval {
    /// Closed interval `[start, stop]`
    pub fn closed(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start,
            stop,
            start_included: true,
            stop_included: true,
        }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        let after_start = time > self.start || (self.start_included && time == self.start);
        let before_stop = time < self.stop || (self.stop_included && time == self.stop);
        after_start && before_stop
    }
}

/// Restricts matching to rows whose interval contains `time`.
#[derive(Debug, Clone, Copy)]
pub struct TimeFilter<'a> {
    /// One entry per row; rows without an interval never apply
    pub intervals: &'a [Option<TimeInterval>],
    pub time: DateTime<Utc>,
}

/// Why a shared load failed; cloneable so every waiter gets a copy
#[derive(Debug, Clone)]
enum LoadFailure {
    Fetch(FetchError),
    Load(String),
}

impl From<LoadFailure> for RegionError {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::Fetch(e) => RegionError::Fetch(e),
            LoadFailure::Load(message) => RegionError::Load(message),
        }
    }
}

type PendingLoad =
    Shared<BoxFuture<'static, std::result::Result<Arc<LoadedRegions>, LoadFailure>>>;

#[derive(Debug)]
struct LoadedRegions {
    regions: Vec<Region>,
    index: HashMap<String, IndexEntry>,
}

fn index_insert(index: &mut HashMap<String, IndexEntry>, key: &str, fid: usize) {
    match index.get_mut(key) {
        // One region can reach the same key twice (raw and normalized)
        Some(IndexEntry::Unique(existing)) if *existing == fid => {}
        Some(IndexEntry::Ambiguous(candidates)) if candidates.contains(&fid) => {}
        Some(entry) => entry.push(fid),
        None => {
            index.insert(key.to_string(), IndexEntry::Unique(fid));
        }
    }
}

/// Everything needed to turn fetched ID lists into records and an index,
/// detached from the provider so it can run inside the shared load.
struct RegionIndexBuilder {
    region_type: String,
    server_replacements: Arc<ReplacementChain>,
    disambig_server_replacements: Arc<ReplacementChain>,
    cache: Arc<ReplacementCache>,
    #[cfg(test)]
    builds: Arc<std::sync::atomic::AtomicUsize>,
}

impl RegionIndexBuilder {
    fn build(
        &self,
        ids: &serde_json::Value,
        disambig: Option<&serde_json::Value>,
    ) -> std::result::Result<LoadedRegions, LoadFailure> {
        #[cfg(test)]
        self.builds
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let values = id_values(ids).ok_or_else(|| {
            LoadFailure::Load(format!(
                "Region ID list for {} has no 'values' array",
                self.region_type
            ))
        })?;

        let mut regions = Vec::with_capacity(values.len());
        let mut index: HashMap<String, IndexEntry> = HashMap::new();

        for (fid, value) in values.iter().enumerate() {
            let mut region = Region {
                fid,
                ..Region::default()
            };
            if let Some((raw, numeric)) = id_text(value) {
                let normalized = if numeric {
                    raw.clone()
                } else {
                    self.cache
                        .apply(ReplacementSet::Server, &self.server_replacements, &raw)
                };
                if raw != normalized {
                    index_insert(&mut index, &raw, fid);
                }
                index_insert(&mut index, &normalized, fid);
                region.id = Some(raw);
                region.normalized_id = Some(normalized);
                region.numeric = numeric;
            }
            regions.push(region);
        }

        if let Some(disambig_doc) = disambig {
            let disambig_values = id_values(disambig_doc).ok_or_else(|| {
                LoadFailure::Load(format!(
                    "Disambiguation ID list for {} has no 'values' array",
                    self.region_type
                ))
            })?;
            if disambig_values.len() != regions.len() {
                warn!(
                    region_type = %self.region_type,
                    regions = regions.len(),
                    disambig = disambig_values.len(),
                    "Disambiguation list length differs from region list"
                );
            }
            for (region, value) in regions.iter_mut().zip(disambig_values) {
                if let Some((raw, numeric)) = id_text(value) {
                    let normalized = if numeric {
                        raw.clone()
                    } else {
                        self.cache.apply(
                            ReplacementSet::DisambigServer,
                            &self.disambig_server_replacements,
                            &raw,
                        )
                    };
                    region.disambig = Some(base_normalize(&raw));
                    region.normalized_disambig = Some(normalized);
                }
            }
        }

        Ok(LoadedRegions { regions, index })
    }
}

/// Outcome of looking a single code up in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Found(usize),
    /// Several candidates and nothing to narrow them down; carries the first
    Ambiguous(usize),
    Missing,
}

/// Matching logic for one region type.
pub struct RegionProvider {
    region_type: String,
    config: RegionProviderConfig,
    server_replacements: Arc<ReplacementChain>,
    data_replacements: Arc<ReplacementChain>,
    disambig: DisambigSettings,
    cache: Arc<ReplacementCache>,
    fetcher: Arc<dyn RegionFetcher>,
    pending: Mutex<Option<PendingLoad>>,
    #[cfg(test)]
    index_builds: Arc<std::sync::atomic::AtomicUsize>,
    loaded: OnceLock<Arc<LoadedRegions>>,
}

impl std::fmt::Debug for RegionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionProvider")
            .field("region_type", &self.region_type)
            .field("region_count", &self.region_count())
            .finish()
    }
}

impl RegionProvider {
    /// Create a provider; replacement patterns are compiled up front.
    pub fn new(
        region_type: impl Into<String>,
        config: RegionProviderConfig,
        fetcher: Arc<dyn RegionFetcher>,
    ) -> Result<Self> {
        let region_type = region_type.into();
        let server_replacements = Arc::new(ReplacementChain::compile(&config.server_replacements)?);
        let data_replacements = Arc::new(ReplacementChain::compile(&config.data_replacements)?);

        Ok(Self {
            region_type,
            config,
            server_replacements,
            data_replacements,
            disambig: DisambigSettings::default(),
            cache: Arc::new(ReplacementCache::new()),
            fetcher,
            pending: Mutex::new(None),
            #[cfg(test)]
            index_builds: Arc::default(),
            loaded: OnceLock::new(),
        })
    }

    pub fn region_type(&self) -> &str {
        &self.region_type
    }

    pub fn config(&self) -> &RegionProviderConfig {
        &self.config
    }

    pub fn region_prop(&self) -> Option<&str> {
        self.config.region_prop.as_deref()
    }

    pub fn unique_id_prop(&self) -> &str {
        self.config
            .unique_id_prop
            .as_deref()
            .unwrap_or(crate::config::defaults::UNIQUE_ID_PROP)
    }

    pub fn server_type(&self) -> &str {
        self.config
            .server_type
            .as_deref()
            .unwrap_or(crate::config::defaults::SERVER_TYPE)
    }

    /// Region type followed by the configured aliases
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases = vec![self.region_type.clone()];
        if let Some(configured) = &self.config.aliases {
            aliases.extend(configured.iter().cloned());
        }
        aliases
    }

    pub fn disambig_aliases(&self) -> &[String] {
        &self.disambig.aliases
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Number of canonical regions; 0 until the ID list is loaded
    pub fn region_count(&self) -> usize {
        self.loaded.get().map_or(0, |l| l.regions.len())
    }

    /// Canonical regions in feature order; empty until loaded
    pub fn regions(&self) -> &[Region] {
        self.loaded
            .get()
            .map(|l| l.regions.as_slice())
            .unwrap_or(&[])
    }

    /// Settings another provider needs to use this one as its disambiguation column
    pub fn disambig_settings(&self) -> DisambigSettings {
        DisambigSettings {
            data_replacements: Arc::clone(&self.data_replacements),
            server_replacements: Arc::clone(&self.server_replacements),
            aliases: self.aliases(),
        }
    }

    /// Adopt the disambiguation replacements and aliases of another provider.
    pub fn set_disambig_properties(&mut self, settings: DisambigSettings) {
        self.disambig = settings;
    }

    /// Load the canonical ID list (and disambiguation list, if configured).
    ///
    /// Idempotent. Concurrent callers share one in-flight fetch. A failed
    /// fetch is reported to every waiter and forgotten, so a later call
    /// starts a fresh one.
    pub async fn load_region_ids(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        if self.config.server.is_none() {
            return Err(RegionError::Load(format!(
                "No server for region mapping defined: {}",
                self.region_type
            )));
        }
        let ids_file = self.config.region_ids_file.clone().ok_or_else(|| {
            RegionError::Load(format!(
                "No region ID list configured for region type {}",
                self.region_type
            ))
        })?;

        let pending = {
            let mut slot = self.lock_pending();
            slot.get_or_insert_with(|| {
                debug!(region_type = %self.region_type, url = %ids_file, "Fetching region IDs");
                self.start_fetch(ids_file, self.config.region_disambig_ids_file.clone())
            })
            .clone()
        };

        match pending.clone().await {
            Ok(loaded) => {
                let regions = loaded.regions.len();
                if self.loaded.set(loaded).is_ok() {
                    info!(region_type = %self.region_type, regions, "Loaded region IDs");
                }
                self.clear_pending(&pending);
                Ok(())
            }
            Err(failure) => {
                let e = RegionError::from(failure);
                warn!(region_type = %self.region_type, error = %e, "Failed to load region IDs");
                self.clear_pending(&pending);
                Err(e)
            }
        }
    }

    /// Forget `pending` unless a newer load has replaced it.
    fn clear_pending(&self, pending: &PendingLoad) {
        let mut slot = self.lock_pending();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(pending)) {
            *slot = None;
        }
    }

    /// Fetch both ID lists and build the index once, shared by every waiter.
    fn start_fetch(&self, ids_file: String, disambig_file: Option<String>) -> PendingLoad {
        let fetcher = Arc::clone(&self.fetcher);
        let builder = RegionIndexBuilder {
            region_type: self.region_type.clone(),
            server_replacements: Arc::clone(&self.server_replacements),
            disambig_server_replacements: Arc::clone(&self.disambig.server_replacements),
            cache: Arc::clone(&self.cache),
            #[cfg(test)]
            builds: Arc::clone(&self.index_builds),
        };
        async move {
            let ids = fetcher.fetch_json(&ids_file);
            let disambig = async {
                match &disambig_file {
                    Some(url) => fetcher.fetch_json(url).await.map(Some),
                    None => Ok(None),
                }
            };
            let (ids, disambig) =
                futures::try_join!(ids, disambig).map_err(LoadFailure::Fetch)?;
            builder.build(&ids, disambig.as_ref()).map(Arc::new)
        }
        .boxed()
        .shared()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingLoad>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Find the feature index for a user-supplied code.
    ///
    /// Returns `None` for empty codes, unknown codes, codes that cannot be
    /// disambiguated, and before the ID list is loaded.
    pub fn find_region_index(&self, code: &str, disambig_code: Option<&str>) -> Option<usize> {
        let loaded = self.loaded.get()?;
        match self.lookup(loaded, code, disambig_code) {
            Lookup::Found(fid) | Lookup::Ambiguous(fid) => Some(fid),
            Lookup::Missing => None,
        }
    }

    fn lookup(&self, loaded: &LoadedRegions, code: &str, disambig_code: Option<&str>) -> Lookup {
        if code.trim().is_empty() {
            return Lookup::Missing;
        }

        let replaced = self
            .cache
            .apply(ReplacementSet::Data, &self.data_replacements, code);
        let lowered = base_normalize(code);
        let entries: Vec<&IndexEntry> = [code, replaced.as_str(), lowered.as_str()]
            .iter()
            .filter_map(|key| loaded.index.get(*key))
            .collect();

        // An ambiguous group always goes through disambiguation, even when
        // another key has a single hit
        let ambiguous = entries.iter().find_map(|entry| match entry {
            IndexEntry::Ambiguous(candidates) => Some(candidates),
            IndexEntry::Unique(_) => None,
        });
        let candidates = match (ambiguous, entries.first()) {
            (Some(candidates), _) => candidates,
            (None, Some(IndexEntry::Unique(fid))) => return Lookup::Found(*fid),
            _ => return Lookup::Missing,
        };

        match disambig_code.filter(|d| !d.trim().is_empty()) {
            None => {
                warn!(
                    region_type = %self.region_type,
                    code = %replaced,
                    candidates = candidates.len(),
                    "Ambiguous value found in region mapping"
                );
                match self.config.ambiguity_policy {
                    AmbiguityPolicy::FirstCandidate => Lookup::Ambiguous(candidates[0]),
                    AmbiguityPolicy::Reject => Lookup::Missing,
                }
            }
            Some(disambig_code) => {
                if self.config.disambig_prop.is_none() {
                    return Lookup::Missing;
                }
                let wanted = self.cache.apply(
                    ReplacementSet::DisambigData,
                    &self.disambig.data_replacements,
                    disambig_code,
                );
                candidates
                    .iter()
                    .copied()
                    .find(|&fid| {
                        let region = &loaded.regions[fid];
                        region.disambig.as_deref() == Some(wanted.as_str())
                            || region.normalized_disambig.as_deref() == Some(wanted.as_str())
                    })
                    .map_or(Lookup::Missing, Lookup::Found)
            }
        }
    }

    /// Map dataset rows onto regions.
    ///
    /// The result has one slot per region holding the row that applies to it.
    /// Unmatched rows are appended to `failed_matches`; rows resolved to a
    /// first candidate, and rows that collide with an earlier row for the same
    /// region, are appended to `ambiguous_matches`.
    pub fn map_regions_to_indices_into<S, D>(
        &self,
        region_array: &[Option<S>],
        disambig_values: Option<&[Option<D>]>,
        mut failed_matches: Option<&mut Vec<usize>>,
        mut ambiguous_matches: Option<&mut Vec<usize>>,
        time_filter: Option<TimeFilter<'_>>,
    ) -> Result<Vec<Option<usize>>>
    where
        S: AsRef<str>,
        D: AsRef<str>,
    {
        let loaded = self
            .loaded
            .get()
            .filter(|l| !l.regions.is_empty())
            .ok_or_else(|| RegionError::NotLoaded(self.region_type.clone()))?;

        let mut result: Vec<Option<usize>> = vec![None; loaded.regions.len()];

        for (row, code) in region_array.iter().enumerate() {
            let Some(code) = code else { continue };

            let interval = match &time_filter {
                Some(filter) => match filter.intervals.get(row).copied().flatten() {
                    Some(interval) if interval.contains(filter.time) => Some(interval),
                    _ => continue,
                },
                None => None,
            };

            let disambig = disambig_values
                .and_then(|values| values.get(row))
                .and_then(|v| v.as_ref())
                .map(D::as_ref);

            let fid = match self.lookup(loaded, code.as_ref(), disambig) {
                Lookup::Found(fid) => fid,
                Lookup::Ambiguous(fid) => {
                    if let Some(ambiguous) = ambiguous_matches.as_deref_mut() {
                        ambiguous.push(row);
                    }
                    fid
                }
                Lookup::Missing => {
                    if let Some(failed) = failed_matches.as_deref_mut() {
                        failed.push(row);
                    }
                    continue;
                }
            };

            let Some(existing) = result[fid] else {
                result[fid] = Some(row);
                continue;
            };

            if let (Some(filter), Some(new_interval)) = (&time_filter, interval) {
                let existing_start = filter
                    .intervals
                    .get(existing)
                    .copied()
                    .flatten()
                    .map(|i| i.start);
                match existing_start {
                    Some(start) if new_interval.start > start => {
                        result[fid] = Some(row);
                        continue;
                    }
                    Some(start) if new_interval.start < start => continue,
                    _ => {}
                }
            }

            if let Some(ambiguous) = ambiguous_matches.as_deref_mut() {
                ambiguous.push(row);
            }
        }

        debug!(
            region_type = %self.region_type,
            rows = region_array.len(),
            matched = result.iter().filter(|r| r.is_some()).count(),
            "Mapped rows to regions"
        );
        Ok(result)
    }

    /// Pre-compute one color per region for the tile recoloring callback.
    pub fn get_color_lookup_func<F>(
        &self,
        region_values: &[Option<f64>],
        color_fn: F,
    ) -> impl Fn(usize) -> Option<ColorArray> + Send + Sync
    where
        F: Fn(Option<f64>) -> Option<ColorArray>,
    {
        let colors: Vec<Option<ColorArray>> =
            region_values.iter().map(|value| color_fn(*value)).collect();
        move |region_index| colors.get(region_index).copied().flatten()
    }

    /// Find a loaded region by its server-side ID.
    pub fn find_region_by_id(&self, region_id: &str) -> Option<&Region> {
        let regions = self.regions();
        if regions.first().is_some_and(|r| r.numeric) {
            let wanted: f64 = region_id.trim().parse().ok()?;
            return regions.iter().find(|r| {
                r.id.as_deref()
                    .and_then(|id| id.parse::<f64>().ok())
                    .is_some_and(|id| id == wanted)
            });
        }

        let lowered = base_normalize(region_id);
        let replaced = self
            .cache
            .apply(ReplacementSet::Server, &self.server_replacements, region_id);
        regions
            .iter()
            .find(|r| r.id.as_deref().map(base_normalize).as_deref() == Some(lowered.as_str()))
            .or_else(|| {
                regions
                    .iter()
                    .find(|r| r.normalized_id.as_deref() == Some(replaced.as_str()))
            })
    }

    /// Pick the column holding this provider's region codes.
    pub fn find_region_variable<S: AsRef<str>>(&self, var_names: &[S]) -> Option<String> {
        find_variable_for_aliases(var_names, &self.aliases())
    }

    /// Pick the column holding disambiguation values, if this provider has any.
    pub fn find_disambig_variable<S: AsRef<str>>(&self, var_names: &[S]) -> Option<String> {
        if self.disambig.aliases.is_empty() {
            return None;
        }
        find_variable_for_aliases(var_names, &self.disambig.aliases)
    }

    /// URL of a vector tile, with `{z}`, `{x}`, `{y}` and `{s}` filled in.
    pub fn tile_url(&self, x: u32, y: u32, z: u32) -> Option<String> {
        let server = self.config.server.as_deref()?;
        let subdomain = self
            .config
            .server_subdomains
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| s[(x as usize + y as usize) % s.len()].as_str())
            .unwrap_or("");
        Some(
            server
                .replace("{z}", &z.to_string())
                .replace("{x}", &x.to_string())
                .replace("{y}", &y.to_string())
                .replace("{s}", subdomain),
        )
    }

    /// Fetch one tile of this provider's boundaries.
    pub async fn fetch_tile(&self, x: u32, y: u32, z: u32) -> Result<Vec<u8>> {
        let url = self.tile_url(x, y, z).ok_or_else(|| {
            RegionError::Load(format!(
                "No server for region mapping defined: {}",
                self.region_type
            ))
        })?;
        Ok(self.fetcher.fetch_tile(&url).await?)
    }
}

fn id_values(doc: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    doc.get("values").and_then(|v| v.as_array())
}

/// Text form of an ID and whether it was numeric
fn id_text(value: &serde_json::Value) -> Option<(String, bool)> {
    match value {
        serde_json::Value::String(s) => Some((s.clone(), false)),
        serde_json::Value::Number(n) => Some((n.to_string(), true)),
        _ => None,
    }
}

fn alias_regex(pattern: &str) -> Option<regex::Regex> {
    RegexBuilder::new(&format!("^{}$", pattern))
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&format!("^{}$", regex::escape(pattern)))
                .case_insensitive(true)
                .build()
        })
        .ok()
}

fn strip_separators(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect()
}

/// First column matching an alias, aliases taking priority over column order.
///
/// A second pass ignores whitespace, hyphens and underscores on both sides.
pub fn find_variable_for_aliases<S: AsRef<str>>(
    var_names: &[S],
    aliases: &[String],
) -> Option<String> {
    let exact = aliases.iter().find_map(|alias| {
        let re = alias_regex(alias)?;
        var_names
            .iter()
            .map(AsRef::as_ref)
            .find(|name| re.is_match(name))
    });
    if let Some(name) = exact {
        return Some(name.to_string());
    }

    aliases
        .iter()
        .find_map(|alias| {
            let re = alias_regex(&strip_separators(alias))?;
            var_names
                .iter()
                .map(AsRef::as_ref)
                .find(|name| re.is_match(&strip_separators(name)))
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::fetch::testing::MemoryFetcher;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn pairs(rules: &[(&str, &str)]) -> Vec<(String, String)> {
        rules
            .iter()
            .map(|(p, r)| (p.to_string(), r.to_string()))
            .collect()
    }

    fn ste_config() -> RegionProviderConfig {
        RegionProviderConfig {
            region_prop: Some("STE_NAME11".to_string()),
            aliases: Some(vec!["ste".to_string(), "state".to_string()]),
            server: Some("https://tiles.example/ste/{z}/{x}/{y}.pbf".to_string()),
            data_replacements: pairs(&[("^nsw$", "new south wales"), ("^qld$", "queensland")]),
            region_ids_file: Some("ids/STE.json".to_string()),
            ..Default::default()
        }
    }

    fn ssc_config() -> RegionProviderConfig {
        RegionProviderConfig {
            region_prop: Some("SSC_NAME".to_string()),
            aliases: Some(vec!["suburb".to_string()]),
            server: Some("https://tiles.example/ssc".to_string()),
            server_replacements: pairs(&[(r" \(.*\)$", "")]),
            disambig_prop: Some("STE_NAME11".to_string()),
            disambig_region_id: Some("STE".to_string()),
            region_ids_file: Some("ids/SSC.json".to_string()),
            region_disambig_ids_file: Some("ids/SSC_STE.json".to_string()),
            ..Default::default()
        }
    }

    fn suburb_fetcher() -> MemoryFetcher {
        let fetcher = MemoryFetcher::new();
        fetcher.insert_ids(
            "ids/STE.json",
            json!(["New South Wales", "Victoria", "Queensland"]),
        );
        fetcher.insert_ids(
            "ids/SSC.json",
            json!(["Campbelltown (NSW)", "Campbelltown (Qld)", "Parramatta", "Richmond"]),
        );
        fetcher.insert_ids(
            "ids/SSC_STE.json",
            json!(["New South Wales", "Queensland", "New South Wales", "Victoria"]),
        );
        fetcher
    }

    async fn loaded_suburbs(fetcher: Arc<MemoryFetcher>) -> RegionProvider {
        let ste = RegionProvider::new("STE", ste_config(), fetcher.clone()).unwrap();
        let mut ssc = RegionProvider::new("SSC", ssc_config(), fetcher).unwrap();
        ssc.set_disambig_properties(ste.disambig_settings());
        ssc.load_region_ids().await.unwrap();
        ssc
    }

    #[tokio::test]
    async fn test_load_region_ids_counts_regions() {
        let fetcher = suburb_fetcher().into_arc();
        let provider = RegionProvider::new("STE", ste_config(), fetcher.clone()).unwrap();
        assert!(!provider.is_loaded());
        assert_eq!(provider.region_count(), 0);

        provider.load_region_ids().await.unwrap();
        assert_eq!(provider.region_count(), 3);

        // Second call does not fetch again
        provider.load_region_ids().await.unwrap();
        assert_eq!(fetcher.requests_for("ids/STE.json"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = suburb_fetcher()
            .with_delay(Duration::from_millis(30))
            .into_arc();
        let provider = Arc::new(RegionProvider::new("STE", ste_config(), fetcher.clone()).unwrap());

        let loads = (0..5).map(|_| {
            let provider = Arc::clone(&provider);
            async move { provider.load_region_ids().await }
        });
        let results = futures::future::join_all(loads).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fetcher.requests_for("ids/STE.json"), 1);
        assert_eq!(provider.region_count(), 3);
        // The index is built once for all waiters
        assert_eq!(
            provider
                .index_builds
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_loads_across_tasks() {
        let fetcher = suburb_fetcher()
            .with_delay(Duration::from_millis(30))
            .into_arc();
        let provider = Arc::new(RegionProvider::new("STE", ste_config(), fetcher.clone()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.load_region_ids().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(fetcher.total_requests(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_can_be_retried() {
        let fetcher = MemoryFetcher::new().into_arc();
        let provider = RegionProvider::new("STE", ste_config(), fetcher.clone()).unwrap();

        let err = provider.load_region_ids().await.unwrap_err();
        assert!(matches!(err, RegionError::Fetch(FetchError::Unavailable { .. })));
        assert!(!provider.is_loaded());

        fetcher.insert_ids("ids/STE.json", json!(["Victoria"]));
        provider.load_region_ids().await.unwrap();
        assert_eq!(provider.region_count(), 1);
        assert_eq!(fetcher.requests_for("ids/STE.json"), 2);
    }

    #[tokio::test]
    async fn test_no_server_is_load_error() {
        let config = RegionProviderConfig {
            server: None,
            ..ste_config()
        };
        let provider =
            RegionProvider::new("STE", config, MemoryFetcher::new().into_arc()).unwrap();
        let err = provider.load_region_ids().await.unwrap_err();
        assert!(matches!(err, RegionError::Load(_)));
    }

    #[tokio::test]
    async fn test_missing_values_array_is_load_error() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("ids/STE.json", json!({"layer": "STE"}));
        let provider = RegionProvider::new("STE", ste_config(), fetcher.into_arc()).unwrap();
        let err = provider.load_region_ids().await.unwrap_err();
        assert!(matches!(err, RegionError::Load(_)));
    }

    #[tokio::test]
    async fn test_find_region_index_round_trip() {
        let fetcher = suburb_fetcher().into_arc();
        let provider = RegionProvider::new("STE", ste_config(), fetcher).unwrap();
        provider.load_region_ids().await.unwrap();

        for region in provider.regions() {
            let id = region.id.as_deref().unwrap();
            assert_eq!(provider.find_region_index(id, None), Some(region.fid));
        }
        assert_eq!(provider.find_region_index("nsw", None), Some(0));
        assert_eq!(provider.find_region_index(" QLD ", None), Some(2));
        assert_eq!(provider.find_region_index("", None), None);
        assert_eq!(provider.find_region_index("Tasmania", None), None);
    }

    #[tokio::test]
    async fn test_numeric_ids() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert_ids("ids/POA.json", json!([2000, 2001, null, 3000]));
        let config = RegionProviderConfig {
            server: Some("https://tiles.example/poa".to_string()),
            region_ids_file: Some("ids/POA.json".to_string()),
            ..Default::default()
        };
        let provider = RegionProvider::new("POA", config, fetcher.into_arc()).unwrap();
        provider.load_region_ids().await.unwrap();

        assert_eq!(provider.region_count(), 4);
        assert_eq!(provider.find_region_index("3000", None), Some(3));
        assert_eq!(provider.find_region_by_id(" 2001").map(|r| r.fid), Some(1));
        assert!(provider.regions()[2].id.is_none());
    }

    #[tokio::test]
    async fn test_campbelltown_disambiguation() {
        let provider = loaded_suburbs(suburb_fetcher().into_arc()).await;

        assert_eq!(provider.find_region_index("Campbelltown", Some("NSW")), Some(0));
        assert_eq!(provider.find_region_index("Campbelltown", Some("qld")), Some(1));
        assert_eq!(
            provider.find_region_index("Campbelltown", Some("Queensland")),
            Some(1)
        );
        assert_eq!(provider.find_region_index("Campbelltown", Some("Victoria")), None);
        // The raw id stays matchable after server replacements
        assert_eq!(provider.find_region_index("Campbelltown (Qld)", None), Some(1));
    }

    #[tokio::test]
    async fn test_ambiguous_without_disambig_uses_first_candidate() {
        let provider = loaded_suburbs(suburb_fetcher().into_arc()).await;
        assert_eq!(provider.find_region_index("Campbelltown", None), Some(0));

        let rows = vec![Some("Campbelltown"), Some("Parramatta"), Some("Atlantis")];
        let mut failed = Vec::new();
        let mut ambiguous = Vec::new();
        let mapped = provider
            .map_regions_to_indices_into::<_, &str>(
                &rows,
                None,
                Some(&mut failed),
                Some(&mut ambiguous),
                None,
            )
            .unwrap();

        assert_eq!(mapped, vec![Some(0), None, Some(1), None]);
        assert_eq!(failed, vec![2]);
        assert_eq!(ambiguous, vec![0]);
    }

    fn same_name_fetcher() -> Arc<MemoryFetcher> {
        let fetcher = suburb_fetcher();
        fetcher.insert_ids(
            "ids/SSC.json",
            json!(["Campbelltown", "Campbelltown", "Parramatta"]),
        );
        fetcher.insert_ids(
            "ids/SSC_STE.json",
            json!(["New South Wales", "Queensland", "New South Wales"]),
        );
        fetcher.into_arc()
    }

    #[tokio::test]
    async fn test_identical_ids_are_disambiguated_in_any_case() {
        let provider = loaded_suburbs(same_name_fetcher()).await;

        for code in ["Campbelltown", "campbelltown", "CAMPBELLTOWN"] {
            assert_eq!(provider.find_region_index(code, Some("NSW")), Some(0), "{}", code);
            assert_eq!(provider.find_region_index(code, Some("Queensland")), Some(1), "{}", code);
            assert_eq!(provider.find_region_index(code, None), Some(0), "{}", code);
        }
    }

    #[tokio::test]
    async fn test_identical_ids_without_disambig_are_ambiguous() {
        let provider = loaded_suburbs(same_name_fetcher()).await;

        let rows = vec![Some("Campbelltown")];
        let mut failed = Vec::new();
        let mut ambiguous = Vec::new();
        let mapped = provider
            .map_regions_to_indices_into::<_, &str>(
                &rows,
                None,
                Some(&mut failed),
                Some(&mut ambiguous),
                None,
            )
            .unwrap();

        assert_eq!(mapped, vec![Some(0), None, None]);
        assert!(failed.is_empty());
        assert_eq!(ambiguous, vec![0]);
    }

    #[tokio::test]
    async fn test_reject_policy_leaves_ambiguous_unmatched() {
        let fetcher = suburb_fetcher().into_arc();
        let config = RegionProviderConfig {
            ambiguity_policy: AmbiguityPolicy::Reject,
            ..ssc_config()
        };
        let provider = RegionProvider::new("SSC", config, fetcher).unwrap();
        provider.load_region_ids().await.unwrap();
        assert_eq!(provider.find_region_index("Campbelltown", None), None);
        assert_eq!(provider.find_region_index("Parramatta", None), Some(2));
    }

    #[tokio::test]
    async fn test_map_regions_with_disambig_column() {
        let provider = loaded_suburbs(suburb_fetcher().into_arc()).await;
        let rows = vec![Some("Campbelltown"), None, Some("Campbelltown"), Some("Richmond")];
        let states = vec![Some("QLD"), None, Some("NSW"), Some("Victoria")];
        let mut ambiguous = Vec::new();
        let mapped = provider
            .map_regions_to_indices_into(
                &rows,
                Some(states.as_slice()),
                None,
                Some(&mut ambiguous),
                None,
            )
            .unwrap();
        assert_eq!(mapped, vec![Some(2), Some(0), None, Some(3)]);
        assert!(ambiguous.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_rows_are_ambiguous() {
        let fetcher = suburb_fetcher().into_arc();
        let provider = RegionProvider::new("STE", ste_config(), fetcher).unwrap();
        provider.load_region_ids().await.unwrap();

        let rows = vec![Some("Victoria"), Some("victoria")];
        let mut ambiguous = Vec::new();
        let mapped = provider
            .map_regions_to_indices_into::<_, &str>(&rows, None, None, Some(&mut ambiguous), None)
            .unwrap();
        assert_eq!(mapped[1], Some(0));
        assert_eq!(ambiguous, vec![1]);
    }

    #[tokio::test]
    async fn test_map_before_load_is_error() {
        let provider =
            RegionProvider::new("STE", ste_config(), MemoryFetcher::new().into_arc()).unwrap();
        let rows = vec![Some("Victoria")];
        let err = provider
            .map_regions_to_indices_into::<_, &str>(&rows, None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, RegionError::NotLoaded(_)));
    }

    #[tokio::test]
    async fn test_time_filtered_mapping() {
        let fetcher = suburb_fetcher().into_arc();
        let provider = RegionProvider::new("STE", ste_config(), fetcher).unwrap();
        provider.load_region_ids().await.unwrap();

        let day = |d: u32| Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap();
        let rows = vec![
            Some("Victoria"),
            Some("Victoria"),
            Some("Queensland"),
            Some("Queensland"),
            Some("NSW"),
            Some("NSW"),
        ];
        let intervals = vec![
            Some(TimeInterval::closed(day(1), day(10))),
            Some(TimeInterval::closed(day(10), day(20))),
            Some(TimeInterval::closed(day(5), day(15))),
            Some(TimeInterval::closed(day(5), day(15))),
            Some(TimeInterval::closed(day(20), day(30))),
            None,
        ];
        let mut ambiguous = Vec::new();
        let mapped = provider
            .map_regions_to_indices_into::<_, &str>(
                &rows,
                None,
                None,
                Some(&mut ambiguous),
                Some(TimeFilter {
                    intervals: &intervals,
                    time: day(10),
                }),
            )
            .unwrap();

        // Later start wins at the shared endpoint
        assert_eq!(mapped[1], Some(1));
        // Equal starts keep the first row and record the second
        assert_eq!(mapped[2], Some(2));
        assert_eq!(ambiguous, vec![3]);
        // Rows outside the filter time, or without an interval, are skipped
        assert_eq!(mapped[0], None);
    }

    #[test]
    fn test_time_interval_bounds() {
        let start = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let stop = Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap();
        let half_open = TimeInterval {
            start,
            stop,
            start_included: true,
            stop_included: false,
        };
        assert!(half_open.contains(start));
        assert!(!half_open.contains(stop));
        assert!(!half_open.contains(start - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_find_region_variable_alias_priority() {
        let provider =
            RegionProvider::new("STE", ste_config(), MemoryFetcher::new().into_arc()).unwrap();
        assert_eq!(
            provider.find_region_variable(&["STATE", "region_name"]),
            Some("STATE".to_string())
        );
        // Region type beats later aliases regardless of column order
        assert_eq!(
            provider.find_region_variable(&["state", "Ste"]),
            Some("Ste".to_string())
        );
        assert_eq!(provider.find_region_variable(&["postcode"]), None);
    }

    #[test]
    fn test_find_variable_ignores_separators() {
        let aliases = vec!["sa4_code".to_string()];
        assert_eq!(
            find_variable_for_aliases(&["SA4 Code"], &aliases),
            Some("SA4 Code".to_string())
        );
        assert_eq!(
            find_variable_for_aliases(&["sa4-code-2016"], &aliases),
            None
        );
    }

    #[tokio::test]
    async fn test_find_disambig_variable() {
        let provider = loaded_suburbs(suburb_fetcher().into_arc()).await;
        assert_eq!(
            provider.find_disambig_variable(&["suburb", "State"]),
            Some("State".to_string())
        );

        let plain =
            RegionProvider::new("STE", ste_config(), MemoryFetcher::new().into_arc()).unwrap();
        assert_eq!(plain.find_disambig_variable(&["state"]), None);
    }

    #[tokio::test]
    async fn test_color_lookup_func() {
        let provider = loaded_suburbs(suburb_fetcher().into_arc()).await;
        let values = vec![Some(1.0), None, Some(3.0), Some(-1.0)];
        let lookup = provider.get_color_lookup_func(&values, |v| {
            v.filter(|v| *v >= 0.0).map(|v| [v as u8, 0, 0, 255])
        });
        assert_eq!(lookup(0), Some([1, 0, 0, 255]));
        assert_eq!(lookup(1), None);
        assert_eq!(lookup(3), None);
        assert_eq!(lookup(99), None);
    }

    #[tokio::test]
    async fn test_find_region_by_id() {
        let provider = loaded_suburbs(suburb_fetcher().into_arc()).await;
        assert_eq!(provider.find_region_by_id("PARRAMATTA").map(|r| r.fid), Some(2));
        assert_eq!(
            provider
                .find_region_by_id("Campbelltown (Qld)")
                .map(|r| r.fid),
            Some(1)
        );
        assert!(provider.find_region_by_id("Nowhere").is_none());
    }

    #[test]
    fn test_tile_url() {
        let config = RegionProviderConfig {
            server: Some("https://{s}.tiles.example/{z}/{x}/{y}.pbf".to_string()),
            server_subdomains: Some(vec!["a".to_string(), "b".to_string()]),
            ..Default::default()
        };
        let provider = RegionProvider::new("X", config, MemoryFetcher::new().into_arc()).unwrap();
        assert_eq!(
            provider.tile_url(1, 2, 3).as_deref(),
            Some("https://b.tiles.example/3/1/2.pbf")
        );
    }
}
