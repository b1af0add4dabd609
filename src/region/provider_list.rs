//! Registry of region providers built from the region mapping document

use super::error::{RegionError, Result};
use super::fetch::RegionFetcher;
use super::provider::RegionProvider;
use crate::config::RegionMappingConfig;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A provider that can map one of the dataset's columns.
#[derive(Debug, Clone)]
pub struct RegionDetails {
    pub region_provider: Arc<RegionProvider>,
    pub variable_name: String,
    pub disambig_variable_name: Option<String>,
}

/// All configured region providers, in registration order.
#[derive(Debug, Default)]
pub struct RegionProviderList {
    providers: Vec<Arc<RegionProvider>>,
}

impl RegionProviderList {
    /// Build one provider per configuration entry, then wire up
    /// `disambigRegionId` cross-references.
    pub fn init_from_object(
        config: &RegionMappingConfig,
        fetcher: Arc<dyn RegionFetcher>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for (region_type, _) in &config.entries {
            if !seen.insert(region_type.to_ascii_lowercase()) {
                return Err(RegionError::Config(format!(
                    "More than one region provider has type {}",
                    region_type
                )));
            }
        }

        let mut providers = config
            .entries
            .iter()
            .map(|(region_type, entry)| {
                RegionProvider::new(region_type.clone(), entry.clone(), Arc::clone(&fetcher))
            })
            .collect::<Result<Vec<_>>>()?;

        for i in 0..providers.len() {
            let Some(target) = providers[i].config().disambig_region_id.clone() else {
                continue;
            };
            let settings = providers
                .iter()
                .find(|p| p.region_type().eq_ignore_ascii_case(&target))
                .map(|p| p.disambig_settings());
            match settings {
                Some(settings) => {
                    debug!(
                        region_type = %providers[i].region_type(),
                        disambig_region_id = %target,
                        "Wired disambiguation provider"
                    );
                    providers[i].set_disambig_properties(settings);
                }
                None => warn!(
                    region_type = %providers[i].region_type(),
                    disambig_region_id = %target,
                    "Disambiguation region type is not configured"
                ),
            }
        }

        info!(providers = providers.len(), "Initialized region providers");
        Ok(Self {
            providers: providers.into_iter().map(Arc::new).collect(),
        })
    }

    /// Fetch the region mapping document and build the registry from it.
    pub async fn from_url(url: &str, fetcher: Arc<dyn RegionFetcher>) -> Result<Self> {
        debug!(url = %url, "Loading region mapping");
        let document = fetcher.fetch_json(url).await?;
        let config = RegionMappingConfig::from_value(&document)?;
        Self::init_from_object(&config, fetcher)
    }

    pub fn providers(&self) -> &[Arc<RegionProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Case-insensitive lookup by region type.
    ///
    /// Region types are unique ignoring case, so at most one provider matches.
    pub fn get_region_provider(&self, region_type: &str) -> Result<Option<Arc<RegionProvider>>> {
        Ok(self
            .providers
            .iter()
            .find(|p| p.region_type().eq_ignore_ascii_case(region_type))
            .cloned())
    }

    /// Find the providers able to map one of `variable_names`.
    ///
    /// A preferred column present in `variable_names` is searched first; with a
    /// preferred type as well, that provider is returned first for it. The
    /// remaining providers follow in registration order.
    pub fn get_region_details<S: AsRef<str>>(
        &self,
        variable_names: &[S],
        preferred_name: Option<&str>,
        preferred_type: Option<&str>,
    ) -> Result<Vec<RegionDetails>> {
        let mut names: Vec<&str> = variable_names.iter().map(AsRef::as_ref).collect();
        let mut results = Vec::new();

        if let Some(preferred) = preferred_name.filter(|p| names.contains(p)) {
            names.retain(|n| *n != preferred);
            names.insert(0, preferred);

            if let Some(region_type) = preferred_type {
                if let Some(provider) = self.get_region_provider(region_type)? {
                    results.push(RegionDetails {
                        disambig_variable_name: provider.find_disambig_variable(&names),
                        region_provider: provider,
                        variable_name: preferred.to_string(),
                    });
                }
            }
        }

        for provider in &self.providers {
            if results
                .iter()
                .any(|d| Arc::ptr_eq(&d.region_provider, provider))
            {
                continue;
            }
            if let Some(variable_name) = provider.find_region_variable(&names) {
                results.push(RegionDetails {
                    region_provider: Arc::clone(provider),
                    variable_name,
                    disambig_variable_name: provider.find_disambig_variable(&names),
                });
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::fetch::testing::MemoryFetcher;
    use serde_json::json;

    fn mapping() -> serde_json::Value {
        json!({
            "regionWmsMap": {
                "STE": {
                    "regionProp": "STE_NAME11",
                    "aliases": ["ste", "state"],
                    "server": "https://tiles.example/ste",
                    "dataReplacements": [["^nsw$", "new south wales"]],
                    "regionIdsFile": "ids/STE.json"
                },
                "SSC": {
                    "regionProp": "SSC_NAME",
                    "aliases": ["suburb", "locality"],
                    "server": "https://tiles.example/ssc",
                    "disambigProp": "STE_NAME11",
                    "disambigRegionId": "STE",
                    "regionIdsFile": "ids/SSC.json",
                    "regionDisambigIdsFile": "ids/SSC_STE.json"
                },
                "LGA": {
                    "regionProp": "LGA_NAME",
                    "aliases": ["lga", "locality"],
                    "server": "https://tiles.example/lga",
                    "disambigRegionId": "NOPE",
                    "regionIdsFile": "ids/LGA.json"
                }
            }
        })
    }

    fn build() -> RegionProviderList {
        let config = RegionMappingConfig::from_value(&mapping()).unwrap();
        RegionProviderList::init_from_object(&config, MemoryFetcher::new().into_arc()).unwrap()
    }

    #[test]
    fn test_registration_order_and_disambig_wiring() {
        let list = build();
        let types: Vec<&str> = list.providers().iter().map(|p| p.region_type()).collect();
        assert_eq!(types, vec!["STE", "SSC", "LGA"]);

        let ssc = list.get_region_provider("ssc").unwrap().unwrap();
        assert_eq!(ssc.disambig_aliases(), ["STE", "ste", "state"]);

        // Unknown disambiguation target is skipped
        let lga = list.get_region_provider("LGA").unwrap().unwrap();
        assert!(lga.disambig_aliases().is_empty());
    }

    #[test]
    fn test_get_region_provider_missing() {
        assert!(build().get_region_provider("SA4").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_region_type_is_config_error() {
        let config = RegionMappingConfig::from_value(&json!({
            "regionWmsMap": { "STE": {}, "ste": {} }
        }))
        .unwrap();
        let err = RegionProviderList::init_from_object(&config, MemoryFetcher::new().into_arc())
            .unwrap_err();
        assert!(matches!(err, RegionError::Config(_)));
        assert!(err.to_string().contains("ste"));
    }

    #[test]
    fn test_invalid_replacement_is_config_error() {
        let config = RegionMappingConfig::from_value(&json!({
            "regionWmsMap": { "STE": { "dataReplacements": [["(", ""]] } }
        }))
        .unwrap();
        let err = RegionProviderList::init_from_object(&config, MemoryFetcher::new().into_arc())
            .unwrap_err();
        assert!(matches!(err, RegionError::Config(_)));
    }

    #[test]
    fn test_region_details_registration_order() {
        let list = build();
        let details = list
            .get_region_details(&["value", "locality", "State"], None, None)
            .unwrap();
        let found: Vec<(&str, &str)> = details
            .iter()
            .map(|d| (d.region_provider.region_type(), d.variable_name.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![("STE", "State"), ("SSC", "locality"), ("LGA", "locality")]
        );
        assert_eq!(details[1].disambig_variable_name.as_deref(), Some("State"));
        assert_eq!(details[0].disambig_variable_name, None);
    }

    #[test]
    fn test_region_details_preferred_type_first() {
        let list = build();
        let details = list
            .get_region_details(&["State", "locality"], Some("locality"), Some("lga"))
            .unwrap();
        assert_eq!(details[0].region_provider.region_type(), "LGA");
        assert_eq!(details[0].variable_name, "locality");
        assert_eq!(details.len(), 3);
        assert_eq!(
            details
                .iter()
                .filter(|d| d.region_provider.region_type() == "LGA")
                .count(),
            1
        );
    }

    #[test]
    fn test_region_details_preferred_name_promoted() {
        let list = build();
        // "suburb" and "locality" both match SSC; the preferred column wins
        let details = list
            .get_region_details(&["locality", "suburb"], Some("suburb"), None)
            .unwrap();
        let ssc = details
            .iter()
            .find(|d| d.region_provider.region_type() == "SSC")
            .unwrap();
        assert_eq!(ssc.variable_name, "suburb");

        // A preferred name that is not a column changes nothing
        let details = list
            .get_region_details(&["locality"], Some("postcode"), Some("STE"))
            .unwrap();
        assert_eq!(details[0].region_provider.region_type(), "SSC");
    }

    #[tokio::test]
    async fn test_from_url() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("regionMapping.json", mapping());
        fetcher.insert_ids("ids/STE.json", json!(["New South Wales", "Victoria"]));
        let fetcher = fetcher.into_arc();

        let list = RegionProviderList::from_url("regionMapping.json", fetcher.clone())
            .await
            .unwrap();
        assert_eq!(list.len(), 3);

        let ste = list.get_region_provider("STE").unwrap().unwrap();
        ste.load_region_ids().await.unwrap();
        assert_eq!(ste.find_region_index("NSW", None), Some(0));
    }

    #[tokio::test]
    async fn test_from_url_fetch_failure() {
        let err = RegionProviderList::from_url("missing.json", MemoryFetcher::new().into_arc())
            .await
            .unwrap_err();
        assert!(matches!(err, RegionError::Fetch(_)));
    }
}
