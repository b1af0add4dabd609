//! Regex replacement chains used to normalize region codes
//!
//! Both the canonical region IDs (server side) and the user's data values go
//! through an ordered list of `[pattern, replacement]` rules before they are
//! compared. Patterns are matched case-insensitively against lower-cased
//! input, and replacements use `$1`-style group references.

use super::error::{RegionError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Identifies which replacement chain a value was normalized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplacementSet {
    Server,
    Data,
    DisambigServer,
    DisambigData,
}

#[derive(Debug)]
struct Rule {
    pattern: Regex,
    replacement: String,
}

/// Ordered, compiled list of replacement rules.
#[derive(Debug, Default)]
pub struct ReplacementChain {
    rules: Vec<Rule>,
}

impl ReplacementChain {
    /// Compile `[pattern, replacement]` pairs from configuration.
    pub fn compile(pairs: &[(String, String)]) -> Result<Self> {
        let rules = pairs
            .iter()
            .map(|(pattern, replacement)| {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        RegionError::Config(format!(
                            "Invalid replacement pattern '{}': {}",
                            pattern, e
                        ))
                    })?;
                Ok(Rule {
                    pattern: regex,
                    replacement: convert_group_references(&replacement.to_lowercase()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Apply every rule in order to an already lower-cased value.
    fn apply(&self, value: &str) -> String {
        self.rules.iter().fold(value.to_string(), |acc, rule| {
            rule.pattern
                .replace_all(&acc, rule.replacement.as_str())
                .into_owned()
        })
    }
}

/// Rewrite `$1`, `$&` group references into the `${1}` form the regex crate
/// expects, so that `$1abc` keeps meaning "group 1 followed by abc".
fn convert_group_references(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 4);
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                out.push_str("${");
                out.push_str(&digits);
                out.push('}');
            }
            _ => out.push_str("$$"),
        }
    }
    out
}

/// Lower-case and trim a raw code before any rule is applied.
pub fn base_normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Per-provider memo of normalized values, keyed by `(set, input)`.
#[derive(Debug, Default)]
pub struct ReplacementCache {
    entries: Mutex<HashMap<(ReplacementSet, String), String>>,
}

impl ReplacementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `value` with `chain`, consulting and filling the cache.
    ///
    /// Chains with no rules only lower-case and trim, and are not cached.
    pub fn apply(&self, set: ReplacementSet, chain: &ReplacementChain, value: &str) -> String {
        let base = base_normalize(value);
        if chain.is_empty() {
            return base;
        }

        let key = (set, base);
        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let replaced = chain.apply(&key.1);
        self.lock().insert(key, replaced.clone());
        replaced
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(ReplacementSet, String), String>> {
        // A poisoned cache only ever holds completed entries.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Replacement chains borrowed from the provider named by `disambigRegionId`.
#[derive(Debug, Clone, Default)]
pub struct DisambigSettings {
    pub data_replacements: Arc<ReplacementChain>,
    pub server_replacements: Arc<ReplacementChain>,
    pub aliases: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(rules: &[(&str, &str)]) -> Vec<(String, String)> {
        rules
            .iter()
            .map(|(p, r)| (p.to_string(), r.to_string()))
            .collect()
    }

    #[test]
    fn test_strip_suffix_rule() {
        let chain = ReplacementChain::compile(&pairs(&[(r" \(.\)$", "")])).unwrap();
        let cache = ReplacementCache::new();
        assert_eq!(
            cache.apply(ReplacementSet::Data, &chain, "Baw Baw (S)"),
            "baw baw"
        );
    }

    #[test]
    fn test_rules_apply_in_order() {
        let chain =
            ReplacementChain::compile(&pairs(&[("^saint ", "st "), ("^st ", "street ")])).unwrap();
        let cache = ReplacementCache::new();
        assert_eq!(
            cache.apply(ReplacementSet::Data, &chain, "Saint Kilda"),
            "street kilda"
        );
    }

    #[test]
    fn test_group_references() {
        let chain = ReplacementChain::compile(&pairs(&[("^([0-9]{3})$", "0$1")])).unwrap();
        let cache = ReplacementCache::new();
        assert_eq!(cache.apply(ReplacementSet::Data, &chain, "800"), "0800");
        assert_eq!(convert_group_references("$1abc"), "${1}abc");
        assert_eq!(convert_group_references("a$&b"), "a${0}b");
        assert_eq!(convert_group_references("cost $$"), "cost $$");
    }

    #[test]
    fn test_pattern_is_case_insensitive() {
        let chain = ReplacementChain::compile(&pairs(&[("SHIRE OF ", "")])).unwrap();
        let cache = ReplacementCache::new();
        assert_eq!(
            cache.apply(ReplacementSet::Data, &chain, "Shire of Moira"),
            "moira"
        );
    }

    #[test]
    fn test_cache_is_stable_and_keyed_by_set() {
        let chain = ReplacementChain::compile(&pairs(&[(" city$", "")])).unwrap();
        let cache = ReplacementCache::new();
        let first = cache.apply(ReplacementSet::Data, &chain, "Perth City");
        let second = cache.apply(ReplacementSet::Data, &chain, "Perth City");
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        cache.apply(ReplacementSet::Server, &chain, "Perth City");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_empty_chain_only_normalizes_case() {
        let chain = ReplacementChain::default();
        let cache = ReplacementCache::new();
        assert_eq!(cache.apply(ReplacementSet::Data, &chain, "  NSW "), "nsw");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = ReplacementChain::compile(&pairs(&[("(unclosed", "")])).unwrap_err();
        assert!(matches!(err, RegionError::Config(_)));
    }
}
