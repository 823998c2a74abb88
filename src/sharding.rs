// ==============================================================================
// sharding.rs - Contig Sharding Policy and Router
// ==============================================================================
// Description: Maps merged variants to output destinations by contig
// Author: Matt Barham
// Created: 2026-09-08
// Modified: 2026-10-12
// Version: 0.3.0
// ==============================================================================
// Configuration (JSON, ordered, first match wins):
//   [
//     { "match": "chr1",          "output_table_suffix": "chr1" },
//     { "match": ["chr19", "19"], "output_table_suffix": "chr19" },
//     { "match": "*",             "output_table_suffix": "other" }
//   ]
//   Without a trailing "*" rule a residual rule is appended.
// ==============================================================================

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Suffix of the implicit catch-all destination
pub const RESIDUAL_SUFFIX: &str = "residual";

/// Separator between base table id and shard suffix
pub const TABLE_SUFFIX_SEPARATOR: &str = "__";

/// Wildcard spelling in the configuration
pub const WILDCARD: &str = "*";

/// Compose `{base_table_id}__{suffix}`
pub fn destination_name(base_table_id: &str, suffix: &str) -> String {
    format!("{}{}{}", base_table_id, TABLE_SUFFIX_SEPARATOR, suffix)
}

/// Sharding configuration errors
#[derive(Error, Debug)]
pub enum ShardingConfigError {
    #[error("Failed to read sharding config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid sharding config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule {index} has an empty match list")]
    EmptyMatch { index: usize },

    #[error("Rule {index} has invalid output_table_suffix '{suffix}' (use letters, digits, underscore)")]
    InvalidSuffix { index: usize, suffix: String },

    #[error("output_table_suffix '{0}' is used by more than one rule")]
    DuplicateSuffix(String),

    #[error("Contig '{0}' is matched by more than one rule")]
    DuplicateContig(String),

    #[error("Wildcard rule at position {index} must be the last rule")]
    WildcardNotLast { index: usize },

    #[error("output_table_suffix '{0}' is reserved for the catch-all rule")]
    ReservedSuffix(String),

    #[error("Invalid base table id '{0}' (use letters, digits, underscore)")]
    InvalidBaseTable(String),
}

/// Contig-matching predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContigMatcher {
    Exact(String),
    AnyOf(BTreeSet<String>),
    Wildcard,
}

impl ContigMatcher {
    /// Case-sensitive match
    pub fn matches(&self, contig: &str) -> bool {
        match self {
            ContigMatcher::Exact(name) => name == contig,
            ContigMatcher::AnyOf(names) => names.contains(contig),
            ContigMatcher::Wildcard => true,
        }
    }

    fn names(&self) -> Vec<&str> {
        match self {
            ContigMatcher::Exact(name) => vec![name.as_str()],
            ContigMatcher::AnyOf(names) => names.iter().map(String::as_str).collect(),
            ContigMatcher::Wildcard => Vec::new(),
        }
    }
}

/// One ordered rule: matcher -> destination suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingRule {
    pub matcher: ContigMatcher,
    pub suffix: String,
}

impl ShardingRule {
    pub fn exact(contig: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            matcher: ContigMatcher::Exact(contig.into()),
            suffix: suffix.into(),
        }
    }

    pub fn any_of<I, S>(contigs: I, suffix: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matcher: ContigMatcher::AnyOf(contigs.into_iter().map(Into::into).collect()),
            suffix: suffix.into(),
        }
    }

    pub fn wildcard(suffix: impl Into<String>) -> Self {
        Self {
            matcher: ContigMatcher::Wildcard,
            suffix: suffix.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatchSpec {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    #[serde(rename = "match")]
    matcher: MatchSpec,
    output_table_suffix: String,
}

/// Validated, immutable rule list; always ends in a catch-all
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingPolicy {
    rules: Vec<ShardingRule>,
}

impl ShardingPolicy {
    /// Validate rules and append the residual rule if no catch-all exists
    pub fn new(mut rules: Vec<ShardingRule>) -> Result<Self, ShardingConfigError> {
        let mut suffixes = BTreeSet::new();
        let mut contigs = BTreeSet::new();
        let last = rules.len().saturating_sub(1);

        for (index, rule) in rules.iter().enumerate() {
            if !is_identifier(&rule.suffix) {
                return Err(ShardingConfigError::InvalidSuffix {
                    index,
                    suffix: rule.suffix.clone(),
                });
            }
            if !suffixes.insert(rule.suffix.clone()) {
                return Err(ShardingConfigError::DuplicateSuffix(rule.suffix.clone()));
            }
            match &rule.matcher {
                ContigMatcher::Wildcard if index != last => {
                    return Err(ShardingConfigError::WildcardNotLast { index });
                }
                ContigMatcher::Wildcard => {}
                ContigMatcher::AnyOf(names) if names.is_empty() => {
                    return Err(ShardingConfigError::EmptyMatch { index });
                }
                matcher => {
                    if rule.suffix == RESIDUAL_SUFFIX {
                        return Err(ShardingConfigError::ReservedSuffix(rule.suffix.clone()));
                    }
                    for name in matcher.names() {
                        if !contigs.insert(name.to_string()) {
                            return Err(ShardingConfigError::DuplicateContig(name.to_string()));
                        }
                    }
                }
            }
        }

        let has_catch_all = matches!(
            rules.last(),
            Some(ShardingRule {
                matcher: ContigMatcher::Wildcard,
                ..
            })
        );
        if !has_catch_all {
            rules.push(ShardingRule::wildcard(RESIDUAL_SUFFIX));
        }

        Ok(Self { rules })
    }

    /// Parse the JSON rule list
    pub fn from_json_str(json: &str) -> Result<Self, ShardingConfigError> {
        let specs: Vec<RuleSpec> = serde_json::from_str(json)?;
        let rules = specs
            .into_iter()
            .map(|spec| {
                let matcher = match spec.matcher {
                    MatchSpec::One(name) if name == WILDCARD => ContigMatcher::Wildcard,
                    MatchSpec::One(name) => ContigMatcher::Exact(name),
                    MatchSpec::Many(names) => ContigMatcher::AnyOf(names.into_iter().collect()),
                };
                ShardingRule {
                    matcher,
                    suffix: spec.output_table_suffix,
                }
            })
            .collect();
        Self::new(rules)
    }

    /// Load the JSON rule list from a file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ShardingConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ShardingConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let policy = Self::from_json_str(&json)?;
        info!(
            "Loaded sharding policy from {:?}: {} destinations",
            path,
            policy.rules.len()
        );
        Ok(policy)
    }

    /// One destination per human chromosome (`chrN` or `N`) plus residual
    pub fn default_human() -> Self {
        let mut rules: Vec<ShardingRule> = (1..=22)
            .map(|n| n.to_string())
            .chain(["X".to_string(), "Y".to_string()])
            .map(|n| ShardingRule::any_of([format!("chr{}", n), n.clone()], format!("chr{}", n)))
            .collect();
        rules.push(ShardingRule::any_of(["chrM", "M", "MT"], "chrM"));
        rules.push(ShardingRule::wildcard(RESIDUAL_SUFFIX));
        Self { rules }
    }

    pub fn rules(&self) -> &[ShardingRule] {
        &self.rules
    }

    /// Suffix for a contig; first matching rule wins
    pub fn route_suffix(&self, contig: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(contig))
            .map(|rule| rule.suffix.as_str())
            .unwrap_or(RESIDUAL_SUFFIX)
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Pure, total contig -> destination router
#[derive(Debug, Clone)]
pub struct ShardRouter {
    policy: ShardingPolicy,
    destinations: HashMap<String, String>,
    ordered: Vec<String>,
}

impl ShardRouter {
    pub fn new(base_table_id: &str, policy: ShardingPolicy) -> Result<Self, ShardingConfigError> {
        if !is_identifier(base_table_id) {
            return Err(ShardingConfigError::InvalidBaseTable(base_table_id.to_string()));
        }

        let ordered: Vec<String> = policy
            .rules()
            .iter()
            .map(|rule| destination_name(base_table_id, &rule.suffix))
            .collect();
        let destinations = policy
            .rules()
            .iter()
            .zip(&ordered)
            .map(|(rule, name)| (rule.suffix.clone(), name.clone()))
            .collect();

        Ok(Self {
            policy,
            destinations,
            ordered,
        })
    }

    /// Destination name for a contig; never fails
    pub fn route(&self, contig: &str) -> &str {
        let suffix = self.policy.route_suffix(contig);
        self.destinations
            .get(suffix)
            .map(String::as_str)
            .unwrap_or_else(|| {
                self.ordered
                    .last()
                    .map(String::as_str)
                    .unwrap_or(RESIDUAL_SUFFIX)
            })
    }

    /// Every destination in rule order, residual last
    pub fn destinations(&self) -> &[String] {
        &self.ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIX_WAY: &str = r#"[
        {"match": ["chr1", "1"], "output_table_suffix": "chr1"},
        {"match": "chr19", "output_table_suffix": "chr19"},
        {"match": "chr20", "output_table_suffix": "chr20"},
        {"match": "chrX", "output_table_suffix": "chrX"},
        {"match": ["chrY", "Y"], "output_table_suffix": "chrY"}
    ]"#;

    #[test]
    fn test_first_match_and_residual() {
        let policy = ShardingPolicy::from_json_str(SIX_WAY).unwrap();
        assert_eq!(policy.rules().len(), 6);

        let router = ShardRouter::new("variants", policy).unwrap();
        assert_eq!(router.route("chr1"), "variants__chr1");
        assert_eq!(router.route("1"), "variants__chr1");
        assert_eq!(router.route("chr20"), "variants__chr20");
        assert_eq!(router.route("Y"), "variants__chrY");
        assert_eq!(router.route("chrUn_gl000220"), "variants__residual");
        assert_eq!(router.destinations().last().unwrap(), "variants__residual");
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let router = ShardRouter::new("t", ShardingPolicy::from_json_str(SIX_WAY).unwrap()).unwrap();
        assert_eq!(router.route("CHR1"), "t__residual");
        assert_eq!(router.route("chrx"), "t__residual");
    }

    #[test]
    fn test_routing_is_total() {
        let router = ShardRouter::new("t", ShardingPolicy::from_json_str(SIX_WAY).unwrap()).unwrap();
        for contig in ["", "chr1", "chr2", "HLA-A*01:01", "*", "chrY", "GL000192.1"] {
            let destination = router.route(contig);
            assert_eq!(
                router.destinations().iter().filter(|d| *d == destination).count(),
                1
            );
        }
    }

    #[test]
    fn test_explicit_catch_all_is_kept() {
        let policy = ShardingPolicy::from_json_str(
            r#"[{"match": "chr1", "output_table_suffix": "chr1"},
                {"match": "*", "output_table_suffix": "others"}]"#,
        )
        .unwrap();
        assert_eq!(policy.rules().len(), 2);
        assert_eq!(policy.route_suffix("chr2"), "others");
    }

    #[test]
    fn test_invalid_configs() {
        let wildcard_first = r#"[{"match": "*", "output_table_suffix": "all"},
                                 {"match": "chr1", "output_table_suffix": "chr1"}]"#;
        assert!(matches!(
            ShardingPolicy::from_json_str(wildcard_first),
            Err(ShardingConfigError::WildcardNotLast { index: 0 })
        ));

        let duplicate_suffix = r#"[{"match": "chr1", "output_table_suffix": "a"},
                                   {"match": "chr2", "output_table_suffix": "a"}]"#;
        assert!(matches!(
            ShardingPolicy::from_json_str(duplicate_suffix),
            Err(ShardingConfigError::DuplicateSuffix(_))
        ));

        let duplicate_contig = r#"[{"match": ["chr1", "1"], "output_table_suffix": "a"},
                                   {"match": "1", "output_table_suffix": "b"}]"#;
        assert!(matches!(
            ShardingPolicy::from_json_str(duplicate_contig),
            Err(ShardingConfigError::DuplicateContig(_))
        ));

        let bad_suffix = r#"[{"match": "chr1", "output_table_suffix": "chr-1"}]"#;
        assert!(matches!(
            ShardingPolicy::from_json_str(bad_suffix),
            Err(ShardingConfigError::InvalidSuffix { .. })
        ));

        let reserved = r#"[{"match": "chr1", "output_table_suffix": "residual"}]"#;
        assert!(matches!(
            ShardingPolicy::from_json_str(reserved),
            Err(ShardingConfigError::ReservedSuffix(_))
        ));

        let empty = r#"[{"match": [], "output_table_suffix": "none"}]"#;
        assert!(matches!(
            ShardingPolicy::from_json_str(empty),
            Err(ShardingConfigError::EmptyMatch { index: 0 })
        ));

        assert!(ShardRouter::new("bad-table", ShardingPolicy::default_human()).is_err());
    }

    #[test]
    fn test_default_human_policy() {
        let router = ShardRouter::new("genomes", ShardingPolicy::default_human()).unwrap();
        assert_eq!(router.destinations().len(), 26);
        assert_eq!(router.route("17"), "genomes__chr17");
        assert_eq!(router.route("chrX"), "genomes__chrX");
        assert_eq!(router.route("MT"), "genomes__chrM");
        assert_eq!(router.route("chr17_KI270729v1_random"), "genomes__residual");
    }
}
