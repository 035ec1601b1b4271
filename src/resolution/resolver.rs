//! SKU resolution cascade.
//!
//! Given a raw external SKU, walk a fixed sequence of matching tiers against
//! the catalog snapshot and the active mapping rules. Each tier short-circuits
//! on success; falling all the way through is the legitimate `Unmapped`
//! outcome, never an error. Resolution is a pure, deterministic function of
//! (input, snapshot): precedence ties are broken by rule id, and nothing
//! depends on hash iteration order.
//!
//! Variety-pack SKUs that bundle several distinct products are *expected* to
//! end up `Unmapped`: force-mapping them to an arbitrary single product would
//! corrupt category attribution downstream.

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use thiserror::Error;

use crate::catalog::model::{MappingRule, PatternType};
use crate::catalog::store::CatalogSnapshot;
use crate::normalization::{derived_candidates, normalize_sku};

/// Minimum Jaro-Winkler similarity for a rule to be offered as a near-miss
/// suggestion in [`Resolver::explain`]. Suggestions are advisory only and
/// never influence resolution.
pub const MIN_SUGGESTION_SIMILARITY: f64 = 0.85;

/// Which cascade tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    MasterMatch,
    DerivedPattern,
    PrefixPattern,
    SuffixPattern,
    Fuzzy,
    Unmapped,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::MasterMatch => "master_match",
            MatchType::DerivedPattern => "derived_pattern",
            MatchType::PrefixPattern => "prefix_pattern",
            MatchType::SuffixPattern => "suffix_pattern",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Unmapped => "unmapped",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchType::Exact),
            "master_match" => Ok(MatchType::MasterMatch),
            "derived_pattern" => Ok(MatchType::DerivedPattern),
            "prefix_pattern" => Ok(MatchType::PrefixPattern),
            "suffix_pattern" => Ok(MatchType::SuffixPattern),
            "fuzzy" => Ok(MatchType::Fuzzy),
            "unmapped" => Ok(MatchType::Unmapped),
            other => Err(format!("unknown match type: {other}")),
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one external SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// None means unmapped.
    pub catalog_sku: Option<String>,
    pub category: Option<String>,
    pub match_type: MatchType,
    /// 0..=100.
    pub confidence: i16,
    /// Always >= 1; 1 for unmapped lines.
    pub quantity_multiplier: i64,
}

impl Resolution {
    fn unmapped() -> Self {
        Self {
            catalog_sku: None,
            category: None,
            match_type: MatchType::Unmapped,
            confidence: 0,
            quantity_multiplier: 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Malformed input, an empty or blank SKU. The caller logs a data-quality
    /// warning and excludes the line; merely-unmapped SKUs are NOT errors.
    #[error("external SKU is empty after normalization")]
    EmptySku,
}

/// A rule that matched during [`Resolver::explain`], with the tier it matched at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: i64,
    pub source_pattern: String,
    pub pattern_type: PatternType,
    pub target_sku: String,
    pub quantity_multiplier: i64,
    pub confidence: i16,
    pub priority: i32,
    /// True for the rule the cascade actually selected.
    pub selected: bool,
}

/// Near-miss rule offered as an admin suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSuggestion {
    pub rule_id: i64,
    pub source_pattern: String,
    pub target_sku: String,
    pub similarity: f64,
}

/// Full rule-testing output for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub normalized_sku: String,
    pub resolution: Resolution,
    pub matched_rules: Vec<RuleMatch>,
    pub suggestions: Vec<RuleSuggestion>,
}

/// The resolution cascade over one immutable catalog snapshot.
pub struct Resolver<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> Resolver<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    /// Resolve a raw external SKU to a catalog product.
    ///
    /// Cascade, in fixed order: exact catalog SKU, exact-pattern rule,
    /// master SKU, affix-derived candidates (re-running the three direct
    /// tiers), prefix/suffix/contains rules, unmapped.
    pub fn resolve(&self, external_sku: &str) -> Result<Resolution, ResolveError> {
        let normalized = normalize_sku(external_sku);
        if normalized.is_empty() {
            return Err(ResolveError::EmptySku);
        }

        if let Some(resolution) = self.resolve_direct(&normalized) {
            return Ok(resolution);
        }

        for candidate in derived_candidates(&normalized) {
            if let Some(mut resolution) = self.resolve_direct(&candidate) {
                resolution.match_type = MatchType::DerivedPattern;
                return Ok(resolution);
            }
        }

        if let Some(resolution) = self.resolve_pattern_rules(&normalized) {
            return Ok(resolution);
        }

        Ok(Resolution::unmapped())
    }

    /// Tiers 1-3: exact catalog, exact rule, master SKU. Shared between the
    /// primary pass and the derived-candidate retries.
    fn resolve_direct(&self, normalized: &str) -> Option<Resolution> {
        if let Some(product) = self.snapshot.product(normalized) {
            return Some(Resolution {
                catalog_sku: Some(product.sku.clone()),
                category: product.category.clone(),
                match_type: MatchType::Exact,
                confidence: 100,
                quantity_multiplier: 1,
            });
        }

        // Rules are pre-sorted by precedence; first hit wins.
        for rule in self.snapshot.rules() {
            if rule.pattern_type == PatternType::Exact
                && rule.pattern_type.matches(&rule.source_pattern, normalized)
            {
                if let Some(resolution) = self.resolution_from_rule(rule, MatchType::Exact) {
                    return Some(resolution);
                }
            }
        }

        if let Some(product) = self.snapshot.product_by_master(normalized) {
            return Some(Resolution {
                catalog_sku: Some(product.sku.clone()),
                category: product.category.clone(),
                match_type: MatchType::MasterMatch,
                confidence: 100,
                quantity_multiplier: 1,
            });
        }

        None
    }

    /// Tier 5: prefix/suffix/contains rules in precedence order.
    fn resolve_pattern_rules(&self, normalized: &str) -> Option<Resolution> {
        for rule in self.snapshot.rules() {
            let match_type = match rule.pattern_type {
                PatternType::Exact => continue,
                PatternType::Prefix => MatchType::PrefixPattern,
                PatternType::Suffix => MatchType::SuffixPattern,
                PatternType::Contains => MatchType::Fuzzy,
            };
            if rule.pattern_type.matches(&rule.source_pattern, normalized) {
                if let Some(resolution) = self.resolution_from_rule(rule, match_type) {
                    return Some(resolution);
                }
            }
        }
        None
    }

    /// A rule only resolves if its target is still in the active catalog
    /// (directly or as a master SKU); dangling rules are skipped so facts
    /// never carry a category-less phantom product.
    fn resolution_from_rule(&self, rule: &MappingRule, match_type: MatchType) -> Option<Resolution> {
        let target = self
            .snapshot
            .product(&rule.target_sku)
            .or_else(|| self.snapshot.product_by_master(&rule.target_sku))?;
        Some(Resolution {
            catalog_sku: Some(target.sku.clone()),
            category: target.category.clone(),
            match_type,
            confidence: rule.confidence,
            quantity_multiplier: rule.quantity_multiplier.max(1),
        })
    }

    /// Admin rule testing: the winning resolution plus every matching rule and
    /// the closest near-miss patterns by Jaro-Winkler similarity.
    pub fn explain(&self, external_sku: &str) -> Result<ResolutionReport, ResolveError> {
        let normalized = normalize_sku(external_sku);
        if normalized.is_empty() {
            return Err(ResolveError::EmptySku);
        }
        let resolution = self.resolve(external_sku)?;

        let mut matched_rules: Vec<RuleMatch> = Vec::new();
        let mut selected_marked = false;
        for rule in self.snapshot.rules() {
            if !rule.pattern_type.matches(&rule.source_pattern, &normalized) {
                continue;
            }
            let selected = !selected_marked
                && resolution.catalog_sku.is_some()
                && self
                    .resolution_from_rule(rule, resolution.match_type)
                    .map(|r| r.catalog_sku == resolution.catalog_sku)
                    .unwrap_or(false)
                && matches!(
                    resolution.match_type,
                    MatchType::Exact
                        | MatchType::PrefixPattern
                        | MatchType::SuffixPattern
                        | MatchType::Fuzzy
                );
            if selected {
                selected_marked = true;
            }
            matched_rules.push(RuleMatch {
                rule_id: rule.id,
                source_pattern: rule.source_pattern.clone(),
                pattern_type: rule.pattern_type,
                target_sku: rule.target_sku.clone(),
                quantity_multiplier: rule.quantity_multiplier,
                confidence: rule.confidence,
                priority: rule.priority,
                selected,
            });
        }

        let mut suggestions: Vec<RuleSuggestion> = self
            .snapshot
            .rules()
            .iter()
            .filter(|r| !r.pattern_type.matches(&r.source_pattern, &normalized))
            .filter_map(|r| {
                let similarity = jaro_winkler(&normalized, &r.source_pattern);
                (similarity >= MIN_SUGGESTION_SIMILARITY).then(|| RuleSuggestion {
                    rule_id: r.id,
                    source_pattern: r.source_pattern.clone(),
                    target_sku: r.target_sku.clone(),
                    similarity,
                })
            })
            .collect();
        suggestions.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.rule_id.cmp(&b.rule_id))
        });
        suggestions.truncate(5);

        Ok(ResolutionReport {
            normalized_sku: normalized,
            resolution,
            matched_rules,
            suggestions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::CatalogProduct;

    fn product(sku: &str, category: &str, master: Option<&str>) -> CatalogProduct {
        CatalogProduct {
            sku: sku.into(),
            master_sku: master.map(Into::into),
            name: sku.into(),
            category: Some(category.into()),
            is_active: true,
            units_per_display: Some(12),
            displays_per_box: Some(12),
            boxes_per_pallet: Some(20),
        }
    }

    fn rule(
        id: i64,
        pattern: &str,
        pattern_type: PatternType,
        target: &str,
        multiplier: i64,
        confidence: i16,
        priority: i32,
    ) -> MappingRule {
        MappingRule {
            id,
            source_pattern: pattern.into(),
            pattern_type,
            target_sku: target.into(),
            quantity_multiplier: multiplier,
            confidence,
            priority,
            is_active: true,
        }
    }

    fn snapshot() -> CatalogSnapshot {
        CatalogSnapshot::from_parts(
            vec![
                product("BAR-CHIA-001", "BARRAS", Some("MB-CHIA")),
                product("BAR-CACAO-001", "BARRAS", None),
                product("PACKCRSURTIDO", "PACKS", None),
                product("XXXX_U04010", "GRANOLAS", None),
            ],
            vec![
                rule(1, "PACKCRSURTIDO", PatternType::Exact, "PACKCRSURTIDO", 1, 95, 0),
                rule(2, "ML-CHIA", PatternType::Exact, "BAR-CHIA-001", 6, 90, 0),
                rule(3, "BAR-", PatternType::Prefix, "BAR-CACAO-001", 1, 60, 10),
                rule(4, "SURTIDO", PatternType::Contains, "PACKCRSURTIDO", 1, 40, 20),
            ],
        )
    }

    #[test]
    fn exact_catalog_match_wins_over_rules() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("BAR-CHIA-001").unwrap();
        assert_eq!(r.match_type, MatchType::Exact);
        assert_eq!(r.catalog_sku.as_deref(), Some("BAR-CHIA-001"));
        assert_eq!(r.confidence, 100);
        assert_eq!(r.quantity_multiplier, 1);
    }

    #[test]
    fn exact_rule_match_is_case_insensitive() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("packcrsurtido").unwrap();
        assert_eq!(r.match_type, MatchType::Exact);
        assert_eq!(r.catalog_sku.as_deref(), Some("PACKCRSURTIDO"));
        assert_eq!(r.quantity_multiplier, 1);
    }

    #[test]
    fn exact_rule_carries_multiplier_and_confidence() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("ml-chia").unwrap();
        assert_eq!(r.match_type, MatchType::Exact);
        assert_eq!(r.catalog_sku.as_deref(), Some("BAR-CHIA-001"));
        assert_eq!(r.quantity_multiplier, 6);
        assert_eq!(r.confidence, 90);
    }

    #[test]
    fn master_sku_resolves_to_representative() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("MB-CHIA").unwrap();
        assert_eq!(r.match_type, MatchType::MasterMatch);
        assert_eq!(r.catalog_sku.as_deref(), Some("BAR-CHIA-001"));
    }

    #[test]
    fn derived_pattern_strips_channel_suffix() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("XXXX_U04010_EM").unwrap();
        assert_eq!(r.match_type, MatchType::DerivedPattern);
        assert_eq!(r.catalog_sku.as_deref(), Some("XXXX_U04010"));
    }

    #[test]
    fn prefix_rule_fires_after_direct_tiers_fail() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("BAR-ALMENDRA-999").unwrap();
        assert_eq!(r.match_type, MatchType::PrefixPattern);
        assert_eq!(r.catalog_sku.as_deref(), Some("BAR-CACAO-001"));
        assert_eq!(r.confidence, 60);
    }

    #[test]
    fn contains_rule_reports_fuzzy() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("CAJA-SURTIDO-XL").unwrap();
        assert_eq!(r.match_type, MatchType::Fuzzy);
        assert_eq!(r.catalog_sku.as_deref(), Some("PACKCRSURTIDO"));
    }

    #[test]
    fn unknown_sku_is_unmapped_not_error() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("ZZZ-NO-MATCH").unwrap();
        assert_eq!(r.match_type, MatchType::Unmapped);
        assert_eq!(r.catalog_sku, None);
        assert_eq!(r.category, None);
        assert_eq!(r.confidence, 0);
        assert_eq!(r.quantity_multiplier, 1);
    }

    #[test]
    fn empty_sku_is_a_hard_error() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        assert_eq!(resolver.resolve("   "), Err(ResolveError::EmptySku));
    }

    #[test]
    fn precedence_priority_then_confidence_then_id() {
        let snap = CatalogSnapshot::from_parts(
            vec![product("SKU-A", "A", None), product("SKU-B", "B", None)],
            vec![
                rule(7, "DUP", PatternType::Exact, "SKU-B", 1, 99, 5),
                rule(3, "DUP", PatternType::Exact, "SKU-A", 1, 10, 1),
                rule(5, "DUP", PatternType::Exact, "SKU-B", 1, 80, 1),
            ],
        );
        let resolver = Resolver::new(&snap);
        // priority 1 beats priority 5; within priority 1, confidence 80 > 10.
        let r = resolver.resolve("DUP").unwrap();
        assert_eq!(r.catalog_sku.as_deref(), Some("SKU-B"));
        assert_eq!(r.confidence, 80);

        let tie = CatalogSnapshot::from_parts(
            vec![product("SKU-A", "A", None), product("SKU-B", "B", None)],
            vec![
                rule(9, "DUP", PatternType::Exact, "SKU-B", 1, 50, 1),
                rule(4, "DUP", PatternType::Exact, "SKU-A", 1, 50, 1),
            ],
        );
        let resolver = Resolver::new(&tie);
        // Full tie: lowest id deterministically wins.
        let r = resolver.resolve("DUP").unwrap();
        assert_eq!(r.catalog_sku.as_deref(), Some("SKU-A"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);
        let first = resolver.resolve("ML-CHIA").unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve("ML-CHIA").unwrap(), first);
        }
    }

    #[test]
    fn dangling_rule_target_is_skipped() {
        let snap = CatalogSnapshot::from_parts(
            vec![product("SKU-A", "A", None)],
            vec![
                rule(1, "GHOST", PatternType::Exact, "SKU-DELETED", 1, 100, 0),
                rule(2, "GHOST", PatternType::Exact, "SKU-A", 1, 50, 1),
            ],
        );
        let resolver = Resolver::new(&snap);
        let r = resolver.resolve("GHOST").unwrap();
        assert_eq!(r.catalog_sku.as_deref(), Some("SKU-A"));
    }

    #[test]
    fn explain_reports_matches_and_suggestions() {
        let snap = snapshot();
        let resolver = Resolver::new(&snap);

        let report = resolver.explain("ml-chia").unwrap();
        assert_eq!(report.normalized_sku, "ML-CHIA");
        assert_eq!(report.resolution.match_type, MatchType::Exact);
        assert!(report.matched_rules.iter().any(|m| m.rule_id == 2 && m.selected));

        // A near-miss (one char off) is suggested but not matched.
        let report = resolver.explain("PACKCRSURTIDA").unwrap();
        assert_eq!(report.resolution.match_type, MatchType::Unmapped);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.source_pattern == "PACKCRSURTIDO"));
    }
}
