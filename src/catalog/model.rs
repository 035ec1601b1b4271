//! Canonical catalog and mapping-rule data model.
//!
//! Money is carried as integer minor units end to end (`*_minor` fields);
//! packaging factors are positive integers or absent. An absent factor means
//! "conversion to that tier is undefined", never an implicit 1.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A sellable product in the canonical catalog, with its packaging hierarchy.
///
/// Packaging tiers, finest to coarsest: unit -> display -> box -> pallet.
/// `units_per_display` is units in one display, `displays_per_box` displays in
/// one box, `boxes_per_pallet` boxes in one pallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub sku: String,
    /// Optional grouping parent, e.g. a master-box SKU several sub-SKUs
    /// (lot/packaging variants) roll up to.
    pub master_sku: Option<String>,
    pub name: String,
    /// None means uncategorized; such revenue reports under UNMAPPED.
    pub category: Option<String>,
    pub is_active: bool,
    pub units_per_display: Option<i64>,
    pub displays_per_box: Option<i64>,
    pub boxes_per_pallet: Option<i64>,
}

impl CatalogProduct {
    /// Enforce the tier invariant: a coarser factor may only be set when every
    /// finer factor below it is set, and every present factor is positive.
    pub fn validate_hierarchy(&self) -> Result<(), HierarchyError> {
        for (field, value) in [
            ("units_per_display", self.units_per_display),
            ("displays_per_box", self.displays_per_box),
            ("boxes_per_pallet", self.boxes_per_pallet),
        ] {
            if let Some(v) = value {
                if v <= 0 {
                    return Err(HierarchyError::NonPositiveFactor { field, value: v });
                }
            }
        }
        if self.displays_per_box.is_some() && self.units_per_display.is_none() {
            return Err(HierarchyError::MissingFinerTier {
                coarser: "displays_per_box",
                missing: "units_per_display",
            });
        }
        if self.boxes_per_pallet.is_some() && self.displays_per_box.is_none() {
            return Err(HierarchyError::MissingFinerTier {
                coarser: "boxes_per_pallet",
                missing: "displays_per_box",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("packaging factor {field} must be positive, got {value}")]
    NonPositiveFactor { field: &'static str, value: i64 },
    #[error("{coarser} is set but finer tier {missing} is missing")]
    MissingFinerTier {
        coarser: &'static str,
        missing: &'static str,
    },
}

/// How a mapping rule's `source_pattern` is matched against a normalized SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Exact,
    Prefix,
    Suffix,
    Contains,
}

impl PatternType {
    /// The single dispatch point for pattern matching. Both sides are assumed
    /// already normalized.
    pub fn matches(self, pattern: &str, candidate: &str) -> bool {
        match self {
            PatternType::Exact => candidate == pattern,
            PatternType::Prefix => candidate.starts_with(pattern),
            PatternType::Suffix => candidate.ends_with(pattern),
            PatternType::Contains => candidate.contains(pattern),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Exact => "exact",
            PatternType::Prefix => "prefix",
            PatternType::Suffix => "suffix",
            PatternType::Contains => "contains",
        }
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(PatternType::Exact),
            "prefix" => Ok(PatternType::Prefix),
            "suffix" => Ok(PatternType::Suffix),
            "contains" => Ok(PatternType::Contains),
            other => Err(format!("unknown pattern type: {other}")),
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered, confidence-scored rule translating an observed external SKU
/// into a catalog SKU plus a quantity multiplier.
///
/// Rules are soft-deleted (`is_active = false`), never removed, so historical
/// resolutions stay auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: i64,
    /// Stored normalized (trimmed, uppercase).
    pub source_pattern: String,
    pub pattern_type: PatternType,
    pub target_sku: String,
    /// Composite/variety packs: one sold unit of this SKU represents this many
    /// canonical units of the target. Always >= 1.
    pub quantity_multiplier: i64,
    /// 0..=100.
    pub confidence: i16,
    /// Tie-break ordering, lower wins.
    pub priority: i32,
    pub is_active: bool,
}

impl MappingRule {
    /// Precedence key: (priority asc, confidence desc, id asc).
    pub fn precedence_key(&self) -> (i32, i16, i64) {
        (self.priority, -self.confidence, self.id)
    }
}

/// Sales channel an order line was ingested from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    Shopify,
    MercadoLibre,
    Relbase,
    Other(String),
}

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Shopify => "shopify",
            Channel::MercadoLibre => "mercadolibre",
            Channel::Relbase => "relbase",
            Channel::Other(s) => s.as_str(),
        }
    }

    /// Default presentation profile for quantity formatting.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Shopify => ChannelKind::B2c,
            Channel::MercadoLibre => ChannelKind::Marketplace,
            Channel::Relbase => ChannelKind::Direct,
            Channel::Other(_) => ChannelKind::B2c,
        }
    }
}

impl From<String> for Channel {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "shopify" => Channel::Shopify,
            "mercadolibre" => Channel::MercadoLibre,
            "relbase" => Channel::Relbase,
            _ => Channel::Other(s.trim().to_ascii_lowercase()),
        }
    }
}

impl From<Channel> for String {
    fn from(c: Channel) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which packaging tier a channel prefers when quantities are shown to humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// End-consumer storefronts: plain units.
    B2c,
    /// Retail chains order whole boxes.
    Retail,
    /// Direct B2B: mixed boxes plus remainder units.
    Direct,
    /// Marketplaces: plain units.
    Marketplace,
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "b2c" => Ok(ChannelKind::B2c),
            "retail" => Ok(ChannelKind::Retail),
            "direct" => Ok(ChannelKind::Direct),
            "marketplace" => Ok(ChannelKind::Marketplace),
            other => Err(format!("unknown channel kind: {other}")),
        }
    }
}

/// One order line exactly as received from a channel. Immutable once ingested;
/// the source of truth every refresh recomputes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOrderLine {
    pub external_sku: String,
    pub quantity_sold: i64,
    pub unit_price_minor: i64,
    pub channel: Channel,
    pub order_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(upd: Option<i64>, dpb: Option<i64>, bpp: Option<i64>) -> CatalogProduct {
        CatalogProduct {
            sku: "SKU-1".into(),
            master_sku: None,
            name: "Test".into(),
            category: Some("BARRAS".into()),
            is_active: true,
            units_per_display: upd,
            displays_per_box: dpb,
            boxes_per_pallet: bpp,
        }
    }

    #[test]
    fn full_hierarchy_is_valid() {
        assert_eq!(product(Some(12), Some(12), Some(20)).validate_hierarchy(), Ok(()));
        assert_eq!(product(Some(12), None, None).validate_hierarchy(), Ok(()));
        assert_eq!(product(None, None, None).validate_hierarchy(), Ok(()));
    }

    #[test]
    fn coarser_tier_requires_finer_tiers() {
        assert_eq!(
            product(None, Some(12), None).validate_hierarchy(),
            Err(HierarchyError::MissingFinerTier {
                coarser: "displays_per_box",
                missing: "units_per_display",
            })
        );
        assert_eq!(
            product(Some(12), None, Some(20)).validate_hierarchy(),
            Err(HierarchyError::MissingFinerTier {
                coarser: "boxes_per_pallet",
                missing: "displays_per_box",
            })
        );
    }

    #[test]
    fn factors_must_be_positive() {
        assert_eq!(
            product(Some(0), None, None).validate_hierarchy(),
            Err(HierarchyError::NonPositiveFactor {
                field: "units_per_display",
                value: 0,
            })
        );
    }

    #[test]
    fn pattern_dispatch() {
        assert!(PatternType::Exact.matches("ABC", "ABC"));
        assert!(!PatternType::Exact.matches("ABC", "ABCD"));
        assert!(PatternType::Prefix.matches("BAR-", "BAR-CHIA-001"));
        assert!(PatternType::Suffix.matches("-001", "BAR-CHIA-001"));
        assert!(PatternType::Contains.matches("CHIA", "BAR-CHIA-001"));
        assert!(!PatternType::Contains.matches("CACAO", "BAR-CHIA-001"));
    }

    #[test]
    fn channel_round_trip_is_case_insensitive() {
        assert_eq!(Channel::from("Shopify".to_string()), Channel::Shopify);
        assert_eq!(
            Channel::from("MERCADOLIBRE".to_string()),
            Channel::MercadoLibre
        );
        assert_eq!(
            Channel::from("walmart".to_string()),
            Channel::Other("walmart".into())
        );
    }
}
