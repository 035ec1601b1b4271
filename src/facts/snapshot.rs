//! The derived sales-fact layer.
//!
//! A [`FactSnapshot`] is a complete, immutable recomputation of every raw
//! order line against one catalog snapshot. The [`FactStore`] publishes
//! snapshots by atomic swap: readers always see either the previous complete
//! snapshot or the new complete one, never a mix, and never block on a
//! refresh in progress.

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::catalog::model::Channel;
use crate::resolution::MatchType;

/// Label used for the category bucket of unmapped / uncategorized lines.
/// Reported honestly, never filtered out.
pub const UNMAPPED_BUCKET: &str = "UNMAPPED";

/// One normalized, resolved record derived from a raw order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSalesFact {
    pub original_sku: String,
    /// None means unmapped.
    pub catalog_sku: Option<String>,
    pub category: Option<String>,
    pub match_type: MatchType,
    pub quantity_multiplier: i64,
    pub original_units_sold: i64,
    /// Always exactly original_units_sold * quantity_multiplier.
    pub adjusted_units_sold: i64,
    pub revenue_minor: i64,
    pub channel: Channel,
    pub order_date: NaiveDate,
}

/// Grouping axis for reporting off the fact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Category,
    Channel,
    /// Calendar year-month of the order date.
    Period,
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "category" => Ok(GroupBy::Category),
            "channel" => Ok(GroupBy::Channel),
            "period" => Ok(GroupBy::Period),
            other => Err(format!("unknown group_by: {other}")),
        }
    }
}

/// One row of a grouped summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub key: String,
    pub line_count: u64,
    pub adjusted_units_sold: i64,
    pub revenue_minor: i64,
}

/// Complete, immutable fact set from one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct FactSnapshot {
    facts: Vec<ResolvedSalesFact>,
    generated_at: DateTime<Utc>,
}

impl FactSnapshot {
    pub fn new(facts: Vec<ResolvedSalesFact>, generated_at: DateTime<Utc>) -> Self {
        Self {
            facts,
            generated_at,
        }
    }

    pub fn facts(&self) -> &[ResolvedSalesFact] {
        &self.facts
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn row_count(&self) -> usize {
        self.facts.len()
    }

    pub fn unmapped_count(&self) -> usize {
        self.facts
            .iter()
            .filter(|f| f.match_type == MatchType::Unmapped)
            .count()
    }

    /// Exact total revenue over every fact row, mapped and unmapped alike.
    pub fn total_revenue_minor(&self) -> i64 {
        self.facts.iter().map(|f| f.revenue_minor).sum()
    }

    pub fn order_date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.facts.iter().map(|f| f.order_date).min()?;
        let max = self.facts.iter().map(|f| f.order_date).max()?;
        Some((min, max))
    }

    pub fn distinct_channel_count(&self) -> usize {
        self.facts
            .iter()
            .map(|f| f.channel.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Grouped totals along one axis, sorted by key for stable output.
    /// Uncategorized/unmapped lines land in the UNMAPPED bucket.
    pub fn summary_by(&self, group_by: GroupBy) -> Vec<GroupTotal> {
        let mut groups: IndexMap<String, GroupTotal> = IndexMap::new();
        for fact in &self.facts {
            let key = match group_by {
                GroupBy::Category => fact
                    .category
                    .clone()
                    .unwrap_or_else(|| UNMAPPED_BUCKET.to_string()),
                GroupBy::Channel => fact.channel.as_str().to_string(),
                GroupBy::Period => fact.order_date.format("%Y-%m").to_string(),
            };
            let entry = groups.entry(key.clone()).or_insert(GroupTotal {
                key,
                line_count: 0,
                adjusted_units_sold: 0,
                revenue_minor: 0,
            });
            entry.line_count += 1;
            entry.adjusted_units_sold += fact.adjusted_units_sold;
            entry.revenue_minor += fact.revenue_minor;
        }
        let mut out: Vec<GroupTotal> = groups.into_values().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

/// Swap-on-completion holder for the current fact snapshot.
///
/// `None` until the first successful refresh. Readers clone the `Arc` out of
/// the lock; a refresh builds its snapshot entirely outside the lock and only
/// takes the write lock for the pointer swap.
#[derive(Clone, Default)]
pub struct FactStore {
    current: Arc<RwLock<Option<Arc<FactSnapshot>>>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<Arc<FactSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn swap(&self, snapshot: FactSnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(category: Option<&str>, channel: Channel, date: &str, revenue: i64) -> ResolvedSalesFact {
        ResolvedSalesFact {
            original_sku: "X".into(),
            catalog_sku: category.map(|_| "X".to_string()),
            category: category.map(Into::into),
            match_type: if category.is_some() {
                MatchType::Exact
            } else {
                MatchType::Unmapped
            },
            quantity_multiplier: 1,
            original_units_sold: 1,
            adjusted_units_sold: 1,
            revenue_minor: revenue,
            channel,
            order_date: date.parse().unwrap(),
        }
    }

    #[test]
    fn summary_keeps_unmapped_bucket() {
        let snap = FactSnapshot::new(
            vec![
                fact(Some("BARRAS"), Channel::Shopify, "2025-03-01", 1000),
                fact(None, Channel::MercadoLibre, "2025-03-02", 500),
                fact(Some("BARRAS"), Channel::Shopify, "2025-03-05", 2000),
            ],
            Utc::now(),
        );
        let by_category = snap.summary_by(GroupBy::Category);
        assert_eq!(by_category.len(), 2);
        let unmapped = by_category.iter().find(|g| g.key == UNMAPPED_BUCKET).unwrap();
        assert_eq!(unmapped.revenue_minor, 500);
        let barras = by_category.iter().find(|g| g.key == "BARRAS").unwrap();
        assert_eq!(barras.revenue_minor, 3000);
        // Buckets always reconcile to the full total.
        let sum: i64 = by_category.iter().map(|g| g.revenue_minor).sum();
        assert_eq!(sum, snap.total_revenue_minor());
    }

    #[test]
    fn status_accessors() {
        let snap = FactSnapshot::new(
            vec![
                fact(Some("BARRAS"), Channel::Shopify, "2025-01-10", 100),
                fact(None, Channel::Relbase, "2025-02-20", 100),
            ],
            Utc::now(),
        );
        assert_eq!(snap.row_count(), 2);
        assert_eq!(snap.unmapped_count(), 1);
        assert_eq!(snap.distinct_channel_count(), 2);
        assert_eq!(
            snap.order_date_range(),
            Some(("2025-01-10".parse().unwrap(), "2025-02-20".parse().unwrap()))
        );
    }

    #[test]
    fn store_swaps_whole_snapshots() {
        let store = FactStore::new();
        assert!(store.load().is_none());
        store.swap(FactSnapshot::new(
            vec![fact(Some("A"), Channel::Shopify, "2025-01-01", 1)],
            Utc::now(),
        ));
        let first = store.load().unwrap();
        assert_eq!(first.row_count(), 1);
        store.swap(FactSnapshot::new(vec![], Utc::now()));
        // The old Arc is still fully readable; the store now serves the new one.
        assert_eq!(first.row_count(), 1);
        assert_eq!(store.load().unwrap().row_count(), 0);
    }
}
