//! Full-recompute sales-fact aggregation.
//!
//! `refresh` is the only operation in the system needing an exclusivity
//! guarantee: at most one refresh runs at a time (a second trigger fails fast
//! with [`RefreshError::InProgress`]). Readers of the fact store keep seeing
//! the last complete snapshot until the new one is swapped in; a failed or
//! cancelled refresh publishes nothing and drops the state back to `Stale`.

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::model::RawOrderLine;
use crate::catalog::store::CatalogSnapshot;
use crate::facts::snapshot::{FactSnapshot, FactStore, ResolvedSalesFact};
use crate::resolution::{ResolveError, Resolver};

/// Lines per cancellation checkpoint during the parallel resolve pass.
const REFRESH_BATCH: usize = 1024;

/// Lifecycle of the derived fact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    /// No refresh has succeeded since the last failure (or ever).
    Stale,
    /// A refresh is in flight; the previous snapshot stays readable.
    Refreshing,
    Fresh,
}

impl RefreshState {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshState::Stale => "stale",
            RefreshState::Refreshing => "refreshing",
            RefreshState::Fresh => "fresh",
        }
    }
}

/// Cooperative cancellation flag checked at batch boundaries.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A raw line excluded from the fact set, with enough context to fix the
/// upstream data. Never silently dropped: surfaced in the refresh summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineWarning {
    pub line_index: usize,
    pub external_sku: String,
    pub reason: String,
}

/// Outcome of one successful refresh pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub row_count: usize,
    pub unmapped_count: usize,
    pub warnings: Vec<LineWarning>,
    pub duration_seconds: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    /// A refresh is already running; retry later.
    #[error("a refresh is already in progress")]
    InProgress,
    #[error("refresh cancelled before completion; previous snapshot left intact")]
    Cancelled,
    /// Mid-refresh failure; the previous snapshot stays authoritative.
    #[error("refresh failed at line {line_index} (sku {external_sku:?}): {cause}")]
    Failed {
        line_index: usize,
        external_sku: String,
        cause: String,
    },
}

enum LineOutcome {
    Fact(Box<ResolvedSalesFact>),
    Warning(LineWarning),
    // i64 overflow on multiplier or revenue. Practically unreachable with
    // real catalog data, but must not poison the pass.
    Fatal {
        line_index: usize,
        external_sku: String,
        cause: String,
    },
}

/// Consumes raw order lines, resolves and normalizes each one, and publishes
/// complete fact snapshots to its [`FactStore`].
pub struct FactAggregator {
    store: FactStore,
    refresh_gate: tokio::sync::Mutex<()>,
    state: Mutex<RefreshState>,
}

impl Default for FactAggregator {
    fn default() -> Self {
        Self::new(FactStore::new())
    }
}

impl FactAggregator {
    pub fn new(store: FactStore) -> Self {
        Self {
            store,
            refresh_gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(RefreshState::Stale),
        }
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    pub fn state(&self) -> RefreshState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: RefreshState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// Full, idempotent recomputation of the fact set.
    ///
    /// Per-line problems (empty SKU) become warnings and the pass continues;
    /// every other line lands in exactly one fact row, mapped or unmapped, so
    /// total fact revenue always reconciles with the raw lines that were
    /// accepted.
    pub async fn refresh(
        &self,
        catalog: &CatalogSnapshot,
        lines: &[RawOrderLine],
        cancel: &CancelToken,
    ) -> Result<RefreshSummary, RefreshError> {
        let _gate = self
            .refresh_gate
            .try_lock()
            .map_err(|_| RefreshError::InProgress)?;

        self.set_state(RefreshState::Refreshing);
        let started = Instant::now();

        let result = self.build_facts(catalog, lines, cancel);
        let (facts, warnings) = match result {
            Ok(built) => built,
            Err(e) => {
                self.set_state(RefreshState::Stale);
                return Err(e);
            }
        };

        // Last safe boundary: nothing is published for a cancelled refresh.
        if cancel.is_cancelled() {
            self.set_state(RefreshState::Stale);
            return Err(RefreshError::Cancelled);
        }

        for w in &warnings {
            warn!(
                line_index = w.line_index,
                external_sku = %w.external_sku,
                reason = %w.reason,
                "order line excluded from fact set"
            );
        }

        let timestamp = Utc::now();
        let snapshot = FactSnapshot::new(facts, timestamp);
        let summary = RefreshSummary {
            row_count: snapshot.row_count(),
            unmapped_count: snapshot.unmapped_count(),
            warnings,
            duration_seconds: started.elapsed().as_secs_f64(),
            timestamp,
        };
        self.store.swap(snapshot);
        self.set_state(RefreshState::Fresh);

        info!(
            row_count = summary.row_count,
            unmapped = summary.unmapped_count,
            warnings = summary.warnings.len(),
            duration_s = summary.duration_seconds,
            "fact snapshot refreshed"
        );
        Ok(summary)
    }

    /// Resolve every line against the catalog snapshot. Rayon fan-out per
    /// batch; output order follows input order so refreshes are deterministic.
    fn build_facts(
        &self,
        catalog: &CatalogSnapshot,
        lines: &[RawOrderLine],
        cancel: &CancelToken,
    ) -> Result<(Vec<ResolvedSalesFact>, Vec<LineWarning>), RefreshError> {
        let mut facts: Vec<ResolvedSalesFact> = Vec::with_capacity(lines.len());
        let mut warnings: Vec<LineWarning> = Vec::new();

        for (batch_index, batch) in lines.chunks(REFRESH_BATCH).enumerate() {
            if cancel.is_cancelled() {
                return Err(RefreshError::Cancelled);
            }
            let base = batch_index * REFRESH_BATCH;
            let outcomes: Vec<LineOutcome> = batch
                .par_iter()
                .enumerate()
                .map(|(offset, line)| resolve_line(catalog, base + offset, line))
                .collect();
            for outcome in outcomes {
                match outcome {
                    LineOutcome::Fact(fact) => facts.push(*fact),
                    LineOutcome::Warning(w) => warnings.push(w),
                    LineOutcome::Fatal {
                        line_index,
                        external_sku,
                        cause,
                    } => {
                        return Err(RefreshError::Failed {
                            line_index,
                            external_sku,
                            cause,
                        })
                    }
                }
            }
        }
        Ok((facts, warnings))
    }
}

fn resolve_line(catalog: &CatalogSnapshot, line_index: usize, line: &RawOrderLine) -> LineOutcome {
    let resolver = Resolver::new(catalog);
    let resolution = match resolver.resolve(&line.external_sku) {
        Ok(r) => r,
        Err(ResolveError::EmptySku) => {
            return LineOutcome::Warning(LineWarning {
                line_index,
                external_sku: line.external_sku.clone(),
                reason: "empty SKU after normalization".to_string(),
            })
        }
    };

    let adjusted = match line
        .quantity_sold
        .checked_mul(resolution.quantity_multiplier)
    {
        Some(v) => v,
        None => {
            return LineOutcome::Fatal {
                line_index,
                external_sku: line.external_sku.clone(),
                cause: format!(
                    "adjusted units overflow: {} * {}",
                    line.quantity_sold, resolution.quantity_multiplier
                ),
            }
        }
    };
    let revenue_minor = match line.unit_price_minor.checked_mul(line.quantity_sold) {
        Some(v) => v,
        None => {
            return LineOutcome::Fatal {
                line_index,
                external_sku: line.external_sku.clone(),
                cause: format!(
                    "revenue overflow: {} * {}",
                    line.unit_price_minor, line.quantity_sold
                ),
            }
        }
    };

    LineOutcome::Fact(Box::new(ResolvedSalesFact {
        original_sku: line.external_sku.clone(),
        catalog_sku: resolution.catalog_sku,
        category: resolution.category,
        match_type: resolution.match_type,
        quantity_multiplier: resolution.quantity_multiplier,
        original_units_sold: line.quantity_sold,
        adjusted_units_sold: adjusted,
        revenue_minor,
        channel: line.channel.clone(),
        order_date: line.order_date,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::{CatalogProduct, Channel, MappingRule, PatternType};
    use crate::facts::snapshot::{GroupBy, UNMAPPED_BUCKET};
    use crate::resolution::MatchType;

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::from_parts(
            vec![
                CatalogProduct {
                    sku: "BAR-CHIA-001".into(),
                    master_sku: None,
                    name: "Barra chia".into(),
                    category: Some("BARRAS".into()),
                    is_active: true,
                    units_per_display: Some(12),
                    displays_per_box: Some(12),
                    boxes_per_pallet: Some(20),
                },
                CatalogProduct {
                    sku: "GRA-COCO-500".into(),
                    master_sku: None,
                    name: "Granola coco".into(),
                    category: Some("GRANOLAS".into()),
                    is_active: true,
                    units_per_display: Some(6),
                    displays_per_box: None,
                    boxes_per_pallet: None,
                },
            ],
            vec![MappingRule {
                id: 1,
                source_pattern: "ML-PACK-CHIA".into(),
                pattern_type: PatternType::Exact,
                target_sku: "BAR-CHIA-001".into(),
                quantity_multiplier: 6,
                confidence: 90,
                priority: 0,
                is_active: true,
            }],
        )
    }

    fn line(sku: &str, qty: i64, price: i64, channel: Channel) -> RawOrderLine {
        RawOrderLine {
            external_sku: sku.into(),
            quantity_sold: qty,
            unit_price_minor: price,
            channel,
            order_date: "2025-04-15".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn refresh_builds_complete_fact_set() {
        let agg = FactAggregator::default();
        assert_eq!(agg.state(), RefreshState::Stale);

        let lines = vec![
            line("bar-chia-001", 10, 1990, Channel::Shopify),
            line("ML-PACK-CHIA", 3, 9990, Channel::MercadoLibre),
            line("MYSTERY-BUNDLE", 2, 5000, Channel::Relbase),
        ];
        let summary = agg
            .refresh(&catalog(), &lines, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(agg.state(), RefreshState::Fresh);
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.unmapped_count, 1);
        assert!(summary.warnings.is_empty());

        let snap = agg.store().load().unwrap();
        let facts = snap.facts();

        // Multiplier exactness: 3 * 6 = 18 adjusted units.
        let pack = &facts[1];
        assert_eq!(pack.match_type, MatchType::Exact);
        assert_eq!(pack.quantity_multiplier, 6);
        assert_eq!(pack.adjusted_units_sold, 18);
        assert_eq!(pack.revenue_minor, 3 * 9990);

        // Unmapped line retained with full revenue, category None.
        let unmapped = &facts[2];
        assert_eq!(unmapped.match_type, MatchType::Unmapped);
        assert_eq!(unmapped.category, None);
        assert_eq!(unmapped.quantity_multiplier, 1);
        assert_eq!(unmapped.revenue_minor, 2 * 5000);

        // Revenue conservation against the raw lines.
        let raw_total: i64 = lines
            .iter()
            .map(|l| l.unit_price_minor * l.quantity_sold)
            .sum();
        assert_eq!(snap.total_revenue_minor(), raw_total);

        // And the unmapped bucket carries its share in grouped reporting.
        let by_cat = snap.summary_by(GroupBy::Category);
        assert!(by_cat.iter().any(|g| g.key == UNMAPPED_BUCKET && g.revenue_minor == 10000));
    }

    #[tokio::test]
    async fn refresh_is_deterministic() {
        let agg = FactAggregator::default();
        let lines: Vec<RawOrderLine> = (0..3000)
            .map(|i| {
                line(
                    if i % 3 == 0 { "BAR-CHIA-001" } else { "UNKNOWN" },
                    i % 7 + 1,
                    100,
                    Channel::Shopify,
                )
            })
            .collect();
        let cat = catalog();
        agg.refresh(&cat, &lines, &CancelToken::new()).await.unwrap();
        let first = agg.store().load().unwrap().facts().to_vec();
        agg.refresh(&cat, &lines, &CancelToken::new()).await.unwrap();
        let second = agg.store().load().unwrap().facts().to_vec();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_sku_becomes_warning_not_abort() {
        let agg = FactAggregator::default();
        let lines = vec![
            line("   ", 5, 1000, Channel::Shopify),
            line("BAR-CHIA-001", 1, 1990, Channel::Shopify),
        ];
        let summary = agg
            .refresh(&catalog(), &lines, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(summary.row_count, 1);
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.warnings[0].line_index, 0);
    }

    #[tokio::test]
    async fn large_multiplier_stays_exact() {
        let cat = CatalogSnapshot::from_parts(
            vec![CatalogProduct {
                sku: "BAR-CHIA-001".into(),
                master_sku: None,
                name: "Barra chia".into(),
                category: Some("BARRAS".into()),
                is_active: true,
                units_per_display: Some(12),
                displays_per_box: Some(12),
                boxes_per_pallet: None,
            }],
            vec![MappingRule {
                id: 1,
                source_pattern: "MEGA-PACK".into(),
                pattern_type: PatternType::Exact,
                target_sku: "BAR-CHIA-001".into(),
                quantity_multiplier: 1000,
                confidence: 90,
                priority: 0,
                is_active: true,
            }],
        );
        let agg = FactAggregator::default();
        let lines = vec![line("MEGA-PACK", 123_456, 1, Channel::Shopify)];
        agg.refresh(&cat, &lines, &CancelToken::new()).await.unwrap();
        let snap = agg.store().load().unwrap();
        assert_eq!(snap.facts()[0].adjusted_units_sold, 123_456_000);
    }

    #[tokio::test]
    async fn cancelled_refresh_publishes_nothing_and_goes_stale() {
        let agg = FactAggregator::default();
        let cat = catalog();

        // Establish a FRESH snapshot first.
        let lines = vec![line("BAR-CHIA-001", 1, 100, Channel::Shopify)];
        agg.refresh(&cat, &lines, &CancelToken::new()).await.unwrap();
        let before = agg.store().load().unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = agg
            .refresh(&cat, &lines, &cancel)
            .await
            .expect_err("cancelled refresh must not succeed");
        assert!(matches!(err, RefreshError::Cancelled));
        assert_eq!(agg.state(), RefreshState::Stale);

        // Previous snapshot untouched and still served.
        let after = agg.store().load().unwrap();
        assert_eq!(before.generated_at(), after.generated_at());
    }

    #[tokio::test]
    async fn second_concurrent_refresh_is_rejected() {
        use std::sync::Arc as StdArc;

        let agg = StdArc::new(FactAggregator::default());
        let cat = StdArc::new(catalog());

        // Hold the gate by locking it directly, then try a refresh.
        let guard = agg.refresh_gate.lock().await;
        let err = agg
            .refresh(&cat, &[], &CancelToken::new())
            .await
            .expect_err("gate is held");
        assert!(matches!(err, RefreshError::InProgress));
        drop(guard);

        // Gate released: refresh succeeds again.
        agg.refresh(&cat, &[], &CancelToken::new()).await.unwrap();
        assert_eq!(agg.state(), RefreshState::Fresh);
    }
}
