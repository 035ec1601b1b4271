use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::catalog::store::{CatalogCache, CatalogSnapshot};
use crate::facts::aggregator::{CancelToken, FactAggregator, RefreshError, RefreshSummary};
use crate::facts::pg;
use crate::util::db::Db;

/// Shared handles for one refresh pipeline: catalog cache, aggregator, and
/// the cancel token for the in-flight pass.
#[derive(Clone)]
pub struct RefreshPipeline {
    pub db: Db,
    pub catalog: CatalogCache,
    pub aggregator: Arc<FactAggregator>,
    pub cancel: Arc<CancelToken>,
}

impl RefreshPipeline {
    pub fn new(db: Db, catalog: CatalogCache, aggregator: Arc<FactAggregator>) -> Self {
        Self {
            db,
            catalog,
            aggregator,
            cancel: Arc::new(CancelToken::new()),
        }
    }

    /// One full pass: reload the catalog, pull every raw order line, rebuild
    /// the fact set, then write the result behind the in-memory swap.
    ///
    /// `dry_run` skips both the snapshot publish and the table write; callers
    /// still get the summary they would have committed.
    pub async fn run_once(&self, dry_run: bool) -> Result<RefreshSummary, RefreshError> {
        let source = crate::catalog::pg::PgCatalogStore::new(self.db.clone());
        let catalog = CatalogSnapshot::load(&source)
            .await
            .map_err(|e| RefreshError::Failed {
                line_index: 0,
                external_sku: String::new(),
                cause: format!("catalog load: {e}"),
            })?;

        let lines = pg::fetch_raw_order_lines(&self.db)
            .await
            .map_err(|e| RefreshError::Failed {
                line_index: 0,
                external_sku: String::new(),
                cause: format!("order line fetch: {e}"),
            })?;
        info!(
            products = catalog.product_count(),
            rules = catalog.rule_count(),
            lines = lines.len(),
            dry_run,
            "refresh pass starting"
        );

        if dry_run {
            // Dry runs go through a throwaway aggregator so the live store
            // and refresh state are untouched.
            let scratch = FactAggregator::default();
            let summary = scratch.refresh(&catalog, &lines, &self.cancel).await?;
            return Ok(summary);
        }

        let summary = self.aggregator.refresh(&catalog, &lines, &self.cancel).await?;
        self.catalog.swap(catalog);

        if let Some(snapshot) = self.aggregator.store().load() {
            if let Err(e) = pg::persist_snapshot(&self.db, &snapshot).await {
                // The in-memory snapshot is authoritative; a failed table
                // write degrades durability, not correctness.
                error!(error = %e, "fact snapshot persistence failed");
            }
        }
        Ok(summary)
    }

    /// Warm the catalog cache at startup without touching facts.
    pub async fn warm_catalog(&self) -> Result<()> {
        let source = crate::catalog::pg::PgCatalogStore::new(self.db.clone());
        let snapshot = CatalogSnapshot::load(&source)
            .await
            .context("initial catalog load")?;
        info!(
            products = snapshot.product_count(),
            rules = snapshot.rule_count(),
            "catalog cache warmed"
        );
        self.catalog.swap(snapshot);
        Ok(())
    }
}

/// Periodic refresh loop. Interval comes from REFRESH_INTERVAL_SECS
/// (default 900); a pass rejected because another one holds the gate is
/// logged and skipped, never queued.
pub async fn run_refresh_loop(pipeline: RefreshPipeline) {
    let interval_secs: u64 = crate::util::env::env_parse("REFRESH_INTERVAL_SECS", 900);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs, "refresh loop started");
    loop {
        ticker.tick().await;
        match pipeline.run_once(false).await {
            Ok(summary) => info!(
                rows = summary.row_count,
                unmapped = summary.unmapped_count,
                warnings = summary.warnings.len(),
                duration_seconds = summary.duration_seconds,
                "scheduled refresh complete"
            ),
            Err(RefreshError::InProgress) => {
                info!("scheduled refresh skipped; another refresh holds the gate")
            }
            Err(e) => error!(error = %e, "scheduled refresh failed"),
        }
    }
}
