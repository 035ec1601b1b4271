use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use skuhub::api::ApiServer;
use skuhub::catalog::store::CatalogCache;
use skuhub::facts::aggregator::{FactAggregator, RefreshError};
use skuhub::orchestrator::RefreshPipeline;
use skuhub::util::db::Db;
use skuhub::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    // --- logging -------------------------------------------------------------
    dotenv().ok();
    skuhub::telemetry::init_tracing("info,sqlx=warn")?;

    // --- DB connect ----------------------------------------------------------
    let database_url = match env_util::db_url() {
        Ok(url) if !url.is_empty() => {
            info!("database URL detected (length={})", url.len());
            url
        }
        _ => {
            anyhow::bail!("Database URL not configured; set SKUHUB_DB_URL or DATABASE_URL first");
        }
    };

    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&database_url, max_conns)
        .await
        .context("Db::connect failed")?;
    info!("database connected (max_conns={})", max_conns);

    // --- refresh pipeline ----------------------------------------------------
    let pipeline = RefreshPipeline::new(
        db,
        CatalogCache::default(),
        Arc::new(FactAggregator::default()),
    );
    if let Err(e) = pipeline.warm_catalog().await {
        warn!(error = %e, "initial catalog load failed; continuing with empty catalog");
    }

    // Run the first refresh eagerly so the API starts with a populated
    // snapshot when there is data to serve.
    match pipeline.run_once(false).await {
        Ok(summary) => info!(
            rows = summary.row_count,
            unmapped = summary.unmapped_count,
            "startup refresh complete"
        ),
        Err(RefreshError::InProgress) => {}
        Err(e) => warn!(error = %e, "startup refresh failed; serving stale"),
    }

    // --- shutdown wiring -----------------------------------------------------
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // --- periodic refresh loop ----------------------------------------------
    {
        let loop_pipeline = pipeline.clone();
        let mut rx = shutdown_tx.subscribe();
        let interval_secs: u64 = env_util::env_parse("REFRESH_INTERVAL_SECS", 900u64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match loop_pipeline.run_once(false).await {
                            Ok(summary) => info!(
                                rows = summary.row_count,
                                unmapped = summary.unmapped_count,
                                duration_seconds = summary.duration_seconds,
                                "scheduled refresh complete"
                            ),
                            Err(RefreshError::InProgress) => {
                                info!("scheduled refresh skipped; another refresh holds the gate")
                            }
                            Err(e) => error!(error = %e, "scheduled refresh failed"),
                        }
                    }
                    _ = rx.recv() => {
                        info!("refresh loop: shutdown");
                        break;
                    }
                }
            }
        });
    }

    // --- HTTP API ------------------------------------------------------------
    let server = ApiServer::from_env()?;
    info!("service started; press Ctrl+C to stop");
    let result = server.run(pipeline).await;

    let _ = shutdown_tx.send(());
    info!("all tasks stopped");
    result
}
