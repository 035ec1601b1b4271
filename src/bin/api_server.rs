// HTTP API server binary: admin/control surface for the reconciliation engine.

use std::sync::Arc;

use anyhow::Result;
use skuhub::api::ApiServer;
use skuhub::catalog::store::CatalogCache;
use skuhub::facts::aggregator::FactAggregator;
use skuhub::orchestrator::RefreshPipeline;
use skuhub::util::db::Db;
use skuhub::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    tracing::info!("Initializing skuhub API server");

    // Load dotenv/env once (safe to call multiple times)
    env_util::init_env();

    let server = ApiServer::from_env()?;

    let database_url = env_util::db_url()?;
    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&database_url, max_connections).await?;

    tracing::info!("Database connected successfully");

    let pipeline = RefreshPipeline::new(
        db,
        CatalogCache::default(),
        Arc::new(FactAggregator::default()),
    );
    if let Err(e) = pipeline.warm_catalog().await {
        tracing::warn!(error = %e, "catalog warm-up failed; serving with empty catalog");
    }

    server.run(pipeline).await?;

    Ok(())
}
