use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skuhub::api::ApiServer;
use skuhub::catalog::pg::PgCatalogStore;
use skuhub::catalog::store::{CatalogCache, CatalogSnapshot};
use skuhub::cli::{db_counts, rule_check, seed_demo};
use skuhub::conversion::converter::{Converter, PackagingUnit};
use skuhub::facts::aggregator::FactAggregator;
use skuhub::orchestrator::{run_refresh_loop, RefreshPipeline};
use skuhub::resolution::resolver::Resolver;
use skuhub::util::db::Db;
use skuhub::util::env;

#[derive(Parser, Debug)]
#[command(name = "skuctl", version, about = "skuhub admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run the API server plus the periodic refresh loop
    Serve {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Skip the background refresh loop
        #[arg(long, default_value_t = false)]
        no_refresh_loop: bool,
    },
    /// Rebuild the resolved sales fact set from raw order lines
    Refresh {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Compute and report without publishing or persisting anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print fact snapshot status from the database
    Status {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Resolve one external SKU against the current catalog
    Resolve {
        /// External SKU as it appears on the sales channel
        external_sku: String,
        /// Print matched rules and near-miss suggestions
        #[arg(long, default_value_t = false)]
        explain: bool,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Convert a quantity between packaging tiers for one SKU
    Convert {
        sku: String,
        quantity: i64,
        /// Source tier: unit | display | box | pallet
        from: String,
        /// Target tier: unit | display | box | pallet
        to: String,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Show every rule matching a SKU plus suggestions (alias of resolve --explain)
    RuleCheck {
        external_sku: String,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Print row counts for the core tables
    DbCounts {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Load a small idempotent demo catalog, rules and order lines
    SeedDemo {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Print the plan without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn resolve_database_url(db_url: Option<String>) -> Result<String> {
    if let Some(url) = db_url {
        let trimmed = url.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    let env_url = env::db_url().context("resolve_database_url: missing database URL")?;
    let trimmed = env_url.trim();
    if trimmed.is_empty() {
        bail!("database URL is empty; set SKUHUB_DB_URL / DATABASE_URL or pass --db-url");
    }
    Ok(trimmed.to_string())
}

async fn load_snapshot(db_url: Option<String>) -> Result<CatalogSnapshot> {
    let database_url = resolve_database_url(db_url)?;
    let db = Db::connect_no_migrate(&database_url, 2).await?;
    let source = PgCatalogStore::new(db);
    Ok(CatalogSnapshot::load(&source).await?)
}

#[actix_web::main]
async fn main() -> Result<()> {
    env::init_env();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            db_url,
            no_refresh_loop,
        } => {
            let database_url = resolve_database_url(db_url)?;
            let max_connections: u32 = env::env_parse("DB_MAX_CONNS", 10u32);
            let db = Db::connect(&database_url, max_connections).await?;
            let pipeline = RefreshPipeline::new(
                db,
                CatalogCache::default(),
                Arc::new(FactAggregator::default()),
            );
            pipeline.warm_catalog().await?;
            if !no_refresh_loop {
                let loop_pipeline = pipeline.clone();
                tokio::spawn(run_refresh_loop(loop_pipeline));
            }
            let server = ApiServer::from_env()?;
            server.run(pipeline).await?;
        }
        Commands::Refresh { db_url, dry_run } => {
            let database_url = resolve_database_url(db_url)?;
            let db = Db::connect(&database_url, 5).await?;
            let pipeline = RefreshPipeline::new(
                db,
                CatalogCache::default(),
                Arc::new(FactAggregator::default()),
            );
            let summary = pipeline.run_once(dry_run).await?;
            info!(
                rows = summary.row_count,
                unmapped = summary.unmapped_count,
                warnings = summary.warnings.len(),
                duration_seconds = summary.duration_seconds,
                dry_run,
                "refresh complete"
            );
            println!(
                "{} {} fact rows ({} unmapped, {} warnings) in {:.2}s",
                if dry_run { "dry-run:" } else { "refreshed:" },
                summary.row_count,
                summary.unmapped_count,
                summary.warnings.len(),
                summary.duration_seconds
            );
            for w in &summary.warnings {
                println!("  warning line {}: {} ({})", w.line_index, w.external_sku, w.reason);
            }
        }
        Commands::Status { db_url } => {
            let database_url = resolve_database_url(db_url)?;
            let db = Db::connect_no_migrate(&database_url, 2).await?;
            let row: (i64, i64) = sqlx::query_as(
                "SELECT count(*), count(*) FILTER (WHERE match_type = 'unmapped')
                 FROM resolved_sales_facts",
            )
            .fetch_one(&db.pool)
            .await?;
            let populated = row.0 > 0;
            println!("persisted fact rows: {} ({} unmapped)", row.0, row.1);
            println!("populated: {populated}");
        }
        Commands::Resolve {
            external_sku,
            explain,
            db_url,
        } => {
            if explain {
                rule_check::run(db_url, &external_sku).await?;
            } else {
                let snapshot = load_snapshot(db_url).await?;
                let resolver = Resolver::new(&snapshot);
                let r = resolver.resolve(&external_sku)?;
                match &r.catalog_sku {
                    Some(sku) => println!(
                        "{external_sku} -> {sku} [{}] via {} (confidence {}, x{})",
                        r.category.as_deref().unwrap_or("-"),
                        r.match_type,
                        r.confidence,
                        r.quantity_multiplier
                    ),
                    None => println!("{external_sku} -> unmapped"),
                }
            }
        }
        Commands::Convert {
            sku,
            quantity,
            from,
            to,
            db_url,
        } => {
            let from = PackagingUnit::parse(&from)?;
            let to = PackagingUnit::parse(&to)?;
            let snapshot = load_snapshot(db_url).await?;
            let converter = Converter::new(&snapshot);
            let units = converter.to_units(&sku, quantity, from)?;
            let result = converter.convert(&sku, quantity, from, to)?;
            println!("{quantity} {from} of {sku} = {result} {to} ({units} canonical units)");
        }
        Commands::RuleCheck {
            external_sku,
            db_url,
        } => {
            rule_check::run(db_url, &external_sku).await?;
        }
        Commands::DbCounts { db_url } => {
            let cfg = db_counts::DbCountsConfig {
                database_url: db_url,
            };
            db_counts::run(cfg).await?;
        }
        Commands::SeedDemo { db_url, dry_run } => {
            seed_demo::run(db_url, dry_run).await?;
        }
    }

    Ok(())
}
