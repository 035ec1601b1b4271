use anyhow::Result;
use chrono::NaiveDate;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::str::FromStr;

use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct DbCountsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
}

pub async fn run(cfg: DbCountsConfig) -> Result<()> {
    env_util::init_env();
    let db_url = if let Some(url) = cfg.database_url.clone() {
        url
    } else {
        env_util::db_url().map_err(|e| {
            anyhow::anyhow!("database URL missing; check SKUHUB_DB_URL / DATABASE_URL ({e})")
        })?
    };
    let mut connect_options = PgConnectOptions::from_str(&db_url)?.statement_cache_capacity(0);

    // Ensure TLS is enabled when DSN contains sslmode=require
    if db_url.contains("sslmode=require") && !db_url.contains("sslmode=disable") {
        connect_options = connect_options.ssl_mode(PgSslMode::Require);
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    fn is_undefined_table_error(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
            _ => false,
        }
    }

    // A fresh database with no migrations yet should still print zeros rather
    // than fail diagnostics.
    macro_rules! count {
        ($sql:expr) => {
            match sqlx::query_scalar::<_, i64>($sql)
                .persistent(false)
                .fetch_one(&pool)
                .await
            {
                Ok(val) => val,
                Err(e) if is_undefined_table_error(&e) => 0,
                Err(e) => return Err(e.into()),
            }
        };
    }

    let products = count!("SELECT count(*) FROM public.catalog_products");
    let products_active = count!("SELECT count(*) FROM public.catalog_products WHERE is_active");
    let rules = count!("SELECT count(*) FROM public.sku_mappings");
    let rules_active = count!("SELECT count(*) FROM public.sku_mappings WHERE is_active");
    let raw_lines = count!("SELECT count(*) FROM public.raw_order_lines");
    let facts = count!("SELECT count(*) FROM public.resolved_sales_facts");
    let unmapped =
        count!("SELECT count(*) FROM public.resolved_sales_facts WHERE match_type = 'unmapped'");
    let unmapped_revenue = count!(
        "SELECT COALESCE(sum(revenue_minor), 0) FROM public.resolved_sales_facts WHERE match_type = 'unmapped'"
    );
    let total_revenue =
        count!("SELECT COALESCE(sum(revenue_minor), 0) FROM public.resolved_sales_facts");
    let channels = count!("SELECT count(DISTINCT channel) FROM public.raw_order_lines");

    let date_range: Option<(NaiveDate, NaiveDate)> = match sqlx::query_as::<_, (NaiveDate, NaiveDate)>(
        "SELECT min(order_date), max(order_date) FROM public.raw_order_lines",
    )
    .persistent(false)
    .fetch_optional(&pool)
    .await
    {
        Ok(v) => v,
        Err(e) if is_undefined_table_error(&e) => None,
        // min/max over zero rows decode as NULL, not a tuple
        Err(_) => None,
    };

    println!("catalog_products:      {products} ({products_active} active)");
    println!("sku_mappings:          {rules} ({rules_active} active)");
    println!("raw_order_lines:       {raw_lines} across {channels} channels");
    if let Some((from, to)) = date_range {
        println!("order_date range:      {from} .. {to}");
    }
    println!("resolved_sales_facts:  {facts}");
    println!("unmapped facts:        {unmapped} (revenue_minor {unmapped_revenue})");
    println!("total revenue_minor:   {total_revenue}");
    if facts > 0 {
        let pct = (unmapped as f64) * 100.0 / (facts as f64);
        println!("unmapped share:        {pct:.2}%");
    }

    Ok(())
}
