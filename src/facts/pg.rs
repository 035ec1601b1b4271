use anyhow::Result;
use sqlx::{QueryBuilder, Row};
use tracing::{info, instrument};

use crate::catalog::model::{Channel, RawOrderLine};
use crate::facts::snapshot::FactSnapshot;
use crate::util::db::Db;

const PERSIST_CHUNK: usize = 500;

/// Fetch every raw order line, oldest first. Refresh order is part of the
/// determinism contract, so the sort key is explicit rather than insertion
/// order.
pub async fn fetch_raw_order_lines(db: &Db) -> Result<Vec<RawOrderLine>> {
    let rows = sqlx::query(
        "SELECT external_sku, quantity_sold, unit_price_minor, channel, order_date
         FROM raw_order_lines
         ORDER BY order_date ASC, id ASC",
    )
    .fetch_all(&db.pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for r in &rows {
        let channel: String = r.try_get("channel")?;
        out.push(RawOrderLine {
            external_sku: r.try_get("external_sku")?,
            quantity_sold: r.try_get("quantity_sold")?,
            unit_price_minor: r.try_get("unit_price_minor")?,
            channel: Channel::from(channel),
            order_date: r.try_get("order_date")?,
        });
    }
    Ok(out)
}

pub async fn count_raw_order_lines(db: &Db) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM raw_order_lines")
        .fetch_one(&db.pool)
        .await?;
    Ok(row.try_get("n")?)
}

/// Insert raw order lines (ingest path, also used by seed tooling).
pub async fn insert_raw_order_lines(db: &Db, lines: &[RawOrderLine]) -> Result<u64> {
    let mut inserted = 0u64;
    for chunk in lines.chunks(PERSIST_CHUNK) {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO raw_order_lines (external_sku, quantity_sold, unit_price_minor, channel, order_date) ",
        );
        qb.push_values(chunk.iter(), |mut b, line| {
            b.push_bind(&line.external_sku)
                .push_bind(line.quantity_sold)
                .push_bind(line.unit_price_minor)
                .push_bind(line.channel.as_str())
                .push_bind(line.order_date);
        });
        let res = qb.build().execute(&db.pool).await?;
        inserted += res.rows_affected();
    }
    Ok(inserted)
}

/// Write-behind persistence of a completed fact snapshot.
///
/// The fact table is derived data: the whole set is rebuilt into a staging
/// table and swapped transactionally, so readers of the table never see a
/// half-written refresh.
#[instrument(skip(db, snapshot), fields(rows = snapshot.row_count()))]
pub async fn persist_snapshot(db: &Db, snapshot: &FactSnapshot) -> Result<()> {
    let mut tx = db.pool.begin().await?;

    sqlx::query("DROP TABLE IF EXISTS resolved_sales_facts_staging")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "CREATE TABLE resolved_sales_facts_staging (
            original_sku         TEXT NOT NULL,
            catalog_sku          TEXT,
            category             TEXT,
            match_type           TEXT NOT NULL,
            quantity_multiplier  BIGINT NOT NULL,
            original_units_sold  BIGINT NOT NULL,
            adjusted_units_sold  BIGINT NOT NULL,
            revenue_minor        BIGINT NOT NULL,
            channel              TEXT NOT NULL,
            order_date           DATE NOT NULL
         )",
    )
    .execute(&mut *tx)
    .await?;

    for chunk in snapshot.facts().chunks(PERSIST_CHUNK) {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO resolved_sales_facts_staging
               (original_sku, catalog_sku, category, match_type, quantity_multiplier,
                original_units_sold, adjusted_units_sold, revenue_minor, channel, order_date) ",
        );
        qb.push_values(chunk.iter(), |mut b, fact| {
            b.push_bind(&fact.original_sku)
                .push_bind(&fact.catalog_sku)
                .push_bind(&fact.category)
                .push_bind(fact.match_type.as_str())
                .push_bind(fact.quantity_multiplier)
                .push_bind(fact.original_units_sold)
                .push_bind(fact.adjusted_units_sold)
                .push_bind(fact.revenue_minor)
                .push_bind(fact.channel.as_str())
                .push_bind(fact.order_date);
        });
        qb.build().execute(&mut *tx).await?;
    }

    sqlx::query("TRUNCATE resolved_sales_facts")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO resolved_sales_facts
           (original_sku, catalog_sku, category, match_type, quantity_multiplier,
            original_units_sold, adjusted_units_sold, revenue_minor, channel, order_date)
         SELECT original_sku, catalog_sku, category, match_type, quantity_multiplier,
                original_units_sold, adjusted_units_sold, revenue_minor, channel, order_date
         FROM resolved_sales_facts_staging",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("DROP TABLE resolved_sales_facts_staging")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(rows = snapshot.row_count(), "fact snapshot persisted");
    Ok(())
}
