use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use tracing::{info, instrument};

use crate::catalog::model::{CatalogProduct, MappingRule, PatternType};
use crate::catalog::store::{CatalogSource, StoreError};
use crate::normalization::sku::normalize_sku;
use crate::util::db::Db;

/// Postgres-backed catalog access. Reads feed the in-process snapshot;
/// writes go through here so hierarchy validation happens before any row
/// lands in the tables.
#[derive(Clone)]
pub struct PgCatalogStore {
    pub db: Db,
}

impl PgCatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

fn product_from_row(r: &sqlx::postgres::PgRow) -> Result<CatalogProduct, sqlx::Error> {
    Ok(CatalogProduct {
        sku: r.try_get("sku")?,
        master_sku: r.try_get("master_sku")?,
        name: r.try_get("name")?,
        category: r.try_get("category")?,
        is_active: r.try_get("is_active")?,
        units_per_display: r.try_get("units_per_display")?,
        displays_per_box: r.try_get("displays_per_box")?,
        boxes_per_pallet: r.try_get("boxes_per_pallet")?,
    })
}

fn rule_from_row(r: &sqlx::postgres::PgRow) -> Result<MappingRule, StoreError> {
    let pattern_type: String = r.try_get("pattern_type")?;
    let pattern_type = pattern_type
        .parse::<PatternType>()
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(MappingRule {
        id: r.try_get("id")?,
        source_pattern: r.try_get("source_pattern")?,
        pattern_type,
        target_sku: r.try_get("target_sku")?,
        quantity_multiplier: r.try_get("quantity_multiplier")?,
        confidence: r.try_get("confidence")?,
        priority: r.try_get("priority")?,
        is_active: r.try_get("is_active")?,
    })
}

const PRODUCT_COLS: &str =
    "sku, master_sku, name, category, is_active, units_per_display, displays_per_box, boxes_per_pallet";
const RULE_COLS: &str =
    "id, source_pattern, pattern_type, target_sku, quantity_multiplier, confidence, priority, is_active";

#[async_trait]
impl CatalogSource for PgCatalogStore {
    async fn get_product(&self, sku: &str) -> Result<Option<CatalogProduct>, StoreError> {
        let sku = normalize_sku(sku);
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLS} FROM catalog_products WHERE sku = $1 AND is_active"
        ))
        .bind(&sku)
        .fetch_optional(&self.db.pool)
        .await?;
        row.map(|r| product_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn get_product_by_master(
        &self,
        master_sku: &str,
    ) -> Result<Option<CatalogProduct>, StoreError> {
        let master = normalize_sku(master_sku);
        // Lowest SKU wins so resolution stays deterministic across restarts.
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLS} FROM catalog_products
             WHERE master_sku = $1 AND is_active
             ORDER BY sku ASC LIMIT 1"
        ))
        .bind(&master)
        .fetch_optional(&self.db.pool)
        .await?;
        row.map(|r| product_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn list_active_products(&self) -> Result<Vec<CatalogProduct>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLS} FROM catalog_products WHERE is_active ORDER BY sku ASC"
        ))
        .fetch_all(&self.db.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(product_from_row(r)?);
        }
        Ok(out)
    }

    async fn list_active_rules(&self) -> Result<Vec<MappingRule>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLS} FROM sku_mappings WHERE is_active
             ORDER BY priority ASC, confidence DESC, id ASC"
        ))
        .fetch_all(&self.db.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(rule_from_row(r)?);
        }
        Ok(out)
    }
}

impl PgCatalogStore {
    /// Insert or update a product. Packaging hierarchy is validated first so a
    /// coarse tier can never exist without the finer tiers beneath it.
    #[instrument(skip(self, product), fields(sku = %product.sku))]
    pub async fn upsert_product(&self, product: &CatalogProduct) -> Result<(), StoreError> {
        product
            .validate_hierarchy()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let sku = normalize_sku(&product.sku);
        let master = product.master_sku.as_deref().map(normalize_sku);
        sqlx::query(
            "INSERT INTO catalog_products
               (sku, master_sku, name, category, is_active,
                units_per_display, displays_per_box, boxes_per_pallet)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
             ON CONFLICT (sku) DO UPDATE SET
               master_sku = EXCLUDED.master_sku,
               name = EXCLUDED.name,
               category = EXCLUDED.category,
               is_active = EXCLUDED.is_active,
               units_per_display = EXCLUDED.units_per_display,
               displays_per_box = EXCLUDED.displays_per_box,
               boxes_per_pallet = EXCLUDED.boxes_per_pallet,
               updated_at = now()",
        )
        .bind(&sku)
        .bind(&master)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.is_active)
        .bind(product.units_per_display)
        .bind(product.displays_per_box)
        .bind(product.boxes_per_pallet)
        .execute(&self.db.pool)
        .await?;
        info!("product upserted");
        Ok(())
    }

    /// Soft delete: flips is_active so historical facts keep their reference.
    pub async fn deactivate_product(&self, sku: &str) -> Result<bool, StoreError> {
        let sku = normalize_sku(sku);
        let res = sqlx::query(
            "UPDATE catalog_products SET is_active = FALSE, updated_at = now() WHERE sku = $1",
        )
        .bind(&sku)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip(self, rule), fields(pattern = %rule.source_pattern))]
    pub async fn insert_rule(&self, rule: &MappingRule) -> Result<i64, StoreError> {
        let pattern = normalize_sku(&rule.source_pattern);
        let target = normalize_sku(&rule.target_sku);
        let row = sqlx::query(
            "INSERT INTO sku_mappings
               (source_pattern, pattern_type, target_sku,
                quantity_multiplier, confidence, priority, is_active)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             RETURNING id",
        )
        .bind(&pattern)
        .bind(rule.pattern_type.as_str())
        .bind(&target)
        .bind(rule.quantity_multiplier)
        .bind(rule.confidence)
        .bind(rule.priority)
        .bind(rule.is_active)
        .fetch_one(&self.db.pool)
        .await?;
        let id: i64 = row.try_get("id")?;
        info!(id, "rule inserted");
        Ok(id)
    }

    pub async fn update_rule(&self, rule: &MappingRule) -> Result<bool, StoreError> {
        let pattern = normalize_sku(&rule.source_pattern);
        let target = normalize_sku(&rule.target_sku);
        let res = sqlx::query(
            "UPDATE sku_mappings SET
               source_pattern = $2,
               pattern_type = $3,
               target_sku = $4,
               quantity_multiplier = $5,
               confidence = $6,
               priority = $7,
               is_active = $8,
               updated_at = now()
             WHERE id = $1",
        )
        .bind(rule.id)
        .bind(&pattern)
        .bind(rule.pattern_type.as_str())
        .bind(&target)
        .bind(rule.quantity_multiplier)
        .bind(rule.confidence)
        .bind(rule.priority)
        .bind(rule.is_active)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn deactivate_rule(&self, id: i64) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE sku_mappings SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
