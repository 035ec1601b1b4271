use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::catalog::model::{CatalogProduct, Channel, MappingRule, PatternType, RawOrderLine};
use crate::catalog::pg::PgCatalogStore;
use crate::catalog::store::CatalogSource;
use crate::facts;
use crate::util::db::Db;
use crate::util::env as env_util;

fn demo_products() -> Vec<CatalogProduct> {
    vec![
        CatalogProduct {
            sku: "BAR-CHIA-001".into(),
            master_sku: Some("BAR-CHIA".into()),
            name: "Barra de chia 30g".into(),
            category: Some("BARRAS".into()),
            is_active: true,
            units_per_display: Some(12),
            displays_per_box: Some(12),
            boxes_per_pallet: Some(20),
        },
        CatalogProduct {
            sku: "BAR-CHIA-001_EM".into(),
            master_sku: Some("BAR-CHIA".into()),
            name: "Barra de chia 30g (empaque mayorista)".into(),
            category: Some("BARRAS".into()),
            is_active: true,
            units_per_display: Some(12),
            displays_per_box: Some(12),
            boxes_per_pallet: Some(20),
        },
        CatalogProduct {
            sku: "GRA-QUIN-002".into(),
            master_sku: None,
            name: "Granola de quinoa 250g".into(),
            category: Some("GRANOLAS".into()),
            is_active: true,
            units_per_display: Some(6),
            displays_per_box: None,
            boxes_per_pallet: None,
        },
        CatalogProduct {
            sku: "PACK-SURTIDO-01".into(),
            master_sku: None,
            name: "Pack surtido barras".into(),
            category: Some("PACKS".into()),
            is_active: true,
            units_per_display: None,
            displays_per_box: None,
            boxes_per_pallet: None,
        },
    ]
}

fn demo_rules() -> Vec<MappingRule> {
    vec![
        MappingRule {
            id: 0,
            source_pattern: "PACKCRSURTIDO".into(),
            pattern_type: PatternType::Exact,
            target_sku: "PACK-SURTIDO-01".into(),
            quantity_multiplier: 1,
            confidence: 100,
            priority: 0,
            is_active: true,
        },
        MappingRule {
            id: 0,
            source_pattern: "ML-BAR-".into(),
            pattern_type: PatternType::Prefix,
            target_sku: "BAR-CHIA-001".into(),
            quantity_multiplier: 1,
            confidence: 80,
            priority: 10,
            is_active: true,
        },
        MappingRule {
            id: 0,
            source_pattern: "TRIPACK-CHIA".into(),
            pattern_type: PatternType::Exact,
            target_sku: "BAR-CHIA-001".into(),
            quantity_multiplier: 3,
            confidence: 100,
            priority: 0,
            is_active: true,
        },
    ]
}

fn demo_order_lines() -> Vec<RawOrderLine> {
    let d = |s: &str| s.parse::<NaiveDate>().unwrap_or_default();
    vec![
        RawOrderLine {
            external_sku: "BAR-CHIA-001".into(),
            quantity_sold: 24,
            unit_price_minor: 990,
            channel: Channel::Shopify,
            order_date: d("2026-07-03"),
        },
        RawOrderLine {
            external_sku: "packcrsurtido".into(),
            quantity_sold: 2,
            unit_price_minor: 5990,
            channel: Channel::Shopify,
            order_date: d("2026-07-04"),
        },
        RawOrderLine {
            external_sku: "MLC-BAR-CHIA-001_EM".into(),
            quantity_sold: 6,
            unit_price_minor: 1190,
            channel: Channel::MercadoLibre,
            order_date: d("2026-07-05"),
        },
        RawOrderLine {
            external_sku: "TRIPACK-CHIA".into(),
            quantity_sold: 10,
            unit_price_minor: 2790,
            channel: Channel::Relbase,
            order_date: d("2026-07-08"),
        },
        RawOrderLine {
            external_sku: "SKU-QUE-NADIE-CONOCE".into(),
            quantity_sold: 1,
            unit_price_minor: 100,
            channel: Channel::Other("feria".into()),
            order_date: d("2026-07-09"),
        },
    ]
}

/// Idempotent demo data loader. Products and rules upsert; order lines are
/// only inserted when the table is empty so repeated runs never duplicate
/// facts. `dry_run` prints the plan and writes nothing.
pub async fn run(database_url: Option<String>, dry_run: bool) -> Result<()> {
    env_util::init_env();
    let products = demo_products();
    let rules = demo_rules();
    let lines = demo_order_lines();

    if dry_run {
        println!(
            "dry-run: would upsert {} products, ensure {} rules, insert {} order lines (if table empty)",
            products.len(),
            rules.len(),
            lines.len()
        );
        for p in &products {
            println!("  product {} [{}]", p.sku, p.category.as_deref().unwrap_or("-"));
        }
        for r in &rules {
            println!(
                "  rule {} ({:?}) -> {} x{}",
                r.source_pattern, r.pattern_type, r.target_sku, r.quantity_multiplier
            );
        }
        return Ok(());
    }

    let db_url = match database_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect(&db_url, 5).await?;
    let store = PgCatalogStore::new(db.clone());

    for p in &products {
        store.upsert_product(p).await?;
    }

    // Rules have no natural key column, so idempotency is by (pattern, target).
    let existing = store.list_active_rules().await?;
    let mut inserted_rules = 0;
    for r in &rules {
        let already = existing.iter().any(|e| {
            e.source_pattern == r.source_pattern
                && e.target_sku == r.target_sku
                && e.pattern_type == r.pattern_type
        });
        if !already {
            store.insert_rule(r).await?;
            inserted_rules += 1;
        }
    }

    let line_count = facts::pg::count_raw_order_lines(&db).await?;
    let inserted_lines = if line_count == 0 {
        facts::pg::insert_raw_order_lines(&db, &lines).await?
    } else {
        0
    };

    info!(
        products = products.len(),
        rules_inserted = inserted_rules,
        lines_inserted = inserted_lines,
        "demo seed complete"
    );
    println!(
        "seeded: {} products upserted, {} rules inserted, {} order lines inserted",
        products.len(),
        inserted_rules,
        inserted_lines
    );
    Ok(())
}
