use anyhow::Result;

use crate::catalog::pg::PgCatalogStore;
use crate::catalog::store::CatalogSnapshot;
use crate::resolution::resolver::Resolver;
use crate::util::db::Db;
use crate::util::env as env_util;

/// Run one external SKU through the full cascade against the live catalog and
/// print every rule that matched plus near-miss suggestions. Admin tool for
/// answering "why did this line resolve the way it did".
pub async fn run(database_url: Option<String>, external_sku: &str) -> Result<()> {
    env_util::init_env();
    let db_url = match database_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect_no_migrate(&db_url, 2).await?;
    let source = PgCatalogStore::new(db);
    let snapshot = CatalogSnapshot::load(&source).await?;
    let resolver = Resolver::new(&snapshot);

    let report = resolver.explain(external_sku)?;
    println!("input:       {external_sku}");
    println!("normalized:  {}", report.normalized_sku);
    println!(
        "resolution:  {} (confidence {}, multiplier {})",
        report.resolution.match_type, report.resolution.confidence, report.resolution.quantity_multiplier
    );
    match &report.resolution.catalog_sku {
        Some(sku) => println!(
            "catalog sku: {sku} [{}]",
            report.resolution.category.as_deref().unwrap_or("-")
        ),
        None => println!("catalog sku: (unmapped)"),
    }

    if report.matched_rules.is_empty() {
        println!("matched rules: none");
    } else {
        println!("matched rules:");
        for m in &report.matched_rules {
            let marker = if m.selected { "*" } else { " " };
            println!(
                " {marker} #{} {} {:?} -> {} (prio {}, conf {}, x{})",
                m.rule_id,
                m.source_pattern,
                m.pattern_type,
                m.target_sku,
                m.priority,
                m.confidence,
                m.quantity_multiplier
            );
        }
    }

    if !report.suggestions.is_empty() {
        println!("suggestions (near misses):");
        for s in &report.suggestions {
            println!(
                "   #{} {} -> {} (similarity {:.3})",
                s.rule_id, s.source_pattern, s.target_sku, s.similarity
            );
        }
    }

    Ok(())
}
