//! Catalog data access.
//!
//! The resolver, converter and aggregator never talk to a database. They are
//! handed either a [`CatalogSource`] (the injected data-access dependency) or,
//! for the hot path, an immutable [`CatalogSnapshot`] built from one. Tests
//! run against [`InMemoryCatalog`] with no infrastructure at all.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

use crate::catalog::model::{CatalogProduct, MappingRule};
use crate::normalization::normalize_sku;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (connection, query). Absence of a row is NOT an error;
    /// lookups return `Ok(None)`.
    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// Read contract over the canonical catalog and the mapping-rule table.
///
/// All lookups take/return canonical (normalized) SKUs. `Ok(None)` is the
/// normal not-found outcome; callers branch on it.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn get_product(&self, sku: &str) -> Result<Option<CatalogProduct>, StoreError>;

    /// Resolve a master-box grouping SKU to the representative product whose
    /// packaging factors apply.
    async fn get_product_by_master(
        &self,
        master_sku: &str,
    ) -> Result<Option<CatalogProduct>, StoreError>;

    async fn list_active_products(&self) -> Result<Vec<CatalogProduct>, StoreError>;

    /// Active rules in precedence order: (priority asc, confidence desc, id asc).
    async fn list_active_rules(&self) -> Result<Vec<MappingRule>, StoreError>;
}

/// Immutable point-in-time image of the catalog state, with SKU and master-SKU
/// indexes and rules pre-sorted by precedence.
///
/// Resolution is a pure function of (input, snapshot): one snapshot is built
/// per refresh pass so every line of the pass sees the same catalog.
#[derive(Debug, Default, Clone)]
pub struct CatalogSnapshot {
    products: IndexMap<String, CatalogProduct>,
    /// master SKU -> representative product SKU (first active product by SKU
    /// order carrying that master, so the choice is deterministic).
    by_master: IndexMap<String, String>,
    rules: Vec<MappingRule>,
}

impl CatalogSnapshot {
    /// Build from already-loaded rows. Inactive products/rules are filtered,
    /// keys are normalized, rules are precedence-sorted.
    pub fn from_parts(products: Vec<CatalogProduct>, rules: Vec<MappingRule>) -> Self {
        let mut active: Vec<CatalogProduct> = products.into_iter().filter(|p| p.is_active).collect();
        active.sort_by(|a, b| a.sku.cmp(&b.sku));

        let mut index: IndexMap<String, CatalogProduct> = IndexMap::with_capacity(active.len());
        let mut by_master: IndexMap<String, String> = IndexMap::new();
        for product in active {
            let key = normalize_sku(&product.sku);
            if let Some(master) = &product.master_sku {
                let master_key = normalize_sku(master);
                by_master.entry(master_key).or_insert_with(|| key.clone());
            }
            index.entry(key).or_insert(product);
        }

        let mut active_rules: Vec<MappingRule> = rules
            .into_iter()
            .filter(|r| r.is_active)
            .map(|mut r| {
                r.source_pattern = normalize_sku(&r.source_pattern);
                r.target_sku = normalize_sku(&r.target_sku);
                r
            })
            .collect();
        active_rules.sort_by_key(|r| r.precedence_key());

        Self {
            products: index,
            by_master,
            rules: active_rules,
        }
    }

    /// Load everything through a [`CatalogSource`].
    pub async fn load(source: &dyn CatalogSource) -> Result<Self, StoreError> {
        let products = source.list_active_products().await?;
        let rules = source.list_active_rules().await?;
        Ok(Self::from_parts(products, rules))
    }

    /// Lookup by canonical SKU. `sku` must already be normalized.
    pub fn product(&self, sku: &str) -> Option<&CatalogProduct> {
        self.products.get(sku)
    }

    /// Lookup by master grouping SKU; returns the representative product.
    pub fn product_by_master(&self, master_sku: &str) -> Option<&CatalogProduct> {
        self.by_master
            .get(master_sku)
            .and_then(|sku| self.products.get(sku))
    }

    /// Active rules in precedence order.
    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Shared, reloadable snapshot handle: readers grab an `Arc` and never block
/// on a reload. Same swap-on-completion shape as the fact store.
#[derive(Clone, Default)]
pub struct CatalogCache {
    current: Arc<RwLock<Arc<CatalogSnapshot>>>,
}

impl CatalogCache {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub fn current(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn swap(&self, snapshot: CatalogSnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }

    /// Rebuild from the source and publish atomically.
    pub async fn reload(&self, source: &dyn CatalogSource) -> Result<(), StoreError> {
        let snapshot = CatalogSnapshot::load(source).await?;
        self.swap(snapshot);
        Ok(())
    }
}

/// In-memory [`CatalogSource`] used by tests and the demo seeder.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<Vec<CatalogProduct>>,
    rules: Mutex<Vec<MappingRule>>,
}

impl InMemoryCatalog {
    pub fn new(products: Vec<CatalogProduct>, rules: Vec<MappingRule>) -> Self {
        Self {
            products: Mutex::new(products),
            rules: Mutex::new(rules),
        }
    }

    pub fn push_product(&self, product: CatalogProduct) {
        self.products.lock().expect("catalog lock").push(product);
    }

    pub fn push_rule(&self, rule: MappingRule) {
        self.rules.lock().expect("catalog lock").push(rule);
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn get_product(&self, sku: &str) -> Result<Option<CatalogProduct>, StoreError> {
        let key = normalize_sku(sku);
        Ok(self
            .products
            .lock()
            .expect("catalog lock")
            .iter()
            .find(|p| p.is_active && normalize_sku(&p.sku) == key)
            .cloned())
    }

    async fn get_product_by_master(
        &self,
        master_sku: &str,
    ) -> Result<Option<CatalogProduct>, StoreError> {
        let key = normalize_sku(master_sku);
        let guard = self.products.lock().expect("catalog lock");
        let mut matches: Vec<&CatalogProduct> = guard
            .iter()
            .filter(|p| {
                p.is_active
                    && p.master_sku
                        .as_deref()
                        .map(|m| normalize_sku(m) == key)
                        .unwrap_or(false)
            })
            .collect();
        matches.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(matches.first().map(|p| (*p).clone()))
    }

    async fn list_active_products(&self) -> Result<Vec<CatalogProduct>, StoreError> {
        Ok(self
            .products
            .lock()
            .expect("catalog lock")
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn list_active_rules(&self) -> Result<Vec<MappingRule>, StoreError> {
        let mut rules: Vec<MappingRule> = self
            .rules
            .lock()
            .expect("catalog lock")
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.precedence_key());
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::PatternType;

    fn product(sku: &str, master: Option<&str>) -> CatalogProduct {
        CatalogProduct {
            sku: sku.into(),
            master_sku: master.map(Into::into),
            name: sku.into(),
            category: Some("BARRAS".into()),
            is_active: true,
            units_per_display: Some(12),
            displays_per_box: Some(12),
            boxes_per_pallet: None,
        }
    }

    fn rule(id: i64, priority: i32, confidence: i16) -> MappingRule {
        MappingRule {
            id,
            source_pattern: format!("PAT-{id}"),
            pattern_type: PatternType::Exact,
            target_sku: "SKU-A".into(),
            quantity_multiplier: 1,
            confidence,
            priority,
            is_active: true,
        }
    }

    #[test]
    fn snapshot_sorts_rules_by_precedence() {
        let rules = vec![rule(3, 10, 90), rule(1, 10, 95), rule(2, 5, 50), rule(4, 10, 95)];
        let snap = CatalogSnapshot::from_parts(vec![product("SKU-A", None)], rules);
        let ids: Vec<i64> = snap.rules().iter().map(|r| r.id).collect();
        // priority 5 first; within priority 10, confidence 95 before 90, id asc.
        assert_eq!(ids, vec![2, 1, 4, 3]);
    }

    #[test]
    fn snapshot_master_index_is_deterministic() {
        let products = vec![
            product("SKU-B", Some("MASTER-1")),
            product("SKU-A", Some("MASTER-1")),
        ];
        let snap = CatalogSnapshot::from_parts(products, vec![]);
        assert_eq!(snap.product_by_master("MASTER-1").unwrap().sku, "SKU-A");
    }

    #[test]
    fn snapshot_filters_inactive() {
        let mut inactive = product("SKU-GONE", None);
        inactive.is_active = false;
        let mut dead_rule = rule(9, 0, 100);
        dead_rule.is_active = false;
        let snap =
            CatalogSnapshot::from_parts(vec![product("SKU-A", None), inactive], vec![dead_rule]);
        assert_eq!(snap.product_count(), 1);
        assert!(snap.product("SKU-GONE").is_none());
        assert!(snap.rules().is_empty());
    }

    #[tokio::test]
    async fn in_memory_source_round_trip() {
        let catalog = InMemoryCatalog::default();
        catalog.push_product(product("BAR-CHIA-001", Some("MB-BARRAS")));
        catalog.push_rule(rule(1, 0, 100));

        let found = catalog.get_product("bar-chia-001").await.unwrap();
        assert_eq!(found.unwrap().sku, "BAR-CHIA-001");

        let by_master = catalog.get_product_by_master("mb-barras").await.unwrap();
        assert_eq!(by_master.unwrap().sku, "BAR-CHIA-001");

        assert!(catalog.get_product("NOPE").await.unwrap().is_none());
    }
}
