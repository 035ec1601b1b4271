//! Packaging-unit conversion.
//!
//! Every conversion is routed through the canonical unit count, which is
//! always an exact `i64` computed by integer multiplication. The only place a
//! fractional number appears is the display-tier quotient handed back to the
//! caller, and that is derived from integer div/rem, never from floating-point
//! division of the unit count.
//!
//! A missing factor for a requested tier is a hard [`ConversionError::Undefined`].
//! It is never defaulted to 1: a product missing its per-box multiplier being
//! silently treated as 1 unit/box is the bug class that once inflated unit
//! counts by two orders of magnitude, and it must fail loudly instead.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::catalog::model::{CatalogProduct, ChannelKind};
use crate::catalog::store::CatalogSnapshot;
use crate::normalization::normalize_sku;

/// The recognized packaging tiers, finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagingUnit {
    Unit,
    Display,
    Box,
    Pallet,
}

impl PackagingUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            PackagingUnit::Unit => "unit",
            PackagingUnit::Display => "display",
            PackagingUnit::Box => "box",
            PackagingUnit::Pallet => "pallet",
        }
    }

    /// Parse a unit name; unrecognized names are an [`ConversionError::InvalidUnit`].
    pub fn parse(name: &str) -> Result<Self, ConversionError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unit" | "units" => Ok(PackagingUnit::Unit),
            "display" | "displays" => Ok(PackagingUnit::Display),
            "box" | "boxes" => Ok(PackagingUnit::Box),
            "pallet" | "pallets" => Ok(PackagingUnit::Pallet),
            other => Err(ConversionError::InvalidUnit {
                name: other.to_string(),
            }),
        }
    }
}

impl std::str::FromStr for PackagingUnit {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PackagingUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unknown product: {sku}")]
    ProductNotFound { sku: String },
    /// The requested tier has no configured factor for this SKU. Deliberate
    /// hard error; never an implicit 1:1.
    #[error("conversion to/from {unit} is undefined for {sku}: packaging factor not configured")]
    Undefined { sku: String, unit: PackagingUnit },
    #[error("invalid quantity {value}: must be non-negative")]
    InvalidQuantity { value: i64 },
    #[error("unrecognized packaging unit: {name}")]
    InvalidUnit { name: String },
    #[error("quantity overflow converting {sku}")]
    Overflow { sku: String },
}

/// Convenience summary of a unit total expressed at every configured tier.
/// Unconfigured tiers are `None` (undefined, not zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitBreakdown {
    pub units: i64,
    pub displays: Option<f64>,
    pub boxes: Option<f64>,
    pub pallets: Option<f64>,
}

/// One line of a B2B order for bulk conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub sku: String,
    pub quantity: i64,
    pub unit: PackagingUnit,
}

/// Per-SKU stock verdict for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCheck {
    pub requested_units: i64,
    pub available_units: i64,
    pub sufficient: bool,
    pub shortage_units: i64,
}

/// Unit conversion over one immutable catalog snapshot.
pub struct Converter<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> Converter<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    fn product(&self, sku: &str) -> Result<&CatalogProduct, ConversionError> {
        let key = normalize_sku(sku);
        self.snapshot
            .product(&key)
            .or_else(|| self.snapshot.product_by_master(&key))
            .ok_or(ConversionError::ProductNotFound { sku: key })
    }

    /// Units in one `unit` of the given tier for this product. Every factor in
    /// the chain must be configured, otherwise the tier is undefined.
    fn factor_to_units(
        product: &CatalogProduct,
        unit: PackagingUnit,
    ) -> Result<i64, ConversionError> {
        let undefined = |unit| ConversionError::Undefined {
            sku: product.sku.clone(),
            unit,
        };
        match unit {
            PackagingUnit::Unit => Ok(1),
            PackagingUnit::Display => {
                product.units_per_display.ok_or_else(|| undefined(unit))
            }
            PackagingUnit::Box => {
                let upd = product.units_per_display.ok_or_else(|| undefined(unit))?;
                let dpb = product.displays_per_box.ok_or_else(|| undefined(unit))?;
                upd.checked_mul(dpb).ok_or(ConversionError::Overflow {
                    sku: product.sku.clone(),
                })
            }
            PackagingUnit::Pallet => {
                let upd = product.units_per_display.ok_or_else(|| undefined(unit))?;
                let dpb = product.displays_per_box.ok_or_else(|| undefined(unit))?;
                let bpp = product.boxes_per_pallet.ok_or_else(|| undefined(unit))?;
                upd.checked_mul(dpb)
                    .and_then(|units_per_box| units_per_box.checked_mul(bpp))
                    .ok_or(ConversionError::Overflow {
                        sku: product.sku.clone(),
                    })
            }
        }
    }

    /// Exact canonical unit count for a quantity expressed in `from`.
    pub fn to_units(
        &self,
        sku: &str,
        quantity: i64,
        from: PackagingUnit,
    ) -> Result<i64, ConversionError> {
        if quantity < 0 {
            return Err(ConversionError::InvalidQuantity { value: quantity });
        }
        let product = self.product(sku)?;
        let factor = Self::factor_to_units(product, from)?;
        quantity
            .checked_mul(factor)
            .ok_or(ConversionError::Overflow {
                sku: product.sku.clone(),
            })
    }

    /// Convert between tiers. The result is fractional only because coarser
    /// tiers may not divide evenly; it is computed as whole + rem/factor from
    /// integer arithmetic.
    pub fn convert(
        &self,
        sku: &str,
        quantity: i64,
        from: PackagingUnit,
        to: PackagingUnit,
    ) -> Result<f64, ConversionError> {
        let units = self.to_units(sku, quantity, from)?;
        let product = self.product(sku)?;
        let factor = Self::factor_to_units(product, to)?;
        Ok(exact_tier_quotient(units, factor))
    }

    /// Per-tier summary of a unit total. Tiers without configured factors come
    /// back as `None`.
    pub fn unit_breakdown(&self, sku: &str, units: i64) -> Result<UnitBreakdown, ConversionError> {
        if units < 0 {
            return Err(ConversionError::InvalidQuantity { value: units });
        }
        let product = self.product(sku)?;
        let tier = |unit| match Self::factor_to_units(product, unit) {
            Ok(factor) => Some(exact_tier_quotient(units, factor)),
            Err(_) => None,
        };
        Ok(UnitBreakdown {
            units,
            displays: tier(PackagingUnit::Display),
            boxes: tier(PackagingUnit::Box),
            pallets: tier(PackagingUnit::Pallet),
        })
    }

    /// Human display string in the channel's preferred tier.
    pub fn format_for_channel(
        &self,
        sku: &str,
        units_total: i64,
        kind: ChannelKind,
    ) -> Result<String, ConversionError> {
        if units_total < 0 {
            return Err(ConversionError::InvalidQuantity { value: units_total });
        }
        match kind {
            ChannelKind::B2c | ChannelKind::Marketplace => {
                // Validate the SKU even though no factor is needed.
                self.product(sku)?;
                Ok(format!("{units_total} unidades"))
            }
            ChannelKind::Retail => {
                let product = self.product(sku)?;
                let per_box = Self::factor_to_units(product, PackagingUnit::Box)?;
                Ok(format!(
                    "{} cajas",
                    format_tier_quantity(units_total, per_box)
                ))
            }
            ChannelKind::Direct => {
                let product = self.product(sku)?;
                let per_box = Self::factor_to_units(product, PackagingUnit::Box)?;
                let boxes = units_total / per_box;
                let remainder = units_total % per_box;
                if remainder == 0 {
                    Ok(format!("{boxes} cajas"))
                } else {
                    Ok(format!("{boxes} cajas + {remainder} unidades"))
                }
            }
        }
    }

    /// Total canonical units per SKU across one order's heterogeneous-unit
    /// lines. Output order follows first appearance of each SKU.
    pub fn order_total_units(
        &self,
        items: &[OrderItem],
    ) -> Result<IndexMap<String, i64>, ConversionError> {
        let mut totals: IndexMap<String, i64> = IndexMap::new();
        for item in items {
            let units = self.to_units(&item.sku, item.quantity, item.unit)?;
            let key = normalize_sku(&item.sku);
            let entry = totals.entry(key).or_insert(0);
            *entry = entry.checked_add(units).ok_or(ConversionError::Overflow {
                sku: normalize_sku(&item.sku),
            })?;
        }
        Ok(totals)
    }

    /// Check an order against current stock (canonical units per SKU).
    pub fn check_stock(
        &self,
        items: &[OrderItem],
        current_stock: &HashMap<String, i64>,
    ) -> Result<IndexMap<String, StockCheck>, ConversionError> {
        let requested = self.order_total_units(items)?;
        let mut out: IndexMap<String, StockCheck> = IndexMap::with_capacity(requested.len());
        for (sku, requested_units) in requested {
            let available_units = current_stock.get(&sku).copied().unwrap_or(0);
            let sufficient = available_units >= requested_units;
            out.insert(
                sku,
                StockCheck {
                    requested_units,
                    available_units,
                    sufficient,
                    shortage_units: if sufficient {
                        0
                    } else {
                        requested_units - available_units
                    },
                },
            );
        }
        Ok(out)
    }
}

/// `units / factor` as whole + rem/factor, avoiding float division of the raw
/// unit count (`factor` is a validated positive integer).
fn exact_tier_quotient(units: i64, factor: i64) -> f64 {
    let whole = units / factor;
    let rem = units % factor;
    whole as f64 + rem as f64 / factor as f64
}

/// Render a tier quantity trimming a trailing ".0" ("2.5" but "5", not "5.0").
fn format_tier_quantity(units: i64, factor: i64) -> String {
    let whole = units / factor;
    let rem = units % factor;
    if rem == 0 {
        format!("{whole}")
    } else {
        format!("{:.2}", exact_tier_quotient(units, factor))
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::CatalogProduct;

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::from_parts(
            vec![
                CatalogProduct {
                    sku: "BAR-CHIA-001".into(),
                    master_sku: Some("MB-CHIA".into()),
                    name: "Barra chia".into(),
                    category: Some("BARRAS".into()),
                    is_active: true,
                    units_per_display: Some(12),
                    displays_per_box: Some(12),
                    boxes_per_pallet: Some(20),
                },
                CatalogProduct {
                    sku: "GRA-COCO-500".into(),
                    master_sku: None,
                    name: "Granola coco 500g".into(),
                    category: Some("GRANOLAS".into()),
                    is_active: true,
                    units_per_display: Some(6),
                    displays_per_box: None,
                    boxes_per_pallet: None,
                },
            ],
            vec![],
        )
    }

    #[test]
    fn boxes_to_units_concrete_scenario() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        // 12 units/display * 12 displays/box = 144 units/box; 5 boxes = 720.
        assert_eq!(
            conv.convert("BAR-CHIA-001", 5, PackagingUnit::Box, PackagingUnit::Unit)
                .unwrap(),
            720.0
        );
        assert_eq!(
            conv.convert("BAR-CHIA-001", 720, PackagingUnit::Unit, PackagingUnit::Box)
                .unwrap(),
            5.0
        );
    }

    #[test]
    fn round_trip_is_lossless_for_integer_quantities() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        for unit in [
            PackagingUnit::Unit,
            PackagingUnit::Display,
            PackagingUnit::Box,
            PackagingUnit::Pallet,
        ] {
            for quantity in [0i64, 1, 3, 17, 250] {
                let units = conv.to_units("BAR-CHIA-001", quantity, unit).unwrap();
                let back = conv
                    .convert("BAR-CHIA-001", units, PackagingUnit::Unit, unit)
                    .unwrap();
                assert_eq!(back, quantity as f64, "unit={unit} quantity={quantity}");
            }
        }
    }

    #[test]
    fn fractional_box_count_is_exact() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        // 360 units / 144 per box = 2.5 boxes.
        assert_eq!(
            conv.convert("BAR-CHIA-001", 360, PackagingUnit::Unit, PackagingUnit::Box)
                .unwrap(),
            2.5
        );
    }

    #[test]
    fn missing_factor_is_rejected_never_defaulted() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        // GRA-COCO-500 has no displays_per_box: box conversions must fail.
        let err = conv
            .convert("GRA-COCO-500", 5, PackagingUnit::Box, PackagingUnit::Unit)
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::Undefined {
                sku: "GRA-COCO-500".into(),
                unit: PackagingUnit::Box,
            }
        );
        let err = conv
            .convert("GRA-COCO-500", 30, PackagingUnit::Unit, PackagingUnit::Box)
            .unwrap_err();
        assert!(matches!(err, ConversionError::Undefined { .. }));
        // Display tier IS configured and keeps working.
        assert_eq!(
            conv.convert("GRA-COCO-500", 4, PackagingUnit::Display, PackagingUnit::Unit)
                .unwrap(),
            24.0
        );
    }

    #[test]
    fn unknown_sku_and_bad_inputs() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        assert!(matches!(
            conv.to_units("NOPE", 1, PackagingUnit::Unit),
            Err(ConversionError::ProductNotFound { .. })
        ));
        assert_eq!(
            conv.to_units("BAR-CHIA-001", -3, PackagingUnit::Unit),
            Err(ConversionError::InvalidQuantity { value: -3 })
        );
        assert!(matches!(
            PackagingUnit::parse("crate"),
            Err(ConversionError::InvalidUnit { .. })
        ));
    }

    #[test]
    fn master_sku_uses_representative_factors() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        assert_eq!(
            conv.to_units("MB-CHIA", 1, PackagingUnit::Box).unwrap(),
            144
        );
    }

    #[test]
    fn channel_formatting() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        assert_eq!(
            conv.format_for_channel("BAR-CHIA-001", 720, ChannelKind::B2c)
                .unwrap(),
            "720 unidades"
        );
        assert_eq!(
            conv.format_for_channel("BAR-CHIA-001", 720, ChannelKind::Marketplace)
                .unwrap(),
            "720 unidades"
        );
        assert_eq!(
            conv.format_for_channel("BAR-CHIA-001", 360, ChannelKind::Retail)
                .unwrap(),
            "2.5 cajas"
        );
        assert_eq!(
            conv.format_for_channel("BAR-CHIA-001", 720, ChannelKind::Retail)
                .unwrap(),
            "5 cajas"
        );
        assert_eq!(
            conv.format_for_channel("BAR-CHIA-001", 300, ChannelKind::Direct)
                .unwrap(),
            "2 cajas + 12 unidades"
        );
        assert_eq!(
            conv.format_for_channel("BAR-CHIA-001", 288, ChannelKind::Direct)
                .unwrap(),
            "2 cajas"
        );
        // Retail formatting needs the box factor; missing factor still fails.
        assert!(matches!(
            conv.format_for_channel("GRA-COCO-500", 10, ChannelKind::Retail),
            Err(ConversionError::Undefined { .. })
        ));
    }

    #[test]
    fn order_totals_across_mixed_units() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        let items = vec![
            OrderItem {
                sku: "BAR-CHIA-001".into(),
                quantity: 2,
                unit: PackagingUnit::Box,
            },
            OrderItem {
                sku: "bar-chia-001".into(),
                quantity: 3,
                unit: PackagingUnit::Display,
            },
            OrderItem {
                sku: "GRA-COCO-500".into(),
                quantity: 10,
                unit: PackagingUnit::Unit,
            },
        ];
        let totals = conv.order_total_units(&items).unwrap();
        assert_eq!(totals["BAR-CHIA-001"], 2 * 144 + 3 * 12);
        assert_eq!(totals["GRA-COCO-500"], 10);
    }

    #[test]
    fn stock_check_reports_shortage() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        let items = vec![OrderItem {
            sku: "BAR-CHIA-001".into(),
            quantity: 5,
            unit: PackagingUnit::Box,
        }];
        let mut stock = HashMap::new();
        stock.insert("BAR-CHIA-001".to_string(), 700i64);
        let checks = conv.check_stock(&items, &stock).unwrap();
        let check = &checks["BAR-CHIA-001"];
        assert_eq!(check.requested_units, 720);
        assert_eq!(check.available_units, 700);
        assert!(!check.sufficient);
        assert_eq!(check.shortage_units, 20);
    }

    #[test]
    fn breakdown_reports_unconfigured_tiers_as_none() {
        let snap = catalog();
        let conv = Converter::new(&snap);
        let b = conv.unit_breakdown("BAR-CHIA-001", 2880).unwrap();
        assert_eq!(b.displays, Some(240.0));
        assert_eq!(b.boxes, Some(20.0));
        assert_eq!(b.pallets, Some(1.0));

        let b = conv.unit_breakdown("GRA-COCO-500", 30).unwrap();
        assert_eq!(b.displays, Some(5.0));
        assert_eq!(b.boxes, None);
        assert_eq!(b.pallets, None);
    }
}
