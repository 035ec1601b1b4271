pub mod sku;

pub use sku::{derived_candidates, normalize_sku};
