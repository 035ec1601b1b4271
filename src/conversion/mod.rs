pub mod converter;

pub use converter::{
    ConversionError, Converter, OrderItem, PackagingUnit, StockCheck, UnitBreakdown,
};
