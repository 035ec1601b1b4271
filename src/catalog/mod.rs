pub mod model;
pub mod pg;
pub mod store;

pub use model::{
    CatalogProduct, Channel, ChannelKind, HierarchyError, MappingRule, PatternType, RawOrderLine,
};
pub use pg::PgCatalogStore;
pub use store::{CatalogCache, CatalogSnapshot, CatalogSource, InMemoryCatalog, StoreError};
