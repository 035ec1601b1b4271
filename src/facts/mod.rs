pub mod aggregator;
pub mod pg;
pub mod snapshot;

pub use aggregator::{
    CancelToken, FactAggregator, LineWarning, RefreshError, RefreshState, RefreshSummary,
};
pub use snapshot::{FactSnapshot, FactStore, GroupBy, GroupTotal, ResolvedSalesFact};
