//! Read-only access to the upstream demand signals.
//!
//! The orchestrator treats every source behind [`DemandFeeds`] as
//! possibly slow or unavailable; each read carries a [`ReadContext`].

mod context;
pub mod dataset;
pub mod in_memory;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgecast_core::Sku;
use forgecast_engine::{
    ConfirmedOrderLine, InventorySnapshot, PipelineDemandLine, SalesHistoryPoint, SupplyParameters,
};

pub use context::{CancellationFlag, FeedKind, ReadContext};
pub use dataset::{DatasetError, FeedDataset};
pub use in_memory::{FeedFault, InMemoryFeeds};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("{feed} feed unavailable: {message}")]
    Unavailable { feed: FeedKind, message: String },

    #[error("{feed} feed read exceeded its deadline")]
    DeadlineExceeded { feed: FeedKind },

    #[error("feed read cancelled")]
    Cancelled,

    #[error("{feed} feed returned malformed data: {message}")]
    Malformed { feed: FeedKind, message: String },
}

impl FeedError {
    pub fn unavailable(feed: FeedKind, message: impl Into<String>) -> Self {
        Self::Unavailable {
            feed,
            message: message.into(),
        }
    }

    pub fn malformed(feed: FeedKind, message: impl Into<String>) -> Self {
        Self::Malformed {
            feed,
            message: message.into(),
        }
    }

    /// Whether the error ends the whole run rather than a single SKU.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, FeedError::Unavailable { .. } | FeedError::Cancelled)
    }
}

/// A SKU the catalog asks us to forecast, with its supply terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSku {
    pub sku: Sku,
    #[serde(default)]
    pub supply: SupplyParameters,
}

impl TrackedSku {
    pub fn new(sku: impl Into<Sku>, supply: SupplyParameters) -> Self {
        Self {
            sku: sku.into(),
            supply,
        }
    }
}

/// Upstream signal sources.
///
/// Implementations must return data for the requested SKU only and honour
/// the context's deadline and cancel flag.
pub trait DemandFeeds: Send + Sync {
    fn tracked_skus(&self, ctx: &ReadContext) -> Result<Vec<TrackedSku>, FeedError>;

    /// Daily sales with `from <= date <= to`.
    fn sales_history(
        &self,
        sku: &Sku,
        from: NaiveDate,
        to: NaiveDate,
        ctx: &ReadContext,
    ) -> Result<Vec<SalesHistoryPoint>, FeedError>;

    fn pipeline(&self, sku: &Sku, ctx: &ReadContext) -> Result<Vec<PipelineDemandLine>, FeedError>;

    fn confirmed_orders(
        &self,
        sku: &Sku,
        ctx: &ReadContext,
    ) -> Result<Vec<ConfirmedOrderLine>, FeedError>;

    /// `None` when the inventory system has no record for the SKU.
    fn inventory(&self, sku: &Sku, ctx: &ReadContext) -> Result<Option<InventorySnapshot>, FeedError>;
}

impl<T: DemandFeeds + ?Sized> DemandFeeds for std::sync::Arc<T> {
    fn tracked_skus(&self, ctx: &ReadContext) -> Result<Vec<TrackedSku>, FeedError> {
        (**self).tracked_skus(ctx)
    }

    fn sales_history(
        &self,
        sku: &Sku,
        from: NaiveDate,
        to: NaiveDate,
        ctx: &ReadContext,
    ) -> Result<Vec<SalesHistoryPoint>, FeedError> {
        (**self).sales_history(sku, from, to, ctx)
    }

    fn pipeline(&self, sku: &Sku, ctx: &ReadContext) -> Result<Vec<PipelineDemandLine>, FeedError> {
        (**self).pipeline(sku, ctx)
    }

    fn confirmed_orders(
        &self,
        sku: &Sku,
        ctx: &ReadContext,
    ) -> Result<Vec<ConfirmedOrderLine>, FeedError> {
        (**self).confirmed_orders(sku, ctx)
    }

    fn inventory(&self, sku: &Sku, ctx: &ReadContext) -> Result<Option<InventorySnapshot>, FeedError> {
        (**self).inventory(sku, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_and_cancelled_end_the_run() {
        assert!(FeedError::unavailable(FeedKind::Pipeline, "down").is_run_fatal());
        assert!(FeedError::Cancelled.is_run_fatal());
        assert!(!FeedError::DeadlineExceeded { feed: FeedKind::Inventory }.is_run_fatal());
        assert!(!FeedError::malformed(FeedKind::SalesHistory, "bad row").is_run_fatal());
    }
}
