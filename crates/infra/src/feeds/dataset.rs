//! JSON snapshot of every feed, used by the worker binary and local runs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgecast_core::Sku;
use forgecast_engine::{
    ConfirmedOrderLine, InventorySnapshot, PipelineDemandLine, SalesHistoryPoint, StageWeight,
};

use super::in_memory::InMemoryFeeds;
use super::TrackedSku;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse dataset: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inventory row as exported by the stock system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevels {
    pub sku: Sku,
    pub on_hand: i64,
    #[serde(default)]
    pub reserved: i64,
    /// Taken as-is when exported; otherwise `on_hand - reserved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<i64>,
    #[serde(default)]
    pub on_order: i64,
}

impl InventoryLevels {
    pub fn snapshot(self) -> InventorySnapshot {
        let mut snapshot =
            InventorySnapshot::from_levels(self.sku, self.on_hand, self.reserved, self.on_order);
        if let Some(available) = self.available {
            snapshot.available = available;
        }
        snapshot
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedDataset {
    pub tracked_skus: Vec<TrackedSku>,
    pub sales_history: Vec<SalesHistoryPoint>,
    pub pipeline: Vec<PipelineDemandLine>,
    pub confirmed_orders: Vec<ConfirmedOrderLine>,
    pub inventory: Vec<InventoryLevels>,
    pub stage_weights: Vec<StageWeight>,
}

impl FeedDataset {
    pub fn from_json_str(json: &str) -> Result<Self, DatasetError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Load the feeds; stage weights are returned for seeding the weight store.
    pub fn into_feeds(self) -> (InMemoryFeeds, Vec<StageWeight>) {
        let feeds = InMemoryFeeds::new();
        for tracked in self.tracked_skus {
            feeds.track(tracked.sku, tracked.supply);
        }
        feeds.add_sales(self.sales_history);
        feeds.add_pipeline(self.pipeline);
        feeds.add_orders(self.confirmed_orders);
        for levels in self.inventory {
            feeds.set_inventory(levels.snapshot());
        }
        (feeds, self.stage_weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{CancellationFlag, DemandFeeds, ReadContext};
    use std::time::Duration;

    const SAMPLE: &str = r#"{
        "tracked_skus": [
            { "sku": "WIDGET-01", "supply": { "lead_time_days": 45, "moq": 100, "case_pack": 24, "safety_stock": 50 } },
            { "sku": "WIDGET-02" }
        ],
        "sales_history": [
            { "sku": "WIDGET-01", "date": "2024-06-29", "units_sold": 12 }
        ],
        "pipeline": [
            { "opportunity_id": "op-1", "sku": "WIDGET-01", "expected_units": 100, "stage": "meeting_booked" }
        ],
        "confirmed_orders": [
            { "order_id": "po-1", "sku": "WIDGET-01", "quantity": 50 }
        ],
        "inventory": [
            { "sku": "WIDGET-01", "on_hand": 120, "reserved": 20 },
            { "sku": "WIDGET-03", "on_hand": 120, "reserved": 20, "available": 70, "on_order": 5 }
        ],
        "stage_weights": [
            { "stage": "meeting_booked", "probability": 20.0 }
        ]
    }"#;

    #[test]
    fn dataset_loads_into_feeds() {
        let dataset = FeedDataset::from_json_str(SAMPLE).unwrap();
        let (feeds, weights) = dataset.into_feeds();
        let ctx = ReadContext::with_timeout(Duration::from_secs(5), CancellationFlag::new());

        let tracked = feeds.tracked_skus(&ctx).unwrap();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0].supply.case_pack, 24);
        assert_eq!(tracked[1].supply.case_pack, 1);

        let inv = feeds.inventory(&Sku::new("WIDGET-01"), &ctx).unwrap().unwrap();
        assert_eq!(inv.available, 100);
        assert_eq!(inv.on_order, 0);
        assert!(feeds.inventory(&Sku::new("WIDGET-02"), &ctx).unwrap().is_none());

        // An exported `available` wins over the derived figure.
        let inv = feeds.inventory(&Sku::new("WIDGET-03"), &ctx).unwrap().unwrap();
        assert_eq!((inv.on_hand, inv.reserved, inv.available, inv.on_order), (120, 20, 70, 5));

        let orders = feeds.confirmed_orders(&Sku::new("WIDGET-01"), &ctx).unwrap();
        assert_eq!(orders[0].expected_fulfillment_date, None);
        assert_eq!(weights.len(), 1);
    }

    #[test]
    fn empty_object_is_an_empty_dataset() {
        assert_eq!(FeedDataset::from_json_str("{}").unwrap(), FeedDataset::default());
        assert!(matches!(FeedDataset::from_json_str("[1,2"), Err(DatasetError::Json(_))));
    }
}
