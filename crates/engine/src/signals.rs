//! Raw demand signals and supply parameters consumed by the engine.
//!
//! These are plain snapshots handed in by callers (infra/feeds). The engine never
//! fetches anything itself.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use forgecast_core::{DomainError, OpportunityId, OrderId, Sku};

/// One day's realized unit sales for a SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesHistoryPoint {
    pub sku: Sku,
    pub date: NaiveDate,
    pub units_sold: i64,
}

/// Expected future unit volume implied by one open sales opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDemandLine {
    pub opportunity_id: OpportunityId,
    pub sku: Sku,
    pub expected_units: i64,
    pub stage: String,
    /// Explicit win probability (0..=100) that replaces the stage default.
    #[serde(default)]
    pub probability_override: Option<f64>,
}

/// A purchase order's committed quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedOrderLine {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: i64,
    #[serde(default)]
    pub expected_fulfillment_date: Option<NaiveDate>,
}

/// Default probability (0..=100) assigned to a pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWeight {
    pub stage: String,
    pub probability: f64,
}

impl StageWeight {
    pub fn new(stage: impl Into<String>, probability: f64) -> Result<Self, DomainError> {
        let stage = stage.into();
        if stage.trim().is_empty() {
            return Err(DomainError::validation("stage name cannot be empty"));
        }
        validate_probability(probability)?;
        Ok(Self { stage, probability })
    }
}

pub(crate) fn validate_probability(probability: f64) -> Result<(), DomainError> {
    if !probability.is_finite() || !(0.0..=100.0).contains(&probability) {
        return Err(DomainError::validation(format!(
            "probability must be within 0..=100 (got {probability})"
        )));
    }
    Ok(())
}

/// Immutable stage -> probability lookup, snapshotted once per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageWeights {
    by_stage: BTreeMap<String, f64>,
}

impl StageWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from table rows. Later rows win for duplicate stage names.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = StageWeight>,
    {
        Self {
            by_stage: entries
                .into_iter()
                .map(|w| (w.stage, w.probability))
                .collect(),
        }
    }

    pub fn with(mut self, stage: impl Into<String>, probability: f64) -> Self {
        self.by_stage.insert(stage.into(), probability);
        self
    }

    /// Configured probability (0..=100) for `stage`, if any.
    pub fn probability(&self, stage: &str) -> Option<f64> {
        self.by_stage.get(stage).copied()
    }

    pub fn len(&self) -> usize {
        self.by_stage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stage.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = StageWeight> + '_ {
        self.by_stage.iter().map(|(stage, p)| StageWeight {
            stage: stage.clone(),
            probability: *p,
        })
    }
}

/// Current supply position for a SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub sku: Sku,
    pub on_hand: i64,
    pub reserved: i64,
    /// `on_hand - reserved`, as reported by the inventory system.
    pub available: i64,
    pub on_order: i64,
}

impl InventorySnapshot {
    /// Build a snapshot deriving `available` from on-hand and reserved stock.
    pub fn from_levels(sku: Sku, on_hand: i64, reserved: i64, on_order: i64) -> Self {
        Self {
            sku,
            on_hand,
            reserved,
            available: on_hand.saturating_sub(reserved),
            on_order,
        }
    }

    /// Units available now plus units already inbound, saturating at the `i64` bounds.
    pub fn position(&self) -> i64 {
        self.available.saturating_add(self.on_order)
    }
}

/// Supplier/stocking constraints for one SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyParameters {
    pub lead_time_days: i64,
    /// Minimum order quantity.
    pub moq: i64,
    /// Order multiple; `<= 0` means no constraint.
    pub case_pack: i64,
    pub safety_stock: i64,
}

impl Default for SupplyParameters {
    fn default() -> Self {
        Self {
            lead_time_days: 0,
            moq: 0,
            case_pack: 1,
            safety_stock: 0,
        }
    }
}

/// Everything the engine needs to forecast one SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuSignals {
    pub sku: Sku,
    pub sales_history: Vec<SalesHistoryPoint>,
    pub pipeline: Vec<PipelineDemandLine>,
    pub confirmed_orders: Vec<ConfirmedOrderLine>,
    pub inventory: InventorySnapshot,
    pub supply: SupplyParameters,
}

impl SkuSignals {
    /// Signals with no demand evidence and an empty stock position.
    pub fn empty(sku: Sku) -> Self {
        Self {
            inventory: InventorySnapshot::from_levels(sku.clone(), 0, 0, 0),
            sku,
            sales_history: Vec::new(),
            pipeline: Vec::new(),
            confirmed_orders: Vec::new(),
            supply: SupplyParameters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_weight_rejects_out_of_range_probability() {
        assert!(StageWeight::new("won", 100.0).is_ok());
        assert!(StageWeight::new("won", 100.5).is_err());
        assert!(StageWeight::new("lost", -1.0).is_err());
        assert!(StageWeight::new("odd", f64::NAN).is_err());
        assert!(StageWeight::new("  ", 10.0).is_err());
    }

    #[test]
    fn stage_weights_lookup_is_exact_and_later_rows_win() {
        let weights = StageWeights::from_entries(vec![
            StageWeight::new("meeting_booked", 10.0).unwrap(),
            StageWeight::new("meeting_booked", 20.0).unwrap(),
        ]);
        assert_eq!(weights.probability("meeting_booked"), Some(20.0));
        assert_eq!(weights.probability("Meeting_Booked"), None);
        assert_eq!(weights.len(), 1);
    }

    #[test]
    fn inventory_position_includes_inbound_units() {
        let inv = InventorySnapshot::from_levels(Sku::new("A"), 120, 20, 30);
        assert_eq!(inv.available, 100);
        assert_eq!(inv.position(), 130);
    }

    #[test]
    fn inventory_position_saturates_instead_of_wrapping() {
        let inv = InventorySnapshot::from_levels(Sku::new("A"), i64::MAX, 0, 10);
        assert_eq!(inv.position(), i64::MAX);
    }

    #[test]
    fn pipeline_line_override_defaults_to_none_when_absent() {
        let line: PipelineDemandLine = serde_json::from_str(
            r#"{"opportunity_id":"op-1","sku":"A","expected_units":5,"stage":"proposal"}"#,
        )
        .unwrap();
        assert_eq!(line.probability_override, None);
    }
}
