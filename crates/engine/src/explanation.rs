//! Explanation Builder: the audit record behind every SKU forecast.
//!
//! Assembly only. Every number here is copied from the signals, the demand
//! estimate, the confidence assessment or the procurement plan.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use forgecast_core::OrderId;

use crate::confidence::ConfidenceAssessment;
use crate::demand::{BlendMethod, DemandEstimate, HorizonDemand, TrailingSales, WeightedPipelineLine};
use crate::procurement::ProcurementPlan;
use crate::signals::{InventorySnapshot, SkuSignals};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub as_of: NaiveDate,
    pub model_version: String,
    pub trailing_sales: TrailingSales,
    pub pipeline: PipelineSection,
    pub confirmed_orders: Vec<ConfirmedOrderEntry>,
    pub blend: BlendSection,
    pub inventory: InventorySnapshot,
    pub procurement: ProcurementPlan,
    pub confidence: ConfidenceAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    pub lines: Vec<WeightedPipelineLine>,
    pub total_units: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedOrderEntry {
    pub order_id: OrderId,
    pub quantity: i64,
    pub expected_fulfillment_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlendSection {
    pub method: BlendMethod,
    pub horizons: [HorizonDemand; 3],
}

/// Inputs the builder reads from. Borrowed so the builder owns nothing it did not copy.
#[derive(Debug, Clone, Copy)]
pub struct ExplanationParts<'a> {
    pub as_of: NaiveDate,
    pub model_version: &'a str,
    pub signals: &'a SkuSignals,
    pub estimate: &'a DemandEstimate,
    pub confidence: &'a ConfidenceAssessment,
    pub procurement: &'a ProcurementPlan,
}

impl Explanation {
    pub fn assemble(parts: ExplanationParts<'_>) -> Self {
        let ExplanationParts {
            as_of,
            model_version,
            signals,
            estimate,
            confidence,
            procurement,
        } = parts;

        Self {
            as_of,
            model_version: model_version.to_string(),
            trailing_sales: estimate.trailing.clone(),
            pipeline: PipelineSection {
                lines: estimate.pipeline.lines.clone(),
                total_units: estimate.pipeline.total_units,
            },
            confirmed_orders: signals
                .confirmed_orders
                .iter()
                .map(|line| ConfirmedOrderEntry {
                    order_id: line.order_id.clone(),
                    quantity: line.quantity,
                    expected_fulfillment_date: line.expected_fulfillment_date,
                })
                .collect(),
            blend: BlendSection {
                method: estimate.blend,
                horizons: estimate.horizons.clone(),
            },
            inventory: signals.inventory.clone(),
            procurement: procurement.clone(),
            confidence: confidence.clone(),
        }
    }

    /// Blended demand recorded for `horizon`.
    pub fn demand(&self, horizon: crate::horizon::Horizon) -> i64 {
        self.blend.horizons[horizon.index()].demand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceInputs;
    use crate::demand::DemandEngine;
    use crate::horizon::Horizon;
    use crate::procurement::ProcurementPlanner;
    use crate::signals::{ConfirmedOrderLine, StageWeights};
    use forgecast_core::Sku;

    #[test]
    fn explanation_mirrors_its_sources() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let mut signals = SkuSignals::empty(Sku::new("A"));
        signals.confirmed_orders = vec![ConfirmedOrderLine {
            order_id: OrderId::new("po-1"),
            sku: Sku::new("A"),
            quantity: 40,
            expected_fulfillment_date: None,
        }];

        let estimate = DemandEngine::new()
            .estimate(&signals, &StageWeights::new(), today)
            .unwrap();
        let confidence = ConfidenceAssessment::assess(ConfidenceInputs {
            history_days: 0,
            trailing_units: 0,
            pipeline_lines: 0,
            confirmed_lines: 1,
        });
        let plan = ProcurementPlanner::new()
            .plan(estimate.demand(Horizon::Days60), &signals.inventory, &signals.supply, today)
            .unwrap();

        let explanation = Explanation::assemble(ExplanationParts {
            as_of: today,
            model_version: "test/1",
            signals: &signals,
            estimate: &estimate,
            confidence: &confidence,
            procurement: &plan,
        });

        assert_eq!(explanation.blend.method, BlendMethod::Max);
        assert_eq!(explanation.demand(Horizon::Days30), 40);
        assert_eq!(explanation.confirmed_orders.len(), 1);
        assert_eq!(explanation.confirmed_orders[0].expected_fulfillment_date, None);
        assert_eq!(explanation.procurement, plan);
        assert_eq!(explanation.confidence, confidence);

        let json = serde_json::to_value(&explanation).unwrap();
        assert_eq!(json["blend"]["method"], "max");
    }
}
