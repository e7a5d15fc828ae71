use chrono::NaiveDate;

use crate::confidence::{ConfidenceAssessment, ConfidenceInputs};
use crate::demand::DemandEngine;
use crate::explanation::{Explanation, ExplanationParts};
use crate::horizon::Horizon;
use crate::procurement::ProcurementPlanner;
use crate::result::{ForecastError, RiskFlag, SkuForecast};
use crate::signals::{SkuSignals, StageWeights};

pub const BLENDED_MODEL_VERSION: &str = "blend-max/1";

/// Confidence below which a 30-day forecast is flagged.
pub const LOW_CONFIDENCE_THRESHOLD: u8 = 50;

/// Days of history below which the series is considered sparse.
pub const SPARSE_HISTORY_DAYS: u32 = 7;

/// A per-SKU forecasting model.
///
/// Implementations must be pure: identical inputs (including `today`) produce
/// identical outputs, and nothing outside the return value is mutated.
pub trait ForecastModel: Send + Sync + 'static {
    /// Version label recorded on every forecast run.
    fn model_version(&self) -> &str;

    fn forecast(
        &self,
        signals: &SkuSignals,
        weights: &StageWeights,
        today: NaiveDate,
    ) -> Result<SkuForecast, ForecastError>;
}

/// Max-blend demand + procurement planning + explanation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlendedDemandModel {
    engine: DemandEngine,
    planner: ProcurementPlanner,
}

impl BlendedDemandModel {
    pub fn new(engine: DemandEngine, planner: ProcurementPlanner) -> Self {
        Self { engine, planner }
    }

    pub fn engine(&self) -> &DemandEngine {
        &self.engine
    }

    pub fn planner(&self) -> &ProcurementPlanner {
        &self.planner
    }
}

impl ForecastModel for BlendedDemandModel {
    fn model_version(&self) -> &str {
        BLENDED_MODEL_VERSION
    }

    fn forecast(
        &self,
        signals: &SkuSignals,
        weights: &StageWeights,
        today: NaiveDate,
    ) -> Result<SkuForecast, ForecastError> {
        let estimate = self.engine.estimate(signals, weights, today)?;

        let confidence = ConfidenceAssessment::assess(ConfidenceInputs {
            history_days: estimate.trailing.days_with_data,
            trailing_units: estimate.trailing.total_units,
            pipeline_lines: signals.pipeline.len(),
            confirmed_lines: signals.confirmed_orders.len(),
        });

        let plan = self.planner.plan(
            estimate.demand(Horizon::Days60),
            &signals.inventory,
            &signals.supply,
            today,
        )?;

        let mut risk_flags = Vec::new();
        if estimate.trailing.days_with_data == 0 {
            risk_flags.push(RiskFlag::NoSalesHistory);
        } else if estimate.trailing.days_with_data < SPARSE_HISTORY_DAYS {
            risk_flags.push(RiskFlag::SparseSalesHistory);
        }
        if confidence.score(Horizon::Days30) < LOW_CONFIDENCE_THRESHOLD {
            risk_flags.push(RiskFlag::LowConfidence);
        }
        if signals.inventory.position() < estimate.demand(Horizon::Days30) {
            risk_flags.push(RiskFlag::StockoutRisk);
        }
        if plan.reorder_recommended() {
            risk_flags.push(RiskFlag::ReorderRecommended);
        }
        if signals
            .confirmed_orders
            .iter()
            .any(|l| l.expected_fulfillment_date.is_none())
        {
            risk_flags.push(RiskFlag::UndatedConfirmedOrders);
        }

        let explanation = Explanation::assemble(ExplanationParts {
            as_of: today,
            model_version: self.model_version(),
            signals,
            estimate: &estimate,
            confidence: &confidence,
            procurement: &plan,
        });

        Ok(SkuForecast {
            sku: signals.sku.clone(),
            demand_30: estimate.demand(Horizon::Days30),
            demand_60: estimate.demand(Horizon::Days60),
            demand_90: estimate.demand(Horizon::Days90),
            trailing_units: estimate.trailing.total_units,
            weighted_pipeline_units: estimate.pipeline.total_units,
            confirmed_order_units: estimate.at(Horizon::Days90).confirmed_orders,
            confidence_30: confidence.score(Horizon::Days30),
            confidence_60: confidence.score(Horizon::Days60),
            confidence_90: confidence.score(Horizon::Days90),
            recommended_order_qty: plan.recommended_quantity,
            recommended_order_date: plan.recommended_order_date,
            risk_flags,
            explanation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{
        ConfirmedOrderLine, InventorySnapshot, PipelineDemandLine, SalesHistoryPoint,
        SupplyParameters,
    };
    use chrono::Duration;
    use forgecast_core::{OpportunityId, OrderId, Sku};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn sku() -> Sku {
        Sku::new("WIDGET-01")
    }

    /// 30 days x 10 units, one meeting_booked opportunity, one PO due in 10 days.
    fn scenario_signals() -> SkuSignals {
        SkuSignals {
            sku: sku(),
            sales_history: (0..30)
                .map(|d| SalesHistoryPoint {
                    sku: sku(),
                    date: today() - Duration::days(d),
                    units_sold: 10,
                })
                .collect(),
            pipeline: vec![PipelineDemandLine {
                opportunity_id: OpportunityId::new("op-1"),
                sku: sku(),
                expected_units: 100,
                stage: "meeting_booked".to_string(),
                probability_override: None,
            }],
            confirmed_orders: vec![ConfirmedOrderLine {
                order_id: OrderId::new("po-1"),
                sku: sku(),
                quantity: 50,
                expected_fulfillment_date: Some(today() + Duration::days(10)),
            }],
            inventory: InventorySnapshot::from_levels(sku(), 100, 0, 0),
            supply: SupplyParameters {
                lead_time_days: 45,
                moq: 100,
                case_pack: 24,
                safety_stock: 50,
            },
        }
    }

    fn weights() -> StageWeights {
        StageWeights::new().with("meeting_booked", 20.0)
    }

    #[test]
    fn combined_scenario_produces_expected_forecast() {
        let forecast = BlendedDemandModel::default()
            .forecast(&scenario_signals(), &weights(), today())
            .unwrap();

        assert_eq!(forecast.trailing_units, 300);
        assert_eq!(forecast.weighted_pipeline_units, 20);
        assert_eq!(forecast.confirmed_order_units, 50);
        assert_eq!(
            (forecast.demand_30, forecast.demand_60, forecast.demand_90),
            (300, 600, 900)
        );
        // 50 base + 15 history + 10 sales + 10 pipeline + 15 confirmed = 100
        assert_eq!(
            (forecast.confidence_30, forecast.confidence_60, forecast.confidence_90),
            (100, 90, 80)
        );
        assert_eq!(forecast.recommended_order_qty, 552);
        assert_eq!(forecast.recommended_order_date, Some(today() + Duration::days(38)));
        assert_eq!(
            forecast.risk_flags,
            vec![RiskFlag::StockoutRisk, RiskFlag::ReorderRecommended]
        );
        assert_eq!(forecast.explanation.model_version, BLENDED_MODEL_VERSION);
    }

    #[test]
    fn sparse_inputs_degrade_confidence_instead_of_failing() {
        let forecast = BlendedDemandModel::default()
            .forecast(&SkuSignals::empty(sku()), &StageWeights::new(), today())
            .unwrap();

        assert_eq!(forecast.demand_90, 0);
        assert_eq!(forecast.confidence_30, 50);
        assert_eq!(forecast.recommended_order_qty, 0);
        assert_eq!(forecast.recommended_order_date, None);
        assert_eq!(forecast.risk_flags, vec![RiskFlag::NoSalesHistory]);
    }

    #[test]
    fn undated_orders_are_flagged() {
        let mut signals = SkuSignals::empty(sku());
        signals.confirmed_orders = vec![ConfirmedOrderLine {
            order_id: OrderId::new("po-9"),
            sku: sku(),
            quantity: 5,
            expected_fulfillment_date: None,
        }];
        let forecast = BlendedDemandModel::default()
            .forecast(&signals, &StageWeights::new(), today())
            .unwrap();
        assert!(forecast.risk_flags.contains(&RiskFlag::UndatedConfirmedOrders));
        assert_eq!(forecast.demand_30, 5);
    }

    #[test]
    fn forecasting_is_repeatable() {
        let model = BlendedDemandModel::default();
        let a = model.forecast(&scenario_signals(), &weights(), today()).unwrap();
        let b = model.forecast(&scenario_signals(), &weights(), today()).unwrap();
        assert_eq!(a, b);
    }
}
