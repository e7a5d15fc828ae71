//! `forgecast-engine`
//!
//! **Responsibility:** pure demand-forecasting and procurement computation.
//!
//! - It performs no IO; callers (infra) hand in signal snapshots.
//! - Every function is deterministic given its inputs and an explicit `today`.
//! - It emits **recommendations**, never mutates inventory or order state.

pub mod accuracy;
pub mod confidence;
pub mod demand;
pub mod explanation;
pub mod horizon;
pub mod model;
pub mod procurement;
pub mod result;
pub mod signals;

pub use accuracy::{AccuracyMeasurement, AccuracySummary};
pub use confidence::{ConfidenceAssessment, ConfidenceComponents, ConfidenceInputs};
pub use demand::{
    BlendMethod, DemandEngine, DemandEstimate, HorizonDemand, TrailingSales, WeightSource,
    WeightedPipeline, WeightedPipelineLine, MAX_TRAILING_WINDOW_DAYS,
};
pub use explanation::{Explanation, ExplanationParts};
pub use horizon::Horizon;
pub use model::{BlendedDemandModel, ForecastModel, BLENDED_MODEL_VERSION};
pub use procurement::{round_up_to_case_pack, required_units, ProcurementPlan, ProcurementPlanner};
pub use result::{ForecastError, RiskFlag, SkuForecast};
pub use signals::{
    ConfirmedOrderLine, InventorySnapshot, PipelineDemandLine, SalesHistoryPoint, SkuSignals,
    StageWeight, StageWeights, SupplyParameters,
};
