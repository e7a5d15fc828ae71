//! Infrastructure layer: feeds, stores, run orchestration, scheduling,
//! accuracy reconciliation and configuration.

pub mod config;
pub mod feeds;
pub mod orchestrator;
pub mod reconciliation;
pub mod run;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, ForecastConfig};
pub use orchestrator::{OrchestratorConfig, RunError, RunHandle, RunOrchestrator};
pub use reconciliation::{AccuracyReconciler, ReconcileError, ReconciliationReport};
pub use run::{
    ForecastAccuracyRecord, ForecastRun, ForecastSkuLine, RunStatus, RunSummary, SkuFailure,
    SkuFailureKind, SkuOutcome, TriggerType,
};
pub use scheduler::{ForecastScheduler, ForecastSchedulerHandle};
