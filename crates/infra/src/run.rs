//! Forecast run records and their per-SKU outputs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgecast_core::{AccuracyRecordId, DomainError, DomainResult, ForecastRunId, Sku};
use forgecast_engine::{AccuracyMeasurement, Explanation, Horizon, RiskFlag, SkuForecast};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }
}

impl core::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TriggerType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            other => Err(DomainError::validation(format!("unknown trigger type: {other}"))),
        }
    }
}

/// Run lifecycle: `Running -> {Success, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(DomainError::validation(format!("unknown run status: {other}"))),
        }
    }
}

/// Why a single SKU produced no line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuFailureKind {
    DeadlineExceeded,
    MalformedFeed,
    MissingInventory,
    InvalidInput,
    Storage,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuFailure {
    pub sku: Sku,
    pub kind: SkuFailureKind,
    pub message: String,
}

impl SkuFailure {
    pub fn new(sku: Sku, kind: SkuFailureKind, message: impl Into<String>) -> Self {
        Self {
            sku,
            kind,
            message: message.into(),
        }
    }
}

/// Result of processing one tracked SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkuOutcome {
    Forecasted(Sku),
    Failed(SkuFailure),
}

/// Batch report stored as a run's output summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_skus: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// SKUs never attempted because the run aborted.
    pub not_processed: usize,
    pub failures: Vec<SkuFailure>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(total_skus: usize) -> Self {
        Self {
            total_skus,
            not_processed: total_skus,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: SkuOutcome) {
        match outcome {
            SkuOutcome::Forecasted(_) => self.succeeded += 1,
            SkuOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
        self.not_processed = self
            .total_skus
            .saturating_sub(self.succeeded + self.failed);
    }

    pub fn failure_count(&self, kind: SkuFailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }
}

/// One execution of the engine across all tracked SKUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub id: ForecastRunId,
    pub trigger: TriggerType,
    pub horizon_days: u32,
    pub model_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub summary: Option<RunSummary>,
}

impl ForecastRun {
    pub fn start(
        trigger: TriggerType,
        horizon_days: u32,
        model_version: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ForecastRunId::new(),
            trigger,
            horizon_days,
            model_version: model_version.into(),
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            error: None,
            summary: None,
        }
    }

    /// Calendar date the run forecasts from.
    pub fn as_of(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    pub fn complete(&mut self, summary: RunSummary, finished_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_running()?;
        self.status = RunStatus::Success;
        self.summary = Some(summary);
        self.finished_at = Some(finished_at);
        Ok(())
    }

    pub fn fail(
        &mut self,
        error: impl Into<String>,
        summary: Option<RunSummary>,
        finished_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_running()?;
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.summary = summary;
        self.finished_at = Some(finished_at);
        Ok(())
    }

    fn ensure_running(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "run {} already finished with status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// The engine's output for one SKU within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSkuLine {
    pub run_id: ForecastRunId,
    pub sku: Sku,
    pub demand_30: i64,
    pub demand_60: i64,
    pub demand_90: i64,
    pub trailing_units: i64,
    pub weighted_pipeline_units: i64,
    pub confirmed_order_units: i64,
    pub confidence_30: u8,
    pub confidence_60: u8,
    pub confidence_90: u8,
    pub recommended_order_qty: i64,
    pub recommended_order_date: Option<NaiveDate>,
    pub risk_flags: Vec<RiskFlag>,
    pub explanation: Explanation,
    pub created_at: DateTime<Utc>,
}

impl ForecastSkuLine {
    pub fn from_forecast(run_id: ForecastRunId, forecast: SkuForecast, created_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            sku: forecast.sku,
            demand_30: forecast.demand_30,
            demand_60: forecast.demand_60,
            demand_90: forecast.demand_90,
            trailing_units: forecast.trailing_units,
            weighted_pipeline_units: forecast.weighted_pipeline_units,
            confirmed_order_units: forecast.confirmed_order_units,
            confidence_30: forecast.confidence_30,
            confidence_60: forecast.confidence_60,
            confidence_90: forecast.confidence_90,
            recommended_order_qty: forecast.recommended_order_qty,
            recommended_order_date: forecast.recommended_order_date,
            risk_flags: forecast.risk_flags,
            explanation: forecast.explanation,
            created_at,
        }
    }

    pub fn demand(&self, horizon: Horizon) -> i64 {
        match horizon {
            Horizon::Days30 => self.demand_30,
            Horizon::Days60 => self.demand_60,
            Horizon::Days90 => self.demand_90,
        }
    }
}

/// Reconciliation of a past forecast against realized sales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastAccuracyRecord {
    pub id: AccuracyRecordId,
    pub sku: Sku,
    pub run_id: ForecastRunId,
    pub horizon: Horizon,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub measurement: AccuracyMeasurement,
    pub created_at: DateTime<Utc>,
}

impl ForecastAccuracyRecord {
    pub fn new(
        run_id: ForecastRunId,
        sku: Sku,
        horizon: Horizon,
        period: (NaiveDate, NaiveDate),
        measurement: AccuracyMeasurement,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AccuracyRecordId::new(),
            sku,
            run_id,
            horizon,
            period_start: period.0,
            period_end: period.1,
            measurement,
            created_at,
        }
    }
}
