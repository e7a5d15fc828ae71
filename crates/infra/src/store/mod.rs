//! Persistence boundary for forecast runs, their SKU lines, accuracy records
//! and the stage-weight table.

pub mod in_memory;
pub mod postgres;

use thiserror::Error;

use forgecast_core::{DomainError, ForecastRunId, Sku};
use forgecast_engine::{Horizon, StageWeight, StageWeights};

use crate::run::{ForecastAccuracyRecord, ForecastRun, ForecastSkuLine, TriggerType};

pub use in_memory::{InMemoryForecastStore, InMemoryStageWeightStore};
pub use postgres::PostgresForecastStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another run with the same trigger type is still running.
    #[error("a {trigger} run is already in progress ({run_id})")]
    RunInProgress {
        trigger: TriggerType,
        run_id: ForecastRunId,
    },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage for runs and their outputs.
///
/// Lines and accuracy records are append-only. A run row moves from
/// `running` to a terminal status exactly once.
pub trait ForecastStore: Send + Sync {
    /// Persist a new `running` run. Fails with [`StoreError::RunInProgress`]
    /// when a run of the same trigger type has not finished yet.
    fn begin_run(&self, run: &ForecastRun) -> Result<(), StoreError>;

    /// Record the terminal state of a run that is still `running`.
    fn finish_run(&self, run: &ForecastRun) -> Result<(), StoreError>;

    fn get_run(&self, id: ForecastRunId) -> Result<Option<ForecastRun>, StoreError>;

    /// Most recent runs first.
    fn list_runs(&self, limit: usize) -> Result<Vec<ForecastRun>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] for a repeated `(run, sku)`.
    fn insert_line(&self, line: &ForecastSkuLine) -> Result<(), StoreError>;

    fn lines_for_run(&self, run_id: ForecastRunId) -> Result<Vec<ForecastSkuLine>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] for a repeated `(run, sku, horizon)`.
    fn insert_accuracy(&self, record: &ForecastAccuracyRecord) -> Result<(), StoreError>;

    fn has_accuracy(
        &self,
        run_id: ForecastRunId,
        sku: &Sku,
        horizon: Horizon,
    ) -> Result<bool, StoreError>;

    fn accuracy_for_sku(&self, sku: &Sku) -> Result<Vec<ForecastAccuracyRecord>, StoreError>;
}

/// The configurable stage -> probability table.
pub trait StageWeightStore: Send + Sync {
    fn list(&self) -> Result<Vec<StageWeight>, StoreError>;

    fn get(&self, stage: &str) -> Result<Option<StageWeight>, StoreError>;

    /// Insert or replace; the probability is validated first.
    fn upsert(&self, weight: StageWeight) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    fn remove(&self, stage: &str) -> Result<bool, StoreError>;

    /// Immutable lookup for one run.
    fn snapshot(&self) -> Result<StageWeights, StoreError> {
        Ok(StageWeights::from_entries(self.list()?))
    }

    /// Write `defaults` only into an empty table; configured rows are never
    /// overwritten. Returns how many rows were written.
    fn seed(&self, defaults: Vec<StageWeight>) -> Result<usize, StoreError> {
        if !self.list()?.is_empty() {
            return Ok(0);
        }
        let count = defaults.len();
        for weight in defaults {
            self.upsert(weight)?;
        }
        Ok(count)
    }
}

impl<T: ForecastStore + ?Sized> ForecastStore for std::sync::Arc<T> {
    fn begin_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        (**self).begin_run(run)
    }

    fn finish_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        (**self).finish_run(run)
    }

    fn get_run(&self, id: ForecastRunId) -> Result<Option<ForecastRun>, StoreError> {
        (**self).get_run(id)
    }

    fn list_runs(&self, limit: usize) -> Result<Vec<ForecastRun>, StoreError> {
        (**self).list_runs(limit)
    }

    fn insert_line(&self, line: &ForecastSkuLine) -> Result<(), StoreError> {
        (**self).insert_line(line)
    }

    fn lines_for_run(&self, run_id: ForecastRunId) -> Result<Vec<ForecastSkuLine>, StoreError> {
        (**self).lines_for_run(run_id)
    }

    fn insert_accuracy(&self, record: &ForecastAccuracyRecord) -> Result<(), StoreError> {
        (**self).insert_accuracy(record)
    }

    fn has_accuracy(
        &self,
        run_id: ForecastRunId,
        sku: &Sku,
        horizon: Horizon,
    ) -> Result<bool, StoreError> {
        (**self).has_accuracy(run_id, sku, horizon)
    }

    fn accuracy_for_sku(&self, sku: &Sku) -> Result<Vec<ForecastAccuracyRecord>, StoreError> {
        (**self).accuracy_for_sku(sku)
    }
}

impl<T: StageWeightStore + ?Sized> StageWeightStore for std::sync::Arc<T> {
    fn list(&self) -> Result<Vec<StageWeight>, StoreError> {
        (**self).list()
    }

    fn get(&self, stage: &str) -> Result<Option<StageWeight>, StoreError> {
        (**self).get(stage)
    }

    fn upsert(&self, weight: StageWeight) -> Result<(), StoreError> {
        (**self).upsert(weight)
    }

    fn remove(&self, stage: &str) -> Result<bool, StoreError> {
        (**self).remove(stage)
    }

    fn snapshot(&self) -> Result<StageWeights, StoreError> {
        (**self).snapshot()
    }

    fn seed(&self, defaults: Vec<StageWeight>) -> Result<usize, StoreError> {
        (**self).seed(defaults)
    }
}
