use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use forgecast_core::{ForecastRunId, Sku};
use forgecast_engine::{Horizon, StageWeight};

use super::{ForecastStore, StageWeightStore, StoreError};
use crate::run::{ForecastAccuracyRecord, ForecastRun, ForecastSkuLine, RunStatus};

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order doubles as start order.
    runs: Vec<ForecastRun>,
    lines: Vec<ForecastSkuLine>,
    line_keys: HashSet<(ForecastRunId, Sku)>,
    accuracy: Vec<ForecastAccuracyRecord>,
    accuracy_keys: HashSet<(ForecastRunId, Sku, Horizon)>,
}

/// In-memory run/line/accuracy store.
///
/// Intended for tests/dev. All writes go through one lock, so the
/// one-running-run-per-trigger check and the insert are atomic.
#[derive(Debug, Default)]
pub struct InMemoryForecastStore {
    tables: RwLock<Tables>,
}

impl InMemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForecastStore for InMemoryForecastStore {
    fn begin_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidTransition(format!(
                "run {} must start as running, got {}",
                run.id, run.status
            )));
        }

        let mut t = self.tables.write().map_err(|_| poisoned())?;
        if t.runs.iter().any(|r| r.id == run.id) {
            return Err(StoreError::AlreadyExists(format!("run {}", run.id)));
        }
        if let Some(active) = t
            .runs
            .iter()
            .find(|r| r.trigger == run.trigger && r.status == RunStatus::Running)
        {
            return Err(StoreError::RunInProgress {
                trigger: run.trigger,
                run_id: active.id,
            });
        }
        t.runs.push(run.clone());
        Ok(())
    }

    fn finish_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        if !run.status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "run {} is not finished",
                run.id
            )));
        }

        let mut t = self.tables.write().map_err(|_| poisoned())?;
        let stored = t
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run.id)))?;
        if stored.status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "run {} already finished with status {}",
                run.id, stored.status
            )));
        }
        *stored = run.clone();
        Ok(())
    }

    fn get_run(&self, id: ForecastRunId) -> Result<Option<ForecastRun>, StoreError> {
        let t = self.tables.read().map_err(|_| poisoned())?;
        Ok(t.runs.iter().find(|r| r.id == id).cloned())
    }

    fn list_runs(&self, limit: usize) -> Result<Vec<ForecastRun>, StoreError> {
        let t = self.tables.read().map_err(|_| poisoned())?;
        Ok(t.runs.iter().rev().take(limit).cloned().collect())
    }

    fn insert_line(&self, line: &ForecastSkuLine) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(|_| poisoned())?;
        if !t.runs.iter().any(|r| r.id == line.run_id) {
            return Err(StoreError::NotFound(format!("run {}", line.run_id)));
        }
        if !t.line_keys.insert((line.run_id, line.sku.clone())) {
            return Err(StoreError::AlreadyExists(format!(
                "line for {} in run {}",
                line.sku, line.run_id
            )));
        }
        t.lines.push(line.clone());
        Ok(())
    }

    fn lines_for_run(&self, run_id: ForecastRunId) -> Result<Vec<ForecastSkuLine>, StoreError> {
        let t = self.tables.read().map_err(|_| poisoned())?;
        let mut lines: Vec<_> = t
            .lines
            .iter()
            .filter(|l| l.run_id == run_id)
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(lines)
    }

    fn insert_accuracy(&self, record: &ForecastAccuracyRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(|_| poisoned())?;
        if !t
            .accuracy_keys
            .insert((record.run_id, record.sku.clone(), record.horizon))
        {
            return Err(StoreError::AlreadyExists(format!(
                "{} accuracy for {} in run {}",
                record.horizon, record.sku, record.run_id
            )));
        }
        t.accuracy.push(record.clone());
        Ok(())
    }

    fn has_accuracy(
        &self,
        run_id: ForecastRunId,
        sku: &Sku,
        horizon: Horizon,
    ) -> Result<bool, StoreError> {
        let t = self.tables.read().map_err(|_| poisoned())?;
        Ok(t.accuracy_keys.contains(&(run_id, sku.clone(), horizon)))
    }

    fn accuracy_for_sku(&self, sku: &Sku) -> Result<Vec<ForecastAccuracyRecord>, StoreError> {
        let t = self.tables.read().map_err(|_| poisoned())?;
        Ok(t.accuracy.iter().filter(|r| &r.sku == sku).cloned().collect())
    }
}

/// In-memory stage-weight table.
#[derive(Debug, Default)]
pub struct InMemoryStageWeightStore {
    rows: RwLock<BTreeMap<String, f64>>,
}

impl InMemoryStageWeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table, validating every row.
    pub fn with_weights(
        weights: impl IntoIterator<Item = StageWeight>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        for w in weights {
            store.upsert(w)?;
        }
        Ok(store)
    }
}

impl StageWeightStore for InMemoryStageWeightStore {
    fn list(&self) -> Result<Vec<StageWeight>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .iter()
            .map(|(stage, p)| StageWeight {
                stage: stage.clone(),
                probability: *p,
            })
            .collect())
    }

    fn get(&self, stage: &str) -> Result<Option<StageWeight>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(stage).map(|p| StageWeight {
            stage: stage.to_string(),
            probability: *p,
        }))
    }

    fn upsert(&self, weight: StageWeight) -> Result<(), StoreError> {
        let weight = StageWeight::new(weight.stage, weight.probability)?;
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.insert(weight.stage, weight.probability);
        Ok(())
    }

    fn remove(&self, stage: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        Ok(rows.remove(stage).is_some())
    }
}
