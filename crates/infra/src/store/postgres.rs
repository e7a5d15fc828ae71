//! Postgres-backed forecast store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists`, or `RunInProgress` from `begin_run` |
//! | Database (check constraint violation) | `23514` | `Domain` (validation) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! ## Sync access
//!
//! The store traits are synchronous and are called from the orchestrator's
//! worker threads. Every call blocks on the runtime `handle` the store was
//! built with, so it must not be invoked from a thread that is itself
//! driving that runtime.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::instrument;

use forgecast_core::{AccuracyRecordId, DomainError, ForecastRunId, Sku};
use forgecast_engine::{AccuracyMeasurement, Horizon, StageWeight};

use super::{ForecastStore, StageWeightStore, StoreError};
use crate::run::{ForecastAccuracyRecord, ForecastRun, ForecastSkuLine, RunStatus, RunSummary, TriggerType};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS forecast_runs (
        id             UUID PRIMARY KEY,
        trigger_type   TEXT NOT NULL,
        horizon_days   INTEGER NOT NULL,
        model_version  TEXT NOT NULL,
        started_at     TIMESTAMPTZ NOT NULL,
        finished_at    TIMESTAMPTZ,
        status         TEXT NOT NULL CHECK (status IN ('running', 'success', 'failed')),
        error          TEXT,
        summary        JSONB
    )
    "#,
    // At most one running run per trigger type.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS forecast_runs_one_running
        ON forecast_runs (trigger_type) WHERE status = 'running'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS forecast_sku_lines (
        run_id                  UUID NOT NULL REFERENCES forecast_runs (id),
        sku                     TEXT NOT NULL,
        demand_30               BIGINT NOT NULL,
        demand_60               BIGINT NOT NULL,
        demand_90               BIGINT NOT NULL,
        recommended_order_qty   BIGINT NOT NULL,
        recommended_order_date  DATE,
        line                    JSONB NOT NULL,
        created_at              TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (run_id, sku)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS forecast_accuracy (
        id                UUID PRIMARY KEY,
        run_id            UUID NOT NULL REFERENCES forecast_runs (id),
        sku               TEXT NOT NULL,
        horizon_days      INTEGER NOT NULL,
        period_start      DATE NOT NULL,
        period_end        DATE NOT NULL,
        forecasted_units  BIGINT NOT NULL,
        actual_units      BIGINT NOT NULL,
        error             BIGINT NOT NULL,
        absolute_error    BIGINT NOT NULL,
        error_pct         DOUBLE PRECISION,
        created_at        TIMESTAMPTZ NOT NULL,
        UNIQUE (run_id, sku, horizon_days)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stage_weights (
        stage        TEXT PRIMARY KEY,
        probability  DOUBLE PRECISION NOT NULL CHECK (probability >= 0 AND probability <= 100)
    )
    "#,
];

/// Runs, SKU lines, accuracy records and stage weights in Postgres.
#[derive(Debug, Clone)]
pub struct PostgresForecastStore {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl PostgresForecastStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    /// Create tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, trigger = %run.trigger), err)]
    async fn insert_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO forecast_runs
                (id, trigger_type, horizon_days, model_version, started_at, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.trigger.as_str())
        .bind(run.horizon_days as i32)
        .bind(&run.model_version)
        .bind(run.started_at)
        .bind(run.status.as_str())
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => match self.running_run_id(run.trigger).await? {
                Some(run_id) => Err(StoreError::RunInProgress {
                    trigger: run.trigger,
                    run_id,
                }),
                None => Err(StoreError::AlreadyExists(format!("run {}", run.id))),
            },
            Err(e) => Err(map_sqlx_error("begin_run", e)),
        }
    }

    async fn running_run_id(&self, trigger: TriggerType) -> Result<Option<ForecastRunId>, StoreError> {
        let row = sqlx::query("SELECT id FROM forecast_runs WHERE trigger_type = $1 AND status = 'running'")
            .bind(trigger.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("running_run_id", e))?;
        row.map(|r| r.try_get::<uuid::Uuid, _>("id").map(ForecastRunId::from_uuid))
            .transpose()
            .map_err(|e| map_sqlx_error("running_run_id", e))
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, status = %run.status), err)]
    async fn update_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE forecast_runs
               SET status = $2, finished_at = $3, error = $4, summary = $5
             WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.finished_at)
        .bind(run.error.as_deref())
        .bind(run.summary.as_ref().map(Json))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_run", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.fetch_run(run.id).await? {
            Some(existing) => Err(StoreError::InvalidTransition(format!(
                "run {} already finished with status {}",
                run.id, existing.status
            ))),
            None => Err(StoreError::NotFound(format!("run {}", run.id))),
        }
    }

    async fn fetch_run(&self, id: ForecastRunId) -> Result<Option<ForecastRun>, StoreError> {
        let row = sqlx::query(&format!("{RUN_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_run", e))?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn fetch_runs(&self, limit: usize) -> Result<Vec<ForecastRun>, StoreError> {
        let rows = sqlx::query(&format!("{RUN_COLUMNS} ORDER BY started_at DESC, id DESC LIMIT $1"))
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_runs", e))?;
        rows.iter().map(run_from_row).collect()
    }

    #[instrument(skip(self, line), fields(run_id = %line.run_id, sku = %line.sku), err)]
    async fn write_line(&self, line: &ForecastSkuLine) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO forecast_sku_lines
                (run_id, sku, demand_30, demand_60, demand_90,
                 recommended_order_qty, recommended_order_date, line, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(line.run_id.as_uuid())
        .bind(line.sku.as_str())
        .bind(line.demand_30)
        .bind(line.demand_60)
        .bind(line.demand_90)
        .bind(line.recommended_order_qty)
        .bind(line.recommended_order_date)
        .bind(Json(line))
        .bind(line.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
        Ok(())
    }

    async fn fetch_lines(&self, run_id: ForecastRunId) -> Result<Vec<ForecastSkuLine>, StoreError> {
        let rows = sqlx::query("SELECT line FROM forecast_sku_lines WHERE run_id = $1 ORDER BY sku ASC")
            .bind(run_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("lines_for_run", e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<Json<ForecastSkuLine>, _>("line")
                    .map(|j| j.0)
                    .map_err(|e| map_sqlx_error("lines_for_run", e))
            })
            .collect()
    }

    async fn write_accuracy(&self, record: &ForecastAccuracyRecord) -> Result<(), StoreError> {
        let m = &record.measurement;
        sqlx::query(
            r#"
            INSERT INTO forecast_accuracy
                (id, run_id, sku, horizon_days, period_start, period_end,
                 forecasted_units, actual_units, error, absolute_error, error_pct, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.run_id.as_uuid())
        .bind(record.sku.as_str())
        .bind(record.horizon.days() as i32)
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(m.forecasted_units)
        .bind(m.actual_units)
        .bind(m.error)
        .bind(m.absolute_error)
        .bind(m.error_pct)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_accuracy", e))?;
        Ok(())
    }

    async fn accuracy_exists(
        &self,
        run_id: ForecastRunId,
        sku: &Sku,
        horizon: Horizon,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM forecast_accuracy WHERE run_id = $1 AND sku = $2 AND horizon_days = $3) AS present",
        )
        .bind(run_id.as_uuid())
        .bind(sku.as_str())
        .bind(horizon.days() as i32)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_accuracy", e))?;
        row.try_get("present")
            .map_err(|e| map_sqlx_error("has_accuracy", e))
    }

    async fn fetch_accuracy(&self, sku: &Sku) -> Result<Vec<ForecastAccuracyRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, sku, horizon_days, period_start, period_end,
                   forecasted_units, actual_units, error, absolute_error, error_pct, created_at
              FROM forecast_accuracy
             WHERE sku = $1
             ORDER BY period_end ASC, horizon_days ASC
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("accuracy_for_sku", e))?;
        rows.iter().map(accuracy_from_row).collect()
    }

    async fn fetch_weights(&self) -> Result<Vec<StageWeight>, StoreError> {
        let rows = sqlx::query("SELECT stage, probability FROM stage_weights ORDER BY stage ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_stage_weights", e))?;
        rows.iter()
            .map(|row| -> Result<StageWeight, StoreError> {
                Ok(StageWeight {
                    stage: row.try_get("stage").map_err(|e| map_sqlx_error("list_stage_weights", e))?,
                    probability: row
                        .try_get("probability")
                        .map_err(|e| map_sqlx_error("list_stage_weights", e))?,
                })
            })
            .collect()
    }

    async fn write_weight(&self, weight: &StageWeight) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stage_weights (stage, probability) VALUES ($1, $2)
            ON CONFLICT (stage) DO UPDATE SET probability = EXCLUDED.probability
            "#,
        )
        .bind(&weight.stage)
        .bind(weight.probability)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_stage_weight", e))?;
        Ok(())
    }

    async fn delete_weight(&self, stage: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM stage_weights WHERE stage = $1")
            .bind(stage)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_stage_weight", e))?;
        Ok(result.rows_affected() > 0)
    }
}

const RUN_COLUMNS: &str = r#"
    SELECT id, trigger_type, horizon_days, model_version, started_at,
           finished_at, status, error, summary
      FROM forecast_runs
"#;

fn run_from_row(row: &PgRow) -> Result<ForecastRun, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_run", e);
    let trigger: String = row.try_get("trigger_type").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let horizon_days: i32 = row.try_get("horizon_days").map_err(get)?;
    let summary: Option<Json<RunSummary>> = row.try_get("summary").map_err(get)?;

    Ok(ForecastRun {
        id: ForecastRunId::from_uuid(row.try_get("id").map_err(get)?),
        trigger: trigger.parse()?,
        horizon_days: u32::try_from(horizon_days)
            .map_err(|_| DomainError::invariant(format!("negative horizon_days {horizon_days}")))?,
        model_version: row.try_get("model_version").map_err(get)?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at").map_err(get)?,
        finished_at: row.try_get("finished_at").map_err(get)?,
        status: status.parse::<RunStatus>()?,
        error: row.try_get("error").map_err(get)?,
        summary: summary.map(|j| j.0),
    })
}

fn accuracy_from_row(row: &PgRow) -> Result<ForecastAccuracyRecord, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_accuracy", e);
    let horizon_days: i32 = row.try_get("horizon_days").map_err(get)?;
    let horizon = u32::try_from(horizon_days)
        .ok()
        .and_then(Horizon::from_days)
        .ok_or_else(|| DomainError::invariant(format!("unknown horizon {horizon_days}")))?;
    let sku: String = row.try_get("sku").map_err(get)?;

    Ok(ForecastAccuracyRecord {
        id: AccuracyRecordId::from_uuid(row.try_get("id").map_err(get)?),
        sku: Sku::new(sku),
        run_id: ForecastRunId::from_uuid(row.try_get("run_id").map_err(get)?),
        horizon,
        period_start: row.try_get::<NaiveDate, _>("period_start").map_err(get)?,
        period_end: row.try_get::<NaiveDate, _>("period_end").map_err(get)?,
        measurement: AccuracyMeasurement {
            forecasted_units: row.try_get("forecasted_units").map_err(get)?,
            actual_units: row.try_get("actual_units").map_err(get)?,
            error: row.try_get("error").map_err(get)?,
            absolute_error: row.try_get("absolute_error").map_err(get)?,
            error_pct: row.try_get("error_pct").map_err(get)?,
        },
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

impl ForecastStore for PostgresForecastStore {
    fn begin_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidTransition(format!(
                "run {} must start as running, got {}",
                run.id, run.status
            )));
        }
        self.handle.block_on(self.insert_run(run))
    }

    fn finish_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        if !run.status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "run {} is not finished",
                run.id
            )));
        }
        self.handle.block_on(self.update_run(run))
    }

    fn get_run(&self, id: ForecastRunId) -> Result<Option<ForecastRun>, StoreError> {
        self.handle.block_on(self.fetch_run(id))
    }

    fn list_runs(&self, limit: usize) -> Result<Vec<ForecastRun>, StoreError> {
        self.handle.block_on(self.fetch_runs(limit))
    }

    fn insert_line(&self, line: &ForecastSkuLine) -> Result<(), StoreError> {
        self.handle.block_on(self.write_line(line))
    }

    fn lines_for_run(&self, run_id: ForecastRunId) -> Result<Vec<ForecastSkuLine>, StoreError> {
        self.handle.block_on(self.fetch_lines(run_id))
    }

    fn insert_accuracy(&self, record: &ForecastAccuracyRecord) -> Result<(), StoreError> {
        self.handle.block_on(self.write_accuracy(record))
    }

    fn has_accuracy(
        &self,
        run_id: ForecastRunId,
        sku: &Sku,
        horizon: Horizon,
    ) -> Result<bool, StoreError> {
        self.handle.block_on(self.accuracy_exists(run_id, sku, horizon))
    }

    fn accuracy_for_sku(&self, sku: &Sku) -> Result<Vec<ForecastAccuracyRecord>, StoreError> {
        self.handle.block_on(self.fetch_accuracy(sku))
    }
}

impl StageWeightStore for PostgresForecastStore {
    fn list(&self) -> Result<Vec<StageWeight>, StoreError> {
        self.handle.block_on(self.fetch_weights())
    }

    fn get(&self, stage: &str) -> Result<Option<StageWeight>, StoreError> {
        Ok(self.list()?.into_iter().find(|w| w.stage == stage))
    }

    fn upsert(&self, weight: StageWeight) -> Result<(), StoreError> {
        let weight = StageWeight::new(weight.stage, weight.probability)?;
        self.handle.block_on(self.write_weight(&weight))
    }

    fn remove(&self, stage: &str) -> Result<bool, StoreError> {
        self.handle.block_on(self.delete_weight(stage))
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23514") => StoreError::Domain(DomainError::validation(msg)),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_storage() {
        let err = map_sqlx_error("list_runs", sqlx::Error::PoolClosed);
        assert_eq!(
            err,
            StoreError::Storage("connection pool closed in list_runs".to_string())
        );
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn schema_enforces_single_running_run_per_trigger() {
        let index = SCHEMA
            .iter()
            .find(|s| s.contains("forecast_runs_one_running"))
            .unwrap();
        assert!(index.contains("WHERE status = 'running'"));
    }
}
