//! Accuracy reconciliation: compares stored forecasts with realized sales
//! once their horizon has fully elapsed.
//!
//! Runs independently of the orchestrator and is safe to repeat; a
//! `(run, sku, horizon)` is reconciled at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use forgecast_core::{Clock, Sku, SystemClock};
use forgecast_engine::{AccuracyMeasurement, AccuracySummary, Horizon};

use crate::feeds::{CancellationFlag, DemandFeeds, FeedError, ReadContext};
use crate::run::{ForecastAccuracyRecord, ForecastSkuLine, RunStatus};
use crate::store::{ForecastStore, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub runs_examined: usize,
    pub records_written: usize,
    pub already_reconciled: usize,
    /// Horizons whose period has not ended yet.
    pub not_yet_due: usize,
    pub failed: usize,
}

/// The calendar days a horizon forecast covers: `[as_of + 1, as_of + H]`.
///
/// The run date itself is trailing-window input, so it is never part of the
/// actual a forecast is judged against. `None` past the end of the calendar.
pub fn forecast_period(as_of: NaiveDate, horizon: Horizon) -> Option<(NaiveDate, NaiveDate)> {
    let start = as_of.succ_opt()?;
    let end = as_of.checked_add_signed(ChronoDuration::days(i64::from(horizon.days())))?;
    Some((start, end))
}

pub struct AccuracyReconciler {
    feeds: Arc<dyn DemandFeeds>,
    store: Arc<dyn ForecastStore>,
    clock: Arc<dyn Clock>,
    read_timeout: Duration,
    run_limit: usize,
}

impl AccuracyReconciler {
    pub fn new(feeds: Arc<dyn DemandFeeds>, store: Arc<dyn ForecastStore>) -> Self {
        Self {
            feeds,
            store,
            clock: Arc::new(SystemClock),
            read_timeout: Duration::from_secs(300),
            run_limit: 500,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// How many of the most recent runs to examine per pass.
    pub fn with_run_limit(mut self, limit: usize) -> Self {
        self.run_limit = limit;
        self
    }

    pub fn reconcile(&self) -> Result<ReconciliationReport, ReconcileError> {
        let today = self.clock.today();
        let ctx = ReadContext::with_timeout(self.read_timeout, CancellationFlag::new());
        let mut report = ReconciliationReport::default();

        let runs = self.store.list_runs(self.run_limit)?;
        for run in runs.iter().filter(|r| r.status == RunStatus::Success) {
            report.runs_examined += 1;
            let as_of = run.as_of();
            for line in self.store.lines_for_run(run.id)? {
                for horizon in Horizon::ALL {
                    self.reconcile_line(&line, as_of, horizon, today, &ctx, &mut report)?;
                }
            }
        }

        info!(
            runs = report.runs_examined,
            written = report.records_written,
            skipped = report.already_reconciled,
            not_yet_due = report.not_yet_due,
            failed = report.failed,
            "accuracy reconciliation finished"
        );
        Ok(report)
    }

    fn reconcile_line(
        &self,
        line: &ForecastSkuLine,
        as_of: NaiveDate,
        horizon: Horizon,
        today: NaiveDate,
        ctx: &ReadContext,
        report: &mut ReconciliationReport,
    ) -> Result<(), ReconcileError> {
        let Some(period) = forecast_period(as_of, horizon) else {
            warn!(run_id = %line.run_id, sku = %line.sku, horizon = %horizon, "forecast period is out of range");
            report.failed += 1;
            return Ok(());
        };
        if period.1 >= today {
            report.not_yet_due += 1;
            return Ok(());
        }
        if self.store.has_accuracy(line.run_id, &line.sku, horizon)? {
            report.already_reconciled += 1;
            return Ok(());
        }

        let actual = match self.feeds.sales_history(&line.sku, period.0, period.1, ctx) {
            Ok(points) => {
                let total = points
                    .iter()
                    .try_fold(0i64, |total, p| total.checked_add(p.units_sold));
                match total {
                    Some(total) => total,
                    None => {
                        warn!(run_id = %line.run_id, sku = %line.sku, horizon = %horizon, "realized sales overflow");
                        report.failed += 1;
                        return Ok(());
                    }
                }
            }
            Err(e) if e.is_run_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(run_id = %line.run_id, sku = %line.sku, horizon = %horizon, error = %e, "accuracy reconciliation failed");
                report.failed += 1;
                return Ok(());
            }
        };

        let measurement = AccuracyMeasurement::measure(line.demand(horizon), actual);
        let record = ForecastAccuracyRecord::new(
            line.run_id,
            line.sku.clone(),
            horizon,
            period,
            measurement,
            self.clock.now(),
        );
        match self.store.insert_accuracy(&record) {
            Ok(()) => {
                debug!(run_id = %line.run_id, sku = %line.sku, horizon = %horizon, error = measurement.error, "accuracy recorded");
                report.records_written += 1;
            }
            // Another pass got there first.
            Err(StoreError::AlreadyExists(_)) => report.already_reconciled += 1,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Long-run accuracy for a SKU, optionally restricted to one horizon.
    pub fn summary_for_sku(
        &self,
        sku: &Sku,
        horizon: Option<Horizon>,
    ) -> Result<AccuracySummary, ReconcileError> {
        let records = self.store.accuracy_for_sku(sku)?;
        Ok(AccuracySummary::from_measurements(
            records
                .iter()
                .filter(|r| horizon.is_none_or(|h| r.horizon == h))
                .map(|r| &r.measurement),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_starts_the_day_after_the_run() {
        let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (start, end) = forecast_period(as_of, Horizon::Days30).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!((end - start).num_days() + 1, 30);
    }

    #[test]
    fn period_past_the_calendar_end_is_none() {
        assert_eq!(forecast_period(NaiveDate::MAX, Horizon::Days30), None);
    }
}
