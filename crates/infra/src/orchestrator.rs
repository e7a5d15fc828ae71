//! Run Orchestrator: drives one forecast run across every tracked SKU.
//!
//! - A run is recorded as `running` before any SKU is touched; the store
//!   rejects a second running run of the same trigger type.
//! - SKUs are processed by a bounded pool of worker threads. A failing SKU is
//!   recorded in the batch report and the run carries on.
//! - An unavailable feed or a cancellation aborts the run: remaining SKUs are
//!   skipped, lines already written stay, and the run ends `failed`.
//! - Every feed read shares one per-run deadline.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, NaiveDate};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use forgecast_core::{Clock, ForecastRunId, SystemClock};
use forgecast_engine::{
    BlendedDemandModel, ForecastError, ForecastModel, SkuSignals, StageWeights,
    MAX_TRAILING_WINDOW_DAYS,
};

use crate::feeds::{CancellationFlag, DemandFeeds, FeedError, FeedKind, ReadContext, TrackedSku};
use crate::run::{
    ForecastRun, ForecastSkuLine, RunSummary, SkuFailure, SkuFailureKind, SkuOutcome, TriggerType,
};
use crate::store::{ForecastStore, StageWeightStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Worker threads processing SKUs concurrently.
    pub workers: usize,
    /// Deadline shared by every feed read of one run, measured from run start.
    pub feed_deadline: Duration,
    /// Horizon recorded on the run.
    pub horizon_days: u32,
    /// Days of sales history fetched per SKU, ending today.
    pub history_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            feed_deadline: Duration::from_secs(300),
            horizon_days: 90,
            history_days: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_feed_deadline(mut self, deadline: Duration) -> Self {
        self.feed_deadline = deadline;
        self
    }

    pub fn with_history_days(mut self, days: u32) -> Self {
        self.history_days = days.clamp(1, MAX_TRAILING_WINDOW_DAYS);
        self
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to spawn run thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("run {0} panicked")]
    Panicked(ForecastRunId),
}

/// A run executing on a background thread.
#[derive(Debug)]
pub struct RunHandle {
    run_id: ForecastRunId,
    cancel: CancellationFlag,
    join: thread::JoinHandle<Result<ForecastRun, RunError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> ForecastRunId {
        self.run_id
    }

    /// Ask the run to stop; it finishes as `failed` once in-flight reads return.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the run reaches a terminal status.
    pub fn wait(self) -> Result<ForecastRun, RunError> {
        let run_id = self.run_id;
        self.join.join().map_err(|_| RunError::Panicked(run_id))?
    }
}

pub struct RunOrchestrator {
    feeds: Arc<dyn DemandFeeds>,
    store: Arc<dyn ForecastStore>,
    weights: Arc<dyn StageWeightStore>,
    model: Arc<dyn ForecastModel>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("model_version", &self.model.model_version())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Why the worker pool stopped early.
enum Abort {
    Feed(FeedError),
    Panicked,
}

impl RunOrchestrator {
    pub fn new(
        feeds: Arc<dyn DemandFeeds>,
        store: Arc<dyn ForecastStore>,
        weights: Arc<dyn StageWeightStore>,
    ) -> Self {
        Self {
            feeds,
            store,
            weights,
            model: Arc::new(BlendedDemandModel::default()),
            clock: Arc::new(SystemClock),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ForecastModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ForecastStore> {
        &self.store
    }

    /// Record a new `running` run.
    pub fn begin(&self, trigger: TriggerType) -> Result<ForecastRun, RunError> {
        let run = ForecastRun::start(
            trigger,
            self.config.horizon_days,
            self.model.model_version(),
            self.clock.now(),
        );
        self.store.begin_run(&run)?;
        info!(
            run_id = %run.id,
            trigger = %trigger,
            model_version = %run.model_version,
            "forecast run started"
        );
        Ok(run)
    }

    /// Run to completion on the calling thread.
    pub fn run_now(&self, trigger: TriggerType) -> Result<ForecastRun, RunError> {
        let run = self.begin(trigger)?;
        self.execute(run, CancellationFlag::new())
    }

    /// Record the run and execute it in the background.
    ///
    /// The run id is available from the handle immediately.
    pub fn trigger(self: &Arc<Self>, trigger: TriggerType) -> Result<RunHandle, RunError> {
        let run = self.begin(trigger)?;
        let run_id = run.id;
        let cancel = CancellationFlag::new();

        let this = Arc::clone(self);
        let flag = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("forecast-run-{trigger}"))
            .spawn(move || this.execute(run, flag));

        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                let mut run = self
                    .store
                    .get_run(run_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
                run.fail(format!("failed to spawn run thread: {e}"), None, self.clock.now())
                    .map_err(StoreError::from)?;
                self.store.finish_run(&run)?;
                return Err(RunError::Spawn(e));
            }
        };

        Ok(RunHandle {
            run_id,
            cancel,
            join,
        })
    }

    /// Process every tracked SKU for `run` and record its terminal status.
    pub fn execute(&self, mut run: ForecastRun, cancel: CancellationFlag) -> Result<ForecastRun, RunError> {
        let started = Instant::now();
        let ctx = ReadContext::new(started + self.config.feed_deadline, cancel);
        let today = run.as_of();

        let weights = match self.weights.snapshot() {
            Ok(w) => w,
            Err(e) => return self.finish_failed(run, format!("failed to load stage weights: {e}"), None),
        };

        let tracked = match self.feeds.tracked_skus(&ctx) {
            Ok(t) => t,
            Err(e) => return self.finish_failed(run, e.to_string(), None),
        };

        let mut summary = RunSummary::new(tracked.len());
        let abort = self.process_all(&run, &tracked, &weights, today, &ctx, &mut summary);
        summary.duration_ms = started.elapsed().as_millis() as u64;

        let abort = abort.or_else(|| ctx.is_cancelled().then_some(Abort::Feed(FeedError::Cancelled)));
        if let Some(abort) = abort {
            let reason = match abort {
                Abort::Feed(e) => e.to_string(),
                Abort::Panicked => "a forecast worker panicked".to_string(),
            };
            error!(
                run_id = %run.id,
                error = %reason,
                succeeded = summary.succeeded,
                failed = summary.failed,
                not_processed = summary.not_processed,
                "forecast run aborted"
            );
            return self.finish_failed(run, reason, Some(summary));
        }

        info!(
            run_id = %run.id,
            total = summary.total_skus,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "forecast run completed"
        );
        run.complete(summary, self.clock.now())
            .map_err(StoreError::from)?;
        self.store.finish_run(&run)?;
        Ok(run)
    }

    fn finish_failed(
        &self,
        mut run: ForecastRun,
        reason: String,
        summary: Option<RunSummary>,
    ) -> Result<ForecastRun, RunError> {
        if summary.is_none() {
            error!(run_id = %run.id, error = %reason, "forecast run failed");
        }
        run.fail(reason, summary, self.clock.now())
            .map_err(StoreError::from)?;
        self.store.finish_run(&run)?;
        Ok(run)
    }

    fn process_all(
        &self,
        run: &ForecastRun,
        tracked: &[TrackedSku],
        weights: &StageWeights,
        today: NaiveDate,
        ctx: &ReadContext,
        summary: &mut RunSummary,
    ) -> Option<Abort> {
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let abort: Mutex<Option<Abort>> = Mutex::new(None);
        let workers = self.config.workers.clamp(1, tracked.len().max(1));

        thread::scope(|s| {
            let (tx, rx) = mpsc::channel::<SkuOutcome>();
            let mut joins = Vec::with_capacity(workers);

            for i in 0..workers {
                let tx = tx.clone();
                let (next, stop, abort) = (&next, &stop, &abort);
                let spawned = thread::Builder::new()
                    .name(format!("forecast-worker-{i}"))
                    .spawn_scoped(s, move || {
                        while !stop.load(Ordering::SeqCst) {
                            let idx = next.fetch_add(1, Ordering::SeqCst);
                            let Some(item) = tracked.get(idx) else { break };
                            match self.process_sku(run, item, weights, today, ctx) {
                                Ok(outcome) => {
                                    let _ = tx.send(outcome);
                                }
                                Err(fatal) => {
                                    stop.store(true, Ordering::SeqCst);
                                    if let Ok(mut slot) = abort.lock() {
                                        slot.get_or_insert(Abort::Feed(fatal));
                                    }
                                    break;
                                }
                            }
                        }
                    });
                match spawned {
                    Ok(join) => joins.push(join),
                    Err(e) => warn!(run_id = %run.id, error = %e, "failed to spawn forecast worker"),
                }
            }
            drop(tx);

            if joins.is_empty() {
                // No pool; fall back to the calling thread.
                for item in tracked {
                    match self.process_sku(run, item, weights, today, ctx) {
                        Ok(outcome) => summary.record(outcome),
                        Err(fatal) => {
                            if let Ok(mut slot) = abort.lock() {
                                slot.get_or_insert(Abort::Feed(fatal));
                            }
                            break;
                        }
                    }
                }
                return;
            }

            for outcome in rx {
                summary.record(outcome);
            }
            for join in joins {
                if join.join().is_err() {
                    if let Ok(mut slot) = abort.lock() {
                        slot.get_or_insert(Abort::Panicked);
                    }
                }
            }
        });

        abort.into_inner().ok().flatten()
    }

    /// `Err` only for feed errors that end the run. A panic while forecasting
    /// fails that SKU as `internal`.
    fn process_sku(
        &self,
        run: &ForecastRun,
        tracked: &TrackedSku,
        weights: &StageWeights,
        today: NaiveDate,
        ctx: &ReadContext,
    ) -> Result<SkuOutcome, FeedError> {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.forecast_sku(run, tracked, weights, today, ctx)
        }));
        attempt.unwrap_or_else(|payload| {
            let message = format!("forecast panicked: {}", panic_message(payload.as_ref()));
            error!(run_id = %run.id, sku = %tracked.sku, error = %message, "sku forecast panicked");
            Ok(SkuOutcome::Failed(SkuFailure::new(
                tracked.sku.clone(),
                SkuFailureKind::Internal,
                message,
            )))
        })
    }

    fn forecast_sku(
        &self,
        run: &ForecastRun,
        tracked: &TrackedSku,
        weights: &StageWeights,
        today: NaiveDate,
        ctx: &ReadContext,
    ) -> Result<SkuOutcome, FeedError> {
        let sku = &tracked.sku;
        let failed = |kind: SkuFailureKind, message: String| -> Result<SkuOutcome, FeedError> {
            warn!(run_id = %run.id, sku = %sku, kind = ?kind, error = %message, "sku forecast failed");
            Ok(SkuOutcome::Failed(SkuFailure::new(sku.clone(), kind, message)))
        };

        let signals = match self.gather(tracked, today, ctx) {
            Ok(Some(signals)) => signals,
            Ok(None) => {
                return failed(
                    SkuFailureKind::MissingInventory,
                    "no inventory snapshot".to_string(),
                );
            }
            Err(e) if e.is_run_fatal() => return Err(e),
            Err(e @ FeedError::DeadlineExceeded { .. }) => {
                return failed(SkuFailureKind::DeadlineExceeded, e.to_string());
            }
            Err(e) => return failed(SkuFailureKind::MalformedFeed, e.to_string()),
        };

        let forecast = match self.model.forecast(&signals, weights, today) {
            Ok(f) => f,
            Err(ForecastError::InvalidInput(msg)) => {
                return failed(SkuFailureKind::InvalidInput, msg);
            }
            Err(e) => return failed(SkuFailureKind::Internal, e.to_string()),
        };

        let line = ForecastSkuLine::from_forecast(run.id, forecast, self.clock.now());
        if let Err(e) = self.store.insert_line(&line) {
            return failed(SkuFailureKind::Storage, e.to_string());
        }

        debug!(
            run_id = %run.id,
            sku = %sku,
            demand_30 = line.demand_30,
            recommended_qty = line.recommended_order_qty,
            "sku forecast stored"
        );
        Ok(SkuOutcome::Forecasted(sku.clone()))
    }

    /// Read the four feeds for one SKU. `Ok(None)` when inventory has no record.
    fn gather(
        &self,
        tracked: &TrackedSku,
        today: NaiveDate,
        ctx: &ReadContext,
    ) -> Result<Option<SkuSignals>, FeedError> {
        let sku = &tracked.sku;
        let from = ChronoDuration::try_days(i64::from(self.config.history_days) - 1)
            .and_then(|span| today.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);

        let sales_history = read(ctx, FeedKind::SalesHistory, || {
            self.feeds.sales_history(sku, from, today, ctx)
        })?;
        let pipeline = read(ctx, FeedKind::Pipeline, || self.feeds.pipeline(sku, ctx))?;
        let confirmed_orders = read(ctx, FeedKind::ConfirmedOrders, || {
            self.feeds.confirmed_orders(sku, ctx)
        })?;
        let Some(inventory) = read(ctx, FeedKind::Inventory, || self.feeds.inventory(sku, ctx))? else {
            return Ok(None);
        };

        Ok(Some(SkuSignals {
            sku: sku.clone(),
            sales_history,
            pipeline,
            confirmed_orders,
            inventory,
            supply: tracked.supply,
        }))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// A read started after the deadline, or finishing past it, does not count.
fn read<T>(
    ctx: &ReadContext,
    feed: FeedKind,
    f: impl FnOnce() -> Result<T, FeedError>,
) -> Result<T, FeedError> {
    ctx.check(feed)?;
    let value = f()?;
    ctx.check(feed)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rejects_late_results() {
        let ctx = ReadContext::new(Instant::now(), CancellationFlag::new());
        let result = read(&ctx, FeedKind::Pipeline, || Ok::<_, FeedError>(1));
        assert_eq!(
            result,
            Err(FeedError::DeadlineExceeded {
                feed: FeedKind::Pipeline
            })
        );
    }

    #[test]
    fn read_passes_through_timely_results() {
        let ctx = ReadContext::with_timeout(Duration::from_secs(5), CancellationFlag::new());
        assert_eq!(read(&ctx, FeedKind::Inventory, || Ok::<_, FeedError>(7)), Ok(7));
    }

    #[test]
    fn panic_payloads_are_described() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn history_days_are_clamped() {
        let cfg = OrchestratorConfig::default().with_history_days(u32::MAX);
        assert_eq!(cfg.history_days, MAX_TRAILING_WINDOW_DAYS);
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.feed_deadline, Duration::from_secs(300));
        assert_eq!((cfg.horizon_days, cfg.history_days), (90, 30));
    }
}
