use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::orchestrator::{RunError, RunOrchestrator};
use crate::run::{RunStatus, TriggerType};
use crate::store::StoreError;

/// Fires `scheduled` forecast runs at a fixed cadence.
#[derive(Debug, Clone)]
pub struct ForecastScheduler {
    pub interval: Duration,
    /// Fire once as soon as the thread starts.
    pub run_on_start: bool,
}

impl Default for ForecastScheduler {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            run_on_start: false,
        }
    }
}

impl ForecastScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Spawn the scheduler thread.
    ///
    /// - Schedule: a run every `interval`
    /// - Immediate: `handle.trigger()` requests an extra scheduled run
    /// - A tick while the previous scheduled run is still going is skipped;
    ///   failed runs are logged and never retried
    pub fn spawn(
        &self,
        name: &str,
        orchestrator: Arc<RunOrchestrator>,
    ) -> Result<ForecastSchedulerHandle, RunError> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let runner = name.to_string();
        let join = thread::Builder::new()
            .name(runner.clone())
            .spawn(move || scheduler_loop(&runner, cfg, shutdown_rx, trigger_rx, orchestrator))?;

        Ok(ForecastSchedulerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct ForecastSchedulerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ForecastSchedulerHandle {
    /// Request a run now. Coalesced: a no-op while one is already pending.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the scheduler; an in-flight run is allowed to finish first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn scheduler_loop(
    name: &str,
    cfg: ForecastScheduler,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    orchestrator: Arc<RunOrchestrator>,
) {
    info!(runner = name, interval_secs = cfg.interval.as_secs(), "forecast scheduler started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = cfg.run_on_start;

    loop {
        // Shutdown has priority.
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            // Keep a stable cadence even if a run overran.
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            match shutdown_rx.recv_timeout(sleep_for) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
            }
        }

        pending = false;

        match orchestrator.run_now(TriggerType::Scheduled) {
            Ok(run) if run.status == RunStatus::Success => {
                info!(runner = name, run_id = %run.id, "scheduled forecast run succeeded");
            }
            Ok(run) => {
                warn!(
                    runner = name,
                    run_id = %run.id,
                    error = run.error.as_deref().unwrap_or(""),
                    "scheduled forecast run failed"
                );
            }
            Err(RunError::Store(StoreError::RunInProgress { run_id, .. })) => {
                warn!(runner = name, active_run = %run_id, "previous scheduled run still in progress, skipping tick");
            }
            Err(e) => {
                error!(runner = name, error = %e, "scheduled forecast run could not start");
            }
        }
    }

    info!(runner = name, "forecast scheduler stopped");
}
