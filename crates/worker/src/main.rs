use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Runtime;

use forgecast_core::{Sku, SystemClock};
use forgecast_engine::{BlendedDemandModel, Horizon, StageWeight};
use forgecast_infra::feeds::{DemandFeeds, FeedDataset, InMemoryFeeds};
use forgecast_infra::store::{
    ForecastStore, InMemoryForecastStore, InMemoryStageWeightStore, PostgresForecastStore,
    StageWeightStore,
};
use forgecast_infra::{AccuracyReconciler, ForecastConfig, RunOrchestrator, TriggerType};

#[derive(Debug, Parser)]
#[command(name = "forgecast-worker", about = "Demand forecasting and procurement runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute one forecast run and print it.
    Run {
        #[arg(long, value_enum, default_value_t = Trigger::Manual)]
        trigger: Trigger,
    },
    /// Fire scheduled runs until interrupted.
    Schedule {
        /// Run once immediately instead of waiting a full interval.
        #[arg(long)]
        now: bool,
    },
    /// Reconcile elapsed forecasts against realized sales.
    Reconcile {
        /// Print the long-run accuracy summary for these SKUs.
        #[arg(long = "sku")]
        skus: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Trigger {
    Manual,
    Scheduled,
}

impl From<Trigger> for TriggerType {
    fn from(t: Trigger) -> Self {
        match t {
            Trigger::Manual => TriggerType::Manual,
            Trigger::Scheduled => TriggerType::Scheduled,
        }
    }
}

struct Stores {
    forecasts: Arc<dyn ForecastStore>,
    weights: Arc<dyn StageWeightStore>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ForecastConfig::from_env().context("invalid configuration")?;
    forgecast_observability::init_with_format(config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let (feeds, seed_weights) = load_feeds(&config)?;
    let stores = open_stores(&config, &runtime, seed_weights)?;

    match cli.command {
        Command::Run { trigger } => {
            let orchestrator = orchestrator(&config, feeds, &stores);
            let run = orchestrator.run_now(trigger.into())?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Command::Schedule { now } => {
            let orchestrator = Arc::new(orchestrator(&config, feeds, &stores));
            let handle = config
                .scheduler()
                .with_run_on_start(now)
                .spawn("forecast-scheduler", orchestrator)?;
            tracing::info!("scheduler running; press ctrl-c to stop");
            runtime
                .block_on(tokio::signal::ctrl_c())
                .context("failed to listen for ctrl-c")?;
            handle.shutdown();
        }
        Command::Reconcile { skus } => {
            let reconciler = AccuracyReconciler::new(feeds, stores.forecasts.clone())
                .with_read_timeout(config.feed_deadline);
            let report = reconciler.reconcile()?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            for sku in skus.into_iter().map(Sku::new) {
                for horizon in Horizon::ALL {
                    let summary = reconciler.summary_for_sku(&sku, Some(horizon))?;
                    println!(
                        "{}",
                        serde_json::json!({ "sku": sku, "horizon": horizon, "accuracy": summary })
                    );
                }
            }
        }
    }

    Ok(())
}

fn orchestrator(config: &ForecastConfig, feeds: Arc<dyn DemandFeeds>, stores: &Stores) -> RunOrchestrator {
    let model = BlendedDemandModel::new(config.demand_engine(), config.planner());
    RunOrchestrator::new(feeds, stores.forecasts.clone(), stores.weights.clone())
        .with_model(Arc::new(model))
        .with_clock(Arc::new(SystemClock))
        .with_config(config.orchestrator())
}

fn load_feeds(config: &ForecastConfig) -> Result<(Arc<dyn DemandFeeds>, Vec<StageWeight>)> {
    match &config.dataset {
        Some(path) => {
            let dataset = FeedDataset::from_path(path)
                .with_context(|| format!("failed to load dataset {}", path.display()))?;
            let (feeds, weights) = dataset.into_feeds();
            tracing::info!(dataset = %path.display(), "loaded feed dataset");
            Ok((Arc::new(feeds), weights))
        }
        None => {
            tracing::warn!("FORECAST_DATASET not set; no SKUs are tracked");
            Ok((Arc::new(InMemoryFeeds::new()), Vec::new()))
        }
    }
}

fn open_stores(config: &ForecastConfig, runtime: &Runtime, seed_weights: Vec<StageWeight>) -> Result<Stores> {
    let stores = match &config.database_url {
        Some(url) => {
            let pool = runtime
                .block_on(PgPoolOptions::new().max_connections(config.workers as u32 + 2).connect(url))
                .context("failed to connect to Postgres")?;
            let store = Arc::new(PostgresForecastStore::new(pool, runtime.handle().clone()));
            runtime.block_on(store.ensure_schema())?;
            Stores {
                forecasts: store.clone(),
                weights: store,
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set; forecasts are kept in memory only");
            Stores {
                forecasts: Arc::new(InMemoryForecastStore::new()),
                weights: Arc::new(InMemoryStageWeightStore::new()),
            }
        }
    };

    if !seed_weights.is_empty() {
        let offered = seed_weights.len();
        match stores.weights.seed(seed_weights)? {
            0 => tracing::info!(offered, "stage weights already configured; dataset weights ignored"),
            seeded => tracing::info!(seeded, "seeded stage weights from dataset"),
        }
    }
    Ok(stores)
}
