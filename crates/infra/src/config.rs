//! Configuration loading and representation.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use forgecast_engine::{DemandEngine, ProcurementPlanner, MAX_TRAILING_WINDOW_DAYS};
use forgecast_observability::LogFormat;

use crate::orchestrator::OrchestratorConfig;
use crate::scheduler::ForecastScheduler;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastConfig {
    pub workers: usize,
    pub feed_deadline: Duration,
    pub horizon_days: u32,
    pub trailing_window_days: u32,
    pub order_buffer_days: i64,
    pub schedule_interval: Duration,
    pub log_format: LogFormat,
    pub dataset: Option<PathBuf>,
    pub database_url: Option<String>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            feed_deadline: Duration::from_secs(300),
            horizon_days: 90,
            trailing_window_days: 30,
            order_buffer_days: 7,
            schedule_interval: Duration::from_secs(86_400),
            log_format: LogFormat::Json,
            dataset: None,
            database_url: None,
        }
    }
}

impl ForecastConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let workers: usize = parse_or(&lookup, "FORECAST_WORKERS", d.workers)?;
        if workers == 0 {
            return Err(invalid("FORECAST_WORKERS", "0"));
        }
        let horizon_days: u32 = parse_or(&lookup, "FORECAST_HORIZON_DAYS", d.horizon_days)?;
        if horizon_days == 0 {
            return Err(invalid("FORECAST_HORIZON_DAYS", "0"));
        }
        let trailing_window_days: u32 =
            parse_or(&lookup, "FORECAST_TRAILING_WINDOW_DAYS", d.trailing_window_days)?;
        if !(1..=MAX_TRAILING_WINDOW_DAYS).contains(&trailing_window_days) {
            return Err(invalid(
                "FORECAST_TRAILING_WINDOW_DAYS",
                &trailing_window_days.to_string(),
            ));
        }

        Ok(Self {
            workers,
            feed_deadline: Duration::from_secs(parse_or(
                &lookup,
                "FORECAST_FEED_DEADLINE_SECS",
                d.feed_deadline.as_secs(),
            )?),
            horizon_days,
            trailing_window_days,
            order_buffer_days: parse_or(&lookup, "FORECAST_ORDER_BUFFER_DAYS", d.order_buffer_days)?,
            schedule_interval: Duration::from_secs(parse_or(
                &lookup,
                "FORECAST_SCHEDULE_INTERVAL_SECS",
                d.schedule_interval.as_secs(),
            )?),
            log_format: parse_or(&lookup, "FORECAST_LOG_FORMAT", d.log_format)?,
            dataset: non_empty(&lookup, "FORECAST_DATASET").map(PathBuf::from),
            database_url: non_empty(&lookup, "DATABASE_URL"),
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            workers: self.workers,
            feed_deadline: self.feed_deadline,
            horizon_days: self.horizon_days,
            history_days: self.trailing_window_days,
        }
    }

    pub fn demand_engine(&self) -> DemandEngine {
        DemandEngine::new().with_window_days(self.trailing_window_days)
    }

    pub fn planner(&self) -> ProcurementPlanner {
        ProcurementPlanner::new().with_buffer_days(self.order_buffer_days)
    }

    pub fn scheduler(&self) -> ForecastScheduler {
        ForecastScheduler::new(self.schedule_interval)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = ForecastConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ForecastConfig::default());
        assert_eq!(cfg.planner().buffer_days(), 7);
        assert_eq!(cfg.demand_engine().window_days(), 30);
    }

    #[test]
    fn values_override_defaults() {
        let cfg = ForecastConfig::from_lookup(lookup(&[
            ("FORECAST_WORKERS", "8"),
            ("FORECAST_FEED_DEADLINE_SECS", "30"),
            ("FORECAST_ORDER_BUFFER_DAYS", "10"),
            ("FORECAST_LOG_FORMAT", "pretty"),
            ("FORECAST_DATASET", "/tmp/feeds.json"),
            ("DATABASE_URL", "  "),
        ]))
        .unwrap();

        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.orchestrator().feed_deadline, Duration::from_secs(30));
        assert_eq!(cfg.order_buffer_days, 10);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.dataset, Some(PathBuf::from("/tmp/feeds.json")));
        assert_eq!(cfg.database_url, None);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = ForecastConfig::from_lookup(lookup(&[("FORECAST_WORKERS", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "FORECAST_WORKERS".into(),
                value: "many".into()
            }
        );
        assert!(ForecastConfig::from_lookup(lookup(&[("FORECAST_WORKERS", "0")])).is_err());
        assert!(ForecastConfig::from_lookup(lookup(&[("FORECAST_LOG_FORMAT", "xml")])).is_err());
    }

    #[test]
    fn trailing_window_must_stay_within_ten_years() {
        let err = ForecastConfig::from_lookup(lookup(&[(
            "FORECAST_TRAILING_WINDOW_DAYS",
            "4000000000",
        )]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "FORECAST_TRAILING_WINDOW_DAYS".into(),
                value: "4000000000".into()
            }
        );
        assert!(ForecastConfig::from_lookup(lookup(&[("FORECAST_TRAILING_WINDOW_DAYS", "0")])).is_err());

        let cfg =
            ForecastConfig::from_lookup(lookup(&[("FORECAST_TRAILING_WINDOW_DAYS", "3650")])).unwrap();
        assert_eq!(cfg.demand_engine().window_days(), 3650);
        assert_eq!(cfg.orchestrator().history_days, 3650);
    }
}
