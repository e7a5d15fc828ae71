//! Demand Engine: blends trailing velocity, weighted pipeline and confirmed orders.
//!
//! Model:
//! - Trailing velocity is the unit total over the last `window_days` calendar days
//!   (today inclusive), extrapolated linearly to each horizon.
//! - Pipeline lines contribute `expected_units * probability / 100`; the override
//!   wins over the stage table, unknown stages weigh 0. The rounded total is used
//!   unchanged at every horizon.
//! - Confirmed orders count when fulfilled on or before `today + H`. Lines without
//!   a fulfillment date count at every horizon.
//! - Blend: `demand(H) = max(trailing(H), pipeline, confirmed(H))`.
//!
//! Missing or empty feeds never fail an estimate; only malformed values do.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use forgecast_core::{OpportunityId, Sku};

use crate::horizon::Horizon;
use crate::result::ForecastError;
use crate::signals::{
    validate_probability, ConfirmedOrderLine, PipelineDemandLine, SalesHistoryPoint, SkuSignals,
    StageWeights,
};

pub const DEFAULT_TRAILING_WINDOW_DAYS: u32 = 30;
/// Ten years; longer windows are rejected by configuration and clamped here.
pub const MAX_TRAILING_WINDOW_DAYS: u32 = 3650;

/// Realized sales inside the trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingSales {
    pub window_days: u32,
    pub total_units: i64,
    /// Distinct calendar days with at least one history point in the window.
    pub days_with_data: u32,
    pub daily_average: f64,
}

impl TrailingSales {
    /// Linear projection of the window total onto `horizon_days`.
    pub fn extrapolate(&self, horizon_days: u32) -> Result<i64, ForecastError> {
        if self.days_with_data == 0 || self.window_days == 0 {
            return Ok(0);
        }
        let projected =
            self.total_units as f64 / f64::from(self.window_days) * f64::from(horizon_days);
        to_units(projected, "extrapolated trailing demand")
    }
}

/// Round a fractional unit count, rejecting values outside `i64`.
fn to_units(value: f64, what: &str) -> Result<i64, ForecastError> {
    let rounded = value.round();
    if rounded.is_finite() && rounded.abs() < i64::MAX as f64 {
        Ok(rounded as i64)
    } else {
        Err(ForecastError::overflow(what))
    }
}

/// `today - days`, or an error when that precedes the supported calendar.
fn days_before(today: NaiveDate, days: i64) -> Result<NaiveDate, ForecastError> {
    Duration::try_days(days)
        .and_then(|d| today.checked_sub_signed(d))
        .ok_or_else(|| ForecastError::overflow("trailing window start"))
}

/// Sum of history points dated within `(today - window_days, today]`.
pub fn trailing_sales(
    history: &[SalesHistoryPoint],
    today: NaiveDate,
    window_days: u32,
) -> Result<TrailingSales, ForecastError> {
    if window_days == 0 {
        return Ok(TrailingSales {
            window_days,
            total_units: 0,
            days_with_data: 0,
            daily_average: 0.0,
        });
    }

    let start = days_before(today, i64::from(window_days) - 1)?;
    let mut days = BTreeSet::new();
    let mut total_units = 0i64;

    for point in history.iter().filter(|p| p.date >= start && p.date <= today) {
        days.insert(point.date);
        total_units = total_units
            .checked_add(point.units_sold)
            .ok_or_else(|| ForecastError::overflow("trailing sales total"))?;
    }

    Ok(TrailingSales {
        window_days,
        total_units,
        days_with_data: days.len() as u32,
        daily_average: total_units as f64 / f64::from(window_days),
    })
}

/// Where a pipeline line's weight came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    Override,
    StageTable,
    UnknownStage,
}

/// One pipeline line with its resolved weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPipelineLine {
    pub opportunity_id: OpportunityId,
    pub stage: String,
    pub expected_units: i64,
    /// Resolved weight as a fraction in `0.0..=1.0`.
    pub weight: f64,
    pub weight_source: WeightSource,
    pub weighted_units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPipeline {
    pub lines: Vec<WeightedPipelineLine>,
    /// Rounded sum of `weighted_units`; horizon-independent.
    pub total_units: i64,
}

pub fn weighted_pipeline(
    lines: &[PipelineDemandLine],
    weights: &StageWeights,
) -> Result<WeightedPipeline, ForecastError> {
    let lines: Vec<WeightedPipelineLine> = lines
        .iter()
        .map(|line| {
            let (probability, weight_source) = match line.probability_override {
                Some(p) => (p, WeightSource::Override),
                None => match weights.probability(&line.stage) {
                    Some(p) => (p, WeightSource::StageTable),
                    None => (0.0, WeightSource::UnknownStage),
                },
            };
            let weight = probability / 100.0;
            WeightedPipelineLine {
                opportunity_id: line.opportunity_id.clone(),
                stage: line.stage.clone(),
                expected_units: line.expected_units,
                weight,
                weight_source,
                weighted_units: line.expected_units as f64 * weight,
            }
        })
        .collect();

    let total_units = to_units(
        lines.iter().map(|l| l.weighted_units).sum::<f64>(),
        "weighted pipeline total",
    )?;
    Ok(WeightedPipeline { lines, total_units })
}

/// Confirmed quantity due on or before `today + horizon_days`; undated lines always count.
pub fn confirmed_orders(
    lines: &[ConfirmedOrderLine],
    today: NaiveDate,
    horizon_days: u32,
) -> Result<i64, ForecastError> {
    let cutoff = today
        .checked_add_signed(Duration::days(i64::from(horizon_days)))
        .ok_or_else(|| ForecastError::overflow("confirmed order cutoff"))?;
    lines
        .iter()
        .filter(|l| l.expected_fulfillment_date.is_none_or(|d| d <= cutoff))
        .try_fold(0i64, |total, l| total.checked_add(l.quantity))
        .ok_or_else(|| ForecastError::overflow("confirmed order total"))
}

/// How the three signals are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMethod {
    Max,
}

/// Signals and blended demand for one horizon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizonDemand {
    pub horizon: Horizon,
    pub trailing_extrapolated: i64,
    pub weighted_pipeline: i64,
    pub confirmed_orders: i64,
    pub demand: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandEstimate {
    pub trailing: TrailingSales,
    pub pipeline: WeightedPipeline,
    pub blend: BlendMethod,
    /// Indexed in `Horizon::ALL` order.
    pub horizons: [HorizonDemand; 3],
}

impl DemandEstimate {
    pub fn at(&self, horizon: Horizon) -> &HorizonDemand {
        &self.horizons[horizon.index()]
    }

    pub fn demand(&self, horizon: Horizon) -> i64 {
        self.at(horizon).demand
    }
}

/// Stateless demand estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandEngine {
    window_days: u32,
}

impl Default for DemandEngine {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_TRAILING_WINDOW_DAYS,
        }
    }
}

impl DemandEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window_days(mut self, window_days: u32) -> Self {
        self.window_days = window_days.clamp(1, MAX_TRAILING_WINDOW_DAYS);
        self
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn estimate(
        &self,
        signals: &SkuSignals,
        weights: &StageWeights,
        today: NaiveDate,
    ) -> Result<DemandEstimate, ForecastError> {
        validate_demand_signals(signals)?;

        let trailing = trailing_sales(&signals.sales_history, today, self.window_days)?;
        let pipeline = weighted_pipeline(&signals.pipeline, weights)?;

        let horizon_demand = |horizon: Horizon| -> Result<HorizonDemand, ForecastError> {
            let trailing_extrapolated = trailing.extrapolate(horizon.days())?;
            let confirmed = confirmed_orders(&signals.confirmed_orders, today, horizon.days())?;
            Ok(HorizonDemand {
                horizon,
                trailing_extrapolated,
                weighted_pipeline: pipeline.total_units,
                confirmed_orders: confirmed,
                demand: trailing_extrapolated.max(pipeline.total_units).max(confirmed),
            })
        };
        let horizons = [
            horizon_demand(Horizon::Days30)?,
            horizon_demand(Horizon::Days60)?,
            horizon_demand(Horizon::Days90)?,
        ];

        Ok(DemandEstimate {
            trailing,
            pipeline,
            blend: BlendMethod::Max,
            horizons,
        })
    }
}

fn validate_demand_signals(signals: &SkuSignals) -> Result<(), ForecastError> {
    let sku = &signals.sku;

    for point in &signals.sales_history {
        ensure_sku(sku, &point.sku, "sales history point")?;
        if point.units_sold < 0 {
            return Err(ForecastError::invalid_input(format!(
                "negative units sold ({}) on {}",
                point.units_sold, point.date
            )));
        }
    }

    for line in &signals.pipeline {
        ensure_sku(sku, &line.sku, "pipeline line")?;
        if line.expected_units < 0 {
            return Err(ForecastError::invalid_input(format!(
                "opportunity {} has negative expected units ({})",
                line.opportunity_id, line.expected_units
            )));
        }
        if let Some(p) = line.probability_override {
            validate_probability(p).map_err(|e| {
                ForecastError::invalid_input(format!("opportunity {}: {e}", line.opportunity_id))
            })?;
        }
    }

    for line in &signals.confirmed_orders {
        ensure_sku(sku, &line.sku, "confirmed order line")?;
        if line.quantity < 0 {
            return Err(ForecastError::invalid_input(format!(
                "order {} has negative quantity ({})",
                line.order_id, line.quantity
            )));
        }
    }

    ensure_sku(sku, &signals.inventory.sku, "inventory snapshot")
}

fn ensure_sku(expected: &Sku, actual: &Sku, what: &str) -> Result<(), ForecastError> {
    if expected != actual {
        return Err(ForecastError::invalid_input(format!(
            "{what} belongs to sku {actual}, expected {expected}"
        )));
    }
    Ok(())
}
