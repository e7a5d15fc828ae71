//! Procurement Planner: required units, order quantity and order date.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::result::ForecastError;
use crate::signals::{InventorySnapshot, SupplyParameters};

pub const DEFAULT_ORDER_BUFFER_DAYS: i64 = 7;

/// Units needed to cover `demand_60` plus safety stock beyond the current position.
pub fn required_units(
    demand_60: i64,
    safety_stock: i64,
    available: i64,
    on_order: i64,
) -> Result<i64, ForecastError> {
    let target = demand_60
        .checked_add(safety_stock)
        .ok_or_else(|| ForecastError::overflow("demand plus safety stock"))?;
    let position = available
        .checked_add(on_order)
        .ok_or_else(|| ForecastError::overflow("inventory position"))?;
    let shortfall = target
        .checked_sub(position)
        .ok_or_else(|| ForecastError::overflow("required units"))?;
    Ok(shortfall.max(0))
}

/// Round `units` up to the next multiple of `case_pack` (`<= 0` means unconstrained).
pub fn round_up_to_case_pack(units: i64, case_pack: i64) -> Result<i64, ForecastError> {
    if case_pack <= 0 {
        return Ok(units);
    }
    let rem = units.rem_euclid(case_pack);
    if rem == 0 {
        return Ok(units);
    }
    units
        .checked_add(case_pack - rem)
        .ok_or_else(|| ForecastError::overflow("case-pack rounded quantity"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementPlan {
    pub demand_60: i64,
    pub safety_stock: i64,
    pub available: i64,
    pub on_order: i64,
    pub moq: i64,
    pub case_pack: i64,
    pub lead_time_days: i64,
    pub buffer_days: i64,
    pub required_units: i64,
    pub recommended_quantity: i64,
    /// `None` when nothing is required. May lie in the past when lead time < buffer.
    pub recommended_order_date: Option<NaiveDate>,
}

impl ProcurementPlan {
    pub fn reorder_recommended(&self) -> bool {
        self.recommended_quantity > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcurementPlanner {
    buffer_days: i64,
}

impl Default for ProcurementPlanner {
    fn default() -> Self {
        Self {
            buffer_days: DEFAULT_ORDER_BUFFER_DAYS,
        }
    }
}

impl ProcurementPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_days(mut self, buffer_days: i64) -> Self {
        self.buffer_days = buffer_days;
        self
    }

    pub fn buffer_days(&self) -> i64 {
        self.buffer_days
    }

    /// `today + lead_time_days - buffer_days`.
    pub fn order_date(&self, today: NaiveDate, lead_time_days: i64) -> Result<NaiveDate, ForecastError> {
        let offset = lead_time_days
            .checked_sub(self.buffer_days)
            .and_then(Duration::try_days)
            .ok_or_else(|| {
                ForecastError::invalid_input(format!("lead time {lead_time_days} days is out of range"))
            })?;
        today.checked_add_signed(offset).ok_or_else(|| {
            ForecastError::invalid_input(format!(
                "order date overflows for lead time {lead_time_days} days"
            ))
        })
    }

    pub fn plan(
        &self,
        demand_60: i64,
        inventory: &InventorySnapshot,
        supply: &SupplyParameters,
        today: NaiveDate,
    ) -> Result<ProcurementPlan, ForecastError> {
        validate_supply(supply)?;

        let required = required_units(
            demand_60,
            supply.safety_stock,
            inventory.available,
            inventory.on_order,
        )?;

        let (recommended_quantity, recommended_order_date) = if required == 0 {
            (0, None)
        } else {
            (
                round_up_to_case_pack(required.max(supply.moq), supply.case_pack)?,
                Some(self.order_date(today, supply.lead_time_days)?),
            )
        };

        Ok(ProcurementPlan {
            demand_60,
            safety_stock: supply.safety_stock,
            available: inventory.available,
            on_order: inventory.on_order,
            moq: supply.moq,
            case_pack: supply.case_pack,
            lead_time_days: supply.lead_time_days,
            buffer_days: self.buffer_days,
            required_units: required,
            recommended_quantity,
            recommended_order_date,
        })
    }
}

fn validate_supply(supply: &SupplyParameters) -> Result<(), ForecastError> {
    for (name, value) in [
        ("lead_time_days", supply.lead_time_days),
        ("moq", supply.moq),
        ("safety_stock", supply.safety_stock),
    ] {
        if value < 0 {
            return Err(ForecastError::invalid_input(format!(
                "{name} cannot be negative (got {value})"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgecast_core::Sku;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn inventory(available: i64, on_order: i64) -> InventorySnapshot {
        InventorySnapshot {
            sku: Sku::new("WIDGET-01"),
            on_hand: available,
            reserved: 0,
            available,
            on_order,
        }
    }

    #[test]
    fn required_units_never_negative() {
        assert_eq!(required_units(600, 50, 100, 0), Ok(550));
        assert_eq!(required_units(10, 0, 100, 50), Ok(0));
    }

    #[test]
    fn overflowing_quantities_are_input_errors() {
        assert!(matches!(
            required_units(i64::MAX, 50, 0, 0),
            Err(ForecastError::InvalidInput(msg)) if msg.contains("safety stock")
        ));
        assert!(required_units(0, 0, i64::MAX, 1).is_err());
        assert!(required_units(i64::MAX, 0, -10, 0).is_err());
        assert!(round_up_to_case_pack(i64::MAX - 1, 24).is_err());

        let supply = SupplyParameters {
            safety_stock: 50,
            ..SupplyParameters::default()
        };
        let err = ProcurementPlanner::new()
            .plan(i64::MAX, &inventory(0, 0), &supply, today())
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(_)));
    }

    #[test]
    fn case_pack_rounding() {
        assert_eq!(round_up_to_case_pack(550, 24), Ok(552));
        assert_eq!(round_up_to_case_pack(552, 24), Ok(552));
        assert_eq!(round_up_to_case_pack(0, 24), Ok(0));
        assert_eq!(round_up_to_case_pack(17, 0), Ok(17));
        assert_eq!(round_up_to_case_pack(17, -6), Ok(17));
    }

    #[test]
    fn moq_then_case_pack() {
        let supply = SupplyParameters {
            lead_time_days: 45,
            moq: 100,
            case_pack: 24,
            safety_stock: 50,
        };
        let plan = ProcurementPlanner::new()
            .plan(600, &inventory(100, 0), &supply, today())
            .unwrap();
        assert_eq!(plan.required_units, 550);
        assert_eq!(plan.recommended_quantity, 552);
        assert_eq!(plan.recommended_order_date, Some(today() + Duration::days(38)));
    }

    #[test]
    fn moq_floor_applies_before_rounding() {
        let supply = SupplyParameters {
            lead_time_days: 10,
            moq: 100,
            case_pack: 24,
            safety_stock: 0,
        };
        let plan = ProcurementPlanner::new()
            .plan(10, &inventory(0, 0), &supply, today())
            .unwrap();
        assert_eq!(plan.required_units, 10);
        assert_eq!(plan.recommended_quantity, 120);
    }

    #[test]
    fn nothing_required_means_no_order() {
        let supply = SupplyParameters {
            lead_time_days: 30,
            moq: 100,
            case_pack: 12,
            safety_stock: 0,
        };
        let plan = ProcurementPlanner::new()
            .plan(50, &inventory(80, 20), &supply, today())
            .unwrap();
        assert_eq!(plan.required_units, 0);
        assert_eq!(plan.recommended_quantity, 0);
        assert_eq!(plan.recommended_order_date, None);
        assert!(!plan.reorder_recommended());
    }

    #[test]
    fn short_lead_time_yields_a_past_date() {
        let planner = ProcurementPlanner::new();
        assert_eq!(planner.order_date(today(), 3).unwrap(), today() - Duration::days(4));
    }

    #[test]
    fn negative_supply_parameters_are_rejected() {
        let supply = SupplyParameters {
            moq: -1,
            ..SupplyParameters::default()
        };
        let err = ProcurementPlanner::new()
            .plan(10, &inventory(0, 0), &supply, today())
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(msg) if msg.contains("moq")));
    }

    proptest! {
        #[test]
        fn rounding_properties(n in 0i64..1_000_000, k in 1i64..500) {
            prop_assert_eq!(round_up_to_case_pack(n, 1), Ok(n));
            prop_assert_eq!(round_up_to_case_pack(0, k), Ok(0));
            let r = round_up_to_case_pack(n, k).unwrap();
            prop_assert_eq!(r % k, 0);
            prop_assert!(r >= n && r - n < k);
        }

        #[test]
        fn required_is_never_negative(
            demand in 0i64..1_000_000,
            safety in 0i64..10_000,
            available in -10_000i64..1_000_000,
            on_order in 0i64..1_000_000,
        ) {
            prop_assert!(required_units(demand, safety, available, on_order).unwrap() >= 0);
        }
    }
}
