use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgecast_core::Sku;

use crate::explanation::Explanation;

/// Forecast output for one SKU.
///
/// This is a computed recommendation, not a stored record; infra ties it to a
/// forecast run when persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuForecast {
    pub sku: Sku,
    pub demand_30: i64,
    pub demand_60: i64,
    pub demand_90: i64,
    /// Raw trailing-window total (not extrapolated).
    pub trailing_units: i64,
    pub weighted_pipeline_units: i64,
    /// Confirmed-order units within the longest horizon (90 days), undated lines included.
    pub confirmed_order_units: i64,
    pub confidence_30: u8,
    pub confidence_60: u8,
    pub confidence_90: u8,
    pub recommended_order_qty: i64,
    pub recommended_order_date: Option<NaiveDate>,
    pub risk_flags: Vec<RiskFlag>,
    pub explanation: Explanation,
}

/// Conditions a planner should look at before acting on a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    NoSalesHistory,
    SparseSalesHistory,
    LowConfidence,
    StockoutRisk,
    ReorderRecommended,
    UndatedConfirmedOrders,
}

impl RiskFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskFlag::NoSalesHistory => "no_sales_history",
            RiskFlag::SparseSalesHistory => "sparse_sales_history",
            RiskFlag::LowConfidence => "low_confidence",
            RiskFlag::StockoutRisk => "stockout_risk",
            RiskFlag::ReorderRecommended => "reorder_recommended",
            RiskFlag::UndatedConfirmedOrders => "undated_confirmed_orders",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForecastError {
    #[error("invalid forecast input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ForecastError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Input large enough that `what` leaves the representable range.
    pub fn overflow(what: &str) -> Self {
        Self::InvalidInput(format!("{what} is out of range"))
    }
}
