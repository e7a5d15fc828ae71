//! `forgecast-core`: foundation building blocks shared by every forecasting crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the domain error model and the injectable clock.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{AccuracyRecordId, ForecastRunId, OpportunityId, OrderId, Sku};
