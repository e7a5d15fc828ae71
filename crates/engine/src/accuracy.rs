//! Forecast-vs-actual error arithmetic used by the reconciliation pass.

use serde::{Deserialize, Serialize};

/// Comparison of one forecast figure with realized sales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMeasurement {
    pub forecasted_units: i64,
    pub actual_units: i64,
    /// `actual - forecasted`: positive means the forecast was too low.
    pub error: i64,
    pub absolute_error: i64,
    /// `absolute_error / actual * 100`; `None` when actual is zero and the forecast is not.
    pub error_pct: Option<f64>,
}

impl AccuracyMeasurement {
    pub fn measure(forecasted_units: i64, actual_units: i64) -> Self {
        let error = actual_units.saturating_sub(forecasted_units);
        let absolute_error = error.saturating_abs();
        let error_pct = if actual_units != 0 {
            Some(absolute_error as f64 / actual_units.abs() as f64 * 100.0)
        } else if forecasted_units == 0 {
            Some(0.0)
        } else {
            None
        };

        Self {
            forecasted_units,
            actual_units,
            error,
            absolute_error,
            error_pct,
        }
    }
}

/// Long-run accuracy over a set of measurements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccuracySummary {
    pub count: usize,
    pub mean_absolute_error: f64,
    /// Mean of the defined percentage errors; `None` if none were defined.
    pub mape: Option<f64>,
    /// Sum of signed errors; negative means the model over-forecasts.
    pub bias: i64,
}

impl AccuracySummary {
    pub fn from_measurements<'a, I>(measurements: I) -> Self
    where
        I: IntoIterator<Item = &'a AccuracyMeasurement>,
    {
        let mut count = 0usize;
        let mut abs_total = 0i64;
        let mut bias = 0i64;
        let mut pct_total = 0.0;
        let mut pct_count = 0usize;

        for m in measurements {
            count += 1;
            abs_total = abs_total.saturating_add(m.absolute_error);
            bias = bias.saturating_add(m.error);
            if let Some(p) = m.error_pct {
                pct_total += p;
                pct_count += 1;
            }
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            count,
            mean_absolute_error: abs_total as f64 / count as f64,
            mape: (pct_count > 0).then(|| pct_total / pct_count as f64),
            bias,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_values_saturate() {
        let m = AccuracyMeasurement::measure(i64::MAX, i64::MIN);
        assert_eq!(m.error, i64::MIN);
        assert_eq!(m.absolute_error, i64::MAX);

        let s = AccuracySummary::from_measurements([&m, &m]);
        assert_eq!(s.bias, i64::MIN);
    }

    #[test]
    fn under_forecast_has_positive_error() {
        let m = AccuracyMeasurement::measure(80, 100);
        assert_eq!(m.error, 20);
        assert_eq!(m.absolute_error, 20);
        assert_eq!(m.error_pct, Some(20.0));
    }

    #[test]
    fn over_forecast_has_negative_error() {
        let m = AccuracyMeasurement::measure(150, 100);
        assert_eq!(m.error, -50);
        assert_eq!(m.error_pct, Some(50.0));
    }

    #[test]
    fn zero_actuals() {
        assert_eq!(AccuracyMeasurement::measure(0, 0).error_pct, Some(0.0));
        assert_eq!(AccuracyMeasurement::measure(10, 0).error_pct, None);
    }

    #[test]
    fn summary_averages_defined_percentages() {
        let ms = [
            AccuracyMeasurement::measure(80, 100),
            AccuracyMeasurement::measure(150, 100),
            AccuracyMeasurement::measure(10, 0),
        ];
        let s = AccuracySummary::from_measurements(&ms);
        assert_eq!(s.count, 3);
        assert!((s.mean_absolute_error - 80.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.mape, Some(35.0));
        assert_eq!(s.bias, 20 - 50 - 10);
    }

    #[test]
    fn empty_summary() {
        assert_eq!(AccuracySummary::from_measurements(Vec::<AccuracyMeasurement>::new().iter()), AccuracySummary::default());
    }
}
