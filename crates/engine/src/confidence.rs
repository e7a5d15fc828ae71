//! Evidence-based confidence scoring (0..=100).

use serde::{Deserialize, Serialize};

use crate::horizon::Horizon;

pub const BASE_CONFIDENCE: i32 = 50;

/// Evidence counts the score is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceInputs {
    pub history_days: u32,
    pub trailing_units: i64,
    pub pipeline_lines: usize,
    pub confirmed_lines: usize,
}

/// Additive components of the score before horizon decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    pub base: i32,
    pub history_depth: i32,
    pub recent_sales: i32,
    pub pipeline_presence: i32,
    pub pipeline_breadth: i32,
    pub confirmed_orders: i32,
}

impl ConfidenceComponents {
    pub fn from_inputs(inputs: ConfidenceInputs) -> Self {
        let history_depth = match inputs.history_days {
            d if d >= 25 => 15,
            d if d >= 15 => 8,
            d if d >= 7 => 3,
            _ => 0,
        };

        Self {
            base: BASE_CONFIDENCE,
            history_depth,
            recent_sales: if inputs.trailing_units > 0 { 10 } else { 0 },
            pipeline_presence: if inputs.pipeline_lines >= 1 { 10 } else { 0 },
            pipeline_breadth: if inputs.pipeline_lines >= 3 { 5 } else { 0 },
            confirmed_orders: if inputs.confirmed_lines >= 1 { 15 } else { 0 },
        }
    }

    pub fn subtotal(&self) -> i32 {
        self.base
            + self.history_depth
            + self.recent_sales
            + self.pipeline_presence
            + self.pipeline_breadth
            + self.confirmed_orders
    }

    /// Score for `horizon`, clamped to 0..=100.
    pub fn score(&self, horizon: Horizon) -> u8 {
        (self.subtotal() + horizon.confidence_decay()).clamp(0, 100) as u8
    }
}

/// Components plus the per-horizon scores they produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    pub inputs: ConfidenceInputs,
    pub components: ConfidenceComponents,
    /// Indexed in `Horizon::ALL` order.
    pub scores: [u8; 3],
}

impl ConfidenceAssessment {
    pub fn assess(inputs: ConfidenceInputs) -> Self {
        let components = ConfidenceComponents::from_inputs(inputs);
        Self {
            inputs,
            components,
            scores: Horizon::ALL.map(|h| components.score(h)),
        }
    }

    pub fn score(&self, horizon: Horizon) -> u8 {
        self.scores[horizon.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inputs(history_days: u32, trailing_units: i64, pipeline: usize, confirmed: usize) -> ConfidenceInputs {
        ConfidenceInputs {
            history_days,
            trailing_units,
            pipeline_lines: pipeline,
            confirmed_lines: confirmed,
        }
    }

    #[test]
    fn no_evidence_scores_base_minus_decay() {
        let c = ConfidenceComponents::from_inputs(inputs(0, 0, 0, 0));
        assert_eq!(c.score(Horizon::Days30), 50);
        assert_eq!(c.score(Horizon::Days60), 40);
        assert_eq!(c.score(Horizon::Days90), 30);
    }

    #[test]
    fn history_depth_tiers() {
        let depth = |d| ConfidenceComponents::from_inputs(inputs(d, 0, 0, 0)).history_depth;
        assert_eq!(depth(6), 0);
        assert_eq!(depth(7), 3);
        assert_eq!(depth(14), 3);
        assert_eq!(depth(15), 8);
        assert_eq!(depth(24), 8);
        assert_eq!(depth(25), 15);
    }

    #[test]
    fn full_evidence_is_clamped_to_100() {
        let c = ConfidenceComponents::from_inputs(inputs(30, 300, 3, 1));
        assert_eq!(c.subtotal(), 105);
        assert_eq!(c.score(Horizon::Days30), 100);
        assert_eq!(c.score(Horizon::Days60), 95);
        assert_eq!(c.score(Horizon::Days90), 85);
    }

    #[test]
    fn pipeline_breadth_needs_three_lines() {
        let c = ConfidenceComponents::from_inputs(inputs(0, 0, 2, 0));
        assert_eq!((c.pipeline_presence, c.pipeline_breadth), (10, 0));
        let c = ConfidenceComponents::from_inputs(inputs(0, 0, 3, 0));
        assert_eq!((c.pipeline_presence, c.pipeline_breadth), (10, 5));
    }

    #[test]
    fn assessment_records_scores_per_horizon() {
        let a = ConfidenceAssessment::assess(inputs(10, 5, 1, 0));
        assert_eq!(a.components.subtotal(), 73);
        assert_eq!(a.scores, [73, 63, 53]);
        assert_eq!(a.score(Horizon::Days60), 63);
    }

    proptest! {
        #[test]
        fn score_is_bounded_and_decays_with_horizon(
            days in 0u32..400,
            units in 0i64..100_000,
            pipeline in 0usize..20,
            confirmed in 0usize..20,
        ) {
            let c = ConfidenceComponents::from_inputs(inputs(days, units, pipeline, confirmed));
            let (s30, s60, s90) = (c.score(Horizon::Days30), c.score(Horizon::Days60), c.score(Horizon::Days90));
            prop_assert!(s30 <= 100);
            prop_assert!(s90 <= s60 && s60 <= s30);
        }
    }
}
