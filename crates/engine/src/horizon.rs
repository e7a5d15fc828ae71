use serde::{Deserialize, Serialize};

/// Forecast horizons reported for every SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    Days30,
    Days60,
    Days90,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Days30, Horizon::Days60, Horizon::Days90];

    pub fn days(self) -> u32 {
        match self {
            Horizon::Days30 => 30,
            Horizon::Days60 => 60,
            Horizon::Days90 => 90,
        }
    }

    /// Confidence penalty for projecting further out.
    pub fn confidence_decay(self) -> i32 {
        match self {
            Horizon::Days30 => 0,
            Horizon::Days60 => -10,
            Horizon::Days90 => -20,
        }
    }

    /// Position within [`Horizon::ALL`].
    pub fn index(self) -> usize {
        match self {
            Horizon::Days30 => 0,
            Horizon::Days60 => 1,
            Horizon::Days90 => 2,
        }
    }

    pub fn from_days(days: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.days() == days)
    }
}

impl core::fmt::Display for Horizon {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}d", self.days())
    }
}
