use serde::{Deserialize, Serialize};

/// Days-overdue band, e.g. `1-7`, `8-30`, `31+`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverdueBucket {
    pub from_days: u32,
    pub to_days: Option<u32>,
}

impl OverdueBucket {
    /// `thresholds` are ascending lower bounds. `None` below the first one.
    pub fn classify(days_overdue: u32, thresholds: &[u32]) -> Option<Self> {
        let idx = thresholds.iter().rposition(|t| days_overdue >= *t)?;
        Some(Self {
            from_days: thresholds[idx],
            to_days: thresholds.get(idx + 1).map(|next| next.saturating_sub(1)),
        })
    }
}

impl core::fmt::Display for OverdueBucket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.to_days {
            Some(to) => write!(f, "{}-{}", self.from_days, to),
            None => write!(f, "{}+", self.from_days),
        }
    }
}
