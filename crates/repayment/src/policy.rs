use serde::{Deserialize, Serialize};

use osas_core::Rate;

/// Tunable repayment rules. Every value is configuration; none is assumed by
/// the aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepaymentPolicy {
    /// Simple daily penalty on outstanding principal.
    pub penalty_rate_bps_per_day: u32,
    /// Maximum number of penalty days charged per obligation.
    pub penalty_cap_days: u32,
    pub max_skips_allowed: u32,
    pub skip_extension_days: u32,
    /// Overdue obligations are converted to EMI automatically after this many days.
    pub emi_auto_trigger_days: Option<u32>,
    pub emi_default_tenure_months: u32,
    /// Longest tenure a conversion may ask for.
    pub emi_max_tenure_months: u32,
    /// Flat monthly interest on the converted principal.
    pub emi_monthly_interest_bps: u32,
    /// Missed installments after which a plan defaults.
    pub emi_default_after_missed: u32,
}

impl RepaymentPolicy {
    pub fn penalty_rate(&self) -> Rate {
        Rate::from_bps(self.penalty_rate_bps_per_day)
    }

    pub fn emi_monthly_interest(&self) -> Rate {
        Rate::from_bps(self.emi_monthly_interest_bps)
    }

    pub fn allows_tenure(&self, tenure_months: u32) -> bool {
        (1..=self.emi_max_tenure_months).contains(&tenure_months)
    }
}

impl Default for RepaymentPolicy {
    fn default() -> Self {
        Self {
            penalty_rate_bps_per_day: 100,
            penalty_cap_days: 5,
            max_skips_allowed: 2,
            skip_extension_days: 7,
            emi_auto_trigger_days: Some(60),
            emi_default_tenure_months: 3,
            emi_max_tenure_months: 36,
            emi_monthly_interest_bps: 150,
            emi_default_after_missed: 2,
        }
    }
}
