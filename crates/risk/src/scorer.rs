use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use osas_core::Money;

/// Coarse risk band derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Level boundaries and the limit haircut applied at each band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub medium_from: u8,
    pub high_from: u8,
    pub critical_from: u8,
    /// Percentage of the current limit recommended at `High`.
    pub high_limit_pct: u8,
    /// Percentage of the current limit recommended at `Critical`.
    pub critical_limit_pct: u8,
    /// Days of repayment history considered.
    pub window_days: u32,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            medium_from: 25,
            high_from: 50,
            critical_from: 75,
            high_limit_pct: 75,
            critical_limit_pct: 50,
            window_days: 180,
        }
    }
}

impl RiskPolicy {
    pub fn level_for(&self, score: u8) -> RiskLevel {
        if score >= self.critical_from {
            RiskLevel::Critical
        } else if score >= self.high_from {
            RiskLevel::High
        } else if score >= self.medium_from {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Normalised scorer inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskInputs {
    pub on_time_count: u32,
    pub late_count: u32,
    pub average_delay_days: u32,
    pub dispute_count: u32,
    /// Returned orders over delivered orders, in basis points.
    pub return_rate_bps: u32,
    /// Highest observed (used + held) / limit, in basis points.
    pub utilization_peak_bps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
}

/// One obligation settled in full (paid, not written off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentRecord {
    pub due_date: NaiveDate,
    pub settled_on: NaiveDate,
}

impl RepaymentRecord {
    pub fn delay_days(&self) -> u32 {
        let days = (self.settled_on - self.due_date).num_days();
        u32::try_from(days.max(0)).unwrap_or(u32::MAX)
    }
}

/// Raw buyer history as accumulated by the read side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerActivity {
    pub repayments: Vec<RepaymentRecord>,
    /// Obligations currently overdue; counted as late with their running delay.
    pub open_overdue_days: Vec<u32>,
    pub dispute_count: u32,
    pub orders_delivered: u32,
    pub orders_returned: u32,
    pub utilization_peak_bps: u32,
}

impl BuyerActivity {
    /// Reduce history to scorer inputs, keeping repayments due on or after `window_start`.
    pub fn inputs(&self, window_start: NaiveDate) -> RiskInputs {
        let mut on_time = 0u32;
        let mut late = 0u32;
        let mut delay_total = 0u64;

        for r in self.repayments.iter().filter(|r| r.due_date >= window_start) {
            match r.delay_days() {
                0 => on_time += 1,
                d => {
                    late += 1;
                    delay_total += u64::from(d);
                }
            }
        }
        for d in &self.open_overdue_days {
            late += 1;
            delay_total += u64::from(*d);
        }

        let average_delay_days = if late == 0 {
            0
        } else {
            u32::try_from(delay_total / u64::from(late)).unwrap_or(u32::MAX)
        };

        let return_rate_bps = if self.orders_delivered == 0 {
            0
        } else {
            let rate = u64::from(self.orders_returned) * 10_000 / u64::from(self.orders_delivered);
            u32::try_from(rate.min(10_000)).unwrap_or(10_000)
        };

        RiskInputs {
            on_time_count: on_time,
            late_count: late,
            average_delay_days,
            dispute_count: self.dispute_count,
            return_rate_bps,
            utilization_peak_bps: self.utilization_peak_bps,
        }
    }
}

const LATE_WEIGHT: u64 = 35;
const DELAY_WEIGHT: u64 = 25;
const DISPUTE_WEIGHT: u64 = 15;
const RETURN_WEIGHT: u64 = 10;
const UTILIZATION_WEIGHT: u64 = 15;

const DELAY_SATURATION_DAYS: u64 = 30;
const DISPUTE_SATURATION: u64 = 5;

/// Score a buyer in `[0, 100]`; higher is riskier.
///
/// Weighted sum of five saturating components, computed in thousandths and
/// floored once at the end so the result is deterministic.
pub fn score(inputs: &RiskInputs, policy: &RiskPolicy) -> RiskAssessment {
    let repayments = u64::from(inputs.on_time_count) + u64::from(inputs.late_count);
    let late = if repayments == 0 {
        0
    } else {
        LATE_WEIGHT * 1000 * u64::from(inputs.late_count) / repayments
    };

    let delay = DELAY_WEIGHT * 1000 * u64::from(inputs.average_delay_days).min(DELAY_SATURATION_DAYS)
        / DELAY_SATURATION_DAYS;
    let disputes = DISPUTE_WEIGHT * 1000 * u64::from(inputs.dispute_count).min(DISPUTE_SATURATION)
        / DISPUTE_SATURATION;
    let returns = RETURN_WEIGHT * 1000 * u64::from(inputs.return_rate_bps).min(10_000) / 10_000;
    let utilization =
        UTILIZATION_WEIGHT * 1000 * u64::from(inputs.utilization_peak_bps).min(10_000) / 10_000;

    let total = (late + delay + disputes + returns + utilization) / 1000;
    let score = u8::try_from(total.min(100)).unwrap_or(100);

    RiskAssessment {
        score,
        level: policy.level_for(score),
    }
}

/// Advisory limit for a level. `None` unless it is a decrease.
pub fn recommend_limit(current: Money, level: RiskLevel, policy: &RiskPolicy) -> Option<Money> {
    let pct = match level {
        RiskLevel::Low | RiskLevel::Medium => return None,
        RiskLevel::High => policy.high_limit_pct,
        RiskLevel::Critical => policy.critical_limit_pct,
    };
    let recommended = Money::new(current.minor() / 100 * u64::from(pct)
        + current.minor() % 100 * u64::from(pct) / 100);
    (recommended < current).then_some(recommended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn clean_history_scores_low() {
        let inputs = RiskInputs {
            on_time_count: 12,
            utilization_peak_bps: 4_000,
            ..RiskInputs::default()
        };
        let a = score(&inputs, &RiskPolicy::default());
        assert_eq!(a.score, 6);
        assert_eq!(a.level, RiskLevel::Low);
    }

    #[test]
    fn chronic_lateness_scores_critical() {
        let inputs = RiskInputs {
            on_time_count: 1,
            late_count: 9,
            average_delay_days: 45,
            dispute_count: 3,
            return_rate_bps: 2_000,
            utilization_peak_bps: 10_000,
        };
        // 31.5 + 25 + 9 + 2 + 15 = 82.5
        let a = score(&inputs, &RiskPolicy::default());
        assert_eq!(a.score, 82);
        assert_eq!(a.level, RiskLevel::Critical);
    }

    #[test]
    fn activity_window_drops_old_repayments() {
        let activity = BuyerActivity {
            repayments: vec![
                RepaymentRecord { due_date: date(2024, 1, 1), settled_on: date(2024, 2, 1) },
                RepaymentRecord { due_date: date(2024, 6, 1), settled_on: date(2024, 6, 1) },
                RepaymentRecord { due_date: date(2024, 7, 1), settled_on: date(2024, 7, 11) },
            ],
            open_overdue_days: vec![20],
            orders_delivered: 10,
            orders_returned: 1,
            ..BuyerActivity::default()
        };
        let inputs = activity.inputs(date(2024, 5, 1));
        assert_eq!(inputs.on_time_count, 1);
        assert_eq!(inputs.late_count, 2);
        assert_eq!(inputs.average_delay_days, 15);
        assert_eq!(inputs.return_rate_bps, 1_000);
    }

    #[test]
    fn recommendations_only_decrease() {
        let policy = RiskPolicy::default();
        assert_eq!(recommend_limit(Money::new(100_000), RiskLevel::Medium, &policy), None);
        assert_eq!(
            recommend_limit(Money::new(100_000), RiskLevel::High, &policy),
            Some(Money::new(75_000))
        );
        assert_eq!(
            recommend_limit(Money::new(100_001), RiskLevel::Critical, &policy),
            Some(Money::new(50_000))
        );
        assert_eq!(recommend_limit(Money::ZERO, RiskLevel::Critical, &policy), None);
    }

    proptest! {
        #[test]
        fn score_is_bounded(
            on_time in 0u32..1_000,
            late in 0u32..1_000,
            delay in 0u32..10_000,
            disputes in 0u32..100,
            returns in 0u32..20_000,
            util in 0u32..20_000,
        ) {
            let a = score(&RiskInputs {
                on_time_count: on_time,
                late_count: late,
                average_delay_days: delay,
                dispute_count: disputes,
                return_rate_bps: returns,
                utilization_peak_bps: util,
            }, &RiskPolicy::default());
            prop_assert!(a.score <= 100);
        }

        #[test]
        fn one_more_late_payment_never_lowers_score(on_time in 0u32..200, late in 0u32..200) {
            let policy = RiskPolicy::default();
            let base = RiskInputs { on_time_count: on_time, late_count: late, ..RiskInputs::default() };
            let worse = RiskInputs { late_count: late + 1, ..base.clone() };
            prop_assert!(score(&worse, &policy).score >= score(&base, &policy).score);
        }
    }
}
