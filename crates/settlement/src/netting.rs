//! Deterministic settlement netting.
//!
//! `net = Σ line amounts − Σ per-line fees − applied adjustments`. Fees are
//! floored per line, and adjustments never push a batch below zero.

use osas_core::{Money, Rate};

use crate::batch::{AppliedAdjustment, BatchLine, PendingAdjustment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Netting {
    pub gross: Money,
    pub fee: Money,
    pub adjustments: Money,
    pub net: Money,
}

pub fn line_fee(line: &BatchLine, fee_rate: Rate) -> Money {
    fee_rate.of(line.amount)
}

pub fn compute_net(lines: &[BatchLine], fee_rate: Rate, applied: &[AppliedAdjustment]) -> Netting {
    let gross: Money = lines.iter().map(|l| l.amount).sum();
    let fee: Money = lines.iter().map(|l| line_fee(l, fee_rate)).sum();
    let adjustments: Money = applied.iter().map(|a| a.amount).sum();
    Netting {
        gross,
        fee,
        adjustments,
        net: gross.saturating_sub(fee).saturating_sub(adjustments),
    }
}

/// Apply pending adjustments in recording order against `room` (gross − fee).
/// An adjustment that does not fit is applied partially; the rest carries forward.
pub fn allocate_adjustments(pending: &[PendingAdjustment], room: Money) -> Vec<AppliedAdjustment> {
    let mut left = room;
    let mut applied = Vec::new();
    for adj in pending {
        if left.is_zero() {
            break;
        }
        let take = adj.amount.min(left);
        if take.is_zero() {
            continue;
        }
        left = left.saturating_sub(take);
        applied.push(AppliedAdjustment {
            adjustment_id: adj.adjustment_id,
            amount: take,
        });
    }
    applied
}
