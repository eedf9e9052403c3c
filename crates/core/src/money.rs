//! Money and rate value objects.
//!
//! All amounts are integer minor units of a single settlement currency.
//! Fractional results (fees, interest, penalties) are floored.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Non-negative amount in minor units.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn new(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn minor(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money underflow"))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// Split into `parts` equal shares, floored. Remainder is returned separately.
    pub fn split(self, parts: u32) -> DomainResult<(Money, Money)> {
        if parts == 0 {
            return Err(DomainError::validation("cannot split into zero parts"));
        }
        let share = self.0 / u64::from(parts);
        let remainder = self.0 - share * u64::from(parts);
        Ok((Money(share), Money(remainder)))
    }

    /// Multiply by an integer factor.
    pub fn times(self, factor: u64) -> DomainResult<Money> {
        self.0
            .checked_mul(factor)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl core::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc.saturating_add(m))
    }
}

/// Rate in basis points (1 bps = 0.01%).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate {
    bps: u32,
}

impl Rate {
    pub const fn from_bps(bps: u32) -> Self {
        Self { bps }
    }

    pub const fn bps(&self) -> u32 {
        self.bps
    }

    /// Apply the rate to an amount, flooring the result.
    pub fn of(&self, amount: Money) -> Money {
        let value = u128::from(amount.minor()) * u128::from(self.bps) / 10_000;
        Money(u64::try_from(value).unwrap_or(u64::MAX))
    }
}

/// Who the credit line belongs to. Both kinds share the same credit rules.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerKind {
    Retailer,
    Designer,
}
