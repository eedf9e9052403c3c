use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use osas_core::{Money, ObligationId, OrderId, ReservationId, SellerId};

/// Reservation lifecycle. Only `Reserved` holds credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Reserved,
    Committed,
    Released,
    /// Auto-released by the TTL sweep.
    Expired,
}

/// A hold on available credit for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub amount: Money,
    pub state: ReservationState,
    pub reserved_at: DateTime<Utc>,
    /// Set once committed.
    pub obligation_id: Option<ObligationId>,
}

impl Reservation {
    /// Whether the hold has outlived `ttl` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.state == ReservationState::Reserved && self.reserved_at + ttl <= now
    }
}
