//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! impl_uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

/// Identifier of a stream-backed aggregate, wrapping `AggregateId`.
macro_rules! impl_aggregate_newtype {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub AggregateId);

        impl $t {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(AggregateId::new())
            }

            pub fn aggregate_id(&self) -> AggregateId {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<AggregateId> for $t {
            fn from(value: AggregateId) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(AggregateId::from_str(s)?))
            }
        }
    };
}

impl_uuid_newtype!(
    /// Identifier of a tenant (multi-tenant boundary).
    TenantId,
    "TenantId"
);
impl_uuid_newtype!(
    /// Identifier of a user (actor identity, e.g. an approver).
    UserId,
    "UserId"
);
impl_uuid_newtype!(
    /// Identifier of an aggregate root stream.
    AggregateId,
    "AggregateId"
);

// Identifiers owned by external collaborators (catalog, parties, support).
impl_uuid_newtype!(OrderId, "OrderId");
impl_uuid_newtype!(SellerId, "SellerId");
impl_uuid_newtype!(
    /// Retailer or interior designer id (see `BuyerKind`).
    BuyerId,
    "BuyerId"
);
impl_uuid_newtype!(AgentId, "AgentId");
impl_uuid_newtype!(InvoiceId, "InvoiceId");
impl_uuid_newtype!(DisputeId, "DisputeId");

// Entities living inside another aggregate's stream.
impl_uuid_newtype!(ReservationId, "ReservationId");
impl_uuid_newtype!(BatchId, "BatchId");

impl_aggregate_newtype!(CreditAccountId);
impl_aggregate_newtype!(ObligationId);
impl_aggregate_newtype!(EmiPlanId);
impl_aggregate_newtype!(RecoveryCaseId);

impl OrderId {
    /// Delivery verifications are keyed one-per-order.
    pub fn delivery_stream(&self) -> AggregateId {
        AggregateId::from_uuid(self.0)
    }

    /// An order draws on credit through exactly one reservation, keyed by the order.
    pub fn reservation(&self) -> ReservationId {
        ReservationId(self.0)
    }
}

impl ReservationId {
    /// The order this reservation holds credit for.
    pub fn order(&self) -> OrderId {
        OrderId(self.0)
    }
}

impl SellerId {
    /// Settlement state is kept in one stream per seller.
    pub fn settlement_stream(&self) -> AggregateId {
        AggregateId::from_uuid(self.0)
    }
}

/// Namespace for recovery case ids derived from obligation ids.
const RECOVERY_CASE_NAMESPACE: Uuid = Uuid::from_u128(0x6f3c_1e2a_94b7_4d0e_8a51_2c7d_b0e4_9f13);

impl ObligationId {
    /// At most one recovery case exists per obligation. The case id is a
    /// name-based UUID of the obligation id, so it gets its own stream.
    pub fn recovery_case(&self) -> RecoveryCaseId {
        let id = Uuid::new_v5(&RECOVERY_CASE_NAMESPACE, self.0.as_uuid().as_bytes());
        RecoveryCaseId(AggregateId::from_uuid(id))
    }
}
