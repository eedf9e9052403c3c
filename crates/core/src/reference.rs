//! Typed reference linking ledger movements to their business source.

use serde::{Deserialize, Serialize};

use crate::id::{DisputeId, EmiPlanId, InvoiceId, OrderId};

/// Every movement of credit or money carries one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LedgerReference {
    Order(OrderId),
    Invoice(InvoiceId),
    EmiPlan(EmiPlanId),
    Dispute(DisputeId),
}

impl LedgerReference {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerReference::Order(_) => "order",
            LedgerReference::Invoice(_) => "invoice",
            LedgerReference::EmiPlan(_) => "emi_plan",
            LedgerReference::Dispute(_) => "dispute",
        }
    }
}

impl core::fmt::Display for LedgerReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LedgerReference::Order(id) => write!(f, "order:{id}"),
            LedgerReference::Invoice(id) => write!(f, "invoice:{id}"),
            LedgerReference::EmiPlan(id) => write!(f, "emi_plan:{id}"),
            LedgerReference::Dispute(id) => write!(f, "dispute:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_serializes_with_kind_tag() {
        let order = OrderId::new();
        let json = serde_json::to_value(LedgerReference::Order(order)).unwrap();
        assert_eq!(json["kind"], "order");
        assert_eq!(json["id"], order.to_string());
    }
}
