//! Bank-transfer gateway port.
//!
//! The engine hands a batch payload to the gateway only after `SentToBank`
//! is committed, and never while holding any lock. Completion arrives later
//! through reconciliation.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use osas_core::{BatchId, Money, SellerId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No answer within the gateway deadline; the transfer may still land.
    #[error("bank gateway timed out")]
    Timeout,

    #[error("bank gateway unavailable: {0}")]
    Unavailable(String),

    #[error("bank rejected transfer: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout)
    }

    /// A rejected payload will be rejected again unchanged.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_))
    }
}

/// Payload handed to the bank for one batch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub bank_reference: String,
    pub net_amount: Money,
    pub attempt: u32,
}

pub trait BankTransferGateway: Send + Sync {
    fn submit(&self, instruction: &TransferInstruction) -> Result<(), GatewayError>;
}

impl<G> BankTransferGateway for Arc<G>
where
    G: BankTransferGateway + ?Sized,
{
    fn submit(&self, instruction: &TransferInstruction) -> Result<(), GatewayError> {
        (**self).submit(instruction)
    }
}

/// Records submissions; can be told to fail the next call.
#[derive(Debug, Default)]
pub struct InMemoryBankGateway {
    submitted: Mutex<Vec<TransferInstruction>>,
    fail_next: Mutex<Option<GatewayError>>,
}

impl InMemoryBankGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: GatewayError) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn submitted(&self) -> Vec<TransferInstruction> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BankTransferGateway for InMemoryBankGateway {
    /// A timed-out instruction still reaches the bank; other failures do not.
    fn submit(&self, instruction: &TransferInstruction) -> Result<(), GatewayError> {
        let failure = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(err) = failure.as_ref().filter(|e| !e.is_timeout()) {
            return Err(err.clone());
        }
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instruction.clone());
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction() -> TransferInstruction {
        TransferInstruction {
            tenant_id: TenantId::new(),
            seller_id: SellerId::new(),
            batch_id: BatchId::new(),
            bank_reference: "SETL-1".to_string(),
            net_amount: Money::new(9_800),
            attempt: 1,
        }
    }

    #[test]
    fn timeout_still_lands_at_the_bank() {
        let bank = InMemoryBankGateway::new();
        bank.fail_next(GatewayError::Timeout);
        assert_eq!(bank.submit(&instruction()), Err(GatewayError::Timeout));
        assert_eq!(bank.submitted().len(), 1);
        assert!(bank.submit(&instruction()).is_ok());
        assert_eq!(bank.submitted().len(), 2);
    }

    #[test]
    fn unavailable_gateway_records_nothing() {
        let bank = InMemoryBankGateway::new();
        bank.fail_next(GatewayError::Unavailable("maintenance".to_string()));
        assert!(bank.submit(&instruction()).is_err());
        assert!(bank.submitted().is_empty());
    }
}
