//! Support tickets for failures that need a human.
//!
//! A bank reconciliation mismatch never touches a balance; it lands here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{RejectionCode, TenantId};

use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportTicket {
    pub ticket_id: Uuid,
    pub code: RejectionCode,
    pub entity_id: String,
    pub detail: String,
    pub opened_at: DateTime<Utc>,
}

pub trait SupportTicketStore: Send + Sync {
    fn open(
        &self,
        tenant_id: TenantId,
        code: RejectionCode,
        entity_id: String,
        detail: String,
        opened_at: DateTime<Utc>,
    ) -> SupportTicket;

    /// Oldest first.
    fn list(&self, tenant_id: TenantId) -> Vec<SupportTicket>;
}

impl<T> SupportTicketStore for Arc<T>
where
    T: SupportTicketStore + ?Sized,
{
    fn open(
        &self,
        tenant_id: TenantId,
        code: RejectionCode,
        entity_id: String,
        detail: String,
        opened_at: DateTime<Utc>,
    ) -> SupportTicket {
        (**self).open(tenant_id, code, entity_id, detail, opened_at)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<SupportTicket> {
        (**self).list(tenant_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySupportTickets {
    tickets: InMemoryTenantStore<Uuid, SupportTicket>,
}

impl InMemorySupportTickets {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SupportTicketStore for InMemorySupportTickets {
    fn open(
        &self,
        tenant_id: TenantId,
        code: RejectionCode,
        entity_id: String,
        detail: String,
        opened_at: DateTime<Utc>,
    ) -> SupportTicket {
        let ticket = SupportTicket {
            ticket_id: Uuid::now_v7(),
            code,
            entity_id,
            detail,
            opened_at,
        };
        self.tickets.upsert(tenant_id, ticket.ticket_id, ticket.clone());
        ticket
    }

    fn list(&self, tenant_id: TenantId) -> Vec<SupportTicket> {
        let mut tickets = self.tickets.list(tenant_id);
        tickets.sort_by_key(|t| (t.opened_at, t.ticket_id));
        tickets
    }
}
