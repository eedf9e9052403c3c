//! Tenant-partitioned storage behind the disposable read models.
//!
//! Everything here can be dropped and rebuilt from the ledger.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
