use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use osas_core::TenantId;

/// Key/value rows partitioned by tenant. A lookup never crosses tenants.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;

    fn upsert(&self, tenant_id: TenantId, key: K, value: V);

    /// Rows of one tenant, in no particular order.
    fn list(&self, tenant_id: TenantId) -> Vec<V>;

    /// Read-modify-write of an existing row under one lock.
    /// Returns the updated row, or `None` when the key is unknown.
    fn modify<F>(&self, tenant_id: TenantId, key: &K, f: F) -> Option<V>
    where
        F: FnOnce(&mut V);

    /// Like `modify`, seeding the row with `init` when absent.
    fn modify_or_insert<I, F>(&self, tenant_id: TenantId, key: K, init: I, f: F) -> V
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V);

    /// Drop a tenant's partition (replay support).
    fn clear_tenant(&self, tenant_id: TenantId);
}

/// Process-local store; one map per tenant.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    partitions: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Row count for one tenant.
    pub fn row_count(&self, tenant_id: TenantId) -> usize {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant_id)
            .map_or(0, HashMap::len)
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant_id)?
            .get(key)
            .cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id)
            .or_default()
            .insert(key, value);
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn modify<F>(&self, tenant_id: TenantId, key: &K, f: F) -> Option<V>
    where
        F: FnOnce(&mut V),
    {
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let row = partitions.get_mut(&tenant_id)?.get_mut(key)?;
        f(row);
        Some(row.clone())
    }

    fn modify_or_insert<I, F>(&self, tenant_id: TenantId, key: K, init: I, f: F) -> V
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let row = partitions
            .entry(tenant_id)
            .or_default()
            .entry(key)
            .or_insert_with(init);
        f(row);
        row.clone()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tenant_id);
    }
}
