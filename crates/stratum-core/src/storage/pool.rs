//! Pooled, time-bounded access to a record store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use super::{
    AggregateRequest, Record, RecordStore, SelectQuery, StorageError, StorageResult,
};
use crate::compiler::CompiledTable;
use crate::security::RowFilter;

/// Configuration for the storage pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrent leases.
    pub max_leases: usize,
    /// Timeout for acquiring a lease.
    pub acquire_timeout: Duration,
    /// Timeout for each storage call made through a lease.
    pub call_timeout: Duration,
}

impl PoolConfig {
    /// Set the maximum number of concurrent leases.
    pub fn with_max_leases(mut self, max: usize) -> Self {
        self.max_leases = max;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_leases: 16,
            acquire_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// A pool of leases on a shared record store.
#[derive(Clone)]
pub struct StoragePool {
    store: Arc<dyn RecordStore>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
}

impl StoragePool {
    /// Create a pool over `store`.
    pub fn new(store: Arc<dyn RecordStore>, config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_leases.max(1)));
        Self {
            store,
            semaphore,
            config,
        }
    }

    /// Acquire a lease, waiting at most the configured acquire timeout.
    pub async fn lease(&self) -> StorageResult<StorageLease> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match tokio::time::timeout(self.config.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StorageError::Unavailable("pool is closed".to_string())),
            Err(_) => {
                warn!(
                    timeout = ?self.config.acquire_timeout,
                    "timed out waiting for a storage lease"
                );
                return Err(StorageError::Unavailable(
                    "no storage lease available".to_string(),
                ));
            }
        };
        Ok(StorageLease {
            store: Arc::clone(&self.store),
            call_timeout: self.config.call_timeout,
            _permit: permit,
        })
    }

    /// Number of leases that could be handed out right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Close the pool; pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Exclusive slot on the store; the slot is returned when the lease drops.
pub struct StorageLease {
    store: Arc<dyn RecordStore>,
    call_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl StorageLease {
    async fn bounded<T>(&self, call: impl Future<Output = StorageResult<T>>) -> StorageResult<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.call_timeout, "storage call timed out");
                Err(StorageError::Timeout(self.call_timeout))
            }
        }
    }

    /// See [`RecordStore::select`].
    pub async fn select(&self, table: &CompiledTable, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        self.bounded(self.store.select(table, query)).await
    }

    /// See [`RecordStore::count`].
    pub async fn count(&self, table: &CompiledTable, filter: &RowFilter) -> StorageResult<u64> {
        self.bounded(self.store.count(table, filter)).await
    }

    /// See [`RecordStore::aggregate`].
    pub async fn aggregate(
        &self,
        table: &CompiledTable,
        filter: &RowFilter,
        requests: &[AggregateRequest],
    ) -> StorageResult<Record> {
        self.bounded(self.store.aggregate(table, filter, requests)).await
    }

    /// See [`RecordStore::insert`].
    pub async fn insert(&self, table: &CompiledTable, values: Record) -> StorageResult<Record> {
        self.bounded(self.store.insert(table, values)).await
    }

    /// See [`RecordStore::update`].
    pub async fn update(
        &self,
        table: &CompiledTable,
        id: &str,
        values: Record,
    ) -> StorageResult<Option<Record>> {
        self.bounded(self.store.update(table, id, values)).await
    }

    /// See [`RecordStore::delete`].
    pub async fn delete(&self, table: &CompiledTable, id: &str) -> StorageResult<bool> {
        self.bounded(self.store.delete(table, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        async fn select(&self, _: &CompiledTable, _: &SelectQuery) -> StorageResult<Vec<Record>> {
            std::future::pending().await
        }
        async fn count(&self, _: &CompiledTable, _: &RowFilter) -> StorageResult<u64> {
            std::future::pending().await
        }
        async fn aggregate(
            &self,
            _: &CompiledTable,
            _: &RowFilter,
            _: &[AggregateRequest],
        ) -> StorageResult<Record> {
            std::future::pending().await
        }
        async fn insert(&self, _: &CompiledTable, _: Record) -> StorageResult<Record> {
            std::future::pending().await
        }
        async fn update(&self, _: &CompiledTable, _: &str, _: Record) -> StorageResult<Option<Record>> {
            std::future::pending().await
        }
        async fn delete(&self, _: &CompiledTable, _: &str) -> StorageResult<bool> {
            std::future::pending().await
        }
    }

    fn table() -> CompiledTable {
        use crate::catalog::{AppSchema, TableDefinition};
        let schema = AppSchema::new("t").with_table(TableDefinition::new(1, "items"));
        crate::compiler::compile(&schema).unwrap().tables()[0].clone()
    }

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let pool = StoragePool::new(
            Arc::new(MemoryStore::new()),
            PoolConfig::default().with_max_leases(1),
        );
        let lease = pool.lease().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(lease);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_is_unavailable() {
        let pool = StoragePool::new(
            Arc::new(MemoryStore::new()),
            PoolConfig::default()
                .with_max_leases(1)
                .with_acquire_timeout(Duration::from_millis(20)),
        );
        let _held = pool.lease().await.unwrap();
        let err = pool.lease().await.err().unwrap();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let pool = StoragePool::new(
            Arc::new(StalledStore),
            PoolConfig::default().with_call_timeout(Duration::from_millis(20)),
        );
        let lease = pool.lease().await.unwrap();
        let err = lease
            .count(&table(), &RowFilter::True)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Timeout(Duration::from_millis(20)));
        drop(lease);
        assert_eq!(pool.available(), PoolConfig::default().max_leases);
    }
}
