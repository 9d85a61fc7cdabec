use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use super::{DomainRecord, MailboxRecord, RecordStore};
use crate::{AppError, AppResult};

/// In-process record store.
///
/// Used by the test suites and for dry runs without a database. It can be
/// switched offline and given an artificial latency to exercise the
/// fail-safe and timeout paths of the lookup engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: RwLock<HashMap<String, DomainRecord>>,
    mailboxes: RwLock<HashMap<String, MailboxRecord>>,
    offline: AtomicBool,
    latency: RwLock<Option<Duration>>,
    queries: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_domain(&self, record: DomainRecord) {
        self.domains
            .write()
            .insert(record.name.to_lowercase(), record);
    }

    pub fn insert_mailbox(&self, record: MailboxRecord) {
        self.mailboxes
            .write()
            .insert(record.email.to_lowercase(), record);
    }

    pub fn remove_domain(&self, name: &str) -> Option<DomainRecord> {
        self.domains.write().remove(&name.to_lowercase())
    }

    /// Simulates losing (`false`) or regaining (`true`) the connection.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Release);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Number of queries that reached the store, failed ones included.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Acquire)
    }

    async fn begin_query(&self) -> AppResult<()> {
        self.queries.fetch_add(1, Ordering::AcqRel);
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::Acquire) {
            return Err(AppError::StoreUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    async fn find_domain(&self, name: &str) -> AppResult<Option<DomainRecord>> {
        self.begin_query().await?;
        Ok(self.domains.read().get(name).cloned())
    }

    async fn find_mailbox(&self, email: &str) -> AppResult<Option<MailboxRecord>> {
        self.begin_query().await?;
        Ok(self.mailboxes.read().get(email).cloned())
    }

    fn is_healthy(&self) -> bool {
        !self.offline.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_store_fails_queries_and_counts_them() {
        let store = MemoryStore::new();
        store.insert_domain(DomainRecord::new("Example.com", true, true));

        assert_eq!(
            store.find_domain("example.com").await.unwrap(),
            Some(DomainRecord::new("Example.com", true, true))
        );
        store.set_available(false);
        assert!(!store.is_healthy());
        assert!(matches!(
            store.find_domain("example.com").await,
            Err(AppError::StoreUnavailable(_))
        ));
        assert_eq!(store.query_count(), 2);

        store.set_available(true);
        assert!(store.find_mailbox("nobody@example.com").await.unwrap().is_none());
    }
}
