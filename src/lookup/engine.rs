// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{self, Interval};
use tracing::{debug, trace, warn};

use super::{LookupPolicy, LookupStats};
use crate::store::RecordStore;
use crate::utils::LruCache;
use crate::{AppError, AppResult, Shutdown};

/// Resolves socketmap keys against the record store, through two caches.
///
/// One engine is built at startup and shared by every connection. Two
/// concurrent misses on the same key both reach the store; the reads are
/// idempotent so the second result simply overwrites the first.
pub struct LookupEngine<S> {
    store: Arc<S>,
    policy: LookupPolicy,
    domains: LruCache<bool>,
    /// `None` caches a definite "no such mailbox".
    mailboxes: LruCache<Option<String>>,
    stats: Arc<LookupStats>,
}

impl<S: RecordStore> LookupEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, LookupPolicy::default(), Arc::new(LookupStats::new()))
    }

    pub fn with_policy(store: Arc<S>, policy: LookupPolicy, stats: Arc<LookupStats>) -> Self {
        LookupEngine {
            domains: LruCache::new("domains", policy.domain_cache_capacity, policy.domain_cache_ttl),
            mailboxes: LruCache::new(
                "mailboxes",
                policy.mailbox_cache_capacity,
                policy.mailbox_cache_ttl,
            ),
            store,
            policy,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<LookupStats> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn domain_cache(&self) -> &LruCache<bool> {
        &self.domains
    }

    pub fn mailbox_cache(&self) -> &LruCache<Option<String>> {
        &self.mailboxes
    }

    /// Validates and normalizes a raw key. Empty and over-long keys are
    /// rejected before any cache or store access.
    fn normalize(&self, raw_key: &str) -> Option<String> {
        if raw_key.is_empty() || raw_key.chars().count() > self.policy.max_key_length {
            return None;
        }
        let key = raw_key.trim().to_lowercase();
        (!key.is_empty()).then_some(key)
    }

    async fn query<T>(&self, query: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        match time::timeout(self.policy.store_query_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StoreTimeout(self.policy.store_query_timeout)),
        }
    }

    fn record_failure(&self, err: &AppError) {
        if err.is_store_error() {
            self.stats.record_error();
        }
    }

    /// Logs the counters together with the store health on every tick until
    /// shutdown, then once more.
    pub async fn report_task(self: Arc<Self>, mut interval: Interval, mut shutdown: Shutdown) {
        // the first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {trace!("stats report tick");},
                _ = shutdown.recv() => {
                    debug!("stats report task receiving shutdown signal");
                }
            };
            self.stats.report(self.store.is_healthy());
            if shutdown.is_shutdown() {
                break;
            }
        }
    }

    /// Whether mail is accepted for `raw_key`: the domain exists and is both
    /// enabled and verified.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn check_domain(&self, raw_key: &str) -> bool {
        let Some(key) = self.normalize(raw_key) else {
            debug!("rejecting invalid domain key of {} bytes", raw_key.len());
            return false;
        };

        if let Some(routable) = self.domains.get(&key) {
            self.stats.record_hit();
            trace!("domain {} answered from cache: {}", key, routable);
            return routable;
        }
        self.stats.record_miss();

        match self.query(self.store.find_domain(&key)).await {
            Ok(record) => {
                let routable = record.is_some_and(|record| record.is_routable());
                self.domains.insert(key, routable);
                routable
            }
            Err(err) => {
                self.record_failure(&err);
                warn!("domain lookup for {} failed: {}", key, err);
                false
            }
        }
    }

    /// The maildir path (`<domain>/<localpart>/`) of an enabled mailbox.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn resolve_mailbox(&self, raw_key: &str) -> Option<String> {
        let Some(key) = self.normalize(raw_key) else {
            debug!("rejecting invalid mailbox key of {} bytes", raw_key.len());
            return None;
        };

        if let Some(path) = self.mailboxes.get(&key) {
            self.stats.record_hit();
            trace!("mailbox {} answered from cache: {:?}", key, path);
            return path;
        }
        self.stats.record_miss();

        match self.query(self.store.find_mailbox(&key)).await {
            Ok(Some(record)) if record.is_deliverable() => match maildir_path(&key) {
                Some(path) => {
                    self.mailboxes.insert(key, Some(path.clone()));
                    Some(path)
                }
                None => {
                    // a stored address without both halves is bad data, not a miss
                    warn!("mailbox record {} has no usable local part or domain", key);
                    None
                }
            },
            Ok(_) => {
                self.mailboxes.insert(key, None);
                None
            }
            Err(err) => {
                self.record_failure(&err);
                warn!("mailbox lookup for {} failed: {}", key, err);
                None
            }
        }
    }
}

/// `user@example.com` -> `example.com/user/`
fn maildir_path(email: &str) -> Option<String> {
    let (local_part, domain) = email.split_once('@')?;
    if local_part.is_empty() || domain.is_empty() {
        return None;
    }
    Some(format!("{}/{}/", domain, local_part))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::store::{DomainRecord, MailboxRecord, MemoryStore};

    #[fixture]
    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.insert_domain(DomainRecord::new("example.com", true, true));
        store.insert_domain(DomainRecord::new("unverified.com", true, false));
        store.insert_domain(DomainRecord::new("disabled.com", false, true));
        store.insert_mailbox(MailboxRecord::new("user@example.com", true));
        store.insert_mailbox(MailboxRecord::new("gone@example.com", false));
        store.insert_mailbox(MailboxRecord::new("@example.com", true));
        Arc::new(store)
    }

    #[rstest]
    #[case("example.com", true)]
    #[case("  EXAMPLE.com ", true)]
    #[case("unverified.com", false)]
    #[case("disabled.com", false)]
    #[case("absent.com", false)]
    #[tokio::test]
    async fn check_domain_applies_flags(
        store: Arc<MemoryStore>,
        #[case] key: &str,
        #[case] expected: bool,
    ) {
        let engine = LookupEngine::new(store);
        assert_eq!(engine.check_domain(key).await, expected);
        // every definite answer is cached
        assert_eq!(engine.domain_cache().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn repeated_lookups_are_served_from_cache(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        assert!(engine.check_domain("example.com").await);
        let queries = store.query_count();
        for _ in 0..10 {
            assert!(engine.check_domain("Example.COM").await);
            assert!(!engine.check_domain("absent.com").await);
        }
        // only the first absent.com lookup reached the store
        assert_eq!(store.query_count(), queries + 1);

        let stats = engine.stats().snapshot();
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cache_hits, 19);
        assert_eq!(stats.errors, 0);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[tokio::test]
    async fn invalid_keys_never_reach_the_store(store: Arc<MemoryStore>, #[case] key: &str) {
        let engine = LookupEngine::new(store.clone());
        let long_key = "a".repeat(300);
        assert!(!engine.check_domain(key).await);
        assert!(!engine.check_domain(&long_key).await);
        assert_eq!(engine.resolve_mailbox(key).await, None);
        assert_eq!(engine.resolve_mailbox(&long_key).await, None);

        assert_eq!(store.query_count(), 0);
        assert_eq!(engine.stats().snapshot(), Default::default());
    }

    #[rstest]
    #[tokio::test]
    async fn key_length_is_counted_in_characters(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        // 255 two-byte characters is still a valid key
        let key = "é".repeat(255);
        assert!(!engine.check_domain(&key).await);
        assert_eq!(store.query_count(), 1);
        let key = "é".repeat(256);
        assert!(!engine.check_domain(&key).await);
        assert_eq!(store.query_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_mailbox_builds_maildir_path(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        assert_eq!(
            engine.resolve_mailbox("User@Example.com").await.as_deref(),
            Some("example.com/user/")
        );
        assert_eq!(engine.resolve_mailbox("gone@example.com").await, None);
        assert_eq!(engine.resolve_mailbox("nobody@example.com").await, None);
        assert_eq!(engine.mailbox_cache().len(), 3);
        assert_eq!(
            engine.mailbox_cache().get("gone@example.com"),
            Some(None)
        );

        let queries = store.query_count();
        assert_eq!(
            engine.resolve_mailbox("user@example.com").await.as_deref(),
            Some("example.com/user/")
        );
        assert_eq!(engine.resolve_mailbox("nobody@example.com").await, None);
        assert_eq!(store.query_count(), queries);
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_mailbox_address_is_not_cached(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        assert_eq!(engine.resolve_mailbox("@example.com").await, None);
        assert_eq!(engine.resolve_mailbox("@example.com").await, None);
        assert!(engine.mailbox_cache().is_empty());
        assert_eq!(store.query_count(), 2);
        assert_eq!(engine.stats().snapshot().errors, 0);
    }

    #[rstest]
    #[tokio::test]
    async fn store_outage_fails_closed_without_caching(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        store.set_available(false);

        assert!(!engine.check_domain("example.com").await);
        assert_eq!(engine.resolve_mailbox("user@example.com").await, None);
        assert!(engine.domain_cache().is_empty());
        assert!(engine.mailbox_cache().is_empty());
        assert_eq!(engine.stats().snapshot().errors, 2);

        store.set_available(true);
        let queries = store.query_count();
        assert!(engine.check_domain("example.com").await);
        assert_eq!(
            engine.resolve_mailbox("user@example.com").await.as_deref(),
            Some("example.com/user/")
        );
        assert_eq!(store.query_count(), queries + 2);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        store.set_latency(Some(Duration::from_secs(6)));

        assert!(!engine.check_domain("example.com").await);
        let stats = engine.stats().snapshot();
        assert_eq!(stats.errors, 1);
        assert!(engine.domain_cache().is_empty());

        store.set_latency(Some(Duration::from_secs(4)));
        assert!(engine.check_domain("example.com").await);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_queried_again(store: Arc<MemoryStore>) {
        let engine = LookupEngine::new(store.clone());
        assert!(engine.check_domain("example.com").await);
        store.remove_domain("example.com");

        time::advance(Duration::from_secs(30)).await;
        assert!(engine.check_domain("example.com").await);
        assert_eq!(store.query_count(), 1);

        time::advance(Duration::from_secs(31)).await;
        assert!(!engine.check_domain("example.com").await);
        assert_eq!(store.query_count(), 2);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn report_task_runs_until_shutdown(store: Arc<MemoryStore>) {
        let (notify, _) = tokio::sync::broadcast::channel(1);
        let engine = Arc::new(LookupEngine::new(store.clone()));
        store.set_available(false);
        assert!(!engine.check_domain("example.com").await);

        let task = tokio::spawn(engine.clone().report_task(
            time::interval(Duration::from_secs(300)),
            Shutdown::new(notify.subscribe()),
        ));
        time::advance(Duration::from_secs(301)).await;
        notify.send(()).unwrap();
        task.await.unwrap();

        assert!(!engine.store().is_healthy());
        assert_eq!(engine.stats().snapshot().errors, 1);
    }

    #[test]
    fn only_store_failures_are_counted_as_errors() {
        let engine = LookupEngine::new(Arc::new(MemoryStore::new()));
        engine.record_failure(&AppError::StoreUnavailable("down".to_string()));
        engine.record_failure(&AppError::StoreTimeout(Duration::from_secs(5)));
        engine.record_failure(&AppError::UnknownMap("aliases".to_string()));
        assert_eq!(engine.stats().snapshot().errors, 2);
    }

    #[test]
    fn maildir_path_requires_both_halves() {
        assert_eq!(maildir_path("a@b").as_deref(), Some("b/a/"));
        assert_eq!(maildir_path("a@b@c").as_deref(), Some("b@c/a/"));
        assert_eq!(maildir_path("@b"), None);
        assert_eq!(maildir_path("a@"), None);
        assert_eq!(maildir_path("ab"), None);
    }
}
