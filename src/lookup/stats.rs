use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use tracing::info;

/// Process-lifetime query counters. They only ever grow.
#[derive(Debug)]
pub struct LookupStats {
    started_at: DateTime<Local>,
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    domain_queries: AtomicU64,
    mailbox_queries: AtomicU64,
}

/// Point-in-time copy of [`LookupStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub domain_queries: u64,
    pub mailbox_queries: u64,
}

impl StatsSnapshot {
    /// Percentage of cache lookups answered from the cache, 0 before the
    /// first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64 * 100.0
    }
}

impl Default for LookupStats {
    fn default() -> Self {
        LookupStats {
            started_at: Local::now(),
            total_queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            domain_queries: AtomicU64::new(0),
            mailbox_queries: AtomicU64::new(0),
        }
    }
}

impl LookupStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_domain_query(&self) {
        self.domain_queries.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_mailbox_query(&self) {
        self.mailbox_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            domain_queries: self.domain_queries.load(Ordering::Relaxed),
            mailbox_queries: self.mailbox_queries.load(Ordering::Relaxed),
        }
    }

    /// Emits one summary line with every counter.
    pub fn report(&self, store_healthy: bool) {
        let snapshot = self.snapshot();
        let uptime = Local::now().signed_duration_since(self.started_at);
        info!(
            total_queries = snapshot.total_queries,
            cache_hits = snapshot.cache_hits,
            cache_misses = snapshot.cache_misses,
            errors = snapshot.errors,
            domain_queries = snapshot.domain_queries,
            mailbox_queries = snapshot.mailbox_queries,
            uptime_secs = uptime.num_seconds(),
            store_healthy,
            "lookup stats: hit rate {:.2}%",
            snapshot.hit_rate()
        );
    }
}
