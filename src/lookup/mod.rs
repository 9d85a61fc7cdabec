//! Domain and mailbox resolution with caching and a fail-closed error policy.
//!
//! Every failure on the lookup path (invalid key, store timeout, store
//! outage, malformed record) ends in a negative answer. Only definite store
//! answers, positive or negative, are ever cached.

use std::time::Duration;

pub use engine::LookupEngine;
pub use stats::{LookupStats, StatsSnapshot};

mod engine;
mod stats;

pub const DOMAIN_CACHE_CAPACITY: usize = 1000;
pub const DOMAIN_CACHE_TTL: Duration = Duration::from_secs(60);
pub const MAILBOX_CACHE_CAPACITY: usize = 10_000;
pub const MAILBOX_CACHE_TTL: Duration = Duration::from_secs(60);
pub const STORE_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_KEY_LENGTH: usize = 255;
pub const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Cache sizing and deadlines used by a [`LookupEngine`].
#[derive(Debug, Clone)]
pub struct LookupPolicy {
    pub domain_cache_capacity: usize,
    pub domain_cache_ttl: Duration,
    pub mailbox_cache_capacity: usize,
    pub mailbox_cache_ttl: Duration,
    pub store_query_timeout: Duration,
    /// Longest accepted key, in characters.
    pub max_key_length: usize,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        LookupPolicy {
            domain_cache_capacity: DOMAIN_CACHE_CAPACITY,
            domain_cache_ttl: DOMAIN_CACHE_TTL,
            mailbox_cache_capacity: MAILBOX_CACHE_CAPACITY,
            mailbox_cache_ttl: MAILBOX_CACHE_TTL,
            store_query_timeout: STORE_QUERY_TIMEOUT,
            max_key_length: MAX_KEY_LENGTH,
        }
    }
}
