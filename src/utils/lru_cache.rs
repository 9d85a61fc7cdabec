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

//! Bounded LRU cache with a fixed time-to-live per entry.
//!
//! Entries are evicted either when the cache is full (least recently touched
//! first) or when they are older than the TTL, whichever happens first. A read
//! refreshes recency but never extends the TTL: an entry always expires a
//! fixed time after it was inserted.

use std::num::NonZeroUsize;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct TtlEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> TtlEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Thread safe LRU + TTL cache keyed by string.
///
/// The lock is never held across an await point.
#[derive(Debug)]
pub struct LruCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<lru::LruCache<String, TtlEntry<V>>>,
}

impl<V: Clone> LruCache<V> {
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruCache {
            name,
            ttl,
            entries: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the cached value and marks it most recently used.
    /// An expired entry is dropped instead.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            entries.pop(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`, evicting the least recently used entry
    /// when the cache is full.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let entry = TtlEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        let key = key.into();
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                trace!("{} cache full, evicting {}", self.name, evicted);
            }
        }
    }

    /// Whether a live entry exists, without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Number of stored entries, expired ones included until they are touched
    /// or pushed out.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
