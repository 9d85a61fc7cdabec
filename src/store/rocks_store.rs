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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rocksdb::{Options, DB};
use tokio::time::Interval;
use tracing::{debug, info, trace, warn};

use super::{DomainRecord, MailboxRecord, RecordStore};
use crate::service::StoreConfig;
use crate::{AppError, AppResult, Shutdown};

/// RocksDB backed record store.
///
/// The administration service owns the primary database. This side opens it
/// either as a secondary instance, which can follow the primary through
/// [`RocksStore::catch_up`], or as a plain read-only snapshot.
pub struct RocksStore {
    db: Arc<DB>,
    secondary: bool,
    healthy: AtomicBool,
}

impl RocksStore {
    pub fn open(config: &StoreConfig) -> AppResult<RocksStore> {
        let mut opts = Options::default();
        opts.create_if_missing(false);

        let (db, secondary) = match &config.secondary_path {
            Some(secondary_path) => {
                // secondary instances must keep every file open
                opts.set_max_open_files(-1);
                let db = DB::open_as_secondary(&opts, &config.primary_path, secondary_path)?;
                (db, true)
            }
            None => (DB::open_for_read_only(&opts, &config.primary_path, false)?, false),
        };
        if !secondary {
            warn!(
                "record store at {} opened read-only: serving a snapshot that never sees \
                 later changes, set store.secondary_path outside of dry runs",
                config.primary_path
            );
        }
        info!(
            "record store opened at {} ({})",
            config.primary_path,
            if secondary { "secondary" } else { "read-only" }
        );

        Ok(RocksStore {
            db: Arc::new(db),
            secondary,
            healthy: AtomicBool::new(true),
        })
    }

    /// Whether this instance follows the primary's writes.
    pub fn follows_primary(&self) -> bool {
        self.secondary
    }

    /// Replays the primary's latest writes into this secondary instance.
    /// A no-op for read-only instances.
    pub fn catch_up(&self) -> AppResult<()> {
        if !self.secondary {
            return Ok(());
        }
        match self.db.try_catch_up_with_primary() {
            Ok(()) => {
                if !self.healthy.swap(true, Ordering::AcqRel) {
                    info!("record store caught up with primary again");
                }
                Ok(())
            }
            Err(err) => {
                if self.healthy.swap(false, Ordering::AcqRel) {
                    warn!("record store lost the primary: {}", err);
                }
                Err(err.into())
            }
        }
    }

    /// Periodically catches up with the primary until shutdown.
    pub async fn catch_up_task(self: Arc<Self>, mut interval: Interval, mut shutdown: Shutdown) {
        if !self.follows_primary() {
            return;
        }
        loop {
            tokio::select! {
                _ = interval.tick() => {trace!("catch up tick");},
                _ = shutdown.recv() => {
                    debug!("store catch up task receiving shutdown signal");
                    break;
                }
            };
            let store = self.clone();
            let result = tokio::task::spawn_blocking(move || store.catch_up()).await;
            if let Err(err) = result {
                warn!("store catch up task failed: {}", err);
            }
        }
    }

    async fn get(&self, key: String) -> AppResult<Option<Vec<u8>>> {
        let db = self.db.clone();
        let value = tokio::task::spawn_blocking(move || db.get(key.as_bytes()))
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("store read task failed: {e}")))??;
        Ok(value)
    }
}

impl RecordStore for RocksStore {
    async fn find_domain(&self, name: &str) -> AppResult<Option<DomainRecord>> {
        match self.get(DomainRecord::store_key(name)).await? {
            Some(bytes) => Ok(Some(DomainRecord::decode(name, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_mailbox(&self, email: &str) -> AppResult<Option<MailboxRecord>> {
        match self.get(MailboxRecord::store_key(email)).await? {
            Some(bytes) => Ok(Some(MailboxRecord::decode(email, &bytes)?)),
            None => Ok(None),
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

impl Drop for RocksStore {
    fn drop(&mut self) {
        debug!("record store closed");
    }
}
