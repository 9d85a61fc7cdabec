//! Read-only access to the domain and mailbox records owned by the
//! administration service.
//!
//! The lookup engine never writes through this interface. Implementations
//! return `Ok(None)` for an absent record and an error for anything that
//! prevents a definite answer (connectivity, malformed data). Query deadlines
//! are enforced by the caller.

use std::future::Future;

use crate::AppResult;

pub use memory_store::MemoryStore;
pub use record::{DomainRecord, MailboxRecord, DOMAIN_KEY_PREFIX, MAILBOX_KEY_PREFIX};
pub use rocks_store::RocksStore;

mod memory_store;
mod record;
mod rocks_store;

pub trait RecordStore: Send + Sync + 'static {
    /// Looks up the record for a lowercased domain name.
    fn find_domain(
        &self,
        name: &str,
    ) -> impl Future<Output = AppResult<Option<DomainRecord>>> + Send;

    /// Looks up the record for a lowercased email address.
    fn find_mailbox(
        &self,
        email: &str,
    ) -> impl Future<Output = AppResult<Option<MailboxRecord>>> + Send;

    /// Whether the last background health check succeeded.
    fn is_healthy(&self) -> bool {
        true
    }
}
