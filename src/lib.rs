pub mod lookup;
pub mod network;
pub mod request;
pub mod service;
pub mod store;
mod utils;

pub use lookup::{LookupEngine, LookupPolicy, LookupStats};
pub use network::{NetstringCodec, RequestFrame};
pub use request::{MapName, MapResponse};
pub use service::{
    level_directive, setup_local_tracing, setup_tracing, AppError, AppResult, ConnectionSettings,
    Daemon, MailRouteConfig, Server, Shutdown,
};
pub use store::{MemoryStore, RecordStore, RocksStore};
pub use utils::LruCache;
