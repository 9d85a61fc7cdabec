pub use lru_cache::LruCache;

mod lru_cache;
