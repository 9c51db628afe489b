//! Cache stores for pokemon-sync
//!
//! Derived read views (currently the pokemon list) are cached here and
//! invalidated in bulk after every sync pass. The default implementation is
//! in-process, with Redis for shared deployments.

pub mod traits;

mod memory;
mod redis;

pub use traits::{get_json, set_json, CacheEntry, CacheMeta, CacheStats, CacheStore};

#[cfg(test)]
pub use traits::MockCacheStore;

pub use self::redis::RedisCache;
pub use memory::MemoryCache;
