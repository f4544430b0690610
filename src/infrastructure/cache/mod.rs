//! Cache backends

mod factory;
mod in_memory;
mod redis;

pub use factory::{CacheConfig, CacheFactory, CacheType};
pub use in_memory::{InMemoryCache, DEFAULT_CACHE_CAPACITY};
pub use redis::RedisCache;
