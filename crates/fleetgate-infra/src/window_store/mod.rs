//! Window store implementations - Redis and in-memory fallback.

mod config;
mod memory;

pub use config::{RedisConfig, RedisWindowStoreConfig};
pub use memory::InMemoryWindowStore;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::RedisWindowStore;
