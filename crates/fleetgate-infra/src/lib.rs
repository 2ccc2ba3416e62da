//! # Fleetgate Infrastructure
//!
//! Concrete implementations of the window store port defined in
//! `fleetgate-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `redis` - Redis-backed window store shared across processes

pub mod window_store;

// Re-exports - In-Memory
pub use window_store::{InMemoryWindowStore, RedisConfig, RedisWindowStoreConfig};

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use window_store::RedisWindowStore;
