//! Window store port - the shared backend holding every sliding window.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CheckOutcome, RateLimitKey, WindowReading};
use crate::error::StoreError;

/// Expiry applied to a window on every admission, as a multiple of its
/// length, so idle keys are reclaimed without a sweep.
pub const EXPIRY_FACTOR: u32 = 2;

/// Expiry for a window of the given length.
pub fn window_expiry(window: Duration) -> Duration {
    window * EXPIRY_FACTOR
}

/// Window store trait - abstraction over shared window backends (Redis, in-memory).
///
/// Keys passed in and returned are un-prefixed; implementations own their
/// namespace.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically evict expired entries, count the rest and record a new
    /// entry if the count is below `limit`.
    ///
    /// A denied check leaves the window untouched.
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window: Duration,
    ) -> Result<CheckOutcome, StoreError>;

    /// Read the entries inside the window without recording or evicting.
    ///
    /// Never writes: a reader using a shorter window than the one that
    /// recorded the entries must not shrink it.
    async fn status(&self, key: &RateLimitKey, window: Duration)
    -> Result<WindowReading, StoreError>;

    /// Delete a window. Returns whether it existed.
    async fn purge(&self, key: &RateLimitKey) -> Result<bool, StoreError>;

    /// Delete every window whose key matches a glob pattern.
    async fn purge_by_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// List live keys matching a glob pattern.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
