//! In-memory window store - used when Redis is not configured and in tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use tokio::sync::Mutex;
use uuid::Uuid;

use fleetgate_core::StoreError;
use fleetgate_core::domain::{CheckOutcome, RateLimitKey, WindowReading, window_millis};
use fleetgate_core::ports::{Clock, WindowStore, window_expiry};

/// Entries of one window, ordered by (timestamp, nonce).
struct WindowLog {
    entries: BTreeSet<(i64, Uuid)>,
    expires_at: i64,
}

impl WindowLog {
    fn evict_before(&mut self, window_start: i64) {
        self.entries = self.entries.split_off(&(window_start, Uuid::nil()));
    }

    fn reading(&self, observed_at: i64) -> WindowReading {
        WindowReading {
            count: self.entries.len() as u32,
            request_times: self.entries.iter().map(|(ts, _)| *ts).collect(),
            observed_at,
        }
    }
}

/// In-memory window store using a HashMap behind an async mutex.
///
/// Every operation runs inside one critical section, which makes
/// check-and-record atomic within this process.
/// Note: Windows are per-process and lost on restart.
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, WindowLog>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWindowStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drop windows whose expiry has passed. Returns how many were removed.
    pub async fn reclaim_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, log| log.expires_at > now);
        before - windows.len()
    }

    /// Number of stored windows, expired or not.
    pub async fn len(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn matcher(pattern: &str) -> Result<GlobMatcher, StoreError> {
        GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|e| StoreError::Protocol(format!("invalid key pattern '{}': {}", pattern, e)))
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window: Duration,
    ) -> Result<CheckOutcome, StoreError> {
        let mut windows = self.windows.lock().await;
        let now = self.clock.now_millis();
        let name = key.to_string();

        let log = windows.entry(name.clone()).or_insert_with(|| WindowLog {
            entries: BTreeSet::new(),
            expires_at: i64::MAX,
        });
        if log.expires_at <= now {
            log.entries.clear();
        }
        log.evict_before(now - window_millis(window));

        let allowed = (log.entries.len() as u64) < u64::from(limit);
        if allowed {
            log.entries.insert((now, Uuid::new_v4()));
            log.expires_at = now + window_millis(window_expiry(window));
        }

        let reading = log.reading(now);
        if log.entries.is_empty() {
            windows.remove(&name);
        }

        Ok(CheckOutcome { allowed, reading })
    }

    async fn status(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<WindowReading, StoreError> {
        let windows = self.windows.lock().await;
        let now = self.clock.now_millis();

        let Some(log) = windows
            .get(&key.to_string())
            .filter(|log| log.expires_at > now)
        else {
            return Ok(WindowReading::fail_open(now));
        };

        let window_start = now - window_millis(window);
        let request_times: Vec<i64> = log
            .entries
            .range((window_start, Uuid::nil())..)
            .map(|(ts, _)| *ts)
            .collect();

        Ok(WindowReading {
            count: request_times.len() as u32,
            request_times,
            observed_at: now,
        })
    }

    async fn purge(&self, key: &RateLimitKey) -> Result<bool, StoreError> {
        let mut windows = self.windows.lock().await;
        Ok(windows.remove(&key.to_string()).is_some())
    }

    async fn purge_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let matcher = Self::matcher(pattern)?;
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|name, _| !matcher.is_match(name));
        Ok((before - windows.len()) as u64)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let matcher = Self::matcher(pattern)?;
        let now = self.clock.now_millis();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, log| log.expires_at > now);

        let mut keys: Vec<String> = windows
            .keys()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
