//! Redis window store using one sorted set per window.
//!
//! Members are `{timestamp}-{nonce}` scored by the admission timestamp (ms).
//! Eviction, counting and the conditional insert run inside a Lua script, so
//! every check is a single atomic round trip no matter how many processes
//! share the server.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};
use uuid::Uuid;

use fleetgate_core::StoreError;
use fleetgate_core::domain::{CheckOutcome, RateLimitKey, WindowReading, window_millis};
use fleetgate_core::ports::{Clock, WindowStore, window_expiry};

use super::config::RedisWindowStoreConfig;

// Returns: {allowed, count, scores}
const CHECK_AND_RECORD: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]
local ttl_ms = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window_ms))

local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, ttl_ms)
    count = count + 1
    allowed = 1
end

local entries = redis.call('ZRANGE', key, 0, -1, 'WITHSCORES')
local scores = {}
for i = 2, #entries, 2 do
    scores[#scores + 1] = entries[i]
end
return {allowed, count, scores}
"#;

// Returns: {count, scores}. Read-only.
const WINDOW_STATUS: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])

local entries = redis.call('ZRANGEBYSCORE', key, now - window_ms, '+inf', 'WITHSCORES')
local scores = {}
for i = 2, #entries, 2 do
    scores[#scores + 1] = entries[i]
end
return {#scores, scores}
"#;

const SCAN_BATCH: usize = 200;
const DELETE_BATCH: usize = 500;

/// Redis-backed window store.
///
/// Uses connection manager for automatic reconnection. Every command is
/// bounded by `command_timeout`; a timed out command is reported, never
/// retried, since a retry could record the same admission twice.
pub struct RedisWindowStore {
    conn: ConnectionManager,
    config: RedisWindowStoreConfig,
    clock: Arc<dyn Clock>,
    check_script: Script,
    status_script: Script,
}

impl RedisWindowStore {
    pub async fn connect(
        config: RedisWindowStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let client = Client::open(config.redis.url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.redis.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Timeout(config.redis.connect_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(
            url = %config.redis.url,
            prefix = %config.key_prefix,
            "Connected to Redis window store"
        );

        Ok(Self {
            conn,
            config,
            clock,
            check_script: Script::new(CHECK_AND_RECORD),
            status_script: Script::new(WINDOW_STATUS),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::connect(RedisWindowStoreConfig::from_env(), clock).await
    }

    fn make_key(&self, key: &RateLimitKey) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn make_pattern(&self, pattern: &str) -> String {
        format!("{}:{}", self.config.key_prefix, pattern)
    }

    fn strip_prefix<'a>(&self, redis_key: &'a str) -> Option<&'a str> {
        redis_key
            .strip_prefix(self.config.key_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }

    /// Run one round trip under the command timeout.
    async fn bounded<T>(&self, op: impl Future<Output = RedisResult<T>>) -> Result<T, StoreError> {
        let limit = self.config.redis.command_timeout;
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    async fn matching_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = self.make_pattern(pattern);
        let mut cursor: u64 = 0;
        // SCAN may return a key more than once.
        let mut keys = BTreeSet::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }
}

fn map_redis_error(e: RedisError) -> StoreError {
    if e.kind() == redis::ErrorKind::TypeError {
        StoreError::Protocol(e.to_string())
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

fn parse_scores(scores: &[String]) -> Result<Vec<i64>, StoreError> {
    let mut times = scores
        .iter()
        .map(|score| {
            score
                .parse::<f64>()
                .map(|ms| ms as i64)
                .map_err(|_| StoreError::Protocol(format!("non-numeric score '{}'", score)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    times.sort_unstable();
    Ok(times)
}

fn parse_count(count: i64) -> Result<u32, StoreError> {
    u32::try_from(count)
        .map_err(|_| StoreError::Protocol(format!("invalid window count {}", count)))
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window: Duration,
    ) -> Result<CheckOutcome, StoreError> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        let now = self.clock.now_millis();
        let member = format!("{}-{}", now, Uuid::new_v4().simple());

        let (allowed, count, scores): (i64, i64, Vec<String>) = self
            .bounded(
                self.check_script
                    .key(&redis_key)
                    .arg(now)
                    .arg(window_millis(window))
                    .arg(limit)
                    .arg(&member)
                    .arg(window_millis(window_expiry(window)))
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(CheckOutcome {
            allowed: allowed == 1,
            reading: WindowReading {
                count: parse_count(count)?,
                request_times: parse_scores(&scores)?,
                observed_at: now,
            },
        })
    }

    async fn status(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<WindowReading, StoreError> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        let now = self.clock.now_millis();

        let (count, scores): (i64, Vec<String>) = self
            .bounded(
                self.status_script
                    .key(&redis_key)
                    .arg(now)
                    .arg(window_millis(window))
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(WindowReading {
            count: parse_count(count)?,
            request_times: parse_scores(&scores)?,
            observed_at: now,
        })
    }

    async fn purge(&self, key: &RateLimitKey) -> Result<bool, StoreError> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        let removed: i64 = self.bounded(conn.del(&redis_key)).await?;
        Ok(removed > 0)
    }

    async fn purge_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let keys = self.matching_keys(pattern).await?;
        let mut conn = self.conn.clone();
        let mut removed: u64 = 0;

        for chunk in keys.chunks(DELETE_BATCH) {
            let deleted: u64 = self
                .bounded(redis::cmd("DEL").arg(chunk).query_async(&mut conn))
                .await?;
            removed += deleted;
        }

        tracing::debug!(pattern = %pattern, removed, "Purged Redis windows");
        Ok(removed)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let keys = self.matching_keys(pattern).await?;
        Ok(keys
            .iter()
            .filter_map(|k| self.strip_prefix(k))
            .map(str::to_string)
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::domain::SubjectId;
    use fleetgate_core::ports::SystemClock;

    use crate::window_store::config::RedisConfig;

    async fn get_test_store(prefix: &str) -> Option<RedisWindowStore> {
        let config = RedisWindowStoreConfig {
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
                connect_timeout: Duration::from_secs(1),
                command_timeout: Duration::from_secs(1),
                fallback_to_memory: false,
            },
            key_prefix: prefix.to_string(),
        };

        let store = RedisWindowStore::connect(config, Arc::new(SystemClock)).await.ok()?;
        store.ping().await.ok()?;
        Some(store)
    }

    fn key(subject: &str, resource: &str) -> RateLimitKey {
        RateLimitKey::new(SubjectId::parse(subject).unwrap(), resource).unwrap()
    }

    #[test]
    fn test_parse_scores_sorts_and_truncates() {
        let scores = vec!["1700000002000".to_string(), "1700000001000".to_string()];
        assert_eq!(
            parse_scores(&scores).unwrap(),
            vec![1_700_000_001_000, 1_700_000_002_000]
        );
        assert!(matches!(
            parse_scores(&["abc".to_string()]),
            Err(StoreError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_redis_window_admits_up_to_limit() {
        let store = match get_test_store("test_window_limit").await {
            Some(s) => s,
            None => return,
        };
        let key = key("vehicle-1", "/capture");
        store.purge(&key).await.unwrap();

        let window = Duration::from_secs(2);
        for expected in 1..=2 {
            let outcome = store.check_and_record(&key, 2, window).await.unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.reading.count, expected);
        }

        let denied = store.check_and_record(&key, 2, window).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.reading.count, 2);
        assert_eq!(denied.reading.request_times.len(), 2);

        // Status does not consume quota.
        assert_eq!(store.status(&key, window).await.unwrap().count, 2);
        assert_eq!(store.status(&key, window).await.unwrap().count, 2);

        // Wait for the window to slide past both entries
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let outcome = store.check_and_record(&key, 2, window).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.reading.count, 1);

        store.purge(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_status_does_not_evict() {
        let store = match get_test_store("test_window_status").await {
            Some(s) => s,
            None => return,
        };
        let key = key("vehicle-2", "/batch");
        store.purge(&key).await.unwrap();

        let long = Duration::from_secs(3);
        store.check_and_record(&key, 5, long).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        store.check_and_record(&key, 5, long).await.unwrap();

        let short = store.status(&key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(short.count, 1);
        assert_eq!(store.status(&key, long).await.unwrap().count, 2);

        store.purge(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_scan_and_purge_strip_prefix() {
        let store = match get_test_store("test_window_scan").await {
            Some(s) => s,
            None => return,
        };
        store.purge_by_pattern("*").await.unwrap();

        let window = Duration::from_secs(10);
        store
            .check_and_record(&key("a", "/capture"), 5, window)
            .await
            .unwrap();
        store
            .check_and_record(&key("b", "/capture"), 5, window)
            .await
            .unwrap();

        assert_eq!(
            store.scan_keys("*").await.unwrap(),
            vec!["a:/capture".to_string(), "b:/capture".to_string()]
        );
        assert_eq!(store.purge_by_pattern("a:*").await.unwrap(), 1);
        assert_eq!(
            store.scan_keys("*").await.unwrap(),
            vec!["b:/capture".to_string()]
        );

        store.purge_by_pattern("*").await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_to_connect() {
        let config = RedisWindowStoreConfig {
            redis: RedisConfig {
                url: "redis://127.0.0.1:1".to_string(),
                connect_timeout: Duration::from_millis(500),
                command_timeout: Duration::from_millis(100),
                fallback_to_memory: false,
            },
            key_prefix: "test_unreachable".to_string(),
        };

        assert!(RedisWindowStore::connect(config, Arc::new(SystemClock)).await.is_err());
    }
}
