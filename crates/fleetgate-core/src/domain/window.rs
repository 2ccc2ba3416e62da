//! Sliding window readings and the analytics derived from them.

use std::time::Duration;

use serde::Serialize;

/// Raw contents of one window as read by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReading {
    /// Entries inside the window after eviction.
    pub count: u32,
    /// Entry timestamps in milliseconds, ascending.
    pub request_times: Vec<i64>,
    /// Instant (unix ms) the store evaluated the window against.
    pub observed_at: i64,
}

impl WindowReading {
    /// Zeroed reading used when the store cannot be consulted.
    pub fn fail_open(observed_at: i64) -> Self {
        Self {
            count: 0,
            request_times: Vec::new(),
            observed_at,
        }
    }

    pub fn oldest(&self) -> Option<i64> {
        self.request_times.iter().copied().min()
    }

    pub fn newest(&self) -> Option<i64> {
        self.request_times.iter().copied().max()
    }
}

/// Result of an atomic check-and-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub allowed: bool,
    pub reading: WindowReading,
}

impl CheckOutcome {
    pub fn fail_open(observed_at: i64) -> Self {
        Self {
            allowed: true,
            reading: WindowReading::fail_open(observed_at),
        }
    }
}

/// Window state as exposed to callers and response metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub count: u32,
    pub remaining: u32,
    pub limit: u32,
    pub window_ms: u64,
    /// Unix ms.
    pub window_start: i64,
    /// Unix ms.
    pub reset_time: i64,
    pub request_times: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_interval: Option<f64>,
}

impl WindowSnapshot {
    pub fn from_reading(reading: &WindowReading, limit: u32, window: Duration) -> Self {
        let window_ms = window_millis(window);
        let mut request_times = reading.request_times.clone();
        request_times.sort_unstable();

        Self {
            count: reading.count,
            remaining: limit.saturating_sub(reading.count),
            limit,
            window_ms: window_ms as u64,
            window_start: reading.observed_at - window_ms,
            reset_time: reading.observed_at + window_ms,
            average_interval: average_interval(&request_times),
            request_times,
        }
    }

    /// Up to `n` most recent entry timestamps, ascending.
    pub fn recent_requests(&self, n: usize) -> &[i64] {
        let start = self.request_times.len().saturating_sub(n);
        &self.request_times[start..]
    }
}

/// Mean gap between consecutive timestamps, `None` with fewer than two.
pub fn average_interval(times: &[i64]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }

    let total: i64 = times.windows(2).map(|pair| pair[1] - pair[0]).sum();
    Some(total as f64 / (times.len() - 1) as f64)
}

/// Seconds until the oldest in-window entry ages out, at least one.
pub fn retry_after_secs(times: &[i64], window: Duration, now: i64) -> u64 {
    let window_ms = window_millis(window);
    let wait_ms = match times.iter().copied().min() {
        Some(oldest) => oldest + window_ms - now,
        None => window_ms,
    };

    let secs = (wait_ms as f64 / 1000.0).ceil() as i64;
    secs.max(1) as u64
}

/// Window length in milliseconds, saturating.
pub fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}
