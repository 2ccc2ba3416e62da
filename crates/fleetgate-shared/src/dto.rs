//! Data Transfer Objects - request/response types for the API.

use serde::{Deserialize, Serialize};

/// Body of a 429 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDenial {
    pub error: String,
    pub rate_limit_exceeded: bool,
    pub sliding_window: SlidingWindowDetails,
}

/// Window state at the moment of a denial. Timestamps are unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlidingWindowDetails {
    pub current_count: u32,
    pub limit: u32,
    pub window_ms: u64,
    pub window_start: i64,
    pub reset_time: i64,
    /// Seconds.
    pub retry_after: u64,
    /// Most recent admissions, oldest first.
    pub recent_requests: Vec<i64>,
}

impl RateLimitDenial {
    pub fn new(message: impl Into<String>, sliding_window: SlidingWindowDetails) -> Self {
        Self {
            error: message.into(),
            rate_limit_exceeded: true,
            sliding_window,
        }
    }
}

/// Query for a subject's windows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsQuery {
    pub resource: Option<String>,
}

/// Query for the busiest subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top_limit")]
    pub limit: usize,
}

fn default_top_limit() -> usize {
    10
}

/// Request to clear a subject's windows, optionally only on one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    pub resource: Option<String>,
}

/// Request to delete every window matching a `{subject}:{resource}` glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub pattern: String,
    pub windows_cleared: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_uses_camel_case_fields() {
        let denial = RateLimitDenial::new(
            "Too many telemetry requests.",
            SlidingWindowDetails {
                current_count: 5,
                limit: 5,
                window_ms: 10_000,
                window_start: 1_000,
                reset_time: 21_000,
                retry_after: 1,
                recent_requests: vec![11_000, 12_000],
            },
        );

        let json = serde_json::to_value(&denial).unwrap();
        assert_eq!(json["rateLimitExceeded"], true);
        assert_eq!(json["slidingWindow"]["currentCount"], 5);
        assert_eq!(json["slidingWindow"]["windowMs"], 10_000);
        assert_eq!(json["slidingWindow"]["retryAfter"], 1);
        assert_eq!(json["slidingWindow"]["recentRequests"][1], 12_000);
    }

    #[test]
    fn test_top_query_defaults_to_ten() {
        let query: TopQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 10);
    }
}
