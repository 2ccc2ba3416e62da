//! Rate limit policies and the named presets used by the fleet API.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Window length, admission limit and denial message of one limited resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    window: Duration,
    max_requests: u32,
    message: String,
}

impl RateLimitPolicy {
    /// Build a policy. Zero-length windows and zero limits are rejected.
    pub fn new(
        window: Duration,
        max_requests: u32,
        message: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if window.as_millis() == 0 {
            return Err(ConfigError::NonPositiveWindow);
        }
        if max_requests == 0 {
            return Err(ConfigError::NonPositiveLimit);
        }

        Ok(Self {
            window,
            max_requests,
            message: message.into(),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Operational tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    /// High-frequency telemetry ingestion: 5 requests per 10 seconds.
    Telemetry,
    /// Default for everything else: 10 requests per 30 seconds.
    General,
    /// Expensive batch operations: 2 requests per minute.
    Batch,
}

impl PolicyPreset {
    pub const ALL: [PolicyPreset; 3] = [Self::Telemetry, Self::General, Self::Batch];

    pub fn name(self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::General => "general",
            Self::Batch => "batch",
        }
    }

    pub fn default_max_requests(self) -> u32 {
        match self {
            Self::Telemetry => 5,
            Self::General => 10,
            Self::Batch => 2,
        }
    }

    pub fn default_window(self) -> Duration {
        match self {
            Self::Telemetry => Duration::from_secs(10),
            Self::General => Duration::from_secs(30),
            Self::Batch => Duration::from_secs(60),
        }
    }

    pub fn policy(self) -> RateLimitPolicy {
        // Defaults are non-zero.
        RateLimitPolicy {
            window: self.default_window(),
            max_requests: self.default_max_requests(),
            message: self.message(self.default_max_requests(), self.default_window()),
        }
    }

    /// Preset with optional overrides, validated like any other policy.
    pub fn policy_with(
        self,
        max_requests: Option<u32>,
        window: Option<Duration>,
    ) -> Result<RateLimitPolicy, ConfigError> {
        let max_requests = max_requests.unwrap_or(self.default_max_requests());
        let window = window.unwrap_or(self.default_window());
        RateLimitPolicy::new(window, max_requests, self.message(max_requests, window))
    }

    fn message(self, max_requests: u32, window: Duration) -> String {
        let per = describe_window(window);
        match self {
            Self::Telemetry => format!(
                "Too many telemetry requests. Maximum {} requests per {} allowed.",
                max_requests, per
            ),
            Self::General => format!(
                "Too many requests. Maximum {} requests per {} allowed.",
                max_requests, per
            ),
            Self::Batch => format!(
                "Too many batch requests. Maximum {} batch operations per {} allowed.",
                max_requests, per
            ),
        }
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn describe_window(window: Duration) -> String {
    match window.as_secs() {
        60 => "minute".to_string(),
        secs if secs > 0 && window.subsec_millis() == 0 => format!("{} seconds", secs),
        _ => format!("{} milliseconds", window.as_millis()),
    }
}
