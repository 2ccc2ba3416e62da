//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use fleetgate_core::{ConfigError, PolicyPreset, RateLimitPolicy};
use fleetgate_infra::RedisWindowStoreConfig;

/// Default trusted header carrying the resolved subject id.
pub const DEFAULT_SUBJECT_HEADER: &str = "X-Subject-Id";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Header set by the upstream identity layer.
    pub subject_header: String,
    /// `None` when `REDIS_URL` is unset; windows then live in process memory.
    pub redis: Option<RedisWindowStoreConfig>,
    pub policies: PresetPolicies,
}

/// Effective policy of every preset after env overrides.
#[derive(Debug, Clone)]
pub struct PresetPolicies {
    pub telemetry: RateLimitPolicy,
    pub general: RateLimitPolicy,
    pub batch: RateLimitPolicy,
}

impl PresetPolicies {
    /// Load every preset, applying `RATE_LIMIT_{PRESET}_MAX_REQUESTS` and
    /// `RATE_LIMIT_{PRESET}_WINDOW_SECS` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telemetry: load_preset(PolicyPreset::Telemetry)?,
            general: load_preset(PolicyPreset::General)?,
            batch: load_preset(PolicyPreset::Batch)?,
        })
    }

    pub fn get(&self, preset: PolicyPreset) -> &RateLimitPolicy {
        match preset {
            PolicyPreset::Telemetry => &self.telemetry,
            PolicyPreset::General => &self.general,
            PolicyPreset::Batch => &self.batch,
        }
    }
}

impl Default for PresetPolicies {
    fn default() -> Self {
        Self {
            telemetry: PolicyPreset::Telemetry.policy(),
            general: PolicyPreset::General.policy(),
            batch: PolicyPreset::Batch.policy(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis = env::var("REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|_| RedisWindowStoreConfig::from_env());

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT")?.unwrap_or(8080),
            subject_header: env::var("SUBJECT_HEADER")
                .unwrap_or_else(|_| DEFAULT_SUBJECT_HEADER.to_string()),
            redis,
            policies: PresetPolicies::from_env()?,
        })
    }
}

fn load_preset(preset: PolicyPreset) -> Result<RateLimitPolicy, ConfigError> {
    let prefix = format!("RATE_LIMIT_{}", preset.name().to_uppercase());
    let max_requests = parse_var::<u32>(&format!("{}_MAX_REQUESTS", prefix))?;
    let window = parse_var::<u64>(&format!("{}_WINDOW_SECS", prefix))?.map(Duration::from_secs);

    let policy = preset.policy_with(max_requests, window)?;
    if max_requests.is_some() || window.is_some() {
        tracing::info!(
            preset = %preset,
            max_requests = policy.max_requests(),
            window_secs = policy.window().as_secs(),
            "Rate limit preset overridden from environment"
        );
    }
    Ok(policy)
}

/// Parse an optional variable. Present but malformed is an error, not a default.
fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the environment is process-wide.

    #[test]
    fn test_missing_variable_is_none() {
        assert_eq!(parse_var::<u32>("FLEETGATE_TEST_UNSET_VAR").unwrap(), None);
    }

    #[test]
    fn test_malformed_variable_is_rejected() {
        unsafe { env::set_var("FLEETGATE_TEST_MALFORMED", "ten") };
        let err = parse_var::<u32>("FLEETGATE_TEST_MALFORMED").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "FLEETGATE_TEST_MALFORMED".to_string(),
                value: "ten".to_string(),
            }
        );
    }

    #[test]
    fn test_defaults_match_presets() {
        let policies = PresetPolicies::default();
        assert_eq!(policies.get(PolicyPreset::Telemetry).max_requests(), 5);
        assert_eq!(policies.get(PolicyPreset::General).window(), Duration::from_secs(30));
        assert_eq!(policies.get(PolicyPreset::Batch).max_requests(), 2);
    }
}
