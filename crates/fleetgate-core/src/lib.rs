//! # Fleetgate Core
//!
//! The domain layer of the fleet API rate limiter: window analytics, policies,
//! the limiter, the monitor and the ports their backends implement.
//! This crate contains no infrastructure dependencies.

pub mod admin;
pub mod domain;
pub mod error;
pub mod limiter;
pub mod monitor;
pub mod policy;
pub mod ports;

pub use admin::{ResetOutcome, WindowAdmin};
pub use error::{AdminError, ConfigError, DomainError, MonitorError, StoreError};
pub use limiter::{Decision, SlidingWindowLimiter};
pub use monitor::{MonitoredResource, RateLimitMonitor};
pub use policy::{PolicyPreset, RateLimitPolicy};
