//! Application state - shared across all handlers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;

use fleetgate_core::ports::{Clock, SystemClock, WindowStore};
use fleetgate_core::{
    MonitoredResource, PolicyPreset, RateLimitMonitor, SlidingWindowLimiter, WindowAdmin,
};
use fleetgate_infra::InMemoryWindowStore;

#[cfg(feature = "redis")]
use fleetgate_infra::RedisWindowStore;

use crate::config::{AppConfig, PresetPolicies};
use crate::handlers::GATED_ROUTES;

/// How often expired in-memory windows are dropped.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Backend holding the windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// One limiter per preset, all sharing the same store.
#[derive(Clone)]
pub struct Limiters {
    telemetry: SlidingWindowLimiter,
    general: SlidingWindowLimiter,
    batch: SlidingWindowLimiter,
}

impl Limiters {
    pub fn get(&self, preset: PolicyPreset) -> &SlidingWindowLimiter {
        match preset {
            PolicyPreset::Telemetry => &self.telemetry,
            PolicyPreset::General => &self.general,
            PolicyPreset::Batch => &self.batch,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WindowStore>,
    pub backend: StoreBackend,
    pub limiters: Limiters,
    pub monitor: Arc<RateLimitMonitor>,
    pub admin: WindowAdmin,
}

impl AppState {
    /// Build the application state, connecting the window store.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (store, backend) = connect_store(config, clock.clone()).await?;

        tracing::info!(backend = ?backend, "Application state initialized");

        Ok(Self::from_store(store, backend, clock, &config.policies))
    }

    /// Wire limiters, monitor and admin around an already connected store.
    pub fn from_store(
        store: Arc<dyn WindowStore>,
        backend: StoreBackend,
        clock: Arc<dyn Clock>,
        policies: &PresetPolicies,
    ) -> Self {
        let limiter = |preset| {
            SlidingWindowLimiter::new(policies.get(preset).clone(), store.clone(), clock.clone())
        };
        let limiters = Limiters {
            telemetry: limiter(PolicyPreset::Telemetry),
            general: limiter(PolicyPreset::General),
            batch: limiter(PolicyPreset::Batch),
        };

        let resources = GATED_ROUTES
            .iter()
            .map(|route| MonitoredResource::new(route.path, policies.get(route.preset).clone()))
            .collect();
        let monitor = Arc::new(RateLimitMonitor::new(store.clone(), clock, resources));

        Self {
            admin: WindowAdmin::new(store.clone()),
            store,
            backend,
            limiters,
            monitor,
        }
    }
}

async fn connect_store(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<(Arc<dyn WindowStore>, StoreBackend)> {
    let Some(redis_config) = config.redis.clone() else {
        tracing::warn!("REDIS_URL not set. Windows are per-process (in-memory mode).");
        return Ok((memory_store(clock), StoreBackend::Memory));
    };

    #[cfg(feature = "redis")]
    {
        let fallback = redis_config.redis.fallback_to_memory;
        match RedisWindowStore::connect(redis_config, clock.clone()).await {
            Ok(store) => return Ok((Arc::new(store), StoreBackend::Redis)),
            Err(e) if fallback => {
                tracing::error!(
                    "Failed to connect to Redis: {}. Using in-memory fallback.",
                    e
                );
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context("Redis window store unreachable"));
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    {
        tracing::warn!(
            url = %redis_config.redis.url,
            "Built without redis feature - using in-memory window store"
        );
    }

    Ok((memory_store(clock), StoreBackend::Memory))
}

/// In-memory store with a background task reclaiming idle windows.
fn memory_store(clock: Arc<dyn Clock>) -> Arc<dyn WindowStore> {
    let store = Arc::new(InMemoryWindowStore::new(clock));
    spawn_reclaimer(Arc::downgrade(&store));
    store
}

fn spawn_reclaimer(store: Weak<InMemoryWindowStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECLAIM_INTERVAL);
        loop {
            ticker.tick().await;
            // Stop once the state holding the store is gone.
            let Some(store) = store.upgrade() else {
                break;
            };
            let reclaimed = store.reclaim_expired().await;
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "Reclaimed expired in-memory windows");
            }
        }
    });
}
