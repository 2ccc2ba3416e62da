//! Read-only rate limit analytics.
//!
//! Every view here is built from status reads. The monitor never records an
//! admission, so it can run against production windows at any time.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::domain::{RateLimitKey, SubjectId, WindowReading, WindowSnapshot, average_interval};
use crate::error::{DomainError, MonitorError, StoreError};
use crate::limiter::read_status;
use crate::policy::{PolicyPreset, RateLimitPolicy};
use crate::ports::{Clock, WindowStore};

/// A resource guarded by a gate, with the policy its windows are read with.
#[derive(Debug, Clone)]
pub struct MonitoredResource {
    pub resource: String,
    pub policy: RateLimitPolicy,
}

impl MonitoredResource {
    pub fn new(resource: impl Into<String>, policy: RateLimitPolicy) -> Self {
        Self {
            resource: resource.into(),
            policy,
        }
    }
}

/// Timing pattern of the requests inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    pub average_interval_ms: f64,
    pub first_request: i64,
    pub last_request: i64,
    pub span_ms: i64,
}

impl RequestPattern {
    /// `None` when fewer than two requests are in the window.
    fn from_times(times: &[i64]) -> Option<Self> {
        let average_interval_ms = average_interval(times)?;
        let first_request = *times.first()?;
        let last_request = *times.last()?;

        Some(Self {
            average_interval_ms,
            first_request,
            last_request,
            span_ms: last_request - first_request,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWindowStats {
    pub resource: String,
    pub count: u32,
    pub remaining: u32,
    pub limit: u32,
    pub window_ms: u64,
    pub window_start: i64,
    pub reset_time: i64,
    pub request_times: Vec<i64>,
    pub request_pattern: Option<RequestPattern>,
    /// The window could not be read; the figures above are zeroed.
    pub degraded: bool,
}

impl ResourceWindowStats {
    fn new(
        resource: &str,
        policy: &RateLimitPolicy,
        reading: &Result<WindowReading, StoreError>,
        now: i64,
    ) -> Self {
        let degraded = reading.is_err();
        let reading = match reading {
            Ok(reading) => reading.clone(),
            Err(_) => WindowReading::fail_open(now),
        };
        let snapshot =
            WindowSnapshot::from_reading(&reading, policy.max_requests(), policy.window());

        Self {
            resource: resource.to_string(),
            count: snapshot.count,
            remaining: snapshot.remaining,
            limit: snapshot.limit,
            window_ms: snapshot.window_ms,
            window_start: snapshot.window_start,
            reset_time: snapshot.reset_time,
            request_pattern: RequestPattern::from_times(&snapshot.request_times),
            request_times: snapshot.request_times,
            degraded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject: SubjectId,
    pub total_requests: u32,
    pub windows: Vec<ResourceWindowStats>,
    /// Windows whose read failed and are reported as empty.
    pub degraded_windows: usize,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveWindow {
    pub subject: SubjectId,
    pub resource: String,
    pub count: u32,
    pub remaining: u32,
    pub limit: u32,
    pub last_request: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSummary {
    pub total_active_windows: usize,
    pub total_requests: u64,
    pub average_requests_per_window: f64,
    pub saturated_windows: usize,
    /// Live keys whose read failed and are left out of the figures above.
    pub degraded_windows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub summary: GlobalSummary,
    /// Sorted by in-window count, busiest first.
    pub active_windows: Vec<ActiveWindow>,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectActivity {
    pub subject: SubjectId,
    pub total_requests: u64,
    pub active_windows: usize,
    pub last_request: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSubjects {
    pub subjects: Vec<SubjectActivity>,
    /// Live keys whose read failed and are left out of the ranking.
    pub degraded_windows: usize,
    pub generated_at: i64,
}

/// Rate limit monitor.
pub struct RateLimitMonitor {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    resources: Vec<MonitoredResource>,
    fallback: RateLimitPolicy,
}

impl RateLimitMonitor {
    pub fn new(
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        resources: Vec<MonitoredResource>,
    ) -> Self {
        Self {
            store,
            clock,
            resources,
            fallback: PolicyPreset::General.policy(),
        }
    }

    pub fn resources(&self) -> &[MonitoredResource] {
        &self.resources
    }

    /// Policy used to read windows of `resource`. Unknown resources are read
    /// with the general preset.
    fn policy_for(&self, resource: &str) -> &RateLimitPolicy {
        self.resources
            .iter()
            .find(|r| r.resource == resource)
            .map(|r| &r.policy)
            .unwrap_or(&self.fallback)
    }

    /// Windows of one subject across every monitored resource, or only
    /// `resource` when given.
    pub async fn subject_stats(
        &self,
        subject: &SubjectId,
        resource: Option<&str>,
    ) -> Result<SubjectStats, DomainError> {
        let targets: Vec<(RateLimitKey, &RateLimitPolicy)> = match resource {
            Some(resource) => vec![(
                RateLimitKey::new(subject.clone(), resource)?,
                self.policy_for(resource),
            )],
            None => self
                .resources
                .iter()
                .map(|r| {
                    RateLimitKey::new(subject.clone(), r.resource.as_str())
                        .map(|key| (key, &r.policy))
                })
                .collect::<Result<_, DomainError>>()?,
        };

        let readings = join_all(
            targets
                .iter()
                .map(|(key, policy)| read_status(self.store.as_ref(), key, policy)),
        )
        .await;

        let now = self.clock.now_millis();
        let windows: Vec<ResourceWindowStats> = targets
            .iter()
            .zip(readings.iter())
            .map(|((key, policy), reading)| {
                ResourceWindowStats::new(key.resource(), policy, reading, now)
            })
            .collect();

        Ok(SubjectStats {
            subject: subject.clone(),
            total_requests: windows.iter().map(|w| w.count).sum(),
            degraded_windows: windows.iter().filter(|w| w.degraded).count(),
            windows,
            generated_at: now,
        })
    }

    /// Aggregate over every live window in the store.
    pub async fn global_stats(&self) -> Result<GlobalStats, MonitorError> {
        let ActiveWindows {
            mut windows,
            degraded,
        } = self.active_windows().await?;
        windows.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.subject.cmp(&b.subject))
                .then_with(|| a.resource.cmp(&b.resource))
        });

        let total_requests: u64 = windows.iter().map(|w| u64::from(w.count)).sum();
        let total_active_windows = windows.len();
        let average_requests_per_window = if total_active_windows == 0 {
            0.0
        } else {
            total_requests as f64 / total_active_windows as f64
        };

        Ok(GlobalStats {
            summary: GlobalSummary {
                total_active_windows,
                total_requests,
                average_requests_per_window,
                saturated_windows: windows.iter().filter(|w| w.remaining == 0).count(),
                degraded_windows: degraded,
            },
            active_windows: windows,
            generated_at: self.clock.now_millis(),
        })
    }

    /// Subjects ranked by in-window requests across all their resources.
    pub async fn top_subjects(&self, limit: usize) -> Result<TopSubjects, MonitorError> {
        let ActiveWindows { windows, degraded } = self.active_windows().await?;
        let mut by_subject: BTreeMap<SubjectId, SubjectActivity> = BTreeMap::new();

        for window in windows {
            let activity = by_subject
                .entry(window.subject.clone())
                .or_insert_with(|| SubjectActivity {
                    subject: window.subject.clone(),
                    total_requests: 0,
                    active_windows: 0,
                    last_request: None,
                });
            activity.total_requests += u64::from(window.count);
            activity.active_windows += 1;
            activity.last_request = activity.last_request.max(window.last_request);
        }

        let mut subjects: Vec<SubjectActivity> = by_subject.into_values().collect();
        // Stable sort keeps subject order among ties.
        subjects.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));
        subjects.truncate(limit);

        Ok(TopSubjects {
            subjects,
            degraded_windows: degraded,
            generated_at: self.clock.now_millis(),
        })
    }

    /// Every window holding at least one in-window entry.
    ///
    /// Fails when keys exist but none of them could be read, so an outage is
    /// never reported as an idle fleet.
    async fn active_windows(&self) -> Result<ActiveWindows, MonitorError> {
        let raw_keys = self
            .store
            .scan_keys("*")
            .await
            .map_err(MonitorError::DataUnavailable)?;

        let keys: Vec<RateLimitKey> = raw_keys
            .iter()
            .filter_map(|raw| {
                let key = RateLimitKey::parse(raw);
                if key.is_none() {
                    tracing::debug!(key = %raw, "Skipping unrecognised window key");
                }
                key
            })
            .collect();

        let readings = join_all(keys.iter().map(|key| {
            read_status(self.store.as_ref(), key, self.policy_for(key.resource()))
        }))
        .await;

        let total = keys.len();
        let mut windows = Vec::new();
        let mut failures = Vec::new();
        for (key, reading) in keys.into_iter().zip(readings) {
            let reading = match reading {
                Ok(reading) if reading.count > 0 => reading,
                Ok(_) => continue,
                Err(e) => {
                    failures.push(e);
                    continue;
                }
            };
            let limit = self.policy_for(key.resource()).max_requests();
            windows.push(ActiveWindow {
                resource: key.resource().to_string(),
                subject: key.subject().clone(),
                count: reading.count,
                remaining: limit.saturating_sub(reading.count),
                limit,
                last_request: reading.newest(),
            });
        }

        let degraded = failures.len();
        if degraded > 0 && degraded == total {
            return Err(MonitorError::DataUnavailable(failures.swap_remove(0)));
        }

        Ok(ActiveWindows { windows, degraded })
    }
}

struct ActiveWindows {
    windows: Vec<ActiveWindow>,
    /// Keys whose status read failed.
    degraded: usize,
}
