//! Sliding window limiter - applies a policy to the shared window store.

use std::sync::Arc;

use crate::domain::{
    CheckOutcome, RateLimitKey, SubjectId, WindowReading, WindowSnapshot, retry_after_secs,
};
use crate::error::{DomainError, StoreError};
use crate::policy::RateLimitPolicy;
use crate::ports::{Clock, WindowStore};

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub key: RateLimitKey,
    pub allowed: bool,
    pub snapshot: WindowSnapshot,
    /// Seconds until a slot frees up. Only set on denial.
    pub retry_after: Option<u64>,
    /// The store could not be consulted and the request was let through.
    pub degraded: bool,
}

/// Limiter bound to one policy.
///
/// Admission is decided entirely by the store's atomic check, so any number
/// of limiters in any number of processes can share a store.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(
        policy: RateLimitPolicy,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Evaluate and, if admitted, record a request of `subject` on `resource`.
    ///
    /// Store failures never surface: the request is admitted with a zeroed
    /// window and `degraded` set.
    pub async fn evaluate(
        &self,
        subject: &SubjectId,
        resource: &str,
    ) -> Result<Decision, DomainError> {
        let key = RateLimitKey::new(subject.clone(), resource)?;
        let limit = self.policy.max_requests();
        let window = self.policy.window();

        let (outcome, degraded) = match self.store.check_and_record(&key, limit, window).await {
            Ok(outcome) => (outcome, false),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Window store failed, failing open");
                (CheckOutcome::fail_open(self.clock.now_millis()), true)
            }
        };

        let snapshot = WindowSnapshot::from_reading(&outcome.reading, limit, window);
        let retry_after = (!outcome.allowed).then(|| {
            retry_after_secs(
                &snapshot.request_times,
                window,
                outcome.reading.observed_at,
            )
        });

        if outcome.allowed {
            tracing::debug!(
                key = %key,
                count = snapshot.count,
                limit,
                "Request admitted"
            );
        } else {
            tracing::info!(
                key = %key,
                count = snapshot.count,
                limit,
                retry_after = retry_after.unwrap_or_default(),
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            key,
            allowed: outcome.allowed,
            snapshot,
            retry_after,
            degraded,
        })
    }

    /// Current window of `subject` on `resource` without consuming quota.
    pub async fn status(
        &self,
        subject: &SubjectId,
        resource: &str,
    ) -> Result<WindowSnapshot, DomainError> {
        let key = RateLimitKey::new(subject.clone(), resource)?;
        let reading = read_status(self.store.as_ref(), &key, &self.policy)
            .await
            .unwrap_or_else(|_| WindowReading::fail_open(self.clock.now_millis()));
        Ok(WindowSnapshot::from_reading(
            &reading,
            self.policy.max_requests(),
            self.policy.window(),
        ))
    }
}

/// Status read, logging failures. Callers pick their own fallback.
pub(crate) async fn read_status(
    store: &dyn WindowStore,
    key: &RateLimitKey,
    policy: &RateLimitPolicy,
) -> Result<WindowReading, StoreError> {
    store
        .status(key, policy.window())
        .await
        .inspect_err(|e| tracing::warn!(key = %key, error = %e, "Window status read failed"))
}
