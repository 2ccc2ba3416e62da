//! Administrative window operations: resets and bulk purges.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{RateLimitKey, SubjectId};
use crate::error::{AdminError, DomainError};
use crate::ports::WindowStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub subject: SubjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub windows_cleared: u64,
}

/// Unlike admission checks, these operations report store failures to the
/// caller.
#[derive(Clone)]
pub struct WindowAdmin {
    store: Arc<dyn WindowStore>,
}

impl WindowAdmin {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    /// Clear one window of `subject`, or all of them when `resource` is `None`.
    pub async fn reset(
        &self,
        subject: &SubjectId,
        resource: Option<&str>,
    ) -> Result<ResetOutcome, AdminError> {
        let windows_cleared = match resource {
            Some(resource) => {
                let key = RateLimitKey::new(subject.clone(), resource)?;
                u64::from(self.store.purge(&key).await?)
            }
            None => {
                self.store
                    .purge_by_pattern(&RateLimitKey::subject_pattern(subject))
                    .await?
            }
        };

        tracing::info!(
            subject = %subject,
            resource = resource.unwrap_or("*"),
            windows_cleared,
            "Rate limit windows reset"
        );

        Ok(ResetOutcome {
            subject: subject.clone(),
            resource: resource.map(str::to_string),
            windows_cleared,
        })
    }

    /// Delete every window whose `{subject}:{resource}` key matches a glob.
    pub async fn purge(&self, pattern: &str) -> Result<u64, AdminError> {
        if pattern.trim().is_empty() {
            return Err(DomainError::InvalidPattern("pattern is empty".to_string()).into());
        }

        let purged = self.store.purge_by_pattern(pattern).await?;
        tracing::info!(pattern = %pattern, purged, "Rate limit windows purged");
        Ok(purged)
    }
}
