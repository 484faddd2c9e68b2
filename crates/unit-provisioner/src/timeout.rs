//! Per-call timeout for provisioner calls

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use common::error::ProvisionerError;
use common::models::{AttemptId, ResourceTemplate, UnitRef};
use common::types::UnitPresence;
use common::utils::execute_with_timeout;

use crate::UnitProvisioner;

/// Bounds every call of the wrapped provisioner
///
/// An expired call fails with [`ProvisionerError::Timeout`], which the
/// engine handles like any other provisioner failure.
pub struct TimeoutProvisioner {
    inner: Arc<dyn UnitProvisioner>,
    timeout: Duration,
}

impl TimeoutProvisioner {
    pub fn new(inner: Arc<dyn UnitProvisioner>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Per-call budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn expired(operation: &'static str) -> impl FnOnce(Duration) -> ProvisionerError {
    move |after| {
        warn!("Provisioner {} timed out after {:?}", operation, after);
        ProvisionerError::Timeout(after)
    }
}

#[async_trait]
impl UnitProvisioner for TimeoutProvisioner {
    async fn create(
        &self,
        session_id: &str,
        attempt: AttemptId,
        template: &ResourceTemplate,
    ) -> Result<UnitRef, ProvisionerError> {
        execute_with_timeout(
            self.inner.create(session_id, attempt, template),
            self.timeout,
            expired("create"),
        )
        .await
    }

    async fn delete(&self, unit: &UnitRef) -> Result<(), ProvisionerError> {
        execute_with_timeout(self.inner.delete(unit), self.timeout, expired("delete")).await
    }

    async fn describe(&self, unit: &UnitRef) -> Result<UnitPresence, ProvisionerError> {
        execute_with_timeout(self.inner.describe(unit), self.timeout, expired("describe")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryProvisioner;

    #[tokio::test]
    async fn test_slow_create_times_out() {
        let slow = Arc::new(InMemoryProvisioner::new());
        slow.set_delay(Duration::from_millis(200));
        let provisioner = TimeoutProvisioner::new(slow, Duration::from_millis(20));

        let result = provisioner
            .create("abc", AttemptId::generate(), &ResourceTemplate::default())
            .await;
        assert_eq!(result, Err(ProvisionerError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let inner = Arc::new(InMemoryProvisioner::new());
        let provisioner = TimeoutProvisioner::new(inner.clone(), Duration::from_secs(1));

        let unit = provisioner
            .create("abc", AttemptId::generate(), &ResourceTemplate::default())
            .await
            .unwrap();
        assert_eq!(provisioner.describe(&unit).await.unwrap(), UnitPresence::Present);
        provisioner.delete(&unit).await.unwrap();
        assert_eq!(inner.delete_calls(), 1);
    }
}
