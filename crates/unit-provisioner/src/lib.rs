//! Unit provisioning for the session orchestrator
//!
//! A thin adapter around the external compute API: create, delete and
//! describe the unit of one creation attempt. Every call is idempotent by
//! identifier; a new attempt for the same session always yields a new unit.

use async_trait::async_trait;

use common::error::ProvisionerError;
use common::models::{AttemptId, ResourceTemplate, UnitRef};
use common::types::UnitPresence;

pub mod http;
pub mod memory;
pub mod timeout;

// Re-export commonly used types
pub use http::{unit_name, HttpProvisioner};
pub use memory::InMemoryProvisioner;
pub use timeout::TimeoutProvisioner;

/// Compute unit provisioner
#[async_trait]
pub trait UnitProvisioner: Send + Sync {
    /// Creates the unit of `attempt` for `session_id`, or returns the one
    /// that attempt already created
    async fn create(
        &self,
        session_id: &str,
        attempt: AttemptId,
        template: &ResourceTemplate,
    ) -> Result<UnitRef, ProvisionerError>;

    /// Deletes a unit; deleting an absent unit succeeds
    async fn delete(&self, unit: &UnitRef) -> Result<(), ProvisionerError>;

    /// Reports whether a unit exists
    async fn describe(&self, unit: &UnitRef) -> Result<UnitPresence, ProvisionerError>;
}
