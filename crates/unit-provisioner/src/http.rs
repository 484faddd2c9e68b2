//! Provisioner backed by a remote compute API
//!
//! Units are addressed by a name derived from the session id and the
//! creation attempt, which makes `create` idempotent: a retried `PUT` for
//! the same attempt lands on the same unit, while a later attempt for the
//! same session gets a unit of its own.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

use common::error::ProvisionerError;
use common::models::{AttemptId, ResourceTemplate, UnitRef};
use common::types::UnitPresence;

use crate::UnitProvisioner;

/// Longest DNS-1123 label
const MAX_NAME_LEN: usize = 63;

const NAME_PREFIX: &str = "session-";

/// Hex digits of the hash suffix appended to altered session ids
const HASH_SUFFIX_LEN: usize = 8;

/// Hex digits of the attempt suffix
const ATTEMPT_SUFFIX_LEN: usize = 8;

/// Derives the unit name for one creation attempt of a session
///
/// The name is `session-<id>-<attempt>`: the id lowercased with every
/// character outside `[a-z0-9-]` replaced by `-`, then the first eight hex
/// digits of the attempt id. When the id had to be altered or the name would
/// exceed 63 characters, a hash of the original id is inserted so distinct
/// sessions never share a unit.
pub fn unit_name(session_id: &str, attempt: AttemptId) -> String {
    let attempt_hex = hex::encode(attempt.0.as_bytes());
    let attempt_suffix = &attempt_hex[..ATTEMPT_SUFFIX_LEN];
    let budget = MAX_NAME_LEN - ATTEMPT_SUFFIX_LEN - 1;

    let sanitized: String = session_id
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('-');

    let name = format!("{}{}", NAME_PREFIX, sanitized);
    let unaltered = !sanitized.is_empty() && sanitized == session_id;
    if unaltered && name.len() <= budget {
        return format!("{}-{}", name, attempt_suffix);
    }

    let digest = hex::encode(Sha256::digest(session_id.as_bytes()));
    let id_suffix = &digest[..HASH_SUFFIX_LEN];

    // Name is pure ASCII here, so byte and char counts agree
    let mut base: String = name.chars().take(budget - HASH_SUFFIX_LEN - 1).collect();
    while base.ends_with('-') {
        base.pop();
    }

    format!("{}-{}-{}", base, id_suffix, attempt_suffix)
}

#[derive(Serialize)]
struct CreateUnitRequest<'a> {
    session_id: &'a str,
    attempt_id: AttemptId,
    template: &'a ResourceTemplate,
}

#[derive(Deserialize)]
struct UnitResponse {
    #[serde(default)]
    unit_ref: Option<String>,
}

/// HTTP compute API client
pub struct HttpProvisioner {
    /// HTTP client
    client: Client,

    /// Base URL of the compute API
    endpoint: String,
}

impl HttpProvisioner {
    /// Creates a client for the compute API at `endpoint`
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, ProvisionerError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ProvisionerError::Permanent(format!("failed to build HTTP client: {}", e)))?;

        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        info!("Using compute API at {}", endpoint);

        Ok(Self { client, endpoint })
    }

    fn unit_url(&self, name: &str) -> String {
        format!("{}/units/{}", self.endpoint, name)
    }
}

/// Maps an unexpected response status onto the failure taxonomy
fn classify(operation: &str, status: StatusCode) -> ProvisionerError {
    let message = format!("{} returned {}", operation, status);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProvisionerError::Transient(message)
    } else {
        ProvisionerError::Permanent(message)
    }
}

fn transport(operation: &str, error: reqwest::Error) -> ProvisionerError {
    if error.is_timeout() {
        warn!("{} timed out: {}", operation, error);
    }
    ProvisionerError::Transient(format!("{} failed: {}", operation, error))
}

#[async_trait]
impl UnitProvisioner for HttpProvisioner {
    async fn create(
        &self,
        session_id: &str,
        attempt: AttemptId,
        template: &ResourceTemplate,
    ) -> Result<UnitRef, ProvisionerError> {
        let name = unit_name(session_id, attempt);
        let url = self.unit_url(&name);
        debug!(session_id, %attempt, unit = %name, "PUT {}", url);

        let response = self
            .client
            .put(&url)
            .json(&CreateUnitRequest {
                session_id,
                attempt_id: attempt,
                template,
            })
            .send()
            .await
            .map_err(|e| transport("create", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify("create", status));
        }

        // The API may hand back its own reference; otherwise the name is the reference
        let body = response.text().await.map_err(|e| transport("create", e))?;
        let unit_ref = serde_json::from_str::<UnitResponse>(&body)
            .ok()
            .and_then(|r| r.unit_ref)
            .unwrap_or(name);

        Ok(UnitRef::new(unit_ref))
    }

    async fn delete(&self, unit: &UnitRef) -> Result<(), ProvisionerError> {
        let url = self.unit_url(unit.as_str());
        debug!(unit_ref = %unit, "DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| transport("delete", e))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(classify("delete", status)),
        }
    }

    async fn describe(&self, unit: &UnitRef) -> Result<UnitPresence, ProvisionerError> {
        let url = self.unit_url(unit.as_str());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport("describe", e))?;

        match response.status() {
            status if status.is_success() => Ok(UnitPresence::Present),
            StatusCode::NOT_FOUND => Ok(UnitPresence::Absent),
            status => Err(classify("describe", status)),
        }
    }
}
