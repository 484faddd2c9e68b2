//! Common types for the session orchestrator
//!
//! This crate provides the shared data model (session records, leases,
//! resource templates), the error taxonomy, and small utilities used by
//! every other crate in the workspace.

pub mod error;
pub mod models;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, ProvisionerError, Result, SessionError, StoreError};
pub use models::*;
pub use types::*;
