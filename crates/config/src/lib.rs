//! Configuration management for the session orchestrator
//!
//! Settings are layered: built-in defaults, then an optional YAML/TOML file,
//! then `SESSIOND_*` environment variables.

pub mod manager;
pub mod settings;
pub mod validation;

// Re-export commonly used types
pub use manager::ConfigManager;
pub use settings::{LogSettings, OrchestratorSettings, ProvisionerKind, ProvisionerSettings};
pub use validation::{validate, ValidationError};
