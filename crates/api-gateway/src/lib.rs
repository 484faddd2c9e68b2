//! HTTP API of the session orchestrator
//!
//! The routing edge calls this API to resolve a session to its unit, to
//! report activity and to end sessions explicitly. Health and a JSON metrics
//! snapshot are served alongside.

pub mod error;
pub mod handlers;
pub mod routes;

// Re-export commonly used types
pub use error::ApiError;
pub use routes::{router, ApiState};
