//! Error handling module
//!
//! Provides the unified error type for the governance core.

use thiserror::Error;

/// Governance-core error taxonomy
///
/// `NotFound` and `PermissionDenied` are recoverable and map to
/// 404/403-equivalents at an API boundary. `Validation` is raised by the
/// boundary DTOs, never inside the engine.
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Audit log I/O error: {0}")]
    Audit(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Helper function to create a not found error
pub fn not_found(msg: impl Into<String>) -> GovernanceError {
    GovernanceError::NotFound(msg.into())
}

/// Helper function to create a permission denied error
pub fn permission_denied(msg: impl Into<String>) -> GovernanceError {
    GovernanceError::PermissionDenied(msg.into())
}
