//! Error types for the orchestration layer.

use crate::project::ProjectId;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating projects.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Input Validation Errors
    // =========================================================================
    /// Malformed input value (bad project ID, resource below minimum,
    /// invalid path). Always local, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Registry Precondition Errors
    // =========================================================================
    /// Project is already registered.
    #[error("project already exists: {0}")]
    AlreadyExists(ProjectId),

    /// Project is not registered.
    #[error("no such project: {0}")]
    NoSuchProject(ProjectId),

    /// Update attempted to change an identity-bearing field.
    #[error("project '{id}': {field} must not change on update: old '{old}', new '{new}'")]
    ImmutableFieldChanged {
        id: ProjectId,
        field: &'static str,
        old: String,
        new: String,
    },

    // =========================================================================
    // Admission Control Errors
    // =========================================================================
    /// The change would overcommit the host memory quota.
    #[error("memory quota exceeded: {usage_mb} Mb needed but only {limit_mb} Mb available")]
    QuotaExceeded { usage_mb: u64, limit_mb: u64 },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// A shelled-out backend command exited non-zero.
    #[error("'{command}' failed with exit code {exit_code}: {output}")]
    BackendCommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A backend HTTP endpoint returned a non-2xx status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    BackendHttpFailed {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The resource never existed at the backend. Distinguished from a
    /// generic backend failure so that deletes can treat it as a no-op.
    #[error("not found in backend: {0}")]
    NotFoundInBackend(String),

    /// A backend did not reach the expected state within the polling
    /// window.
    #[error("timed out: {0}")]
    Timeout(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error (connection refused, timeout, ...).
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}
