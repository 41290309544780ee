use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error response from the control plane.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message}: {reason}")]
pub struct ErrorResponse {
    /// The status
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

impl ErrorResponse {
    /// A `404 NotFound` response for the named object
    pub fn not_found(kind: &str, name: &str) -> Self {
        Self {
            status: "Failure".into(),
            message: format!("{kind} \"{name}\" not found"),
            reason: "NotFound".into(),
            code: 404,
        }
    }

    /// A `409 AlreadyExists` response for the named object
    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self {
            status: "Failure".into(),
            message: format!("{kind} \"{name}\" already exists"),
            reason: "AlreadyExists".into(),
            code: 409,
        }
    }

    /// A `409 Conflict` response for a stale write
    pub fn conflict(kind: &str, name: &str) -> Self {
        Self {
            status: "Failure".into(),
            message: format!(
                "Operation cannot be fulfilled on {kind} \"{name}\": the object has been modified"
            ),
            reason: "Conflict".into(),
            code: 409,
        }
    }

    /// A `500 InternalError` response carrying `message`
    pub fn internal(message: &str) -> Self {
        Self {
            status: "Failure".into(),
            message: message.to_string(),
            reason: "InternalError".into(),
            code: 500,
        }
    }
}

/// Failed to parse a [`ResourceKind`](crate::ResourceKind) from its name.
#[derive(Debug, Error)]
#[error("unknown resource kind: {0}")]
pub struct ParseKindError(pub String);
