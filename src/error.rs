use std::path::PathBuf;

use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::state::session::InvalidTransition;

/// Errors raised by the synchronisation layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store or awareness channel has not been joined by this client.
    #[error("`{target}` is not joined")]
    NotJoined { target: String },
    /// The connection to the hub has been closed.
    #[error("connection closed")]
    Disconnected,
    /// A handle with the same name already exists with another value type.
    #[error("`{target}` is already registered with a different type")]
    TypeMismatch { target: String },
    /// Store names must be non-empty and well formed.
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
    /// Document state could not be converted to or from its typed form.
    #[error("failed to encode or decode document state: {0}")]
    Codec(#[from] serde_json::Error),
    /// A device-local store could not be written to disk.
    #[error("failed to persist local store at {}", path.display())]
    LocalPersistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn not_joined(target: impl ToString) -> Self {
        SyncError::NotJoined {
            target: target.to_string(),
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The synchronisation layer rejected the operation.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        let message = err
            .message
            .map(|message| message.into_owned())
            .unwrap_or_else(|| err.code.into_owned());
        ServiceError::InvalidInput(message)
    }
}
