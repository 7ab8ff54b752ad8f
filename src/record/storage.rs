use std::error::Error;

use thiserror::Error;

use crate::session::SessionId;

/// Result alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by record store backends regardless of the underlying service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached or failed mid-operation.
    #[error("record store unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failure.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// No record exists for the addressed session.
    #[error("session `{0}` not found")]
    SessionNotFound(SessionId),
    /// A record with this session id already exists.
    #[error("session `{0}` already exists")]
    DuplicateSession(SessionId),
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
