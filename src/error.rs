//! Service-layer error taxonomy for lobby operations.

use thiserror::Error;

use crate::questions::BankError;
use crate::record::StoreError;
use crate::session::WriteRejected;

/// Errors that can occur in lobby-level operations.
///
/// Protocol-level write rejections never reach this type; they are silent
/// no-ops by design. These errors cover the user-visible failures: an
/// invitation that cannot be created or answered, and a match that cannot
/// be configured.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Record store is unavailable.
    #[error("record store unavailable")]
    Unavailable(#[source] StoreError),
    /// The caller is not allowed to perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested session was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The question bank could not serve the match.
    #[error("question bank failure")]
    QuestionBank(#[source] BankError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => ServiceError::NotFound(format!("session `{id}`")),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<BankError> for ServiceError {
    fn from(err: BankError) -> Self {
        ServiceError::QuestionBank(err)
    }
}

impl From<WriteRejected> for ServiceError {
    fn from(reason: WriteRejected) -> Self {
        match reason {
            WriteRejected::NotAuthority { id } => ServiceError::Unauthorized(format!(
                "`{id}` is not the progression authority of this session"
            )),
            WriteRejected::NotParticipant { id } => {
                ServiceError::Unauthorized(format!("`{id}` is not bound to this session"))
            }
            WriteRejected::SelfResponse => {
                ServiceError::InvalidInput("cannot respond to your own invitation".into())
            }
            WriteRejected::EmptyQuestionSet => {
                ServiceError::InvalidInput("question set must not be empty".into())
            }
            other => ServiceError::InvalidState(other.to_string()),
        }
    }
}
