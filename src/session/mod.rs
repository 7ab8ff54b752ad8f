//! Session data model and lifecycle rules shared by every store backend.

pub mod record;
pub mod state_machine;

pub use self::record::{
    AnswerValue, ParticipantId, RecordPatch, SessionId, SessionRecord, WriteRejected,
};
pub use self::state_machine::{InvalidTransition, SessionEvent, SessionStatus, next_status};
