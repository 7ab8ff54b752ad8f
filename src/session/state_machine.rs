//! Lifecycle of a duel session, from invitation to a terminal result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status stored on the shared session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Invitation created, waiting for the opponent to respond.
    Pending,
    /// Opponent accepted; the initiator still has to configure the match.
    Accepted,
    /// Opponent declined the invitation.
    Rejected,
    /// Category, difficulty, and question set are fixed; play can start.
    Ready,
    /// The match is running question by question.
    Active,
    /// Every question was played to the end.
    Completed,
    /// A participant cancelled or left before the match finished.
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transition is defined out of this status.
    ///
    /// A peer observing a terminal snapshot must stop its timer and
    /// subscription and surface the result locally.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Rejected | SessionStatus::Completed | SessionStatus::Cancelled
        )
    }
}

/// Events that move a session between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The invitee accepts the invitation.
    Accept,
    /// The invitee declines the invitation.
    Reject,
    /// The initiator fixes category, difficulty, and question set.
    Configure,
    /// The initiator marks the match as started.
    Begin,
    /// The authority moves the question pointer forward.
    Advance,
    /// The authority finishes the match after the last question.
    Complete,
    /// Either participant cancels or leaves.
    Cancel,
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was received.
    pub from: SessionStatus,
    /// The event that cannot be applied from that status.
    pub event: SessionEvent,
}

/// Compute the status an event transitions to, if the transition is valid.
///
/// A `Pending` session that never receives a response stays `Pending`
/// forever; the only exit is an explicit `Cancel`.
pub fn next_status(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    let next = match (from, event) {
        (SessionStatus::Pending, SessionEvent::Accept) => SessionStatus::Accepted,
        (SessionStatus::Pending, SessionEvent::Reject) => SessionStatus::Rejected,
        (SessionStatus::Accepted, SessionEvent::Configure) => SessionStatus::Ready,
        (SessionStatus::Ready, SessionEvent::Begin) => SessionStatus::Active,
        (SessionStatus::Active, SessionEvent::Advance) => SessionStatus::Active,
        (SessionStatus::Active, SessionEvent::Complete) => SessionStatus::Completed,
        (from, SessionEvent::Cancel) if !from.is_terminal() => SessionStatus::Cancelled,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(from: SessionStatus, event: SessionEvent) -> SessionStatus {
        next_status(from, event).unwrap()
    }

    #[test]
    fn full_happy_path_through_a_match() {
        let mut status = SessionStatus::Pending;
        status = step(status, SessionEvent::Accept);
        assert_eq!(status, SessionStatus::Accepted);
        status = step(status, SessionEvent::Configure);
        assert_eq!(status, SessionStatus::Ready);
        status = step(status, SessionEvent::Begin);
        assert_eq!(status, SessionStatus::Active);
        status = step(status, SessionEvent::Advance);
        assert_eq!(status, SessionStatus::Active);
        status = step(status, SessionEvent::Complete);
        assert_eq!(status, SessionStatus::Completed);
        assert!(status.is_terminal());
    }

    #[test]
    fn rejection_is_terminal() {
        let status = step(SessionStatus::Pending, SessionEvent::Reject);
        assert_eq!(status, SessionStatus::Rejected);
        assert!(status.is_terminal());
    }

    #[test]
    fn cancel_is_accepted_from_every_non_terminal_status() {
        for from in [
            SessionStatus::Pending,
            SessionStatus::Accepted,
            SessionStatus::Ready,
            SessionStatus::Active,
        ] {
            assert_eq!(step(from, SessionEvent::Cancel), SessionStatus::Cancelled);
        }
    }

    #[test]
    fn terminal_statuses_admit_no_transition() {
        for from in [
            SessionStatus::Rejected,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
        ] {
            for event in [
                SessionEvent::Accept,
                SessionEvent::Reject,
                SessionEvent::Configure,
                SessionEvent::Begin,
                SessionEvent::Advance,
                SessionEvent::Complete,
                SessionEvent::Cancel,
            ] {
                let err = next_status(from, event).unwrap_err();
                assert_eq!(err.from, from);
                assert_eq!(err.event, event);
            }
        }
    }

    #[test]
    fn advancing_requires_an_active_match() {
        let err = next_status(SessionStatus::Ready, SessionEvent::Advance).unwrap_err();
        assert_eq!(err.from, SessionStatus::Ready);

        let err = next_status(SessionStatus::Accepted, SessionEvent::Begin).unwrap_err();
        assert_eq!(err.event, SessionEvent::Begin);
    }
}
