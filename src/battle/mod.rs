//! Head-to-head battle protocol: lobby operations plus the per-peer engine.
//!
//! The lobby functions cover everything that happens before a peer engine
//! runs: creating a session (by invitation or open challenge), responding,
//! configuring the match, and cancelling a stale session. Each is a thin
//! conditional write; the record-level preconditions do the real guarding.

pub mod events;
pub mod peer;
pub mod round;

use time::OffsetDateTime;
use tracing::info;

use crate::config::MatchRules;
use crate::error::ServiceError;
use crate::questions::{Difficulty, QuestionBank};
use crate::record::{RecordStore, WriteOutcome};
use crate::session::{ParticipantId, RecordPatch, SessionId, SessionRecord, SessionStatus};

pub use self::events::{BattleEvent, BattleEventHub};
pub use self::peer::{BattlePeer, PeerHandle};
pub use self::round::{QuestionPhase, RoundState};

/// Create a pending invitation addressed to a known opponent.
pub async fn create_invitation(
    store: &dyn RecordStore,
    initiator: ParticipantId,
    invitee: ParticipantId,
) -> Result<SessionId, ServiceError> {
    if initiator == invitee {
        return Err(ServiceError::InvalidInput("cannot invite yourself".into()));
    }

    let record = SessionRecord::invitation(initiator, invitee, OffsetDateTime::now_utc());
    let id = record.id;
    store.create(record).await?;
    info!(session = %id, %initiator, %invitee, "invitation created");
    Ok(id)
}

/// Create a pending open challenge; any other participant may join it.
pub async fn create_open_challenge(
    store: &dyn RecordStore,
    initiator: ParticipantId,
) -> Result<SessionId, ServiceError> {
    let record = SessionRecord::open_challenge(initiator, OffsetDateTime::now_utc());
    let id = record.id;
    store.create(record).await?;
    info!(session = %id, %initiator, "open challenge created");
    Ok(id)
}

/// Accept or decline an invitation.
pub async fn respond_to_invitation(
    store: &dyn RecordStore,
    session_id: SessionId,
    self_id: ParticipantId,
    accept: bool,
) -> Result<(), ServiceError> {
    let patch = if accept {
        RecordPatch::Accept { by: self_id }
    } else {
        RecordPatch::Reject { by: self_id }
    };

    match store.apply(session_id, patch).await? {
        WriteOutcome::Applied(_) => Ok(()),
        WriteOutcome::Rejected(reason) => Err(reason.into()),
    }
}

/// Join an open challenge, binding the caller as the second participant.
pub async fn join_challenge(
    store: &dyn RecordStore,
    session_id: SessionId,
    self_id: ParticipantId,
) -> Result<(), ServiceError> {
    respond_to_invitation(store, session_id, self_id, true).await
}

/// Fix category, difficulty, and the question set for an accepted session.
///
/// Only the initiator may configure; the question set is drawn from the
/// bank once and never re-fetched while the match runs.
pub async fn configure_match(
    store: &dyn RecordStore,
    bank: &dyn QuestionBank,
    session_id: SessionId,
    self_id: ParticipantId,
    category: &str,
    difficulty: Difficulty,
    rules: &MatchRules,
) -> Result<(), ServiceError> {
    let Some(record) = store.fetch(session_id).await? else {
        return Err(ServiceError::NotFound(format!("session `{session_id}`")));
    };
    if record.initiator_id != self_id {
        return Err(ServiceError::Unauthorized(
            "only the initiator can configure the match".into(),
        ));
    }
    if record.status != SessionStatus::Accepted {
        return Err(ServiceError::InvalidState(format!(
            "match cannot be configured while {:?}",
            record.status
        )));
    }

    let questions = bank
        .draw(category, difficulty, rules.question_count)
        .await?;
    let question_ids = questions.iter().map(|question| question.id).collect();

    match store
        .apply(
            session_id,
            RecordPatch::Configure {
                by: self_id,
                category: category.into(),
                difficulty,
                question_ids,
            },
        )
        .await?
    {
        WriteOutcome::Applied(_) => {
            info!(session = %session_id, category, ?difficulty, "match configured");
            Ok(())
        }
        WriteOutcome::Rejected(reason) => Err(reason.into()),
    }
}

/// Cancel a session outside a running engine, e.g. a stale invitation that
/// was never answered.
pub async fn cancel_session(
    store: &dyn RecordStore,
    session_id: SessionId,
    self_id: ParticipantId,
) -> Result<(), ServiceError> {
    match store
        .apply(session_id, RecordPatch::Cancel { by: self_id })
        .await?
    {
        WriteOutcome::Applied(_) => Ok(()),
        WriteOutcome::Rejected(reason) => Err(reason.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::questions::{FixtureBank, Question};
    use crate::record::memory::MemoryRecordStore;

    fn rules() -> MatchRules {
        MatchRules {
            question_count: 2,
            question_duration: Duration::from_secs(10),
            reveal_hold: Duration::ZERO,
            points_per_correct: 10,
        }
    }

    fn bank() -> FixtureBank {
        let mut bank = FixtureBank::new();
        for i in 0..2 {
            bank.push(
                "sports",
                Difficulty::Easy,
                Question::new(format!("question {i}"), vec!["a".into(), "b".into()], 0),
            );
        }
        bank
    }

    #[tokio::test]
    async fn self_invitations_are_refused() {
        let store = MemoryRecordStore::new();
        let me = Uuid::new_v4();
        let err = create_invitation(&store, me, me).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn initiator_cannot_answer_its_own_invitation() {
        let store = MemoryRecordStore::new();
        let initiator = Uuid::new_v4();
        let session = create_invitation(&store, initiator, Uuid::new_v4())
            .await
            .unwrap();

        let err = respond_to_invitation(&store, session, initiator, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn configuring_requires_the_initiator_and_an_accepted_session() {
        let store = MemoryRecordStore::new();
        let bank = bank();
        let initiator = Uuid::new_v4();
        let invitee = Uuid::new_v4();
        let session = create_invitation(&store, initiator, invitee).await.unwrap();

        let err = configure_match(
            &store,
            &bank,
            session,
            initiator,
            "sports",
            Difficulty::Easy,
            &rules(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        respond_to_invitation(&store, session, invitee, true)
            .await
            .unwrap();

        let err = configure_match(
            &store,
            &bank,
            session,
            invitee,
            "sports",
            Difficulty::Easy,
            &rules(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        configure_match(
            &store,
            &bank,
            session,
            initiator,
            "sports",
            Difficulty::Easy,
            &rules(),
        )
        .await
        .unwrap();

        let record = store.fetch(session).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Ready);
        assert_eq!(record.question_count(), 2);
        assert_eq!(record.category.as_deref(), Some("sports"));
    }

    #[tokio::test]
    async fn joining_an_open_challenge_binds_the_second_participant() {
        let store = MemoryRecordStore::new();
        let initiator = Uuid::new_v4();
        let joiner = Uuid::new_v4();
        let session = create_open_challenge(&store, initiator).await.unwrap();

        join_challenge(&store, session, joiner).await.unwrap();

        let record = store.fetch(session).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Accepted);
        assert_eq!(record.participants, vec![initiator, joiner]);
    }

    #[tokio::test]
    async fn stale_invitations_are_cleared_by_manual_cancel() {
        let store = MemoryRecordStore::new();
        let initiator = Uuid::new_v4();
        let session = create_invitation(&store, initiator, Uuid::new_v4())
            .await
            .unwrap();

        cancel_session(&store, session, initiator).await.unwrap();

        let record = store.fetch(session).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Cancelled);
        assert_eq!(record.cancelled_by, Some(initiator));
    }
}
