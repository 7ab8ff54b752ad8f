//! The shared session record and the conditional writes peers may apply to it.
//!
//! Every precondition lives in [`SessionRecord::apply_patch`] so each store
//! backend enforces the same rules under its own per-record lock. A rejected
//! patch leaves the record untouched; callers treat rejection as a no-op.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::questions::{Difficulty, QuestionId};
use crate::session::state_machine::{self, InvalidTransition, SessionEvent, SessionStatus};

/// Identifier of one duel session record.
pub type SessionId = Uuid;
/// Stable identifier of a participant, supplied by the identity layer.
pub type ParticipantId = Uuid;

/// Answer recorded for one participant on one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "choice")]
pub enum AnswerValue {
    /// The participant picked the choice at this index.
    Choice(usize),
    /// The countdown ran out before the participant answered; always scored
    /// as incorrect.
    TimedOut,
}

impl AnswerValue {
    /// Whether this answer picked the given correct choice.
    pub fn is_correct(self, correct: usize) -> bool {
        matches!(self, AnswerValue::Choice(picked) if picked == correct)
    }
}

/// The single source of truth for one match, shared through the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Primary key of the session.
    pub id: SessionId,
    /// Bound participants, initiator first. At most two; immutable once both
    /// are bound.
    pub participants: Vec<ParticipantId>,
    /// Lifecycle status, driven by [`state_machine::next_status`].
    pub status: SessionStatus,
    /// The participant acting as progression authority. Immutable.
    pub initiator_id: ParticipantId,
    /// Category fixed at configure time.
    pub category: Option<String>,
    /// Difficulty fixed at configure time.
    pub difficulty: Option<Difficulty>,
    /// Ordered question set, fixed once the session reaches `Ready`.
    pub question_ids: Vec<QuestionId>,
    /// Pointer to the question currently being played. Non-decreasing and
    /// written only by the authority.
    pub current_question_index: usize,
    /// Per-question answers, keyed by participant. Each entry is written at
    /// most once.
    pub answers: Vec<IndexMap<ParticipantId, AnswerValue>>,
    /// Scores, mutated only through commutative deltas.
    pub scores: IndexMap<ParticipantId, u32>,
    /// Participant who deserted a running match, if any.
    pub left_by: Option<ParticipantId>,
    /// Participant who cancelled before the match started, if any.
    pub cancelled_by: Option<ParticipantId>,
    /// Store-assigned start timestamp. Display only, never protocol input.
    pub started_at: Option<OffsetDateTime>,
    /// Store-assigned timestamp of the last committed write. Display only.
    pub updated_at: OffsetDateTime,
}

/// Conditional writes a peer can issue against a session record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPatch {
    /// The invitee accepts; binds the second participant on open challenges.
    Accept {
        /// Responding participant.
        by: ParticipantId,
    },
    /// The invitee declines the invitation.
    Reject {
        /// Responding participant.
        by: ParticipantId,
    },
    /// The initiator fixes category, difficulty, and the question set.
    Configure {
        /// Issuing participant; must be the initiator.
        by: ParticipantId,
        /// Chosen category.
        category: String,
        /// Chosen difficulty.
        difficulty: Difficulty,
        /// Ordered question set for the whole match.
        question_ids: Vec<QuestionId>,
    },
    /// The authority marks the match as started.
    Begin {
        /// Issuing participant; must be the initiator.
        by: ParticipantId,
    },
    /// A participant records its answer for one question.
    SubmitAnswer {
        /// Question index the answer belongs to.
        index: usize,
        /// Answering participant.
        by: ParticipantId,
        /// The recorded answer.
        answer: AnswerValue,
    },
    /// The authority moves the question pointer to the next index.
    Advance {
        /// Issuing participant; must be the initiator.
        by: ParticipantId,
        /// Target index; must follow the current one.
        to_index: usize,
    },
    /// The authority finishes the match after the last question.
    Complete {
        /// Issuing participant; must be the initiator.
        by: ParticipantId,
    },
    /// Either participant cancels or leaves the session.
    Cancel {
        /// Issuing participant.
        by: ParticipantId,
    },
}

/// Reason a conditional write was refused. Peers log these at debug level
/// and move on; none of them is surfaced as a user-facing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteRejected {
    /// The record reached a terminal status; nothing may change any more.
    #[error("record is terminal ({status:?})")]
    Terminal {
        /// The terminal status observed.
        status: SessionStatus,
    },
    /// The writer is not bound to this session.
    #[error("`{id}` is not a participant of this session")]
    NotParticipant {
        /// Offending writer.
        id: ParticipantId,
    },
    /// The write is reserved for the progression authority.
    #[error("`{id}` is not the progression authority")]
    NotAuthority {
        /// Offending writer.
        id: ParticipantId,
    },
    /// The initiator tried to answer its own invitation.
    #[error("the initiator cannot respond to its own invitation")]
    SelfResponse,
    /// An answer for this participant and question already exists.
    #[error("answer for question {index} already recorded")]
    AlreadyAnswered {
        /// Question index of the duplicate submit.
        index: usize,
    },
    /// Answers are only accepted while the match is ready or active.
    #[error("answers are not accepted while {status:?}")]
    NotAcceptingAnswers {
        /// Status at the time of the write.
        status: SessionStatus,
    },
    /// The referenced question index does not exist.
    #[error("question index {index} is out of range")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
    },
    /// The pointer may only move forward one question at a time.
    #[error("advance to {to_index} does not follow current index {current}")]
    NonSequentialAdvance {
        /// Pointer value at the time of the write.
        current: usize,
        /// Requested target.
        to_index: usize,
    },
    /// Completion was requested while unplayed questions remain.
    #[error("the match still has unplayed questions")]
    QuestionsRemaining,
    /// A match cannot be configured without questions.
    #[error("question set must not be empty")]
    EmptyQuestionSet,
    /// The status does not admit this event at all.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl SessionRecord {
    /// Create a pending invitation addressed to a known opponent.
    pub fn invitation(
        initiator: ParticipantId,
        invitee: ParticipantId,
        now: OffsetDateTime,
    ) -> Self {
        let mut record = Self::bare(initiator, now);
        record.participants.push(invitee);
        record.scores.insert(invitee, 0);
        record
    }

    /// Create a pending open challenge; the opponent binds on accept.
    pub fn open_challenge(initiator: ParticipantId, now: OffsetDateTime) -> Self {
        Self::bare(initiator, now)
    }

    fn bare(initiator: ParticipantId, now: OffsetDateTime) -> Self {
        let mut scores = IndexMap::new();
        scores.insert(initiator, 0);
        Self {
            id: Uuid::new_v4(),
            participants: vec![initiator],
            status: SessionStatus::Pending,
            initiator_id: initiator,
            category: None,
            difficulty: None,
            question_ids: Vec::new(),
            current_question_index: 0,
            answers: Vec::new(),
            scores,
            left_by: None,
            cancelled_by: None,
            started_at: None,
            updated_at: now,
        }
    }

    /// Whether the given id is bound to this session.
    pub fn is_participant(&self, id: ParticipantId) -> bool {
        self.participants.contains(&id)
    }

    /// The other bound participant, if both are bound.
    pub fn opponent_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        if self.participants.len() < 2 || !self.is_participant(id) {
            return None;
        }
        self.participants.iter().copied().find(|p| *p != id)
    }

    /// Number of questions the match was configured with.
    pub fn question_count(&self) -> usize {
        self.question_ids.len()
    }

    /// Answers recorded so far for the given question index.
    pub fn answers_for(&self, index: usize) -> Option<&IndexMap<ParticipantId, AnswerValue>> {
        self.answers.get(index)
    }

    /// Whether both participants have an answer recorded for the index.
    pub fn both_answered(&self, index: usize) -> bool {
        self.participants.len() == 2
            && self
                .answers
                .get(index)
                .is_some_and(|entries| entries.len() == 2)
    }

    /// Apply a conditional write, leaving the record untouched on rejection.
    ///
    /// `now` is the store-assigned commit timestamp; it lands in
    /// `updated_at` (and `started_at` for `Begin`) on success.
    pub fn apply_patch(
        &mut self,
        patch: RecordPatch,
        now: OffsetDateTime,
    ) -> Result<(), WriteRejected> {
        if self.status.is_terminal() {
            return Err(WriteRejected::Terminal {
                status: self.status,
            });
        }

        match patch {
            RecordPatch::Accept { by } => {
                let next = state_machine::next_status(self.status, SessionEvent::Accept)?;
                if by == self.initiator_id {
                    return Err(WriteRejected::SelfResponse);
                }
                if self.participants.len() < 2 {
                    self.participants.push(by);
                    self.scores.insert(by, 0);
                } else if !self.is_participant(by) {
                    return Err(WriteRejected::NotParticipant { id: by });
                }
                self.status = next;
            }
            RecordPatch::Reject { by } => {
                let next = state_machine::next_status(self.status, SessionEvent::Reject)?;
                if by == self.initiator_id {
                    return Err(WriteRejected::SelfResponse);
                }
                if !self.is_participant(by) {
                    return Err(WriteRejected::NotParticipant { id: by });
                }
                self.status = next;
            }
            RecordPatch::Configure {
                by,
                category,
                difficulty,
                question_ids,
            } => {
                let next = state_machine::next_status(self.status, SessionEvent::Configure)?;
                if by != self.initiator_id {
                    return Err(WriteRejected::NotAuthority { id: by });
                }
                if question_ids.is_empty() {
                    return Err(WriteRejected::EmptyQuestionSet);
                }
                self.category = Some(category);
                self.difficulty = Some(difficulty);
                self.answers = vec![IndexMap::new(); question_ids.len()];
                self.question_ids = question_ids;
                self.status = next;
            }
            RecordPatch::Begin { by } => {
                let next = state_machine::next_status(self.status, SessionEvent::Begin)?;
                if by != self.initiator_id {
                    return Err(WriteRejected::NotAuthority { id: by });
                }
                self.started_at = Some(now);
                self.status = next;
            }
            RecordPatch::SubmitAnswer { index, by, answer } => {
                if !matches!(self.status, SessionStatus::Ready | SessionStatus::Active) {
                    return Err(WriteRejected::NotAcceptingAnswers {
                        status: self.status,
                    });
                }
                if !self.is_participant(by) {
                    return Err(WriteRejected::NotParticipant { id: by });
                }
                let Some(entries) = self.answers.get_mut(index) else {
                    return Err(WriteRejected::IndexOutOfRange { index });
                };
                if entries.contains_key(&by) {
                    return Err(WriteRejected::AlreadyAnswered { index });
                }
                entries.insert(by, answer);
            }
            RecordPatch::Advance { by, to_index } => {
                let next = state_machine::next_status(self.status, SessionEvent::Advance)?;
                if by != self.initiator_id {
                    return Err(WriteRejected::NotAuthority { id: by });
                }
                if to_index != self.current_question_index + 1 {
                    return Err(WriteRejected::NonSequentialAdvance {
                        current: self.current_question_index,
                        to_index,
                    });
                }
                if to_index >= self.question_ids.len() {
                    return Err(WriteRejected::IndexOutOfRange { index: to_index });
                }
                self.current_question_index = to_index;
                self.status = next;
            }
            RecordPatch::Complete { by } => {
                let next = state_machine::next_status(self.status, SessionEvent::Complete)?;
                if by != self.initiator_id {
                    return Err(WriteRejected::NotAuthority { id: by });
                }
                if self.current_question_index + 1 != self.question_ids.len() {
                    return Err(WriteRejected::QuestionsRemaining);
                }
                self.status = next;
            }
            RecordPatch::Cancel { by } => {
                let next = state_machine::next_status(self.status, SessionEvent::Cancel)?;
                if !self.is_participant(by) {
                    return Err(WriteRejected::NotParticipant { id: by });
                }
                if self.status == SessionStatus::Active {
                    self.left_by = Some(by);
                } else {
                    self.cancelled_by = Some(by);
                }
                self.status = next;
            }
        }

        self.updated_at = now;
        Ok(())
    }

    /// Apply a commutative score delta for one participant.
    ///
    /// This is the record-side half of the store's atomic increment; it is
    /// never exposed as a read-modify-write to peers.
    pub fn apply_score_delta(
        &mut self,
        participant: ParticipantId,
        delta: u32,
        now: OffsetDateTime,
    ) -> Result<(), WriteRejected> {
        if self.status.is_terminal() {
            return Err(WriteRejected::Terminal {
                status: self.status,
            });
        }
        let Some(score) = self.scores.get_mut(&participant) else {
            return Err(WriteRejected::NotParticipant { id: participant });
        };
        *score += delta;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    fn configured_record() -> (SessionRecord, ParticipantId, ParticipantId) {
        let initiator = Uuid::new_v4();
        let invitee = Uuid::new_v4();
        let mut record = SessionRecord::invitation(initiator, invitee, now());
        record
            .apply_patch(RecordPatch::Accept { by: invitee }, now())
            .unwrap();
        record
            .apply_patch(
                RecordPatch::Configure {
                    by: initiator,
                    category: "history".into(),
                    difficulty: Difficulty::Medium,
                    question_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
                },
                now(),
            )
            .unwrap();
        record
            .apply_patch(RecordPatch::Begin { by: initiator }, now())
            .unwrap();
        (record, initiator, invitee)
    }

    #[test]
    fn accept_binds_the_second_participant_on_open_challenges() {
        let initiator = Uuid::new_v4();
        let joiner = Uuid::new_v4();
        let mut record = SessionRecord::open_challenge(initiator, now());
        assert_eq!(record.participants.len(), 1);

        record
            .apply_patch(RecordPatch::Accept { by: joiner }, now())
            .unwrap();
        assert_eq!(record.status, SessionStatus::Accepted);
        assert_eq!(record.participants, vec![initiator, joiner]);
        assert_eq!(record.scores.get(&joiner), Some(&0));
    }

    #[test]
    fn initiator_cannot_respond_to_its_own_invitation() {
        let initiator = Uuid::new_v4();
        let mut record = SessionRecord::invitation(initiator, Uuid::new_v4(), now());
        let err = record
            .apply_patch(RecordPatch::Accept { by: initiator }, now())
            .unwrap_err();
        assert_eq!(err, WriteRejected::SelfResponse);
        assert_eq!(record.status, SessionStatus::Pending);
    }

    #[test]
    fn configure_is_reserved_for_the_initiator() {
        let initiator = Uuid::new_v4();
        let invitee = Uuid::new_v4();
        let mut record = SessionRecord::invitation(initiator, invitee, now());
        record
            .apply_patch(RecordPatch::Accept { by: invitee }, now())
            .unwrap();

        let err = record
            .apply_patch(
                RecordPatch::Configure {
                    by: invitee,
                    category: "history".into(),
                    difficulty: Difficulty::Easy,
                    question_ids: vec![Uuid::new_v4()],
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(err, WriteRejected::NotAuthority { id: invitee });
    }

    #[test]
    fn answers_are_write_once_per_participant_and_question() {
        let (mut record, _, invitee) = configured_record();

        record
            .apply_patch(
                RecordPatch::SubmitAnswer {
                    index: 0,
                    by: invitee,
                    answer: AnswerValue::Choice(1),
                },
                now(),
            )
            .unwrap();

        let err = record
            .apply_patch(
                RecordPatch::SubmitAnswer {
                    index: 0,
                    by: invitee,
                    answer: AnswerValue::Choice(2),
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(err, WriteRejected::AlreadyAnswered { index: 0 });
        assert_eq!(
            record.answers_for(0).unwrap().get(&invitee),
            Some(&AnswerValue::Choice(1))
        );
    }

    #[test]
    fn advance_is_sequential_and_authority_only() {
        let (mut record, initiator, invitee) = configured_record();

        let err = record
            .apply_patch(
                RecordPatch::Advance {
                    by: invitee,
                    to_index: 1,
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(err, WriteRejected::NotAuthority { id: invitee });

        let err = record
            .apply_patch(
                RecordPatch::Advance {
                    by: initiator,
                    to_index: 2,
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            WriteRejected::NonSequentialAdvance {
                current: 0,
                to_index: 2
            }
        );

        record
            .apply_patch(
                RecordPatch::Advance {
                    by: initiator,
                    to_index: 1,
                },
                now(),
            )
            .unwrap();
        assert_eq!(record.current_question_index, 1);

        // A duplicate of the same advance is refused, so the pointer can
        // never move twice for one question.
        let err = record
            .apply_patch(
                RecordPatch::Advance {
                    by: initiator,
                    to_index: 1,
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            WriteRejected::NonSequentialAdvance {
                current: 1,
                to_index: 1
            }
        );
    }

    #[test]
    fn completion_requires_the_last_question() {
        let (mut record, initiator, _) = configured_record();

        let err = record
            .apply_patch(RecordPatch::Complete { by: initiator }, now())
            .unwrap_err();
        assert_eq!(err, WriteRejected::QuestionsRemaining);

        record
            .apply_patch(
                RecordPatch::Advance {
                    by: initiator,
                    to_index: 1,
                },
                now(),
            )
            .unwrap();
        record
            .apply_patch(RecordPatch::Complete { by: initiator }, now())
            .unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
    }

    #[test]
    fn terminal_records_are_frozen() {
        let (mut record, initiator, invitee) = configured_record();
        record
            .apply_patch(RecordPatch::Cancel { by: invitee }, now())
            .unwrap();
        assert_eq!(record.status, SessionStatus::Cancelled);
        assert_eq!(record.left_by, Some(invitee));

        let err = record
            .apply_patch(
                RecordPatch::SubmitAnswer {
                    index: 0,
                    by: initiator,
                    answer: AnswerValue::Choice(0),
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, WriteRejected::Terminal { .. }));

        let err = record.apply_score_delta(initiator, 10, now()).unwrap_err();
        assert!(matches!(err, WriteRejected::Terminal { .. }));
    }

    #[test]
    fn cancelling_before_the_match_starts_records_cancelled_by() {
        let initiator = Uuid::new_v4();
        let invitee = Uuid::new_v4();
        let mut record = SessionRecord::invitation(initiator, invitee, now());
        record
            .apply_patch(RecordPatch::Cancel { by: initiator }, now())
            .unwrap();
        assert_eq!(record.cancelled_by, Some(initiator));
        assert_eq!(record.left_by, None);
    }

    #[test]
    fn score_deltas_accumulate() {
        let (mut record, initiator, _) = configured_record();
        record.apply_score_delta(initiator, 10, now()).unwrap();
        record.apply_score_delta(initiator, 10, now()).unwrap();
        assert_eq!(record.scores.get(&initiator), Some(&20));
    }

    #[test]
    fn begin_stamps_the_start_timestamp() {
        let (record, _, _) = configured_record();
        assert_eq!(record.status, SessionStatus::Active);
        assert!(record.started_at.is_some());
    }
}
