//! Local notifications a peer engine fans out to its UI observers.

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::questions::{Difficulty, Question};
use crate::session::{AnswerValue, ParticipantId};

/// Everything a local observer needs to render the match as it unfolds.
///
/// Events mirror the peer's own view of the shared record; the two peers
/// reach the same reveal and result within one notification round-trip of
/// each other, which is what the UI needs, not a hard simultaneity
/// guarantee.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum BattleEvent {
    /// The opponent accepted the invitation.
    InviteAccepted {
        /// Accepting participant.
        by: ParticipantId,
    },
    /// The opponent declined the invitation; the session is over.
    InviteRejected,
    /// Category, difficulty, and question set are fixed; play is imminent.
    MatchConfigured {
        /// Chosen category.
        category: String,
        /// Chosen difficulty.
        difficulty: Difficulty,
        /// Number of questions in the match.
        question_count: usize,
    },
    /// A new question is up and the local countdown has started.
    QuestionStarted {
        /// Index of the question inside the match.
        index: usize,
        /// Full question content, correct choice included.
        question: Question,
    },
    /// An answer from a participant appeared on the shared record.
    AnswerObserved {
        /// Question the answer belongs to.
        index: usize,
        /// Participant whose answer was recorded.
        participant: ParticipantId,
    },
    /// The local countdown expired before this peer answered; a no-answer
    /// submission was recorded on its behalf.
    AnswerTimedOut {
        /// Question the synthesized answer belongs to.
        index: usize,
    },
    /// The correct answer is revealed; input for this question is frozen.
    Reveal {
        /// Question being revealed.
        index: usize,
        /// Index of the correct choice.
        correct_choice: usize,
        /// Answers recorded on the shared record at reveal time.
        answers: IndexMap<ParticipantId, AnswerValue>,
    },
    /// Scores changed on the shared record.
    ScoreboardUpdated {
        /// Latest observed scores.
        scores: IndexMap<ParticipantId, u32>,
    },
    /// Every question was played; final result.
    MatchCompleted {
        /// Final scores.
        scores: IndexMap<ParticipantId, u32>,
        /// Higher-scoring participant, or `None` on a draw.
        winner: Option<ParticipantId>,
    },
    /// The session ended before completion.
    MatchCancelled {
        /// Participant who cancelled or left, when recorded.
        by: Option<ParticipantId>,
        /// Participant awarded the walkover when the opponent deserted a
        /// running match.
        walkover: Option<ParticipantId>,
    },
    /// The snapshot feed or a collaborator failed mid-match; there is no
    /// automatic reconnection or resume.
    ConnectionLost,
}

/// Broadcast hub fanning battle events out to local subscribers.
#[derive(Clone, Debug)]
pub struct BattleEventHub {
    sender: broadcast::Sender<BattleEvent>,
}

impl BattleEventHub {
    /// Construct a hub backed by a broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<BattleEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a [`Stream`](futures::Stream), for observers that feed
    /// events into stream-based plumbing.
    pub fn stream(&self) -> BroadcastStream<BattleEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: BattleEvent) {
        let _ = self.sender.send(event);
    }
}
