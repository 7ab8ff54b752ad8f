//! The per-client battle engine.
//!
//! One engine runs per participant. All protocol state is owned by a single
//! event-loop task that multiplexes the record's snapshot feed, the local
//! countdown, and commands from the owning UI, so no locking guards the
//! engine's state. Every local action becomes a conditional write against
//! the shared record; every remote effect arrives as a snapshot.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::battle::events::{BattleEvent, BattleEventHub};
use crate::battle::round::{QuestionPhase, RoundState};
use crate::config::MatchRules;
use crate::error::ServiceError;
use crate::questions::{Question, QuestionBank};
use crate::record::{RecordStore, SnapshotFeed, WriteOutcome};
use crate::session::{
    AnswerValue, ParticipantId, RecordPatch, SessionId, SessionRecord, SessionStatus,
};

/// Events buffered per local subscriber before the hub starts lagging.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
enum PeerCommand {
    SubmitAnswer { choice: usize },
    Leave,
}

/// Handle to a spawned battle engine.
#[derive(Debug)]
pub struct PeerHandle {
    participant: ParticipantId,
    commands: mpsc::UnboundedSender<PeerCommand>,
    events: BattleEventHub,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Participant this handle plays as.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Submit the local answer for the question currently being played.
    ///
    /// Anything after the first submit for a question is a silent local
    /// no-op, independent of network latency.
    pub fn submit_answer(&self, choice: usize) {
        let _ = self.commands.send(PeerCommand::SubmitAnswer { choice });
    }

    /// Leave the session. The engine keeps running until it observes the
    /// resulting terminal snapshot, like any other cancellation.
    pub fn leave(&self) {
        let _ = self.commands.send(PeerCommand::Leave);
    }

    /// Register a new observer for this peer's battle events.
    pub fn events(&self) -> broadcast::Receiver<BattleEvent> {
        self.events.subscribe()
    }

    /// Wait until the engine observed a terminal snapshot and stopped.
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}

/// One peer's half of the synchronization protocol.
pub struct BattlePeer {
    store: Arc<dyn RecordStore>,
    bank: Arc<dyn QuestionBank>,
    rules: MatchRules,
    session_id: SessionId,
    self_id: ParticipantId,
    events: BattleEventHub,
    questions: Option<Vec<Question>>,
    round: Option<RoundState>,
    last_record: Option<SessionRecord>,
    accept_announced: bool,
    config_announced: bool,
    begin_issued: bool,
}

impl BattlePeer {
    /// Subscribe to the session and spawn the engine task for one
    /// participant. The participant must already be bound to the session.
    pub async fn spawn(
        store: Arc<dyn RecordStore>,
        bank: Arc<dyn QuestionBank>,
        session_id: SessionId,
        self_id: ParticipantId,
        rules: MatchRules,
    ) -> Result<PeerHandle, ServiceError> {
        let Some(record) = store.fetch(session_id).await? else {
            return Err(ServiceError::NotFound(format!("session `{session_id}`")));
        };
        if !record.is_participant(self_id) {
            return Err(ServiceError::Unauthorized(format!(
                "`{self_id}` is not bound to session `{session_id}`"
            )));
        }

        let feed = store.subscribe(session_id).await?;
        let events = BattleEventHub::new(EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let peer = BattlePeer {
            store,
            bank,
            rules,
            session_id,
            self_id,
            events: events.clone(),
            questions: None,
            round: None,
            last_record: None,
            accept_announced: false,
            config_announced: false,
            begin_issued: false,
        };
        let task = tokio::spawn(peer.run(feed, command_rx));

        Ok(PeerHandle {
            participant: self_id,
            commands: command_tx,
            events,
            task,
        })
    }

    async fn run(
        mut self,
        mut feed: SnapshotFeed,
        mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    ) {
        let mut commands_open = true;
        loop {
            let deadline = self
                .round
                .as_ref()
                .filter(|round| round.timer_armed())
                .map(|round| round.deadline());

            tokio::select! {
                snapshot = feed.next() => match snapshot {
                    Some(record) => {
                        if self.on_snapshot(record).await {
                            break;
                        }
                    }
                    None => {
                        warn!(
                            session = %self.session_id,
                            "snapshot feed ended mid-session; no reconnection is attempted"
                        );
                        self.events.broadcast(BattleEvent::ConnectionLost);
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline().await;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => commands_open = false,
                },
            }
        }
    }

    /// Fold one observed snapshot into local state. Returns `true` once a
    /// terminal status was observed and the engine must stop.
    async fn on_snapshot(&mut self, record: SessionRecord) -> bool {
        if record.status == SessionStatus::Active && record.participants.len() < 2 {
            warn!(
                session = %record.id,
                "active session without two participants; ignoring snapshot"
            );
            return false;
        }

        let scores_changed = self
            .last_record
            .as_ref()
            .map(|previous| previous.scores != record.scores)
            .unwrap_or(true);
        if scores_changed {
            self.events.broadcast(BattleEvent::ScoreboardUpdated {
                scores: record.scores.clone(),
            });
        }
        self.last_record = Some(record.clone());

        match record.status {
            SessionStatus::Pending => false,
            SessionStatus::Accepted => {
                self.announce_accept(&record);
                false
            }
            SessionStatus::Rejected => {
                self.events.broadcast(BattleEvent::InviteRejected);
                true
            }
            SessionStatus::Ready | SessionStatus::Active => {
                self.announce_accept(&record);
                self.announce_configuration(&record);

                if self.questions.is_none() {
                    match self.bank.resolve(&record.question_ids).await {
                        Ok(questions) => self.questions = Some(questions),
                        Err(err) => {
                            warn!(
                                session = %record.id,
                                error = %err,
                                "failed to load question content; abandoning the match locally"
                            );
                            self.events.broadcast(BattleEvent::ConnectionLost);
                            return true;
                        }
                    }
                }

                // Entering `Active` is observing `Ready`: the authority
                // stamps the record, both peers just start playing.
                if record.status == SessionStatus::Ready
                    && record.initiator_id == self.self_id
                    && !self.begin_issued
                {
                    self.begin_issued = true;
                    self.write(RecordPatch::Begin { by: self.self_id }).await;
                }

                self.drive_round(&record);
                false
            }
            SessionStatus::Completed => {
                let winner = winner_of(&record);
                info!(session = %record.id, ?winner, "match completed");
                self.events.broadcast(BattleEvent::MatchCompleted {
                    scores: record.scores.clone(),
                    winner,
                });
                true
            }
            SessionStatus::Cancelled => {
                let walkover = record
                    .left_by
                    .and_then(|leaver| record.opponent_of(leaver));
                self.events.broadcast(BattleEvent::MatchCancelled {
                    by: record.left_by.or(record.cancelled_by),
                    walkover,
                });
                true
            }
        }
    }

    fn announce_accept(&mut self, record: &SessionRecord) {
        if self.accept_announced {
            return;
        }
        if let Some(invitee) = record.participants.get(1).copied() {
            self.accept_announced = true;
            self.events
                .broadcast(BattleEvent::InviteAccepted { by: invitee });
        }
    }

    fn announce_configuration(&mut self, record: &SessionRecord) {
        if self.config_announced {
            return;
        }
        if let (Some(category), Some(difficulty)) = (record.category.clone(), record.difficulty) {
            self.config_announced = true;
            self.events.broadcast(BattleEvent::MatchConfigured {
                category,
                difficulty,
                question_count: record.question_count(),
            });
        }
    }

    /// Reconcile the local round with the question pointer and answer map of
    /// the given snapshot.
    fn drive_round(&mut self, record: &SessionRecord) {
        let index = record.current_question_index;

        let fresh = self
            .round
            .as_ref()
            .map(|round| round.index() != index)
            .unwrap_or(true);
        if fresh {
            // Observing the pointer change is what starts the countdown;
            // peers never exchange clock values.
            self.round = Some(RoundState::start(
                index,
                Instant::now() + self.rules.question_duration,
            ));
            match self.questions.as_ref().and_then(|all| all.get(index)) {
                Some(question) => self.events.broadcast(BattleEvent::QuestionStarted {
                    index,
                    question: question.clone(),
                }),
                None => warn!(index, "record points past the resolved question set"),
            }
        }

        let Some(mut round) = self.round.take() else {
            return;
        };

        for participant in round.unseen_answerers(record) {
            self.events
                .broadcast(BattleEvent::AnswerObserved { index, participant });
        }

        // Our own answer may already be on the record (duplicate snapshot
        // delivery); keep the local gate in sync either way.
        if record
            .answers_for(index)
            .is_some_and(|entries| entries.contains_key(&self.self_id))
        {
            round.note_answered();
        }

        if record.both_answered(index) && round.begin_reveal() {
            round.disarm();
            self.emit_reveal(record, index);
            if record.initiator_id == self.self_id {
                round.arm(Instant::now() + self.rules.reveal_hold);
            }
        }

        self.round = Some(round);
    }

    /// Handle the armed deadline firing: the question countdown while
    /// answers are open, the authority's reveal hold afterwards.
    async fn on_deadline(&mut self) {
        let Some(mut round) = self.round.take() else {
            return;
        };
        round.disarm();

        match round.phase() {
            QuestionPhase::AwaitingAnswer => {
                let index = round.index();
                if round.note_answered() {
                    self.events.broadcast(BattleEvent::AnswerTimedOut { index });
                    self.write(RecordPatch::SubmitAnswer {
                        index,
                        by: self.self_id,
                        answer: AnswerValue::TimedOut,
                    })
                    .await;
                }
                self.reveal_locally(&mut round);
            }
            QuestionPhase::Answered => self.reveal_locally(&mut round),
            QuestionPhase::Revealing => self.issue_advance(&mut round).await,
            QuestionPhase::Advanced => {}
        }

        self.round = Some(round);
    }

    /// Reveal after a timeout, whether or not the opponent's answer ever
    /// arrived.
    fn reveal_locally(&self, round: &mut RoundState) {
        if !round.begin_reveal() {
            return;
        }
        if let Some(record) = self.last_record.as_ref() {
            self.emit_reveal(record, round.index());
        }
        if self.is_authority() {
            round.arm(Instant::now() + self.rules.reveal_hold);
        }
    }

    /// Issue the one advancing write for this round, or the completing one
    /// after the last question.
    async fn issue_advance(&mut self, round: &mut RoundState) {
        if !self.is_authority() || !round.take_advance_slot() {
            return;
        }
        let Some(total) = self.last_record.as_ref().map(|r| r.question_count()) else {
            return;
        };

        let patch = if round.index() + 1 >= total {
            RecordPatch::Complete { by: self.self_id }
        } else {
            RecordPatch::Advance {
                by: self.self_id,
                to_index: round.index() + 1,
            }
        };
        round.mark_advanced();
        self.write(patch).await;
    }

    async fn on_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::SubmitAnswer { choice } => {
                let Some(mut round) = self.round.take() else {
                    debug!("no question is being played; ignoring answer");
                    return;
                };
                if !round.note_answered() {
                    debug!(index = round.index(), "duplicate submit ignored");
                    self.round = Some(round);
                    return;
                }

                let index = round.index();
                let correct = self
                    .questions
                    .as_ref()
                    .and_then(|all| all.get(index))
                    .map(|question| question.correct);
                if correct == Some(choice) {
                    // The increment is awaited before the answer write so it
                    // serializes ahead of the write that can complete the
                    // match; a finished record never owes points.
                    self.increment(self.rules.points_per_correct).await;
                }

                self.write(RecordPatch::SubmitAnswer {
                    index,
                    by: self.self_id,
                    answer: AnswerValue::Choice(choice),
                })
                .await;
                self.round = Some(round);
            }
            PeerCommand::Leave => {
                self.write(RecordPatch::Cancel { by: self.self_id }).await;
            }
        }
    }

    fn emit_reveal(&self, record: &SessionRecord, index: usize) {
        let Some(correct_choice) = self
            .questions
            .as_ref()
            .and_then(|all| all.get(index))
            .map(|question| question.correct)
        else {
            warn!(index, "cannot reveal a question the bank did not resolve");
            return;
        };
        let answers = record.answers_for(index).cloned().unwrap_or_default();
        self.events.broadcast(BattleEvent::Reveal {
            index,
            correct_choice,
            answers,
        });
    }

    fn is_authority(&self) -> bool {
        self.last_record
            .as_ref()
            .is_some_and(|record| record.initiator_id == self.self_id)
    }

    async fn write(&self, patch: RecordPatch) {
        match self.store.apply(self.session_id, patch).await {
            Ok(WriteOutcome::Applied(_)) => {}
            Ok(WriteOutcome::Rejected(reason)) => {
                debug!(session = %self.session_id, %reason, "conditional write rejected; ignoring");
            }
            Err(err) => {
                warn!(session = %self.session_id, error = %err, "record write failed; not retried");
            }
        }
    }

    async fn increment(&self, delta: u32) {
        match self
            .store
            .increment_score(self.session_id, self.self_id, delta)
            .await
        {
            Ok(WriteOutcome::Applied(_)) => {}
            Ok(WriteOutcome::Rejected(reason)) => {
                debug!(session = %self.session_id, %reason, "score increment rejected; ignoring");
            }
            Err(err) => {
                warn!(session = %self.session_id, error = %err, "score increment failed; not retried");
            }
        }
    }
}

/// Higher-scoring participant, or `None` on a draw.
fn winner_of(record: &SessionRecord) -> Option<ParticipantId> {
    let mut best: Option<(ParticipantId, u32)> = None;
    let mut tied = false;
    for (participant, score) in &record.scores {
        match best {
            None => best = Some((*participant, *score)),
            Some((_, leading)) if *score > leading => {
                best = Some((*participant, *score));
                tied = false;
            }
            Some((_, leading)) if *score == leading => tied = true,
            Some(_) => {}
        }
    }
    if tied { None } else { best.map(|(p, _)| p) }
}
