//! Demo binary wiring tracing, the in-memory record store, and two
//! bot-driven peers through one full duel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use quiz_duel_core::battle::{self, BattleEvent, BattlePeer, PeerHandle};
use quiz_duel_core::config::MatchRules;
use quiz_duel_core::questions::{Difficulty, FixtureBank, Question, QuestionBank};
use quiz_duel_core::record::RecordStore;
use quiz_duel_core::record::memory::MemoryRecordStore;

const DEMO_CATEGORY: &str = "general knowledge";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let rules = MatchRules::load();
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let bank: Arc<dyn QuestionBank> = Arc::new(demo_bank());

    // The identity layer would normally hand these out; the demo mints them.
    let home = Uuid::new_v4();
    let away = Uuid::new_v4();

    let session = battle::create_invitation(store.as_ref(), home, away)
        .await
        .context("creating invitation")?;
    battle::respond_to_invitation(store.as_ref(), session, away, true)
        .await
        .context("accepting invitation")?;

    let home_peer = BattlePeer::spawn(store.clone(), bank.clone(), session, home, rules)
        .await
        .context("spawning home peer")?;
    let away_peer = BattlePeer::spawn(store.clone(), bank.clone(), session, away, rules)
        .await
        .context("spawning away peer")?;

    // Subscribe before the match is configured so no event is missed.
    let home_events = home_peer.events();
    let away_events = away_peer.events();
    let bots = [
        tokio::spawn(run_bot("home", home_peer, home_events)),
        tokio::spawn(run_bot("away", away_peer, away_events)),
    ];

    battle::configure_match(
        store.as_ref(),
        bank.as_ref(),
        session,
        home,
        DEMO_CATEGORY,
        Difficulty::Medium,
        &rules,
    )
    .await
    .context("configuring match")?;

    for bot in bots {
        bot.await.context("joining bot task")?;
    }

    if let Some(record) = store.fetch(session).await.context("reading final record")? {
        info!(status = ?record.status, scores = ?record.scores, "final scoreboard");
    }

    Ok(())
}

/// Play one side of the duel: answer each question after a short think,
/// right roughly six times out of ten.
async fn run_bot(
    name: &'static str,
    handle: PeerHandle,
    mut events: broadcast::Receiver<BattleEvent>,
) {
    loop {
        match events.recv().await {
            Ok(BattleEvent::QuestionStarted { index, question }) => {
                let (thinking, choice) = {
                    let mut rng = rand::rng();
                    let thinking = Duration::from_millis(rng.random_range(500..2500));
                    let choice = if rng.random_bool(0.6) {
                        question.correct
                    } else {
                        let offset = rng.random_range(1..question.choices.len());
                        (question.correct + offset) % question.choices.len()
                    };
                    (thinking, choice)
                };
                sleep(thinking).await;
                info!(bot = name, index, choice, "answering");
                handle.submit_answer(choice);
            }
            Ok(BattleEvent::Reveal {
                index,
                correct_choice,
                ..
            }) => {
                info!(bot = name, index, correct_choice, "answer revealed");
            }
            Ok(BattleEvent::ScoreboardUpdated { scores }) => {
                info!(bot = name, ?scores, "scoreboard updated");
            }
            Ok(BattleEvent::MatchCompleted { scores, winner }) => {
                info!(bot = name, ?scores, ?winner, "match completed");
                break;
            }
            Ok(BattleEvent::MatchCancelled { .. } | BattleEvent::InviteRejected) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(bot = name, error = %err, "event stream ended");
                break;
            }
        }
    }

    handle.finished().await;
}

/// Fixed question pool served to both peers.
fn demo_bank() -> FixtureBank {
    let mut bank = FixtureBank::new();
    let entries: [(&str, [&str; 4], usize); 8] = [
        (
            "Which planet has the shortest year?",
            ["Mercury", "Venus", "Mars", "Jupiter"],
            0,
        ),
        (
            "What is the capital of Australia?",
            ["Sydney", "Canberra", "Melbourne", "Perth"],
            1,
        ),
        (
            "Which element has the symbol Fe?",
            ["Lead", "Copper", "Iron", "Zinc"],
            2,
        ),
        (
            "Who painted the Mona Lisa?",
            ["Michelangelo", "Raphael", "Donatello", "Leonardo da Vinci"],
            3,
        ),
        (
            "Which ocean is the deepest?",
            ["Pacific", "Atlantic", "Indian", "Arctic"],
            0,
        ),
        (
            "In which year did the Berlin Wall fall?",
            ["1985", "1989", "1991", "1993"],
            1,
        ),
        (
            "What is the largest living mammal?",
            ["African elephant", "Orca", "Blue whale", "Giraffe"],
            2,
        ),
        (
            "Which language has the most native speakers?",
            ["English", "Hindi", "Spanish", "Mandarin Chinese"],
            3,
        ),
    ];

    for (text, choices, correct) in entries {
        bank.push(
            DEMO_CATEGORY,
            Difficulty::Medium,
            Question::new(
                text,
                choices.into_iter().map(String::from).collect(),
                correct,
            ),
        );
    }
    bank
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
