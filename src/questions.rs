//! Question model and the bank abstraction matches draw their questions from.

use futures::future::BoxFuture;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of a question inside the bank.
pub type QuestionId = Uuid;

/// Difficulty tiers a match can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Warm-up questions.
    Easy,
    /// Standard questions.
    Medium,
    /// Expert questions.
    Hard,
}

/// A single multiple-choice question as served by the bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Identifier referenced by session records.
    pub id: QuestionId,
    /// Prompt shown to both participants.
    pub text: String,
    /// Ordered answer choices.
    pub choices: Vec<String>,
    /// Index into [`Question::choices`] of the correct answer.
    pub correct: usize,
}

impl Question {
    /// Build a question with a fresh identifier.
    pub fn new(text: impl Into<String>, choices: Vec<String>, correct: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            choices,
            correct,
        }
    }
}

/// Error raised by question bank implementations.
#[derive(Debug, Error)]
pub enum BankError {
    /// The bank cannot serve the requested number of questions.
    #[error("not enough `{category}` questions at {difficulty:?} (wanted {wanted}, have {have})")]
    Exhausted {
        /// Requested category.
        category: String,
        /// Requested difficulty.
        difficulty: Difficulty,
        /// Number of questions the caller asked for.
        wanted: usize,
        /// Number of questions actually available.
        have: usize,
    },
    /// A session record references an id the bank does not know.
    #[error("unknown question id `{0}`")]
    UnknownQuestion(QuestionId),
}

/// Source of question content, consumed once per match and never re-fetched
/// while the match is running.
pub trait QuestionBank: Send + Sync {
    /// Draw an ordered, fixed-size question set for a fresh match.
    fn draw(
        &self,
        category: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> BoxFuture<'static, Result<Vec<Question>, BankError>>;

    /// Resolve previously drawn question ids back into their content.
    fn resolve(&self, ids: &[QuestionId]) -> BoxFuture<'static, Result<Vec<Question>, BankError>>;
}

/// In-memory bank backed by a fixed pool, used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct FixtureBank {
    pool: Vec<FixtureEntry>,
}

#[derive(Debug, Clone)]
struct FixtureEntry {
    category: String,
    difficulty: Difficulty,
    question: Question,
}

impl FixtureBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a question under the given category and difficulty.
    pub fn push(&mut self, category: impl Into<String>, difficulty: Difficulty, question: Question) {
        self.pool.push(FixtureEntry {
            category: category.into(),
            difficulty,
            question,
        });
    }
}

impl QuestionBank for FixtureBank {
    fn draw(
        &self,
        category: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> BoxFuture<'static, Result<Vec<Question>, BankError>> {
        let mut matching: Vec<Question> = self
            .pool
            .iter()
            .filter(|entry| entry.category == category && entry.difficulty == difficulty)
            .map(|entry| entry.question.clone())
            .collect();

        let category = category.to_string();
        Box::pin(async move {
            if matching.len() < count {
                return Err(BankError::Exhausted {
                    category,
                    difficulty,
                    wanted: count,
                    have: matching.len(),
                });
            }

            matching.shuffle(&mut rand::rng());
            matching.truncate(count);
            Ok(matching)
        })
    }

    fn resolve(&self, ids: &[QuestionId]) -> BoxFuture<'static, Result<Vec<Question>, BankError>> {
        let resolved: Result<Vec<Question>, BankError> = ids
            .iter()
            .map(|id| {
                self.pool
                    .iter()
                    .find(|entry| entry.question.id == *id)
                    .map(|entry| entry.question.clone())
                    .ok_or(BankError::UnknownQuestion(*id))
            })
            .collect();

        Box::pin(async move { resolved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_with(count: usize, category: &str, difficulty: Difficulty) -> FixtureBank {
        let mut bank = FixtureBank::new();
        for i in 0..count {
            bank.push(
                category,
                difficulty,
                Question::new(format!("question {i}"), vec!["a".into(), "b".into()], 0),
            );
        }
        bank
    }

    #[tokio::test]
    async fn draw_returns_requested_count_from_matching_pool() {
        let mut bank = bank_with(5, "history", Difficulty::Easy);
        bank.push(
            "geography",
            Difficulty::Easy,
            Question::new("off-topic", vec!["a".into(), "b".into()], 1),
        );

        let drawn = bank.draw("history", Difficulty::Easy, 3).await.unwrap();
        assert_eq!(drawn.len(), 3);
        assert!(drawn.iter().all(|q| q.text.starts_with("question")));
    }

    #[tokio::test]
    async fn draw_fails_when_pool_is_too_small() {
        let bank = bank_with(2, "history", Difficulty::Hard);
        let err = bank.draw("history", Difficulty::Hard, 3).await.unwrap_err();
        match err {
            BankError::Exhausted { wanted, have, .. } => {
                assert_eq!(wanted, 3);
                assert_eq!(have, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_round_trips_drawn_ids_and_rejects_unknown_ones() {
        let bank = bank_with(4, "science", Difficulty::Medium);
        let drawn = bank.draw("science", Difficulty::Medium, 4).await.unwrap();

        let ids: Vec<QuestionId> = drawn.iter().map(|q| q.id).collect();
        let resolved = bank.resolve(&ids).await.unwrap();
        assert_eq!(resolved, drawn);

        let err = bank.resolve(&[Uuid::new_v4()]).await.unwrap_err();
        assert!(matches!(err, BankError::UnknownQuestion(_)));
    }
}
