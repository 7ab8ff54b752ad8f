//! Match rule configuration loading, including the per-question countdown.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the JSON rules file is looked up.
const DEFAULT_CONFIG_PATH: &str = "config/match.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_DUEL_CONFIG_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Fixed rules applied to every question of a match.
pub struct MatchRules {
    /// Number of questions drawn per match.
    pub question_count: usize,
    /// Countdown granted to answer each question.
    pub question_duration: Duration,
    /// Pause between revealing the correct answer and advancing.
    pub reveal_hold: Duration,
    /// Points awarded for a correct answer.
    pub points_per_correct: u32,
}

impl MatchRules {
    /// Load the match rules from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawRules>(&contents) {
                Ok(raw) => match MatchRules::try_from(raw) {
                    Ok(rules) => {
                        info!(path = %path.display(), ?rules, "loaded match rules from config");
                        rules
                    }
                    Err(reason) => {
                        warn!(
                            path = %path.display(),
                            reason,
                            "rejected configured match rules; falling back to defaults"
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse match rules; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "match rules file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read match rules; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            question_count: 7,
            question_duration: Duration::from_secs(10),
            reveal_hold: Duration::from_secs(2),
            points_per_correct: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the rules file located at [`DEFAULT_CONFIG_PATH`].
struct RawRules {
    question_count: usize,
    question_duration_ms: u64,
    reveal_hold_ms: u64,
    points_per_correct: u32,
}

impl TryFrom<RawRules> for MatchRules {
    type Error = &'static str;

    fn try_from(raw: RawRules) -> Result<Self, Self::Error> {
        if raw.question_count == 0 {
            return Err("question count must be strictly positive");
        }
        if raw.question_duration_ms == 0 {
            return Err("question duration must be strictly positive");
        }
        Ok(Self {
            question_count: raw.question_count,
            question_duration: Duration::from_millis(raw.question_duration_ms),
            reveal_hold: Duration::from_millis(raw.reveal_hold_ms),
            points_per_correct: raw.points_per_correct,
        })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
