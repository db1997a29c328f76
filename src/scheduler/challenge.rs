//! Interruption challenges: short arithmetic or colour-naming tasks.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two kinds of interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Arithmetic,
    ColorNaming,
}

/// A transient task shown over the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub kind: ChallengeKind,
    pub prompt: String,
    pub correct_answer: String,
    /// Multiple-choice set, when the UI offers one
    pub options: Option<Vec<String>>,
}

/// `(expression, answer)`
const ARITHMETIC_POOL: &[(&str, &str)] = &[
    ("7 + 5", "12"),
    ("9 × 3", "27"),
    ("15 − 8", "7"),
    ("6 × 7", "42"),
    ("24 ÷ 4", "6"),
    ("13 + 19", "32"),
    ("50 − 17", "33"),
    ("8 × 8", "64"),
    ("81 ÷ 9", "9"),
    ("36 + 27", "63"),
];

/// `(word shown, ink colour)`: the answer is the ink, not the word.
const COLOR_POOL: &[(&str, &str)] = &[
    ("RED", "blue"),
    ("GREEN", "red"),
    ("BLUE", "yellow"),
    ("YELLOW", "green"),
    ("PURPLE", "orange"),
    ("ORANGE", "purple"),
    ("BLUE", "green"),
    ("RED", "yellow"),
];

const COLOR_OPTIONS: &[&str] = &["red", "blue", "green", "yellow", "purple", "orange"];

impl Challenge {
    /// Draw a challenge: kind uniformly, then a prompt uniformly from its pool.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let id = format!("challenge-{}", Uuid::new_v4());
        if rng.gen_bool(0.5) {
            let (expression, answer) = ARITHMETIC_POOL
                .choose(rng)
                .copied()
                .unwrap_or(ARITHMETIC_POOL[0]);
            Self {
                id,
                kind: ChallengeKind::Arithmetic,
                prompt: format!("What is {expression}?"),
                correct_answer: answer.to_string(),
                options: None,
            }
        } else {
            let (word, ink) = COLOR_POOL.choose(rng).copied().unwrap_or(COLOR_POOL[0]);
            Self {
                id,
                kind: ChallengeKind::ColorNaming,
                prompt: format!("Type the ink colour of the word {word} (shown in {ink})"),
                correct_answer: ink.to_string(),
                options: Some(COLOR_OPTIONS.iter().map(|c| c.to_string()).collect()),
            }
        }
    }

    /// Case-insensitive comparison with surrounding whitespace ignored.
    pub fn is_correct(&self, answer: &str) -> bool {
        answer.trim().to_lowercase() == self.correct_answer.trim().to_lowercase()
    }
}
