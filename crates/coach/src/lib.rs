//! Coaching collaborators: pronunciation scoring and practice material.
//!
//! Both collaborators degrade instead of failing. An evaluator always
//! produces an [`Evaluation`] (a zero score with generic feedback when the
//! model cannot be reached or answers nonsense), and a generator returns an
//! empty list on any failure.

mod gemini;

pub use gemini::{GeminiClient, DEFAULT_TEXT_MODEL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("empty response")]
    EmptyResponse,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, CoachError>;

/// Accent the learner is practicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accent {
    #[default]
    Us,
    Uk,
}

impl Accent {
    /// Prebuilt live voice that speaks this accent.
    pub fn voice(self) -> &'static str {
        match self {
            Accent::Us => "Puck",
            Accent::Uk => "Charon",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Accent::Us => "American English (US)",
            Accent::Uk => "British English (UK)",
        }
    }
}

/// Language the coach gives feedback in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLanguage {
    English,
    #[default]
    Thai,
}

impl FeedbackLanguage {
    pub fn name(self) -> &'static str {
        match self {
            FeedbackLanguage::English => "English",
            FeedbackLanguage::Thai => "Thai",
        }
    }
}

/// Score and feedback for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// 0 to 100.
    pub score: u8,
    pub feedback: String,
    /// Target text with problem words wrapped in `[brackets]`.
    pub highlighted: String,
}

impl Evaluation {
    /// Result when the evaluator could not produce a usable answer.
    pub fn failure(target: &str, language: FeedbackLanguage) -> Self {
        let feedback = match language {
            FeedbackLanguage::English => "Could not analyze your pronunciation. Please try again.",
            FeedbackLanguage::Thai => "เกิดข้อผิดพลาดในการวิเคราะห์ กรุณาลองใหม่อีกครั้ง",
        };
        Self {
            score: 0,
            feedback: feedback.to_string(),
            highlighted: target.to_string(),
        }
    }

    /// Result when nothing was transcribed.
    pub fn nothing_heard(target: &str, language: FeedbackLanguage) -> Self {
        let feedback = match language {
            FeedbackLanguage::English => "No speech was detected. Please try again and speak clearly.",
            FeedbackLanguage::Thai => "ไม่ได้ยินเสียงพูด กรุณาลองใหม่อีกครั้ง",
        };
        Self {
            score: 0,
            feedback: feedback.to_string(),
            highlighted: target.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabItem {
    pub word: String,
    pub translation: String,
    pub example: String,
    #[serde(default)]
    pub pronunciation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSentence {
    pub english: String,
    pub thai: String,
}

/// Scores a spoken attempt against its target.
#[async_trait]
pub trait PronunciationEvaluator: Send + Sync {
    /// Never fails; see [`Evaluation::failure`] and [`Evaluation::nothing_heard`].
    async fn evaluate(
        &self,
        target: &str,
        spoken: &str,
        accent: Accent,
        language: FeedbackLanguage,
    ) -> Evaluation;
}

/// Produces fresh practice material.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Vocabulary for a category. Empty on failure.
    async fn vocabulary(&self, category: &str) -> Vec<VocabItem>;

    /// Practice sentences for a topic. Empty on failure.
    async fn sentences(&self, topic: &str) -> Vec<PracticeSentence>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accent_voices() {
        assert_eq!(Accent::Us.voice(), "Puck");
        assert_eq!(Accent::Uk.voice(), "Charon");
    }

    #[test]
    fn test_fallbacks_keep_target_unhighlighted() {
        let failure = Evaluation::failure("Hello there", FeedbackLanguage::English);
        assert_eq!(failure.score, 0);
        assert_eq!(failure.highlighted, "Hello there");

        let silent = Evaluation::nothing_heard("Hello there", FeedbackLanguage::Thai);
        assert_eq!(silent.score, 0);
        assert_eq!(silent.highlighted, "Hello there");
        assert_ne!(silent.feedback, failure.feedback);
    }

    #[test]
    fn test_vocab_item_pronunciation_optional() {
        let item: VocabItem =
            serde_json::from_str(r#"{"word": "Algorithm", "translation": "อัลกอริทึม", "example": "A simple algorithm."}"#)
                .unwrap();
        assert_eq!(item.pronunciation, None);
    }
}
