use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One committed side of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Ordered log of committed turns for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: Uuid,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.updated_at = turn.at;
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Turns rendered as `role: text` lines.
    pub fn full_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| match t.role {
                Role::User => format!("user: {}", t.text),
                Role::Model => format!("model: {}", t.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects streaming transcription deltas until the model ends its turn.
///
/// Both sides are committed together: the learner's words first, then the
/// model's reply. A side that heard nothing is still committed if the other
/// side has text, so the log keeps strict user/model alternation.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAccumulator {
    pending_user: String,
    pending_model: String,
    log: Transcript,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, delta: &str) {
        self.pending_user.push_str(delta);
    }

    pub fn push_output(&mut self, delta: &str) {
        self.pending_model.push_str(delta);
    }

    pub fn pending_user(&self) -> &str {
        &self.pending_user
    }

    pub fn pending_model(&self) -> &str {
        &self.pending_model
    }

    /// Flush both buffers into the log. Returns the committed turns.
    pub fn commit_turn(&mut self) -> Option<(Turn, Turn)> {
        if self.pending_user.is_empty() && self.pending_model.is_empty() {
            tracing::trace!("Turn complete with no transcription; nothing to commit");
            return None;
        }
        let user = Turn::new(Role::User, std::mem::take(&mut self.pending_user));
        let model = Turn::new(Role::Model, std::mem::take(&mut self.pending_model));
        self.log.push(user.clone());
        self.log.push(model.clone());
        tracing::debug!(turns = self.log.len(), "Committed turn");
        Some((user, model))
    }

    /// Drop pending deltas without committing them.
    pub fn discard_pending(&mut self) {
        self.pending_user.clear();
        self.pending_model.clear();
    }

    pub fn transcript(&self) -> &Transcript {
        &self.log
    }

    pub fn turns(&self) -> &[Turn] {
        &self.log.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_commit_as_one_exchange() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_input("Hel");
        acc.push_input("lo");
        acc.push_output("Hi");
        assert_eq!(acc.pending_user(), "Hello");

        let (user, model) = acc.commit_turn().unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text, "Hello");
        assert_eq!(model.role, Role::Model);
        assert_eq!(model.text, "Hi");

        assert_eq!(acc.turns().len(), 2);
        assert_eq!(acc.pending_user(), "");
        assert_eq!(acc.pending_model(), "");
    }

    #[test]
    fn test_empty_turn_is_not_committed() {
        let mut acc = TranscriptAccumulator::new();
        assert!(acc.commit_turn().is_none());
        assert!(acc.transcript().is_empty());
    }

    #[test]
    fn test_one_sided_turn_keeps_alternation() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_output("Welcome back!");
        acc.commit_turn();
        acc.push_input("Thanks");
        acc.push_output("Let's start.");
        acc.commit_turn();

        let roles: Vec<Role> = acc.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);
        assert_eq!(acc.turns()[0].text, "");
    }

    #[test]
    fn test_discard_pending() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_input("half a sent");
        acc.discard_pending();
        assert!(acc.commit_turn().is_none());
    }

    #[test]
    fn test_full_text_and_serde_roles() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_input("Hello");
        acc.push_output("Hi");
        acc.commit_turn();
        assert_eq!(acc.transcript().full_text(), "user: Hello\nmodel: Hi");

        let json = serde_json::to_value(&acc.turns()[1]).unwrap();
        assert_eq!(json["role"], "model");
    }
}
