//! Conversation log for one check-in session
//!
//! Ordered, append-only record of completed turns. Only authoritative
//! payloads land here (`...input_audio_transcription.completed` for the user,
//! `response.done` for the assistant); partial deltas never do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Label used in the plain-text transcript handed to summarisation
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Assistant => "AI",
        }
    }
}

/// One complete utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) -> &ConversationTurn {
        self.turns.push(ConversationTurn {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        });
        let index = self.turns.len() - 1;
        &self.turns[index]
    }

    /// All turns in the order they completed
    pub fn all(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// `User: ...` / `AI: ...` lines, one per turn
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker.label(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
