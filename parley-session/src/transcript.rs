//! Running transcript of a conversation
//!
//! Transcription fragments arrive incrementally for both speakers. They are
//! accumulated until the model finishes its turn, then committed to history
//! as one user entry followed by one model entry.

use serde::{Deserialize, Serialize};

use crate::events::InboundEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// History plus both in-progress partials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptSnapshot {
    pub history: Vec<TranscriptEntry>,
    pub pending_user: String,
    pub pending_model: String,
}

/// What one event did to the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
    Unchanged,
    Partial { speaker: Speaker, text: String },
    Committed(Vec<TranscriptEntry>),
}

#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    history: Vec<TranscriptEntry>,
    pending_user: String,
    pending_model: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_partial_user(&mut self, text: &str) {
        self.pending_user.push_str(text);
    }

    pub fn on_partial_model(&mut self, text: &str) {
        self.pending_model.push_str(text);
    }

    /// Commit both accumulators as one turn. Returns what was appended.
    ///
    /// An empty side is still committed as an empty entry as long as the
    /// other side has text; a turn with no text at all commits nothing.
    pub fn on_turn_complete(&mut self) -> Vec<TranscriptEntry> {
        if self.pending_user.is_empty() && self.pending_model.is_empty() {
            return Vec::new();
        }

        let committed = vec![
            TranscriptEntry {
                speaker: Speaker::User,
                text: std::mem::take(&mut self.pending_user),
            },
            TranscriptEntry {
                speaker: Speaker::Model,
                text: std::mem::take(&mut self.pending_model),
            },
        ];
        self.history.extend(committed.iter().cloned());
        committed
    }

    /// Drop history and partials (new conversation).
    pub fn reset(&mut self) {
        self.history.clear();
        self.pending_user.clear();
        self.pending_model.clear();
    }

    /// Feed any inbound event; non-transcript events leave it unchanged.
    pub fn apply(&mut self, event: &InboundEvent) -> TranscriptUpdate {
        match event {
            InboundEvent::PartialUserTranscript(text) => {
                self.on_partial_user(text);
                TranscriptUpdate::Partial {
                    speaker: Speaker::User,
                    text: self.pending_user.clone(),
                }
            }
            InboundEvent::PartialModelTranscript(text) => {
                self.on_partial_model(text);
                TranscriptUpdate::Partial {
                    speaker: Speaker::Model,
                    text: self.pending_model.clone(),
                }
            }
            InboundEvent::TurnComplete => {
                let committed = self.on_turn_complete();
                if committed.is_empty() {
                    TranscriptUpdate::Unchanged
                } else {
                    TranscriptUpdate::Committed(committed)
                }
            }
            InboundEvent::AudioChunk { .. }
            | InboundEvent::Interrupted
            | InboundEvent::SessionError(_)
            | InboundEvent::SessionClosed => TranscriptUpdate::Unchanged,
        }
    }

    pub fn history(&self) -> &[TranscriptEntry] {
        &self.history
    }

    pub fn pending_user(&self) -> &str {
        &self.pending_user
    }

    pub fn pending_model(&self) -> &str {
        &self.pending_model
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            history: self.history.clone(),
            pending_user: self.pending_user.clone(),
            pending_model: self.pending_model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(speaker: Speaker, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            speaker,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_commit_order_user_then_model() {
        let mut transcript = TranscriptAggregator::new();
        transcript.on_partial_user("Hel");
        transcript.on_partial_user("lo");
        transcript.on_partial_model("Hi ");
        transcript.on_partial_model("there");

        let committed = transcript.on_turn_complete();

        let expected = vec![entry(Speaker::User, "Hello"), entry(Speaker::Model, "Hi there")];
        assert_eq!(committed, expected);
        assert_eq!(transcript.history(), expected.as_slice());
        assert!(transcript.pending_user().is_empty());
        assert!(transcript.pending_model().is_empty());
    }

    #[test]
    fn test_empty_turn_commits_nothing() {
        let mut transcript = TranscriptAggregator::new();
        assert!(transcript.on_turn_complete().is_empty());
        assert!(transcript.history().is_empty());
    }

    #[test]
    fn test_one_sided_turn_keeps_pairing() {
        let mut transcript = TranscriptAggregator::new();
        transcript.on_partial_model("Welcome back");
        transcript.on_turn_complete();

        assert_eq!(
            transcript.history(),
            &[entry(Speaker::User, ""), entry(Speaker::Model, "Welcome back")]
        );
    }

    #[test]
    fn test_partials_are_not_deduplicated() {
        let mut transcript = TranscriptAggregator::new();
        transcript.on_partial_user("yes");
        transcript.on_partial_user("yes");
        assert_eq!(transcript.pending_user(), "yesyes");
    }

    #[test]
    fn test_apply_reports_updates() {
        let mut transcript = TranscriptAggregator::new();

        assert_eq!(
            transcript.apply(&InboundEvent::PartialUserTranscript("How ".into())),
            TranscriptUpdate::Partial {
                speaker: Speaker::User,
                text: "How ".into()
            }
        );
        assert_eq!(
            transcript.apply(&InboundEvent::PartialUserTranscript("are you".into())),
            TranscriptUpdate::Partial {
                speaker: Speaker::User,
                text: "How are you".into()
            }
        );
        assert_eq!(transcript.apply(&InboundEvent::Interrupted), TranscriptUpdate::Unchanged);

        match transcript.apply(&InboundEvent::TurnComplete) {
            TranscriptUpdate::Committed(entries) => assert_eq!(entries.len(), 2),
            other => panic!("expected commit, got {:?}", other),
        }
        assert_eq!(transcript.apply(&InboundEvent::TurnComplete), TranscriptUpdate::Unchanged);
    }

    #[test]
    fn test_reset_and_snapshot() {
        let mut transcript = TranscriptAggregator::new();
        transcript.on_partial_user("a");
        transcript.on_turn_complete();
        transcript.on_partial_model("b");

        let snapshot = transcript.snapshot();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.pending_model, "b");

        transcript.reset();
        assert_eq!(transcript.snapshot(), TranscriptSnapshot::default());
    }
}
