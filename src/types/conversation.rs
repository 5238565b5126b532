use crate::types::message::{ConversationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A set of participants plus denormalized last-activity metadata used for
/// ordering the conversation list. Created once, updated non-destructively
/// whenever a message arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
}

impl Conversation {
    /// Build a conversation from its participant set, deriving the
    /// deterministic id so repeated creation attempts converge.
    pub fn new(participants: &[UserId]) -> Self {
        let mut participants: Vec<UserId> = participants.to_vec();
        participants.sort();
        participants.dedup();
        Self {
            id: deterministic_conversation_id(&participants),
            participants,
            last_message_at: None,
            last_message_preview: None,
        }
    }

    /// Record activity for list ordering. Never moves the timestamp
    /// backwards, so replayed history pages cannot reorder the list.
    pub fn touch(&mut self, at: DateTime<Utc>, preview: &str) {
        if self.last_message_at.is_some_and(|prev| prev >= at) {
            return;
        }
        self.last_message_at = Some(at);
        self.last_message_preview = Some(preview.chars().take(120).collect());
    }
}

/// Derive a conversation id purely from the sorted participant set. Two
/// devices creating "the same" conversation independently end up with one.
pub fn deterministic_conversation_id(participants: &[UserId]) -> ConversationId {
    let mut sorted: Vec<&str> = participants.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join("_")
}
