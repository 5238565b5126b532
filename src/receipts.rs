use crate::types::message::{ServerMessageId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

/// Per-message set of users who have read it. Derives multi-party read
/// state in group conversations; exposed to the UI as count and
/// membership-test operations.
pub struct ReadReceiptTracker {
    readers: DashMap<ServerMessageId, HashMap<UserId, DateTime<Utc>>>,
}

impl Default for ReadReceiptTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadReceiptTracker {
    pub fn new() -> Self {
        Self {
            readers: DashMap::new(),
        }
    }

    /// Record a (message, user) read marker. Idempotent: returns `true`
    /// only the first time a given pair is seen.
    pub fn record(&self, message_id: &str, user_id: &str, read_at: DateTime<Utc>) -> bool {
        self.readers
            .entry(message_id.to_string())
            .or_default()
            .insert(user_id.to_string(), read_at)
            .is_none()
    }

    pub fn read_count(&self, message_id: &str) -> usize {
        self.readers.get(message_id).map_or(0, |r| r.len())
    }

    pub fn has_read(&self, message_id: &str, user_id: &str) -> bool {
        self.readers
            .get(message_id)
            .is_some_and(|r| r.contains_key(user_id))
    }

    pub fn readers(&self, message_id: &str) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .readers
            .get(message_id)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}
