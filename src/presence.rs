use crate::types::message::UserId;
use crate::types::presence::{PresenceRecord, PresenceStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Tracks which participants are currently online.
///
/// Cleared on every disconnect: better to under-report presence than show a
/// stale "online". Last-known records are mirrored to the store by the
/// caller so an offline client can still show last-seen.
pub struct PresenceTracker {
    records: DashMap<UserId, PresenceRecord>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Seed from the initial online-user set delivered with
    /// `connection-established`.
    pub fn seed(&self, users: &[UserId], at: DateTime<Utc>) {
        self.records.clear();
        for user in users {
            self.records.insert(
                user.clone(),
                PresenceRecord {
                    user_id: user.clone(),
                    status: PresenceStatus::Online,
                    last_seen: at,
                },
            );
        }
    }

    /// Overwrite the record for one user. Returns the stored record when the
    /// update changed anything observable.
    pub fn apply(&self, record: PresenceRecord) -> Option<PresenceRecord> {
        let previous = self.records.insert(record.user_id.clone(), record.clone());
        match previous {
            Some(prev) if prev.status == record.status => None,
            _ => Some(record),
        }
    }

    /// Pessimistic reset on disconnect.
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.records
            .get(user_id)
            .is_some_and(|r| r.status.is_online())
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .records
            .iter()
            .filter(|entry| entry.status.is_online())
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.records.get(user_id).map(|r| r.last_seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, status: PresenceStatus) -> PresenceRecord {
        PresenceRecord {
            user_id: user.to_string(),
            status,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn seed_replaces_previous_state() {
        let tracker = PresenceTracker::new();
        tracker.apply(record("carol", PresenceStatus::Online));
        tracker.seed(&["alice".to_string(), "bob".to_string()], Utc::now());
        assert_eq!(tracker.online_users(), vec!["alice", "bob"]);
        assert!(!tracker.is_online("carol"));
    }

    #[test]
    fn apply_reports_observable_changes_only() {
        let tracker = PresenceTracker::new();
        assert!(tracker.apply(record("bob", PresenceStatus::Online)).is_some());
        // Same status again: last_seen moves but nothing observable changed.
        assert!(tracker.apply(record("bob", PresenceStatus::Online)).is_none());
        assert!(
            tracker
                .apply(record("bob", PresenceStatus::Offline))
                .is_some()
        );
        assert!(!tracker.is_online("bob"));
        assert!(tracker.last_seen("bob").is_some());
    }

    #[test]
    fn clear_empties_online_set() {
        let tracker = PresenceTracker::new();
        tracker.apply(record("bob", PresenceStatus::Online));
        tracker.clear();
        assert!(tracker.online_users().is_empty());
    }
}
