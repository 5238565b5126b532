//! Reconciliation and dedup engine.
//!
//! Guarantees a single logical record per send under races such as
//! `new-message` and `status-change` arriving in either order for the same
//! client id, or a message appearing both in a live push and in a
//! concurrently fetched history page. Matching key priority: client id
//! (exact) first, then server id (exact); content is never a matching key.

use crate::types::message::{Message, MessageStatus};
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::RwLock;

/// What a merge did to the in-memory list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new record was appended.
    Inserted,
    /// An existing record absorbed the incoming one (identity confirmed
    /// and/or status advanced).
    Merged,
    /// The incoming event carried nothing new; duplicate-safe ignore.
    Unchanged,
}

/// Ordered in-memory message list for one conversation. All mutation happens
/// under a single write lock, so identity confirmation is one in-place
/// replace with no insert-plus-delete window.
pub struct MessageCache {
    messages: RwLock<Vec<Message>>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCache {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// Append a locally-minted pending message (optimistic path).
    pub async fn insert_local(&self, message: Message) {
        let mut messages = self.messages.write().await;
        Self::insert_sorted(&mut messages, message);
    }

    /// Merge a server-confirmed message into the list. Client-id match wins
    /// over server-id match; no match inserts.
    pub async fn merge_remote(&self, incoming: Message) -> MergeOutcome {
        let mut messages = self.messages.write().await;

        let position = incoming
            .identity
            .client_id()
            .and_then(|cid| {
                messages
                    .iter()
                    .position(|m| m.identity.matches_client_id(cid))
            })
            .or_else(|| {
                incoming.identity.server_id().and_then(|sid| {
                    messages
                        .iter()
                        .position(|m| m.identity.matches_server_id(sid))
                })
            });

        match position {
            Some(idx) => {
                let existing = &mut messages[idx];
                let mut changed = false;
                if let Some(server_id) = incoming.identity.server_id() {
                    changed |= existing.confirm(server_id, incoming.updated_at);
                }
                if existing.apply_status(incoming.status, incoming.updated_at) {
                    changed = true;
                } else if incoming.status != existing.status {
                    // Regression: the incoming copy (e.g. from a history
                    // page fetched after a live push) is behind our record.
                    debug!(
                        target: "Reconcile",
                        "Ignoring status regression {} -> {} for {}",
                        existing.status,
                        incoming.status,
                        existing.identity.storage_key()
                    );
                }
                if changed {
                    MergeOutcome::Merged
                } else {
                    MergeOutcome::Unchanged
                }
            }
            None => {
                Self::insert_sorted(&mut messages, incoming);
                MergeOutcome::Inserted
            }
        }
    }

    /// Apply a status acknowledgement, resolving by client id when present
    /// and by server id otherwise. Confirms identity as part of the same
    /// locked pass. Returns the updated record when anything changed.
    pub async fn apply_status(
        &self,
        client_id: Option<&str>,
        server_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Option<Message> {
        let mut messages = self.messages.write().await;

        let position = client_id
            .and_then(|cid| {
                messages
                    .iter()
                    .position(|m| m.identity.matches_client_id(cid))
            })
            .or_else(|| {
                messages
                    .iter()
                    .position(|m| m.identity.matches_server_id(server_id))
            })?;

        let message = &mut messages[position];
        let mut changed = false;
        if status != MessageStatus::Failed {
            changed |= message.confirm(server_id, at);
        }
        changed |= message.apply_status(status, at);
        changed.then(|| message.clone())
    }

    /// Advance a message to `Read` after a read receipt for it. Monotonic:
    /// a receipt arriving after `Read` was already applied changes nothing.
    pub async fn apply_read(&self, server_id: &str, at: DateTime<Utc>) -> Option<Message> {
        self.apply_status(None, server_id, MessageStatus::Read, at)
            .await
    }

    /// Return a failed message to `Pending` for a retry attempt.
    pub async fn reset_failed(&self, client_id: &str, at: DateTime<Utc>) -> Option<Message> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.identity.matches_client_id(client_id))?;
        message
            .apply_status(MessageStatus::Pending, at)
            .then(|| message.clone())
    }

    /// Mark a still-local message as failed (submission rejected).
    pub async fn mark_failed(&self, client_id: &str, at: DateTime<Utc>) -> Option<Message> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.identity.matches_client_id(client_id))?;
        message
            .apply_status(MessageStatus::Failed, at)
            .then(|| message.clone())
    }

    /// Removal primitive for explicit user-initiated deletion. Accepts
    /// either identity key.
    pub async fn remove(&self, id: &str) -> Option<Message> {
        let mut messages = self.messages.write().await;
        let position = messages.iter().position(|m| {
            m.identity.matches_client_id(id) || m.identity.matches_server_id(id)
        })?;
        Some(messages.remove(position))
    }

    pub async fn find_by_client_id(&self, client_id: &str) -> Option<Message> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.identity.matches_client_id(client_id))
            .cloned()
    }

    pub async fn find_by_server_id(&self, server_id: &str) -> Option<Message> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.identity.matches_server_id(server_id))
            .cloned()
    }

    fn insert_sorted(messages: &mut Vec<Message>, message: Message) {
        let idx = messages.partition_point(|m| m.created_at <= message.created_at);
        messages.insert(idx, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{MessageIdentity, MessageKind};

    fn local_pending(client_id: &str) -> Message {
        let now = Utc::now();
        Message {
            identity: MessageIdentity::Pending {
                client_id: client_id.to_string(),
            },
            conversation_id: "conv".to_string(),
            sender_id: "alice".to_string(),
            content: "hello".to_string(),
            kind: MessageKind::Text,
            media: None,
            status: MessageStatus::Pending,
            local_only: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn remote(server_id: &str, client_id: Option<&str>, status: MessageStatus) -> Message {
        let now = Utc::now();
        Message {
            identity: MessageIdentity::Confirmed {
                server_id: server_id.to_string(),
                client_id: client_id.map(str::to_string),
            },
            conversation_id: "conv".to_string(),
            sender_id: "alice".to_string(),
            content: "hello".to_string(),
            kind: MessageKind::Text,
            media: None,
            status,
            local_only: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn echo_of_own_send_merges_instead_of_duplicating() {
        let cache = MessageCache::new();
        cache.insert_local(local_pending("c1")).await;

        let outcome = cache
            .merge_remote(remote("m1", Some("c1"), MessageStatus::Sent))
            .await;

        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(cache.len().await, 1);
        let msg = cache.find_by_server_id("m1").await.unwrap();
        assert_eq!(msg.identity.client_id(), Some("c1"));
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(!msg.local_only);
    }

    #[tokio::test]
    async fn duplicate_server_push_is_unchanged() {
        let cache = MessageCache::new();
        assert_eq!(
            cache
                .merge_remote(remote("m1", None, MessageStatus::Delivered))
                .await,
            MergeOutcome::Inserted
        );
        assert_eq!(
            cache
                .merge_remote(remote("m1", None, MessageStatus::Delivered))
                .await,
            MergeOutcome::Unchanged
        );
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn status_change_before_new_message_still_converges_to_one() {
        let cache = MessageCache::new();
        cache.insert_local(local_pending("c1")).await;

        // Ack arrives before the echoed new-message.
        cache
            .apply_status(Some("c1"), "m1", MessageStatus::Sent, Utc::now())
            .await
            .unwrap();
        let outcome = cache
            .merge_remote(remote("m1", Some("c1"), MessageStatus::Sent))
            .await;

        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn history_page_regression_is_ignored() {
        let cache = MessageCache::new();
        cache
            .merge_remote(remote("m1", None, MessageStatus::Read))
            .await;
        let outcome = cache
            .merge_remote(remote("m1", None, MessageStatus::Sent))
            .await;
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(
            cache.find_by_server_id("m1").await.unwrap().status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn delivered_after_read_keeps_read() {
        let cache = MessageCache::new();
        cache
            .merge_remote(remote("m1", None, MessageStatus::Sent))
            .await;
        cache.apply_read("m1", Utc::now()).await.unwrap();
        let unchanged = cache
            .apply_status(None, "m1", MessageStatus::Delivered, Utc::now())
            .await;
        assert!(unchanged.is_none());
        assert_eq!(
            cache.find_by_server_id("m1").await.unwrap().status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn failed_only_applies_to_local_only_messages() {
        let cache = MessageCache::new();
        cache.insert_local(local_pending("c1")).await;
        cache
            .apply_status(Some("c1"), "m1", MessageStatus::Sent, Utc::now())
            .await;
        assert!(cache.mark_failed("c1", Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn remove_accepts_either_key() {
        let cache = MessageCache::new();
        cache.insert_local(local_pending("c1")).await;
        assert!(cache.remove("c1").await.is_some());
        assert!(cache.is_empty().await);
    }
}
