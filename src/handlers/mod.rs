//! Inbound event router.
//!
//! One typed handler per wire event kind, dispatched by exhaustive match so
//! a new event variant is a compile error until it is handled. Invoked once
//! per inbound event in arrival order; the read loop awaits each dispatch,
//! so handlers for the same message never overlap.

use crate::client::Client;
use crate::proto::{MessageRecord, ServerEvent};
use crate::reconcile::MergeOutcome;
use crate::types::message::{MessageStatus, UserId};
use crate::types::presence::{PresenceRecord, PresenceStatus, ReadReceipt};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

impl Client {
    pub(crate) async fn dispatch(self: &Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionEstablished { online_users } => {
                self.handle_connection_established(online_users).await
            }
            ServerEvent::NewMessage { message } => self.handle_new_message(message).await,
            ServerEvent::StatusChange {
                client_id,
                message_id,
                status,
                timestamp,
            } => {
                self.handle_status_change(client_id.as_deref(), &message_id, status, timestamp)
                    .await
            }
            ServerEvent::ReadReceipt {
                message_id,
                user_id,
                read_at,
            } => self.handle_read_receipt(&message_id, &user_id, read_at).await,
            ServerEvent::PresenceUpdate {
                user_id,
                status,
                timestamp,
            } => self.handle_presence_update(user_id, status, timestamp).await,
            ServerEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => self.handle_typing(&conversation_id, &user_id, is_typing),
            ServerEvent::HistoryPage {
                messages,
                has_more,
                next_cursor,
            } => self.handle_history_page(messages, has_more, next_cursor).await,
            ServerEvent::Error {
                code,
                message,
                client_id,
            } => self.handle_server_error(&code, &message, client_id.as_deref()).await,
        }
    }

    /// Out-of-band initial state: seed the presence tracker with the
    /// currently-online participant set.
    async fn handle_connection_established(self: &Arc<Self>, online_users: Vec<UserId>) {
        debug!(
            target: "Client/Router",
            "Connection established, {} participants online", online_users.len()
        );
        let now = Utc::now();
        self.presence.seed(&online_users, now);
        let backend = self.persistence_manager.backend();
        for user_id in &online_users {
            let record = PresenceRecord {
                user_id: user_id.clone(),
                status: PresenceStatus::Online,
                last_seen: now,
            };
            self.persistence_manager
                .best_effort("presence mirror", backend.upsert_presence(&record).await);
        }
        self.emit_online_users();
    }

    /// Duplicate-safe insert: an echo of our own pending send merges into
    /// the existing record, a genuinely new message is appended, and a
    /// replay of a known server id changes nothing.
    async fn handle_new_message(self: &Arc<Self>, record: MessageRecord) {
        if record.conversation_id != self.config.conversation_id {
            debug!(
                target: "Client/Router",
                "Ignoring message for other conversation {}", record.conversation_id
            );
            return;
        }

        let message = record.into_message();
        let outcome = self.cache.merge_remote(message.clone()).await;
        match outcome {
            MergeOutcome::Unchanged => return,
            MergeOutcome::Inserted => self.notify_arrival(&message),
            MergeOutcome::Merged => {}
        }

        // Persist the merged view, not the raw inbound record, so a
        // higher local status is never overwritten.
        let stored = match message.identity.server_id() {
            Some(server_id) => self.cache.find_by_server_id(server_id).await,
            None => None,
        }
        .unwrap_or(message);

        let backend = self.persistence_manager.backend();
        self.persistence_manager
            .best_effort("message upsert", backend.upsert_message(&stored).await);
        self.touch_conversation(&stored).await;
        self.emit_message_list().await;
    }

    /// Resolve by client id when present, else by server id; apply the
    /// monotonic transition and confirm identity in one pass; keep the
    /// store and the in-memory state in step.
    async fn handle_status_change(
        self: &Arc<Self>,
        client_id: Option<&str>,
        message_id: &str,
        status: MessageStatus,
        timestamp: DateTime<Utc>,
    ) {
        let updated = if status == MessageStatus::Failed {
            match client_id {
                Some(cid) => self.cache.mark_failed(cid, timestamp).await,
                None => None,
            }
        } else {
            self.cache
                .apply_status(client_id, message_id, status, timestamp)
                .await
        };

        let Some(updated) = updated else {
            debug!(
                target: "Client/Router",
                "Status event {status} for {message_id} changed nothing"
            );
            return;
        };

        info!(
            target: "Client/Router",
            "Message {} -> {status}",
            updated.identity.storage_key()
        );

        let backend = self.persistence_manager.backend();
        let persisted = match updated.identity.client_id() {
            Some(cid) if status != MessageStatus::Failed => {
                backend
                    .confirm_message(cid, message_id, status, timestamp)
                    .await
            }
            _ => backend.upsert_message(&updated).await,
        };
        self.persistence_manager
            .best_effort("status update", persisted);
        self.emit_message_list().await;
    }

    /// Record the (message, user) pair idempotently; when someone else read
    /// one of our messages, advance that message's own status to read.
    async fn handle_read_receipt(
        self: &Arc<Self>,
        message_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) {
        if !self.receipts.record(message_id, user_id, read_at) {
            return;
        }

        let backend = self.persistence_manager.backend();
        self.persistence_manager.best_effort(
            "read receipt",
            backend
                .upsert_read_receipt(&ReadReceipt {
                    message_id: message_id.to_string(),
                    user_id: user_id.to_string(),
                    read_at,
                })
                .await,
        );

        let is_own_receipt = self
            .identity
            .current_user_id()
            .is_some_and(|me| me == user_id);
        if is_own_receipt {
            return;
        }

        if let Some(updated) = self.cache.apply_read(message_id, read_at).await {
            self.persistence_manager.best_effort(
                "read status",
                backend
                    .update_message_status(message_id, MessageStatus::Read, read_at)
                    .await,
            );
            debug!(
                target: "Client/Router",
                "Message {} read by {user_id}",
                updated.identity.storage_key()
            );
            self.emit_message_list().await;
        }
    }

    /// Overwrite the presence record and fan out to conversation-scoped
    /// listeners; mirror to the store for offline last-seen display.
    async fn handle_presence_update(
        self: &Arc<Self>,
        user_id: UserId,
        status: PresenceStatus,
        timestamp: DateTime<Utc>,
    ) {
        let record = PresenceRecord {
            user_id,
            status,
            last_seen: timestamp,
        };
        let backend = self.persistence_manager.backend();
        self.persistence_manager
            .best_effort("presence mirror", backend.upsert_presence(&record).await);
        if self.presence.apply(record).is_some() {
            self.emit_online_users();
        }
    }

    /// Upsert the self-expiring typing flag; our own echoes are ignored.
    fn handle_typing(self: &Arc<Self>, conversation_id: &str, user_id: &str, is_typing: bool) {
        if conversation_id != self.config.conversation_id {
            return;
        }
        if self
            .identity
            .current_user_id()
            .is_some_and(|me| me == user_id)
        {
            return;
        }
        if self.typing.apply(user_id, is_typing) {
            self.emit_typing_update();
        }
    }

    /// Merge each message of the page with the same duplicate-safe rule as
    /// a live push; statuses that changed while we were offline advance,
    /// regressions are detected and ignored inside the merge.
    async fn handle_history_page(
        self: &Arc<Self>,
        messages: Vec<MessageRecord>,
        has_more: bool,
        next_cursor: Option<String>,
    ) {
        debug!(
            target: "Client/Router",
            "History page: {} messages, has_more={has_more}", messages.len()
        );

        let backend = self.persistence_manager.backend();
        let mut changed = false;
        for record in messages {
            if record.conversation_id != self.config.conversation_id {
                continue;
            }
            let message = record.into_message();
            let outcome = self.cache.merge_remote(message.clone()).await;
            if outcome == MergeOutcome::Unchanged {
                continue;
            }
            changed = true;

            let stored = match message.identity.server_id() {
                Some(server_id) => self.cache.find_by_server_id(server_id).await,
                None => None,
            }
            .unwrap_or(message);
            self.persistence_manager
                .best_effort("history upsert", backend.upsert_message(&stored).await);
        }

        *self.history_cursor.lock().await = next_cursor;
        self.history_has_more
            .store(has_more, std::sync::atomic::Ordering::Relaxed);

        if changed {
            self.emit_message_list().await;
        }
    }

    /// Server-reported error. A rejection naming a client id fails that
    /// still-local message; anything else is logged and the connection
    /// stays up.
    async fn handle_server_error(
        self: &Arc<Self>,
        code: &str,
        message: &str,
        client_id: Option<&str>,
    ) {
        warn!(target: "Client/Router", "Server error {code}: {message}");
        let Some(client_id) = client_id else { return };

        if let Some(failed) = self.cache.mark_failed(client_id, Utc::now()).await {
            let backend = self.persistence_manager.backend();
            self.persistence_manager
                .best_effort("failed status", backend.upsert_message(&failed).await);
            self.emit_message_list().await;
        }
    }
}
