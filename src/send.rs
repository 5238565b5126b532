//! Optimistic send pipeline.
//!
//! Durability precedes transmission: the pending record is persisted before
//! any network attempt, so a send survives a crash even if it never reached
//! the wire. The in-memory list is updated immediately for zero perceived
//! latency; acknowledgement later reconciles identity and status.

use crate::client::Client;
use crate::error::SubmitError;
use crate::proto::ClientEvent;
use crate::types::conversation::Conversation;
use crate::types::events::EventBus;
use crate::types::message::{MediaRef, Message, MessageIdentity, MessageKind, MessageStatus};
use chrono::Utc;
use log::{debug, info};

impl Client {
    /// Submit a text message. Returns the pending record that the UI can
    /// render immediately.
    pub async fn submit(&self, content: &str, kind: MessageKind) -> Result<Message, SubmitError> {
        self.submit_with_media(content, kind, None).await
    }

    /// Submit a message with an attached media reference (already uploaded
    /// by the external media collaborator).
    pub async fn submit_with_media(
        &self,
        content: &str,
        kind: MessageKind,
        media: Option<MediaRef>,
    ) -> Result<Message, SubmitError> {
        let sender_id = self
            .identity
            .current_user_id()
            .ok_or(SubmitError::NotAuthenticated)?;

        let content = content.trim();
        if content.is_empty() {
            return Err(SubmitError::EmptyContent);
        }

        let now = Utc::now();
        let client_id = self.generate_client_id();
        let message = Message {
            identity: MessageIdentity::Pending {
                client_id: client_id.clone(),
            },
            conversation_id: self.config.conversation_id.clone(),
            sender_id,
            content: content.to_string(),
            kind,
            media: media.clone(),
            status: MessageStatus::Pending,
            local_only: true,
            created_at: now,
            updated_at: now,
        };

        // Durability first: a persistence failure aborts the send, and no
        // network event is transmitted for an unpersisted message.
        let backend = self.persistence_manager.backend();
        backend.upsert_message(&message).await?;
        self.touch_conversation(&message).await;

        self.cache.insert_local(message.clone()).await;
        self.emit_message_list().await;

        debug!(target: "Client/Send", "Submitting {client_id}");
        let event = ClientEvent::Submit {
            client_id,
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            media,
        };
        // Queuing while disconnected is success, not failure.
        if let Err(e) = self.send_event(event).await {
            debug!(target: "Client/Send", "Submit not transmitted immediately: {e}");
        }

        Ok(message)
    }

    /// Re-run transmission for a message that ended up `Failed`. The record
    /// re-enters the pipeline at `Pending` with its original client id, so
    /// a late acknowledgement of either attempt reconciles to one record.
    pub async fn retry_failed(&self, client_id: &str) -> Result<Message, SubmitError> {
        let message = self
            .cache
            .find_by_client_id(client_id)
            .await
            .ok_or_else(|| SubmitError::UnknownClientId(client_id.to_string()))?;
        if message.status != MessageStatus::Failed {
            return Ok(message);
        }

        let now = Utc::now();
        let message = self
            .cache
            .reset_failed(client_id, now)
            .await
            .unwrap_or(message);
        let backend = self.persistence_manager.backend();
        backend.upsert_message(&message).await?;
        self.emit_message_list().await;

        info!(target: "Client/Send", "Retrying failed message {client_id}");
        let event = ClientEvent::Submit {
            client_id: client_id.to_string(),
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            media: message.media.clone(),
        };
        if let Err(e) = self.send_event(event).await {
            debug!(target: "Client/Send", "Retry not transmitted immediately: {e}");
        }
        Ok(message)
    }

    /// Non-destructive conversation metadata update for list ordering.
    /// Best-effort: the message write already succeeded.
    pub(crate) async fn touch_conversation(&self, message: &Message) {
        let backend = self.persistence_manager.backend();
        let existing = self
            .persistence_manager
            .best_effort(
                "conversation read",
                backend.get_conversation(&message.conversation_id).await,
            )
            .flatten();

        let mut conversation = existing.unwrap_or_else(|| Conversation {
            id: message.conversation_id.clone(),
            participants: vec![message.sender_id.clone()],
            last_message_at: None,
            last_message_preview: None,
        });
        if !conversation.participants.contains(&message.sender_id) {
            conversation.participants.push(message.sender_id.clone());
            conversation.participants.sort();
        }
        conversation.touch(message.created_at, &message.content);

        self.persistence_manager.best_effort(
            "conversation touch",
            backend.upsert_conversation(&conversation).await,
        );
    }

    /// Emit the notification hook for a message originated elsewhere.
    pub(crate) fn notify_arrival(&self, message: &Message) {
        if self
            .identity
            .current_user_id()
            .is_some_and(|me| me == message.sender_id)
        {
            return;
        }
        EventBus::emit(
            &self.event_bus.message_arrived,
            std::sync::Arc::new(crate::types::events::MessageArrived {
                message: message.clone(),
            }),
        );
    }
}
