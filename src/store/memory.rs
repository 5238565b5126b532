use crate::store::error::Result;
use crate::store::generic::GenericMemoryStore;
use crate::store::traits::Backend;
use crate::types::conversation::Conversation;
use crate::types::message::{Message, MessageStatus};
use crate::types::presence::{PresenceRecord, ReadReceipt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

type MessageMap = GenericMemoryStore<String, Message>;
type ConversationMap = GenericMemoryStore<String, Conversation>;
type PresenceMap = GenericMemoryStore<String, PresenceRecord>;
type ReceiptMap = GenericMemoryStore<(String, String), ReadReceipt>;

/// In-memory store backend. The reference implementation of the `Backend`
/// contract, and the default for tests; a disk-backed store slots in behind
/// the same trait.
pub struct MemoryStore {
    messages: MessageMap,
    conversations: ConversationMap,
    presence: PresenceMap,
    receipts: ReceiptMap,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: MessageMap::new(),
            conversations: ConversationMap::new(),
            presence: PresenceMap::new(),
            receipts: ReceiptMap::new(),
        }
    }
}

#[async_trait]
impl Backend for MemoryStore {
    async fn upsert_message(&self, message: &Message) -> Result<()> {
        self.messages
            .put(message.identity.storage_key().to_string(), message.clone())
            .await;
        Ok(())
    }

    async fn confirm_message(
        &self,
        client_id: &str,
        server_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.messages
            .update(&client_id.to_string(), |msg| {
                msg.confirm(server_id, at);
                msg.apply_status(status, at);
            })
            .await;
        Ok(())
    }

    async fn update_message_status(
        &self,
        server_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.messages
            .update_where(
                |msg| msg.identity.matches_server_id(server_id),
                |msg| {
                    msg.apply_status(status, at);
                },
            )
            .await;
        Ok(())
    }

    async fn messages_for_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .values()
            .await
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.is_none_or(|cutoff| m.created_at < cutoff))
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn local_only_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .values()
            .await
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id && m.local_only)
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        if self.messages.remove(&id.to_string()).await.is_none() {
            // The id may be a server id of a confirmed message filed under
            // its client id.
            self.messages
                .retain_where(|_, m| !m.identity.matches_server_id(id))
                .await;
        }
        Ok(())
    }

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .put(conversation.id.clone(), conversation.clone())
            .await;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(&id.to_string()).await)
    }

    async fn upsert_presence(&self, record: &PresenceRecord) -> Result<()> {
        self.presence
            .put(record.user_id.clone(), record.clone())
            .await;
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        Ok(self.presence.get(&user_id.to_string()).await)
    }

    async fn upsert_read_receipt(&self, receipt: &ReadReceipt) -> Result<()> {
        self.receipts
            .put(
                (receipt.message_id.clone(), receipt.user_id.clone()),
                receipt.clone(),
            )
            .await;
        Ok(())
    }

    async fn read_receipts_for_message(&self, message_id: &str) -> Result<Vec<ReadReceipt>> {
        let mut receipts: Vec<ReadReceipt> = self
            .receipts
            .values()
            .await
            .into_iter()
            .filter(|r| r.message_id == message_id)
            .collect();
        receipts.sort_by(|a, b| a.read_at.cmp(&b.read_at));
        Ok(receipts)
    }
}
