use crate::store::error::Result;
use crate::types::conversation::Conversation;
use crate::types::message::{Message, MessageStatus};
use crate::types::presence::{PresenceRecord, ReadReceipt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable per-device storage for messages, conversations, presence and
/// read receipts.
///
/// Every operation must be idempotent under retry: the engine's repair
/// passes may replay writes after a best-effort failure. Implementations
/// serialize physical writes internally (embedded stores are single-writer);
/// callers only rely on per-key logical isolation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert or replace a message, keyed by its stable identity
    /// (client id when present, server id otherwise).
    async fn upsert_message(&self, message: &Message) -> Result<()>;

    /// Attach a server id and status to a locally-minted message, clearing
    /// its local-only flag. The acknowledgement path. A no-op if no message
    /// with that client id exists.
    async fn confirm_message(
        &self,
        client_id: &str,
        server_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Monotonic status update addressed by server id.
    async fn update_message_status(
        &self,
        server_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Newest-first page of messages, optionally strictly older than
    /// `before`.
    async fn messages_for_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>>;

    /// All messages not yet confirmed by the server, in creation order.
    /// The offline flusher's replay source.
    async fn local_only_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Removal primitive for the external deletion collaborator. Accepts
    /// either identity key.
    async fn delete_message(&self, id: &str) -> Result<()>;

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<()>;
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Overwrite (never append) the last-known presence for a user.
    async fn upsert_presence(&self, record: &PresenceRecord) -> Result<()>;
    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>>;

    /// Idempotent insert keyed by (message, user).
    async fn upsert_read_receipt(&self, receipt: &ReadReceipt) -> Result<()>;
    async fn read_receipts_for_message(&self, message_id: &str) -> Result<Vec<ReadReceipt>>;
}
