//! JSON wire protocol spoken over the persistent bidirectional connection.
//!
//! One connection per open conversation. Events are tagged unions so the
//! router can dispatch by exhaustive match instead of string branching.

use crate::types::message::{
    ClientMessageId, ConversationId, MediaRef, Message, MessageIdentity, MessageKind,
    MessageStatus, ServerMessageId, UserId,
};
use crate::types::presence::PresenceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events the engine sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    Submit {
        client_id: ClientMessageId,
        conversation_id: ConversationId,
        content: String,
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<MediaRef>,
    },
    MarkRead {
        message_id: ServerMessageId,
        user_id: UserId,
    },
    RequestHistory {
        conversation_id: ConversationId,
        limit: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<String>,
    },
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
}

impl ClientEvent {
    /// Typing is a hard-TTL signal; replaying a stale one after a
    /// reconnect would show a phantom indicator.
    pub fn is_bufferable(&self) -> bool {
        !matches!(self, ClientEvent::Typing { .. })
    }
}

/// A full message record as the server serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: ServerMessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientMessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// Convert a server record into the local entity. Server-confirmed by
    /// definition, so never local-only.
    pub fn into_message(self) -> Message {
        Message {
            identity: MessageIdentity::Confirmed {
                server_id: self.id,
                client_id: self.client_id,
            },
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: self.kind,
            media: self.media,
            status: self.status,
            local_only: false,
            created_at: self.timestamp,
            updated_at: self.timestamp,
        }
    }
}

/// Events arriving from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    ConnectionEstablished {
        #[serde(default)]
        online_users: Vec<UserId>,
    },
    NewMessage {
        message: MessageRecord,
    },
    StatusChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientMessageId>,
        message_id: ServerMessageId,
        status: MessageStatus,
        timestamp: DateTime<Utc>,
    },
    ReadReceipt {
        message_id: ServerMessageId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    },
    PresenceUpdate {
        user_id: UserId,
        status: PresenceStatus,
        timestamp: DateTime<Utc>,
    },
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    HistoryPage {
        messages: Vec<MessageRecord>,
        has_more: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientMessageId>,
    },
}
