use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ClientMessageId = String;
pub type ServerMessageId = String;
pub type ConversationId = String;
pub type UserId = String;

/// Lifecycle status of a message. The delivery states form a total order
/// (`Pending < Sent < Delivered < Read`); `Failed` sits outside it and is
/// reachable only while a message is still local-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    /// Whether a transition from `self` to `next` is a forward move in the
    /// delivery ordering. Out-of-order status events (e.g. `sent` arriving
    /// after `read` was already applied) must be ignored by callers.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(cur), Some(nxt)) => nxt > cur,
            // Failure is decided by the local-only rule, not by ordering.
            (_, None) => self == MessageStatus::Pending,
            // Recovering from Failed (retry) always re-enters at Pending.
            (None, Some(_)) => next == MessageStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

/// Reference to an already-uploaded media object. The engine never touches
/// media bytes; transcoding and upload are external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Dual-keyed message identity.
///
/// A message minted locally starts as `Pending` and carries only the client
/// id. Once the server acknowledges it, identity becomes `Confirmed` with
/// the authoritative server id; the client id is retained for audit and for
/// matching late status events. Matching is always client-id-first, then
/// server-id, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum MessageIdentity {
    Pending {
        client_id: ClientMessageId,
    },
    Confirmed {
        server_id: ServerMessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientMessageId>,
    },
}

impl MessageIdentity {
    pub fn client_id(&self) -> Option<&str> {
        match self {
            MessageIdentity::Pending { client_id } => Some(client_id),
            MessageIdentity::Confirmed { client_id, .. } => client_id.as_deref(),
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match self {
            MessageIdentity::Pending { .. } => None,
            MessageIdentity::Confirmed { server_id, .. } => Some(server_id),
        }
    }

    pub fn matches_client_id(&self, candidate: &str) -> bool {
        self.client_id() == Some(candidate)
    }

    pub fn matches_server_id(&self, candidate: &str) -> bool {
        self.server_id() == Some(candidate)
    }

    /// The key the store files this message under. The client id is stable
    /// for the whole lifetime of a locally-minted message, so it wins when
    /// present; messages originated elsewhere only ever have a server id.
    pub fn storage_key(&self) -> &str {
        match self {
            MessageIdentity::Pending { client_id } => client_id,
            MessageIdentity::Confirmed {
                server_id,
                client_id,
            } => client_id.as_deref().unwrap_or(server_id),
        }
    }

    /// Attach the authoritative server id, retaining the client id.
    pub fn confirmed(&self, server_id: &str) -> MessageIdentity {
        MessageIdentity::Confirmed {
            server_id: server_id.to_string(),
            client_id: self.client_id().map(str::to_string),
        }
    }
}

/// The central entity: one logical send within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub identity: MessageIdentity,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub status: MessageStatus,
    /// Known only to this device; not yet confirmed by the server.
    pub local_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Apply a status event, enforcing monotonicity. Returns `true` if the
    /// record changed. A message already acknowledged by the server can
    /// never regress to `Failed`.
    pub fn apply_status(&mut self, status: MessageStatus, at: DateTime<Utc>) -> bool {
        if status == MessageStatus::Failed && !self.local_only {
            return false;
        }
        if !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        self.updated_at = at;
        true
    }

    /// Attach the server id as a single in-place replace, clearing the
    /// local-only flag. Idempotent when the same server id arrives twice.
    pub fn confirm(&mut self, server_id: &str, at: DateTime<Utc>) -> bool {
        if self.identity.matches_server_id(server_id) && !self.local_only {
            return false;
        }
        self.identity = self.identity.confirmed(server_id);
        self.local_only = false;
        self.updated_at = at;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_message() -> Message {
        let now = Utc::now();
        Message {
            identity: MessageIdentity::Pending {
                client_id: "c1".to_string(),
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

    #[test]
    fn status_ordering_is_monotonic() {
        assert!(MessageStatus::Pending.can_advance_to(MessageStatus::Sent));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Sent.can_advance_to(MessageStatus::Sent));
    }

    #[test]
    fn failed_only_reachable_from_pending() {
        assert!(MessageStatus::Pending.can_advance_to(MessageStatus::Failed));
        assert!(!MessageStatus::Sent.can_advance_to(MessageStatus::Failed));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Failed));
    }

    #[test]
    fn acknowledged_message_cannot_regress_to_failed() {
        let mut msg = pending_message();
        assert!(msg.confirm("m1", Utc::now()));
        assert!(msg.apply_status(MessageStatus::Sent, Utc::now()));
        assert!(!msg.apply_status(MessageStatus::Failed, Utc::now()));
        assert_eq!(msg.status, MessageStatus::Sent);
    }

    #[test]
    fn confirm_retains_client_id() {
        let mut msg = pending_message();
        msg.confirm("m1", Utc::now());
        assert_eq!(msg.identity.client_id(), Some("c1"));
        assert_eq!(msg.identity.server_id(), Some("m1"));
        assert!(!msg.local_only);
        // Second confirmation with the same id is a no-op.
        assert!(!msg.confirm("m1", Utc::now()));
    }

    #[test]
    fn storage_key_prefers_client_id() {
        let msg = pending_message();
        assert_eq!(msg.identity.storage_key(), "c1");
        let confirmed = MessageIdentity::Confirmed {
            server_id: "m1".to_string(),
            client_id: None,
        };
        assert_eq!(confirmed.storage_key(), "m1");
    }
}
