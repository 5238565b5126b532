use crate::client::ConnectionStatus;
use crate::types::message::{ConversationId, Message, UserId};
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Snapshot of the in-memory message list after a reconciliation pass.
#[derive(Debug, Clone)]
pub struct MessageListUpdate {
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
}

/// The set of users currently typing in the conversation.
#[derive(Debug, Clone)]
pub struct TypingUpdate {
    pub conversation_id: ConversationId,
    pub users: Vec<UserId>,
}

/// The set of users currently online in the conversation.
#[derive(Debug, Clone)]
pub struct OnlineUsersUpdate {
    pub conversation_id: ConversationId,
    pub users: Vec<UserId>,
}

/// A message originated elsewhere arrived; the notification collaborator
/// decides whether to render a system notification.
#[derive(Debug, Clone)]
pub struct MessageArrived {
    pub message: Message,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event kind,
        /// so subscribers only wake for the stream they care about.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (message_list_changed, Arc<MessageListUpdate>),
    (message_arrived, Arc<MessageArrived>),
    (connection_status_changed, ConnectionStatus),
    (typing_users_changed, Arc<TypingUpdate>),
    (online_users_changed, Arc<OnlineUsersUpdate>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Broadcast, ignoring the "no receivers" case. Streams are optional
    /// collaborator hooks; an unobserved stream is not an error.
    pub fn emit<T: Clone>(sender: &broadcast::Sender<T>, value: T) {
        let _ = sender.send(value);
    }
}
