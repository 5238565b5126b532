pub mod types {
    pub mod conversation;
    pub mod events;
    pub mod message;
    pub mod presence;
}

pub mod client;
pub mod error;
pub mod flush;
pub mod handlers;
pub mod identity;
pub mod presence;
pub mod proto;
pub mod receipts;
pub mod reconcile;
pub mod send;
pub mod store;
pub mod transport;
pub mod typing;

#[cfg(test)]
pub mod test_utils;


pub use client::{Client, ClientBuilder, ConnectionStatus};
pub use error::{ClientError, SubmitError};
pub use types::message::{Message, MessageIdentity, MessageKind, MessageStatus};
