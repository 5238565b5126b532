use crate::store::error::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("no authenticated user identity is set")]
    NotAuthenticated,
    #[error("invalid engine configuration: {0}")]
    Config(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("wire encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the optimistic send pipeline. Persistence failure is fatal to
/// the individual send; transport unavailability is not an error at all
/// (the event is buffered).
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no authenticated user identity is set")]
    NotAuthenticated,
    #[error("message content is empty")]
    EmptyContent,
    #[error("failed to persist message before transmission: {0}")]
    Store(#[from] StoreError),
    #[error("no message with client id {0}")]
    UnknownClientId(String),
}
