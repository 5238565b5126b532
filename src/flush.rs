//! Offline queue flusher.
//!
//! On every reconnection, replays each locally-pending message exactly once,
//! in creation order, with its original client id so later acknowledgements
//! reconcile to the same record. The outbound buffer is cleared first: the
//! same logical sends were queued there while disconnected, and replaying
//! from the store is the single source of truth.

use crate::client::Client;
use crate::error::ClientError;
use crate::proto::ClientEvent;
use log::{debug, info};

impl Client {
    pub(crate) async fn flush_offline_queue(&self) -> Result<(), ClientError> {
        let dropped = self.clear_outbound_buffer().await;
        if dropped > 0 {
            debug!(
                target: "Client/Flush",
                "Dropped {dropped} stale buffered events before replay"
            );
        }

        let pending = self
            .persistence_manager
            .backend()
            .local_only_messages(&self.config.conversation_id)
            .await?;

        if pending.is_empty() {
            debug!(target: "Client/Flush", "No local-only messages to replay");
            return Ok(());
        }

        info!(
            target: "Client/Flush",
            "Replaying {} local-only messages", pending.len()
        );
        for message in pending {
            let Some(client_id) = message.identity.client_id() else {
                // Local-only messages are always client-minted; a record
                // without a client id is a store inconsistency.
                debug!(target: "Client/Flush", "Skipping local-only message without client id");
                continue;
            };
            self.send_event(ClientEvent::Submit {
                client_id: client_id.to_string(),
                conversation_id: message.conversation_id.clone(),
                content: message.content.clone(),
                kind: message.kind,
                media: message.media.clone(),
            })
            .await?;
        }
        Ok(())
    }
}
