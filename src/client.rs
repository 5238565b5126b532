use crate::error::ClientError;
use crate::identity::IdentityProvider;
use crate::presence::PresenceTracker;
use crate::proto::{ClientEvent, ServerEvent};
use crate::receipts::ReadReceiptTracker;
use crate::reconcile::MessageCache;
use crate::store::persistence_manager::PersistenceManager;
use crate::store::traits::Backend;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{EventBus, MessageListUpdate, OnlineUsersUpdate, TypingUpdate};
use crate::types::message::{ConversationId, Message, UserId};
use crate::typing::{LocalTypingState, TypingTracker};
use chrono::Utc;
use log::{debug, info, warn};
use rand::RngCore;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::time::{Duration, sleep};

pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 50;

/// Connection lifecycle as observed by the UI banner. Terminal
/// `Disconnected` is reached only through explicit `disconnect()` or after
/// the reconnect budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Exponential backoff schedule for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based): `min(base * 2^(n-1), cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub conversation_id: ConversationId,
    pub history_page_size: usize,
    pub reconnect: ReconnectPolicy,
}

/// The synchronization engine for one open conversation.
///
/// Owns the connection to the remote conversation service, the in-memory
/// message list, and the ephemeral trackers. Everything the UI renders comes
/// out of the subscription streams; everything the user does goes in through
/// `submit`, `mark_read` and the typing methods.
pub struct Client {
    pub(crate) config: EngineConfig,
    pub(crate) persistence_manager: Arc<PersistenceManager>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) event_bus: EventBus,

    pub(crate) transport: Mutex<Option<Arc<dyn Transport>>>,
    transport_events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    transport_factory: Arc<dyn TransportFactory>,

    pub(crate) cache: MessageCache,
    pub(crate) presence: PresenceTracker,
    pub(crate) typing: TypingTracker,
    pub(crate) local_typing: LocalTypingState,
    pub(crate) receipts: ReadReceiptTracker,

    pub(crate) outbound_buffer: Mutex<VecDeque<ClientEvent>>,
    status_tx: watch::Sender<ConnectionStatus>,

    is_running: AtomicBool,
    is_connecting: AtomicBool,
    pub(crate) expected_disconnect: AtomicBool,
    has_connected_once: AtomicBool,
    reconnect_attempts: AtomicU32,
    pub(crate) shutdown_notifier: Notify,
    resume_notifier: Notify,

    pub(crate) history_cursor: Mutex<Option<String>>,
    pub(crate) history_has_more: AtomicBool,

    unique_id: String,
    id_counter: AtomicU64,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn conversation_id(&self) -> &str {
        &self.config.conversation_id
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn persistence_manager(&self) -> &Arc<PersistenceManager> {
        &self.persistence_manager
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Observe connection-status transitions; independent of any single
    /// subscriber, suitable for a passive UI banner.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Snapshot of the in-memory message list, in creation order.
    pub async fn messages(&self) -> Vec<Message> {
        self.cache.snapshot().await
    }

    pub fn typing_users(&self) -> Vec<UserId> {
        self.typing.typing_users()
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.online_users()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(target: "Client", "Connection status -> {status:?}");
            EventBus::emit(&self.event_bus.connection_status_changed, status);
        }
    }

    /// Mint a client message id: creation time plus a per-process random
    /// suffix and counter, collision-free within a device.
    pub(crate) fn generate_client_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}.{}",
            Utc::now().timestamp_millis(),
            self.unique_id,
            counter
        )
    }

    /// The reconnect loop. Runs until `disconnect()` is called; on a
    /// non-clean closure it schedules reconnection attempts with
    /// exponential backoff, and after exhausting the attempt budget parks
    /// until `network_available()` is signalled.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "`run` called while already running.");
            return;
        }

        if let Err(e) = self.load_from_store().await {
            warn!(target: "Client", "Failed to seed message list from store: {e}");
        }

        let sweeper = self.clone();
        tokio::spawn(async move { sweeper.typing_sweep_loop().await });

        while self.is_running.load(Ordering::Relaxed) {
            self.expected_disconnect.store(false, Ordering::Relaxed);

            let first_attempt = !self.has_connected_once.load(Ordering::Relaxed);
            self.set_status(if first_attempt {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            });

            match self.connect().await {
                Ok(()) => {
                    let first = !self.has_connected_once.swap(true, Ordering::SeqCst);
                    self.reconnect_attempts.store(0, Ordering::Relaxed);
                    self.set_status(ConnectionStatus::Connected);

                    if let Err(e) = self.bootstrap_connection(first).await {
                        warn!(target: "Client", "Connection bootstrap failed: {e}");
                    }

                    match self.read_loop().await {
                        Ok(()) if self.expected_disconnect.load(Ordering::Relaxed) => {
                            debug!(target: "Client", "Read loop exited (expected disconnect).")
                        }
                        Ok(()) => info!(target: "Client", "Connection closed by server."),
                        Err(e) => warn!(target: "Client", "Read loop exited with error: {e}"),
                    }

                    self.cleanup_connection_state().await;
                }
                Err(e) => {
                    warn!(target: "Client", "Failed to connect: {e}");
                }
            }

            if !self.is_running.load(Ordering::Relaxed)
                || self.expected_disconnect.load(Ordering::Relaxed)
            {
                break;
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.reconnect.max_attempts {
                self.set_status(ConnectionStatus::Disconnected);
                info!(
                    target: "Client",
                    "Reconnect attempts exhausted ({attempt}); waiting for network-regained signal."
                );
                tokio::select! {
                    _ = self.resume_notifier.notified() => {
                        self.reconnect_attempts.store(0, Ordering::Relaxed);
                        info!(target: "Client", "Network-regained signal received, resuming reconnect attempts.");
                        continue;
                    }
                    _ = self.shutdown_notifier.notified() => break,
                }
            }

            self.set_status(ConnectionStatus::Reconnecting);
            let delay = self.config.reconnect.delay_for(attempt);
            info!(
                target: "Client",
                "Will attempt to reconnect in {delay:?} (attempt {attempt})"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown_notifier.notified() => break,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        self.is_running.store(false, Ordering::Relaxed);
        info!(target: "Client", "Run loop has shut down.");
    }

    async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let (transport, transport_events) = self.transport_factory.create_transport().await?;
        *self.transport.lock().await = Some(transport);
        *self.transport_events.lock().await = Some(transport_events);
        Ok(())
    }

    /// Post-connect bootstrap. First connection fetches initial history;
    /// a reconnection replays the offline queue and re-requests history as
    /// a full resync (the safe baseline; delta sync is a future
    /// optimization).
    async fn bootstrap_connection(self: &Arc<Self>, first: bool) -> Result<(), ClientError> {
        if first {
            self.flush_outbound_buffer().await;
        } else {
            self.flush_offline_queue().await?;
        }
        self.request_history(None).await
    }

    /// Process inbound frames in arrival order. Each dispatch is awaited to
    /// completion before the next frame is pulled, so handlers for the same
    /// message never overlap.
    async fn read_loop(self: &Arc<Self>) -> Result<(), ClientError> {
        let mut events = self
            .transport_events
            .lock()
            .await
            .take()
            .ok_or(ClientError::NotConnected)?;

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(TransportEvent::Connected) => {}
                        Some(TransportEvent::FrameReceived(frame)) => {
                            match serde_json::from_slice::<ServerEvent>(&frame) {
                                Ok(event) => self.dispatch(event).await,
                                Err(e) => {
                                    // Protocol error: drop the single event,
                                    // keep the connection.
                                    warn!(target: "Client", "Discarding malformed inbound event: {e}");
                                }
                            }
                        }
                        Some(TransportEvent::Disconnected) | None => return Ok(()),
                    }
                }
                _ = self.shutdown_notifier.notified() => return Ok(()),
            }
        }
    }

    /// Serialize and transmit an event, or buffer it when the connection is
    /// not usable. Buffering is success: transport errors are recovered by
    /// the reconnect loop and the offline flusher, never surfaced to the
    /// sender.
    pub(crate) async fn send_event(&self, event: ClientEvent) -> Result<(), ClientError> {
        if self.is_connected() {
            let transport = self.transport.lock().await.clone();
            if let Some(transport) = transport {
                let frame = serde_json::to_vec(&event)?;
                match transport.send_frame(&frame).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        warn!(target: "Client", "Send failed, buffering event: {e}");
                    }
                }
            }
        }

        if event.is_bufferable() {
            self.outbound_buffer.lock().await.push_back(event);
        } else {
            debug!(target: "Client", "Dropping ephemeral event while disconnected");
        }
        Ok(())
    }

    /// Flush the outbound buffer in enqueue order (first connect only; a
    /// reconnect goes through the offline flusher instead).
    pub(crate) async fn flush_outbound_buffer(&self) {
        let queued: Vec<ClientEvent> = self.outbound_buffer.lock().await.drain(..).collect();
        if queued.is_empty() {
            return;
        }
        info!(target: "Client", "Flushing {} buffered outbound events", queued.len());
        for event in queued {
            if let Err(e) = self.send_event(event).await {
                warn!(target: "Client", "Failed to flush buffered event: {e}");
            }
        }
    }

    /// Drain the buffer without transmitting. The offline flusher clears
    /// stale queued submissions before replaying from the store, so the
    /// same logical send cannot go out twice.
    pub(crate) async fn clear_outbound_buffer(&self) -> usize {
        let mut buffer = self.outbound_buffer.lock().await;
        let dropped = buffer.len();
        buffer.clear();
        dropped
    }

    pub(crate) async fn request_history(&self, before: Option<String>) -> Result<(), ClientError> {
        self.send_event(ClientEvent::RequestHistory {
            conversation_id: self.config.conversation_id.clone(),
            limit: self.config.history_page_size,
            before,
        })
        .await
    }

    /// Ask for the page preceding the oldest one seen so far. No-op when
    /// the server reported no further pages.
    pub async fn load_older_messages(&self) -> Result<(), ClientError> {
        if !self.history_has_more.load(Ordering::Relaxed) {
            return Ok(());
        }
        let cursor = self.history_cursor.lock().await.clone();
        self.request_history(cursor).await
    }

    /// Mark a message as read on behalf of the local user.
    pub async fn mark_read(&self, message_id: &str) -> Result<(), ClientError> {
        let user_id = self
            .identity
            .current_user_id()
            .ok_or(ClientError::NotAuthenticated)?;
        let now = Utc::now();

        self.receipts.record(message_id, &user_id, now);
        self.persistence_manager.best_effort(
            "read receipt",
            self.persistence_manager
                .backend()
                .upsert_read_receipt(&crate::types::presence::ReadReceipt {
                    message_id: message_id.to_string(),
                    user_id: user_id.clone(),
                    read_at: now,
                })
                .await,
        );

        self.send_event(ClientEvent::MarkRead {
            message_id: message_id.to_string(),
            user_id,
        })
        .await
    }

    /// Signal that the local user is composing. Debounced; at most one
    /// start event per debounce window goes on the wire.
    pub async fn start_typing(&self) -> Result<(), ClientError> {
        let user_id = self
            .identity
            .current_user_id()
            .ok_or(ClientError::NotAuthenticated)?;
        if !self.local_typing.should_send_start() {
            return Ok(());
        }
        self.send_event(ClientEvent::Typing {
            conversation_id: self.config.conversation_id.clone(),
            user_id,
            is_typing: true,
        })
        .await
    }

    /// Explicit stop, sent on blur or send.
    pub async fn stop_typing(&self) -> Result<(), ClientError> {
        let user_id = self
            .identity
            .current_user_id()
            .ok_or(ClientError::NotAuthenticated)?;
        self.local_typing.reset();
        self.send_event(ClientEvent::Typing {
            conversation_id: self.config.conversation_id.clone(),
            user_id,
            is_typing: false,
        })
        .await
    }

    /// Removal primitive for the external deletion collaborator.
    pub async fn remove_message(&self, id: &str) -> Result<(), ClientError> {
        self.cache.remove(id).await;
        self.persistence_manager
            .backend()
            .delete_message(id)
            .await?;
        self.emit_message_list().await;
        Ok(())
    }

    /// External connectivity-restored signal; resumes reconnection after
    /// the attempt budget was exhausted.
    pub fn network_available(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.resume_notifier.notify_waiters();
    }

    /// Tear down: stop reconnecting, release timers and listeners, and
    /// close the connection cleanly so no reconnect is scheduled.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting intentionally.");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();

        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.disconnect().await;
        }
        self.cleanup_connection_state().await;
        self.set_status(ConnectionStatus::Disconnected);
    }

    async fn cleanup_connection_state(&self) {
        *self.transport.lock().await = None;
        *self.transport_events.lock().await = None;

        // Pessimistic presence reset: never show stale "online".
        self.presence.clear();
        self.emit_online_users();
        if self.typing.sweep() || !self.typing.typing_users().is_empty() {
            self.typing.clear();
            self.emit_typing_update();
        }
    }

    /// Seed the in-memory list from the store so the UI is local-first:
    /// everything previously synced (and everything still pending) shows up
    /// before the first connection attempt completes.
    async fn load_from_store(&self) -> Result<(), ClientError> {
        let backend = self.persistence_manager.backend();
        let stored = backend
            .messages_for_conversation(
                &self.config.conversation_id,
                self.config.history_page_size,
                None,
            )
            .await?;
        for message in stored.into_iter().rev() {
            self.cache.merge_remote(message).await;
        }
        if !self.cache.is_empty().await {
            self.emit_message_list().await;
        }
        Ok(())
    }

    pub(crate) async fn typing_sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(crate::typing::TYPING_TTL / 3);
        loop {
            tokio::select! {
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Typing", "Shutdown signaled, exiting sweep loop");
                    return;
                }
                _ = interval.tick() => {
                    if self.typing.sweep() {
                        self.emit_typing_update();
                    }
                }
            }
        }
    }

    pub(crate) async fn emit_message_list(&self) {
        let update = MessageListUpdate {
            conversation_id: self.config.conversation_id.clone(),
            messages: self.cache.snapshot().await,
        };
        EventBus::emit(&self.event_bus.message_list_changed, Arc::new(update));
    }

    pub(crate) fn emit_typing_update(&self) {
        let update = TypingUpdate {
            conversation_id: self.config.conversation_id.clone(),
            users: self.typing.typing_users(),
        };
        EventBus::emit(&self.event_bus.typing_users_changed, Arc::new(update));
    }

    pub(crate) fn emit_online_users(&self) {
        let update = OnlineUsersUpdate {
            conversation_id: self.config.conversation_id.clone(),
            users: self.presence.online_users(),
        };
        EventBus::emit(&self.event_bus.online_users_changed, Arc::new(update));
    }
}

/// Builder for the engine. A backend, transport factory, identity provider
/// and conversation id are required; everything else has defaults.
#[derive(Default)]
pub struct ClientBuilder {
    backend: Option<Arc<dyn Backend>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    conversation_id: Option<ConversationId>,
    history_page_size: Option<usize>,
    reconnect: Option<ReconnectPolicy>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_history_page_size(mut self, size: usize) -> Self {
        self.history_page_size = Some(size);
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub fn build(self) -> Result<Arc<Client>, ClientError> {
        let backend = self
            .backend
            .ok_or_else(|| ClientError::Config("a storage backend is required"))?;
        let transport_factory = self
            .transport_factory
            .ok_or_else(|| ClientError::Config("a transport factory is required"))?;
        let identity = self
            .identity
            .ok_or_else(|| ClientError::Config("an identity provider is required"))?;
        let conversation_id = self
            .conversation_id
            .ok_or_else(|| ClientError::Config("a conversation id is required"))?;

        let mut unique_id_bytes = [0u8; 2];
        rand::rng().fill_bytes(&mut unique_id_bytes);

        let config = EngineConfig {
            conversation_id,
            history_page_size: self.history_page_size.unwrap_or(DEFAULT_HISTORY_PAGE_SIZE),
            reconnect: self.reconnect.unwrap_or_default(),
        };

        Ok(Arc::new(Client {
            config,
            persistence_manager: Arc::new(PersistenceManager::new(backend)),
            identity,
            event_bus: EventBus::new(),
            transport: Mutex::new(None),
            transport_events: Mutex::new(None),
            transport_factory,
            cache: MessageCache::new(),
            presence: PresenceTracker::new(),
            typing: TypingTracker::new(),
            local_typing: LocalTypingState::new(),
            receipts: ReadReceiptTracker::new(),
            outbound_buffer: Mutex::new(VecDeque::new()),
            status_tx: watch::channel(ConnectionStatus::Disconnected).0,
            is_running: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            has_connected_once: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            shutdown_notifier: Notify::new(),
            resume_notifier: Notify::new(),
            history_cursor: Mutex::new(None),
            history_has_more: AtomicBool::new(true),
            unique_id: hex::encode(unique_id_bytes),
            id_counter: AtomicU64::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn client_ids_are_unique_within_a_device() {
        let client = crate::test_utils::test_client_builder().build().unwrap();
        let a = client.generate_client_id();
        let b = client.generate_client_id();
        assert_ne!(a, b);
        assert!(a.contains('-'));
    }

    #[test]
    fn builder_requires_conversation_id() {
        let result = Client::builder()
            .with_backend(Arc::new(crate::store::memory::MemoryStore::new()))
            .with_transport_factory(Arc::new(crate::transport::mock::MockTransportFactory::new()))
            .with_identity(crate::identity::StaticIdentity::new("alice"))
            .build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
