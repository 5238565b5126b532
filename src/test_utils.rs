//! Shared harness for engine tests: a scripted transport that records every
//! outbound event and lets tests inject inbound frames, plus a store
//! backend that fails on demand.

use crate::client::ClientBuilder;
use crate::identity::StaticIdentity;
use crate::proto::{ClientEvent, ServerEvent};
use crate::store::error::{Result as StoreResult, StoreError};
use crate::store::memory::MemoryStore;
use crate::store::traits::Backend;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::conversation::Conversation;
use crate::types::message::{Message, MessageStatus};
use crate::types::presence::{PresenceRecord, ReadReceipt};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep};

pub const TEST_CONVERSATION: &str = "alice_bob";

/// A transport that records every outbound event, parsed back from the
/// wire encoding so tests assert on typed events.
pub struct RecordingTransport {
    sent: Mutex<Vec<ClientEvent>>,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().expect("sent poisoned").clone()
    }

    pub fn sent_submits(&self) -> Vec<ClientEvent> {
        self.sent()
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::Submit { .. }))
            .collect()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("simulated send failure"));
        }
        let event: ClientEvent = serde_json::from_slice(frame)
            .map_err(|e| anyhow::anyhow!("test transport received invalid frame: {e}"))?;
        self.sent.lock().expect("sent poisoned").push(event);
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// Handles for one scripted connection.
#[derive(Clone)]
pub struct TestConnection {
    pub transport: Arc<RecordingTransport>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TestConnection {
    /// Inject an inbound server event as a wire frame.
    pub async fn inject(&self, event: &ServerEvent) {
        let frame = serde_json::to_vec(event).expect("event serializes");
        self.events_tx
            .send(TransportEvent::FrameReceived(Bytes::from(frame)))
            .await
            .expect("read loop alive");
    }

    /// Inject raw bytes, for malformed-frame tests.
    pub async fn inject_raw(&self, frame: &[u8]) {
        self.events_tx
            .send(TransportEvent::FrameReceived(Bytes::copy_from_slice(frame)))
            .await
            .expect("read loop alive");
    }

    /// Simulate a non-clean connection loss.
    pub async fn drop_connection(&self) {
        let _ = self.events_tx.send(TransportEvent::Disconnected).await;
    }
}

/// Factory handing out scripted connections, one per connect attempt.
#[derive(Default)]
pub struct ScriptedTransportFactory {
    connections: Mutex<Vec<TestConnection>>,
    fail_connects: AtomicU32,
}

impl ScriptedTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().expect("connections poisoned").len()
    }

    pub fn connection(&self, index: usize) -> Option<TestConnection> {
        self.connections
            .lock()
            .expect("connections poisoned")
            .get(index)
            .cloned()
    }

    /// Wait until the engine has opened its `index`-th connection.
    pub async fn wait_for_connection(&self, index: usize) -> TestConnection {
        eventually(
            || async { self.connection_count() > index },
            "connection opened",
        )
        .await;
        self.connection(index).expect("connection exists")
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("simulated connect failure"));
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(RecordingTransport::new());
        let _ = events_tx.send(TransportEvent::Connected).await;
        self.connections
            .lock()
            .expect("connections poisoned")
            .push(TestConnection {
                transport: transport.clone(),
                events_tx,
            });
        Ok((transport as Arc<dyn Transport>, events_rx))
    }
}

/// A backend whose writes all fail, for durability-first tests.
pub struct FailingStore;

macro_rules! failing {
    () => {
        Err(StoreError::Backend("simulated store failure".to_string()))
    };
}

#[async_trait]
impl Backend for FailingStore {
    async fn upsert_message(&self, _message: &Message) -> StoreResult<()> {
        failing!()
    }
    async fn confirm_message(
        &self,
        _client_id: &str,
        _server_id: &str,
        _status: MessageStatus,
        _at: DateTime<Utc>,
    ) -> StoreResult<()> {
        failing!()
    }
    async fn update_message_status(
        &self,
        _server_id: &str,
        _status: MessageStatus,
        _at: DateTime<Utc>,
    ) -> StoreResult<()> {
        failing!()
    }
    async fn messages_for_conversation(
        &self,
        _conversation_id: &str,
        _limit: usize,
        _before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Message>> {
        failing!()
    }
    async fn local_only_messages(&self, _conversation_id: &str) -> StoreResult<Vec<Message>> {
        failing!()
    }
    async fn delete_message(&self, _id: &str) -> StoreResult<()> {
        failing!()
    }
    async fn upsert_conversation(&self, _conversation: &Conversation) -> StoreResult<()> {
        failing!()
    }
    async fn get_conversation(&self, _id: &str) -> StoreResult<Option<Conversation>> {
        failing!()
    }
    async fn upsert_presence(&self, _record: &PresenceRecord) -> StoreResult<()> {
        failing!()
    }
    async fn get_presence(&self, _user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        failing!()
    }
    async fn upsert_read_receipt(&self, _receipt: &ReadReceipt) -> StoreResult<()> {
        failing!()
    }
    async fn read_receipts_for_message(&self, _message_id: &str) -> StoreResult<Vec<ReadReceipt>> {
        failing!()
    }
}

/// Builder preloaded with the common test collaborators.
pub fn test_client_builder() -> ClientBuilder {
    crate::client::Client::builder()
        .with_backend(Arc::new(MemoryStore::new()))
        .with_transport_factory(Arc::new(crate::transport::mock::MockTransportFactory::new()))
        .with_identity(StaticIdentity::new("alice"))
        .with_conversation_id(TEST_CONVERSATION)
}

/// Poll `cond` until it holds or a two-second deadline passes.
pub async fn eventually<F, Fut>(mut cond: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if cond().await {
            return;
        }
        if Instant::now() > deadline {
            panic!("condition not met within deadline: {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
