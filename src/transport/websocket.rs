//! Tokio/tungstenite WebSocket transport.
//!
//! One instance per connection attempt; the factory dials, splits the
//! stream, and pumps inbound frames into the event channel until the
//! socket closes.

use super::{Transport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }

    async fn read_loop(mut stream: WsStream, events: mpsc::Sender<TransportEvent>) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let payload = Bytes::copy_from_slice(text.as_bytes());
                    if events
                        .send(TransportEvent::FrameReceived(payload))
                        .await
                        .is_err()
                    {
                        debug!(target: "Transport", "Event receiver dropped, stopping read loop");
                        return;
                    }
                }
                Ok(Message::Binary(payload)) => {
                    if events
                        .send(TransportEvent::FrameReceived(payload))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(target: "Transport", "Server closed connection: {frame:?}");
                    break;
                }
                // Pings and pongs are handled by tungstenite.
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "Transport", "WebSocket read error: {e}");
                    break;
                }
            }
        }
        let _ = events.send(TransportEvent::Disconnected).await;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;

        let text = std::str::from_utf8(frame)
            .map_err(|e| anyhow::anyhow!("outbound frame is not valid UTF-8: {e}"))?;

        debug!(target: "Transport", "--> Sending frame: {} bytes", frame.len());
        sink.send(Message::text(text))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {e}"))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
    }
}

/// Factory for WebSocket transports dialing a fixed endpoint.
pub struct WebSocketTransportFactory {
    url: String,
}

impl WebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        debug!(target: "Transport", "Dialing {}", self.url);
        let (ws, _response) = connect_async(&self.url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {e}"))?;

        let (sink, stream) = ws.split();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let _ = events_tx.send(TransportEvent::Connected).await;
        tokio::spawn(WebSocketTransport::read_loop(stream, events_tx));

        let transport = Arc::new(WebSocketTransport::new(sink)) as Arc<dyn Transport>;
        Ok((transport, events_rx))
    }
}
