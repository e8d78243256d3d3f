//! Trait abstraction for opening sockets to enable testing

use super::{SocketChannels, SocketEvent};
use crate::error::{Result, TelemetryError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Trait for opening a WebSocket
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a socket to `url`, resolving once it is open
    async fn open(&self, url: &str) -> Result<SocketChannels>;
}

/// Connector backed by tokio-tungstenite
///
/// Each socket is split into a writer task draining the outbound channel and a
/// reader task feeding the inbound channel. Ping/pong is answered by the
/// library; binary frames are ignored.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<SocketChannels> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TelemetryError::Connect(format!("Failed to open {}: {}", url, e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SocketEvent>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                debug!("Sending frame ({} bytes)", text.len());
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!("Socket write failed: {}", e);
                    return;
                }
            }
            // Every sender dropped: close our side
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(SocketEvent::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("Received close frame: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = inbound_tx.send(SocketEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(SocketEvent::Closed);
        });

        Ok(SocketChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    /// Server side of a socket opened by `MockConnector`
    pub struct MockServer {
        /// Frames the client wrote
        pub sent: mpsc::UnboundedReceiver<String>,
        /// Events to deliver to the client
        pub events: mpsc::UnboundedSender<SocketEvent>,
    }

    impl MockServer {
        /// Next frame written by the client, parsed as JSON
        pub fn next_json(&mut self) -> Option<Value> {
            self.sent
                .try_recv()
                .ok()
                .map(|text| serde_json::from_str(&text).unwrap())
        }

        pub fn push_text(&self, text: &str) {
            let _ = self.events.send(SocketEvent::Text(text.to_string()));
        }

        pub fn push_json(&self, value: Value) {
            self.push_text(&value.to_string());
        }

        pub fn push_error(&self, reason: &str) {
            let _ = self.events.send(SocketEvent::Error(reason.to_string()));
        }

        pub fn close(&self) {
            let _ = self.events.send(SocketEvent::Closed);
        }
    }

    /// Mock connector for testing
    #[derive(Clone)]
    pub struct MockConnector {
        pub opened_urls: Arc<Mutex<Vec<String>>>,
        pub refuse: Arc<Mutex<bool>>,
        servers: Arc<Mutex<VecDeque<MockServer>>>,
        gate: Arc<watch::Sender<bool>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            let (gate, _) = watch::channel(true);
            Self {
                opened_urls: Arc::new(Mutex::new(Vec::new())),
                refuse: Arc::new(Mutex::new(false)),
                servers: Arc::new(Mutex::new(VecDeque::new())),
                gate: Arc::new(gate),
            }
        }

        /// Keep subsequent opens pending until `release` is called
        pub fn hold(&self) {
            self.gate.send_replace(false);
        }

        pub fn release(&self) {
            self.gate.send_replace(true);
        }

        /// Make subsequent opens fail (or succeed again)
        pub fn set_refuse(&self, refuse: bool) {
            *self.refuse.lock().unwrap() = refuse;
        }

        /// Number of open attempts so far
        pub fn open_count(&self) -> usize {
            self.opened_urls.lock().unwrap().len()
        }

        /// Take the server side of the oldest unclaimed socket
        pub fn next_server(&self) -> Option<MockServer> {
            self.servers.lock().unwrap().pop_front()
        }
    }

    #[async_trait]
    impl SocketConnector for MockConnector {
        async fn open(&self, url: &str) -> Result<SocketChannels> {
            self.opened_urls.lock().unwrap().push(url.to_string());

            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|ready| *ready).await;

            if *self.refuse.lock().unwrap() {
                return Err(TelemetryError::Connect(format!("Mock connection refused: {}", url)));
            }

            let (outbound, sent) = mpsc::unbounded_channel();
            let (events, inbound) = mpsc::unbounded_channel();
            self.servers
                .lock()
                .unwrap()
                .push_back(MockServer { sent, events });

            Ok(SocketChannels { outbound, inbound })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockConnector;
    use super::*;

    #[tokio::test]
    async fn test_mock_connector_wires_channels() {
        let connector = MockConnector::new();
        let channels = connector.open("ws://test/api/ws").await.unwrap();
        let mut server = connector.next_server().unwrap();

        channels.outbound.send(r#"{"a":1}"#.to_string()).unwrap();
        assert_eq!(server.next_json().unwrap()["a"], 1);

        let mut inbound = channels.inbound;
        server.push_text("hello");
        server.close();
        assert_eq!(inbound.recv().await, Some(SocketEvent::Text("hello".to_string())));
        assert_eq!(inbound.recv().await, Some(SocketEvent::Closed));
    }

    #[tokio::test]
    async fn test_mock_connector_refusal() {
        let connector = MockConnector::new();
        connector.set_refuse(true);

        let result = connector.open("ws://test/api/ws").await;
        assert!(matches!(result, Err(TelemetryError::Connect(_))));
        assert_eq!(connector.open_count(), 1);
        assert!(connector.next_server().is_none());
    }

    // Touches the local network stack
    #[tokio::test]
    #[ignore] // Run with: cargo test -- --ignored
    async fn test_tungstenite_connector_refused_port() {
        let connector = TungsteniteConnector::new();
        let result = connector.open("ws://127.0.0.1:1/api/ws").await;
        assert!(matches!(result, Err(TelemetryError::Connect(_))));
    }
}
