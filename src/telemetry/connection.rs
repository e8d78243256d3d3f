//! # Telemetry Connection
//!
//! One authenticated WebSocket shared by every telemetry subscription.
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──open + auth sent──▶ Open
//!        ▲                        │                              │
//!        │                        └──────── error/close ─────────┤
//!        │                                                       ▼
//!        └──── max attempts reached ◀── Reconnecting { attempt } ◀┘
//! ```
//!
//! All state sits behind one mutex that is never held across an `.await` or
//! while a consumer handler runs, so handlers may call back into the
//! connection. Each socket gets a generation number; events from an older
//! generation (e.g. frames still in flight after `disconnect`) are ignored.

use super::registry::{MessageHandler, Registry, Subscription, SubscriptionId};
use crate::error::{Result, TelemetryError};
use crate::protocol::decoder::{decode_inbound, InboundFrame};
use crate::protocol::encoder::{auth_command, encode, subscribe_command, unsubscribe_command};
use crate::protocol::types::TelemetryFrame;
use crate::socket::{SocketChannels, SocketConnector, SocketEvent};
use crate::token::TokenSource;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reconnect attempts made after a drop before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed wait before each reconnect attempt
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Lifecycle state of the telemetry socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Socket open and auth frame sent
    Open,
    /// Waiting out the delay before reconnect `attempt`
    Reconnecting { attempt: u32 },
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Reconnecting { .. })
    }
}

/// Fixed-delay, bounded reconnect policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a drop before giving up (0 disables reconnecting)
    pub max_attempts: u32,
    /// Wait before each attempt
    pub delay: Duration,
    /// Re-send retained subscribe commands on the new socket
    pub resubscribe: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            resubscribe: false,
        }
    }
}

/// Everything a connection needs besides its collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Socket URL, see [`crate::socket::derive_ws_url`]
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
}

/// Result of one connection attempt, shared with every `connect` caller
#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    Open,
    Failed(String),
    /// Superseded by `disconnect`
    Discarded,
}

struct State {
    link: LinkState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    authenticated: bool,
    pending: Option<watch::Receiver<Outcome>>,
    /// Token of the most recent connect, reused by reconnects
    token: Option<String>,
    reconnect_attempts: u32,
    ever_opened: bool,
    next_subscription_id: SubscriptionId,
    registry: Registry,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl State {
    fn new() -> Self {
        Self {
            link: LinkState::Disconnected,
            generation: 0,
            outbound: None,
            authenticated: false,
            pending: None,
            token: None,
            reconnect_attempts: 0,
            ever_opened: false,
            next_subscription_id: 0,
            registry: Registry::new(),
            reader_task: None,
            reconnect_task: None,
        }
    }
}

struct Shared {
    settings: ConnectionSettings,
    connector: Arc<dyn SocketConnector>,
    tokens: Arc<dyn TokenSource>,
    state: Mutex<State>,
}

/// Telemetry client for the IoT platform's WebSocket API
///
/// Construct one per application session and hand clones to consumers; all
/// clones share the same socket and registry.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use traffic_telemetry::socket::TungsteniteConnector;
/// use traffic_telemetry::{ConnectionSettings, ReconnectPolicy, StaticToken, TelemetryConnection};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let settings = ConnectionSettings {
///         ws_url: "wss://iot.example.com/api/ws".to_string(),
///         reconnect: ReconnectPolicy::default(),
///     };
///     let connection = TelemetryConnection::new(
///         settings,
///         Arc::new(TungsteniteConnector::new()),
///         Arc::new(StaticToken::new("jwt")),
///     );
///
///     connection.connect("jwt").await?;
///     let id = connection.subscribe_to_device_telemetry("device-1", |frame| {
///         println!("T_D1 = {:?}", frame.value("T_D1"));
///     });
///     assert!(id.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TelemetryConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TelemetryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryConnection")
            .field("ws_url", &self.shared.settings.ws_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TelemetryConnection {
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn SocketConnector>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                connector,
                tokens,
                state: Mutex::new(State::new()),
            }),
        }
    }

    /// Open and authenticate the socket
    ///
    /// Resolves immediately when already open. While an attempt is in flight,
    /// further callers wait for that attempt instead of opening another
    /// socket. Resolves once the auth frame has been sent; the server's
    /// verdict arrives later, in-band.
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be opened, or if `disconnect` is
    /// called before the attempt completes
    pub async fn connect(&self, token: &str) -> Result<()> {
        let mut pending = {
            let mut state = self.shared.lock_state();
            if let Some(pending) = &state.pending {
                pending.clone()
            } else if state.outbound.is_some() {
                return Ok(());
            } else {
                self.shared.begin_connect(&mut state, token)
            }
        };

        let outcome = match pending.wait_for(|o| !matches!(o, Outcome::Pending)).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => Outcome::Discarded,
        };

        match outcome {
            Outcome::Open => Ok(()),
            Outcome::Failed(reason) => Err(TelemetryError::Connect(reason)),
            Outcome::Pending | Outcome::Discarded => Err(TelemetryError::Disconnected),
        }
    }

    /// Close the socket and forget every subscription and message handler
    ///
    /// No reconnect follows. Pending `connect` calls fail with
    /// [`TelemetryError::Disconnected`].
    pub fn disconnect(&self) {
        let mut state = self.shared.lock_state();
        state.generation += 1;

        let had_socket = state.outbound.take().is_some();
        if let Some(task) = state.reader_task.take() {
            task.abort();
        }
        if let Some(task) = state.reconnect_task.take() {
            task.abort();
        }

        state.registry.clear();
        state.authenticated = false;
        state.pending = None;
        state.link = LinkState::Disconnected;

        if had_socket {
            info!("Telemetry socket closed by client");
        }
    }

    /// Subscribe to a device's latest telemetry
    ///
    /// # Returns
    ///
    /// * `Option<SubscriptionId>` - Id for unsubscribing, or `None` when the
    ///   socket is not open (nothing is queued; connect first)
    pub fn subscribe_to_device_telemetry<F>(&self, device_id: &str, handler: F) -> Option<SubscriptionId>
    where
        F: Fn(TelemetryFrame) + Send + Sync + 'static,
    {
        info!("Subscribing to device telemetry for device: {}", device_id);

        let mut state = self.shared.lock_state();
        let Some(outbound) = state.outbound.clone() else {
            error!("Telemetry socket is not connected; cannot subscribe to {}", device_id);
            return None;
        };

        state.next_subscription_id += 1;
        let id = state.next_subscription_id;
        let command = subscribe_command(device_id, id);

        state.registry.insert_subscription(Subscription {
            id,
            device_id: device_id.to_string(),
            handler: Arc::new(handler),
            command: command.clone(),
        });
        write_frame(&outbound, &command);

        Some(id)
    }

    /// Cancel a telemetry subscription
    ///
    /// Requires an open socket. When the socket is down the call only logs and
    /// the registry entry stays in place.
    pub fn unsubscribe_from_device_telemetry(&self, device_id: &str, subscription_id: SubscriptionId) {
        let mut state = self.shared.lock_state();
        let Some(outbound) = state.outbound.clone() else {
            error!(
                "Telemetry socket is not connected; cannot unsubscribe {} from {}",
                subscription_id, device_id
            );
            return;
        };

        write_frame(&outbound, &unsubscribe_command(device_id, subscription_id));
        state.registry.remove_subscription(subscription_id);
        info!("Unsubscribed from device telemetry for device: {}", device_id);
    }

    /// Route non-telemetry frames with `"type": message_type` to `handler`
    ///
    /// Replaces any handler already registered for the type.
    pub fn subscribe<F>(&self, message_type: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.shared
            .lock_state()
            .registry
            .set_message_handler(message_type, handler);
    }

    pub fn unsubscribe(&self, message_type: &str) {
        self.shared
            .lock_state()
            .registry
            .remove_message_handler(message_type);
    }

    /// Best-effort send of any serializable message
    ///
    /// When the socket is down, makes one connect attempt with the token
    /// source's current token. If the socket is still not open afterwards the
    /// message is logged and dropped.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) {
        if !self.is_open() {
            let Some(token) = self.shared.tokens.token() else {
                error!("No authentication token available; dropping message");
                return;
            };
            if let Err(e) = self.connect(&token).await {
                warn!("Connect before send failed: {}", e);
            }
        }

        let outbound = self.shared.lock_state().outbound.clone();
        match outbound {
            Some(outbound) => write_frame(&outbound, message),
            None => error!("Telemetry socket is not connected; dropping message"),
        }
    }

    /// True when the socket is open and the auth frame has been sent
    pub fn is_connected(&self) -> bool {
        let state = self.shared.lock_state();
        state.outbound.is_some() && state.authenticated && state.link.is_open()
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock_state().link
    }

    /// Number of subscriptions held in the registry
    pub fn subscription_count(&self) -> usize {
        self.shared.lock_state().registry.subscription_count()
    }

    fn is_open(&self) -> bool {
        self.shared.lock_state().outbound.is_some()
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_connect(self: &Arc<Self>, state: &mut State, token: &str) -> watch::Receiver<Outcome> {
        let (done_tx, done_rx) = watch::channel(Outcome::Pending);

        state.generation += 1;
        state.link = LinkState::Connecting;
        state.pending = Some(done_rx.clone());
        state.token = Some(token.to_string());

        debug!("Opening telemetry socket {}", self.settings.ws_url);
        tokio::spawn(Arc::clone(self).establish(state.generation, token.to_string(), done_tx));

        done_rx
    }

    async fn establish(self: Arc<Self>, generation: u64, token: String, done: watch::Sender<Outcome>) {
        let outcome = match self.connector.open(&self.settings.ws_url).await {
            Ok(channels) => self.on_open(generation, &token, channels),
            Err(e) => self.on_open_failed(generation, &token, &e),
        };
        done.send_replace(outcome);
    }

    fn on_open(self: &Arc<Self>, generation: u64, token: &str, channels: SocketChannels) -> Outcome {
        let SocketChannels { outbound, inbound } = channels;

        let mut state = self.lock_state();
        if state.generation != generation {
            // Dropping the channels closes the late socket
            debug!("Discarding socket opened after disconnect");
            return Outcome::Discarded;
        }

        write_frame(&outbound, &auth_command(state.next_subscription_id, token));

        if self.settings.reconnect.resubscribe {
            for subscription in state.registry.subscriptions() {
                write_frame(&outbound, &subscription.command);
            }
            let restored = state.registry.subscription_count();
            if restored > 0 {
                info!("Restored {} telemetry subscriptions", restored);
            }
        }

        state.outbound = Some(outbound);
        state.link = LinkState::Open;
        state.authenticated = true;
        state.ever_opened = true;
        state.reconnect_attempts = 0;
        state.pending = None;
        state.reader_task = Some(tokio::spawn(Arc::clone(self).read_loop(generation, inbound)));

        info!("Telemetry socket connected to {}", self.settings.ws_url);
        Outcome::Open
    }

    fn on_open_failed(self: &Arc<Self>, generation: u64, token: &str, err: &TelemetryError) -> Outcome {
        let mut state = self.lock_state();
        if state.generation != generation {
            return Outcome::Discarded;
        }

        warn!("Telemetry socket error: {}", err);
        state.pending = None;
        state.authenticated = false;
        state.link = LinkState::Disconnected;
        self.schedule_reconnect(&mut state, token);

        Outcome::Failed(err.to_string())
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut inbound: mpsc::UnboundedReceiver<SocketEvent>) {
        while let Some(event) = inbound.recv().await {
            match event {
                SocketEvent::Text(text) => self.dispatch(generation, &text),
                SocketEvent::Error(e) => error!("Telemetry socket error: {}", e),
                SocketEvent::Closed => break,
            }
        }
        self.on_close(generation);
    }

    fn on_close(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock_state();
        if state.generation != generation {
            return;
        }

        info!("Telemetry socket disconnected");
        state.outbound = None;
        state.reader_task = None;
        state.authenticated = false;
        state.pending = None;
        state.link = LinkState::Disconnected;

        if let Some(token) = state.token.clone() {
            self.schedule_reconnect(&mut state, &token);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State, token: &str) {
        if !state.ever_opened {
            debug!("Socket never opened; not reconnecting");
            return;
        }

        let policy = &self.settings.reconnect;
        if state.reconnect_attempts >= policy.max_attempts {
            error!("Max reconnection attempts reached ({})", policy.max_attempts);
            state.link = LinkState::Disconnected;
            return;
        }

        state.reconnect_attempts += 1;
        let attempt = state.reconnect_attempts;
        state.link = LinkState::Reconnecting { attempt };
        info!(
            "Attempting to reconnect ({}/{}) in {}ms",
            attempt,
            policy.max_attempts,
            policy.delay.as_millis()
        );

        let connection = TelemetryConnection {
            shared: Arc::clone(self),
        };
        let delay = policy.delay;
        let token = token.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = connection.connect(&token).await {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
            }
        });
        if let Some(previous) = state.reconnect_task.replace(timer) {
            previous.abort();
        }
    }

    fn dispatch(&self, generation: u64, text: &str) {
        let frame = match decode_inbound(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Error parsing telemetry socket message: {}", e);
                return;
            }
        };

        match frame {
            InboundFrame::Telemetry { subscription_id, frame } => {
                let target = {
                    let state = self.lock_state();
                    if state.generation != generation {
                        return;
                    }
                    state
                        .registry
                        .subscription(subscription_id)
                        .map(|s| (s.device_id.clone(), Arc::clone(&s.handler)))
                };

                let Some((device_id, handler)) = target else {
                    debug!("Dropping frame for unknown subscription {}", subscription_id);
                    return;
                };

                let failure = frame.is_error().then(|| frame.error_msg.clone().unwrap_or_default());
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                    error!(
                        "Telemetry handler for device {} panicked: {}",
                        device_id,
                        panic_message(payload.as_ref())
                    );
                }

                if let Some(reason) = failure {
                    error!("Subscription error for device {}: {}", device_id, reason);
                }
            }
            InboundFrame::Typed { message_type, body } => {
                let handler = {
                    let state = self.lock_state();
                    if state.generation != generation {
                        return;
                    }
                    message_type
                        .as_deref()
                        .and_then(|t| state.registry.message_handler(t))
                };

                let Some(handler) = handler else {
                    debug!("Dropping message of type {:?}", message_type);
                    return;
                };

                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&body))) {
                    error!(
                        "Handler for message type {:?} panicked: {}",
                        message_type,
                        panic_message(payload.as_ref())
                    );
                }
            }
            InboundFrame::Unroutable(body) => {
                debug!("Dropping frame with unusable subscriptionId: {}", body);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn write_frame<T: Serialize + ?Sized>(outbound: &mpsc::UnboundedSender<String>, message: &T) {
    let text = match encode(message) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode outbound frame: {}", e);
            return;
        }
    };

    if outbound.send(text).is_err() {
        warn!("Telemetry socket closed; frame dropped");
    }
}
