//! WebSocket transport with heartbeat and auto-reconnect.
//!
//! One [`Transport`] serves one session channel. It owns the socket, the
//! heartbeat timer and the reconnect timer, and fans parsed frames out to the
//! listeners registered with [`Transport::on`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use railwatch_shared::ClientFrame;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::connector::{Connector, Frame, Socket, TransportError};
use super::events::{EventKind, Listener, ListenerRegistry, TransportEvent};
use super::router::route_frame;

/// Close code sent when the client hangs up on purpose.
const NORMAL_CLOSURE: u16 = 1000;

/// Connection state of a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    /// Waiting for the backoff timer of reconnect attempt `attempt` (0-indexed).
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Number of reconnect attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number: `base_delay * 2^attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
}

struct CloseInfo {
    code: Option<u16>,
    reason: String,
    clean: bool,
}

struct Shared {
    state: ConnectionState,
    /// Bumped for every new socket and on disconnect. Tasks carry the value
    /// they were started with and go quiet once it is stale.
    generation: u64,
    attempts: u32,
    outbound: Option<UnboundedSender<Frame>>,
    socket_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Shared {
    fn stop_timers(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

struct Inner {
    session_key: String,
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    listeners: ListenerRegistry,
    shared: Mutex<Shared>,
}

/// Handle to a session transport. Clones share the same socket.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("session_key", &self.inner.session_key)
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Transport {
    pub fn new(
        session_key: impl Into<String>,
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_key: session_key.into(),
                config,
                connector,
                listeners: ListenerRegistry::default(),
                shared: Mutex::new(Shared {
                    state: ConnectionState::Idle,
                    generation: 0,
                    attempts: 0,
                    outbound: None,
                    socket_task: None,
                    heartbeat_task: None,
                    reconnect_task: None,
                }),
            }),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.inner.session_key
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Open the socket. Does nothing while a socket is open or being opened.
    ///
    /// Failures never surface here; they turn into `Error`/`Disconnect`
    /// events and a scheduled reconnect.
    pub fn connect(&self) {
        let mut shared = self.inner.shared.lock();
        if matches!(shared.state, ConnectionState::Open | ConnectionState::Connecting) {
            tracing::debug!(
                "connect() ignored for '{}': already {:?}",
                self.inner.session_key,
                shared.state
            );
            return;
        }
        if let Some(task) = shared.reconnect_task.take() {
            task.abort();
        }
        self.inner.open_socket(&mut shared);
    }

    /// Tear down the socket and all timers. Listener registrations are kept.
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        shared.generation += 1;
        shared.stop_timers();
        shared.attempts = 0;

        if shared.state == ConnectionState::Open {
            // Dropping the sender below makes the socket task send a close frame.
            shared.socket_task = None;
        } else if let Some(task) = shared.socket_task.take() {
            task.abort();
        }
        shared.outbound = None;

        if shared.state != ConnectionState::Idle {
            shared.state = ConnectionState::Closed;
        }
        tracing::info!("WebSocket for '{}' disconnected", self.inner.session_key);
    }

    pub fn on(&self, kind: EventKind, listener: &Listener) {
        self.inner.listeners.on(kind, listener);
    }

    pub fn off(&self, kind: &EventKind, listener: &Listener) {
        self.inner.listeners.off(kind, listener);
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.inner.listeners.count(kind)
    }

    /// Queue a frame for the server.
    pub fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(frame).map_err(|e| TransportError::Socket(e.to_string()))?;
        let shared = self.inner.shared.lock();
        match (&shared.state, &shared.outbound) {
            (ConnectionState::Open, Some(sender)) => sender
                .unbounded_send(Frame::Text(json))
                .map_err(|e| TransportError::Socket(format!("Failed to send: {}", e))),
            _ => Err(TransportError::NotOpen),
        }
    }

    #[cfg(test)]
    pub(crate) fn emit_for_test(&self, event: &TransportEvent) {
        self.inner.listeners.emit(event);
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }

    fn open_socket(self: &Arc<Self>, shared: &mut Shared) {
        shared.generation += 1;
        shared.state = ConnectionState::Connecting;
        let generation = shared.generation;
        let weak = Arc::downgrade(self);
        shared.socket_task = Some(tokio::spawn(run_socket(weak, generation)));
    }

    fn handle_open(self: &Arc<Self>, generation: u64) -> Option<UnboundedReceiver<Frame>> {
        let receiver = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return None;
            }
            shared.state = ConnectionState::Open;
            shared.attempts = 0;

            let (sender, receiver) = unbounded();
            shared.outbound = Some(sender);

            if let Some(task) = shared.heartbeat_task.take() {
                task.abort();
            }
            let weak = Arc::downgrade(self);
            let period = self.config.heartbeat_interval;
            shared.heartbeat_task = Some(tokio::spawn(run_heartbeat(weak, generation, period)));
            receiver
        };

        tracing::info!("WebSocket connected to {}", self.config.url);
        self.listeners.emit(&TransportEvent::Connect);
        Some(receiver)
    }

    fn handle_connect_failure(self: &Arc<Self>, generation: u64, error: TransportError) {
        if !self.is_current(generation) {
            return;
        }
        tracing::error!("WebSocket error for '{}': {}", self.session_key, error);
        self.listeners.emit(&TransportEvent::Error {
            message: error.to_string(),
        });
        self.handle_close(
            generation,
            CloseInfo {
                code: None,
                reason: error.to_string(),
                clean: false,
            },
        );
    }

    fn handle_close(self: &Arc<Self>, generation: u64, close: CloseInfo) {
        let exhausted = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.state = ConnectionState::Closed;
            shared.outbound = None;
            shared.socket_task = None;
            if let Some(task) = shared.heartbeat_task.take() {
                task.abort();
            }

            if close.clean {
                false
            } else {
                self.schedule_reconnect(&mut shared)
            }
        };

        tracing::info!(
            "WebSocket to {} closed (clean: {}, reason: '{}')",
            self.config.url,
            close.clean,
            close.reason
        );
        self.listeners.emit(&TransportEvent::Disconnect {
            code: close.code,
            reason: close.reason,
            clean: close.clean,
        });
        if exhausted {
            self.listeners.emit(&TransportEvent::MaxReconnectAttempts);
        }
    }

    /// Returns true when the attempt cap has been reached instead.
    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) -> bool {
        let max_attempts = self.config.reconnect.max_attempts;
        if shared.attempts >= max_attempts {
            tracing::warn!(
                "Max reconnect attempts ({}) exceeded for '{}'",
                max_attempts,
                self.session_key
            );
            return true;
        }

        if let Some(task) = shared.reconnect_task.take() {
            task.abort();
        }

        let attempt = shared.attempts;
        let delay = self.config.reconnect.delay_for_attempt(attempt);
        let generation = shared.generation;
        shared.state = ConnectionState::Reconnecting { attempt };
        tracing::info!(
            "Reconnecting to {} in {}ms (attempt {})",
            self.config.url,
            delay.as_millis(),
            attempt + 1
        );

        let weak = Arc::downgrade(self);
        shared.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut shared = inner.shared.lock();
            if shared.generation != generation {
                return;
            }
            // This task is the one stored in `reconnect_task`.
            shared.reconnect_task = None;
            shared.attempts += 1;
            inner.open_socket(&mut shared);
        }));
        false
    }

    fn send_ping(&self, generation: u64) {
        let shared = self.shared.lock();
        if shared.generation != generation || shared.state != ConnectionState::Open {
            return;
        }
        let Some(sender) = shared.outbound.as_ref() else {
            return;
        };
        match serde_json::to_string(&ClientFrame::Ping) {
            Ok(json) => {
                if let Err(e) = sender.unbounded_send(Frame::Text(json)) {
                    tracing::warn!("Failed to queue ping: {}", e);
                }
            }
            Err(e) => tracing::error!("Serialize failed: {}", e),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        shared.stop_timers();
        if let Some(task) = shared.socket_task.take() {
            task.abort();
        }
    }
}

async fn run_heartbeat(weak: Weak<Inner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.send_ping(generation);
    }
}

async fn run_socket(weak: Weak<Inner>, generation: u64) {
    let (url, connector) = match weak.upgrade() {
        Some(inner) => (inner.config.url.clone(), inner.connector.clone()),
        None => return,
    };

    tracing::debug!("Opening WebSocket to {}", url);
    let result = connector.connect(&url).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    let Socket {
        mut sink,
        mut stream,
    } = match result {
        Ok(socket) => socket,
        Err(e) => {
            inner.handle_connect_failure(generation, e);
            return;
        }
    };
    let Some(mut outbound) = inner.handle_open(generation) else {
        // Disconnected (or superseded) while the handshake was in flight.
        return;
    };
    drop(inner);

    let close = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    tracing::debug!("WebSocket received: {}", text);
                    let Some(inner) = weak.upgrade() else {
                        break None;
                    };
                    if !inner.is_current(generation) {
                        break None;
                    }
                    if let Some(event) = route_frame(&text) {
                        inner.listeners.emit(&event);
                    }
                }
                Some(Ok(Frame::Close { code, reason })) => {
                    break Some(CloseInfo { code: Some(code), reason, clean: true });
                }
                Some(Err(e)) => {
                    tracing::error!("WebSocket read error: {}", e);
                    break Some(CloseInfo { code: None, reason: e.to_string(), clean: false });
                }
                None => {
                    break Some(CloseInfo {
                        code: None,
                        reason: "connection lost".to_string(),
                        clean: false,
                    });
                }
            },
            queued = outbound.next() => match queued {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::error!("Send failed: {}", e);
                        break Some(CloseInfo { code: None, reason: e.to_string(), clean: false });
                    }
                }
                None => {
                    // Sender dropped by disconnect()
                    let _ = sink
                        .send(Frame::Close { code: NORMAL_CLOSURE, reason: String::new() })
                        .await;
                    let _ = sink.close().await;
                    break None;
                }
            },
        }
    };

    if let Some(close) = close {
        if let Some(inner) = weak.upgrade() {
            inner.handle_close(generation, close);
        }
    }
}
