//! In-memory connector used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{future, sink, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::connector::{Connector, Frame, Socket, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    /// Never completes the handshake.
    Hang,
}

/// Server side of one accepted mock socket.
#[derive(Clone)]
pub(crate) struct MockServer {
    to_client: UnboundedSender<Result<Frame, TransportError>>,
    from_client: Arc<Mutex<Vec<Frame>>>,
}

impl MockServer {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(Frame::Text(text.to_string())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.unbounded_send(Ok(Frame::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Simulate an abnormal drop (no close frame).
    pub fn drop_connection(&self) {
        let _ = self
            .to_client
            .unbounded_send(Err(TransportError::Socket("connection reset".into())));
    }

    pub fn received(&self) -> Vec<Frame> {
        self.from_client.lock().clone()
    }
}

#[derive(Default)]
struct MockState {
    queued: VecDeque<Outcome>,
    servers: Vec<MockServer>,
    urls: Vec<String>,
    times: Vec<Instant>,
}

pub(crate) struct MockConnector {
    default: Outcome,
    attempts: AtomicUsize,
    state: Mutex<MockState>,
}

impl MockConnector {
    pub fn with_default(default: Outcome) -> Arc<Self> {
        Arc::new(Self {
            default,
            attempts: AtomicUsize::new(0),
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::with_default(Outcome::Accept)
    }

    /// Outcomes used, in order, before falling back to the default.
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.state.lock().queued.extend(outcomes);
    }

    /// Number of socket constructions so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The `index`-th accepted socket.
    pub fn server(&self, index: usize) -> MockServer {
        self.state.lock().servers[index].clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().urls.clone()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().times.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut state = self.state.lock();
            state.urls.push(url.to_string());
            state.times.push(Instant::now());
            state.queued.pop_front().unwrap_or(self.default)
        };

        match outcome {
            Outcome::Refuse => Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".into(),
            }),
            Outcome::Hang => future::pending().await,
            Outcome::Accept => {
                let (to_client, incoming) = unbounded();
                let from_client = Arc::new(Mutex::new(Vec::new()));
                self.state.lock().servers.push(MockServer {
                    to_client,
                    from_client: from_client.clone(),
                });

                let sink = sink::unfold(from_client, |received, frame: Frame| async move {
                    received.lock().push(frame);
                    Ok::<_, TransportError>(received)
                });

                Ok(Socket {
                    sink: Box::pin(sink),
                    stream: incoming.boxed(),
                })
            }
        }
    }
}
