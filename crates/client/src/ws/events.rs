//! Typed transport events and the per-kind listener registry.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use railwatch_shared::{
    HistoryEntry, KycStatusUpdate, RailStatusUpdate, KIND_HISTORY_ENTRY, KIND_KYC_STATUS_UPDATE,
    KIND_PONG, KIND_RAIL_STATUS_UPDATE,
};

/// Key of the dispatch table. One variant per event the transport can emit,
/// plus `Other` for message kinds this client does not know.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    Pong,
    MaxReconnectAttempts,
    KycStatusUpdate,
    RailStatusUpdate,
    HistoryEntry,
    Other(String),
}

impl EventKind {
    /// Map a wire `type` to its event kind.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            KIND_PONG => EventKind::Pong,
            KIND_KYC_STATUS_UPDATE => EventKind::KycStatusUpdate,
            KIND_RAIL_STATUS_UPDATE => EventKind::RailStatusUpdate,
            KIND_HISTORY_ENTRY => EventKind::HistoryEntry,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Error => "error",
            EventKind::Pong => KIND_PONG,
            EventKind::MaxReconnectAttempts => "max_reconnect_attempts",
            EventKind::KycStatusUpdate => KIND_KYC_STATUS_UPDATE,
            EventKind::RailStatusUpdate => KIND_RAIL_STATUS_UPDATE,
            EventKind::HistoryEntry => KIND_HISTORY_ENTRY,
            EventKind::Other(kind) => kind,
        }
    }
}

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect,
    Disconnect {
        code: Option<u16>,
        reason: String,
        clean: bool,
    },
    Error {
        message: String,
    },
    Pong,
    /// Reconnect cap reached. Nothing is retried until `connect()` is called again.
    MaxReconnectAttempts,
    KycStatusUpdate(KycStatusUpdate),
    RailStatusUpdate(RailStatusUpdate),
    HistoryEntry(HistoryEntry),
    Other {
        kind: String,
        data: Option<serde_json::Value>,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Connect => EventKind::Connect,
            TransportEvent::Disconnect { .. } => EventKind::Disconnect,
            TransportEvent::Error { .. } => EventKind::Error,
            TransportEvent::Pong => EventKind::Pong,
            TransportEvent::MaxReconnectAttempts => EventKind::MaxReconnectAttempts,
            TransportEvent::KycStatusUpdate(_) => EventKind::KycStatusUpdate,
            TransportEvent::RailStatusUpdate(_) => EventKind::RailStatusUpdate,
            TransportEvent::HistoryEntry(_) => EventKind::HistoryEntry,
            TransportEvent::Other { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// A registered callback. Identity is the allocation, so clone the `Arc`
/// you registered to deregister it later.
pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener(f: impl Fn(&TransportEvent) + Send + Sync + 'static) -> Listener {
    Arc::new(f)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl ListenerRegistry {
    /// Returns false if the listener was already registered for `kind`.
    pub fn on(&self, kind: EventKind, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        let entry = listeners.entry(kind).or_default();
        if entry.iter().any(|l| same_listener(l, listener)) {
            return false;
        }
        entry.push(listener.clone());
        true
    }

    pub fn off(&self, kind: &EventKind, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entry) = listeners.get_mut(kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| !same_listener(l, listener));
        let removed = entry.len() != before;
        if entry.is_empty() {
            listeners.remove(kind);
        }
        removed
    }

    pub fn count(&self, kind: &EventKind) -> usize {
        self.listeners.lock().get(kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener of its kind. The registry lock is
    /// released before any callback runs, so listeners may call `on`/`off`.
    pub fn emit(&self, event: &TransportEvent) {
        let kind = event.kind();
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for target in targets {
            if catch_unwind(AssertUnwindSafe(|| target(event))).is_err() {
                tracing::error!("Listener for '{}' panicked", kind.as_str());
            }
        }
    }
}
