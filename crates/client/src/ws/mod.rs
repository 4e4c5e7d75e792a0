//! WebSocket module for the realtime status channel.
//!
//! This module provides:
//! - A per-session [`Transport`] with heartbeat and auto-reconnect
//! - Typed event dispatch with a pass-through for unknown message kinds
//! - A [`ConnectionManager`] that owns transports by session key
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │         (one transport per session key)             │
//! └─────────────────────────────────────────────────────┘
//!                         │
//!                         ▼
//!                 ┌──────────────┐      ┌───────────┐
//!                 │  Transport   │◀─────│ Connector │
//!                 │ (heartbeat,  │      └───────────┘
//!                 │  reconnect)  │
//!                 └──────────────┘
//!                         │ route_frame
//!                         ▼
//!              ┌─────────────────────┐
//!              │  ListenerRegistry   │
//!              │ (EventKind → [fn])  │
//!              └─────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ Reconciler │ │ KycFlow    │ │ History    │
//!   │ (rails)    │ │            │ │ store      │
//!   └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! Push events are hints: consumers that hold derived state re-fetch it
//! rather than trusting the payload, except for append-only history.

mod connection;
mod connector;
mod events;
mod manager;
mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionState, ReconnectConfig, Transport, TransportConfig};
pub use connector::{
    Connector, Frame, FrameSink, FrameStream, Socket, TransportError, TungsteniteConnector,
};
pub use events::{listener, EventKind, Listener, TransportEvent};
pub use manager::{normalize_session_key, ConnectionManager};
pub use router::route_frame;
