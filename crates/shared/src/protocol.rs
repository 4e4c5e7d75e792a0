//! Wire protocol for the realtime status channel.
//!
//! Every frame is a JSON text frame shaped `{ "type": string, "data"?: object }`.

use serde::{Deserialize, Serialize};

/// Server → client heartbeat reply.
pub const KIND_PONG: &str = "pong";
/// Client → server heartbeat.
pub const KIND_PING: &str = "ping";
/// Identity verification status changed.
pub const KIND_KYC_STATUS_UPDATE: &str = "kyc_status_update";
/// A payment rail changed status.
pub const KIND_RAIL_STATUS_UPDATE: &str = "rail_status_update";
/// A new transaction history entry.
pub const KIND_HISTORY_ENTRY: &str = "history_entry";

/// Untyped inbound frame. The router decides what `data` means from `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WireMessage {
    pub fn new(kind: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Frames the client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}

/// Path of the per-session channel. Usernames are percent-encoded.
pub fn channel_path(session_key: &str) -> String {
    if session_key.is_empty() {
        "/ws/charges".to_string()
    } else {
        format!("/ws/charges/{}", urlencoding::encode(session_key))
    }
}
