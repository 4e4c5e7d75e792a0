//! Inbound frame parsing and classification.

use railwatch_shared::{
    HistoryEntry, KycStatusUpdate, RailStatusUpdate, WireMessage, KIND_HISTORY_ENTRY,
    KIND_KYC_STATUS_UPDATE, KIND_PONG, KIND_RAIL_STATUS_UPDATE,
};
use serde::de::DeserializeOwned;

use super::events::TransportEvent;

/// Turn one text frame into an event.
///
/// Returns `None` when the frame is dropped. Drops are logged here and never
/// reach listeners as errors.
pub fn route_frame(text: &str) -> Option<TransportEvent> {
    let message = match serde_json::from_str::<WireMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Failed to parse message: {} ({})", e, text);
            return None;
        }
    };

    match message.kind.as_str() {
        KIND_PONG => Some(TransportEvent::Pong),
        KIND_KYC_STATUS_UPDATE => {
            typed_payload::<KycStatusUpdate>(&message).map(TransportEvent::KycStatusUpdate)
        }
        KIND_RAIL_STATUS_UPDATE => {
            // The payload is only a hint, so an empty one is still useful.
            if message.data.is_none() {
                return Some(TransportEvent::RailStatusUpdate(RailStatusUpdate::default()));
            }
            typed_payload::<RailStatusUpdate>(&message).map(TransportEvent::RailStatusUpdate)
        }
        KIND_HISTORY_ENTRY => {
            typed_payload::<HistoryEntry>(&message).map(TransportEvent::HistoryEntry)
        }
        _ => Some(TransportEvent::Other {
            kind: message.kind,
            data: message.data,
        }),
    }
}

fn typed_payload<T: DeserializeOwned>(message: &WireMessage) -> Option<T> {
    let Some(data) = message.data.clone() else {
        tracing::warn!("Dropping '{}' frame without data", message.kind);
        return None;
    };
    match serde_json::from_value(data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!("Dropping '{}' frame with invalid payload: {}", message.kind, e);
            None
        }
    }
}
