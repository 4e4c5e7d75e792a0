//! Transaction history fed by `history_entry` pushes.
//!
//! History is append-only, so pushed entries are applied directly instead of
//! triggering a re-fetch. Entries are kept newest first.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use railwatch_shared::HistoryEntry;

use crate::ws::{listener, EventKind, Listener, Transport, TransportEvent};

#[derive(Default)]
struct HistoryState {
    entries: Vec<HistoryEntry>,
    /// Whether an authoritative list has been loaded.
    is_loaded: bool,
}

impl HistoryState {
    fn add_entry(&mut self, entry: HistoryEntry) -> bool {
        if self.entries.iter().any(|e| e.uuid == entry.uuid) {
            return false;
        }
        self.entries.insert(0, entry);
        true
    }
}

#[derive(Clone, Default)]
pub struct HistoryStore {
    state: Arc<Mutex<HistoryState>>,
    attached: Arc<Mutex<Option<(Transport, Listener)>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an entry. Returns false if an entry with the same uuid exists.
    pub fn add_entry(&self, entry: HistoryEntry) -> bool {
        self.state.lock().add_entry(entry)
    }

    /// Replace the list with an authoritative fetch, sorted newest first.
    pub fn set_history(&self, mut entries: Vec<HistoryEntry>) {
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let mut seen = HashSet::new();
        entries.retain(|e| seen.insert(e.uuid.clone()));

        let mut state = self.state.lock();
        state.entries = entries;
        state.is_loaded = true;
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().is_loaded
    }

    /// Listen for pushed entries on `transport`, replacing any previous attachment.
    pub fn attach(&self, transport: &Transport) {
        self.detach();

        let state = Arc::downgrade(&self.state);
        let on_entry = listener(move |event| {
            let TransportEvent::HistoryEntry(entry) = event else {
                return;
            };
            let Some(state) = state.upgrade() else {
                return;
            };
            if !state.lock().add_entry(entry.clone()) {
                tracing::debug!("Ignoring duplicate history entry {}", entry.uuid);
            }
        });
        transport.on(EventKind::HistoryEntry, &on_entry);
        *self.attached.lock() = Some((transport.clone(), on_entry));
    }

    pub fn detach(&self) {
        if let Some((transport, on_entry)) = self.attached.lock().take() {
            transport.off(&EventKind::HistoryEntry, &on_entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::idle_transport;
    use chrono::{TimeZone, Utc};

    fn entry(uuid: &str, minute: u32) -> HistoryEntry {
        HistoryEntry {
            uuid: uuid.to_string(),
            entry_type: "DEPOSIT".to_string(),
            status: "COMPLETED".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
            amount: Some("10.00".to_string()),
            extra: serde_json::Map::new(),
        }
    }

    fn uuids(store: &HistoryStore) -> Vec<String> {
        store.entries().into_iter().map(|e| e.uuid).collect()
    }

    #[test]
    fn pushed_entries_are_prepended_once() {
        let store = HistoryStore::new();
        assert!(store.add_entry(entry("a", 1)));
        assert!(store.add_entry(entry("b", 2)));
        assert!(!store.add_entry(entry("a", 1)));
        assert_eq!(uuids(&store), ["b", "a"]);
    }

    #[test]
    fn set_history_sorts_and_dedupes() {
        let store = HistoryStore::new();
        store.set_history(vec![entry("a", 1), entry("c", 3), entry("b", 2), entry("c", 3)]);
        assert_eq!(uuids(&store), ["c", "b", "a"]);
        assert!(store.is_loaded());
    }

    #[tokio::test]
    async fn attached_store_follows_the_transport() {
        let transport = idle_transport();
        let store = HistoryStore::new();
        store.attach(&transport);
        store.attach(&transport);
        assert_eq!(transport.listener_count(&EventKind::HistoryEntry), 1);

        transport.emit_for_test(&TransportEvent::HistoryEntry(entry("a", 1)));
        transport.emit_for_test(&TransportEvent::HistoryEntry(entry("a", 1)));
        assert_eq!(store.len(), 1);

        store.detach();
        transport.emit_for_test(&TransportEvent::HistoryEntry(entry("b", 2)));
        assert_eq!(uuids(&store), ["a"]);
        assert_eq!(transport.listener_count(&EventKind::HistoryEntry), 0);
    }
}
