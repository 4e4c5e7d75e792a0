//! Client-side stores for state that is safe to apply from push events.

pub mod history;

pub use history::HistoryStore;
