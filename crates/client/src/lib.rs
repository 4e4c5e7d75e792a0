//! Railwatch client - realtime verification and rail-status sync
//!
//! This crate keeps a session's view of payment-rail activation and identity
//! verification in step with the backend, using a push channel for hints and
//! authoritative REST fetches for state.

pub mod api_client;
pub mod config;
pub mod kyc;
pub mod logging;
pub mod onboarding;
pub mod rails;
pub mod reconcile;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, KycApi, RailApi, TosApi};
pub use config::{ConfigError, SyncConfig};
pub use kyc::{KycCallbacks, KycFlow, KycPhase, KycStart, WidgetSignal};
pub use onboarding::{OnboardingCallbacks, OnboardingFlow, OnboardingPhase};
pub use rails::RailStatusTracker;
pub use reconcile::{Reconcile, Reconciler, Refresh};
pub use stores::HistoryStore;
pub use ws::{ConnectionManager, EventKind, Transport, TransportEvent};
