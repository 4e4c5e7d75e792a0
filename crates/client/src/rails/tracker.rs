//! Rail status tracking: reconciliation bound to the rail snapshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use railwatch_shared::{ApiError, ProviderStatus, RailRecord};
use tokio::sync::watch;

use super::aggregate::{aggregate, all_settled, needs_followup_action};
use crate::api_client::RailApi;
use crate::reconcile::{Reconcile, Reconciler, Refresh};
use crate::ws::{EventKind, Transport};

pub struct RailSource<A> {
    api: A,
}

#[async_trait]
impl<A: RailApi> Reconcile for RailSource<A> {
    type Snapshot = Vec<RailRecord>;

    fn hint_kinds(&self) -> Vec<EventKind> {
        vec![EventKind::RailStatusUpdate]
    }

    async fn fetch(&self) -> Result<Vec<RailRecord>, ApiError> {
        self.api.fetch_rails().await
    }

    fn is_settled(&self, rails: &Vec<RailRecord>) -> bool {
        all_settled(&aggregate(rails))
    }

    fn name(&self) -> &'static str {
        "rails"
    }
}

/// Keeps the rail snapshot current until every provider has settled.
pub struct RailStatusTracker<A: RailApi> {
    reconciler: Reconciler<RailSource<A>>,
}

impl<A: RailApi> Clone for RailStatusTracker<A> {
    fn clone(&self) -> Self {
        Self {
            reconciler: self.reconciler.clone(),
        }
    }
}

impl<A: RailApi> RailStatusTracker<A> {
    pub fn new(api: A, transport: Transport, poll_interval: Duration) -> Self {
        Self {
            reconciler: Reconciler::new(RailSource { api }, transport, poll_interval),
        }
    }

    pub fn start_tracking(&self) {
        self.reconciler.start_tracking();
    }

    pub fn stop_tracking(&self) {
        self.reconciler.stop_tracking();
    }

    pub async fn refresh(&self) -> Result<Refresh, ApiError> {
        self.reconciler.refresh().await
    }

    pub fn is_polling(&self) -> bool {
        self.reconciler.is_polling()
    }

    /// Last fetched rails; empty until the first fetch lands.
    pub fn rails(&self) -> Arc<Vec<RailRecord>> {
        self.reconciler.snapshot().unwrap_or_default()
    }

    pub fn providers(&self) -> Vec<ProviderStatus> {
        aggregate(&self.rails())
    }

    pub fn all_settled(&self) -> bool {
        all_settled(&self.providers())
    }

    pub fn needs_followup(&self, provider_code: &str) -> bool {
        needs_followup_action(&self.providers(), provider_code)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Vec<RailRecord>>>> {
        self.reconciler.subscribe()
    }
}
