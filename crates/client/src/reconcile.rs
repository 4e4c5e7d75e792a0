//! Reconciliation of client state against the authoritative store.
//!
//! A [`Reconciler`] keeps one snapshot eventually consistent. Two triggers
//! lead to the same fetch-and-replace: a poll timer, and push events of the
//! source's hint kinds. Push payloads are never applied; they only mean
//! "fetch now". Polling stops once the snapshot is settled, while the push
//! subscription stays until [`Reconciler::stop_tracking`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use railwatch_shared::ApiError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::ws::{listener, EventKind, Listener, Transport};

/// An authoritative source of one snapshot type.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    type Snapshot: Send + Sync + 'static;

    /// Push kinds that should trigger a re-fetch.
    fn hint_kinds(&self) -> Vec<EventKind>;

    /// Fetch the full current state. Must be idempotent.
    async fn fetch(&self) -> Result<Self::Snapshot, ApiError>;

    /// Whether polling can stop for this snapshot.
    fn is_settled(&self, snapshot: &Self::Snapshot) -> bool;

    /// Runs once for every applied snapshot, in the order they were applied.
    /// No reconciler lock is held, so it may start or stop tracking.
    fn on_applied(&self, _snapshot: &Self::Snapshot) {}

    fn name(&self) -> &'static str {
        "reconciler"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Applied { settled: bool },
    /// Tracking stopped, or a newer fetch already landed.
    Discarded,
}

struct TrackingState {
    /// Bumped by `stop_tracking`; fetches started under an older epoch are dropped.
    epoch: u64,
    issued: u64,
    applied: u64,
    /// Ticket count when the current poll loop started. Only fetches issued
    /// after it may end that loop.
    poll_started: u64,
    poll_task: Option<JoinHandle<()>>,
    hint: Option<Listener>,
}

struct Inner<R: Reconcile> {
    source: R,
    transport: Transport,
    poll_interval: Duration,
    snapshot: watch::Sender<Option<Arc<R::Snapshot>>>,
    state: Mutex<TrackingState>,
    /// Serializes apply plus `on_applied` so hooks see ticket order.
    apply_order: Mutex<()>,
}

pub struct Reconciler<R: Reconcile> {
    inner: Arc<Inner<R>>,
}

impl<R: Reconcile> Clone for Reconciler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Reconcile> Reconciler<R> {
    pub fn new(source: R, transport: Transport, poll_interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                source,
                transport,
                poll_interval,
                snapshot,
                state: Mutex::new(TrackingState {
                    epoch: 0,
                    issued: 0,
                    applied: 0,
                    poll_started: 0,
                    poll_task: None,
                    hint: None,
                }),
                apply_order: Mutex::new(()),
            }),
        }
    }

    pub fn source(&self) -> &R {
        &self.inner.source
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// Latest applied snapshot, if any fetch has succeeded yet.
    pub fn snapshot(&self) -> Option<Arc<R::Snapshot>> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<R::Snapshot>>> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.state.lock().hint.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.state.lock().poll_task.is_some()
    }

    /// Start (or restart) the poll loop and subscribe to push hints.
    pub fn start_tracking(&self) {
        let mut state = self.inner.state.lock();

        if state.hint.is_none() {
            let hint = self.inner.hint_listener();
            for kind in self.inner.source.hint_kinds() {
                self.inner.transport.on(kind, &hint);
            }
            state.hint = Some(hint);
        }

        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        state.poll_started = state.issued;
        let weak = Arc::downgrade(&self.inner);
        state.poll_task = Some(tokio::spawn(run_poll(weak, self.inner.poll_interval)));
        tracing::debug!(
            "{}: tracking started (poll every {}ms)",
            self.inner.source.name(),
            self.inner.poll_interval.as_millis()
        );
    }

    /// Stop polling, unsubscribe, and drop any fetch still in flight.
    pub fn stop_tracking(&self) {
        let hint = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            if let Some(task) = state.poll_task.take() {
                task.abort();
            }
            state.hint.take()
        };
        if let Some(hint) = hint {
            for kind in self.inner.source.hint_kinds() {
                self.inner.transport.off(&kind, &hint);
            }
            tracing::debug!("{}: tracking stopped", self.inner.source.name());
        }
    }

    /// One authoritative fetch-and-replace.
    pub async fn refresh(&self) -> Result<Refresh, ApiError> {
        self.inner.refresh().await
    }
}

impl<R: Reconcile> Inner<R> {
    fn hint_listener(self: &Arc<Self>) -> Listener {
        let weak: Weak<Self> = Arc::downgrade(self);
        listener(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!("{}: push hint outside of a runtime", inner.source.name());
                return;
            };
            tracing::debug!(
                "{}: '{}' received, fetching authoritative state",
                inner.source.name(),
                event.kind().as_str()
            );
            runtime.spawn(async move {
                if let Err(e) = inner.refresh().await {
                    tracing::warn!("{}: refresh after push failed: {}", inner.source.name(), e);
                }
            });
        })
    }

    async fn refresh(&self) -> Result<Refresh, ApiError> {
        let (epoch, ticket) = {
            let mut state = self.state.lock();
            state.issued += 1;
            (state.epoch, state.issued)
        };

        let snapshot = Arc::new(self.source.fetch().await?);
        let settled = self.source.is_settled(&snapshot);

        let _order = self.apply_order.lock();
        {
            let mut state = self.state.lock();
            if state.epoch != epoch || ticket < state.applied {
                tracing::debug!("{}: discarding stale fetch #{}", self.source.name(), ticket);
                return Ok(Refresh::Discarded);
            }
            state.applied = ticket;
            self.snapshot.send_replace(Some(snapshot.clone()));

            // a fetch issued before a restart says nothing about the new loop
            if settled && ticket > state.poll_started {
                if let Some(task) = state.poll_task.take() {
                    tracing::debug!("{}: settled, polling stopped", self.source.name());
                    task.abort();
                }
            }
        }
        self.source.on_applied(&snapshot);
        Ok(Refresh::Applied { settled })
    }
}

impl<R: Reconcile> Drop for Inner<R> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        if let Some(hint) = state.hint.take() {
            for kind in self.source.hint_kinds() {
                self.transport.off(&kind, &hint);
            }
        }
    }
}

async fn run_poll<R: Reconcile>(weak: Weak<Inner<R>>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        // Transient failures are retried on the next tick.
        if let Err(e) = inner.refresh().await {
            tracing::warn!("{}: poll fetch failed: {}", inner.source.name(), e);
        }
    }
}
