//! Multi-phase onboarding: identity verification followed by rail activation.
//!
//! `Verifying -> Preparing -> BridgeTos -> Complete`. The terms phase only
//! appears when bank transfers need the provider's terms accepted. KYC
//! approval triggers one rail fetch to pick the next phase; after that the
//! rail tracker drives the remaining transitions.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use railwatch_shared::{ProviderStatus, RailRecord, RailStatus, RegionIntent};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::{KycApi, RailApi, TosApi};
use crate::kyc::{KycCallbacks, KycError, KycFlow, KycStart, WidgetSignal};
use crate::rails::{aggregate, all_settled, needs_followup_action, RailStatusTracker};
use crate::ws::Transport;

/// Provider whose rails wait on terms acceptance.
pub const BRIDGE: &str = "BRIDGE";
pub const PREPARING_TIMEOUT: Duration = Duration::from_secs(30);
pub const TOS_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const TOS_RAIL_CHECKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OnboardingPhase {
    #[default]
    Verifying,
    /// Identity verified, rails still being set up.
    Preparing,
    BridgeTos,
    Complete,
}

/// How the hosted terms page was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TosClose {
    Manual,
    Completed,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OnboardingError {
    #[error("Could not load terms. You can accept them later from your activity feed.")]
    TosUnavailable,
    #[error("{0}")]
    TosLink(String),
}

/// UI hooks for the onboarding flow.
pub trait OnboardingCallbacks: Send + Sync + 'static {
    /// The flow is finished and the user can move on.
    fn on_complete(&self);

    fn on_phase_changed(&self, _phase: OnboardingPhase) {}

    /// Rails have been preparing for [`PREPARING_TIMEOUT`]. Fires once per attempt.
    fn on_preparing_timeout(&self) {}

    fn on_rejected(&self, _reject_labels: &[String]) {}

    fn on_manual_close(&self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardingState {
    pub phase: OnboardingPhase,
    /// The user submitted during this session rather than arriving approved.
    pub realtime: bool,
    pub preparing_timed_out: bool,
    pub tos_link: Option<String>,
    pub tos_error: Option<OnboardingError>,
}

/// Next step once verification is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    AcceptTerms,
    AwaitRails,
    Finish,
}

pub fn approval_outcome(rails: &[RailRecord], realtime: bool) -> ApprovalOutcome {
    if needs_followup_action(&aggregate(rails), BRIDGE) {
        return ApprovalOutcome::AcceptTerms;
    }
    let any_pending = rails.iter().any(|r| r.status == RailStatus::Pending);
    // a fresh submission may reach us before the backend has created any rails
    if any_pending || (rails.is_empty() && realtime) {
        ApprovalOutcome::AwaitRails
    } else {
        ApprovalOutcome::Finish
    }
}

/// Phase implied by the latest providers, or `None` if it does not change.
pub fn phase_after_rails(
    phase: OnboardingPhase,
    providers: &[ProviderStatus],
) -> Option<OnboardingPhase> {
    let needs_terms = needs_followup_action(providers, BRIDGE);
    match phase {
        OnboardingPhase::Preparing if needs_terms => Some(OnboardingPhase::BridgeTos),
        OnboardingPhase::Preparing | OnboardingPhase::BridgeTos
            if all_settled(providers) && !needs_terms =>
        {
            Some(OnboardingPhase::Complete)
        }
        _ => None,
    }
}

/// Confirm terms acceptance, retrying once, then re-check the rails until
/// bank transfers stop asking for the terms. Gives up after
/// [`TOS_RAIL_CHECKS`] fetches.
pub async fn confirm_tos_and_await_rails<T: TosApi, R: RailApi>(
    tos: &T,
    rails: &RailStatusTracker<R>,
) {
    let accepted = match tos.confirm_tos().await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!("Terms confirmation failed: {}", e.user_message());
            false
        }
    };
    if !accepted {
        tokio::time::sleep(TOS_RETRY_DELAY).await;
        match tos.confirm_tos().await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Terms still not registered after retry"),
            Err(e) => tracing::warn!("Terms confirmation retry failed: {}", e.user_message()),
        }
    }

    for check in 0..TOS_RAIL_CHECKS {
        if let Err(e) = rails.refresh().await {
            tracing::warn!("Rail check after terms failed: {}", e.user_message());
        }
        if !rails.needs_followup(BRIDGE) {
            return;
        }
        if check + 1 < TOS_RAIL_CHECKS {
            tokio::time::sleep(TOS_RETRY_DELAY).await;
        }
    }
    tracing::warn!(
        "Bank transfers still waiting on terms after {} checks",
        TOS_RAIL_CHECKS
    );
}

#[derive(Default)]
struct Tasks {
    approval: Option<JoinHandle<()>>,
    preparing_timer: Option<JoinHandle<()>>,
    rail_watch: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for task in [
            self.approval.take(),
            self.preparing_timer.take(),
            self.rail_watch.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

struct OnboardingInner<K: KycApi, R: RailApi, T: TosApi> {
    kyc: KycFlow<K>,
    rails: RailStatusTracker<R>,
    tos: T,
    callbacks: Arc<dyn OnboardingCallbacks>,
    state: Mutex<OnboardingState>,
    tasks: Mutex<Tasks>,
}

/// Routes KYC outcomes back into the onboarding flow.
struct Verification<K: KycApi, R: RailApi, T: TosApi> {
    flow: Weak<OnboardingInner<K, R, T>>,
}

impl<K: KycApi, R: RailApi, T: TosApi> KycCallbacks for Verification<K, R, T> {
    fn on_success(&self) {
        let Some(inner) = self.flow.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("KYC approved outside of a runtime, rails not checked");
            return;
        };
        let task = runtime.spawn(inner.clone().handle_approved());
        if let Some(previous) = inner.tasks.lock().approval.replace(task) {
            previous.abort();
        };
    }

    fn on_rejected(&self, reject_labels: &[String]) {
        if let Some(inner) = self.flow.upgrade() {
            inner.callbacks.on_rejected(reject_labels);
        }
    }

    fn on_manual_close(&self) {
        if let Some(inner) = self.flow.upgrade() {
            inner.callbacks.on_manual_close();
        }
    }
}

pub struct OnboardingFlow<K: KycApi, R: RailApi, T: TosApi> {
    inner: Arc<OnboardingInner<K, R, T>>,
}

impl<K: KycApi, R: RailApi, T: TosApi> Clone for OnboardingFlow<K, R, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: KycApi, R: RailApi, T: TosApi> OnboardingFlow<K, R, T> {
    /// Must be called inside a tokio runtime; the rail watcher is spawned here.
    pub fn new(
        kyc_api: K,
        rail_api: R,
        tos: T,
        transport: Transport,
        poll_interval: Duration,
        callbacks: Arc<dyn OnboardingCallbacks>,
    ) -> Self {
        let inner = Arc::new_cyclic(|flow: &Weak<OnboardingInner<K, R, T>>| {
            let verification = Arc::new(Verification { flow: flow.clone() });
            OnboardingInner {
                kyc: KycFlow::new(kyc_api, transport.clone(), poll_interval, verification),
                rails: RailStatusTracker::new(rail_api, transport, poll_interval),
                tos,
                callbacks,
                state: Mutex::new(OnboardingState::default()),
                tasks: Mutex::new(Tasks::default()),
            }
        });

        let rx = inner.rails.subscribe();
        let watcher = tokio::spawn(run_rail_watch(Arc::downgrade(&inner), rx));
        inner.tasks.lock().rail_watch = Some(watcher);
        Self { inner }
    }

    pub fn state(&self) -> OnboardingState {
        self.inner.state.lock().clone()
    }

    pub fn phase(&self) -> OnboardingPhase {
        self.inner.state.lock().phase
    }

    pub fn kyc(&self) -> &KycFlow<K> {
        &self.inner.kyc
    }

    pub fn rails(&self) -> &RailStatusTracker<R> {
        &self.inner.rails
    }

    /// Begin observing the verification status.
    pub fn start(&self) {
        self.inner.kyc.start();
    }

    /// Start a new attempt from `Verifying`.
    pub async fn initiate(&self, region: Option<RegionIntent>) -> Result<KycStart, KycError> {
        *self.inner.state.lock() = OnboardingState::default();
        self.inner.restart_preparing_timer(false);
        self.inner.kyc.initiate(region).await
    }

    pub async fn handle_widget_signal(&self, signal: WidgetSignal) -> Result<(), KycError> {
        if signal == WidgetSignal::Submitted {
            self.inner.state.lock().realtime = true;
        }
        self.inner.kyc.handle_widget_signal(signal).await
    }

    /// Fetch the hosted terms page for the `BridgeTos` phase.
    pub async fn accept_terms(&self) -> Result<String, OnboardingError> {
        self.inner.state.lock().tos_error = None;
        let result = match self.inner.tos.tos_link().await {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(OnboardingError::TosUnavailable),
            Err(e) => Err(OnboardingError::TosLink(e.user_message())),
        };

        let mut state = self.inner.state.lock();
        match &result {
            Ok(link) => state.tos_link = Some(link.clone()),
            Err(e) => {
                tracing::warn!("Terms link unavailable: {}", e);
                state.tos_error = Some(e.clone());
            }
        }
        result
    }

    /// The terms page closed. Anything but `Accepted` stays on `BridgeTos`.
    pub async fn tos_closed(&self, close: TosClose) {
        if close != TosClose::Accepted {
            tracing::debug!("Terms page closed ({:?}), waiting for the user", close);
            return;
        }
        self.inner.enter(OnboardingPhase::Preparing);
        confirm_tos_and_await_rails(&self.inner.tos, &self.inner.rails).await;
        self.inner.complete();
    }

    /// Leave the terms for later; they stay in the activity feed.
    pub fn skip_terms(&self) {
        self.inner.complete();
    }

    pub fn complete(&self) {
        self.inner.complete();
    }

    /// The user dismissed the progress view. The phase is kept.
    pub fn close(&self) {
        self.inner.state.lock().realtime = false;
        self.inner.restart_preparing_timer(false);
        self.inner.rails.stop_tracking();
    }

    pub fn shutdown(&self) {
        self.inner.tasks.lock().abort_all();
        self.inner.rails.stop_tracking();
        self.inner.kyc.shutdown();
    }
}

impl<K: KycApi, R: RailApi, T: TosApi> OnboardingInner<K, R, T> {
    async fn handle_approved(self: Arc<Self>) {
        let realtime = self.state.lock().realtime;
        if realtime {
            self.enter(OnboardingPhase::Preparing);
        }

        let outcome = match self.rails.refresh().await {
            Ok(_) => approval_outcome(&self.rails.rails(), realtime),
            Err(e) => {
                tracing::warn!("Rail fetch after approval failed: {}", e.user_message());
                ApprovalOutcome::AwaitRails
            }
        };
        tracing::debug!("KYC approved, next step {:?}", outcome);

        match outcome {
            ApprovalOutcome::AcceptTerms => {
                self.enter(OnboardingPhase::BridgeTos);
                self.rails.start_tracking();
            }
            ApprovalOutcome::AwaitRails => {
                self.enter(OnboardingPhase::Preparing);
                self.rails.start_tracking();
            }
            ApprovalOutcome::Finish => self.complete(),
        }
    }

    fn rails_changed(self: &Arc<Self>, rails: &[RailRecord]) {
        let phase = self.state.lock().phase;
        if let Some(next) = phase_after_rails(phase, &aggregate(rails)) {
            self.enter(next);
        }
    }

    fn enter(self: &Arc<Self>, phase: OnboardingPhase) {
        let start_timer = {
            let mut state = self.state.lock();
            if state.phase == phase {
                return;
            }
            state.phase = phase;
            phase == OnboardingPhase::Preparing && !state.preparing_timed_out
        };
        self.restart_preparing_timer(start_timer);
        if phase == OnboardingPhase::Complete {
            self.rails.stop_tracking();
        }
        tracing::info!("Onboarding phase {:?}", phase);
        self.callbacks.on_phase_changed(phase);
    }

    fn restart_preparing_timer(self: &Arc<Self>, start: bool) {
        let mut tasks = self.tasks.lock();
        if let Some(timer) = tasks.preparing_timer.take() {
            timer.abort();
        }
        if start {
            let weak = Arc::downgrade(self);
            tasks.preparing_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(PREPARING_TIMEOUT).await;
                if let Some(inner) = weak.upgrade() {
                    inner.preparing_timed_out();
                }
            }));
        }
    }

    fn preparing_timed_out(&self) {
        {
            let mut state = self.state.lock();
            if state.phase != OnboardingPhase::Preparing || state.preparing_timed_out {
                return;
            }
            state.preparing_timed_out = true;
        }
        tracing::warn!("Rails still preparing after {}s", PREPARING_TIMEOUT.as_secs());
        self.callbacks.on_preparing_timeout();
    }

    fn complete(self: &Arc<Self>) {
        *self.state.lock() = OnboardingState::default();
        self.restart_preparing_timer(false);
        self.rails.stop_tracking();
        tracing::info!("Onboarding complete");
        self.callbacks.on_complete();
    }
}

impl<K: KycApi, R: RailApi, T: TosApi> Drop for OnboardingInner<K, R, T> {
    fn drop(&mut self) {
        self.tasks.get_mut().abort_all();
    }
}

/// Phase changes only depend on the latest rails, so skipped snapshots are fine.
async fn run_rail_watch<K: KycApi, R: RailApi, T: TosApi>(
    weak: Weak<OnboardingInner<K, R, T>>,
    mut rx: watch::Receiver<Option<Arc<Vec<RailRecord>>>>,
) {
    while rx.changed().await.is_ok() {
        let Some(rails) = rx.borrow_and_update().clone() else {
            continue;
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.rails_changed(&rails);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::idle_transport;
    use crate::ws::TransportEvent;
    use async_trait::async_trait;
    use railwatch_shared::{
        ApiError, InitiateKycResponse, KycStatus, KycStatusSnapshot, RailStatusUpdate,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rail(id: &str, provider: &str, status: RailStatus) -> RailRecord {
        RailRecord::new(id, provider, "METHOD", status)
    }

    #[derive(Clone)]
    struct FakeKyc {
        status: Arc<Mutex<KycStatus>>,
    }

    impl FakeKyc {
        fn new() -> Self {
            Self {
                status: Arc::new(Mutex::new(KycStatus::NotStarted)),
            }
        }
    }

    #[async_trait]
    impl KycApi for FakeKyc {
        async fn initiate_kyc(
            &self,
            _region: Option<RegionIntent>,
        ) -> Result<InitiateKycResponse, ApiError> {
            Ok(InitiateKycResponse {
                token: Some("tok".into()),
                status: Some(KycStatus::NotStarted),
            })
        }

        async fn fetch_kyc_status(&self) -> Result<KycStatusSnapshot, ApiError> {
            Ok(KycStatusSnapshot {
                status: *self.status.lock(),
                reject_labels: Vec::new(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct FakeRails {
        rails: Arc<Mutex<Vec<RailRecord>>>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeRails {
        fn set(&self, rails: Vec<RailRecord>) {
            *self.rails.lock() = rails;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RailApi for FakeRails {
        async fn fetch_rails(&self) -> Result<Vec<RailRecord>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rails.lock().clone())
        }
    }

    #[derive(Clone, Default)]
    struct FakeTos {
        link: Arc<Mutex<Option<Result<Option<String>, ApiError>>>>,
        confirms: Arc<Mutex<VecDeque<bool>>>,
        confirm_calls: Arc<AtomicUsize>,
    }

    impl FakeTos {
        fn confirm_calls(&self) -> usize {
            self.confirm_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TosApi for FakeTos {
        async fn tos_link(&self) -> Result<Option<String>, ApiError> {
            self.link.lock().clone().unwrap_or(Ok(None))
        }

        async fn confirm_tos(&self) -> Result<bool, ApiError> {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.confirms.lock().pop_front().unwrap_or(true))
        }
    }

    #[derive(Default)]
    struct Recorder {
        complete: AtomicUsize,
        timeouts: AtomicUsize,
        phases: Mutex<Vec<OnboardingPhase>>,
    }

    impl OnboardingCallbacks for Recorder {
        fn on_complete(&self) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }

        fn on_phase_changed(&self, phase: OnboardingPhase) {
            self.phases.lock().push(phase);
        }

        fn on_preparing_timeout(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        flow: OnboardingFlow<FakeKyc, FakeRails, FakeTos>,
        kyc: FakeKyc,
        rails: FakeRails,
        tos: FakeTos,
        transport: Transport,
        recorder: Arc<Recorder>,
    }

    impl Harness {
        fn new(rails: Vec<RailRecord>) -> Self {
            let kyc = FakeKyc::new();
            let fake_rails = FakeRails::default();
            fake_rails.set(rails);
            let tos = FakeTos::default();
            let transport = idle_transport();
            let recorder = Arc::new(Recorder::default());
            let flow = OnboardingFlow::new(
                kyc.clone(),
                fake_rails.clone(),
                tos.clone(),
                transport.clone(),
                Duration::from_secs(4),
                recorder.clone(),
            );
            Self {
                flow,
                kyc,
                rails: fake_rails,
                tos,
                transport,
                recorder,
            }
        }

        /// Observe NotStarted, then Approved, as an already-verified user would.
        async fn approve(&self) {
            self.flow.kyc().reconciler().refresh().await.unwrap();
            *self.kyc.status.lock() = KycStatus::Approved;
            self.flow.kyc().reconciler().refresh().await.unwrap();
            settle().await;
        }

        /// Submit in this session, then let the review come back approved.
        async fn submit_and_approve(&self) {
            self.flow.initiate(None).await.unwrap();
            self.flow
                .handle_widget_signal(WidgetSignal::Submitted)
                .await
                .unwrap();
            *self.kyc.status.lock() = KycStatus::Approved;
            self.flow.kyc().reconciler().refresh().await.unwrap();
            settle().await;
        }

        fn completions(&self) -> usize {
            self.recorder.complete.load(Ordering::SeqCst)
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn approval_outcome_branches() {
        use ApprovalOutcome::*;
        let needs_terms = [
            rail("r1", BRIDGE, RailStatus::RequiresInformation),
            rail("r2", "MANTECA", RailStatus::Pending),
        ];
        assert_eq!(approval_outcome(&needs_terms, false), AcceptTerms);
        assert_eq!(
            approval_outcome(&[rail("r1", BRIDGE, RailStatus::Pending)], false),
            AwaitRails
        );
        assert_eq!(approval_outcome(&[], true), AwaitRails);
        assert_eq!(approval_outcome(&[], false), Finish);
        assert_eq!(
            approval_outcome(&[rail("r1", BRIDGE, RailStatus::Enabled)], true),
            Finish
        );
    }

    #[test]
    fn rail_driven_phase_edges() {
        use OnboardingPhase::*;
        let terms = aggregate(&[rail("r1", BRIDGE, RailStatus::RequiresInformation)]);
        let pending = aggregate(&[rail("r1", BRIDGE, RailStatus::Pending)]);
        let enabled = aggregate(&[rail("r1", BRIDGE, RailStatus::Enabled)]);

        assert_eq!(phase_after_rails(Preparing, &terms), Some(BridgeTos));
        assert_eq!(phase_after_rails(Preparing, &pending), None);
        assert_eq!(phase_after_rails(Preparing, &enabled), Some(Complete));
        assert_eq!(phase_after_rails(BridgeTos, &terms), None);
        assert_eq!(phase_after_rails(BridgeTos, &enabled), Some(Complete));
        assert_eq!(phase_after_rails(Verifying, &enabled), None);
        assert_eq!(phase_after_rails(Complete, &terms), None);
    }

    #[tokio::test(start_paused = true)]
    async fn approval_with_settled_rails_finishes_at_once() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::Enabled)]);
        h.approve().await;

        assert_eq!(h.completions(), 1);
        assert_eq!(h.flow.phase(), OnboardingPhase::Verifying);
        assert!(!h.flow.rails().is_polling());
        assert!(h.recorder.phases.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_rails_prepare_until_enabled() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::Pending)]);
        h.submit_and_approve().await;

        assert_eq!(h.flow.phase(), OnboardingPhase::Preparing);
        assert!(h.flow.rails().is_polling());
        assert_eq!(h.completions(), 0);

        h.rails.set(vec![rail("r1", BRIDGE, RailStatus::Enabled)]);
        tokio::time::sleep(Duration::from_millis(4001)).await;

        assert_eq!(h.flow.phase(), OnboardingPhase::Complete);
        assert!(!h.flow.rails().is_polling());
        assert_eq!(
            *h.recorder.phases.lock(),
            [OnboardingPhase::Preparing, OnboardingPhase::Complete]
        );

        h.flow.complete();
        assert_eq!(h.completions(), 1);
        assert_eq!(h.flow.phase(), OnboardingPhase::Verifying);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_rails_after_a_live_submission_wait_for_setup() {
        let h = Harness::new(Vec::new());
        h.submit_and_approve().await;

        assert_eq!(h.flow.phase(), OnboardingPhase::Preparing);
        assert_eq!(h.completions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn preparing_times_out_once_after_thirty_seconds() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::Pending)]);
        h.submit_and_approve().await;

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!h.flow.state().preparing_timed_out);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.flow.state().preparing_timed_out);
        assert_eq!(h.recorder.timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(h.flow.phase(), OnboardingPhase::Preparing);
        // rails keep polling after the timeout
        assert!(h.flow.rails().is_polling());

        h.flow.initiate(None).await.unwrap();
        assert_eq!(h.flow.state(), OnboardingState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_preparing_cancels_the_timeout() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::Pending)]);
        h.submit_and_approve().await;

        h.rails.set(vec![rail("r1", BRIDGE, RailStatus::RequiresInformation)]);
        tokio::time::sleep(Duration::from_millis(4001)).await;
        assert_eq!(h.flow.phase(), OnboardingPhase::BridgeTos);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(h.recorder.timeouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_terms_accepted_then_rails_enable() {
        let h = Harness::new(vec![
            rail("r1", BRIDGE, RailStatus::RequiresInformation),
            rail("r2", "MANTECA", RailStatus::Enabled),
        ]);
        *h.tos.link.lock() = Some(Ok(Some("https://tos.test/bridge".into())));
        h.tos.confirms.lock().push_back(false);
        h.approve().await;
        assert_eq!(h.flow.phase(), OnboardingPhase::BridgeTos);

        assert_eq!(
            h.flow.accept_terms().await.as_deref(),
            Ok("https://tos.test/bridge")
        );
        assert_eq!(
            h.flow.state().tos_link.as_deref(),
            Some("https://tos.test/bridge")
        );

        let flow = h.flow.clone();
        let accept = tokio::spawn(async move {
            flow.tos_closed(TosClose::Accepted).await;
        });
        settle().await;
        assert_eq!(h.flow.phase(), OnboardingPhase::Preparing);

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.rails.set(vec![
            rail("r1", BRIDGE, RailStatus::Enabled),
            rail("r2", "MANTECA", RailStatus::Enabled),
        ]);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(accept.is_finished());
        assert_eq!(h.tos.confirm_calls(), 2);
        assert_eq!(h.completions(), 1);
        assert_eq!(h.flow.phase(), OnboardingPhase::Verifying);
        let phases = h.recorder.phases.lock();
        assert_eq!(
            phases[..2],
            [OnboardingPhase::BridgeTos, OnboardingPhase::Preparing]
        );
        assert_eq!(phases.last(), Some(&OnboardingPhase::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn terms_confirmation_gives_up_after_three_checks() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::RequiresInformation)]);
        h.approve().await;
        // let the tracker's own poll settle and stop
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.flow.rails().is_polling());

        let before = h.rails.calls();
        let started = tokio::time::Instant::now();
        h.flow.tos_closed(TosClose::Accepted).await;

        assert_eq!(h.rails.calls() - before, TOS_RAIL_CHECKS);
        let elapsed = started.elapsed();
        assert!(elapsed >= TOS_RETRY_DELAY * 2 && elapsed < TOS_RETRY_DELAY * 3);
        assert_eq!(h.tos.confirm_calls(), 1);
        assert_eq!(h.completions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_terms_page_keeps_the_phase() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::RequiresInformation)]);
        h.approve().await;

        h.flow.tos_closed(TosClose::Manual).await;
        h.flow.tos_closed(TosClose::Completed).await;
        assert_eq!(h.flow.phase(), OnboardingPhase::BridgeTos);
        assert_eq!(h.tos.confirm_calls(), 0);

        h.flow.skip_terms();
        assert_eq!(h.completions(), 1);
        assert_eq!(h.flow.phase(), OnboardingPhase::Verifying);
    }

    #[tokio::test(start_paused = true)]
    async fn terms_phase_completes_when_a_push_shows_rails_enabled() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::RequiresInformation)]);
        h.approve().await;
        assert_eq!(h.flow.phase(), OnboardingPhase::BridgeTos);

        h.rails.set(vec![rail("r1", BRIDGE, RailStatus::Enabled)]);
        h.transport
            .emit_for_test(&TransportEvent::RailStatusUpdate(RailStatusUpdate::default()));
        settle().await;

        assert_eq!(h.flow.phase(), OnboardingPhase::Complete);
        assert_eq!(h.completions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terms_link_errors_are_kept_on_the_state() {
        let h = Harness::new(Vec::new());
        assert_eq!(
            h.flow.accept_terms().await,
            Err(OnboardingError::TosUnavailable)
        );
        assert_eq!(
            h.flow.state().tos_error,
            Some(OnboardingError::TosUnavailable)
        );

        *h.tos.link.lock() = Some(Err(ApiError::Http {
            status: 503,
            body: r#"{"title":"Unavailable","status":503,"detail":"terms service down"}"#.into(),
        }));
        assert_eq!(
            h.flow.accept_terms().await,
            Err(OnboardingError::TosLink("terms service down".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_rail_tracking() {
        let h = Harness::new(vec![rail("r1", BRIDGE, RailStatus::Pending)]);
        h.submit_and_approve().await;
        assert!(h.flow.rails().is_polling());

        h.flow.shutdown();
        let calls = h.rails.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.rails.calls(), calls);
        assert_eq!(h.recorder.timeouts.load(Ordering::SeqCst), 0);
    }
}
