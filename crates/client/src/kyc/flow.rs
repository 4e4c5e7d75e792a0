//! KYC session orchestration: token issuance, widget hand-off and outcome.
//!
//! The outcome is observed through a [`Reconciler`] over the authoritative
//! verification status. A `kyc_status_update` push only triggers a fetch, and
//! every applied fetch is run through the state machine before the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use railwatch_shared::{ApiError, KycStatus, KycStatusSnapshot, RegionIntent};

use super::machine::{KycError, KycSessionState, Transition};
use crate::api_client::KycApi;
use crate::reconcile::{Reconcile, Reconciler};
use crate::ws::{EventKind, Transport};

/// UI hooks. Each fires at most once per transition.
pub trait KycCallbacks: Send + Sync + 'static {
    fn on_success(&self);

    fn on_rejected(&self, _reject_labels: &[String]) {}

    fn on_manual_close(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetSignal {
    Submitted,
    ClosedByUser,
    TokenExpired,
}

/// The verification SDK, treated as a black box.
#[async_trait]
pub trait VerificationWidget: Send + Sync {
    /// Show the widget with `token` and wait for its next signal.
    async fn present(&self, token: &str) -> WidgetSignal;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KycStart {
    AlreadyApproved,
    Token(String),
}

/// Session state shared between the flow and its status source.
struct Session {
    state: Mutex<KycSessionState>,
    callbacks: Arc<dyn KycCallbacks>,
    /// Cleared by `shutdown`.
    live: AtomicBool,
}

impl Session {
    fn apply(&self, snapshot: &KycStatusSnapshot) {
        if !self.live.load(Ordering::SeqCst) {
            return;
        }
        let (transition, labels) = {
            let mut state = self.state.lock();
            let transition = state.observe(snapshot.status, &snapshot.reject_labels);
            (transition, state.reject_labels.clone())
        };
        match transition {
            Some(Transition::EnteredApproved) => {
                tracing::info!("KYC approved");
                self.callbacks.on_success();
            }
            Some(Transition::EnteredRejected) => {
                tracing::info!("KYC rejected: {:?}", labels);
                self.callbacks.on_rejected(&labels);
            }
            None => {}
        }
    }
}

pub struct KycSource<A> {
    api: Arc<A>,
    session: Arc<Session>,
}

#[async_trait]
impl<A: KycApi> Reconcile for KycSource<A> {
    type Snapshot = KycStatusSnapshot;

    fn hint_kinds(&self) -> Vec<EventKind> {
        vec![EventKind::KycStatusUpdate]
    }

    async fn fetch(&self) -> Result<KycStatusSnapshot, ApiError> {
        self.api.fetch_kyc_status().await
    }

    fn is_settled(&self, snapshot: &KycStatusSnapshot) -> bool {
        snapshot.status.is_settled()
    }

    fn on_applied(&self, snapshot: &KycStatusSnapshot) {
        self.session.apply(snapshot);
    }

    fn name(&self) -> &'static str {
        "kyc"
    }
}

struct FlowInner<A: KycApi> {
    api: Arc<A>,
    reconciler: Reconciler<KycSource<A>>,
    session: Arc<Session>,
    region: Mutex<Option<RegionIntent>>,
}

pub struct KycFlow<A: KycApi> {
    inner: Arc<FlowInner<A>>,
}

impl<A: KycApi> Clone for KycFlow<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: KycApi> KycFlow<A> {
    pub fn new(
        api: A,
        transport: Transport,
        poll_interval: Duration,
        callbacks: Arc<dyn KycCallbacks>,
    ) -> Self {
        let api = Arc::new(api);
        let session = Arc::new(Session {
            state: Mutex::new(KycSessionState::default()),
            callbacks,
            live: AtomicBool::new(true),
        });
        let source = KycSource {
            api: api.clone(),
            session: session.clone(),
        };
        Self {
            inner: Arc::new(FlowInner {
                api,
                reconciler: Reconciler::new(source, transport, poll_interval),
                session,
                region: Mutex::new(None),
            }),
        }
    }

    fn state_mut(&self) -> MutexGuard<'_, KycSessionState> {
        self.inner.session.state.lock()
    }

    pub fn state(&self) -> KycSessionState {
        self.state_mut().clone()
    }

    pub fn region_intent(&self) -> Option<RegionIntent> {
        *self.inner.region.lock()
    }

    pub fn reconciler(&self) -> &Reconciler<KycSource<A>> {
        &self.inner.reconciler
    }

    /// Begin observing the authoritative status (push hints and polling).
    pub fn start(&self) {
        self.inner.reconciler.start_tracking();
    }

    pub fn reset_error(&self) {
        self.state_mut().error = None;
    }

    /// Request an access token for the widget.
    ///
    /// `region` overrides the remembered region intent and becomes the new one.
    pub async fn initiate(&self, region: Option<RegionIntent>) -> Result<KycStart, KycError> {
        self.state_mut().begin_request();
        let region = {
            let mut remembered = self.inner.region.lock();
            if region.is_some() {
                *remembered = region;
            }
            *remembered
        };

        let response = match self.inner.api.initiate_kyc(region).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("KYC token issuance failed: {}", e);
                let err = KycError::TokenIssuance(e.user_message());
                self.state_mut().issuance_failed(err.clone());
                return Err(err);
            }
        };

        if response.status == Some(KycStatus::Approved) {
            let due = self.state_mut().already_approved();
            tracing::info!("KYC already approved, no token needed");
            if due {
                self.inner.session.callbacks.on_success();
            }
            return Ok(KycStart::AlreadyApproved);
        }

        match response.token {
            Some(token) => {
                self.state_mut().token_issued(token.clone());
                tracing::debug!("KYC token issued, handing off to widget");
                Ok(KycStart::Token(token))
            }
            None => {
                self.state_mut().issuance_failed(KycError::MissingToken);
                Err(KycError::MissingToken)
            }
        }
    }

    /// Re-issue the token with the remembered region intent. The phase is unchanged.
    pub async fn refresh_token(&self) -> Result<String, KycError> {
        let region = *self.inner.region.lock();
        let result = match self.inner.api.initiate_kyc(region).await {
            Ok(response) => response
                .token
                .ok_or_else(|| KycError::TokenRefresh("no token returned".into())),
            Err(e) => Err(KycError::TokenRefresh(e.user_message())),
        };

        let mut state = self.state_mut();
        match result {
            Ok(token) => {
                state.token_refreshed(token.clone());
                Ok(token)
            }
            Err(err) => {
                tracing::warn!("{}", err);
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    pub async fn handle_widget_signal(&self, signal: WidgetSignal) -> Result<(), KycError> {
        match signal {
            WidgetSignal::Submitted => {
                self.state_mut().submitted();
                tracing::info!("KYC submitted, waiting for review");
                self.inner.reconciler.start_tracking();
            }
            WidgetSignal::ClosedByUser => {
                self.state_mut().closed_by_user();
                self.inner.session.callbacks.on_manual_close();
            }
            WidgetSignal::TokenExpired => {
                self.refresh_token().await?;
            }
        }
        Ok(())
    }

    /// Drive the widget until it reports something other than an expired token.
    pub async fn run_widget(
        &self,
        widget: &dyn VerificationWidget,
    ) -> Result<WidgetSignal, KycError> {
        let mut token = self
            .state_mut()
            .access_token
            .clone()
            .ok_or(KycError::MissingToken)?;
        loop {
            match widget.present(&token).await {
                WidgetSignal::TokenExpired => token = self.refresh_token().await?,
                signal => {
                    self.handle_widget_signal(signal).await?;
                    return Ok(signal);
                }
            }
        }
    }

    /// Stop observing. Callbacks no longer fire after this returns.
    pub fn shutdown(&self) {
        self.inner.session.live.store(false, Ordering::SeqCst);
        self.inner.reconciler.stop_tracking();
    }
}
