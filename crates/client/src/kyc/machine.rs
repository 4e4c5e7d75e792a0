//! Pure KYC session state and transition rules.
//!
//! Callbacks are decided here but fired by the flow, so every rule can be
//! checked without a runtime.

use railwatch_shared::KycStatus;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KycPhase {
    #[default]
    Idle,
    RequestingToken,
    AwaitingSdk,
    PendingReview,
    Approved,
    Rejected,
}

impl KycPhase {
    /// Phase implied by an authoritative provider status.
    ///
    /// `Unknown` statuses give no information and return `None`.
    pub fn from_status(status: KycStatus) -> Option<Self> {
        match status {
            KycStatus::Approved => Some(KycPhase::Approved),
            KycStatus::Rejected | KycStatus::Failed => Some(KycPhase::Rejected),
            KycStatus::Pending => Some(KycPhase::PendingReview),
            KycStatus::NotStarted | KycStatus::ActionRequired => Some(KycPhase::Idle),
            KycStatus::Unknown => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, KycPhase::Approved | KycPhase::Rejected)
    }
}

/// A callback-worthy change of observed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnteredApproved,
    EnteredRejected,
}

/// Compare against the previous observation, never the current one alone.
///
/// The first observation (`previous == None`) is never a transition.
pub fn detect_transition(previous: Option<KycPhase>, current: KycPhase) -> Option<Transition> {
    let previous = previous?;
    if previous == current {
        return None;
    }
    match current {
        KycPhase::Approved => Some(Transition::EnteredApproved),
        KycPhase::Rejected => Some(Transition::EnteredRejected),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KycError {
    #[error("Could not initiate verification: {0}")]
    TokenIssuance(String),
    #[error("Could not initiate verification. Please try again.")]
    MissingToken,
    #[error("Failed to refresh token: {0}")]
    TokenRefresh(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KycSessionState {
    pub phase: KycPhase,
    pub last_observed_phase: Option<KycPhase>,
    pub access_token: Option<String>,
    pub reject_labels: Vec<String>,
    pub error: Option<KycError>,
}

impl KycSessionState {
    /// Record an authoritative status and report whether a callback is due.
    pub fn observe(&mut self, status: KycStatus, reject_labels: &[String]) -> Option<Transition> {
        let observed = KycPhase::from_status(status)?;
        let transition = detect_transition(self.last_observed_phase, observed);
        self.last_observed_phase = Some(observed);

        if observed == KycPhase::Rejected {
            self.reject_labels = reject_labels.to_vec();
        }
        if observed.is_terminal() {
            self.phase = observed;
            self.access_token = None;
        } else if status == KycStatus::ActionRequired && self.phase == KycPhase::PendingReview {
            // review came back asking the user to resubmit
            self.phase = KycPhase::Idle;
        }
        transition
    }

    pub fn begin_request(&mut self) {
        self.phase = KycPhase::RequestingToken;
        self.error = None;
    }

    /// Returns true when the success callback is due.
    pub fn already_approved(&mut self) -> bool {
        let due = self.phase != KycPhase::Approved
            && self.last_observed_phase != Some(KycPhase::Approved);
        self.phase = KycPhase::Approved;
        self.last_observed_phase = Some(KycPhase::Approved);
        self.access_token = None;
        due
    }

    pub fn token_issued(&mut self, token: String) {
        self.phase = KycPhase::AwaitingSdk;
        self.access_token = Some(token);
    }

    pub fn issuance_failed(&mut self, error: KycError) {
        self.phase = KycPhase::Idle;
        self.error = Some(error);
    }

    pub fn submitted(&mut self) {
        self.phase = KycPhase::PendingReview;
        self.last_observed_phase = Some(KycPhase::PendingReview);
        self.access_token = None;
    }

    pub fn closed_by_user(&mut self) {
        self.phase = KycPhase::Idle;
        self.access_token = None;
    }

    /// Swap the token without touching the phase.
    pub fn token_refreshed(&mut self, token: String) {
        self.access_token = Some(token);
    }
}
