//! Identity verification (KYC) session handling.

mod flow;
mod machine;

pub use flow::{KycCallbacks, KycFlow, KycSource, KycStart, VerificationWidget, WidgetSignal};
pub use machine::{detect_transition, KycError, KycPhase, KycSessionState, Transition};
