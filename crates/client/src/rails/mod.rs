//! Payment rail status: pure aggregation and the tracker that feeds it.

pub mod aggregate;
mod tracker;

pub use aggregate::{aggregate, all_settled, display_name, needs_followup_action};
pub use tracker::{RailSource, RailStatusTracker};
