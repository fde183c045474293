//! Events sent from the discovery task to the coordination loop.

use crate::split::SplitBatch;

/// An event from the discovery task.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Newly planned splits.
    Discovered(SplitBatch),

    /// The scan planner failed; discovery continues.
    PlannerError {
        /// Error message.
        message: String,
    },

    /// A bounded planner has nothing more to produce.
    Exhausted,
}
