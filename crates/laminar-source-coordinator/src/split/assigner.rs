//! Split assignment policies.
//!
//! A policy is selected once at construction from [`SplitAssignMode`] and
//! dispatched through the [`SplitAssigner`] trait. The enumerator asks the
//! policy two questions: *when* to place splits (on discovery or on
//! request) and *which* candidate task receives the next chunk.
//!
//! - [`FairAssigner`]: places every split as soon as it is discovered, one
//!   at a time, on the least-loaded task. Over a stream of splits this is
//!   round-robin across tasks below the average load.
//! - [`PreemptiveAssigner`]: keeps splits in the shared pool and hands a
//!   whole batch to the waiting task with the shortest pending queue, so
//!   fast readers pull more work.
//!
//! Both break ties by the lowest task index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Split assignment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitAssignMode {
    /// Distribute splits evenly so a few tasks cannot read everything.
    #[default]
    Fair,
    /// Distribute splits according to the consumption speed of each task.
    Preemptive,
}

impl SplitAssignMode {
    /// Builds the policy for this mode.
    #[must_use]
    pub fn assigner(self) -> Box<dyn SplitAssigner> {
        match self {
            Self::Fair => Box::new(FairAssigner),
            Self::Preemptive => Box::new(PreemptiveAssigner),
        }
    }
}

impl fmt::Display for SplitAssignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fair => write!(f, "fair"),
            Self::Preemptive => write!(f, "preemptive"),
        }
    }
}

impl FromStr for SplitAssignMode {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fair" => Ok(Self::Fair),
            "preemptive" => Ok(Self::Preemptive),
            other => Err(CoordinatorError::Config(format!(
                "invalid split assign mode '{other}': expected 'fair' or 'preemptive'"
            ))),
        }
    }
}

/// Load of one candidate task at selection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLoad {
    /// Task index.
    pub task: usize,
    /// Splits placed on the task but not yet handed out.
    pub pending: usize,
    /// Splits handed out and not yet reported finished.
    pub in_flight: usize,
}

impl TaskLoad {
    /// Pending plus in-flight splits.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.in_flight
    }
}

/// Strategy deciding which task receives the next chunk of splits.
pub trait SplitAssigner: Send + Sync + fmt::Debug {
    /// The mode this policy implements.
    fn mode(&self) -> SplitAssignMode;

    /// Whether splits are placed on tasks as soon as they are discovered.
    ///
    /// When `false`, splits stay in the shared pool until a task asks.
    fn assigns_on_discovery(&self) -> bool;

    /// Number of splits handed to the selected task per selection.
    fn chunk_size(&self, batch_size: usize) -> usize;

    /// Picks a task among `candidates`. `None` if there are none.
    fn select_task(&self, candidates: &[TaskLoad]) -> Option<usize>;
}

/// Even distribution, see the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FairAssigner;

impl SplitAssigner for FairAssigner {
    fn mode(&self) -> SplitAssignMode {
        SplitAssignMode::Fair
    }

    fn assigns_on_discovery(&self) -> bool {
        true
    }

    fn chunk_size(&self, _batch_size: usize) -> usize {
        1
    }

    fn select_task(&self, candidates: &[TaskLoad]) -> Option<usize> {
        candidates
            .iter()
            .min_by_key(|c| (c.total(), c.task))
            .map(|c| c.task)
    }
}

/// Consumption-speed driven distribution, see the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreemptiveAssigner;

impl SplitAssigner for PreemptiveAssigner {
    fn mode(&self) -> SplitAssignMode {
        SplitAssignMode::Preemptive
    }

    fn assigns_on_discovery(&self) -> bool {
        false
    }

    fn chunk_size(&self, batch_size: usize) -> usize {
        batch_size.max(1)
    }

    fn select_task(&self, candidates: &[TaskLoad]) -> Option<usize> {
        candidates
            .iter()
            .min_by_key(|c| (c.pending, c.task))
            .map(|c| c.task)
    }
}
