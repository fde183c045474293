//! # Splits
//!
//! A [`Split`] is an opaque, immutable unit of scan work produced by scan
//! planning. The coordinator only looks at its identifier and ordering
//! hint; the payload is carried through untouched to the reader.
//!
//! ## Modules
//!
//! - `registry`: unassigned pool and assignment record
//! - `assigner`: FAIR / PREEMPTIVE task selection
//! - `enumerator`: per-task queues and the task-facing split operations

/// Split registry and assignment record.
pub mod registry;

/// Split assignment policies.
pub mod assigner;

/// Split enumerator.
pub mod enumerator;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use assigner::{FairAssigner, PreemptiveAssigner, SplitAssignMode, SplitAssigner, TaskLoad};
pub use enumerator::{AddSplitsOutcome, SplitEnumerator};
pub use registry::{AssignmentEntry, AssignmentStatus, SplitRegistry};

/// Unique identifier of a split.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SplitId(pub String);

impl SplitId {
    /// Create a new split identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SplitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SplitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a table snapshot (monotonically increasing per table).
pub type SnapshotId = u64;

/// An assignable unit of scan work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// Unique identifier.
    pub id: SplitId,
    /// Ordering hint from scan planning (lower is scanned first).
    pub ordering_hint: u64,
    /// Snapshot this split was planned from, if known.
    pub snapshot_id: Option<SnapshotId>,
    /// Opaque descriptor forwarded to the reader.
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Split {
    /// Create a split with an empty payload.
    #[must_use]
    pub fn new(id: impl Into<SplitId>, ordering_hint: u64) -> Self {
        Self {
            id: id.into(),
            ordering_hint,
            snapshot_id: None,
            payload: Vec::new(),
        }
    }

    /// Attach the snapshot this split belongs to.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot_id: SnapshotId) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }

    /// Attach an opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// A batch of newly discovered splits as produced by scan planning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitBatch {
    /// Snapshot the batch was planned from.
    pub snapshot_id: Option<SnapshotId>,
    /// Splits in discovery order.
    pub splits: Vec<Split>,
    /// Whether this batch completes the enumeration of `snapshot_id`.
    pub end_of_snapshot: bool,
}

impl SplitBatch {
    /// A batch that fully enumerates one snapshot.
    #[must_use]
    pub fn snapshot(snapshot_id: SnapshotId, splits: Vec<Split>) -> Self {
        Self {
            snapshot_id: Some(snapshot_id),
            splits,
            end_of_snapshot: true,
        }
    }
}
