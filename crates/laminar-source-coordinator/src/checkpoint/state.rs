//! Persisted enumerator state.
//!
//! The unassigned pool and the assignment record are the only coordinator
//! state that survives a restart. Everything else (watermarks, idle and
//! paused flags, pending checkpoint triggers) is rebuilt as readers
//! re-register.

use serde::{Deserialize, Serialize};

use super::gate::CheckpointId;
use crate::error::{CoordinatorError, Result};
use crate::split::{AssignmentEntry, SnapshotId, Split};

/// Current layout version.
pub const STATE_VERSION: u32 = 1;

/// Enumerator checkpoint, JSON-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumeratorCheckpoint {
    /// Layout version (always 1 for this type).
    pub version: u32,
    /// Checkpoint this state belongs to.
    pub checkpoint_id: CheckpointId,
    /// Unassigned pool in discovery order.
    #[serde(default)]
    pub unassigned: Vec<Split>,
    /// Assignment record in hand-out order.
    #[serde(default)]
    pub assignments: Vec<AssignmentEntry>,
    /// Last snapshot whose splits were fully enumerated, so the planner
    /// can resume after it.
    #[serde(default)]
    pub last_enumerated_snapshot: Option<SnapshotId>,
}

impl EnumeratorCheckpoint {
    /// Creates a checkpoint at the current layout version.
    #[must_use]
    pub fn new(
        checkpoint_id: CheckpointId,
        unassigned: Vec<Split>,
        assignments: Vec<AssignmentEntry>,
        last_enumerated_snapshot: Option<SnapshotId>,
    ) -> Self {
        Self {
            version: STATE_VERSION,
            checkpoint_id,
            unassigned,
            assignments,
            last_enumerated_snapshot,
        }
    }

    /// Encodes the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a checkpoint and checks its version.
    ///
    /// Split invariants are checked when the registry is rebuilt.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Serialization`] on malformed input or
    /// [`CoordinatorError::UnsupportedStateVersion`] for another layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let checkpoint: Self = serde_json::from_slice(bytes)?;
        if checkpoint.version != STATE_VERSION {
            return Err(CoordinatorError::UnsupportedStateVersion(checkpoint.version));
        }
        Ok(checkpoint)
    }
}
