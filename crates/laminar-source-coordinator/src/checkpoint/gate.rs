//! Checkpoint alignment gate.
//!
//! Holds checkpoint triggers back until the source has consumed a new
//! table snapshot since the last completed checkpoint, so checkpoint
//! boundaries line up with snapshot boundaries.
//!
//! ## Protocol
//!
//! 1. [`CheckpointGate::begin`] either decides immediately or registers a
//!    pending request and hands back a [`PendingTrigger`] with a deadline
//! 2. The caller releases the coordinator lock and awaits the trigger
//!    until the deadline
//! 3. [`CheckpointGate::on_snapshot_consumed`] resolves the pending request
//!    with `Proceed`; [`CheckpointGate::shutdown`] resolves it with a decline
//! 4. On deadline the caller reclaims the request via
//!    [`CheckpointGate::expire`] and declines with `Timeout`
//!
//! At most one request is pending. A concurrent second trigger is declined
//! immediately rather than queued.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::split::SnapshotId;

/// Identifier of a checkpoint attempt.
pub type CheckpointId = u64;

/// Why a checkpoint trigger was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// No snapshot was consumed before the alignment timeout.
    Timeout,
    /// Another trigger is already waiting.
    ConcurrentRequest,
    /// The source shut down.
    Shutdown,
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "checkpoint alignment timed out"),
            Self::ConcurrentRequest => write!(f, "another checkpoint trigger is pending"),
            Self::Shutdown => write!(f, "source shut down"),
        }
    }
}

/// Outcome of a checkpoint trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDecision {
    /// Take the checkpoint.
    Proceed,
    /// Abort this checkpoint attempt.
    Decline {
        /// Why.
        reason: DeclineReason,
    },
}

impl CheckpointDecision {
    /// Shorthand for a decline.
    #[must_use]
    pub const fn decline(reason: DeclineReason) -> Self {
        Self::Decline { reason }
    }

    /// Whether the checkpoint may proceed.
    #[must_use]
    pub const fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// A trigger waiting for a snapshot to be consumed.
#[derive(Debug)]
pub struct PendingTrigger {
    /// The waiting checkpoint.
    pub checkpoint_id: CheckpointId,
    /// When the wait gives up.
    pub deadline: Instant,
    /// Resolved by the gate.
    pub rx: oneshot::Receiver<CheckpointDecision>,
}

/// Result of [`CheckpointGate::begin`].
#[derive(Debug)]
pub enum GateEntry {
    /// Decided without waiting.
    Decided(CheckpointDecision),
    /// Wait on the trigger until its deadline.
    Wait(PendingTrigger),
}

#[derive(Debug)]
struct PendingRequest {
    checkpoint_id: CheckpointId,
    tx: oneshot::Sender<CheckpointDecision>,
}

/// Checkpoint alignment state.
#[derive(Debug)]
pub struct CheckpointGate {
    enabled: bool,
    timeout: Duration,
    consumed_since_complete: bool,
    last_consumed: Option<SnapshotId>,
    pending: Option<PendingRequest>,
    shut_down: bool,
}

impl CheckpointGate {
    /// Creates a gate. A disabled gate always proceeds.
    #[must_use]
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            enabled,
            timeout,
            consumed_since_complete: false,
            last_consumed: None,
            pending: None,
            shut_down: false,
        }
    }

    /// Whether alignment is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts handling a checkpoint trigger at `now`.
    pub fn begin(&mut self, checkpoint_id: CheckpointId, now: Instant) -> GateEntry {
        if self.shut_down {
            return GateEntry::Decided(CheckpointDecision::decline(DeclineReason::Shutdown));
        }
        if !self.enabled || self.consumed_since_complete {
            return GateEntry::Decided(CheckpointDecision::Proceed);
        }
        // A waiter that was dropped without expiring leaves a closed sender.
        if let Some(pending) = self.pending.as_ref().filter(|p| !p.tx.is_closed()) {
            debug!(
                checkpoint_id,
                pending = pending.checkpoint_id,
                "checkpoint trigger while another is pending"
            );
            return GateEntry::Decided(CheckpointDecision::decline(
                DeclineReason::ConcurrentRequest,
            ));
        }

        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingRequest { checkpoint_id, tx });
        let deadline = now + self.timeout;
        debug!(checkpoint_id, timeout = ?self.timeout, "checkpoint waiting for snapshot");
        GateEntry::Wait(PendingTrigger {
            checkpoint_id,
            deadline,
            rx,
        })
    }

    /// Records that a snapshot's splits have all been consumed and
    /// releases a waiting trigger. Returns the released checkpoint.
    pub fn on_snapshot_consumed(&mut self, snapshot_id: SnapshotId) -> Option<CheckpointId> {
        self.consumed_since_complete = true;
        self.last_consumed = Some(snapshot_id);
        let pending = self.pending.take()?;
        info!(
            checkpoint_id = pending.checkpoint_id,
            snapshot_id, "snapshot consumed, releasing checkpoint"
        );
        // The waiter may already have given up.
        let _ = pending.tx.send(CheckpointDecision::Proceed);
        Some(pending.checkpoint_id)
    }

    /// Reclaims the pending request of `checkpoint_id` after its deadline.
    ///
    /// Returns `false` if the request was already resolved, in which case
    /// the decision is waiting in the trigger's receiver.
    pub fn expire(&mut self, checkpoint_id: CheckpointId) -> bool {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.checkpoint_id == checkpoint_id)
        {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// A checkpoint completed: the next trigger waits for a new snapshot.
    pub fn notify_checkpoint_complete(&mut self, checkpoint_id: CheckpointId) {
        debug!(checkpoint_id, "checkpoint complete, awaiting next snapshot");
        self.consumed_since_complete = false;
    }

    /// Declines any waiting trigger and all future ones.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        if let Some(pending) = self.pending.take() {
            info!(
                checkpoint_id = pending.checkpoint_id,
                "declining pending checkpoint on shutdown"
            );
            let _ = pending
                .tx
                .send(CheckpointDecision::decline(DeclineReason::Shutdown));
        }
    }

    /// Whether a snapshot was consumed since the last completed checkpoint.
    #[must_use]
    pub fn snapshot_consumed(&self) -> bool {
        self.consumed_since_complete
    }

    /// Last consumed snapshot.
    #[must_use]
    pub fn last_consumed_snapshot(&self) -> Option<SnapshotId> {
        self.last_consumed
    }

    /// Checkpoint currently waiting, if any.
    #[must_use]
    pub fn pending_checkpoint(&self) -> Option<CheckpointId> {
        self.pending.as_ref().map(|p| p.checkpoint_id)
    }
}
