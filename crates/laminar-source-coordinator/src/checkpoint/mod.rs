//! # Checkpointing
//!
//! - `gate`: holds checkpoint triggers until a snapshot is consumed
//! - `state`: the enumerator state persisted with each checkpoint

/// Checkpoint alignment gate.
pub mod gate;

/// Persisted enumerator state.
pub mod state;

pub use gate::{CheckpointDecision, CheckpointGate, CheckpointId, DeclineReason};
pub use state::{EnumeratorCheckpoint, STATE_VERSION};
