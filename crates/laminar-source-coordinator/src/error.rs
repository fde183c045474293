//! Error types for the source coordinator.
//!
//! Every error carries a stable `LSC-NNNN` code that appears in the
//! rendered message, so log lines can be grepped by code.
//!
//! | Range | Category |
//! |-------|----------|
//! | `LSC-0xxx` | General / configuration / lifecycle |
//! | `LSC-5xxx` | Scan planner I/O |
//! | `LSC-6xxx` | Checkpoint / restore |
//!
//! Per-task reporting anomalies (duplicate splits, watermark regressions)
//! are not errors. They are clamped, logged and counted.

use crate::split::SplitId;

/// Invalid configuration value.
pub const INVALID_CONFIG: &str = "LSC-0001";
/// Task index outside `[0, parallelism)`.
pub const UNKNOWN_TASK: &str = "LSC-0002";
/// Coordinator is shut down.
pub const SHUTDOWN: &str = "LSC-0003";
/// Scan planner failure.
pub const PLANNER_FAILED: &str = "LSC-5001";
/// A split is owned by two tasks in the restored state.
pub const DUPLICATE_OWNER: &str = "LSC-6001";
/// A split is both owned and unassigned in the restored state.
pub const OWNED_AND_UNASSIGNED: &str = "LSC-6002";
/// A split appears twice in the restored unassigned pool.
pub const DUPLICATE_UNASSIGNED: &str = "LSC-6003";
/// Checkpoint written by an incompatible version.
pub const UNSUPPORTED_STATE_VERSION: &str = "LSC-6004";
/// Checkpoint (de)serialization failed.
pub const SERIALIZATION: &str = "LSC-6005";

/// Errors from coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Invalid or inconsistent configuration.
    #[error("[{INVALID_CONFIG}] invalid configuration: {0}")]
    Config(String),

    /// A task-facing call named a task the coordinator does not know.
    #[error("[{UNKNOWN_TASK}] task {task} is outside parallelism {parallelism}")]
    UnknownTask {
        /// The offending task index.
        task: usize,
        /// Configured parallelism.
        parallelism: usize,
    },

    /// The coordinator has been shut down.
    #[error("[{SHUTDOWN}] source coordinator is shut down")]
    Shutdown,

    /// The scan planner failed to produce splits.
    #[error("[{PLANNER_FAILED}] scan planner failed: {0}")]
    Planner(String),

    /// Restored state records the same split for two different tasks.
    #[error("[{DUPLICATE_OWNER}] split `{split}` is owned by task {first} and task {second}")]
    DuplicateOwner {
        /// The split with conflicting owners.
        split: SplitId,
        /// Owner recorded first.
        first: usize,
        /// Conflicting owner recorded later.
        second: usize,
    },

    /// Restored state records a split as both owned and unassigned.
    #[error("[{OWNED_AND_UNASSIGNED}] split `{split}` is owned by task {task} but also unassigned")]
    OwnedAndUnassigned {
        /// The split.
        split: SplitId,
        /// Its recorded owner.
        task: usize,
    },

    /// Restored unassigned pool contains the same split twice.
    #[error("[{DUPLICATE_UNASSIGNED}] split `{split}` appears twice in the unassigned pool")]
    DuplicateUnassigned {
        /// The duplicated split.
        split: SplitId,
    },

    /// Checkpoint state version is not understood by this build.
    #[error("[{UNSUPPORTED_STATE_VERSION}] unsupported enumerator state version {0}")]
    UnsupportedStateVersion(u32),

    /// JSON (de)serialization of enumerator state failed.
    #[error("[{SERIALIZATION}] enumerator state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => INVALID_CONFIG,
            Self::UnknownTask { .. } => UNKNOWN_TASK,
            Self::Shutdown => SHUTDOWN,
            Self::Planner(_) => PLANNER_FAILED,
            Self::DuplicateOwner { .. } => DUPLICATE_OWNER,
            Self::OwnedAndUnassigned { .. } => OWNED_AND_UNASSIGNED,
            Self::DuplicateUnassigned { .. } => DUPLICATE_UNASSIGNED,
            Self::UnsupportedStateVersion(_) => UNSUPPORTED_STATE_VERSION,
            Self::Serialization(_) => SERIALIZATION,
        }
    }

    /// Whether this error means restored checkpoint state is corrupt and
    /// source startup must be aborted.
    #[must_use]
    pub fn is_corrupt_state(&self) -> bool {
        matches!(
            self,
            Self::DuplicateOwner { .. }
                | Self::OwnedAndUnassigned { .. }
                | Self::DuplicateUnassigned { .. }
                | Self::UnsupportedStateVersion(_)
                | Self::Serialization(_)
        )
    }
}

/// Result alias for coordinator operations.
pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;
