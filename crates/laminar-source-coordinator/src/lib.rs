//! # LaminarDB Source Coordinator
//!
//! Runtime coordinator for a checkpointed, parallel table source: assigns
//! planned splits to reader tasks, aligns per-task watermarks within a
//! bounded drift, and holds checkpoint triggers until a table snapshot has
//! been consumed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use laminar_source_coordinator::{
//!     CoordinatorConfig, SourceCoordinator, StaticScanPlanner, Watermark,
//! };
//!
//! # async fn demo() -> laminar_source_coordinator::Result<()> {
//! let config = CoordinatorConfig {
//!     parallelism: 2,
//!     ..CoordinatorConfig::default()
//! };
//! let coordinator = Arc::new(SourceCoordinator::new(config)?);
//!
//! let loop_handle = {
//!     let coordinator = Arc::clone(&coordinator);
//!     tokio::spawn(async move {
//!         coordinator.run(Box::new(StaticScanPlanner::default())).await
//!     })
//! };
//!
//! coordinator.register_task(0)?;
//! let splits = coordinator.request_splits(0, 10)?;
//! for split in &splits {
//!     coordinator.notify_task_finished_split(0, &split.id)?;
//! }
//! coordinator.report_watermark(0, Watermark::new(1_000))?;
//!
//! coordinator.shutdown();
//! let _ = loop_handle.await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Checkpoint alignment and persisted state.
pub mod checkpoint;

/// Coordinator configuration.
pub mod config;

/// The coordinator and its loop.
pub mod coordinator;

/// Error types.
pub mod error;

/// Coordinator metrics.
pub mod metrics;

/// Scan planning collaborator.
pub mod planner;

/// Splits and their assignment.
pub mod split;

/// Watermarks and alignment.
pub mod watermark;

pub use checkpoint::{CheckpointDecision, CheckpointId, DeclineReason, EnumeratorCheckpoint};
pub use config::CoordinatorConfig;
pub use coordinator::{SourceCoordinator, TaskControl};
pub use error::{CoordinatorError, Result};
pub use metrics::MetricsSnapshot;
pub use planner::{ScanPlanner, StaticScanPlanner};
pub use split::{SnapshotId, Split, SplitAssignMode, SplitBatch, SplitId};
pub use watermark::{
    AlignmentCommand, GroupKey, TaskWatermarkEmitter, Watermark, WatermarkEmitStrategy,
};
