//! Scan planning collaborator.
//!
//! The coordinator does not plan scans itself. It pulls batches of newly
//! discovered splits from a [`ScanPlanner`], which is restartable by
//! resuming after the last fully enumerated snapshot.

use std::collections::VecDeque;

use crate::error::Result;
use crate::split::{SnapshotId, SplitBatch};

/// Produces split batches from table metadata.
#[async_trait::async_trait]
pub trait ScanPlanner: Send + 'static {
    /// Positions the planner after `last_enumerated`, the last snapshot
    /// whose splits were fully handed to the coordinator. `None` starts
    /// from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Planner`](crate::error::CoordinatorError::Planner)
    /// if the position cannot be restored.
    async fn restore(&mut self, last_enumerated: Option<SnapshotId>) -> Result<()>;

    /// Returns the next batch, or `None` if nothing new is available yet.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Planner`](crate::error::CoordinatorError::Planner)
    /// on planning failure. The caller logs it and polls again later.
    async fn next_batch(&mut self) -> Result<Option<SplitBatch>>;

    /// Whether a bounded planner has produced everything it ever will.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Planner over a fixed list of batches. Finishes once drained.
#[derive(Debug, Default)]
pub struct StaticScanPlanner {
    batches: VecDeque<SplitBatch>,
}

impl StaticScanPlanner {
    /// Creates a planner yielding `batches` in order.
    #[must_use]
    pub fn new(batches: Vec<SplitBatch>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// Batches not yet produced.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait::async_trait]
impl ScanPlanner for StaticScanPlanner {
    async fn restore(&mut self, last_enumerated: Option<SnapshotId>) -> Result<()> {
        if let Some(last) = last_enumerated {
            self.batches
                .retain(|b| b.snapshot_id.is_none_or(|id| id > last));
        }
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Option<SplitBatch>> {
        Ok(self.batches.pop_front())
    }

    fn is_finished(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::Split;

    fn batch(snapshot: SnapshotId, ids: &[&str]) -> SplitBatch {
        SplitBatch::snapshot(
            snapshot,
            ids.iter()
                .map(|id| Split::new(*id, 0).with_snapshot(snapshot))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_static_planner_drains_in_order() {
        let mut planner = StaticScanPlanner::new(vec![batch(1, &["a"]), batch(2, &["b"])]);
        assert!(!planner.is_finished());
        assert_eq!(planner.next_batch().await.unwrap().unwrap().snapshot_id, Some(1));
        assert_eq!(planner.next_batch().await.unwrap().unwrap().snapshot_id, Some(2));
        assert!(planner.next_batch().await.unwrap().is_none());
        assert!(planner.is_finished());
    }

    #[tokio::test]
    async fn test_static_planner_resumes_after_snapshot() {
        let mut planner =
            StaticScanPlanner::new(vec![batch(1, &["a"]), batch(2, &["b"]), batch(3, &["c"])]);
        planner.restore(Some(2)).await.unwrap();
        assert_eq!(planner.remaining(), 1);
        assert_eq!(planner.next_batch().await.unwrap().unwrap().snapshot_id, Some(3));
    }
}
