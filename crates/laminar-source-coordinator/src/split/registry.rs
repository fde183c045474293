//! Split registry: the unassigned pool plus the assignment record.
//!
//! Every split the registry has ever accepted lives in exactly one of two
//! places: the unassigned pool (FIFO, discovery order) or the assignment
//! record (append-only, hand-out order). The registry is the only split
//! state that survives a coordinator restart.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::{Split, SplitId};
use crate::error::{CoordinatorError, Result};

/// Progress of an assigned split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Placed on the owner's pending queue, not yet handed out.
    Pending,
    /// Handed to the reader, not yet reported finished.
    Delivered,
    /// Reported finished by the reader.
    Finished,
}

/// One row of the assignment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEntry {
    /// The assigned split.
    pub split: Split,
    /// Owning task index.
    pub task: usize,
    /// Progress of the split.
    ///
    /// Pending splits are rebuilt into the owner's queue on restore.
    /// Delivered splits are tracked by the reader's own state.
    pub status: AssignmentStatus,
}

/// Pool of unassigned splits and the append-only assignment record.
#[derive(Debug, Default)]
pub struct SplitRegistry {
    unassigned: VecDeque<Split>,
    /// Ids of every split in the pool or the record.
    known: HashSet<SplitId>,
    record: Vec<AssignmentEntry>,
    /// Split id → position in `record`.
    positions: HashMap<SplitId, usize>,
}

impl SplitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from checkpointed state.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if a split is owned twice, is both owned
    /// and unassigned, or appears twice in the pool. Restore must abort in
    /// that case rather than pick a winner.
    pub fn restore(unassigned: Vec<Split>, record: Vec<AssignmentEntry>) -> Result<Self> {
        let mut registry = Self::new();

        for entry in record {
            if let Some(&pos) = registry.positions.get(&entry.split.id) {
                return Err(CoordinatorError::DuplicateOwner {
                    split: entry.split.id,
                    first: registry.record[pos].task,
                    second: entry.task,
                });
            }
            registry.known.insert(entry.split.id.clone());
            registry
                .positions
                .insert(entry.split.id.clone(), registry.record.len());
            registry.record.push(entry);
        }

        for split in unassigned {
            if let Some(&pos) = registry.positions.get(&split.id) {
                return Err(CoordinatorError::OwnedAndUnassigned {
                    split: split.id,
                    task: registry.record[pos].task,
                });
            }
            if !registry.known.insert(split.id.clone()) {
                return Err(CoordinatorError::DuplicateUnassigned { split: split.id });
            }
            registry.unassigned.push_back(split);
        }

        Ok(registry)
    }

    /// Appends a newly discovered split to the pool.
    ///
    /// Returns `false` (and leaves the registry unchanged) if a split with
    /// the same id was seen before, assigned or not.
    pub fn add(&mut self, split: Split) -> bool {
        if !self.known.insert(split.id.clone()) {
            return false;
        }
        self.unassigned.push_back(split);
        true
    }

    /// Removes the oldest unassigned split.
    pub fn pop_unassigned(&mut self) -> Option<Split> {
        self.unassigned.pop_front()
    }

    /// Records `split` as owned by `task`.
    ///
    /// The split must have come out of [`Self::pop_unassigned`]; the caller
    /// keeps the returned clone for the owner's pending queue.
    pub fn record_assignment(&mut self, split: Split, task: usize) -> Split {
        debug_assert!(!self.positions.contains_key(&split.id));
        let out = split.clone();
        self.positions.insert(split.id.clone(), self.record.len());
        self.record.push(AssignmentEntry {
            split,
            task,
            status: AssignmentStatus::Pending,
        });
        out
    }

    /// Updates the progress of an assigned split.
    ///
    /// Returns `false` if the split is not in the record.
    pub fn set_status(&mut self, id: &SplitId, status: AssignmentStatus) -> bool {
        match self.positions.get(id) {
            Some(&pos) => {
                self.record[pos].status = status;
                true
            }
            None => false,
        }
    }

    /// Owner of an assigned split.
    #[must_use]
    pub fn owner(&self, id: &SplitId) -> Option<usize> {
        self.positions.get(id).map(|&pos| self.record[pos].task)
    }

    /// Assignment-record entry of a split.
    #[must_use]
    pub fn entry(&self, id: &SplitId) -> Option<&AssignmentEntry> {
        self.positions.get(id).map(|&pos| &self.record[pos])
    }

    /// Whether the registry has seen this split id.
    #[must_use]
    pub fn contains(&self, id: &SplitId) -> bool {
        self.known.contains(id)
    }

    /// Number of unassigned splits.
    #[must_use]
    pub fn unassigned_len(&self) -> usize {
        self.unassigned.len()
    }

    /// Number of assigned splits.
    #[must_use]
    pub fn assigned_len(&self) -> usize {
        self.record.len()
    }

    /// Unassigned splits in pool order.
    pub fn unassigned(&self) -> impl Iterator<Item = &Split> {
        self.unassigned.iter()
    }

    /// The assignment record in hand-out order.
    #[must_use]
    pub fn entries(&self) -> &[AssignmentEntry] {
        &self.record
    }
}
