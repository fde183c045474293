//! Split enumerator.
//!
//! Owns the [`SplitRegistry`] and one pending queue per task. Discovered
//! splits enter the registry pool in discovery order; the configured
//! [`SplitAssigner`] moves them from the pool onto task queues, and
//! [`SplitEnumerator::request_splits`] hands queued splits to readers.
//!
//! ## Placement timing
//!
//! - FAIR places on discovery, so each task's queue is fixed before any
//!   task asks and fast readers cannot drain a slow reader's share.
//! - PREEMPTIVE places on request: a task with an empty queue registers
//!   as *awaiting* and the pool is handed out, one batch at a time, to the
//!   awaiting task with the shortest queue.
//!
//! Placement is the assignment decision. Once a split is on a task's
//! queue it is recorded and never moves to another task, including across
//! restore and reader failure.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use super::assigner::{SplitAssignMode, SplitAssigner, TaskLoad};
use super::registry::{AssignmentEntry, AssignmentStatus, SplitRegistry};
use super::{Split, SplitId};
use crate::error::{CoordinatorError, Result};
use crate::metrics::CoordinatorMetrics;

/// Split-side state of one task.
#[derive(Debug, Default)]
struct TaskSplits {
    /// Placed on this task, not yet handed out (hand-out order).
    pending: VecDeque<Split>,
    /// Handed out, not yet finished.
    in_flight: HashSet<SplitId>,
    /// Splits reported finished during this lifetime.
    finished: u64,
    /// PREEMPTIVE only: the task asked while its queue was empty.
    awaiting: bool,
    /// The reader has registered (or re-registered after restore).
    registered: bool,
}

impl TaskSplits {
    fn load(&self, task: usize) -> TaskLoad {
        TaskLoad {
            task,
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
        }
    }
}

/// Result of [`SplitEnumerator::add_splits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddSplitsOutcome {
    /// New splits accepted into the registry.
    pub added: usize,
    /// Splits dropped because their id was already known.
    pub duplicates: usize,
}

/// Assigns discovered splits to reader tasks.
#[derive(Debug)]
pub struct SplitEnumerator {
    registry: SplitRegistry,
    tasks: Vec<TaskSplits>,
    assigner: Box<dyn SplitAssigner>,
    batch_size: usize,
    metrics: Arc<CoordinatorMetrics>,
}

impl SplitEnumerator {
    /// Creates an empty enumerator for `parallelism` tasks.
    #[must_use]
    pub fn new(
        parallelism: usize,
        batch_size: usize,
        mode: SplitAssignMode,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            registry: SplitRegistry::new(),
            tasks: (0..parallelism).map(|_| TaskSplits::default()).collect(),
            assigner: mode.assigner(),
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// Rebuilds the enumerator from checkpointed registry state.
    ///
    /// Pending entries go back onto their owner's queue in record order;
    /// delivered entries count as in flight for their owner.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the registry invariants are violated,
    /// or [`CoordinatorError::UnknownTask`] if an entry names a task outside
    /// the current parallelism.
    pub fn restore(
        parallelism: usize,
        batch_size: usize,
        mode: SplitAssignMode,
        metrics: Arc<CoordinatorMetrics>,
        unassigned: Vec<Split>,
        assignments: Vec<AssignmentEntry>,
    ) -> Result<Self> {
        let registry = SplitRegistry::restore(unassigned, assignments)?;
        let mut enumerator = Self::new(parallelism, batch_size, mode, metrics);

        for entry in registry.entries() {
            let state = enumerator
                .tasks
                .get_mut(entry.task)
                .ok_or(CoordinatorError::UnknownTask {
                    task: entry.task,
                    parallelism,
                })?;
            match entry.status {
                AssignmentStatus::Pending => state.pending.push_back(entry.split.clone()),
                AssignmentStatus::Delivered => {
                    state.in_flight.insert(entry.split.id.clone());
                }
                AssignmentStatus::Finished => {}
            }
        }
        enumerator.registry = registry;

        if enumerator.assigner.assigns_on_discovery() {
            enumerator.distribute();
        }
        Ok(enumerator)
    }

    /// Number of reader tasks.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.tasks.len()
    }

    /// Active assignment mode.
    #[must_use]
    pub fn mode(&self) -> SplitAssignMode {
        self.assigner.mode()
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &SplitRegistry {
        &self.registry
    }

    /// Adds newly discovered splits in discovery order.
    ///
    /// Duplicate ids are dropped and logged; they never fail the call.
    pub fn add_splits(&mut self, batch: Vec<Split>) -> AddSplitsOutcome {
        let mut outcome = AddSplitsOutcome::default();
        for split in batch {
            let id = split.id.clone();
            if self.registry.add(split) {
                outcome.added += 1;
            } else {
                outcome.duplicates += 1;
                CoordinatorMetrics::incr(&self.metrics.duplicate_splits);
                warn!(split = %id, "duplicate split discovered, dropping");
            }
        }
        CoordinatorMetrics::add(&self.metrics.splits_discovered, outcome.added as u64);

        self.distribute();
        outcome
    }

    /// Hands up to `max_batch_size` splits to `task`.
    ///
    /// The batch is further capped by the configured batch size. An empty
    /// result means there is nothing for this task right now and the task
    /// should consider itself idle.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn request_splits(&mut self, task: usize, max_batch_size: usize) -> Result<Vec<Split>> {
        self.check_task(task)?;

        if !self.assigner.assigns_on_discovery() && self.tasks[task].pending.is_empty() {
            self.tasks[task].awaiting = true;
            self.distribute();
        }

        let limit = max_batch_size.min(self.batch_size);
        let state = &mut self.tasks[task];
        let take = limit.min(state.pending.len());
        let batch: Vec<Split> = state.pending.drain(..take).collect();

        for split in &batch {
            state.in_flight.insert(split.id.clone());
            self.registry.set_status(&split.id, AssignmentStatus::Delivered);
        }
        if !batch.is_empty() {
            state.awaiting = false;
        }
        CoordinatorMetrics::add(&self.metrics.splits_delivered, batch.len() as u64);

        if batch.is_empty() {
            debug!(task, "no splits available for task");
        } else {
            debug!(task, count = batch.len(), "splits handed to task");
        }
        Ok(batch)
    }

    /// Records that `task` finished reading `split`.
    ///
    /// Accounting only: the split is never returned to the pool. Returns
    /// `false` if the split was not in flight on that task.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn notify_task_finished_split(&mut self, task: usize, split: &SplitId) -> Result<bool> {
        self.check_task(task)?;
        let state = &mut self.tasks[task];
        if !state.in_flight.remove(split) {
            warn!(task, split = %split, "finish reported for split not in flight on task");
            return Ok(false);
        }
        state.finished += 1;
        self.registry.set_status(split, AssignmentStatus::Finished);
        CoordinatorMetrics::incr(&self.metrics.splits_finished);
        Ok(true)
    }

    /// Returns delivered-but-unfinished splits of a failed reader to the
    /// front of the *same* task's queue, preserving their given order.
    ///
    /// Splits owned by another task, or not in flight, are skipped with a
    /// warning. Returns how many splits were requeued.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn add_splits_back(&mut self, task: usize, splits: &[SplitId]) -> Result<usize> {
        self.check_task(task)?;
        let mut requeue = Vec::with_capacity(splits.len());

        for id in splits {
            match self.registry.owner(id) {
                Some(owner) if owner == task => {}
                Some(owner) => {
                    warn!(task, owner, split = %id, "split returned by non-owner, ignoring");
                    continue;
                }
                None => {
                    warn!(task, split = %id, "unknown split returned, ignoring");
                    continue;
                }
            }
            if !self.tasks[task].in_flight.remove(id) {
                warn!(task, split = %id, "returned split was not in flight, ignoring");
                continue;
            }
            self.registry.set_status(id, AssignmentStatus::Pending);
            if let Some(entry) = self.registry.entry(id) {
                requeue.push(entry.split.clone());
            }
        }

        let count = requeue.len();
        let pending = &mut self.tasks[task].pending;
        for split in requeue.into_iter().rev() {
            pending.push_front(split);
        }
        CoordinatorMetrics::add(&self.metrics.splits_returned, count as u64);
        if count > 0 {
            debug!(task, count, "splits returned to owner queue");
        }
        Ok(count)
    }

    /// Registers (or re-registers) a reader task.
    ///
    /// Returns the number of splits queued for it.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn register_task(&mut self, task: usize) -> Result<usize> {
        self.check_task(task)?;
        let state = &mut self.tasks[task];
        state.registered = true;
        state.awaiting = false;
        Ok(state.pending.len())
    }

    /// Marks a reader task as shut down. Its ownership is kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn unregister_task(&mut self, task: usize) -> Result<()> {
        self.check_task(task)?;
        let state = &mut self.tasks[task];
        state.registered = false;
        state.awaiting = false;
        Ok(())
    }

    /// Whether a task is currently registered.
    #[must_use]
    pub fn is_registered(&self, task: usize) -> bool {
        self.tasks.get(task).is_some_and(|t| t.registered)
    }

    /// Current load of a task.
    #[must_use]
    pub fn task_load(&self, task: usize) -> Option<TaskLoad> {
        self.tasks.get(task).map(|t| t.load(task))
    }

    /// Ids queued for a task, in hand-out order.
    #[must_use]
    pub fn pending_splits(&self, task: usize) -> Vec<SplitId> {
        self.tasks
            .get(task)
            .map(|t| t.pending.iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Splits finished by a task during this lifetime.
    #[must_use]
    pub fn finished_count(&self, task: usize) -> u64 {
        self.tasks.get(task).map_or(0, |t| t.finished)
    }

    /// Ids owned by a task, in assignment order.
    #[must_use]
    pub fn assigned_splits(&self, task: usize) -> Vec<SplitId> {
        self.registry
            .entries()
            .iter()
            .filter(|e| e.task == task)
            .map(|e| e.split.id.clone())
            .collect()
    }

    /// Unassigned pool and assignment record for checkpointing.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<Split>, Vec<AssignmentEntry>) {
        (
            self.registry.unassigned().cloned().collect(),
            self.registry.entries().to_vec(),
        )
    }

    fn check_task(&self, task: usize) -> Result<()> {
        if task < self.tasks.len() {
            Ok(())
        } else {
            Err(CoordinatorError::UnknownTask {
                task,
                parallelism: self.tasks.len(),
            })
        }
    }

    /// Moves splits from the pool onto task queues per the active policy.
    fn distribute(&mut self) {
        let on_discovery = self.assigner.assigns_on_discovery();
        let chunk = self.assigner.chunk_size(self.batch_size);

        while self.registry.unassigned_len() > 0 {
            let candidates: Vec<TaskLoad> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| on_discovery || t.awaiting)
                .map(|(idx, t)| t.load(idx))
                .collect();

            let Some(task) = self.assigner.select_task(&candidates) else {
                break;
            };

            for _ in 0..chunk {
                let Some(split) = self.registry.pop_unassigned() else {
                    break;
                };
                debug!(task, split = %split.id, "split assigned");
                let split = self.registry.record_assignment(split, task);
                self.tasks[task].pending.push_back(split);
                CoordinatorMetrics::incr(&self.metrics.splits_assigned);
            }
            if !on_discovery {
                self.tasks[task].awaiting = false;
            }
        }
    }
}
