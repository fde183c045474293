//! Source coordinator.
//!
//! [`SourceCoordinator`] is the single coordination authority of a source
//! instance. All shared state (split registry and queues, per-task
//! watermark status, the checkpoint gate) sits behind one lock, so every
//! assignment and drift decision sees a consistent view of the whole task
//! table. Task-facing calls never block; only
//! [`SourceCoordinator::on_checkpoint_trigger_requested`] suspends, and it
//! does so with the lock released.
//!
//! ## Coordination loop
//!
//! [`SourceCoordinator::run`] drives everything that is not a direct call:
//! - **Discovery**: a spawned task pulls split batches from the
//!   [`ScanPlanner`] and sends them over a bounded `mpsc` channel
//! - **Ticks**: watermark recompute and announcement, idle-timeout detection
//! - **Shutdown**: [`SourceCoordinator::shutdown`] declines any waiting
//!   checkpoint and stops the loop
//!
//! Pause/resume and announced watermarks reach readers through a per-task
//! `watch` channel ([`SourceCoordinator::subscribe`]) and are also returned
//! from the call that caused them.

/// Events from the discovery task.
pub mod event;

/// Split discovery task.
pub mod discovery_task;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use self::discovery_task::spawn_discovery_task;
use self::event::CoordinatorEvent;
use crate::checkpoint::gate::GateEntry;
use crate::checkpoint::{
    CheckpointDecision, CheckpointGate, CheckpointId, DeclineReason, EnumeratorCheckpoint,
};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::metrics::{CoordinatorMetrics, MetricsSnapshot};
use crate::planner::ScanPlanner;
use crate::split::{
    AddSplitsOutcome, SnapshotId, Split, SplitBatch, SplitEnumerator, SplitId, TaskLoad,
};
use crate::watermark::{AlignmentCommand, GroupKey, Watermark, WatermarkAligner};

/// Capacity of the discovery channel.
const DISCOVERY_CHANNEL_CAPACITY: usize = 16;

/// Control state pushed to one reader task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskControl {
    /// The task must stop consuming records.
    pub paused: bool,
    /// Latest aligned watermark of the task's group.
    pub aligned_watermark: Option<Watermark>,
}

/// Everything guarded by the coordinator lock.
struct CoordinatorState {
    enumerator: SplitEnumerator,
    aligner: WatermarkAligner,
    gate: CheckpointGate,
    controls: Vec<watch::Sender<TaskControl>>,
    last_enumerated_snapshot: Option<SnapshotId>,
    shut_down: bool,
}

impl CoordinatorState {
    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            Err(CoordinatorError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Pushes alignment decisions to the affected tasks' control channels.
    fn apply(&self, commands: &[AlignmentCommand]) {
        for command in commands {
            match command {
                AlignmentCommand::Pause { task } => {
                    self.controls[*task]
                        .send_if_modified(|c| !std::mem::replace(&mut c.paused, true));
                }
                AlignmentCommand::Resume { task } => {
                    self.controls[*task]
                        .send_if_modified(|c| std::mem::replace(&mut c.paused, false));
                }
                AlignmentCommand::AnnounceWatermark { group, watermark } => {
                    for (task, control) in self.controls.iter().enumerate() {
                        if self.aligner.group_of(task) == Some(group) {
                            control.send_modify(|c| c.aligned_watermark = Some(*watermark));
                        }
                    }
                }
            }
        }
    }

    fn snapshot_consumed(&mut self, snapshot_id: SnapshotId) {
        if self.gate.on_snapshot_consumed(snapshot_id).is_none() {
            debug!(snapshot_id, "snapshot consumed");
        }
    }
}

/// Coordinates split assignment, watermark alignment and checkpoint
/// alignment for one source instance.
///
/// Share it between reader tasks behind an [`Arc`].
pub struct SourceCoordinator {
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    metrics: Arc<CoordinatorMetrics>,
    shutdown: Notify,
}

impl SourceCoordinator {
    /// Creates a coordinator with an empty split registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Config`] if `config` is invalid.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(CoordinatorMetrics::default());
        let enumerator = SplitEnumerator::new(
            config.parallelism,
            config.split_batch_size,
            config.assign_mode,
            Arc::clone(&metrics),
        );
        info!(
            parallelism = config.parallelism,
            mode = %config.assign_mode,
            "Source coordinator created"
        );
        Ok(Self::with_enumerator(config, enumerator, None, metrics))
    }

    /// Rebuilds a coordinator from checkpointed state.
    ///
    /// The split registry and assignment record are restored exactly;
    /// watermark state starts fresh and is rebuilt as readers report.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Config`] for an invalid config, or a
    /// corruption error if the checkpointed registry violates its
    /// invariants. Source startup must abort in that case.
    pub fn restore(config: CoordinatorConfig, checkpoint: EnumeratorCheckpoint) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(CoordinatorMetrics::default());
        let unassigned = checkpoint.unassigned.len();
        let assigned = checkpoint.assignments.len();
        let enumerator = SplitEnumerator::restore(
            config.parallelism,
            config.split_batch_size,
            config.assign_mode,
            Arc::clone(&metrics),
            checkpoint.unassigned,
            checkpoint.assignments,
        )
        .inspect_err(|e| warn!(error = %e, "Enumerator restore failed"))?;
        info!(
            checkpoint_id = checkpoint.checkpoint_id,
            unassigned,
            assigned,
            last_enumerated_snapshot = ?checkpoint.last_enumerated_snapshot,
            "Source coordinator restored"
        );
        Ok(Self::with_enumerator(
            config,
            enumerator,
            checkpoint.last_enumerated_snapshot,
            metrics,
        ))
    }

    /// Rebuilds a coordinator from encoded checkpoint state.
    ///
    /// # Errors
    ///
    /// See [`EnumeratorCheckpoint::from_bytes`] and [`Self::restore`].
    pub fn restore_from_bytes(config: CoordinatorConfig, bytes: &[u8]) -> Result<Self> {
        Self::restore(config, EnumeratorCheckpoint::from_bytes(bytes)?)
    }

    fn with_enumerator(
        config: CoordinatorConfig,
        enumerator: SplitEnumerator,
        last_enumerated_snapshot: Option<SnapshotId>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        let aligner = WatermarkAligner::new(&config, Arc::clone(&metrics));
        let gate = CheckpointGate::new(
            config.checkpoint_align_enabled,
            config.checkpoint_align_timeout,
        );
        let controls = (0..config.parallelism)
            .map(|_| watch::Sender::new(TaskControl::default()))
            .collect();

        Self {
            state: Mutex::new(CoordinatorState {
                enumerator,
                aligner,
                gate,
                controls,
                last_enumerated_snapshot,
                shut_down: false,
            }),
            config,
            metrics,
            shutdown: Notify::new(),
        }
    }

    /// The configuration this coordinator was built with.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Point-in-time metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // -- Splits --------------------------------------------------------------

    /// Adds newly discovered splits. Duplicates are dropped and logged.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Shutdown`] after shutdown.
    pub fn add_splits(&self, splits: Vec<Split>) -> Result<AddSplitsOutcome> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        Ok(state.enumerator.add_splits(splits))
    }

    /// Hands up to `max_batch_size` splits to `task`. Empty means the task
    /// has nothing to read right now.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn request_splits(&self, task: usize, max_batch_size: usize) -> Result<Vec<Split>> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.enumerator.request_splits(task, max_batch_size)
    }

    /// Records that `task` finished `split`. Accounting only.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn notify_task_finished_split(&self, task: usize, split: &SplitId) -> Result<bool> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.enumerator.notify_task_finished_split(task, split)
    }

    /// Returns unfinished splits of a failed reader to its own queue.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn add_splits_back(&self, task: usize, splits: &[SplitId]) -> Result<usize> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.enumerator.add_splits_back(task, splits)
    }

    // -- Task lifecycle -------------------------------------------------------

    /// Registers (or re-registers) a reader task and resets its watermark
    /// state. Returns how many splits are queued for it.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn register_task(&self, task: usize) -> Result<usize> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        let queued = state.enumerator.register_task(task)?;
        state.aligner.register_task(task)?;
        let aligned_watermark = state.aligner.aligned_watermark(task);
        state.controls[task].send_replace(TaskControl {
            paused: false,
            aligned_watermark,
        });
        info!(task, queued, "Reader task registered");
        Ok(queued)
    }

    /// Marks a reader task as shut down. Its splits stay assigned to it;
    /// its watermark no longer holds its group back.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn unregister_task(&self, task: usize) -> Result<Vec<AlignmentCommand>> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.enumerator.unregister_task(task)?;
        let commands = state.aligner.unregister_task(task)?;
        state.controls[task].send_replace(TaskControl::default());
        state.apply(&commands);
        info!(task, "Reader task unregistered");
        Ok(commands)
    }

    /// Subscribes to the control channel of `task`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn subscribe(&self, task: usize) -> Result<watch::Receiver<TaskControl>> {
        let state = self.state.lock();
        state
            .controls
            .get(task)
            .map(watch::Sender::subscribe)
            .ok_or(CoordinatorError::UnknownTask {
                task,
                parallelism: self.config.parallelism,
            })
    }

    // -- Watermarks -----------------------------------------------------------

    /// Records a local watermark of `task`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn report_watermark(
        &self,
        task: usize,
        watermark: Watermark,
    ) -> Result<Vec<AlignmentCommand>> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        let commands = state
            .aligner
            .report_watermark(task, watermark, Instant::now())?;
        state.apply(&commands);
        Ok(commands)
    }

    /// Marks `task` idle.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] or
    /// [`CoordinatorError::Shutdown`].
    pub fn report_idle(&self, task: usize) -> Result<Vec<AlignmentCommand>> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        let commands = state.aligner.report_idle(task)?;
        state.apply(&commands);
        Ok(commands)
    }

    /// Runs one alignment tick: idle-timeout detection and, when batching,
    /// group recompute and announcement. Called by [`Self::run`].
    pub fn tick(&self) -> Vec<AlignmentCommand> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Vec::new();
        }
        let commands = state.aligner.tick(Instant::now());
        state.apply(&commands);
        commands
    }

    // -- Checkpoints ----------------------------------------------------------

    /// Decides whether checkpoint `checkpoint_id` may proceed.
    ///
    /// With alignment enabled and no snapshot consumed since the last
    /// completed checkpoint, waits until one is consumed or the alignment
    /// timeout elapses. A timeout declines the checkpoint; it never hangs.
    pub async fn on_checkpoint_trigger_requested(
        &self,
        checkpoint_id: CheckpointId,
    ) -> CheckpointDecision {
        let entry = {
            let mut state = self.state.lock();
            state.gate.begin(checkpoint_id, Instant::now())
        };

        let decision = match entry {
            GateEntry::Decided(decision) => decision,
            GateEntry::Wait(mut trigger) => {
                let waited = tokio::time::timeout_at(trigger.deadline, &mut trigger.rx).await;
                match waited {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(_)) => CheckpointDecision::decline(DeclineReason::Shutdown),
                    Err(_) => {
                        let expired = {
                            let mut state = self.state.lock();
                            state.gate.expire(checkpoint_id)
                        };
                        if expired {
                            CheckpointDecision::decline(DeclineReason::Timeout)
                        } else {
                            // Resolved between the deadline and the lock.
                            trigger
                                .rx
                                .try_recv()
                                .unwrap_or(CheckpointDecision::decline(DeclineReason::Shutdown))
                        }
                    }
                }
            }
        };

        match decision {
            CheckpointDecision::Proceed => {
                CoordinatorMetrics::incr(&self.metrics.checkpoints_proceeded);
                info!(checkpoint_id, "Checkpoint trigger proceeds");
            }
            CheckpointDecision::Decline {
                reason: DeclineReason::Timeout,
            } => {
                CoordinatorMetrics::incr(&self.metrics.checkpoints_timed_out);
                warn!(
                    checkpoint_id,
                    timeout = ?self.config.checkpoint_align_timeout,
                    "Checkpoint declined: no snapshot consumed before alignment timeout"
                );
            }
            CheckpointDecision::Decline { reason } => {
                CoordinatorMetrics::incr(&self.metrics.checkpoints_declined);
                warn!(checkpoint_id, %reason, "Checkpoint declined");
            }
        }
        decision
    }

    /// Signals that every split of `snapshot_id` has been enumerated,
    /// releasing a waiting checkpoint trigger.
    pub fn on_snapshot_consumed(&self, snapshot_id: SnapshotId) {
        self.state.lock().snapshot_consumed(snapshot_id);
    }

    /// A checkpoint completed; the next trigger waits for a new snapshot.
    pub fn notify_checkpoint_complete(&self, checkpoint_id: CheckpointId) {
        self.state.lock().gate.notify_checkpoint_complete(checkpoint_id);
    }

    /// A checkpoint was aborted. Accounting only.
    pub fn notify_checkpoint_aborted(&self, checkpoint_id: CheckpointId) {
        debug!(checkpoint_id, "Checkpoint aborted");
    }

    /// Captures the persisted enumerator state for `checkpoint_id`.
    #[must_use]
    pub fn snapshot_state(&self, checkpoint_id: CheckpointId) -> EnumeratorCheckpoint {
        let state = self.state.lock();
        let (unassigned, assignments) = state.enumerator.snapshot();
        EnumeratorCheckpoint::new(
            checkpoint_id,
            unassigned,
            assignments,
            state.last_enumerated_snapshot,
        )
    }

    // -- Introspection --------------------------------------------------------

    /// Recorded local watermark of a task.
    #[must_use]
    pub fn local_watermark(&self, task: usize) -> Option<Watermark> {
        self.state.lock().aligner.local_watermark(task)
    }

    /// Global watermark of an alignment group.
    #[must_use]
    pub fn group_watermark(&self, group: &GroupKey) -> Option<Watermark> {
        self.state.lock().aligner.group_watermark(group)
    }

    /// Whether a task is paused.
    #[must_use]
    pub fn is_paused(&self, task: usize) -> bool {
        self.state.lock().aligner.is_paused(task)
    }

    /// Whether a task is idle.
    #[must_use]
    pub fn is_idle(&self, task: usize) -> bool {
        self.state.lock().aligner.is_idle(task)
    }

    /// Current split load of a task.
    #[must_use]
    pub fn task_load(&self, task: usize) -> Option<TaskLoad> {
        self.state.lock().enumerator.task_load(task)
    }

    /// Ids owned by a task, in assignment order.
    #[must_use]
    pub fn assigned_splits(&self, task: usize) -> Vec<SplitId> {
        self.state.lock().enumerator.assigned_splits(task)
    }

    /// Number of splits still in the unassigned pool.
    #[must_use]
    pub fn unassigned_len(&self) -> usize {
        self.state.lock().enumerator.registry().unassigned_len()
    }

    // -- Loop -----------------------------------------------------------------

    /// Runs the coordination loop until [`Self::shutdown`].
    ///
    /// Positions `planner` after the last enumerated snapshot, spawns the
    /// discovery task, and processes discovered batches and alignment ticks.
    /// Returns the planner once the discovery task has stopped.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Planner`] if the planner cannot be
    /// restored, or [`CoordinatorError::Shutdown`] if already shut down.
    pub async fn run(&self, mut planner: Box<dyn ScanPlanner>) -> Result<Box<dyn ScanPlanner>> {
        let last_enumerated = {
            let state = self.state.lock();
            state.ensure_running()?;
            state.last_enumerated_snapshot
        };
        planner.restore(last_enumerated).await?;

        let (tx, mut rx) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
        let discovery = spawn_discovery_task(
            planner,
            tx,
            self.config.discovery_interval,
            Arc::clone(&self.metrics),
        );
        let mut ticker = tick_period(&self.config).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        info!(
            parallelism = self.config.parallelism,
            tick = ?tick_period(&self.config),
            "Source coordinator started"
        );

        let mut discovery_open = true;
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.notified() => {
                    info!("Source coordinator shutdown signal received");
                    break;
                }

                event = rx.recv(), if discovery_open => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            debug!("Discovery channel closed");
                            discovery_open = false;
                        }
                    }
                }

                () = next_tick(ticker.as_mut()) => {
                    self.tick();
                }
            }
        }

        discovery.shutdown.notify_one();
        // Unblocks a send parked on a full channel.
        drop(rx);
        let planner = discovery.join.await.map_err(|e| {
            CoordinatorError::Planner(format!("discovery task failed: {e}"))
        })?;
        info!("Source coordinator stopped");
        Ok(planner)
    }

    fn handle_event(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Discovered(batch) => self.add_batch(batch),
            CoordinatorEvent::PlannerError { message } => {
                warn!(error = %message, "Split discovery failed, retrying");
            }
            CoordinatorEvent::Exhausted => {
                info!("Scan planner exhausted");
            }
        }
    }

    /// Adds a discovered batch and, when it closes a snapshot, records the
    /// snapshot as enumerated and consumed.
    fn add_batch(&self, batch: SplitBatch) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        let outcome = state.enumerator.add_splits(batch.splits);
        debug!(
            snapshot_id = ?batch.snapshot_id,
            added = outcome.added,
            duplicates = outcome.duplicates,
            "Splits discovered"
        );
        if batch.end_of_snapshot {
            if let Some(snapshot_id) = batch.snapshot_id {
                state.last_enumerated_snapshot = Some(snapshot_id);
                state.snapshot_consumed(snapshot_id);
            }
        }
    }

    /// Stops the coordination loop and declines any waiting checkpoint.
    /// Later calls fail with [`CoordinatorError::Shutdown`].
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.gate.shutdown();
        }
        self.shutdown.notify_one();
        info!("Source coordinator shutting down");
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl std::fmt::Debug for SourceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCoordinator")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

/// Period of alignment ticks: the announce interval, tightened to half the
/// idle timeout when that is shorter. `None` if nothing needs ticking.
fn tick_period(config: &CoordinatorConfig) -> Option<Duration> {
    let announce = (!config.announce_interval.is_zero()).then_some(config.announce_interval);
    let idle = config
        .idle_timeout
        .map(|t| (t / 2).max(Duration::from_millis(1)));
    match (announce, idle) {
        (Some(a), Some(i)) => Some(a.min(i)),
        (a, i) => a.or(i),
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::SplitAssignMode;

    fn splits(n: usize) -> Vec<Split> {
        (0..n)
            .map(|i| Split::new(format!("s{i}"), i as u64))
            .collect()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CoordinatorConfig {
            parallelism: 0,
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            SourceCoordinator::new(config),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[test]
    fn test_tick_period() {
        assert_eq!(
            tick_period(&CoordinatorConfig::default()),
            Some(Duration::from_secs(1))
        );
        let no_ticks = CoordinatorConfig {
            announce_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        assert_eq!(tick_period(&no_ticks), None);
        let idle = CoordinatorConfig {
            idle_timeout: Some(Duration::from_millis(600)),
            ..CoordinatorConfig::default()
        };
        assert_eq!(tick_period(&idle), Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_calls_after_shutdown_fail() {
        let coord = SourceCoordinator::new(CoordinatorConfig::default()).unwrap();
        coord.shutdown();
        assert!(coord.is_shut_down());
        assert!(matches!(
            coord.add_splits(splits(1)),
            Err(CoordinatorError::Shutdown)
        ));
        assert!(matches!(
            coord.request_splits(0, 1),
            Err(CoordinatorError::Shutdown)
        ));
        assert!(matches!(
            coord.report_watermark(0, Watermark::new(1)),
            Err(CoordinatorError::Shutdown)
        ));
    }

    #[test]
    fn test_control_channel_follows_pause_and_resume() {
        let config = CoordinatorConfig {
            parallelism: 2,
            alignment_group: Some("g".into()),
            max_drift: Some(Duration::from_secs(5)),
            announce_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        let coord = SourceCoordinator::new(config).unwrap();
        let rx0 = coord.subscribe(0).unwrap();
        let rx1 = coord.subscribe(1).unwrap();

        coord.report_watermark(0, Watermark::new(100_000)).unwrap();
        coord.report_watermark(1, Watermark::new(92_000)).unwrap();
        assert!(rx0.borrow().paused);
        assert_eq!(rx1.borrow().aligned_watermark, Some(Watermark::new(92_000)));

        coord.report_watermark(1, Watermark::new(96_000)).unwrap();
        assert!(!rx0.borrow().paused);
        assert_eq!(rx0.borrow().aligned_watermark, Some(Watermark::new(96_000)));
    }

    #[test]
    fn test_register_resets_control() {
        let config = CoordinatorConfig {
            parallelism: 2,
            alignment_group: Some("g".into()),
            max_drift: Some(Duration::from_secs(5)),
            announce_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        let coord = SourceCoordinator::new(config).unwrap();
        let rx0 = coord.subscribe(0).unwrap();
        coord.report_watermark(0, Watermark::new(100_000)).unwrap();
        coord.report_watermark(1, Watermark::new(50_000)).unwrap();
        assert!(rx0.borrow().paused);

        coord.register_task(0).unwrap();
        assert!(!rx0.borrow().paused);
        assert!(!coord.is_paused(0));
        assert_eq!(coord.local_watermark(0), None);
    }

    #[test]
    fn test_subscribe_unknown_task() {
        let coord = SourceCoordinator::new(CoordinatorConfig::default()).unwrap();
        assert!(matches!(
            coord.subscribe(5),
            Err(CoordinatorError::UnknownTask {
                task: 5,
                parallelism: 1
            })
        ));
    }

    #[test]
    fn test_snapshot_state_round_trips_through_restore() {
        let config = CoordinatorConfig {
            parallelism: 2,
            assign_mode: SplitAssignMode::Fair,
            split_batch_size: 1,
            ..CoordinatorConfig::default()
        };
        let coord = SourceCoordinator::new(config.clone()).unwrap();
        coord.add_splits(splits(4)).unwrap();
        coord.request_splits(0, 1).unwrap();

        let bytes = coord.snapshot_state(3).to_bytes().unwrap();
        let restored = SourceCoordinator::restore_from_bytes(config, &bytes).unwrap();
        for task in 0..2 {
            assert_eq!(restored.assigned_splits(task), coord.assigned_splits(task));
        }
        assert_eq!(restored.task_load(0), coord.task_load(0));
    }
}
