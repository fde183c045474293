//! Watermark alignment across reader tasks.
//!
//! Tasks are partitioned into alignment groups. Each group tracks its
//! global watermark: the minimum local watermark over the non-idle tasks
//! that have reported, clamped so it never goes backwards. A task whose
//! local watermark runs more than `max_drift` ahead of its group is paused
//! until the group catches up.
//!
//! ## Group phases
//!
//! ```text
//! Unbounded ──(every active member reported or idle)──▶ Aligned
//! ```
//!
//! A group has no global watermark while `Unbounded`. Drift is only
//! enforced in `Aligned`, and only for named groups. Tasks
//! without an alignment group share the default group, whose watermark is
//! still computed and announced but never enforced.
//!
//! ## Batching
//!
//! With a non-zero announce interval, reports only update task state and
//! the group is recomputed on [`WatermarkAligner::tick`]. With a zero
//! interval every report recomputes its group immediately.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Watermark;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::metrics::CoordinatorMetrics;

/// Identifies an alignment group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    /// Tasks without a configured group. Never drift-enforced.
    Default,
    /// A named, drift-enforced group.
    Named(String),
}

impl GroupKey {
    /// Key for an optional group name.
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        name.map_or(Self::Default, |n| Self::Named(n.to_string()))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "<default>"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Phase of an alignment group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentPhase {
    /// Not every member has reported yet; no global watermark and no
    /// drift enforcement.
    Unbounded,
    /// Drift enforcement active.
    Aligned,
}

/// Instruction produced by the aligner for reader tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentCommand {
    /// Stop consuming records.
    Pause {
        /// Target task.
        task: usize,
    },
    /// Continue consuming records.
    Resume {
        /// Target task.
        task: usize,
    },
    /// A group's global watermark advanced.
    AnnounceWatermark {
        /// The group.
        group: GroupKey,
        /// Its new global watermark.
        watermark: Watermark,
    },
}

#[derive(Debug)]
struct TaskState {
    group: usize,
    local: Option<Watermark>,
    idle: bool,
    paused: bool,
    active: bool,
    /// Last report, or when idle-timeout tracking started.
    last_activity: Option<Instant>,
}

impl TaskState {
    fn new(group: usize) -> Self {
        Self {
            group,
            local: None,
            idle: false,
            paused: false,
            active: true,
            last_activity: None,
        }
    }

    fn reset(&mut self) {
        self.local = None;
        self.idle = false;
        self.paused = false;
        self.last_activity = None;
    }

    /// Contributes to the group minimum.
    fn is_reporting(&self) -> bool {
        self.active && !self.idle && self.local.is_some()
    }
}

#[derive(Debug)]
struct GroupState {
    key: GroupKey,
    members: Vec<usize>,
    /// `None` for the default group.
    max_drift_ms: Option<i64>,
    phase: AlignmentPhase,
    global: Option<Watermark>,
    announced: Option<Watermark>,
}

/// Aggregates per-task watermark reports into per-group aligned watermarks
/// and decides pause/resume.
#[derive(Debug)]
pub struct WatermarkAligner {
    tasks: Vec<TaskState>,
    groups: Vec<GroupState>,
    batched: bool,
    idle_timeout: Option<Duration>,
    metrics: Arc<CoordinatorMetrics>,
}

impl WatermarkAligner {
    /// Builds groups from the config's alignment settings.
    #[must_use]
    pub fn new(config: &CoordinatorConfig, metrics: Arc<CoordinatorMetrics>) -> Self {
        let max_drift_ms = config
            .max_drift
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

        let mut groups: Vec<GroupState> = Vec::new();
        let mut tasks = Vec::with_capacity(config.parallelism);
        for task in 0..config.parallelism {
            let key = GroupKey::from_name(config.group_for(task));
            let idx = if let Some(idx) = groups.iter().position(|g| g.key == key) {
                idx
            } else {
                groups.push(GroupState {
                    max_drift_ms: match key {
                        GroupKey::Default => None,
                        GroupKey::Named(_) => max_drift_ms,
                    },
                    key,
                    members: Vec::new(),
                    phase: AlignmentPhase::Unbounded,
                    global: None,
                    announced: None,
                });
                groups.len() - 1
            };
            groups[idx].members.push(task);
            tasks.push(TaskState::new(idx));
        }

        Self {
            tasks,
            groups,
            batched: !config.announce_interval.is_zero(),
            idle_timeout: config.idle_timeout,
            metrics,
        }
    }

    /// Records a local watermark report from `task`.
    ///
    /// A report lower than the task's previous watermark is clamped (the
    /// recorded value never regresses) and counted. Any report clears the
    /// task's idle flag.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn report_watermark(
        &mut self,
        task: usize,
        watermark: Watermark,
        now: Instant,
    ) -> Result<Vec<AlignmentCommand>> {
        self.check_task(task)?;
        let state = &mut self.tasks[task];
        state.active = true;
        state.last_activity = Some(now);
        if state.idle {
            debug!(task, "task active again");
            state.idle = false;
        }
        let recorded = state.local;
        match recorded {
            Some(prev) if watermark < prev => {
                CoordinatorMetrics::incr(&self.metrics.watermark_regressions);
                warn!(
                    task,
                    reported = watermark.timestamp(),
                    recorded = prev.timestamp(),
                    "watermark regressed, keeping previous value"
                );
            }
            _ => state.local = Some(watermark),
        }

        let group = state.group;
        Ok(self.after_update(group))
    }

    /// Marks `task` idle, excluding it from its group's minimum.
    ///
    /// An idle task that was paused is resumed: it no longer takes part in
    /// drift enforcement.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn report_idle(&mut self, task: usize) -> Result<Vec<AlignmentCommand>> {
        self.check_task(task)?;
        let mut commands = Vec::new();
        self.mark_idle(task, &mut commands);
        let group = self.tasks[task].group;
        commands.extend(self.after_update(group));
        Ok(commands)
    }

    /// Periodic work: idle-timeout detection and, when batching, group
    /// recompute and announcement.
    pub fn tick(&mut self, now: Instant) -> Vec<AlignmentCommand> {
        let mut commands = Vec::new();
        let mut touched = vec![false; self.groups.len()];

        if let Some(timeout) = self.idle_timeout {
            for task in 0..self.tasks.len() {
                let state = &mut self.tasks[task];
                if !state.active || state.idle || state.paused {
                    continue;
                }
                let Some(since) = state.last_activity else {
                    state.last_activity = Some(now);
                    continue;
                };
                if now.saturating_duration_since(since) > timeout {
                    debug!(task, ?timeout, "task idle after timeout");
                    touched[state.group] = true;
                    self.mark_idle(task, &mut commands);
                }
            }
        }

        for group in 0..self.groups.len() {
            if self.batched || touched[group] {
                commands.extend(self.recompute(group));
            }
        }
        commands
    }

    /// Resets the ephemeral watermark state of a (re-)registering task.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn register_task(&mut self, task: usize) -> Result<()> {
        self.check_task(task)?;
        let state = &mut self.tasks[task];
        state.reset();
        state.active = true;
        Ok(())
    }

    /// Removes a shut-down task from its group so it no longer holds the
    /// group back.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownTask`] for an out-of-range task.
    pub fn unregister_task(&mut self, task: usize) -> Result<Vec<AlignmentCommand>> {
        self.check_task(task)?;
        let state = &mut self.tasks[task];
        state.reset();
        state.active = false;
        let group = state.group;
        Ok(self.after_update(group))
    }

    /// Recorded local watermark of a task.
    #[must_use]
    pub fn local_watermark(&self, task: usize) -> Option<Watermark> {
        self.tasks.get(task).and_then(|t| t.local)
    }

    /// Whether a task is idle.
    #[must_use]
    pub fn is_idle(&self, task: usize) -> bool {
        self.tasks.get(task).is_some_and(|t| t.idle)
    }

    /// Whether a task is paused.
    #[must_use]
    pub fn is_paused(&self, task: usize) -> bool {
        self.tasks.get(task).is_some_and(|t| t.paused)
    }

    /// Alignment group of a task.
    #[must_use]
    pub fn group_of(&self, task: usize) -> Option<&GroupKey> {
        self.tasks.get(task).map(|t| &self.groups[t.group].key)
    }

    /// Global watermark of a group. `None` until the group is aligned.
    #[must_use]
    pub fn group_watermark(&self, key: &GroupKey) -> Option<Watermark> {
        self.group(key).and_then(|g| g.global)
    }

    /// Phase of a group.
    #[must_use]
    pub fn group_phase(&self, key: &GroupKey) -> Option<AlignmentPhase> {
        self.group(key).map(|g| g.phase)
    }

    /// Global watermark of the group `task` belongs to.
    #[must_use]
    pub fn aligned_watermark(&self, task: usize) -> Option<Watermark> {
        self.tasks.get(task).and_then(|t| self.groups[t.group].global)
    }

    /// All group keys.
    pub fn groups(&self) -> impl Iterator<Item = &GroupKey> {
        self.groups.iter().map(|g| &g.key)
    }

    fn group(&self, key: &GroupKey) -> Option<&GroupState> {
        self.groups.iter().find(|g| &g.key == key)
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

    fn mark_idle(&mut self, task: usize, commands: &mut Vec<AlignmentCommand>) {
        let state = &mut self.tasks[task];
        state.idle = true;
        if state.paused {
            state.paused = false;
            CoordinatorMetrics::incr(&self.metrics.resumes);
            info!(task, "resuming idle task");
            commands.push(AlignmentCommand::Resume { task });
        }
    }

    fn after_update(&mut self, group: usize) -> Vec<AlignmentCommand> {
        if self.batched {
            Vec::new()
        } else {
            self.recompute(group)
        }
    }

    /// Recomputes a group's global watermark and drift decisions.
    fn recompute(&mut self, group_idx: usize) -> Vec<AlignmentCommand> {
        let mut commands = Vec::new();
        let group = &mut self.groups[group_idx];
        let tasks = &mut self.tasks;

        if group.phase == AlignmentPhase::Unbounded
            && group
                .members
                .iter()
                .map(|&t| &tasks[t])
                .filter(|t| t.active)
                .all(|t| t.local.is_some() || t.idle)
            && group.members.iter().any(|&t| tasks[t].active)
        {
            group.phase = AlignmentPhase::Aligned;
            info!(group = %group.key, "all members reported, alignment active");
        }
        if group.phase == AlignmentPhase::Unbounded {
            return commands;
        }

        let Some(min) = group
            .members
            .iter()
            .filter(|&&t| tasks[t].is_reporting())
            .filter_map(|&t| tasks[t].local)
            .min()
        else {
            return commands;
        };

        let global = match group.global {
            Some(prev) if min < prev => prev,
            _ => min,
        };
        group.global = Some(global);

        if let (Some(max_drift), AlignmentPhase::Aligned) = (group.max_drift_ms, group.phase) {
            for &task in &group.members {
                let state = &mut tasks[task];
                if !state.is_reporting() {
                    continue;
                }
                let Some(local) = state.local else {
                    continue;
                };
                let drift = local.timestamp().saturating_sub(global.timestamp());
                if drift > max_drift && !state.paused {
                    state.paused = true;
                    CoordinatorMetrics::incr(&self.metrics.pauses);
                    info!(
                        task,
                        group = %group.key,
                        drift_ms = drift,
                        "pausing task over max drift"
                    );
                    commands.push(AlignmentCommand::Pause { task });
                } else if drift <= max_drift && state.paused {
                    state.paused = false;
                    CoordinatorMetrics::incr(&self.metrics.resumes);
                    info!(
                        task,
                        group = %group.key,
                        drift_ms = drift,
                        "resuming task within max drift"
                    );
                    commands.push(AlignmentCommand::Resume { task });
                }
            }
        }

        if group.announced != Some(global) {
            group.announced = Some(global);
            debug!(
                group = %group.key,
                watermark = global.timestamp(),
                "aligned watermark advanced"
            );
            commands.push(AlignmentCommand::AnnounceWatermark {
                group: group.key.clone(),
                watermark: global,
            });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000;

    fn aligner(config: &CoordinatorConfig) -> WatermarkAligner {
        WatermarkAligner::new(config, Arc::new(CoordinatorMetrics::default()))
    }

    fn grouped(parallelism: usize, max_drift_secs: u64) -> CoordinatorConfig {
        CoordinatorConfig {
            parallelism,
            alignment_group: Some("g".into()),
            max_drift: Some(Duration::from_secs(max_drift_secs)),
            announce_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        }
    }

    fn wm(secs: i64) -> Watermark {
        Watermark::new(secs * SEC)
    }

    fn key() -> GroupKey {
        GroupKey::Named("g".into())
    }

    #[test]
    fn test_pause_then_resume_on_catch_up() {
        let mut a = aligner(&grouped(2, 5));
        let now = Instant::now();

        let cmds = a.report_watermark(0, wm(100), now).unwrap();
        // Task 1 has not reported: nothing enforced yet.
        assert!(!cmds.contains(&AlignmentCommand::Pause { task: 0 }));
        assert_eq!(a.group_phase(&key()), Some(AlignmentPhase::Unbounded));

        let cmds = a.report_watermark(1, wm(92), now).unwrap();
        assert_eq!(a.group_phase(&key()), Some(AlignmentPhase::Aligned));
        assert_eq!(a.group_watermark(&key()), Some(wm(92)));
        assert!(cmds.contains(&AlignmentCommand::Pause { task: 0 }));
        assert!(a.is_paused(0));

        let cmds = a.report_watermark(1, wm(96), now).unwrap();
        assert_eq!(a.group_watermark(&key()), Some(wm(96)));
        assert!(cmds.contains(&AlignmentCommand::Resume { task: 0 }));
        assert!(cmds.contains(&AlignmentCommand::AnnounceWatermark {
            group: key(),
            watermark: wm(96),
        }));
        assert!(!a.is_paused(0));
    }

    #[test]
    fn test_regression_is_clamped() {
        let metrics = Arc::new(CoordinatorMetrics::default());
        let mut a = WatermarkAligner::new(&grouped(1, 5), Arc::clone(&metrics));
        let now = Instant::now();

        a.report_watermark(0, wm(50), now).unwrap();
        a.report_watermark(0, wm(40), now).unwrap();
        assert_eq!(a.local_watermark(0), Some(wm(50)));
        assert_eq!(metrics.snapshot().watermark_regressions, 1);
    }

    #[test]
    fn test_idle_task_never_lowers_group() {
        let mut a = aligner(&grouped(3, 5));
        let now = Instant::now();

        a.report_watermark(0, wm(10), now).unwrap();
        a.report_idle(1).unwrap();
        a.report_watermark(2, wm(12), now).unwrap();
        assert_eq!(a.group_watermark(&key()), Some(wm(10)));

        a.report_idle(0).unwrap();
        assert_eq!(a.group_watermark(&key()), Some(wm(12)));

        // Coming back with an older watermark does not move the group back.
        a.report_watermark(0, wm(11), now).unwrap();
        assert_eq!(a.group_watermark(&key()), Some(wm(12)));
    }

    #[test]
    fn test_idle_report_resumes_paused_task() {
        let mut a = aligner(&grouped(2, 5));
        let now = Instant::now();
        a.report_watermark(0, wm(100), now).unwrap();
        a.report_watermark(1, wm(90), now).unwrap();
        assert!(a.is_paused(0));

        let cmds = a.report_idle(0).unwrap();
        assert_eq!(cmds, vec![AlignmentCommand::Resume { task: 0 }]);
        assert!(!a.is_paused(0));
    }

    #[test]
    fn test_default_group_is_not_enforced() {
        let config = CoordinatorConfig {
            parallelism: 2,
            max_drift: Some(Duration::from_secs(1)),
            announce_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        let mut a = aligner(&config);
        let now = Instant::now();
        a.report_watermark(0, wm(100), now).unwrap();
        let cmds = a.report_watermark(1, wm(1), now).unwrap();

        assert!(!a.is_paused(0));
        assert_eq!(a.group_watermark(&GroupKey::Default), Some(wm(1)));
        assert_eq!(
            cmds,
            vec![AlignmentCommand::AnnounceWatermark {
                group: GroupKey::Default,
                watermark: wm(1),
            }]
        );
    }

    #[test]
    fn test_groups_are_independent() {
        let config = CoordinatorConfig {
            parallelism: 4,
            max_drift: Some(Duration::from_secs(5)),
            announce_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        }
        .with_task_group(0, "a")
        .with_task_group(1, "a")
        .with_task_group(2, "b")
        .with_task_group(3, "b");
        let mut a = aligner(&config);
        let now = Instant::now();

        a.report_watermark(0, wm(100), now).unwrap();
        a.report_watermark(1, wm(99), now).unwrap();
        a.report_watermark(2, wm(10), now).unwrap();
        a.report_watermark(3, wm(30), now).unwrap();

        assert_eq!(a.group_watermark(&GroupKey::Named("a".into())), Some(wm(99)));
        assert_eq!(a.group_watermark(&GroupKey::Named("b".into())), Some(wm(10)));
        assert!(!a.is_paused(0));
        assert!(a.is_paused(3));
    }

    #[test]
    fn test_batched_reports_apply_on_tick() {
        let config = CoordinatorConfig {
            announce_interval: Duration::from_secs(1),
            ..grouped(2, 5)
        };
        let mut a = aligner(&config);
        let now = Instant::now();

        assert!(a.report_watermark(0, wm(100), now).unwrap().is_empty());
        assert!(a.report_watermark(1, wm(90), now).unwrap().is_empty());
        assert_eq!(a.group_watermark(&key()), None);

        let cmds = a.tick(now);
        assert!(cmds.contains(&AlignmentCommand::Pause { task: 0 }));
        assert_eq!(a.group_watermark(&key()), Some(wm(90)));

        // Nothing changed since: no repeated announcement.
        assert!(a.tick(now).is_empty());
    }

    #[test]
    fn test_idle_timeout_marks_silent_task() {
        let config = CoordinatorConfig {
            idle_timeout: Some(Duration::from_secs(10)),
            ..grouped(2, 5)
        };
        let mut a = aligner(&config);
        let start = Instant::now();

        a.report_watermark(0, wm(20), start).unwrap();
        a.report_watermark(1, wm(18), start).unwrap();
        assert_eq!(a.group_watermark(&key()), Some(wm(18)));

        a.report_watermark(0, wm(30), start + Duration::from_secs(8)).unwrap();
        a.tick(start + Duration::from_secs(11));
        assert!(a.is_idle(1));
        assert!(!a.is_idle(0));
        assert_eq!(a.group_watermark(&key()), Some(wm(30)));
    }

    #[test]
    fn test_paused_task_is_exempt_from_idle_timeout() {
        let config = CoordinatorConfig {
            idle_timeout: Some(Duration::from_secs(10)),
            ..grouped(2, 5)
        };
        let mut a = aligner(&config);
        let start = Instant::now();
        a.report_watermark(0, wm(100), start).unwrap();
        a.report_watermark(1, wm(90), start).unwrap();
        assert!(a.is_paused(0));

        a.report_watermark(1, wm(91), start + Duration::from_secs(20)).unwrap();
        a.tick(start + Duration::from_secs(21));
        assert!(!a.is_idle(0));
        assert!(a.is_paused(0));
    }

    #[test]
    fn test_unregister_releases_group() {
        let mut a = aligner(&grouped(2, 5));
        let now = Instant::now();
        a.report_watermark(0, wm(100), now).unwrap();
        a.report_watermark(1, wm(90), now).unwrap();
        assert!(a.is_paused(0));

        let cmds = a.unregister_task(1).unwrap();
        assert!(cmds.contains(&AlignmentCommand::Resume { task: 0 }));
        assert_eq!(a.group_watermark(&key()), Some(wm(100)));
    }

    #[test]
    fn test_unknown_task() {
        let mut a = aligner(&grouped(1, 5));
        assert!(matches!(
            a.report_watermark(3, wm(1), Instant::now()),
            Err(CoordinatorError::UnknownTask { task: 3, parallelism: 1 })
        ));
        assert!(a.report_idle(1).is_err());
    }
}
