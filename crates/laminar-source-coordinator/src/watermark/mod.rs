//! # Watermarks
//!
//! Event-time progress for source readers and its alignment across tasks.
//!
//! ## Concepts
//!
//! - **Watermark**: Assertion that no events with timestamp < watermark will arrive
//! - **Emit strategy**: When a reader reports its local watermark
//!   (per record, or on the periodic tick)
//! - **Alignment**: Bounding how far one reader's watermark may run ahead of
//!   the slowest reader in its group, see [`alignment`]
//!
//! All timestamps are milliseconds since the epoch.

/// Cross-task watermark alignment.
pub mod alignment;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

pub use alignment::{AlignmentCommand, AlignmentPhase, GroupKey, WatermarkAligner};

/// A watermark indicating event time progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(pub i64);

impl Watermark {
    /// Creates a new watermark
    #[must_use]
    pub const fn new(timestamp: i64) -> Self {
        Self(timestamp)
    }

    /// Gets the watermark timestamp
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Watermark generator that tracks event time progress
pub trait WatermarkGenerator: Send {
    /// Process an event timestamp and potentially emit a new watermark
    fn on_event(&mut self, timestamp: i64) -> Option<Watermark>;

    /// Called periodically to emit watermarks based on wall clock time
    fn on_periodic(&mut self) -> Option<Watermark>;
}

/// Watermark generator with bounded out-of-orderness
pub struct BoundedOutOfOrdernessGenerator {
    max_out_of_orderness: i64,
    current_max_timestamp: i64,
}

impl BoundedOutOfOrdernessGenerator {
    /// Creates a new generator allowing events to be at most `max_out_of_orderness` late
    #[must_use]
    pub fn new(max_out_of_orderness: i64) -> Self {
        Self {
            max_out_of_orderness,
            current_max_timestamp: i64::MIN,
        }
    }
}

impl WatermarkGenerator for BoundedOutOfOrdernessGenerator {
    fn on_event(&mut self, timestamp: i64) -> Option<Watermark> {
        if timestamp > self.current_max_timestamp {
            self.current_max_timestamp = timestamp;
            let watermark = timestamp.saturating_sub(self.max_out_of_orderness);
            Some(Watermark::new(watermark))
        } else {
            None
        }
    }

    fn on_periodic(&mut self) -> Option<Watermark> {
        // Bounded out-of-orderness only advances on events
        None
    }
}

/// When a reader reports its local watermark to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkEmitStrategy {
    /// Emit on the periodic watermark tick.
    OnPeriodic,
    /// Emit per record.
    #[default]
    OnEvent,
}

impl WatermarkEmitStrategy {
    /// Builds the emit policy for this strategy.
    #[must_use]
    pub fn policy(self) -> Box<dyn EmitPolicy> {
        match self {
            Self::OnPeriodic => Box::new(OnPeriodic),
            Self::OnEvent => Box::new(OnEvent),
        }
    }
}

impl fmt::Display for WatermarkEmitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnPeriodic => write!(f, "on-periodic"),
            Self::OnEvent => write!(f, "on-event"),
        }
    }
}

impl FromStr for WatermarkEmitStrategy {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "on-periodic" => Ok(Self::OnPeriodic),
            "on-event" => Ok(Self::OnEvent),
            other => Err(CoordinatorError::Config(format!(
                "invalid watermark emit strategy '{other}': expected 'on-event' or 'on-periodic'"
            ))),
        }
    }
}

/// Something that happened on the reader that may warrant a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitEvent {
    /// A record with this event time was read.
    Record(i64),
    /// The periodic watermark timer fired.
    PeriodicTick,
}

/// Decides whether a reader reports its watermark on a given event.
pub trait EmitPolicy: Send + fmt::Debug {
    /// Whether to report on `event`.
    fn should_emit(&self, event: &EmitEvent) -> bool;
}

/// Report on every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnEvent;

impl EmitPolicy for OnEvent {
    fn should_emit(&self, event: &EmitEvent) -> bool {
        matches!(event, EmitEvent::Record(_))
    }
}

/// Report on the periodic tick only.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnPeriodic;

impl EmitPolicy for OnPeriodic {
    fn should_emit(&self, event: &EmitEvent) -> bool {
        matches!(event, EmitEvent::PeriodicTick)
    }
}

/// Reader-side helper combining a generator with an emit policy.
///
/// Returns the watermark to pass to `report_watermark`, or `None` when
/// nothing should be reported. Reported watermarks never go backwards
/// and are never repeated.
pub struct TaskWatermarkEmitter {
    generator: Box<dyn WatermarkGenerator>,
    policy: Box<dyn EmitPolicy>,
    current: Option<Watermark>,
    last_emitted: Option<Watermark>,
}

impl TaskWatermarkEmitter {
    /// Creates an emitter for the given strategy.
    #[must_use]
    pub fn new(strategy: WatermarkEmitStrategy, generator: Box<dyn WatermarkGenerator>) -> Self {
        Self {
            generator,
            policy: strategy.policy(),
            current: None,
            last_emitted: None,
        }
    }

    /// Feeds a record's event time.
    pub fn on_record(&mut self, timestamp: i64) -> Option<Watermark> {
        if let Some(wm) = self.generator.on_event(timestamp) {
            self.advance(wm);
        }
        if self.policy.should_emit(&EmitEvent::Record(timestamp)) {
            self.take_emit()
        } else {
            None
        }
    }

    /// Feeds the periodic tick.
    pub fn on_periodic(&mut self) -> Option<Watermark> {
        if let Some(wm) = self.generator.on_periodic() {
            self.advance(wm);
        }
        if self.policy.should_emit(&EmitEvent::PeriodicTick) {
            self.take_emit()
        } else {
            None
        }
    }

    /// Latest generated watermark, reported or not.
    #[must_use]
    pub fn current(&self) -> Option<Watermark> {
        self.current
    }

    fn advance(&mut self, wm: Watermark) {
        if self.current.is_none_or(|c| wm > c) {
            self.current = Some(wm);
        }
    }

    fn take_emit(&mut self) -> Option<Watermark> {
        let current = self.current?;
        if self.last_emitted.is_some_and(|last| last >= current) {
            return None;
        }
        self.last_emitted = Some(current);
        Some(current)
    }
}

impl fmt::Debug for TaskWatermarkEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWatermarkEmitter")
            .field("policy", &self.policy)
            .field("current", &self.current)
            .field("last_emitted", &self.last_emitted)
            .finish_non_exhaustive()
    }
}
