//! Source coordinator configuration.
//!
//! Provides [`CoordinatorConfig`], the immutable startup parameters of a
//! [`SourceCoordinator`](crate::coordinator::SourceCoordinator): split
//! assignment mode and batch size, watermark emission and alignment,
//! idle detection, and checkpoint alignment.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};
use crate::split::SplitAssignMode;
use crate::watermark::WatermarkEmitStrategy;

/// Option key: split assignment mode.
pub const SPLIT_ASSIGN_MODE: &str = "scan.split-enumerator.mode";
/// Option key: maximum splits handed out per request.
pub const SPLIT_BATCH_SIZE: &str = "scan.split-enumerator.batch-size";
/// Option key: watermark emission strategy.
pub const WATERMARK_EMIT_STRATEGY: &str = "scan.watermark.emit.strategy";
/// Option key: watermark alignment group.
pub const WATERMARK_ALIGNMENT_GROUP: &str = "scan.watermark.alignment.group";
/// Option key: maximum drift inside an alignment group.
pub const WATERMARK_ALIGNMENT_MAX_DRIFT: &str = "scan.watermark.alignment.max-drift";
/// Option key: interval between aligned-watermark announcements.
pub const WATERMARK_ALIGNMENT_UPDATE_INTERVAL: &str = "scan.watermark.alignment.update-interval";
/// Option key: watermark idle timeout.
pub const WATERMARK_IDLE_TIMEOUT: &str = "scan.watermark.idle-timeout";
/// Option key: checkpoint alignment switch.
pub const CHECKPOINT_ALIGN_ENABLED: &str = "source.checkpoint-align.enabled";
/// Option key: checkpoint alignment timeout.
pub const CHECKPOINT_ALIGN_TIMEOUT: &str = "source.checkpoint-align.timeout";
/// Option key: how often the scan planner is polled for new splits.
pub const DISCOVERY_INTERVAL: &str = "continuous.discovery-interval";
/// Option key: source parallelism override.
pub const SCAN_PARALLELISM: &str = "scan.parallelism";

// ---------------------------------------------------------------------------
// Serde helpers: Duration as milliseconds
// ---------------------------------------------------------------------------

/// Encodes a [`Duration`] as a `u64` millisecond count.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Encodes an optional [`Duration`] as an optional millisecond count.
mod opt_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation, clippy::ref_option)]
    pub fn serialize<S>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

// ---------------------------------------------------------------------------
// Default helpers
// ---------------------------------------------------------------------------

/// Default parallelism: a single reader.
const fn default_parallelism() -> usize {
    1
}

/// Default splits per request: 10.
const fn default_split_batch_size() -> usize {
    10
}

/// Default announce interval: 1 second.
const fn default_announce_interval() -> Duration {
    Duration::from_secs(1)
}

/// Default discovery interval: 10 seconds.
const fn default_discovery_interval() -> Duration {
    Duration::from_secs(10)
}

/// Default checkpoint alignment timeout: 30 seconds.
const fn default_checkpoint_align_timeout() -> Duration {
    Duration::from_secs(30)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Startup parameters of a source coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of reader tasks, indexed `0..parallelism`.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Split assignment policy.
    #[serde(default)]
    pub assign_mode: SplitAssignMode,

    /// Maximum splits handed to a task per request.
    #[serde(default = "default_split_batch_size")]
    pub split_batch_size: usize,

    /// When readers report local watermarks.
    #[serde(default)]
    pub emit_strategy: WatermarkEmitStrategy,

    /// Source-wide alignment group. `None` disables drift enforcement
    /// for tasks without an override.
    #[serde(default)]
    pub alignment_group: Option<String>,

    /// Per-task alignment group overrides (task index → group).
    #[serde(default)]
    pub task_alignment_groups: BTreeMap<usize, String>,

    /// Maximum allowed drift inside an alignment group.
    #[serde(default, with = "opt_duration_millis")]
    pub max_drift: Option<Duration>,

    /// How often aligned watermarks are recomputed and announced.
    ///
    /// Zero recomputes on every report.
    #[serde(default = "default_announce_interval", with = "duration_millis")]
    pub announce_interval: Duration,

    /// Silence after which a task is considered idle. `None` disables
    /// idle detection.
    #[serde(default, with = "opt_duration_millis")]
    pub idle_timeout: Option<Duration>,

    /// Pause between scan planner polls that found nothing new.
    #[serde(default = "default_discovery_interval", with = "duration_millis")]
    pub discovery_interval: Duration,

    /// Whether checkpoint triggers wait for a consumed snapshot.
    #[serde(default)]
    pub checkpoint_align_enabled: bool,

    /// Upper bound on how long a checkpoint trigger waits.
    #[serde(
        default = "default_checkpoint_align_timeout",
        with = "duration_millis"
    )]
    pub checkpoint_align_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            assign_mode: SplitAssignMode::default(),
            split_batch_size: default_split_batch_size(),
            emit_strategy: WatermarkEmitStrategy::default(),
            alignment_group: None,
            task_alignment_groups: BTreeMap::new(),
            max_drift: None,
            announce_interval: default_announce_interval(),
            idle_timeout: None,
            discovery_interval: default_discovery_interval(),
            checkpoint_align_enabled: false,
            checkpoint_align_timeout: default_checkpoint_align_timeout(),
        }
    }
}

impl CoordinatorConfig {
    /// Builds a config from a flat option map.
    ///
    /// `parallelism` is used unless the map sets `scan.parallelism`.
    /// Unknown keys are silently ignored (forward compatibility). The
    /// result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Config`] if a value cannot be parsed or
    /// the resulting config is invalid.
    pub fn from_options(options: &HashMap<String, String>, parallelism: usize) -> Result<Self> {
        let get = |key: &str| options.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let parallelism = match get(SCAN_PARALLELISM) {
            Some(v) => parse_usize(SCAN_PARALLELISM, v)?,
            None => parallelism,
        };
        let assign_mode = get(SPLIT_ASSIGN_MODE)
            .map(str::parse::<SplitAssignMode>)
            .transpose()?
            .unwrap_or_default();
        let split_batch_size = match get(SPLIT_BATCH_SIZE) {
            Some(v) => parse_usize(SPLIT_BATCH_SIZE, v)?,
            None => default_split_batch_size(),
        };
        let emit_strategy = get(WATERMARK_EMIT_STRATEGY)
            .map(str::parse::<WatermarkEmitStrategy>)
            .transpose()?
            .unwrap_or_default();
        let alignment_group = get(WATERMARK_ALIGNMENT_GROUP).map(ToString::to_string);
        let max_drift = get(WATERMARK_ALIGNMENT_MAX_DRIFT)
            .map(|v| parse_duration(WATERMARK_ALIGNMENT_MAX_DRIFT, v))
            .transpose()?;
        let announce_interval = match get(WATERMARK_ALIGNMENT_UPDATE_INTERVAL) {
            Some(v) => parse_duration(WATERMARK_ALIGNMENT_UPDATE_INTERVAL, v)?,
            None => default_announce_interval(),
        };
        let idle_timeout = get(WATERMARK_IDLE_TIMEOUT)
            .map(|v| parse_duration(WATERMARK_IDLE_TIMEOUT, v))
            .transpose()?;
        let discovery_interval = match get(DISCOVERY_INTERVAL) {
            Some(v) => parse_duration(DISCOVERY_INTERVAL, v)?,
            None => default_discovery_interval(),
        };
        let checkpoint_align_enabled = match get(CHECKPOINT_ALIGN_ENABLED) {
            Some(v) => parse_bool(CHECKPOINT_ALIGN_ENABLED, v)?,
            None => false,
        };
        let checkpoint_align_timeout = match get(CHECKPOINT_ALIGN_TIMEOUT) {
            Some(v) => parse_duration(CHECKPOINT_ALIGN_TIMEOUT, v)?,
            None => default_checkpoint_align_timeout(),
        };

        let config = Self {
            parallelism,
            assign_mode,
            split_batch_size,
            emit_strategy,
            alignment_group,
            task_alignment_groups: BTreeMap::new(),
            max_drift,
            announce_interval,
            idle_timeout,
            discovery_interval,
            checkpoint_align_enabled,
            checkpoint_align_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(CoordinatorError::Config(
                "parallelism must be greater than 0".into(),
            ));
        }
        if self.split_batch_size == 0 {
            return Err(CoordinatorError::Config(format!(
                "'{SPLIT_BATCH_SIZE}' must be greater than 0"
            )));
        }
        let has_group =
            self.alignment_group.is_some() || !self.task_alignment_groups.is_empty();
        if has_group && self.max_drift.is_none() {
            return Err(CoordinatorError::Config(format!(
                "'{WATERMARK_ALIGNMENT_GROUP}' requires '{WATERMARK_ALIGNMENT_MAX_DRIFT}'"
            )));
        }
        if self.discovery_interval.is_zero() {
            return Err(CoordinatorError::Config(format!(
                "'{DISCOVERY_INTERVAL}' must be greater than 0"
            )));
        }
        if self.checkpoint_align_enabled && self.checkpoint_align_timeout.is_zero() {
            return Err(CoordinatorError::Config(format!(
                "'{CHECKPOINT_ALIGN_TIMEOUT}' must be greater than 0 \
                 when checkpoint alignment is enabled"
            )));
        }
        if let Some((&task, _)) = self
            .task_alignment_groups
            .range(self.parallelism..)
            .next()
        {
            return Err(CoordinatorError::Config(format!(
                "alignment group override for task {task} outside parallelism {}",
                self.parallelism
            )));
        }
        Ok(())
    }

    /// Alignment group of `task`, if any.
    #[must_use]
    pub fn group_for(&self, task: usize) -> Option<&str> {
        self.task_alignment_groups
            .get(&task)
            .or(self.alignment_group.as_ref())
            .map(String::as_str)
    }

    /// Sets a per-task alignment group override.
    #[must_use]
    pub fn with_task_group(mut self, task: usize, group: impl Into<String>) -> Self {
        self.task_alignment_groups.insert(task, group.into());
        self
    }
}

/// Parses a duration option value.
///
/// A bare number is milliseconds; otherwise `<number><unit>` with units
/// such as `ms`, `s`, `min`, `h`, `d` (long forms accepted). Whitespace
/// between number and unit is allowed.
///
/// # Errors
///
/// Returns [`CoordinatorError::Config`] naming `key` on malformed input.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    let compact: String = value.split_whitespace().collect();
    humantime::parse_duration(&compact).map_err(|e| {
        CoordinatorError::Config(format!("invalid duration for '{key}': {value} ({e})"))
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| CoordinatorError::Config(format!("invalid integer for '{key}': {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CoordinatorError::Config(format!(
            "invalid boolean for '{key}': {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::from_options(&HashMap::new(), 4).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.assign_mode, SplitAssignMode::Fair);
        assert_eq!(config.split_batch_size, 10);
        assert_eq!(config.emit_strategy, WatermarkEmitStrategy::OnEvent);
        assert_eq!(config.alignment_group, None);
        assert_eq!(config.max_drift, None);
        assert_eq!(config.announce_interval, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.discovery_interval, Duration::from_secs(10));
        assert!(!config.checkpoint_align_enabled);
        assert_eq!(config.checkpoint_align_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_all_keys() {
        let opts = options(&[
            (SPLIT_ASSIGN_MODE, "PREEMPTIVE"),
            (SPLIT_BATCH_SIZE, "2"),
            (WATERMARK_EMIT_STRATEGY, "on_periodic"),
            (WATERMARK_ALIGNMENT_GROUP, "orders"),
            (WATERMARK_ALIGNMENT_MAX_DRIFT, "5 s"),
            (WATERMARK_ALIGNMENT_UPDATE_INTERVAL, "250ms"),
            (WATERMARK_IDLE_TIMEOUT, "1min"),
            (DISCOVERY_INTERVAL, "500"),
            (CHECKPOINT_ALIGN_ENABLED, "TRUE"),
            (CHECKPOINT_ALIGN_TIMEOUT, "45s"),
            (SCAN_PARALLELISM, "3"),
            ("some.unknown.key", "whatever"),
        ]);
        let config = CoordinatorConfig::from_options(&opts, 8).unwrap();
        assert_eq!(config.parallelism, 3);
        assert_eq!(config.assign_mode, SplitAssignMode::Preemptive);
        assert_eq!(config.split_batch_size, 2);
        assert_eq!(config.emit_strategy, WatermarkEmitStrategy::OnPeriodic);
        assert_eq!(config.alignment_group.as_deref(), Some("orders"));
        assert_eq!(config.max_drift, Some(Duration::from_secs(5)));
        assert_eq!(config.announce_interval, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.discovery_interval, Duration::from_millis(500));
        assert!(config.checkpoint_align_enabled);
        assert_eq!(config.checkpoint_align_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("k", "1500").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("k", "2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("k", "1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("k", "10 seconds").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("k", "soon").is_err());
    }

    #[test]
    fn test_invalid_values() {
        let bad_bool = options(&[(CHECKPOINT_ALIGN_ENABLED, "yes")]);
        assert!(CoordinatorConfig::from_options(&bad_bool, 1).is_err());

        let bad_mode = options(&[(SPLIT_ASSIGN_MODE, "random")]);
        assert!(CoordinatorConfig::from_options(&bad_mode, 1).is_err());

        let bad_size = options(&[(SPLIT_BATCH_SIZE, "-1")]);
        assert!(CoordinatorConfig::from_options(&bad_size, 1).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(CoordinatorConfig::default().validate().is_ok());

        let zero_parallelism = CoordinatorConfig {
            parallelism: 0,
            ..CoordinatorConfig::default()
        };
        assert!(zero_parallelism.validate().is_err());

        let zero_batch = CoordinatorConfig {
            split_batch_size: 0,
            ..CoordinatorConfig::default()
        };
        assert!(zero_batch.validate().is_err());

        let group_without_drift = CoordinatorConfig {
            alignment_group: Some("g".into()),
            ..CoordinatorConfig::default()
        };
        let err = group_without_drift.validate().unwrap_err();
        assert_eq!(err.code(), crate::error::INVALID_CONFIG);

        let zero_timeout = CoordinatorConfig {
            checkpoint_align_enabled: true,
            checkpoint_align_timeout: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let bad_override = CoordinatorConfig {
            parallelism: 2,
            max_drift: Some(Duration::from_secs(1)),
            ..CoordinatorConfig::default()
        }
        .with_task_group(2, "g");
        assert!(bad_override.validate().is_err());
    }

    #[test]
    fn test_group_for() {
        let config = CoordinatorConfig {
            parallelism: 3,
            alignment_group: Some("all".into()),
            max_drift: Some(Duration::from_secs(5)),
            ..CoordinatorConfig::default()
        }
        .with_task_group(1, "special");
        assert_eq!(config.group_for(0), Some("all"));
        assert_eq!(config.group_for(1), Some("special"));
        assert_eq!(CoordinatorConfig::default().group_for(0), None);
    }

    #[test]
    fn test_serde_durations_as_millis() {
        let config = CoordinatorConfig {
            max_drift: Some(Duration::from_secs(5)),
            ..CoordinatorConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["max_drift"], 5000);
        assert_eq!(json["checkpoint_align_timeout"], 30_000);

        let back: CoordinatorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
