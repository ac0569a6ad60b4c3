//! Job configuration types.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const MASK: &str = "******";

/// Top-level job definition, as read from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub version: String,
    pub job: String,
    pub reader: ConnectorRef,
    pub writer: ConnectorRef,
    #[serde(default)]
    pub settings: JobSettings,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub task_group: TaskGroupConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    /// Job handler run before the connectors are built.
    #[serde(default)]
    pub pre_handler: Option<ConnectorRef>,
    /// Job handler run after the connectors' `post`.
    #[serde(default)]
    pub post_handler: Option<ConnectorRef>,
}

/// A connector by registry name plus its opaque parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRef {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSettings {
    /// Desired number of concurrently running channels for the whole job.
    #[serde(default = "default_channel")]
    pub channel: usize,
    #[serde(default = "default_channels_per_group")]
    pub channels_per_group: usize,
    #[serde(default)]
    pub error_limit: ErrorLimitConfig,
    #[serde(default)]
    pub speed: SpeedConfig,
}

fn default_channel() -> usize {
    1
}
fn default_channels_per_group() -> usize {
    5
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            channels_per_group: default_channels_per_group(),
            error_limit: ErrorLimitConfig::default(),
            speed: SpeedConfig::default(),
        }
    }
}

/// Dirty-record tolerance. When `record` is set, `percentage` is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorLimitConfig {
    pub record: Option<u64>,
    pub percentage: Option<f64>,
}

/// Job-wide throughput targets, used to derive the channel count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeedConfig {
    /// Bytes per second for the whole job.
    pub byte: Option<u64>,
    /// Records per second for the whole job.
    pub record: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Maximum records buffered per channel.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Maximum payload bytes buffered per channel, e.g. `"8mb"`.
    #[serde(default = "default_byte_capacity")]
    pub byte_capacity: String,
    /// Records moved per batch push/pull.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Per-channel byte/s limit.
    pub byte_speed: Option<u64>,
    /// Per-channel record/s limit.
    pub record_speed: Option<u64>,
    #[serde(default = "default_flow_control_interval_ms")]
    pub flow_control_interval_ms: u64,
    /// Upper bound on a single blocking channel wait before re-checking cancellation.
    #[serde(default = "default_wait_tick_ms")]
    pub wait_tick_ms: u64,
}

fn default_capacity() -> usize {
    2048
}
fn default_byte_capacity() -> String {
    "8mb".to_string()
}
fn default_buffer_size() -> usize {
    32
}
fn default_flow_control_interval_ms() -> u64 {
    1000
}
fn default_wait_tick_ms() -> u64 {
    200
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            byte_capacity: default_byte_capacity(),
            buffer_size: default_buffer_size(),
            byte_speed: None,
            record_speed: None,
            flow_control_interval_ms: default_flow_control_interval_ms(),
            wait_tick_ms: default_wait_tick_ms(),
        }
    }
}

impl TransportConfig {
    /// Parsed `byte_capacity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the size string is malformed.
    pub fn byte_capacity_bytes(&self) -> Result<u64> {
        parse_byte_size(&self.byte_capacity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskGroupConfig {
    #[serde(default = "default_group_sleep_ms")]
    pub sleep_interval_ms: u64,
    #[serde(default = "default_group_report_ms")]
    pub report_interval_ms: u64,
    #[serde(default)]
    pub fail_over: FailOverConfig,
}

fn default_group_sleep_ms() -> u64 {
    100
}
fn default_group_report_ms() -> u64 {
    10_000
}

impl Default for TaskGroupConfig {
    fn default() -> Self {
        Self {
            sleep_interval_ms: default_group_sleep_ms(),
            report_interval_ms: default_group_report_ms(),
            fail_over: FailOverConfig::default(),
        }
    }
}

/// In-place retry policy for tasks whose writer supports fail-over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailOverConfig {
    /// Total attempts per task, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay before a failed task is restarted.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}
fn default_retry_interval_ms() -> u64 {
    10_000
}
fn default_max_wait_ms() -> u64 {
    60_000
}

impl Default for FailOverConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_sleep_ms")]
    pub sleep_interval_ms: u64,
    #[serde(default = "default_scheduler_report_ms")]
    pub report_interval_ms: u64,
}

fn default_scheduler_sleep_ms() -> u64 {
    1_000
}
fn default_scheduler_report_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_interval_ms: default_scheduler_sleep_ms(),
            report_interval_ms: default_scheduler_report_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// A task whose read counter stalls this long is marked failed.
    #[serde(default = "default_hang_expiry_secs")]
    pub hang_expiry_secs: u64,
}

fn default_hang_expiry_secs() -> u64 {
    48 * 60 * 60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            hang_expiry_secs: default_hang_expiry_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    /// Dirty records logged in full per task before logging goes quiet.
    #[serde(default = "default_max_dirty_logged")]
    pub max_dirty_logged: u64,
}

fn default_max_dirty_logged() -> u64 {
    128
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_dirty_logged: default_max_dirty_logged(),
        }
    }
}

/// Parse a human-readable byte size like `"8mb"`, `"512 KB"`, or `"1024"`.
///
/// Units are binary (1kb = 1024 bytes).
///
/// # Errors
///
/// Returns an error for empty input, unknown units, or overflow.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        bail!("empty byte size");
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid byte size '{input}'"))?;
    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1024,
        "mb" | "m" => 1024 * 1024,
        "gb" | "g" => 1024 * 1024 * 1024,
        other => bail!("unknown byte size unit '{other}' in '{input}'"),
    };
    value
        .checked_mul(multiplier)
        .with_context(|| format!("byte size '{input}' overflows"))
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.ends_with("password") || key.ends_with("accesskey")
}

/// Copy of `value` with credential-like fields replaced by a mask.
pub fn mask_sensitive(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let masked = if is_sensitive_key(k) && !v.is_null() {
                        serde_json::Value::String(MASK.to_string())
                    } else {
                        mask_sensitive(v)
                    };
                    (k.clone(), masked)
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(mask_sensitive).collect())
        }
        other => other.clone(),
    }
}
