//! Engine error model and fail-over backoff helpers.

use std::time::Duration;

use conduit_sdk::ConnectorError;
use conduit_types::{ErrorCategory, Failure};

use crate::channel::ChannelError;

// ---------------------------------------------------------------------------
// EngineError: categorised errors surfaced by job execution
// ---------------------------------------------------------------------------

/// Categorized engine error.
///
/// Every variant maps to an [`ErrorCategory`], which in turn fixes the
/// operator-facing code and the CLI exit status.
#[derive(Debug)]
pub enum EngineError {
    /// Typed error raised by connector code.
    Connector(ConnectorError),
    /// Transport failure between a reader and a writer.
    Channel(ChannelError),
    /// Connector lookup or construction failed.
    PluginInit(String),
    /// Reader and writer split into incompatible task lists.
    PluginSplit(String),
    /// Dirty-record tolerance exceeded.
    DirtyDataLimitExceeded(String),
    /// A task, group, or the job ended with a captured failure cause.
    Failed(Failure),
    /// Job was killed on request.
    Killed,
    /// Infrastructure error (thread spawn, config, I/O, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connector(e) => write!(f, "{}", e),
            Self::Channel(e) => write!(f, "{}", e),
            Self::PluginInit(msg) => write!(f, "connector init failed: {}", msg),
            Self::PluginSplit(msg) => write!(f, "task split failed: {}", msg),
            Self::DirtyDataLimitExceeded(msg) => write!(f, "{}", msg),
            Self::Failed(failure) => write!(f, "{}", failure),
            Self::Killed => write!(f, "job killed"),
            Self::Infrastructure(e) => write!(f, "{:#}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ConnectorError> for EngineError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl From<ChannelError> for EngineError {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e)
    }
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connector(_) => ErrorCategory::Connector,
            Self::Channel(_) => ErrorCategory::Runtime,
            Self::PluginInit(_) => ErrorCategory::PluginInit,
            Self::PluginSplit(_) => ErrorCategory::PluginSplit,
            Self::DirtyDataLimitExceeded(_) => ErrorCategory::DirtyDataLimitExceeded,
            Self::Failed(failure) => failure.category,
            Self::Killed => ErrorCategory::Killed,
            Self::Infrastructure(_) => ErrorCategory::Runtime,
        }
    }

    /// Process exit status for a job that ended with this error.
    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// Serializable cause for the statistics tree.
    pub fn to_failure(&self) -> Failure {
        match self {
            Self::Failed(failure) => failure.clone(),
            other => Failure::new(other.category(), other.to_string()),
        }
    }
}

/// Delay before retry attempt `attempt` (1-based) of a failed task.
///
/// Exponential from `base`, capped at `max`.
pub(crate) fn compute_retry_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let exp = attempt.saturating_sub(1).min(32);
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exp));
    Duration::from_millis(delay_ms).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // EngineError tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_engine_error_from_anyhow() {
        let err: EngineError = anyhow::anyhow!("thread spawn failed").into();
        assert!(matches!(err, EngineError::Infrastructure(_)));
        assert_eq!(err.category(), ErrorCategory::Runtime);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_engine_error_from_connector() {
        let err: EngineError = ConnectorError::config("MISSING", "record_count is required").into();
        assert_eq!(err.category(), ErrorCategory::Connector);
        assert!(err.to_string().contains("MISSING"));
    }

    #[test]
    fn test_killed_exit_code() {
        assert_eq!(EngineError::Killed.exit_code(), 143);
        assert_eq!(EngineError::Killed.to_failure().category, ErrorCategory::Killed);
    }

    #[test]
    fn test_failed_preserves_failure() {
        let failure = Failure::new(ErrorCategory::PluginRuntime, "writer blew up");
        let err = EngineError::Failed(failure.clone());
        assert_eq!(err.to_failure(), failure);
        assert_eq!(err.to_string(), "[Framework-13] writer blew up");
    }

    #[test]
    fn test_split_error_category() {
        let err = EngineError::PluginSplit("reader 3 != writer 2".into());
        assert_eq!(err.to_failure().category, ErrorCategory::PluginSplit);
        assert!(err.to_string().contains("task split failed"));
    }

    // -----------------------------------------------------------------------
    // compute_retry_backoff tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(60);
        assert_eq!(compute_retry_backoff(base, max, 1), Duration::from_millis(100));
        assert_eq!(compute_retry_backoff(base, max, 2), Duration::from_millis(200));
        assert_eq!(compute_retry_backoff(base, max, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped() {
        let base = Duration::from_secs(10);
        let max = Duration::from_secs(60);
        assert_eq!(compute_retry_backoff(base, max, 20), max);
        assert_eq!(compute_retry_backoff(base, max, u32::MAX), max);
    }

    #[test]
    fn test_backoff_zero_attempt_is_base() {
        let base = Duration::from_millis(50);
        assert_eq!(
            compute_retry_backoff(base, Duration::from_secs(1), 0),
            Duration::from_millis(50)
        );
    }
}
