//! Framework error taxonomy.
//!
//! [`ErrorCategory`] classifies why a task, group, or job ended, and maps to
//! the stable code and process exit status the CLI reports. [`Failure`] is
//! the serializable cause carried through the statistics tree.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exit status reported when a job is killed.
pub const KILLED_EXIT_CODE: i32 = 143;

/// Broad classification of a framework failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid command-line or API argument.
    Argument,
    /// Unexpected engine runtime failure (panics, interrupted threads).
    Runtime,
    /// Invalid job configuration.
    Config,
    /// Connector could not be resolved or constructed.
    PluginInit,
    /// Connector failed while running a task.
    PluginRuntime,
    /// Dirty-record tolerance exceeded.
    DirtyDataLimitExceeded,
    /// Reader and writer split into incompatible task counts.
    PluginSplit,
    /// Job or task was killed on request.
    Killed,
    /// Typed error raised by connector code.
    Connector,
}

impl ErrorCategory {
    /// Stable, operator-facing error code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Argument => "Framework-01",
            Self::Runtime => "Framework-02",
            Self::Config => "Framework-03",
            Self::PluginInit => "Framework-12",
            Self::PluginRuntime => "Framework-13",
            Self::DirtyDataLimitExceeded => "Framework-14",
            Self::PluginSplit => "Framework-15",
            Self::Killed => "Framework-143",
            Self::Connector => "Connector",
        }
    }

    /// Process exit status for a job that ended with this category.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Killed => KILLED_EXIT_CODE,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Argument => "argument",
            Self::Runtime => "runtime",
            Self::Config => "config",
            Self::PluginInit => "plugin_init",
            Self::PluginRuntime => "plugin_runtime",
            Self::DirtyDataLimitExceeded => "dirty_data_limit_exceeded",
            Self::PluginSplit => "plugin_split",
            Self::Killed => "killed",
            Self::Connector => "connector",
        };
        f.write_str(s)
    }
}

/// Captured root cause of a failed task, group, or job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub category: ErrorCategory,
    pub message: String,
}

impl Failure {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Runtime, message)
    }

    pub fn killed(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Killed, message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category.code(), self.message)
    }
}

impl std::error::Error for Failure {}
