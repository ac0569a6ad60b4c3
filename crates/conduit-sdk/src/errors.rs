//! Structured error model for connector operations.
//!
//! [`ConnectorError`] carries a kind, a short machine-readable code, and a
//! human-readable message. Construct via the kind-specific factory methods.

use std::fmt;

use conduit_types::{ConversionError, RecordError};
use serde::{Deserialize, Serialize};

/// Broad classification of a connector error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ConnectorErrorKind {
    /// Invalid connector configuration.
    Config,
    /// Invalid or unconvertible data.
    Data,
    /// I/O failure talking to the external system.
    Io,
    /// Internal connector error.
    Internal,
    /// The task was cancelled while waiting on the transport.
    Cancelled,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Data => "data",
            Self::Io => "io",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Structured error from a connector operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {code}: {message}")]
pub struct ConnectorError {
    pub kind: ConnectorErrorKind,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ConnectorError {
    fn new(kind: ConnectorErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Config, code, message)
    }

    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Data, code, message)
    }

    #[must_use]
    pub fn io(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Io, code, message)
    }

    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Internal, code, message)
    }

    #[must_use]
    pub fn cancelled(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Cancelled, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ConnectorErrorKind::Cancelled
    }
}

impl From<ConversionError> for ConnectorError {
    fn from(e: ConversionError) -> Self {
        Self::data("CONVERSION_FAILED", e.to_string())
    }
}

impl From<RecordError> for ConnectorError {
    fn from(e: RecordError) -> Self {
        Self::data("RECORD_WIDTH", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::{Column, ColumnKind};

    #[test]
    fn test_display_format() {
        let err = ConnectorError::config("MISSING_FIELD", "record_count is required");
        assert_eq!(
            err.to_string(),
            "[config] MISSING_FIELD: record_count is required"
        );
    }

    #[test]
    fn test_from_conversion_error_is_data() {
        let conv = Column::String("x".into()).convert(ColumnKind::Long).unwrap_err();
        let err: ConnectorError = conv.into();
        assert_eq!(err.kind, ConnectorErrorKind::Data);
        assert_eq!(err.code, "CONVERSION_FAILED");
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(ConnectorError::cancelled("ABORTED", "channel aborted").is_cancelled());
        assert!(!ConnectorError::io("EOF", "eof").is_cancelled());
    }

    #[test]
    fn test_details_serialized_only_when_present() {
        let err = ConnectorError::internal("X", "y");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("details").is_none());
        let err = err.with_details(serde_json::json!({"row": 3}));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["details"]["row"], 3);
    }
}
