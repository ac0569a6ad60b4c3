//! Typed column values and conversions.

use std::fmt;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a column, used when converting raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Null,
    Bool,
    Long,
    Double,
    String,
    Bytes,
    Date,
    Timestamp,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// A column value that cannot be represented as the requested kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert {from} column to {to}: {detail}")]
pub struct ConversionError {
    pub from: ColumnKind,
    pub to: ColumnKind,
    pub detail: String,
}

impl ConversionError {
    fn new(from: ColumnKind, to: ColumnKind, detail: impl Into<String>) -> Self {
        Self {
            from,
            to,
            detail: detail.into(),
        }
    }
}

/// Immutable typed scalar carried in a [`crate::Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Column {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl Column {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Null => ColumnKind::Null,
            Self::Bool(_) => ColumnKind::Bool,
            Self::Long(_) => ColumnKind::Long,
            Self::Double(_) => ColumnKind::Double,
            Self::String(_) => ColumnKind::String,
            Self::Bytes(_) => ColumnKind::Bytes,
            Self::Date(_) => ColumnKind::Date,
            Self::Timestamp(_) => ColumnKind::Timestamp,
        }
    }

    /// Estimated payload size in bytes, used for channel byte accounting.
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Long(_) | Self::Double(_) | Self::Date(_) | Self::Timestamp(_) => 8,
            Self::String(s) => s.len(),
            Self::Bytes(b) => b.len(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Build a column from a loosely typed JSON value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Long(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }

    fn fail(&self, to: ColumnKind, detail: impl Into<String>) -> ConversionError {
        ConversionError::new(self.kind(), to, detail)
    }

    pub fn as_bool(&self) -> Result<bool, ConversionError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Long(i) => Ok(*i != 0),
            Self::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(self.fail(ColumnKind::Bool, format!("'{other}' is not a boolean"))),
            },
            _ => Err(self.fail(ColumnKind::Bool, "unsupported")),
        }
    }

    pub fn as_long(&self) -> Result<i64, ConversionError> {
        match self {
            Self::Long(i) => Ok(*i),
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Double(d) if d.is_finite() => Ok(d.trunc() as i64),
            Self::Double(d) => Err(self.fail(ColumnKind::Long, format!("{d} is not finite"))),
            Self::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| self.fail(ColumnKind::Long, format!("'{s}': {e}"))),
            Self::Timestamp(ts) => Ok(ts.timestamp_millis()),
            _ => Err(self.fail(ColumnKind::Long, "unsupported")),
        }
    }

    pub fn as_double(&self) -> Result<f64, ConversionError> {
        match self {
            Self::Double(d) => Ok(*d),
            Self::Long(i) => Ok(*i as f64),
            Self::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| self.fail(ColumnKind::Double, format!("'{s}': {e}"))),
            _ => Err(self.fail(ColumnKind::Double, "unsupported")),
        }
    }

    pub fn as_string(&self) -> Result<String, ConversionError> {
        match self {
            Self::Null => Err(self.fail(ColumnKind::String, "value is null")),
            Self::Bool(b) => Ok(b.to_string()),
            Self::Long(i) => Ok(i.to_string()),
            Self::Double(d) => Ok(d.to_string()),
            Self::String(s) => Ok(s.clone()),
            Self::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|e| self.fail(ColumnKind::String, e.to_string())),
            Self::Date(d) => Ok(d.format("%Y-%m-%d").to_string()),
            Self::Timestamp(ts) => Ok(ts.to_rfc3339()),
        }
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>, ConversionError> {
        match self {
            Self::Bytes(b) => Ok(b.clone()),
            Self::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(self.fail(ColumnKind::Bytes, "unsupported")),
        }
    }

    pub fn as_date(&self) -> Result<NaiveDate, ConversionError> {
        match self {
            Self::Date(d) => Ok(*d),
            Self::Timestamp(ts) => Ok(ts.date_naive()),
            Self::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| self.fail(ColumnKind::Date, format!("'{s}': {e}"))),
            _ => Err(self.fail(ColumnKind::Date, "unsupported")),
        }
    }

    pub fn as_timestamp(&self) -> Result<DateTime<Utc>, ConversionError> {
        match self {
            Self::Timestamp(ts) => Ok(*ts),
            Self::Long(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| self.fail(ColumnKind::Timestamp, format!("{ms} out of range"))),
            Self::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| self.fail(ColumnKind::Timestamp, format!("'{s}': {e}"))),
            _ => Err(self.fail(ColumnKind::Timestamp, "unsupported")),
        }
    }

    /// Convert into a column of `kind`. `Null` converts to `Null` for every kind.
    pub fn convert(&self, kind: ColumnKind) -> Result<Column, ConversionError> {
        if self.is_null() {
            return Ok(Self::Null);
        }
        Ok(match kind {
            ColumnKind::Null => Self::Null,
            ColumnKind::Bool => Self::Bool(self.as_bool()?),
            ColumnKind::Long => Self::Long(self.as_long()?),
            ColumnKind::Double => Self::Double(self.as_double()?),
            ColumnKind::String => Self::String(self.as_string()?),
            ColumnKind::Bytes => Self::Bytes(self.as_bytes()?),
            ColumnKind::Date => Self::Date(self.as_date()?),
            ColumnKind::Timestamp => Self::Timestamp(self.as_timestamp()?),
        })
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            other => match other.as_string() {
                Ok(s) => f.write_str(&s),
                Err(_) => Ok(()),
            },
        }
    }
}
