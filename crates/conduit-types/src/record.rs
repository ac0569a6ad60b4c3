//! Records and channel messages.
//!
//! A [`Record`] keeps its payload size and in-memory footprint up to date on
//! every column change so channel admission control stays O(1) per record.

use serde::Serialize;

use crate::column::Column;

/// Fixed per-record bookkeeping overhead counted toward `memory_size`.
pub const RECORD_HEAD: usize = 16;
/// Fixed per-column bookkeeping overhead counted toward `memory_size`.
pub const COLUMN_HEAD: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("column index {index} out of range for record of width {width}")]
    WidthExceeded { index: usize, width: usize },
}

/// An ordered row of [`Column`] values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    columns: Vec<Column>,
    #[serde(skip)]
    width: Option<usize>,
    byte_size: usize,
    memory_size: usize,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    /// An unsized record that grows as columns are pushed.
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            width: None,
            byte_size: 0,
            memory_size: RECORD_HEAD,
        }
    }

    /// A record whose column count is fixed at `width`.
    pub fn sized(width: usize) -> Self {
        Self {
            columns: Vec::with_capacity(width),
            width: Some(width),
            byte_size: 0,
            memory_size: RECORD_HEAD,
        }
    }

    pub fn push_column(&mut self, column: Column) -> Result<(), RecordError> {
        self.check_index(self.columns.len())?;
        self.account_add(&column);
        self.columns.push(column);
        Ok(())
    }

    /// Set column `index`, padding with `Null` when the record is shorter.
    pub fn set_column(&mut self, index: usize, column: Column) -> Result<(), RecordError> {
        self.check_index(index)?;
        while self.columns.len() < index {
            self.account_add(&Column::Null);
            self.columns.push(Column::Null);
        }
        if index == self.columns.len() {
            self.account_add(&column);
            self.columns.push(column);
        } else {
            let old = std::mem::replace(&mut self.columns[index], column);
            self.byte_size -= old.byte_size();
            self.memory_size -= old.byte_size();
            let new_size = self.columns[index].byte_size();
            self.byte_size += new_size;
            self.memory_size += new_size;
        }
        Ok(())
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Sum of column payload sizes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Estimated heap footprint including per-record and per-column heads.
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    fn check_index(&self, index: usize) -> Result<(), RecordError> {
        match self.width {
            Some(width) if index >= width => Err(RecordError::WidthExceeded { index, width }),
            _ => Ok(()),
        }
    }

    fn account_add(&mut self, column: &Column) {
        self.byte_size += column.byte_size();
        self.memory_size += COLUMN_HEAD + column.byte_size();
    }
}

impl From<Vec<Column>> for Record {
    fn from(columns: Vec<Column>) -> Self {
        let mut record = Self::new();
        for column in columns {
            record.account_add(&column);
            record.columns.push(column);
        }
        record
    }
}

/// Unit carried by a transport channel: a data record or end-of-stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Data(Record),
    Terminate,
}

impl Message {
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Data(record) => record.byte_size(),
            Self::Terminate => 0,
        }
    }

    pub fn memory_size(&self) -> usize {
        match self {
            Self::Data(record) => record.memory_size(),
            Self::Terminate => 0,
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Data(record) => Some(record),
            Self::Terminate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_track_push() {
        let mut record = Record::new();
        record.push_column(Column::Long(1)).unwrap();
        record.push_column(Column::String("abcd".into())).unwrap();
        assert_eq!(record.byte_size(), 12);
        assert_eq!(record.memory_size(), RECORD_HEAD + 2 * COLUMN_HEAD + 12);
    }

    #[test]
    fn test_set_column_replaces_footprint() {
        let mut record = Record::from(vec![Column::String("abcdef".into()), Column::Long(2)]);
        record.set_column(0, Column::Bool(true)).unwrap();
        assert_eq!(record.byte_size(), 1 + 8);
        assert_eq!(record.memory_size(), RECORD_HEAD + 2 * COLUMN_HEAD + 9);
        assert_eq!(record.column(0), Some(&Column::Bool(true)));
    }

    #[test]
    fn test_set_column_pads_with_null() {
        let mut record = Record::new();
        record.set_column(2, Column::Long(9)).unwrap();
        assert_eq!(record.len(), 3);
        assert!(record.column(0).unwrap().is_null());
        assert_eq!(record.byte_size(), 8);
        assert_eq!(record.memory_size(), RECORD_HEAD + 3 * COLUMN_HEAD + 8);
    }

    #[test]
    fn test_sized_record_rejects_extra_columns() {
        let mut record = Record::sized(1);
        record.push_column(Column::Long(1)).unwrap();
        let err = record.push_column(Column::Long(2)).unwrap_err();
        assert_eq!(err, RecordError::WidthExceeded { index: 1, width: 1 });
        assert!(record.set_column(3, Column::Null).is_err());
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_terminate_has_zero_size() {
        assert_eq!(Message::Terminate.byte_size(), 0);
        assert_eq!(Message::Terminate.memory_size(), 0);
        assert!(Message::Terminate.into_record().is_none());
    }

    #[test]
    fn test_record_serializes_columns() {
        let record = Record::from(vec![Column::Long(1)]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["columns"][0]["value"], 1);
        assert_eq!(json["byte_size"], 8);
    }
}
