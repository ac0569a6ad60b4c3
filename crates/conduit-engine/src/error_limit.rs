//! Dirty-record tolerance checks.

use conduit_types::Communication;

use crate::config::types::ErrorLimitConfig;
use crate::errors::EngineError;

/// Applies the job's dirty-record tolerance to an aggregate snapshot.
///
/// An absolute record limit, when configured, takes precedence and disables
/// the percentage limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorRecordChecker {
    record_limit: Option<u64>,
    percentage_limit: Option<f64>,
}

impl ErrorRecordChecker {
    pub fn new(config: &ErrorLimitConfig) -> Self {
        let percentage_limit = match (config.record, config.percentage) {
            (Some(record), Some(percentage)) => {
                tracing::debug!(
                    record,
                    percentage,
                    "Record error limit set; percentage limit ignored"
                );
                None
            }
            (_, percentage) => percentage,
        };
        Self {
            record_limit: config.record,
            percentage_limit,
        }
    }

    pub fn record_limit(&self) -> Option<u64> {
        self.record_limit
    }

    pub fn percentage_limit(&self) -> Option<f64> {
        self.percentage_limit
    }

    /// # Errors
    ///
    /// Returns [`EngineError::DirtyDataLimitExceeded`] when the total dirty
    /// record count exceeds the record limit.
    pub fn check_record_limit(&self, communication: &Communication) -> Result<(), EngineError> {
        let Some(limit) = self.record_limit else {
            return Ok(());
        };
        let errors = communication.total_error_records();
        if errors > limit {
            return Err(EngineError::DirtyDataLimitExceeded(format!(
                "dirty records exceed the limit: {errors} records collected, {limit} allowed"
            )));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`EngineError::DirtyDataLimitExceeded`] when records have been
    /// read and the dirty share exceeds the percentage limit.
    pub fn check_percentage_limit(&self, communication: &Communication) -> Result<(), EngineError> {
        let Some(limit) = self.percentage_limit else {
            return Ok(());
        };
        let total = communication.total_read_records();
        if total == 0 {
            return Ok(());
        }
        let errors = communication.total_error_records();
        let ratio = errors as f64 / total as f64;
        if ratio > limit {
            return Err(EngineError::DirtyDataLimitExceeded(format!(
                "dirty record ratio {ratio:.4} ({errors}/{total}) exceeds the limit {limit}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comm(read_ok: u64, read_failed: u64, write_failed: u64) -> Communication {
        let mut c = Communication::succeeded();
        c.counters.read_succeed_records = read_ok;
        c.counters.read_failed_records = read_failed;
        c.counters.write_failed_records = write_failed;
        c
    }

    fn checker(record: Option<u64>, percentage: Option<f64>) -> ErrorRecordChecker {
        ErrorRecordChecker::new(&ErrorLimitConfig { record, percentage })
    }

    #[test]
    fn test_record_limit_trips_above_limit() {
        let c = checker(Some(0), None);
        assert!(c.check_record_limit(&comm(10, 0, 0)).is_ok());
        let err = c.check_record_limit(&comm(10, 1, 0)).unwrap_err();
        assert!(matches!(err, EngineError::DirtyDataLimitExceeded(_)));
    }

    #[test]
    fn test_record_limit_counts_both_sides() {
        let c = checker(Some(2), None);
        assert!(c.check_record_limit(&comm(10, 1, 1)).is_ok());
        assert!(c.check_record_limit(&comm(10, 2, 1)).is_err());
    }

    #[test]
    fn test_record_limit_disables_percentage() {
        let c = checker(Some(100), Some(0.01));
        assert_eq!(c.percentage_limit(), None);
        assert!(c.check_percentage_limit(&comm(10, 5, 0)).is_ok());
    }

    #[test]
    fn test_percentage_requires_volume() {
        let c = checker(None, Some(0.0));
        assert!(c.check_percentage_limit(&comm(0, 0, 3)).is_ok());
        assert!(c.check_percentage_limit(&comm(1, 0, 1)).is_err());
    }

    #[test]
    fn test_percentage_boundary_is_inclusive() {
        let c = checker(None, Some(0.1));
        assert!(c.check_percentage_limit(&comm(9, 1, 0)).is_ok());
        assert!(c.check_percentage_limit(&comm(8, 2, 0)).is_err());
    }

    #[test]
    fn test_no_limits_never_trip() {
        let c = checker(None, None);
        assert!(c.check_record_limit(&comm(0, 1000, 1000)).is_ok());
        assert!(c.check_percentage_limit(&comm(1, 1000, 1000)).is_ok());
    }
}
