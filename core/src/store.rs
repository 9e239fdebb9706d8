use chrono::NaiveDate;
use thiserror::Error;

use crate::models::DailyRecord;

/// The single measurement holding daily nutrition/weight points.
pub const NUTRITION_MEASUREMENT: &str = "daily_nutrition";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused or timed out. Fatal for the run — lets the
    /// driver distinguish "no data to sync" from "store down".
    #[error("time-series store unreachable: {0}")]
    Unreachable(String),
    /// The store rejected a write.
    #[error("store write failed: {0}")]
    Write(String),
    /// The store rejected or garbled a query.
    #[error("store query failed: {0}")]
    Query(String),
}

/// Time-series store collaborator (InfluxDB in production).
///
/// A point is keyed by `(measurement, date)`; writing the same key again
/// overwrites rather than duplicates. That key, not locking, is what makes
/// re-runs and overlapping syncs safe.
pub trait TimeSeriesStore: Send + Sync {
    /// Write one point per record, keyed by the record's date.
    fn write_points(&self, measurement: &str, records: &[DailyRecord]) -> Result<(), StoreError>;

    /// One field's values over `[start, end]`, ordered by date.
    fn query_range(
        &self,
        measurement: &str,
        field: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError>;

    /// Full daily records over `[start, end]`, ordered by date.
    fn query_daily(
        &self,
        measurement: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, StoreError>;
}
