use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::DailyRecord;
use crate::store::{StoreError, TimeSeriesStore};

/// A date whose point could not be written after exhausting retries.
#[derive(Debug, Clone, Serialize)]
pub struct WriteFailure {
    pub date: NaiveDate,
    pub reason: String,
}

/// Outcome of one upsert pass. Partial failure is data here, not an error:
/// the dates that stuck are listed next to the ones that did not.
#[derive(Debug, Default, Serialize)]
pub struct WriteReport {
    pub written: Vec<NaiveDate>,
    pub failed: Vec<WriteFailure>,
}

/// Writes record batches to the time-series store, one point per
/// `(date, measurement)` key.
///
/// The key makes every write an overwrite, so re-submitting a record —
/// same run, a rerun, or an overlapping cron window — leaves the store in
/// the same observable state as writing it once.
pub struct UpsertWriter {
    max_attempts: u32,
    base_backoff: Duration,
}

impl Default for UpsertWriter {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl UpsertWriter {
    /// `max_attempts` and `base_backoff` are tunables, not a contract;
    /// backoff doubles per attempt.
    #[must_use]
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Write all records as a single batch; on batch rejection fall back
    /// to per-record writes so individual failing dates can be named, and
    /// retry only the failed subset with exponential backoff.
    ///
    /// An unreachable store on first contact is fatal (`Err`); anything
    /// written before a mid-run failure stays written and is safe to
    /// re-send on the next run.
    pub fn write(
        &self,
        store: &dyn TimeSeriesStore,
        measurement: &str,
        records: &[DailyRecord],
    ) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        match store.write_points(measurement, records) {
            Ok(()) => {
                report.written = records.iter().map(|r| r.date).collect();
                return Ok(report);
            }
            Err(StoreError::Unreachable(e)) => return Err(StoreError::Unreachable(e)),
            Err(_) => {} // batch rejected: fall back to per-record writes
        }

        let mut pending: Vec<DailyRecord> = records.to_vec();
        let mut failures: Vec<WriteFailure> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let mut still_pending = Vec::new();
            failures.clear();

            for rec in pending {
                match store.write_points(measurement, std::slice::from_ref(&rec)) {
                    Ok(()) => report.written.push(rec.date),
                    Err(e) => {
                        failures.push(WriteFailure {
                            date: rec.date,
                            reason: e.to_string(),
                        });
                        still_pending.push(rec);
                    }
                }
            }

            pending = still_pending;
            if pending.is_empty() {
                break;
            }
            if attempt < self.max_attempts {
                std::thread::sleep(self.base_backoff * 2u32.pow(attempt - 1));
            }
        }

        report.written.sort_unstable();
        report.failed = failures;
        Ok(report)
    }
}
