use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::loseit;
use crate::mailbox::{EmailAttachment, MailboxError, MailboxSource};
use crate::store::{NUTRITION_MEASUREMENT, TimeSeriesStore};
use crate::upsert::{UpsertWriter, WriteFailure};

/// One sync run's settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub label: String,
    pub lookback_days: u32,
    pub measurement: String,
    /// Parse and report without touching the store.
    pub dry_run: bool,
    pub fetch_attempts: u32,
    pub fetch_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            label: "Lose It! Weekly Summary".to_string(),
            lookback_days: 90,
            measurement: NUTRITION_MEASUREMENT.to_string(),
            dry_run: false,
            fetch_attempts: 3,
            fetch_backoff: Duration::from_millis(500),
        }
    }
}

/// Summary of one sync run, printed by the CLI (optionally as JSON).
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub attachments: usize,
    pub days_parsed: usize,
    pub days_written: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub warnings: Vec<String>,
    pub failed: Vec<WriteFailure>,
    pub dry_run: bool,
}

/// Run one sync: fetch labeled attachments, parse, merge overlapping
/// weeks, upsert into the store.
///
/// Transient mailbox errors are retried with backoff; auth errors
/// propagate immediately. A zero-attachment or zero-record run is a
/// report, not an error — exit-code policy belongs to the CLI.
pub fn run_sync(
    mailbox: &dyn MailboxSource,
    store: &dyn TimeSeriesStore,
    writer: &UpsertWriter,
    options: &SyncOptions,
    today: NaiveDate,
) -> Result<SyncReport> {
    let since = today - chrono::Duration::days(i64::from(options.lookback_days));
    let attachments = fetch_with_retry(mailbox, options, since)?;

    let mut report = SyncReport {
        attachments: attachments.len(),
        dry_run: options.dry_run,
        ..SyncReport::default()
    };

    let mut batches = Vec::new();
    for att in &attachments {
        match loseit::parse_summary_csv(att.data.as_slice()) {
            Ok(outcome) => {
                report.warnings.extend(
                    outcome
                        .warnings
                        .iter()
                        .map(|w| format!("{}: line {}: {}", att.filename, w.line, w.message)),
                );
                batches.push(outcome.records);
            }
            Err(e) => report
                .warnings
                .push(format!("{}: skipped attachment: {e:#}", att.filename)),
        }
    }

    let records = loseit::merge_days(batches);
    report.days_parsed = records.len();
    report.first_date = records.first().map(|r| r.date);
    report.last_date = records.last().map(|r| r.date);

    if options.dry_run || records.is_empty() {
        return Ok(report);
    }

    let write_report = writer
        .write(store, &options.measurement, &records)
        .context("Failed to write records to the time-series store")?;
    report.days_written = write_report.written.len();
    report.failed = write_report.failed;

    Ok(report)
}

fn fetch_with_retry(
    mailbox: &dyn MailboxSource,
    options: &SyncOptions,
    since: NaiveDate,
) -> Result<Vec<EmailAttachment>> {
    let attempts = options.fetch_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match mailbox.fetch_attachments(&options.label, since) {
            Ok(attachments) => return Ok(attachments),
            Err(e @ MailboxError::Auth(_)) => {
                return Err(e).context("Mailbox authentication failed; run `healthsync login`");
            }
            Err(e @ MailboxError::Fetch(_)) => {
                last_err = Some(e);
                if attempt < attempts {
                    std::thread::sleep(options.fetch_backoff * 2u32.pow(attempt - 1));
                }
            }
        }
    }

    let err = last_err.unwrap_or_else(|| MailboxError::Fetch("no attempt made".into()));
    Err(err).with_context(|| format!("Mailbox fetch failed after {attempts} attempts"))
}
