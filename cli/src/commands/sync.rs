use anyhow::Result;
use chrono::Local;

use healthsync_core::mailbox::MailboxSource;
use healthsync_core::store::TimeSeriesStore;
use healthsync_core::sync::{SyncOptions, run_sync};
use healthsync_core::upsert::UpsertWriter;

use crate::config::Config;

pub(crate) fn cmd_sync(
    config: &Config,
    mailbox: &dyn MailboxSource,
    store: &dyn TimeSeriesStore,
    days: Option<u32>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let options = SyncOptions {
        label: config.gmail_label.clone(),
        lookback_days: days.unwrap_or(config.lookback_days),
        dry_run,
        ..SyncOptions::default()
    };
    let writer = UpsertWriter::default();
    let today = Local::now().date_naive();

    let report = run_sync(mailbox, store, &writer, &options, today)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if dry_run {
        println!("Dry run — nothing written.\n");
    } else {
        println!("Sync complete.\n");
    }
    println!("  Attachments:  {}", report.attachments);
    println!("  Days parsed:  {}", report.days_parsed);
    if !dry_run {
        println!("  Days written: {}", report.days_written);
    }
    if let (Some(first), Some(last)) = (report.first_date, report.last_date) {
        println!("  Date range:   {first} to {last}");
    }

    if !report.warnings.is_empty() {
        let count = report.warnings.len();
        eprintln!("\n  {count} warning(s):");
        for w in &report.warnings {
            eprintln!("    {w}");
        }
    }

    // Residual write failures are reported, not fatal: the written dates
    // stuck, and a rerun will retry the rest.
    if !report.failed.is_empty() {
        let count = report.failed.len();
        eprintln!("\n  {count} date(s) failed to write after retries:");
        for f in &report.failed {
            let date = f.date;
            let reason = &f.reason;
            eprintln!("    {date}: {reason}");
        }
        eprintln!("  Re-run `healthsync sync` to retry them.");
    }

    Ok(())
}
