use std::io::{self, BufRead, Write};
use std::process;

use anyhow::Result;
use chrono::Local;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use healthsync_core::chat::{ChatProvider, render_context, system_prompt};
use healthsync_core::models::DailyRecord;
use healthsync_core::store::{NUTRITION_MEASUREMENT, TimeSeriesStore};

/// Interactive read-eval loop against the chat collaborator, with the
/// last `days` of store data rendered into the system prompt.
pub(crate) fn cmd_chat(
    store: &dyn TimeSeriesStore,
    provider: &dyn ChatProvider,
    days: u32,
) -> Result<()> {
    let end = Local::now().date_naive();
    let start = end - chrono::Duration::days(i64::from(days));
    let records = store.query_daily(NUTRITION_MEASUREMENT, start, end)?;

    if records.is_empty() {
        eprintln!("No data found in the last {days} days. Run `healthsync sync` first.");
        process::exit(2);
    }

    let count = records.len();
    let first = records[0].date;
    let last = records[count - 1].date;
    println!("Loaded {count} days of data ({first} to {last}).");
    println!("Ask about your data. Commands: 'summary' for an overview, 'quit' to exit.\n");

    let system = system_prompt(&records);
    let stdin = io::stdin();

    loop {
        eprint!("You: ");
        io::stderr().flush()?;

        let Some(line) = stdin.lock().lines().next() else {
            break; // EOF
        };
        let line = line?;
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }
        if input.eq_ignore_ascii_case("summary") {
            println!();
            print_day_table(&records);
            println!("\n{}", render_context(&records));
            continue;
        }

        match provider.chat(&system, input) {
            Ok(reply) => println!("\nAI: {reply}\n"),
            Err(e) => eprintln!("\nError: {e:#}\n"),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_day_table(records: &[DailyRecord]) {
    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
        #[tabled(rename = "Weight")]
        weight: String,
    }

    let grams = |v: Option<f64>| v.map_or("-".into(), |v| format!("{v:.0}g"));

    let rows: Vec<DayRow> = records
        .iter()
        .map(|r| DayRow {
            date: r.date.to_string(),
            calories: format!("{:.0}", r.calories),
            protein: grams(r.protein_g),
            carbs: grams(r.carbs_g),
            fat: grams(r.fat_g),
            weight: r
                .weight_lbs
                .map_or("-".into(), |v| format!("{v:.1} lbs")),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}
