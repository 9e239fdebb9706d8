use std::collections::BTreeMap;
use std::io::Read;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::models::DailyRecord;

/// A row that could not contribute (fully) to a record.
#[derive(Debug, Clone)]
pub struct ParseWarning {
    /// 1-based CSV line number (header is line 1).
    pub line: usize,
    pub message: String,
}

/// Result of parsing one CSV attachment: the records that parsed cleanly
/// plus a warning per skipped row or unusable cell.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<DailyRecord>,
    pub warnings: Vec<ParseWarning>,
}

/// Parse a Lose It! weekly-summary CSV export from any reader.
///
/// One data row per day. Columns are matched by header name
/// (case-insensitive, spacing variants accepted), so reordered or missing
/// optional columns are fine. Rows missing a usable date or calories value
/// are skipped with a warning; the rest of the file still parses. Parsing
/// is pure — the same bytes always yield the same outcome.
pub fn parse_summary_csv<R: Read>(reader: R) -> Result<ParseOutcome> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    // Column lookup by name, not position. Each field maps to an optional
    // index; exports vary between "Protein (g)" and "Protein(g)" spellings.
    let col = |names: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };

    let idx_date = col(&["Date"]).context("Missing 'Date' column")?;
    let idx_cal = col(&["Calories"]).context("Missing 'Calories' column")?;
    let idx_protein = col(&["Protein (g)", "Protein(g)", "Protein"]);
    let idx_carbs = col(&["Carbohydrates (g)", "Carbohydrates(g)", "Carbs"]);
    let idx_fat = col(&["Fat (g)", "Fat(g)", "Fat"]);
    let idx_sodium = col(&["Sodium (mg)", "Sodium(mg)", "Sodium"]);
    let idx_sugar = col(&["Sugars (g)", "Sugars(g)", "Sugar"]);
    let idx_fiber = col(&["Fiber (g)", "Fiber(g)", "Fiber"]);
    let idx_weight = col(&["Weight (lbs)", "Weight(lbs)", "Weight"]);

    let mut out = ParseOutcome::default();

    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.warnings.push(ParseWarning {
                    line,
                    message: format!("malformed row: {e}"),
                });
                continue;
            }
        };

        if record.iter().all(|f| f.trim().is_empty()) {
            continue; // skip blank rows silently
        }

        let raw_date = record.get(idx_date).unwrap_or("").trim();
        let date = match normalize_date(raw_date) {
            Ok(d) => d,
            Err(e) => {
                out.warnings.push(ParseWarning {
                    line,
                    message: format!("{e}"),
                });
                continue;
            }
        };

        let raw_cal = record.get(idx_cal).unwrap_or("").trim();
        let Some(calories) = parse_number(raw_cal).filter(|v| *v >= 0.0) else {
            out.warnings.push(ParseWarning {
                line,
                message: format!("unusable Calories value '{raw_cal}'"),
            });
            continue;
        };

        let mut rec = DailyRecord::new(date, calories);
        rec.protein_g = opt_field(&record, idx_protein, "Protein", line, &mut out.warnings);
        rec.carbs_g = opt_field(&record, idx_carbs, "Carbohydrates", line, &mut out.warnings);
        rec.fat_g = opt_field(&record, idx_fat, "Fat", line, &mut out.warnings);
        rec.sodium_mg = opt_field(&record, idx_sodium, "Sodium", line, &mut out.warnings);
        rec.sugar_g = opt_field(&record, idx_sugar, "Sugars", line, &mut out.warnings);
        rec.fiber_g = opt_field(&record, idx_fiber, "Fiber", line, &mut out.warnings);
        rec.weight_lbs = opt_field(&record, idx_weight, "Weight", line, &mut out.warnings);

        out.records.push(rec);
    }

    Ok(out)
}

/// Read an optional numeric cell. Blank or absent means "not reported"
/// (`None`, no warning); unparseable or negative means `None` plus a
/// warning, so a bad cell never poisons the rest of the row.
fn opt_field(
    record: &csv::StringRecord,
    idx: Option<usize>,
    name: &str,
    line: usize,
    warnings: &mut Vec<ParseWarning>,
) -> Option<f64> {
    let raw = idx.and_then(|i| record.get(i)).map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return None;
    }
    match parse_number(raw) {
        Some(v) if v >= 0.0 => Some(v),
        _ => {
            warnings.push(ParseWarning {
                line,
                message: format!("unusable {name} value '{raw}'"),
            });
            None
        }
    }
}

/// Parse a numeric cell, tolerating thousands separators ("1,850").
fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").trim().parse::<f64>().ok()
}

/// Normalize an exported date to a calendar date.
///
/// Lose It! exports `YYYY-MM-DD` or sometimes `M/D/YYYY`.
fn normalize_date(raw: &str) -> Result<NaiveDate> {
    if raw.is_empty() {
        bail!("missing date");
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(d);
        }
    }
    bail!("cannot parse date '{raw}'")
}

/// Merge records from several attachments into one sequence, sorted by
/// date with at most one record per date.
///
/// Weekly exports overlap, so the same day shows up in consecutive emails;
/// the last-parsed record for a date wins, matching the store's
/// last-write-wins key. A later record without a weigh-in keeps the
/// earlier weight rather than erasing it.
#[must_use]
pub fn merge_days(batches: Vec<Vec<DailyRecord>>) -> Vec<DailyRecord> {
    let mut by_date: BTreeMap<NaiveDate, DailyRecord> = BTreeMap::new();

    for batch in batches {
        for mut rec in batch {
            if let Some(prev) = by_date.get(&rec.date) {
                if rec.weight_lbs.is_none() {
                    rec.weight_lbs = prev.weight_lbs;
                }
            }
            by_date.insert(rec.date, rec);
        }
    }

    by_date.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
Date,Calories,Protein (g),Carbohydrates (g),Fat (g),Sodium (mg),Sugars (g),Fiber (g),Weight
2024-01-15,1850,120,180,60,2100,45,25,175.4
2024-01-16,2010,135,160,72,1900,38,22,
2024-01-17,1720,110,150,55,1750,40,28,174.8
";

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_basic() {
        let out = parse_summary_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 3);
        assert!(out.warnings.is_empty());

        let r = &out.records[0];
        assert_eq!(r.date, date("2024-01-15"));
        assert!((r.calories - 1850.0).abs() < f64::EPSILON);
        assert_eq!(r.protein_g, Some(120.0));
        assert_eq!(r.weight_lbs, Some(175.4));

        // Blank weight cell means "not reported", not zero
        assert!(out.records[1].weight_lbs.is_none());
    }

    #[test]
    fn test_parse_short_header_names() {
        let csv = "\
Date,Calories,Protein,Carbs,Fat,Sodium,Sugar,Fiber,Weight
01/15/2024,1850,120,180,60,2100,45,25,175.4
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.date, date("2024-01-15"));
        assert!((r.calories - 1850.0).abs() < f64::EPSILON);
        assert_eq!(r.protein_g, Some(120.0));
        assert_eq!(r.carbs_g, Some(180.0));
        assert_eq!(r.fat_g, Some(60.0));
        assert_eq!(r.sodium_mg, Some(2100.0));
        assert_eq!(r.sugar_g, Some(45.0));
        assert_eq!(r.fiber_g, Some(25.0));
        assert_eq!(r.weight_lbs, Some(175.4));
    }

    #[test]
    fn test_parse_no_weight_column() {
        let csv = "\
Date,Calories,Protein,Carbs,Fat,Sodium,Sugar,Fiber
01/15/2024,1850,120,180,60,2100,45,25
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(out.records[0].weight_lbs.is_none());
        assert_eq!(out.records[0].protein_g, Some(120.0));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_parse_reordered_columns() {
        let csv = "\
Weight,Calories,Date
175.4,1850,2024-01-15
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, date("2024-01-15"));
        assert_eq!(out.records[0].weight_lbs, Some(175.4));
    }

    #[test]
    fn test_parse_bad_date_skips_row_only() {
        let csv = "\
Date,Calories
not-a-date,1850
2024-01-16,2010
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, date("2024-01-16"));
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].line, 2);
        assert!(out.warnings[0].message.contains("not-a-date"));
    }

    #[test]
    fn test_parse_missing_calories_skips_row() {
        let csv = "\
Date,Calories,Protein
2024-01-15,,120
2024-01-16,2010,135
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, date("2024-01-16"));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_parse_negative_optional_dropped_with_warning() {
        let csv = "\
Date,Calories,Protein
2024-01-15,1850,-5
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(out.records[0].protein_g.is_none());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_parse_thousands_separator() {
        let csv = "\
Date,Calories,Sodium (mg)
2024-01-15,\"1,850\",\"2,100\"
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert!((out.records[0].calories - 1850.0).abs() < f64::EPSILON);
        assert_eq!(out.records[0].sodium_mg, Some(2100.0));
    }

    #[test]
    fn test_parse_skips_blank_rows() {
        let csv = "\
Date,Calories
2024-01-15,1850
,
2024-01-16,2010
";
        let out = parse_summary_csv(csv.as_bytes()).unwrap();
        assert_eq!(out.records.len(), 2);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_parse_missing_required_column() {
        let result = parse_summary_csv("Meal,Calories\nLunch,100\n".as_bytes());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Date"));
    }

    #[test]
    fn test_parse_is_pure() {
        let a = parse_summary_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let b = parse_summary_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_normalize_date_formats() {
        assert_eq!(normalize_date("2024-01-15").unwrap(), date("2024-01-15"));
        assert_eq!(normalize_date("1/15/2024").unwrap(), date("2024-01-15"));
        assert_eq!(normalize_date("01/15/2024").unwrap(), date("2024-01-15"));
        assert!(normalize_date("nope").is_err());
        assert!(normalize_date("").is_err());
    }

    #[test]
    fn test_merge_days_last_wins() {
        let week1 = vec![
            DailyRecord::new(date("2024-01-15"), 1850.0),
            DailyRecord::new(date("2024-01-16"), 2010.0),
        ];
        let mut revised = DailyRecord::new(date("2024-01-16"), 1990.0);
        revised.protein_g = Some(140.0);
        let week2 = vec![revised, DailyRecord::new(date("2024-01-17"), 1720.0)];

        let merged = merge_days(vec![week1, week2]);
        assert_eq!(merged.len(), 3);
        assert!((merged[1].calories - 1990.0).abs() < f64::EPSILON);
        assert_eq!(merged[1].protein_g, Some(140.0));
    }

    #[test]
    fn test_merge_days_keeps_earlier_weight() {
        let mut weighed = DailyRecord::new(date("2024-01-15"), 1850.0);
        weighed.weight_lbs = Some(175.4);
        let unweighed = DailyRecord::new(date("2024-01-15"), 1870.0);

        let merged = merge_days(vec![vec![weighed], vec![unweighed]]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].calories - 1870.0).abs() < f64::EPSILON);
        assert_eq!(merged[0].weight_lbs, Some(175.4));
    }

    #[test]
    fn test_merge_days_sorted_output() {
        let merged = merge_days(vec![vec![
            DailyRecord::new(date("2024-01-17"), 1.0),
            DailyRecord::new(date("2024-01-15"), 2.0),
        ]]);
        assert_eq!(merged[0].date, date("2024-01-15"));
        assert_eq!(merged[1].date, date("2024-01-17"));
    }
}
