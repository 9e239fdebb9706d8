use anyhow::Result;

use crate::models::DailyRecord;

/// Chat-model collaborator (Ollama in production).
pub trait ChatProvider: Send + Sync {
    fn chat(&self, system_prompt: &str, user_message: &str) -> Result<String>;
}

/// Render a human-readable summary of a span of records: day count,
/// period, average daily intake, and weight change when any weigh-ins
/// exist. Absent nutrients count as zero in the averages.
#[must_use]
pub fn render_context(records: &[DailyRecord]) -> String {
    if records.is_empty() {
        return "No data available for this period.".to_string();
    }

    #[allow(clippy::cast_precision_loss)]
    let days = records.len() as f64;
    let avg = |f: fn(&DailyRecord) -> f64| records.iter().map(f).sum::<f64>() / days;

    let avg_calories = avg(|r| r.calories);
    let avg_protein = avg(|r| r.protein_g.unwrap_or(0.0));
    let avg_carbs = avg(|r| r.carbs_g.unwrap_or(0.0));
    let avg_fat = avg(|r| r.fat_g.unwrap_or(0.0));

    let weights: Vec<f64> = records.iter().filter_map(|r| r.weight_lbs).collect();
    let weight_line = match (weights.first(), weights.last()) {
        (Some(first), Some(last)) => {
            let change = last - first;
            format!("\nWeight: {first:.1} → {last:.1} lbs ({change:+.1} lbs)")
        }
        _ => String::new(),
    };

    let total_days = records.len();
    let first_date = records[0].date;
    let last_date = records[records.len() - 1].date;

    format!(
        "Data Summary ({total_days} days):\n\
         Period: {first_date} to {last_date}\n\
         Average Daily Intake:\n  \
         • Calories: {avg_calories:.0} kcal\n  \
         • Protein: {avg_protein:.1}g\n  \
         • Carbs: {avg_carbs:.1}g\n  \
         • Fat: {avg_fat:.1}g{weight_line}\n"
    )
}

/// System prompt handed to the chat collaborator alongside each question.
#[must_use]
pub fn system_prompt(records: &[DailyRecord]) -> String {
    let context = render_context(records);
    format!(
        "You are a health and nutrition analyst. You help users understand \
         their nutrition and weight data from the Lose It! app.\n\n\
         Current data context:\n{context}\n\
         Provide helpful insights, identify trends, and answer questions \
         about the data. Be concise but informative."
    )
}
