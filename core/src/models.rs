use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One calendar day's nutrition/weight snapshot.
///
/// `date` is the sole key: the store holds at most one point per date, and
/// re-writing a date overwrites it. Optional fields distinguish "not
/// reported" from "logged zero" — a `None` is never persisted as `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub calories: f64,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub sodium_mg: Option<f64>,
    pub sugar_g: Option<f64>,
    pub fiber_g: Option<f64>,
    pub weight_lbs: Option<f64>,
}

impl DailyRecord {
    #[must_use]
    pub fn new(date: NaiveDate, calories: f64) -> Self {
        Self {
            date,
            calories,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            sodium_mg: None,
            sugar_g: None,
            fiber_g: None,
            weight_lbs: None,
        }
    }

    /// Present fields in stored order, as `(field_name, value)` pairs.
    /// Absent optional fields are omitted entirely, never emitted as zero.
    #[must_use]
    pub fn fields(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![("calories", self.calories)];
        let optional = [
            ("protein_g", self.protein_g),
            ("carbs_g", self.carbs_g),
            ("fat_g", self.fat_g),
            ("sodium_mg", self.sodium_mg),
            ("sugar_g", self.sugar_g),
            ("fiber_g", self.fiber_g),
            ("weight_lbs", self.weight_lbs),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                out.push((name, v));
            }
        }
        out
    }

    /// All numeric fields must be non-negative when present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.fields().iter().all(|(_, v)| *v >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_fields_omit_absent() {
        let mut r = DailyRecord::new(date("2024-01-15"), 1850.0);
        r.protein_g = Some(120.0);

        let fields = r.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], ("calories", 1850.0));
        assert_eq!(fields[1], ("protein_g", 120.0));
        assert!(!fields.iter().any(|(n, _)| *n == "weight_lbs"));
    }

    #[test]
    fn test_fields_full_record() {
        let r = DailyRecord {
            date: date("2024-01-15"),
            calories: 1850.0,
            protein_g: Some(120.0),
            carbs_g: Some(180.0),
            fat_g: Some(60.0),
            sodium_mg: Some(2100.0),
            sugar_g: Some(45.0),
            fiber_g: Some(25.0),
            weight_lbs: Some(175.4),
        };
        assert_eq!(r.fields().len(), 8);
        assert_eq!(r.fields()[7], ("weight_lbs", 175.4));
    }

    #[test]
    fn test_is_valid() {
        let mut r = DailyRecord::new(date("2024-01-15"), 1850.0);
        assert!(r.is_valid());
        r.fat_g = Some(-1.0);
        assert!(!r.is_valid());
    }
}
