use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use healthsync_core::models::DailyRecord;
use healthsync_core::store::{StoreError, TimeSeriesStore};

/// InfluxDB 1.x HTTP client. Points carry a day-precision timestamp
/// (midnight UTC, epoch seconds); rewriting the same `(measurement, time)`
/// pair overwrites in place, which is what makes the sync idempotent.
pub struct InfluxClient {
    client: reqwest::Client,
    base_url: String,
    database: String,
    auth: Option<(String, String)>,
    rt: tokio::runtime::Handle,
    ensured: tokio::sync::OnceCell<()>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    series: Option<Vec<Series>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxClient {
    pub fn new(
        base_url: &str,
        database: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "healthsync-cli/{} (health data sync)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.to_string(),
            auth: username.zip(password),
            rt: tokio::runtime::Handle::current(),
            ensured: tokio::sync::OnceCell::new(),
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => req.basic_auth(user, Some(pass)),
            None => req,
        }
    }

    /// CREATE DATABASE is idempotent; issued once per process before the
    /// first write or query.
    async fn ensure_database(&self) -> Result<(), StoreError> {
        self.ensured
            .get_or_try_init(|| async {
                let q = format!("CREATE DATABASE \"{}\"", self.database);
                let resp = self
                    .with_auth(self.client.post(format!("{}/query", self.base_url)))
                    .query(&[("q", q.as_str())])
                    .send()
                    .await
                    .map_err(|e| connect_or(&e, StoreError::Query))?;
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(StoreError::Query(format!(
                        "CREATE DATABASE returned status {}",
                        resp.status()
                    )))
                }
            })
            .await
            .copied()
    }

    async fn write_points_async(
        &self,
        measurement: &str,
        records: &[DailyRecord],
    ) -> Result<(), StoreError> {
        self.ensure_database().await?;

        let body = records
            .iter()
            .map(|r| to_line(measurement, r))
            .collect::<Vec<_>>()
            .join("\n");

        let resp = self
            .with_auth(self.client.post(format!("{}/write", self.base_url)))
            .query(&[("db", self.database.as_str()), ("precision", "s")])
            .body(body)
            .send()
            .await
            .map_err(|e| connect_or(&e, StoreError::Write))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(StoreError::Write(format!("status {status}: {detail}")))
    }

    async fn query_async(&self, q: &str) -> Result<Vec<Series>, StoreError> {
        self.ensure_database().await?;

        let resp = self
            .with_auth(self.client.get(format!("{}/query", self.base_url)))
            .query(&[
                ("db", self.database.as_str()),
                ("q", q),
                ("epoch", "s"),
            ])
            .send()
            .await
            .map_err(|e| connect_or(&e, StoreError::Query))?;

        if !resp.status().is_success() {
            return Err(StoreError::Query(format!(
                "status {}",
                resp.status()
            )));
        }

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Query(format!("malformed response: {e}")))?;

        let mut series = Vec::new();
        for result in parsed.results {
            if let Some(err) = result.error {
                return Err(StoreError::Query(err));
            }
            series.extend(result.series.unwrap_or_default());
        }
        Ok(series)
    }

    async fn query_range_async(
        &self,
        measurement: &str,
        field: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
        let q = format!(
            "SELECT \"{field}\" FROM \"{measurement}\" \
             WHERE time >= '{start}T00:00:00Z' AND time <= '{end}T23:59:59Z' \
             ORDER BY time ASC"
        );
        let series = self.query_async(&q).await?;

        let mut out = Vec::new();
        for s in series {
            for row in &s.values {
                let Some(date) = row.first().and_then(epoch_to_date) else {
                    continue;
                };
                if let Some(v) = row.get(1).and_then(serde_json::Value::as_f64) {
                    out.push((date, v));
                }
            }
        }
        Ok(out)
    }

    async fn query_daily_async(
        &self,
        measurement: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, StoreError> {
        let q = format!(
            "SELECT * FROM \"{measurement}\" \
             WHERE time >= '{start}T00:00:00Z' AND time <= '{end}T23:59:59Z' \
             ORDER BY time ASC"
        );
        let series = self.query_async(&q).await?;

        let mut out = Vec::new();
        for s in series {
            for row in &s.values {
                if let Some(rec) = row_to_record(&s.columns, row) {
                    out.push(rec);
                }
            }
        }
        Ok(out)
    }
}

impl TimeSeriesStore for InfluxClient {
    fn write_points(&self, measurement: &str, records: &[DailyRecord]) -> Result<(), StoreError> {
        self.rt
            .block_on(self.write_points_async(measurement, records))
    }

    fn query_range(
        &self,
        measurement: &str,
        field: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, StoreError> {
        self.rt
            .block_on(self.query_range_async(measurement, field, start, end))
    }

    fn query_daily(
        &self,
        measurement: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, StoreError> {
        self.rt
            .block_on(self.query_daily_async(measurement, start, end))
    }
}

/// Connection-level failures are a distinct kind so the driver can tell
/// "store down" from "store said no".
fn connect_or(e: &reqwest::Error, wrap: fn(String) -> StoreError) -> StoreError {
    if e.is_connect() || e.is_timeout() {
        StoreError::Unreachable(e.to_string())
    } else {
        wrap(e.to_string())
    }
}

/// Encode one record in line protocol, timestamped at the date's midnight
/// UTC in seconds. Absent fields are omitted from the line, never written
/// as zero.
fn to_line(measurement: &str, record: &DailyRecord) -> String {
    let fields = record
        .fields()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    let ts = day_epoch(record.date);
    let escaped = measurement.replace(' ', "\\ ").replace(',', "\\,");
    format!("{escaped} {fields} {ts}")
}

fn day_epoch(date: NaiveDate) -> i64 {
    NaiveDateTime::new(date, NaiveTime::MIN).and_utc().timestamp()
}

fn epoch_to_date(v: &serde_json::Value) -> Option<NaiveDate> {
    let secs = v.as_i64()?;
    Some(DateTime::from_timestamp(secs, 0)?.date_naive())
}

/// Rebuild a record from a `SELECT *` row; columns arrive in arbitrary
/// order and null cells mean the field was never written.
fn row_to_record(columns: &[String], row: &[serde_json::Value]) -> Option<DailyRecord> {
    let col = |name: &str| -> Option<&serde_json::Value> {
        columns.iter().position(|c| c == name).and_then(|i| row.get(i))
    };

    let date = epoch_to_date(col("time")?)?;
    let calories = col("calories").and_then(serde_json::Value::as_f64)?;
    let field = |name: &str| col(name).and_then(serde_json::Value::as_f64);

    Some(DailyRecord {
        date,
        calories,
        protein_g: field("protein_g"),
        carbs_g: field("carbs_g"),
        fat_g: field("fat_g"),
        sodium_mg: field("sodium_mg"),
        sugar_g: field("sugar_g"),
        fiber_g: field("fiber_g"),
        weight_lbs: field("weight_lbs"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_to_line_full_record() {
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
        assert_eq!(
            to_line("daily_nutrition", &r),
            "daily_nutrition calories=1850,protein_g=120,carbs_g=180,fat_g=60,\
             sodium_mg=2100,sugar_g=45,fiber_g=25,weight_lbs=175.4 1705276800"
        );
    }

    #[test]
    fn test_to_line_omits_absent_fields() {
        let r = DailyRecord::new(date("2024-01-15"), 1850.0);
        let line = to_line("daily_nutrition", &r);
        assert_eq!(line, "daily_nutrition calories=1850 1705276800");
        assert!(!line.contains("weight_lbs"));
    }

    #[test]
    fn test_to_line_identical_for_identical_records() {
        let r = DailyRecord::new(date("2024-01-15"), 1850.0);
        assert_eq!(to_line("daily_nutrition", &r), to_line("daily_nutrition", &r));
    }

    #[test]
    fn test_day_epoch_is_midnight_utc() {
        // 2024-01-15T00:00:00Z
        assert_eq!(day_epoch(date("2024-01-15")), 1_705_276_800);
    }

    #[test]
    fn test_row_to_record() {
        let columns: Vec<String> = ["time", "calories", "protein_g", "weight_lbs"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let row = vec![json!(1_705_276_800), json!(1850.0), json!(120.0), json!(null)];

        let rec = row_to_record(&columns, &row).unwrap();
        assert_eq!(rec.date, date("2024-01-15"));
        assert!((rec.calories - 1850.0).abs() < f64::EPSILON);
        assert_eq!(rec.protein_g, Some(120.0));
        assert!(rec.weight_lbs.is_none());
    }

    #[test]
    fn test_row_without_calories_is_dropped() {
        let columns: Vec<String> = ["time", "calories"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let row = vec![json!(1_705_276_800), json!(null)];
        assert!(row_to_record(&columns, &row).is_none());
    }
}
