use jiff::{civil::Date, ToSpan};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};

use crate::{
    error::Result,
    helpers::{records_to_rows, MetadataQuery, SourceType},
    http::{HttpClient, Request},
    load::{load_rows, reconcile_columns, Stopwatch},
    wherescape::{TaskCounts, WhereScape},
};

const FRIDAY_PULSE_API: &str = "https://app.fridaypulse.com";
pub const HIGH_WATER_MARK: &str = "HWM_ds_friday_pulse_question";
pub const RECORD_SOURCE: &str = "Friday Pulse API - questions";
pub const DEFAULT_LOOKBACK_WEEKS: i64 = 3;

pub const COLUMNS: &[(&str, SourceType)] = &[
    ("sample_date", SourceType::Date),
    ("score", SourceType::Float),
    ("response_rate", SourceType::Float),
    ("response_count", SourceType::Int),
    ("total_count", SourceType::Int),
    ("question_count", SourceType::Int),
    ("topic_code", SourceType::Text),
    ("topic_name", SourceType::Text),
];

const DISPLAY_NAMES: [&str; 8] = [
    "Date when the pulse survey was conducted",
    "Overall satisfaction score (0-100)",
    "Percentage of invited users who responded",
    "Number of users who responded",
    "Total number of users invited",
    "Number of questions in the survey",
    "Unique code identifying the topic/category",
    "Human-readable name of the topic/category",
];

const TYPES: [&str; 8] = ["date", "numeric", "numeric", "int", "int", "int", "text", "text"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultsDate {
    pub date: String,
    #[serde(default)]
    pub question_count: i64,
}

pub struct FridayPulse<'a> {
    client: &'a dyn HttpClient,
    bearer_token: String,
    base_url: String,
}

impl<'a> FridayPulse<'a> {
    pub fn new(client: &'a dyn HttpClient, bearer_token: &str) -> FridayPulse<'a> {
        FridayPulse {
            client,
            bearer_token: bearer_token.to_string(),
            base_url: FRIDAY_PULSE_API.to_string(),
        }
    }

    fn request(&self, path: &str) -> Result<Json> {
        let request = Request::get(format!("{}/{}", self.base_url, path)).bearer(&self.bearer_token);
        self.client
            .send(&request)?
            .error_for_status("Friday Pulse")?
            .json()
    }

    pub fn results_dates(&self) -> Result<Vec<ResultsDate>> {
        Ok(serde_json::from_value(self.request("api/v1/info/results-dates")?)?)
    }

    pub fn results(&self, date: &str) -> Result<Vec<Json>> {
        Ok(serde_json::from_value(self.request(&format!("api/v1/results?date={}", date))?)?)
    }

    /// Results of every date after `since`, flattened.  A date that fails is
    /// logged and skipped.
    pub fn get_all_results(&self, since: Option<&str>, max_dates: Option<usize>) -> Result<Vec<Map<String, Json>>> {
        let mut dates = self.results_dates()?;
        info!("Found {} result dates", dates.len());
        if let Some(since) = since {
            dates.retain(|d| d.date.as_str() > since);
            info!("Filtered to {} dates after {}", dates.len(), since);
        }
        if let Some(max) = max_dates {
            dates.truncate(max);
        }

        let mut all_results = Vec::new();
        for (i, date) in dates.iter().enumerate() {
            info!(
                "Processing date {}/{}: {} ({} questions)",
                i + 1,
                dates.len(),
                date.date,
                date.question_count
            );
            match self.results(&date.date) {
                Ok(results) => {
                    info!("Retrieved {} results for {}", results.len(), date.date);
                    all_results.extend(results.iter().map(|r| flatten_result(r, date.question_count)));
                }
                Err(e) => error!("Error retrieving results for {}: {}, skipping", date.date, e),
            }
        }
        info!(
            "Retrieved {} results from {} dates",
            all_results.len(),
            dates.len()
        );
        Ok(all_results)
    }
}

pub fn flatten_result(result: &Json, question_count: i64) -> Map<String, Json> {
    let topic = &result["topic"];
    let mut flat = Map::new();
    for key in ["sample_date", "score", "response_rate", "response_count", "total_count"] {
        flat.insert(key.to_string(), result[key].clone());
    }
    flat.insert("question_count".to_string(), json!(question_count));
    flat.insert("topic_code".to_string(), topic["code"].clone());
    flat.insert("topic_name".to_string(), topic["name"].clone());
    flat
}

/// The day to load from: the high water mark minus the lookback, so results
/// that were still coming in are loaded again.  `None` means a full load.
pub fn since_date(high_water_mark: &str, lookback_weeks: i64) -> Option<String> {
    let mark = high_water_mark.trim();
    if mark.is_empty() {
        info!("Full load: {} parameter not set", HIGH_WATER_MARK);
        return None;
    }
    let since = mark
        .get(..10)
        .and_then(|d| d.parse::<Date>().ok())
        .and_then(|d| d.checked_sub(lookback_weeks.weeks()).ok());
    match since {
        Some(since) => {
            info!(
                "Incremental load: fetching results after {} ({} weeks before the high water mark)",
                since, lookback_weeks
            );
            Some(since.to_string())
        }
        None => {
            warn!("Could not read the high water mark {:?}, performing a full load", mark);
            None
        }
    }
}

pub fn friday_pulse_load_data(ws: &mut WhereScape, client: &dyn HttpClient, lookback_weeks: i64) -> Result<usize> {
    let stopwatch = Stopwatch::start("friday_pulse_load_data");
    let high_water_mark = ws.read_parameter(HIGH_WATER_MARK).unwrap_or_else(|e| {
        warn!("Could not read {}: {}", HIGH_WATER_MARK, e);
        String::new()
    });
    let since = since_date(&high_water_mark, lookback_weeks);

    info!("Requesting data from Friday Pulse");
    let friday_pulse = FridayPulse::new(client, &ws.context.source_apikey);
    let records = friday_pulse.get_all_results(since.as_deref(), None)?;
    if records.is_empty() {
        ws.main_message = "No new results received from Friday Pulse".to_string();
        ws.update_task_log(TaskCounts::default());
        stopwatch.finish();
        return Ok(0);
    }

    let received: Vec<&str> = records[0].keys().map(|k| k.as_str()).collect();
    let columns: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    reconcile_columns(&received, &columns);

    let rows = records_to_rows(&records, COLUMNS);
    let n = load_rows(ws, &columns, rows, RECORD_SOURCE, stopwatch.started_at())?;
    ws.main_message = format!("Loaded {} Friday Pulse results into {}", n, ws.load_full_name());
    ws.update_task_log(TaskCounts {
        inserted: n as i64,
        ..Default::default()
    });
    stopwatch.finish();
    Ok(n)
}

pub fn friday_pulse_create_metadata(ws: &mut WhereScape) -> Result<()> {
    let key = ws.require_object_key()?;
    let columns: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    info!("Preparing metadata for {} columns", columns.len());
    let sql = MetadataQuery::new(key, RECORD_SOURCE)
        .columns(&columns)
        .display_names(&DISPLAY_NAMES)
        .types(&TYPES)
        .build();
    ws.push_script_to_meta(&sql)?;
    ws.main_message = format!(
        "Created {} columns in metadata table for Friday Pulse results",
        columns.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Value;
    use crate::http::fake::FakeClient;
    use crate::wherescape::fixtures::{instance, load_table_ddl};

    fn dates() -> Json {
        json!([
            {"date": "2024-04-26", "question_count": 5},
            {"date": "2024-05-03", "question_count": 6},
            {"date": "2024-05-10", "question_count": 6}
        ])
    }

    fn result(code: &str) -> Json {
        json!({
            "sample_date": "2024-05-10",
            "score": 7.25,
            "response_rate": 0.8,
            "response_count": 40,
            "total_count": 50,
            "topic": {"code": code, "name": "Workload"}
        })
    }

    #[test]
    fn since_from_high_water_mark() {
        assert_eq!(since_date("2024-05-24 10:15:00.000", 3).as_deref(), Some("2024-05-03"));
        assert_eq!(since_date("  ", 3), None);
        assert_eq!(since_date("yesterday", 3), None);
    }

    #[test]
    fn flatten() {
        let flat = flatten_result(&result("workload"), 6);
        let keys: Vec<&str> = flat.keys().map(|k| k.as_str()).collect();
        let expected: Vec<&str> = COLUMNS.iter().map(|(c, _)| *c).collect();
        assert_eq!(keys, expected);
        assert_eq!(flat["topic_code"], "workload");
        assert_eq!(flatten_result(&json!({"score": 1}), 2)["topic_name"], Json::Null);
    }

    #[test]
    fn dates_after_since_and_failures_skipped() -> Result<()> {
        let client = FakeClient::new();
        client
            .push_json(200, dates())
            .push_json(500, json!({"error": "boom"}))
            .push_json(200, json!([result("a"), result("b")]));
        let friday_pulse = FridayPulse::new(&client, "secret");
        let results = friday_pulse.get_all_results(Some("2024-04-26"), None)?;
        assert_eq!(results.len(), 2);
        let urls = client.urls();
        assert_eq!(urls[1], "https://app.fridaypulse.com/api/v1/results?date=2024-05-03");
        assert_eq!(urls[2], "https://app.fridaypulse.com/api/v1/results?date=2024-05-10");
        Ok(())
    }

    #[test]
    fn max_dates() -> Result<()> {
        let client = FakeClient::new();
        client.push_json(200, dates()).push_json(200, json!([]));
        let friday_pulse = FridayPulse::new(&client, "secret");
        assert!(friday_pulse.get_all_results(None, Some(1))?.is_empty());
        assert_eq!(client.urls().len(), 2);
        Ok(())
    }

    #[test]
    fn load_data() -> Result<()> {
        let columns: Vec<&str> = COLUMNS.iter().map(|(c, _)| *c).collect();
        let types = ["DATE", "DOUBLE", "DOUBLE", "BIGINT", "BIGINT", "BIGINT", "VARCHAR", "VARCHAR"];
        let mut ws = instance(
            "load_friday_pulse_question",
            "load",
            "INSERT INTO dss_parameter VALUES ('HWM_ds_friday_pulse_question', '2024-05-24 10:15:00.000', '');",
            &load_table_ddl("load.load_friday_pulse_question", &columns, &types),
        );
        let client = FakeClient::new();
        client
            .push_json(200, dates())
            .push_json(200, json!([result("workload")]));
        assert_eq!(friday_pulse_load_data(&mut ws, &client, 3)?, 1);
        // three weeks before the mark is 2024-05-03, only 2024-05-10 comes after it
        assert_eq!(client.urls().len(), 2);
        let rows = ws.query_target(
            "SELECT sample_date, response_count, topic_code, dss_record_source FROM load.load_friday_pulse_question",
            &[],
        )?;
        assert_eq!(
            rows[0],
            vec![
                Value::Date(jiff::civil::date(2024, 5, 10)),
                Value::Int(40),
                "workload".into(),
                RECORD_SOURCE.into()
            ]
        );
        Ok(())
    }

    #[test]
    fn nothing_new() -> Result<()> {
        let mut ws = instance("load_friday_pulse_question", "load", "", "");
        let client = FakeClient::new();
        client.push_json(200, json!([]));
        assert_eq!(friday_pulse_load_data(&mut ws, &client, DEFAULT_LOOKBACK_WEEKS)?, 0);
        assert_eq!(ws.main_message, "No new results received from Friday Pulse");
        Ok(())
    }

    #[test]
    fn create_metadata() -> Result<()> {
        let mut ws = instance(
            "load_friday_pulse_question",
            "load",
            "INSERT INTO ws_load_tab VALUES (2, 'load_friday_pulse_question', '', '');",
            "",
        );
        friday_pulse_create_metadata(&mut ws)?;
        let (names, types) = ws.get_columns()?;
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "sample_date");
        assert_eq!(types[..3], ["date", "numeric", "numeric"]);
        Ok(())
    }
}
