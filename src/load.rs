use itertools::Itertools;
use jiff::{civil::DateTime, Zoned};
use log::{info, warn};

use crate::{
    db::{Row, Value},
    error::Result,
    wherescape::WhereScape,
};

pub const DSS_RECORD_SOURCE: &str = "dss_record_source";
pub const DSS_LOAD_DATE: &str = "dss_load_date";

pub fn insert_statement<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.iter().map(|c| c.as_ref()).join(", "),
        columns.iter().map(|_| "?").join(", ")
    )
}

/// Insert the rows in the load table, with the `dss_record_source` and
/// `dss_load_date` columns added.  Returns the number of rows inserted.
pub fn load_rows<S: AsRef<str>>(
    ws: &WhereScape,
    columns: &[S],
    rows: Vec<Row>,
    record_source: &str,
    load_date: DateTime,
) -> Result<usize> {
    let mut all_columns: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    all_columns.push(DSS_RECORD_SOURCE);
    all_columns.push(DSS_LOAD_DATE);

    let rows: Vec<Row> = rows
        .into_iter()
        .map(|mut row| {
            row.push(Value::Text(record_source.to_string()));
            row.push(Value::DateTime(load_date));
            row
        })
        .collect();

    let sql = insert_statement(ws.load_full_name(), &all_columns);
    ws.push_many_to_target(&sql, &rows)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDiff {
    /// Expected but not received.
    pub missing: Vec<String>,
    /// Received but not expected.
    pub unexpected: Vec<String>,
}

impl ColumnDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Compare the columns an api returned with the columns the load table
/// expects.  Differences are logged as a warning.
pub fn reconcile_columns<S: AsRef<str>, T: AsRef<str>>(received: &[S], expected: &[T]) -> ColumnDiff {
    let received: Vec<&str> = received.iter().map(|c| c.as_ref()).collect();
    let expected: Vec<&str> = expected.iter().map(|c| c.as_ref()).collect();
    let diff = ColumnDiff {
        missing: expected
            .iter()
            .filter(|c| !received.contains(c))
            .map(|c| c.to_string())
            .collect(),
        unexpected: received
            .iter()
            .filter(|c| !expected.contains(c))
            .map(|c| c.to_string())
            .collect(),
    };
    if !diff.missing.is_empty() {
        warn!("Missing columns: {}", diff.missing.join(", "));
    }
    if !diff.unexpected.is_empty() {
        warn!("Unexpected columns: {}", diff.unexpected.join(", "));
    }
    diff
}

/// Logs the start and the duration of a job.
pub struct Stopwatch {
    name: String,
    start: Zoned,
}

impl Stopwatch {
    pub fn start(name: &str) -> Stopwatch {
        let start = Zoned::now();
        info!(
            "Start time: {} for {}",
            start.strftime("%Y-%m-%d %H:%M:%S"),
            name
        );
        Stopwatch {
            name: name.to_string(),
            start,
        }
    }

    /// The start time, used as `dss_load_date`.
    pub fn started_at(&self) -> DateTime {
        self.start.datetime()
    }

    pub fn finish(self) {
        let end = Zoned::now();
        let seconds = end.timestamp().as_second() - self.start.timestamp().as_second();
        info!("End time: {}", end.strftime("%Y-%m-%d %H:%M:%S"));
        info!("Time elapsed: {} seconds for {}", seconds, self.name);
    }
}
