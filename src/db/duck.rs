use std::time::Duration;

use duckdb::{
    params_from_iter,
    types::{TimeUnit, Value as DuckValue},
    AccessMode, Config, Connection,
};
use jiff::{
    civil::{date, Date},
    tz::TimeZone,
    Timestamp, ToSpan,
};
use log::{info, warn};

use super::{Database, Dialect, Row, Value};
use crate::error::Result;

pub struct DuckDatabase {
    conn: Connection,
    dialect: Dialect,
}

impl DuckDatabase {
    /// Open a DuckDB file, use `:memory:` for an in-memory database.
    pub fn open(path: &str, dialect: Dialect) -> Result<DuckDatabase> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            open_with_retry(path, 8, Duration::from_millis(25), AccessMode::ReadWrite)?
        };
        Ok(DuckDatabase { conn, dialect })
    }

    pub fn in_memory(dialect: Dialect) -> Result<DuckDatabase> {
        Ok(DuckDatabase {
            conn: Connection::open_in_memory()?,
            dialect,
        })
    }
}

impl Database for DuckDatabase {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_duck)))?;
        let mut out: Vec<Row> = Vec::new();
        while let Some(row) = rows.next()? {
            let n = row.as_ref().column_count();
            let mut values = Vec::with_capacity(n);
            for i in 0..n {
                values.push(from_duck(row.get::<usize, DuckValue>(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let n = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_duck)))?;
        Ok(n)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute_many(&self, sql: &str, rows: &[Row]) -> Result<usize> {
        self.conn.execute_batch("BEGIN TRANSACTION;")?;
        let res = (|| -> Result<usize> {
            let mut stmt = self.conn.prepare(sql)?;
            let mut count = 0;
            for row in rows {
                count += stmt.execute(params_from_iter(row.iter().map(to_duck)))?;
            }
            Ok(count)
        })();
        match res {
            Ok(count) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(count)
            }
            Err(e) => {
                warn!("Rolling back transaction: {}", e);
                self.conn.execute_batch("ROLLBACK;")?;
                Err(e)
            }
        }
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

fn epoch() -> Date {
    date(1970, 1, 1)
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(x) => DuckValue::Double(*x),
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::Date(d) => DuckValue::Date32((*d - epoch()).get_days()),
        Value::DateTime(dt) => match dt.to_zoned(TimeZone::UTC) {
            Ok(z) => DuckValue::Timestamp(TimeUnit::Microsecond, z.timestamp().as_microsecond()),
            Err(_) => DuckValue::Text(dt.to_string()),
        },
    }
}

fn from_duck(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::Int(i as i64),
        DuckValue::SmallInt(i) => Value::Int(i as i64),
        DuckValue::Int(i) => Value::Int(i as i64),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::HugeInt(i) => Value::Int(i as i64),
        DuckValue::UTinyInt(i) => Value::Int(i as i64),
        DuckValue::USmallInt(i) => Value::Int(i as i64),
        DuckValue::UInt(i) => Value::Int(i as i64),
        DuckValue::UBigInt(i) => Value::Int(i as i64),
        DuckValue::Float(x) => Value::Float(x as f64),
        DuckValue::Double(x) => Value::Float(x),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Enum(s) => Value::Text(s),
        DuckValue::Date32(n) => Value::Date(epoch() + n.days()),
        DuckValue::Timestamp(unit, n) => {
            let micros = match unit {
                TimeUnit::Second => n * 1_000_000,
                TimeUnit::Millisecond => n * 1_000,
                TimeUnit::Microsecond => n,
                TimeUnit::Nanosecond => n / 1_000,
            };
            match Timestamp::from_microsecond(micros) {
                Ok(ts) => Value::DateTime(ts.to_zoned(TimeZone::UTC).datetime()),
                Err(_) => Value::Null,
            }
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
/// Another job may hold the file lock for a short while.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> std::result::Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        // duckdb's AccessMode does not implement Clone.
        let mode = match access_mode {
            AccessMode::Automatic => AccessMode::Automatic,
            AccessMode::ReadOnly => AccessMode::ReadOnly,
            AccessMode::ReadWrite => AccessMode::ReadWrite,
        };
        let config = Config::default().access_mode(mode)?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
                info!(
                    "Retrying to open {} after error: {} (attempt {}/{})",
                    duckdb_path, e, attempts, max_attempts
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use jiff::civil::datetime;

    use super::*;

    #[test]
    fn insert_and_query() -> Result<()> {
        let db = DuckDatabase::in_memory(Dialect::Generic)?;
        db.execute_batch(
            "CREATE TABLE t (id BIGINT, name VARCHAR, ok BOOLEAN, day DATE, ts TIMESTAMP, x DOUBLE);",
        )?;
        let n = db.execute(
            "INSERT INTO t VALUES (?, ?, ?, ?, ?, ?)",
            &[
                Value::Int(1),
                "one".into(),
                Value::Bool(true),
                Value::Date(date(2024, 2, 29)),
                Value::DateTime(datetime(2024, 2, 29, 23, 59, 1, 0)),
                Value::Float(0.5),
            ],
        )?;
        assert_eq!(n, 1);
        let rows = db.query("SELECT * FROM t WHERE id = ?", &[Value::Int(1)])?;
        assert_eq!(
            rows,
            vec![vec![
                Value::Int(1),
                Value::Text("one".into()),
                Value::Bool(true),
                Value::Date(date(2024, 2, 29)),
                Value::DateTime(datetime(2024, 2, 29, 23, 59, 1, 0)),
                Value::Float(0.5),
            ]]
        );
        Ok(())
    }

    #[test]
    fn execute_many_rolls_back() -> Result<()> {
        let db = DuckDatabase::in_memory(Dialect::Generic)?;
        db.execute_batch("CREATE TABLE t (id BIGINT PRIMARY KEY);")?;
        let rows = vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(1)]];
        assert!(db.execute_many("INSERT INTO t VALUES (?)", &rows).is_err());
        let count = db.query("SELECT count(*) FROM t", &[])?;
        assert_eq!(count[0][0], Value::Int(0));

        let n = db.execute_many("INSERT INTO t VALUES (?)", &rows[..2])?;
        assert_eq!(n, 2);
        Ok(())
    }
}
