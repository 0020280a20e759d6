pub mod duck;
#[cfg(feature = "odbc")]
pub mod odbc;

use std::fmt;

use jiff::civil::{Date, DateTime};

use crate::environment::{Backend, ConnectionSpec};
use crate::error::{Error, Result};

/// A single cell going in or out of a database.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(Date),
    DateTime(DateTime),
}

pub type Row = Vec<Value>;

impl Value {
    /// Scalars map one to one, objects and arrays are stored as their json text.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The value as a string, `None` for null.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(dt) => write!(f, "{}", dt.strftime("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime> for Value {
    fn from(dt: DateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Date> for Value {
    fn from(d: Date) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// The metadata repository of WhereScape lives in SQL Server and exposes its
/// parameters and job logs through stored procedures.  Other databases get a
/// plain table instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    SqlServer,
    Generic,
}

pub trait Database {
    /// Run a statement that returns rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a single statement, return the number of rows affected.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run a script of one or more statements without parameters.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Run the statement once for every row inside one transaction.  Rolls back
    /// everything if one of the rows fails.
    fn execute_many(&self, sql: &str, rows: &[Row]) -> Result<usize>;

    fn dialect(&self) -> Dialect;
}

/// Open a connection with the given settings.
pub fn connect(
    backend: Backend,
    spec: &ConnectionSpec,
    dialect: Dialect,
) -> Result<Box<dyn Database>> {
    match backend {
        Backend::DuckDb => Ok(Box::new(duck::DuckDatabase::open(&spec.dsn, dialect)?)),
        #[cfg(feature = "odbc")]
        Backend::Odbc => Ok(Box::new(odbc::OdbcDatabase::connect(
            &spec.connection_string(),
            dialect,
        )?)),
        #[cfg(not(feature = "odbc"))]
        Backend::Odbc => Err(Error::Config(
            "this build has no odbc support, rebuild with --features odbc or set WSL_DB_BACKEND=duckdb"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use jiff::civil::datetime;
    use serde_json::json;

    use super::*;

    #[test]
    fn value_from_json() {
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(Value::from_json(&json!(12)), Value::Int(12));
        assert_eq!(Value::from_json(&json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from_json(&json!("a")), Value::Text("a".into()));
        assert_eq!(
            Value::from_json(&json!(["a", 1])),
            Value::Text("[\"a\",1]".into())
        );
    }

    #[test]
    fn value_display() {
        let dt = datetime(2024, 3, 1, 14, 5, 0, 0);
        assert_eq!(Value::DateTime(dt).to_string(), "2024-03-01 14:05:00");
        assert_eq!(Value::Null.as_string(), None);
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), Some(42));
    }
}
