use lazy_static::lazy_static;
use log::warn;
use odbc_api::{
    parameter::InputParameter, Bit, Connection, ConnectionOptions, Cursor, Environment,
    IntoParameter, ResultSetMetadata,
};

use super::{Database, Dialect, Row, Value};
use crate::error::{Error, Result};

lazy_static! {
    static ref ODBC_ENV: std::result::Result<Environment, String> =
        Environment::new().map_err(|e| e.to_string());
}

/// Connection through the ODBC driver manager, used for the WhereScape
/// repository (SQL Server) and the warehouse (PostgreSQL).
pub struct OdbcDatabase {
    conn: Connection<'static>,
    dialect: Dialect,
}

impl OdbcDatabase {
    pub fn connect(connection_string: &str, dialect: Dialect) -> Result<OdbcDatabase> {
        let env = ODBC_ENV.as_ref().map_err(|e| Error::Odbc(e.clone()))?;
        let conn =
            env.connect_with_connection_string(connection_string, ConnectionOptions::default())?;
        Ok(OdbcDatabase { conn, dialect })
    }
}

fn to_parameters(values: &[Value]) -> Vec<Box<dyn InputParameter>> {
    values
        .iter()
        .map(|v| -> Box<dyn InputParameter> {
            match v {
                Value::Null => Box::new(None::<i64>.into_parameter()),
                Value::Bool(b) => Box::new(Bit::from_bool(*b)),
                Value::Int(i) => Box::new(*i),
                Value::Float(x) => Box::new(*x),
                // dates go over the wire as ISO text and are cast by the server
                other => Box::new(other.to_string().into_parameter()),
            }
        })
        .collect()
}

impl Database for OdbcDatabase {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let params = to_parameters(params);
        let mut out: Vec<Row> = Vec::new();
        if let Some(mut cursor) = self.conn.execute(sql, params.as_slice())? {
            let n = cursor.num_result_cols()? as u16;
            let mut buf = Vec::new();
            while let Some(mut row) = cursor.next_row()? {
                let mut values = Vec::with_capacity(n as usize);
                for col in 1..=n {
                    buf.clear();
                    if row.get_text(col, &mut buf)? {
                        values.push(Value::Text(String::from_utf8_lossy(&buf).into_owned()));
                    } else {
                        values.push(Value::Null);
                    }
                }
                out.push(values);
            }
        }
        self.conn.commit()?;
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let params = to_parameters(params);
        let mut stmt = self.conn.preallocate()?;
        stmt.execute(sql, params.as_slice())?;
        let n = stmt.row_count()?.unwrap_or(0);
        self.conn.commit()?;
        Ok(n)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute(sql, ())?;
        self.conn.commit()?;
        Ok(())
    }

    fn execute_many(&self, sql: &str, rows: &[Row]) -> Result<usize> {
        self.conn.set_autocommit(false)?;
        let res = (|| -> Result<usize> {
            let mut prepared = self.conn.prepare(sql)?;
            let mut count = 0;
            for row in rows {
                let params = to_parameters(row);
                prepared.execute(params.as_slice())?;
                count += prepared.row_count()?.unwrap_or(0);
            }
            Ok(count)
        })();
        let res = match res {
            Ok(count) => self.conn.commit().map(|_| count).map_err(Error::from),
            Err(e) => {
                warn!("Rolling back transaction: {}", e);
                self.conn.rollback()?;
                Err(e)
            }
        };
        self.conn.set_autocommit(true)?;
        res
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}
