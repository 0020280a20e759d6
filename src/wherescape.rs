use std::error::Error as StdError;

use log::{error, info, warn};

use crate::{
    db::{self, Database, Dialect, Row, Value},
    environment::{self, JobContext},
    error::{Error, Result},
    logging,
};

/// Row counts reported to the WhereScape task log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub inserted: i64,
    pub updated: i64,
    pub replaced: i64,
    pub deleted: i64,
    pub discarded: i64,
    pub rejected: i64,
    pub errored: i64,
}

/// Result of the WhereScape housekeeping procedures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureResult {
    /// S (success), E (error) or F (fatal)
    pub code: String,
    pub message: String,
    pub result: i64,
}

/// Connections and context of the WhereScape job that started this process.
pub struct WhereScape {
    pub context: JobContext,
    meta: Box<dyn Database>,
    target: Box<dyn Database>,
    source: Option<Box<dyn Database>>,
    /// Key of the load or stage table being processed.
    pub object_key: Option<i64>,
    /// `lt_file_path` of the load table.
    pub file_path: Option<String>,
    /// `lt_file_name` of the load table.
    pub file_name: Option<String>,
    /// First line of the audit log.  When empty, a generic message is used.
    pub main_message: String,
}

impl WhereScape {
    pub fn connect(context: JobContext) -> Result<WhereScape> {
        let meta = db::connect(context.backend, &context.meta, Dialect::SqlServer)?;
        let target = db::connect(context.backend, &context.target, Dialect::Generic)?;
        let source = match &context.source {
            Some(spec) => Some(db::connect(context.backend, spec, Dialect::Generic)?),
            None => None,
        };
        WhereScape::from_parts(context, meta, target, source)
    }

    pub fn from_parts(
        context: JobContext,
        meta: Box<dyn Database>,
        target: Box<dyn Database>,
        source: Option<Box<dyn Database>>,
    ) -> Result<WhereScape> {
        let mut ws = WhereScape {
            context,
            meta,
            target,
            source,
            object_key: None,
            file_path: None,
            file_name: None,
            main_message: String::new(),
        };
        match ws.context.schema.as_str() {
            "load" => {
                let rows = ws.query_meta(
                    "SELECT lt_obj_key, lt_file_path, lt_file_name FROM ws_load_tab WHERE lt_table_name = ?",
                    &[ws.context.table.as_str().into()],
                )?;
                if let Some(row) = rows.first() {
                    ws.object_key = row[0].as_i64();
                    ws.file_path = row[1].as_string();
                    ws.file_name = row[2].as_string();
                }
            }
            "stage" => {
                let rows = ws.query_meta(
                    "SELECT st_obj_key FROM ws_stage_tab WHERE st_table_name = ?",
                    &[ws.context.table.as_str().into()],
                )?;
                if let Some(row) = rows.first() {
                    ws.object_key = row[0].as_i64();
                }
            }
            _ => {}
        }
        Ok(ws)
    }

    pub fn table(&self) -> &str {
        &self.context.table
    }

    pub fn schema(&self) -> &str {
        &self.context.schema
    }

    pub fn load_full_name(&self) -> &str {
        &self.context.load_full_name
    }

    /// The object key, or an error if the table is not known to WhereScape.
    pub fn require_object_key(&self) -> Result<i64> {
        self.object_key
            .ok_or_else(|| Error::MetadataNotFound(self.context.table.clone()))
    }

    /// Column names and types of the load or stage table, in column order.
    pub fn get_columns(&self) -> Result<(Vec<String>, Vec<String>)> {
        let sql = match self.context.schema.as_str() {
            "load" => "SELECT lc_col_name, lc_data_type FROM ws_load_col WHERE lc_obj_key = ? ORDER BY lc_order",
            "stage" => "SELECT sc_col_name, sc_data_type FROM ws_stage_col WHERE sc_obj_key = ? ORDER BY sc_order",
            _ => return Ok((Vec::new(), Vec::new())),
        };
        let Some(key) = self.object_key else {
            return Ok((Vec::new(), Vec::new()));
        };
        let rows = self.query_meta(sql, &[Value::Int(key)])?;
        let names = rows
            .iter()
            .map(|r| r[0].as_string().unwrap_or_default())
            .collect();
        let types = rows
            .iter()
            .map(|r| r[1].as_string().unwrap_or_default())
            .collect();
        Ok((names, types))
    }

    pub fn query_meta(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.meta.query(sql, params)
    }

    pub fn push_to_meta(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.meta.execute(sql, params)
    }

    /// For scripts with more than one statement, e.g. the metadata updates.
    pub fn push_script_to_meta(&self, sql: &str) -> Result<()> {
        self.meta.execute_batch(sql)
    }

    pub fn query_target(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.target.query(sql, params)
    }

    pub fn push_to_target(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.target.execute(sql, params)
    }

    /// Insert many rows in one transaction.  Nothing is inserted if one row fails.
    pub fn push_many_to_target(&self, sql: &str, rows: &[Row]) -> Result<usize> {
        self.target.execute_many(sql, rows)
    }

    fn source(&self) -> Result<&dyn Database> {
        self.source
            .as_deref()
            .ok_or_else(|| Error::Config("no source connection configured (WSL_SRC_DSN)".to_string()))
    }

    pub fn query_source(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.source()?.query(sql, params)
    }

    pub fn push_to_source(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.source()?.execute(sql, params)
    }

    /// Value of a WhereScape parameter, empty if it doesn't exist.
    pub fn read_parameter(&self, name: &str) -> Result<String> {
        Ok(self.read_parameter_with_comment(name)?.0)
    }

    pub fn read_parameter_with_comment(&self, name: &str) -> Result<(String, String)> {
        let sql = match self.meta.dialect() {
            Dialect::SqlServer => {
                r#"
DECLARE @out varchar(max),@out1 varchar(max);
EXEC WsParameterRead
  @p_parameter = ?
, @p_value = @out OUTPUT
, @p_comment=@out1 OUTPUT;
SELECT @out AS p_value,@out1 AS p_comment;"#
            }
            Dialect::Generic => {
                "SELECT dss_parameter_value, dss_parameter_comments FROM dss_parameter WHERE dss_parameter_name = ?"
            }
        };
        let rows = self.query_meta(sql, &[name.into()])?;
        Ok(match rows.first() {
            Some(row) => (
                row[0].as_string().unwrap_or_default(),
                row[1].as_string().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        })
    }

    /// Returns 1 when the parameter was updated, 2 when it was added and -3
    /// on an error.
    pub fn write_parameter(&self, name: &str, value: &str, comment: Option<&str>) -> Result<i64> {
        match self.meta.dialect() {
            Dialect::SqlServer => {
                let sql = r#"
DECLARE @out INT;
EXEC  @out=WsParameterWrite
  @p_parameter = ?
, @p_value = ?
, @p_comment  = ?;
SELECT @out AS return_value;"#;
                let rows = self.query_meta(sql, &[name.into(), value.into(), comment.into()])?;
                Ok(rows.first().and_then(|r| r[0].as_i64()).unwrap_or(-3))
            }
            Dialect::Generic => {
                let updated = self.push_to_meta(
                    "UPDATE dss_parameter SET dss_parameter_value = ?, dss_parameter_comments = coalesce(?, dss_parameter_comments) WHERE dss_parameter_name = ?",
                    &[value.into(), comment.into(), name.into()],
                )?;
                if updated > 0 {
                    return Ok(1);
                }
                let added = self.push_to_meta(
                    "INSERT INTO dss_parameter (dss_parameter_name, dss_parameter_value, dss_parameter_comments) VALUES (?, ?, ?)",
                    &[name.into(), value.into(), comment.into()],
                )?;
                Ok(if added > 0 { 2 } else { -3 })
            }
        }
    }

    fn common_parameters(&self) -> Vec<Value> {
        vec![
            self.context.sequence.as_str().into(),
            self.context.job_name.as_str().into(),
            self.context.task_name.as_str().into(),
            self.context.job_key.as_str().into(),
            self.context.task_key.as_str().into(),
        ]
    }

    fn procedure_result(&self, sql: &str, params: Vec<Value>) -> Result<ProcedureResult> {
        if self.meta.dialect() != Dialect::SqlServer {
            return Err(Error::UnsupportedDialect(
                self.meta.dialect(),
                "WhereScape job procedures".to_string(),
            ));
        }
        let rows = self.query_meta(sql, &params)?;
        let row = rows
            .first()
            .ok_or_else(|| Error::Config("procedure returned no result".to_string()))?;
        Ok(ProcedureResult {
            code: row[0].as_string().unwrap_or_default(),
            message: row[1].as_string().unwrap_or_default(),
            result: row[2].as_i64().unwrap_or(-3),
        })
    }

    /// Archive the logs of the matching jobs (`%` is a wildcard) that are
    /// older than `days_to_retain`.
    pub fn job_clear_logs_by_date(
        &self,
        days_to_retain: i64,
        job_to_clean: &str,
    ) -> Result<ProcedureResult> {
        let sql = r#"
DECLARE @out nvarchar(max),@out1 nvarchar(max),@out2 nvarchar(max);
EXEC Ws_Job_Clear_Logs_By_Date
  @p_sequence  = ?
, @p_job_name  = ?
, @p_task_name  = ?
, @p_job_id = ?
, @p_task_id = ?
, @p_job_to_clean = ?
, @p_day_count = ?
, @p_return_code = @out OUTPUT
, @p_return_msg = @out1 OUTPUT
, @p_result   = @out2 OUTPUT;
SELECT @out AS return_code,@out1 AS return_msg,@out2 AS return_result;"#;
        let mut params = self.common_parameters();
        params.push(job_to_clean.into());
        params.push(Value::Int(days_to_retain));
        self.procedure_result(sql, params)
    }

    /// Purge archived logs older than `days_to_retain`.
    pub fn job_clear_archive_by_date(
        &self,
        days_to_retain: i64,
        job_to_clean: &str,
    ) -> Result<ProcedureResult> {
        let sql = r#"
DECLARE @out nvarchar(max),@out1 nvarchar(max),@out2 nvarchar(max);
EXEC Ws_Job_Clear_Archive
  @p_sequence  = ?
, @p_job_name  = ?
, @p_task_name  = ?
, @p_job_id = ?
, @p_task_id = ?
, @p_day_count = ?
, @p_job = ?
, @p_options = ?
, @p_return_code = @out OUTPUT
, @p_return_msg = @out1 OUTPUT
, @p_result   = @out2 OUTPUT;
SELECT @out AS return_code,@out1 AS return_msg,@out2 AS return_result;"#;
        let mut params = self.common_parameters();
        params.push(Value::Int(days_to_retain));
        params.push(job_to_clean.into());
        // "TRUNCATE" would drop all archived logs
        params.push("".into());
        self.procedure_result(sql, params)
    }

    /// Report row counts to the task log of the running job.  Returns 0 on
    /// success, -1 for a warning and -3 for an error.  A failure to report is
    /// logged, it doesn't fail the job.
    pub fn update_task_log(&self, counts: TaskCounts) -> Option<i64> {
        if self.meta.dialect() != Dialect::SqlServer {
            info!("Task log not available, counts: {:?}", counts);
            return None;
        }
        let sql = r#"
SET NOCOUNT ON
DECLARE @out nvarchar(max);
EXEC @out=WsWrkTask
  @p_job_key = ?
, @p_task_key = ?
, @p_sequence = ?
, @p_inserted = ?
, @p_updated   = ?
, @p_replaced  = ?
, @p_deleted    = ?
, @p_discarded  = ?
, @p_rejected  = ?
, @p_errored   = ?;
SELECT @out AS return_value;"#;
        let params: Vec<Value> = vec![
            self.context.job_key.as_str().into(),
            self.context.task_key.as_str().into(),
            self.context.sequence.as_str().into(),
            counts.inserted.into(),
            counts.updated.into(),
            counts.replaced.into(),
            counts.deleted.into(),
            counts.discarded.into(),
            counts.rejected.into(),
            counts.errored.into(),
        ];
        match self.query_meta(sql, &params) {
            Ok(rows) => {
                let result = rows.first().and_then(|r| r[0].as_i64());
                match result {
                    Some(0) => info!("Task log updated: {:?}", counts),
                    Some(code) => warn!("Task log update returned {}", code),
                    None => warn!("Task log update returned nothing"),
                }
                result
            }
            Err(e) => {
                error!("Failed to update the task log: {}", e);
                None
            }
        }
    }
}

/// Run a job the way WhereScape expects it: set up logging, connect, run the
/// job and print the exit code with the collected log records.
///
/// `env` is the name of a `.env/{env}.env` file to load first, for running
/// a job outside of WhereScape.
pub fn run_job<F>(env: Option<&str>, job: F) -> std::result::Result<(), Box<dyn StdError>>
where
    F: FnOnce(&mut WhereScape) -> Result<()>,
{
    let dotenv = env.map(environment::load_dotenv).transpose()?;
    let context = JobContext::from_env()?;
    let job_name = context.job_name.clone();
    let report = logging::init(&context.workdir)?;
    if let Some(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let mut main_message = String::new();
    let res = WhereScape::connect(context).and_then(|mut ws| {
        let res = job(&mut ws);
        main_message = ws.main_message.clone();
        res
    });
    if let Err(e) = res {
        report.mark_fatal();
        error!("Unhandled error: {}", e);
    }
    log::logger().flush();
    print!("{}", report.render(&main_message, &job_name));
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::db::duck::DuckDatabase;
    use crate::environment::JobContext;

    pub const META_SCHEMA: &str = r#"
CREATE TABLE ws_load_tab (lt_obj_key BIGINT, lt_table_name VARCHAR, lt_file_path VARCHAR, lt_file_name VARCHAR);
CREATE TABLE ws_load_col (lc_obj_key BIGINT, lc_col_name VARCHAR, lc_display_name VARCHAR, lc_src_table VARCHAR,
    lc_src_column VARCHAR, lc_src_strategy VARCHAR, lc_data_type VARCHAR, lc_nulls_flag VARCHAR, lc_numeric_flag VARCHAR,
    lc_additive_flag VARCHAR, lc_attribute_flag VARCHAR, lc_order BIGINT);
CREATE TABLE ws_stage_tab (st_obj_key BIGINT, st_table_name VARCHAR);
CREATE TABLE ws_stage_col (sc_obj_key BIGINT, sc_col_name VARCHAR, sc_data_type VARCHAR, sc_order BIGINT);
CREATE TABLE dss_parameter (dss_parameter_name VARCHAR, dss_parameter_value VARCHAR, dss_parameter_comments VARCHAR);
"#;

    pub fn context(table: &str, schema: &str) -> JobContext {
        let table = table.to_string();
        let schema = schema.to_string();
        JobContext::from_lookup(move |key| match key {
            "WSL_DB_BACKEND" => Some("duckdb".to_string()),
            "WSL_META_DSN" => Some(":memory:".to_string()),
            "WSL_TGT_DSN" => Some(":memory:".to_string()),
            "WSL_LOAD_TABLE" => Some(table.clone()),
            "WSL_LOAD_SCHEMA" => Some(schema.clone()),
            "WSL_LOAD_FULLNAME" => Some(format!("{}.{}", schema, table)),
            "WSL_JOB_NAME" => Some("test_job".to_string()),
            _ => None,
        })
        .expect("valid test context")
    }

    /// Create a load table with the dss columns, in a `load` schema.
    pub fn load_table_ddl<S: AsRef<str>, T: AsRef<str>>(full_name: &str, columns: &[S], types: &[T]) -> String {
        let mut ddl = format!("CREATE SCHEMA IF NOT EXISTS load;\nCREATE TABLE {} (", full_name);
        for (column, data_type) in columns.iter().zip(types) {
            ddl.push_str(&format!("\"{}\" {}, ", column.as_ref(), data_type.as_ref()));
        }
        ddl.push_str("dss_record_source VARCHAR, dss_load_date TIMESTAMP);");
        ddl
    }

    /// A WhereScape instance on in-memory databases.  `meta_sql` and
    /// `target_sql` run after the metadata tables are created.
    pub fn instance(table: &str, schema: &str, meta_sql: &str, target_sql: &str) -> WhereScape {
        let meta = DuckDatabase::in_memory(Dialect::Generic).expect("meta db");
        meta.execute_batch(META_SCHEMA).expect("meta schema");
        if !meta_sql.is_empty() {
            meta.execute_batch(meta_sql).expect("meta sql");
        }
        let target = DuckDatabase::in_memory(Dialect::Generic).expect("target db");
        if !target_sql.is_empty() {
            target.execute_batch(target_sql).expect("target sql");
        }
        WhereScape::from_parts(context(table, schema), Box::new(meta), Box::new(target), None)
            .expect("wherescape instance")
    }
}
