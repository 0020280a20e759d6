use std::{
    env,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// Which driver to use for the WhereScape connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Odbc,
    /// The DSN is a path to a DuckDB file, or `:memory:`.
    DuckDb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub dsn: String,
    pub user: String,
    pub password: String,
    /// Appended to the connection string, e.g. `;sslmode=prefer`.
    pub extra: String,
}

impl ConnectionSpec {
    pub fn connection_string(&self) -> String {
        format!(
            "DSN={};UID={};PWD={}{}",
            self.dsn, self.user, self.password, self.extra
        )
    }
}

/// Everything WhereScape hands to a host script through environment variables.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub backend: Backend,
    pub meta: ConnectionSpec,
    pub target: ConnectionSpec,
    pub source: Option<ConnectionSpec>,
    pub sequence: String,
    pub job_key: String,
    pub job_name: String,
    pub task_key: String,
    pub task_name: String,
    pub source_url: String,
    pub source_user: String,
    pub source_apikey: String,
    pub table: String,
    pub schema: String,
    pub load_full_name: String,
    pub workdir: String,
}

impl JobContext {
    pub fn from_env() -> Result<JobContext> {
        JobContext::from_lookup(|key| env::var(key).ok())
    }

    /// Build the context from any key lookup.  Useful to inject values in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<JobContext>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| Error::MissingEnv(key.to_string()));
        let optional = |key: &str| lookup(key).unwrap_or_default();

        let backend = match lookup("WSL_DB_BACKEND").as_deref() {
            Some("duckdb") => Backend::DuckDb,
            Some("odbc") => Backend::Odbc,
            Some(other) => {
                return Err(Error::Config(format!(
                    "WSL_DB_BACKEND must be odbc or duckdb, not {}",
                    other
                )))
            }
            None if cfg!(feature = "odbc") => Backend::Odbc,
            None => Backend::DuckDb,
        };

        let meta = ConnectionSpec {
            dsn: required("WSL_META_DSN")?,
            user: optional("WSL_META_USER"),
            password: optional("WSL_META_PWD"),
            extra: String::new(),
        };
        let target = ConnectionSpec {
            dsn: required("WSL_TGT_DSN")?,
            user: optional("WSL_TGT_USER"),
            password: optional("WSL_TGT_PWD"),
            extra: ";sslmode=prefer".to_string(),
        };
        let source = lookup("WSL_SRC_DSN")
            .filter(|dsn| !dsn.is_empty())
            .map(|dsn| ConnectionSpec {
                dsn,
                user: optional("WSL_SRC_USER"),
                password: optional("WSL_SRC_PWD"),
                extra: ";sslmode=prefer".to_string(),
            });

        Ok(JobContext {
            backend,
            meta,
            target,
            source,
            sequence: optional("WSL_SEQUENCE"),
            job_key: optional("WSL_JOB_KEY"),
            job_name: lookup("WSL_JOB_NAME").unwrap_or_else(|| "job".to_string()),
            task_key: optional("WSL_TASK_KEY"),
            task_name: optional("WSL_TASK_NAME"),
            source_url: optional("WSL_SRCCFG_URL"),
            source_user: optional("WSL_SRCCFG_USER"),
            source_apikey: optional("WSL_SRCCFG_APIKEY"),
            table: optional("WSL_LOAD_TABLE"),
            schema: optional("WSL_LOAD_SCHEMA"),
            load_full_name: optional("WSL_LOAD_FULLNAME"),
            workdir: lookup("WSL_WORKDIR").unwrap_or_else(|| "C:\\Temp".to_string()),
        })
    }

    /// A job is running against a development repository if the DSN of the
    /// metadata connection mentions `dev`.
    pub fn develop_env(&self) -> bool {
        self.meta
            .connection_string()
            .split(';')
            .next()
            .map(|s| s.to_lowercase().contains("dev"))
            .unwrap_or(false)
    }
}

/// Load `.env/{name}.env` for running a job outside of WhereScape.  Returns
/// the path that was loaded; the job logger isn't installed yet at this point.
pub fn load_dotenv(name: &str) -> Result<PathBuf> {
    load_dotenv_in(Path::new(""), name)
}

fn load_dotenv_in(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(".env").join(format!("{}.env", name));
    dotenvy::from_path(&path)
        .map_err(|e| Error::Config(format!("failed to load {}: {}", path.display(), e)))?;
    Ok(path)
}
