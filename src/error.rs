use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("{0}")]
    Config(String),

    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("odbc error: {0}")]
    Odbc(String),

    #[error("operation not supported by the {0:?} dialect: {1}")]
    UnsupportedDialect(crate::db::Dialect, String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{api} returned status {status}: {body}")]
    Api {
        api: String,
        status: u16,
        body: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("date parsing error: {0}")]
    Jiff(#[from] jiff::Error),

    #[error("no metadata found for {0}")]
    MetadataNotFound(String),

    #[error("unknown {connector} object type for table {table}")]
    UnknownObjectType { connector: String, table: String },

    #[error("notion property type {0} is not supported")]
    UnsupportedProperty(String),

    #[error("invalid arguments: {0}")]
    Arguments(String),
}

#[cfg(feature = "odbc")]
impl From<odbc_api::Error> for Error {
    fn from(e: odbc_api::Error) -> Self {
        Error::Odbc(e.to_string())
    }
}
