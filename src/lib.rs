pub mod connectors;
pub mod db;
pub mod environment;
pub mod error;
pub mod helpers;
pub mod http;
pub mod load;
pub mod logging;
pub mod validators;
pub mod wherescape;

pub use error::{Error, Result};
pub use wherescape::{run_job, WhereScape};
