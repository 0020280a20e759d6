//! One module per api.  Every connector reads its settings from the
//! WhereScape job context and parameters, and writes to the load table of
//! the job.

pub mod anythingllm;
pub mod friday_pulse;
pub mod gitlab;
pub mod gsheet;
pub mod hubspot;
pub mod jira;
pub mod notion;
