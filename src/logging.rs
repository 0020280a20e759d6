//! WhereScape reads the output of a host script: the first line is the exit
//! code, the second line ends up in the audit log and everything after that in
//! the detail log.  The [`JobLogger`] keeps all records in memory until the
//! job is done so the exit code can reflect the worst thing that happened.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use jiff::{Timestamp, ToSpan, Zoned};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Warning,
    Error,
    Fatal,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success => 1,
            Outcome::Warning => -1,
            Outcome::Error => -2,
            Outcome::Fatal => -3,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success => "succeeded",
            Outcome::Warning => "succeeded with warnings",
            Outcome::Error => "failed",
            Outcome::Fatal => "failed miserably",
        }
    }
}

#[derive(Debug, Default)]
struct ReportState {
    records: Vec<String>,
    worst: Option<Level>,
    fatal: bool,
}

/// Handle to the records collected by the [`JobLogger`].
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    state: Arc<Mutex<ReportState>>,
}

impl JobReport {
    pub fn new() -> JobReport {
        JobReport::default()
    }

    fn push(&self, level: Level, line: String) {
        if let Ok(mut state) = self.state.lock() {
            state.records.push(line);
            state.worst = Some(match state.worst {
                Some(worst) => worst.min(level),
                None => level,
            });
        }
    }

    /// The job ended with an error nobody handled.
    pub fn mark_fatal(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fatal = true;
        }
    }

    pub fn outcome(&self) -> Outcome {
        let Ok(state) = self.state.lock() else {
            return Outcome::Fatal;
        };
        if state.fatal {
            return Outcome::Fatal;
        }
        match state.worst {
            Some(Level::Error) => Outcome::Error,
            Some(Level::Warn) => Outcome::Warning,
            _ => Outcome::Success,
        }
    }

    /// The text WhereScape expects on stdout.
    pub fn render(&self, main_message: &str, job_name: &str) -> String {
        let outcome = self.outcome();
        let mut out = format!("{}\n", outcome.exit_code());
        if main_message.is_empty() {
            out.push_str(&format!("{} {}\n", job_name, outcome.status()));
        } else {
            out.push_str(&format!("{}\n", main_message));
        }
        if let Ok(state) = self.state.lock() {
            for line in &state.records {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

pub fn format_record(record: &Record, now: &Zoned) -> String {
    format!(
        "[{}] {} {}:{}: {}",
        level_name(record.level()),
        now.strftime("%Y-%m-%d %H:%M:%S"),
        record.module_path().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.args()
    )
}

pub struct JobLogger {
    report: JobReport,
    file: Option<env_logger::Logger>,
}

impl JobLogger {
    pub fn new(report: JobReport, file: Option<env_logger::Logger>) -> JobLogger {
        JobLogger { report, file }
    }
}

impl Log for JobLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.report
            .push(record.level(), format_record(record, &Zoned::now()));
        if let Some(file) = &self.file {
            file.log(record);
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            file.flush();
        }
    }
}

/// The most recent Saturday 23:59 at or before `now`.
pub fn last_rollover(now: &Zoned) -> Result<Zoned> {
    let days_back = (now.weekday().to_sunday_zero_offset() as i64 + 1) % 7;
    let saturday = now.date().checked_sub(days_back.days())?;
    let candidate = saturday.at(23, 59, 0, 0).to_zoned(now.time_zone().clone())?;
    if &candidate > now {
        Ok(candidate.checked_sub(7.days())?)
    } else {
        Ok(candidate)
    }
}

pub fn rotation_due(modified: &Zoned, now: &Zoned) -> Result<bool> {
    Ok(modified < &last_rollover(now)?)
}

/// Move last week's log out of the way, `wherescape.log.2024-05-04`.
fn rotate_if_due(path: &Path, now: &Zoned) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let modified = Timestamp::try_from(fs::metadata(path)?.modified()?)?
        .to_zoned(now.time_zone().clone());
    if rotation_due(&modified, now)? {
        let mut rotated = path.as_os_str().to_owned();
        rotated.push(format!(".{}", modified.strftime("%Y-%m-%d")));
        fs::rename(path, PathBuf::from(rotated))?;
    }
    Ok(())
}

fn file_logger(workdir: &str) -> Result<env_logger::Logger> {
    let dir = Path::new(workdir).join("wherescape_logging");
    fs::create_dir_all(&dir)?;
    let path = dir.join("wherescape.log");
    rotate_if_due(&path, &Zoned::now())?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let logger = env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .format(|buf, record| writeln!(buf, "{}", format_record(record, &Zoned::now())))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .build();
    Ok(logger)
}

/// Install the job logger as the global logger.  Call once per process.
pub fn init(workdir: &str) -> Result<JobReport> {
    let report = JobReport::new();
    let (file, file_error) = match file_logger(workdir) {
        Ok(logger) => (Some(logger), None),
        Err(e) => (None, Some(e)),
    };
    log::set_boxed_logger(Box::new(JobLogger::new(report.clone(), file)))
        .map_err(|e| Error::Config(format!("failed to install logger: {}", e)))?;
    log::set_max_level(LevelFilter::Info);
    if let Some(e) = file_error {
        log::warn!("Logging to file in {} is disabled: {}", workdir, e);
    }
    Ok(report)
}
