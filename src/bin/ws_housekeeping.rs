use std::error::Error;

use clap::{Parser, Subcommand};
use log::{error, info};
use wherescape::{run_job, wherescape::ProcedureResult};

#[derive(Parser, Debug)]
#[command(version, about = "Clean up the WhereScape job logs", long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod.  Loads `.env/{env}.env` first.
    #[arg(short, long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive the logs of jobs older than the given number of days
    ClearLogs {
        #[arg(long, default_value_t = 90)]
        days: i64,
        /// Job name, % matches any job
        #[arg(long, default_value = "%")]
        job: String,
    },
    /// Purge archived logs older than the given number of days
    ClearArchive {
        #[arg(long, default_value_t = 365)]
        days: i64,
        /// Job name, % matches any job
        #[arg(long, default_value = "%")]
        job: String,
    },
}

fn report(result: &ProcedureResult) {
    if result.code == "S" {
        info!("{} ({})", result.message, result.result);
    } else {
        error!("{}: {} ({})", result.code, result.message, result.result);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        let result = match &args.command {
            Command::ClearLogs { days, job } => ws.job_clear_logs_by_date(*days, job)?,
            Command::ClearArchive { days, job } => ws.job_clear_archive_by_date(*days, job)?,
        };
        report(&result);
        ws.main_message = result.message.clone();
        Ok(())
    })
}
