use std::error::Error;

use clap::{Parser, Subcommand};
use wherescape::{
    connectors::friday_pulse::{friday_pulse_create_metadata, friday_pulse_load_data, DEFAULT_LOOKBACK_WEEKS},
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load Friday Pulse survey results", long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod.  Loads `.env/{env}.env` first.
    #[arg(short, long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    LoadData {
        /// Weeks before the high water mark to load again, for late responses
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_WEEKS)]
        lookback_weeks: i64,
    },
    CreateMetadata,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        match args.command {
            Command::LoadData { lookback_weeks } => {
                let client = BlockingClient::new()?;
                friday_pulse_load_data(ws, &client, lookback_weeks)?;
            }
            Command::CreateMetadata => friday_pulse_create_metadata(ws)?,
        }
        Ok(())
    })
}
