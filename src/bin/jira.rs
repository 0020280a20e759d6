use std::error::Error;

use clap::{Parser, Subcommand};
use wherescape::{
    connectors::jira::{jira_create_metadata, jira_load_data, DEFAULT_SINCE},
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load Jira projects and issues", long_about = None)]
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
        /// Only load issues changed in the last 48 hours
        #[arg(long)]
        incremental: bool,
        /// Only load issues changed after this moment, e.g. -7d or 2024-05-01
        #[arg(long, conflicts_with = "incremental")]
        since: Option<String>,
    },
    CreateMetadata,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        match &args.command {
            Command::LoadData { incremental, since } => {
                let since = match (*incremental, since) {
                    (_, Some(since)) => Some(since.as_str()),
                    (true, None) => Some(DEFAULT_SINCE),
                    (false, None) => None,
                };
                let client = BlockingClient::new()?;
                jira_load_data(ws, &client, since)?;
            }
            Command::CreateMetadata => jira_create_metadata(ws)?,
        }
        Ok(())
    })
}
