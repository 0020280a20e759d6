use std::error::Error;

use clap::{Parser, Subcommand};
use jiff::Zoned;
use wherescape::{
    connectors::gitlab::{gitlab_create_metadata, gitlab_load_data, next_high_water_mark, update_high_water_mark},
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load GitLab projects, tags, issues, pipelines and merge requests", long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod.  Loads `.env/{env}.env` first.
    #[arg(short, long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    LoadData,
    CreateMetadata,
    /// Manage the high water mark that limits the load to recent changes
    HighWaterMark {
        #[command(subcommand)]
        step: HighWaterMark,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum HighWaterMark {
    /// Remember the start of this run, before the first load
    Next,
    /// Make the remembered start the high water mark, after the last load
    Update,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        match args.command {
            Command::LoadData => {
                let client = BlockingClient::new()?;
                gitlab_load_data(ws, &client)?;
            }
            Command::CreateMetadata => gitlab_create_metadata(ws)?,
            Command::HighWaterMark { step: HighWaterMark::Next } => {
                next_high_water_mark(ws, &Zoned::now())?;
            }
            Command::HighWaterMark { step: HighWaterMark::Update } => {
                update_high_water_mark(ws)?;
            }
        }
        Ok(())
    })
}
