use std::error::Error;

use clap::{Parser, Subcommand};
use wherescape::{
    connectors::anythingllm::{anythingllm_create_metadata, anythingllm_load_data},
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load the chats of an AnythingLLM embed", long_about = None)]
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
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        match args.command {
            Command::LoadData => {
                let client = BlockingClient::new()?;
                anythingllm_load_data(ws, &client)?;
            }
            Command::CreateMetadata => anythingllm_create_metadata(ws)?,
        }
        Ok(())
    })
}
