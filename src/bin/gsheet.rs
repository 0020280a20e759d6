use std::error::Error;

use clap::{Parser, Subcommand};
use wherescape::{
    connectors::gsheet::{
        auth::{access_token, key_path, read_service_account},
        gsheet_create_metadata, gsheet_load_data,
    },
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load a Google Sheets worksheet", long_about = None)]
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
        let client = BlockingClient::new()?;
        let key = read_service_account(&key_path()?)?;
        let token = access_token(&client, &key)?;
        match args.command {
            Command::LoadData => {
                gsheet_load_data(ws, &client, &token)?;
            }
            Command::CreateMetadata => gsheet_create_metadata(ws, &client, &token)?,
        }
        Ok(())
    })
}
