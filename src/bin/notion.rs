use std::error::Error;

use clap::{Parser, Subcommand};
use log::info;
use tabled::{builder::Builder, settings::Style};
use wherescape::{
    connectors::notion::{notion_create_metadata, notion_list_databases, notion_load_data},
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load Notion databases", long_about = None)]
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
    /// Log the databases the integration can see
    ListDatabases,
}

fn ascii_table(databases: &[(String, String)]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(["Id", "Title"]);
    for (id, title) in databases {
        builder.push_record([id.as_str(), title.as_str()]);
    }
    let mut table = builder.build();
    table.with(Style::empty());
    table
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        let client = BlockingClient::new()?;
        match args.command {
            Command::LoadData => {
                notion_load_data(ws, &client)?;
            }
            Command::CreateMetadata => notion_create_metadata(ws, &client)?,
            Command::ListDatabases => {
                let databases = notion_list_databases(ws, &client)?;
                info!("Databases:\n{}", ascii_table(&databases));
            }
        }
        Ok(())
    })
}
