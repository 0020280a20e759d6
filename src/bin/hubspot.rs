use std::error::Error;

use clap::{Parser, Subcommand};
use wherescape::{
    connectors::hubspot::{
        missing_columns::{hubspot_check_missing_columns, hubspot_create_metadata},
        send::hubspot_load_data,
        tickets::{merge_double_tickets, update_company_association},
    },
    http::BlockingClient,
    run_job,
};

#[derive(Parser, Debug)]
#[command(version, about = "Send warehouse data to HubSpot and check the portals", long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod.  Loads `.env/{env}.env` first.
    #[arg(short, long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Update HubSpot objects with the rows of the export table
    Send,
    /// Compare the HubSpot properties with the load tables
    CheckMissingColumns {
        /// HubSpot environment (portal), can be repeated.  Defaults to the
        /// hubspot_environments parameter.
        #[arg(long = "environment")]
        environments: Vec<String>,
    },
    CreateMetadata,
    /// Merge tickets that were created twice
    MergeTickets {
        /// Parameter that holds the access token
        #[arg(long, default_value = "hubspot_access_token_nerds")]
        token_parameter: String,
    },
    /// Link tickets of anonymous callers to their company
    UpdateCompanyAssociation {
        /// Parameter that holds the access token
        #[arg(long, default_value = "hubspot_access_token_nerds")]
        token_parameter: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        let client = BlockingClient::new()?;
        match &args.command {
            Command::Send => {
                hubspot_load_data(ws, &client)?;
            }
            Command::CheckMissingColumns { environments } => {
                hubspot_check_missing_columns(ws, &client, environments)?;
            }
            Command::CreateMetadata => hubspot_create_metadata(ws)?,
            Command::MergeTickets { token_parameter } => {
                merge_double_tickets(ws, &client, token_parameter)?;
            }
            Command::UpdateCompanyAssociation { token_parameter } => {
                update_company_association(ws, &client, token_parameter)?;
            }
        }
        Ok(())
    })
}
