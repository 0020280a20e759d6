use std::{error::Error, path::PathBuf};

use clap::Parser;
use jiff::Zoned;
use wherescape::{run_job, validators::fact_dimension_join::check_fact_dimension_join};

#[derive(Parser, Debug)]
#[command(version, about = "Count fact rows that join to the 0 key of a dimension", long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod.  Loads `.env/{env}.env` first.
    #[arg(short, long)]
    env: Option<String>,

    /// Directory for the result file
    #[arg(long, default_value = "C:\\Temp")]
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    run_job(args.env.as_deref(), |ws| {
        ws.main_message = match check_fact_dimension_join(ws, &args.output_dir, &Zoned::now())? {
            Some(path) => format!("Wrote {}", path.display()),
            None => "No fact tables to check.".to_string(),
        };
        Ok(())
    })
}
