use clap::Parser;
use log::{error, info, warn};

use crate::error::{Error, Result};

/// What to read from the workbook.  WhereScape keeps these arguments in the
/// file name of the load table, e.g. `Budget --sheet "Q1 2024" --range A1:F40`.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "gsheet", no_binary_name = true)]
pub struct WorkbookArgs {
    /// Name of the Google Sheet/ workbook
    pub workbook_name: Option<String>,

    /// Name of the sheet in the workbook
    #[arg(long)]
    pub sheet: Option<String>,

    /// Cell range to retrieve
    #[arg(long)]
    pub range: Option<String>,

    /// Cell range to be used as header
    #[arg(long = "header_range")]
    pub header_range: Option<String>,

    /// Specify if table has no header
    #[arg(long = "no_header")]
    pub no_header: bool,

    /// Print debug messages
    #[arg(short, long)]
    pub debug: bool,
}

/// Split the argument string the way a shell would and parse it.  Conflicting
/// options are logged, they don't stop the job.
pub fn parse_workbook_arguments(argument: &str) -> Result<WorkbookArgs> {
    if argument.trim().is_empty() {
        info!("No arguments provided. Using defaults.");
    }
    let words = shlex::split(argument)
        .ok_or_else(|| Error::Arguments(format!("unbalanced quotes in {}", argument)))?;
    let mut args = WorkbookArgs::try_parse_from(words).map_err(|e| {
        warn!("There might be a mistake with the arguments. Ensure it's all correct.");
        Error::Arguments(e.to_string())
    })?;

    args.range = args.range.map(|r| r.to_uppercase());
    args.header_range = args.header_range.map(|r| r.to_uppercase());

    info!(
        "workbook_name: {:?}, sheet: {:?}, range: {:?}, header_range: {:?}, no_header: {}, debug: {}",
        args.workbook_name, args.sheet, args.range, args.header_range, args.no_header, args.debug
    );

    if args.header_range.is_some() && args.no_header {
        error!("You cannot specify both a header_range and --no_header in the object source File Name.");
    }
    match (&args.header_range, &args.range) {
        (Some(_), None) => {
            error!("A --header_range can not be specified without specifying a --range.")
        }
        (Some(header_range), Some(range)) if start_row(header_range) != start_row(range) => {
            warn!("If both a range and a header_range are specified, they should overlap.")
        }
        _ => {}
    }
    Ok(args)
}

/// First row of an A1 range, `B3:D9` starts at row 3.  Whole columns (`A:C`)
/// have no start row.
pub fn start_row(range: &str) -> Option<u32> {
    let cells = range.rsplit('!').next().unwrap_or(range);
    let first = cells.split(':').next().unwrap_or(cells);
    let digits: String = first
        .trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '$')
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_options() -> Result<()> {
        let args = parse_workbook_arguments(
            r#""Sales 2024" --sheet "Q1 data" --range a2:f40 --header_range a2:f2 -d"#,
        )?;
        assert_eq!(args.workbook_name.as_deref(), Some("Sales 2024"));
        assert_eq!(args.sheet.as_deref(), Some("Q1 data"));
        assert_eq!(args.range.as_deref(), Some("A2:F40"));
        assert_eq!(args.header_range.as_deref(), Some("A2:F2"));
        assert!(args.debug);
        assert!(!args.no_header);
        Ok(())
    }

    #[test]
    fn empty_arguments_use_defaults() -> Result<()> {
        assert_eq!(parse_workbook_arguments("")?, WorkbookArgs::default());
        Ok(())
    }

    #[test]
    fn bad_arguments() {
        assert!(matches!(parse_workbook_arguments("x --colour red"), Err(Error::Arguments(_))));
        assert!(matches!(parse_workbook_arguments("\"open"), Err(Error::Arguments(_))));
    }

    #[test]
    fn range_start_row() {
        assert_eq!(start_row("B3:D9"), Some(3));
        assert_eq!(start_row("'Sheet 1'!$A$12:C20"), Some(12));
        assert_eq!(start_row("A:C"), None);
    }
}
