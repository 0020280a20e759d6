//! Load the content of a Google Sheets worksheet.  The load table's file path
//! holds the url of the spreadsheet, the file name the [`WorkbookArgs`].

pub mod args;
pub mod auth;

use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;
use reqwest::Url;
use serde_json::Value as Json;

use crate::{
    db::{Row, Value},
    error::{Error, Result},
    helpers::{
        convert_string, create_column_names, create_display_names, infer_cell_type,
        remove_empty_rows_and_columns, set_date_to_ymd, MetadataQuery,
    },
    http::{HttpClient, Request},
    load::{load_rows, Stopwatch, DSS_LOAD_DATE, DSS_RECORD_SOURCE},
    wherescape::WhereScape,
};

use self::args::{parse_workbook_arguments, start_row, WorkbookArgs};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const DEFAULT_WORKSHEET: &str = "Sheet1";
/// Sheets imported from Apple Numbers
const FALLBACK_WORKSHEET: &str = "Table1";
const MAX_COMMENT_LENGTH: usize = 1023;

lazy_static! {
    static ref SPREADSHEET_ID: Regex = Regex::new(r"/spreadsheets/d/([a-zA-Z0-9-_]+)").unwrap();
    static ref COLUMN_SUFFIX: Regex = Regex::new(r"_\d{3}$").unwrap();
}

pub fn spreadsheet_id(url: &str) -> Option<String> {
    SPREADSHEET_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spreadsheet {
    pub id: String,
    pub title: String,
    /// Titles of the worksheets.
    pub sheets: Vec<String>,
}

pub struct Gsheet<'a> {
    client: &'a dyn HttpClient,
    token: String,
    pub spreadsheet: Option<Spreadsheet>,
    pub worksheet: Option<String>,
    pub header: Vec<String>,
    pub content: Vec<Vec<String>>,
    pub column_types: Vec<String>,
}

fn parse_url(url: &str, params: &[(&str, &str)]) -> Result<Url> {
    Url::parse_with_params(url, params).map_err(|e| Error::Config(format!("invalid url {}: {}", url, e)))
}

fn is_dss_column(name: &str) -> bool {
    name == DSS_RECORD_SOURCE || name == DSS_LOAD_DATE
}

impl<'a> Gsheet<'a> {
    pub fn new(client: &'a dyn HttpClient, token: &str) -> Gsheet<'a> {
        Gsheet {
            client,
            token: token.to_string(),
            spreadsheet: None,
            worksheet: None,
            header: Vec::new(),
            content: Vec::new(),
            column_types: Vec::new(),
        }
    }

    fn get_json(&self, url: Url) -> Result<Json> {
        let request = Request::get(url.as_str()).bearer(&self.token);
        self.client.send(&request)?.error_for_status("Google")?.json()
    }

    fn spreadsheet_by_id(&self, id: &str) -> Result<Spreadsheet> {
        let url = parse_url(
            &format!("{}/{}", SHEETS_API, id),
            &[("fields", "properties.title,sheets.properties.title")],
        )?;
        let response = self.get_json(url)?;
        let sheets = response["sheets"]
            .as_array()
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| s["properties"]["title"].as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Spreadsheet {
            id: id.to_string(),
            title: response["properties"]["title"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            sheets,
        })
    }

    /// Id of the first spreadsheet on the drive with this name.
    fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
            name.replace('\'', "\\'")
        );
        let url = parse_url(DRIVE_API, &[("q", query.as_str()), ("fields", "files(id,name)")])?;
        let response = self.get_json(url)?;
        Ok(response["files"][0]["id"].as_str().map(|s| s.to_string()))
    }

    /// Open the spreadsheet by url, or by name when the url doesn't work.
    pub fn set_spreadsheet(&mut self, url: &str, name: Option<&str>) -> Result<()> {
        if let Some(id) = spreadsheet_id(url) {
            match self.spreadsheet_by_id(&id) {
                Ok(spreadsheet) => {
                    info!("spreadsheet file has been obtained.");
                    self.spreadsheet = Some(spreadsheet);
                    return Ok(());
                }
                Err(e) => error!("Invalid URL: {}", e),
            }
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            match self.find_by_name(name)? {
                Some(id) => {
                    self.spreadsheet = Some(self.spreadsheet_by_id(&id)?);
                    info!("spreadsheet file has been obtained.");
                    return Ok(());
                }
                None => error!("Invalid workbook name"),
            }
        }
        error!("Enter a valid workbook URL or workbook name");
        Err(Error::Config(format!("spreadsheet not found: {} {:?}", url, name)))
    }

    pub fn set_worksheet(&mut self, title: Option<&str>) -> Result<()> {
        let spreadsheet = self.spreadsheet.as_ref().ok_or_else(|| {
            error!("No spreadsheet available to take the worksheet from.");
            Error::Config("no spreadsheet".to_string())
        })?;
        let title = title.unwrap_or(DEFAULT_WORKSHEET);
        let found = if spreadsheet.sheets.iter().any(|s| s == title) {
            title
        } else {
            warn!("Invalid worksheet title in --sheet");
            if spreadsheet.sheets.iter().any(|s| s == FALLBACK_WORKSHEET) {
                FALLBACK_WORKSHEET
            } else {
                error!("No worksheet was found");
                return Err(Error::Config(format!("worksheet {} not found", title)));
            }
        };
        info!("worksheet found with title {}", found);
        self.worksheet = Some(found.to_string());
        Ok(())
    }

    /// Cell values of the worksheet, or of a range in it.
    pub fn values(&self, range: Option<&str>) -> Result<Vec<Vec<String>>> {
        let (Some(spreadsheet), Some(worksheet)) = (&self.spreadsheet, &self.worksheet) else {
            return Err(Error::Config("no worksheet selected".to_string()));
        };
        let sheet = format!("'{}'", worksheet.replace('\'', "''"));
        let a1 = match range {
            Some(range) => format!("{}!{}", sheet, range),
            None => sheet,
        };
        let mut url = parse_url(&format!("{}/{}/values", SHEETS_API, spreadsheet.id), &[])?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("invalid sheets url".to_string()))?
            .push(&a1);
        let response = self.get_json(url)?;
        let rows = response["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(cell_text).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    /// Read the content and split off the header.
    pub fn set_content(&mut self, args: &WorkbookArgs) -> Result<()> {
        let mut content = remove_empty_rows_and_columns(self.values(args.range.as_deref())?);
        let header: Vec<String> = if args.no_header {
            let width = content.first().map(|r| r.len()).unwrap_or(0);
            (1..=width).map(|i| format!("column_{}", i)).collect()
        } else if let Some(header_range) = &args.header_range {
            let header_row = self
                .values(Some(header_range))?
                .into_iter()
                .next()
                .unwrap_or_default();
            let overlaps = args
                .range
                .as_deref()
                .is_some_and(|range| start_row(range) == start_row(header_range));
            if overlaps && !content.is_empty() {
                content.remove(0);
            }
            header_row
        } else if content.is_empty() {
            Vec::new()
        } else {
            content.remove(0)
        };
        self.header = header
            .into_iter()
            .enumerate()
            .map(|(i, h)| if h.is_empty() { format!("column_{}", i + 1) } else { h })
            .collect();
        self.content = content;
        self.set_column_types();
        Ok(())
    }

    pub fn set_column_types(&mut self) {
        self.column_types = self
            .header
            .iter()
            .enumerate()
            .map(|(c, name)| match name.as_str() {
                DSS_RECORD_SOURCE => "varchar(256)",
                DSS_LOAD_DATE => "timestamp",
                _ => {
                    let cells: Vec<&str> = self
                        .content
                        .iter()
                        .filter_map(|row| row.get(c).map(|s| s.as_str()))
                        .collect();
                    infer_cell_type(&cells).warehouse_type()
                }
            })
            .map(|t| t.to_string())
            .collect();
    }

    pub fn title(&self) -> &str {
        self.spreadsheet.as_ref().map(|s| s.title.as_str()).unwrap_or_default()
    }
}

fn cell_text(cell: &Json) -> String {
    match cell {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn open_workbook<'a>(
    client: &'a dyn HttpClient,
    token: &str,
    url: &str,
    args: &WorkbookArgs,
) -> Result<Gsheet<'a>> {
    let mut gsheet = Gsheet::new(client, token);
    gsheet.set_spreadsheet(url, args.workbook_name.as_deref())?;
    gsheet.set_worksheet(args.sheet.as_deref())?;
    gsheet.set_content(args)?;
    Ok(gsheet)
}

fn workbook_details(ws: &WhereScape) -> Result<(String, WorkbookArgs)> {
    let url = ws.file_path.clone().unwrap_or_default();
    let details = ws.file_name.clone().unwrap_or_default();
    info!("Metadata. URL: {} ; Details : {}", url, details);
    let args = parse_workbook_arguments(&details)?;
    if args.debug {
        warn!("Debug mode on -> do not use for production.");
    }
    Ok((url, args))
}

/// Source columns are the header without trailing spaces, the comments the
/// same cut to fit the column.
pub fn source_columns_and_comments(header: &[String]) -> (Vec<String>, Vec<String>) {
    header
        .iter()
        .map(|h| {
            let source = h.trim_end().to_string();
            let comment: String = source.chars().take(MAX_COMMENT_LENGTH).collect();
            (source, comment)
        })
        .unzip()
}

pub fn gsheet_create_metadata(ws: &mut WhereScape, client: &dyn HttpClient, token: &str) -> Result<()> {
    let stopwatch = Stopwatch::start("gsheet_create_metadata");
    let key = ws.require_object_key()?;
    let (url, args) = workbook_details(ws)?;
    let gsheet = open_workbook(client, token, &url, &args)?;

    let (header, types): (Vec<String>, Vec<String>) = gsheet
        .header
        .iter()
        .cloned()
        .zip(gsheet.column_types.iter().cloned())
        .filter(|(h, _)| !is_dss_column(h))
        .unzip();
    let (source_columns, comments) = source_columns_and_comments(&header);
    let sql = MetadataQuery::new(key, gsheet.worksheet.as_deref().unwrap_or_default())
        .columns(&create_column_names(&header))
        .display_names(&create_display_names(&header))
        .types(&types)
        .comments(&comments)
        .source_columns(&source_columns)
        .build();
    info!("Stored details for {} columns", header.len());
    ws.push_script_to_meta(&sql)?;
    ws.main_message = "Metadata updated. Table can be created.".to_string();
    stopwatch.finish();
    Ok(())
}

fn strip_suffixes(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| COLUMN_SUFFIX.replace(n, "").to_string())
        .collect()
}

/// Put the cells of every row under the load table's columns.  Sheet columns
/// unknown to the load table are dropped, load table columns missing from the
/// sheet are null.  Both are logged as a warning.
pub fn align_to_columns(header: &[String], content: &[Vec<String>], columns: &[String], types: &[String]) -> Vec<Row> {
    let mut received = create_column_names(header);
    let (mut expected, expected_types): (Vec<String>, Vec<String>) = columns
        .iter()
        .cloned()
        .zip(types.iter().cloned())
        .filter(|(c, _)| !is_dss_column(c))
        .unzip();
    // tables with numbered columns
    if received.first().is_some_and(|c| COLUMN_SUFFIX.is_match(c)) {
        received = strip_suffixes(&received);
    } else if expected.first().is_some_and(|c| COLUMN_SUFFIX.is_match(c)) {
        expected = strip_suffixes(&expected);
    }

    let added: Vec<&String> = received
        .iter()
        .filter(|c| !is_dss_column(c) && !expected.contains(*c))
        .collect();
    if !added.is_empty() {
        warn!("New columns in gsheet data: {:?}", added);
    }
    let positions: Vec<Option<usize>> = expected
        .iter()
        .map(|c| received.iter().position(|r| r == c))
        .collect();
    let removed: Vec<&String> = expected
        .iter()
        .zip(&positions)
        .filter(|(_, p)| p.is_none())
        .map(|(c, _)| c)
        .collect();
    if !removed.is_empty() {
        warn!("Columns missing from gsheet data: {:?}", removed);
    }

    content
        .iter()
        .map(|row| {
            positions
                .iter()
                .zip(&expected_types)
                .map(|(position, data_type)| match position.and_then(|p| row.get(p)) {
                    Some(cell) => cell_value(cell, data_type),
                    None => Value::Null,
                })
                .collect()
        })
        .collect()
}

fn cell_value(cell: &str, data_type: &str) -> Value {
    match data_type {
        "timestamp" | "date" => set_date_to_ymd(&Value::Text(cell.to_string())),
        "numeric" | "int" | "bigint" | "bool" | "boolean" => convert_string(cell),
        _ => Value::Text(cell.to_string()),
    }
}

pub fn gsheet_load_data(ws: &mut WhereScape, client: &dyn HttpClient, token: &str) -> Result<usize> {
    let stopwatch = Stopwatch::start("gsheet_load_data");
    let (columns, types) = ws.get_columns()?;
    if columns.is_empty() {
        return Err(Error::MetadataNotFound(ws.table().to_string()));
    }
    let (url, args) = workbook_details(ws)?;
    let gsheet = open_workbook(client, token, &url, &args)?;

    let rows = align_to_columns(&gsheet.header, &gsheet.content, &columns, &types);
    let data_columns: Vec<&String> = columns.iter().filter(|c| !is_dss_column(c)).collect();
    let n = load_rows(
        ws,
        &data_columns,
        rows,
        &gsheet.title().replace(' ', "_"),
        stopwatch.started_at(),
    )?;
    info!("{} rows successfully inserted in {} from google data.", n, ws.table());
    ws.main_message = format!("Successfully inserted {} rows in to the load table.", n);
    stopwatch.finish();
    Ok(n)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::fake::FakeClient;
    use crate::wherescape::fixtures::instance;

    const URL: &str = "https://docs.google.com/spreadsheets/d/1AbC-d_9/edit#gid=0";

    fn spreadsheet(sheets: &[&str]) -> Json {
        json!({
            "properties": {"title": "Budget 2024"},
            "sheets": sheets.iter().map(|s| json!({"properties": {"title": s}})).collect::<Vec<_>>()
        })
    }

    fn sheet_values() -> Json {
        json!({"values": [
            ["Name", "Amount", "", "Paid on", ""],
            ["rent", "1200", "", "01-05-2024"],
            [],
            ["food", "350.5", "", "", ""]
        ]})
    }

    #[test]
    fn id_from_url() {
        assert_eq!(spreadsheet_id(URL).as_deref(), Some("1AbC-d_9"));
        assert_eq!(spreadsheet_id("https://example.com"), None);
    }

    #[test]
    fn open_with_fallback_worksheet() -> Result<()> {
        let client = FakeClient::new();
        client
            .push_json(200, spreadsheet(&["Table1"]))
            .push_json(200, sheet_values());
        let gsheet = open_workbook(&client, "token", URL, &WorkbookArgs::default())?;
        assert_eq!(gsheet.title(), "Budget 2024");
        assert_eq!(gsheet.worksheet.as_deref(), Some("Table1"));
        assert_eq!(gsheet.header, vec!["Name", "Amount", "Paid on"]);
        assert_eq!(gsheet.content.len(), 2);
        assert_eq!(gsheet.column_types, vec!["text", "numeric", "timestamp"]);
        let urls = client.urls();
        assert!(urls[0].starts_with("https://sheets.googleapis.com/v4/spreadsheets/1AbC-d_9?fields="));
        assert!(urls[1].starts_with("https://sheets.googleapis.com/v4/spreadsheets/1AbC-d_9/values/"));
        Ok(())
    }

    #[test]
    fn missing_worksheet() {
        let client = FakeClient::new();
        client.push_json(200, spreadsheet(&["Other"]));
        let args = WorkbookArgs {
            sheet: Some("Q1".to_string()),
            ..Default::default()
        };
        assert!(open_workbook(&client, "token", URL, &args).is_err());
    }

    #[test]
    fn open_by_name_when_url_fails() -> Result<()> {
        let client = FakeClient::new();
        client
            .push_json(404, json!({"error": "not found"}))
            .push_json(200, json!({"files": [{"id": "xyz", "name": "Budget"}]}))
            .push_json(200, spreadsheet(&["Sheet1"]));
        let mut gsheet = Gsheet::new(&client, "token");
        gsheet.set_spreadsheet(URL, Some("Budget"))?;
        assert_eq!(gsheet.spreadsheet.map(|s| s.id), Some("xyz".to_string()));
        assert!(client.urls()[1].starts_with("https://www.googleapis.com/drive/v3/files?q=name"));
        Ok(())
    }

    #[test]
    fn no_header_and_header_range() -> Result<()> {
        let client = FakeClient::new();
        client
            .push_json(200, spreadsheet(&["Sheet1"]))
            .push_json(200, json!({"values": [["a", "1"], ["b", "2"]]}));
        let args = WorkbookArgs {
            no_header: true,
            ..Default::default()
        };
        let gsheet = open_workbook(&client, "token", URL, &args)?;
        assert_eq!(gsheet.header, vec!["column_1", "column_2"]);
        assert_eq!(gsheet.content.len(), 2);

        let client = FakeClient::new();
        client
            .push_json(200, spreadsheet(&["Sheet1"]))
            .push_json(200, json!({"values": [["Key", "Value"], ["b", "2"]]}))
            .push_json(200, json!({"values": [["Key", ""]]}));
        let args = WorkbookArgs {
            range: Some("B2:C3".to_string()),
            header_range: Some("B2:C2".to_string()),
            ..Default::default()
        };
        let gsheet = open_workbook(&client, "token", URL, &args)?;
        assert_eq!(gsheet.header, vec!["Key", "column_2"]);
        assert_eq!(gsheet.content, vec![vec!["b".to_string(), "2".to_string()]]);
        Ok(())
    }

    #[test]
    fn align_columns() {
        let header = vec!["Name".to_string(), "Extra".to_string(), "Amount".to_string()];
        let content = vec![vec!["rent".to_string(), "x".to_string(), "".to_string()]];
        let columns: Vec<String> = ["name_001", "amount_002", "paid_on_003", "dss_record_source", "dss_load_date"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let types: Vec<String> = ["text", "numeric", "timestamp", "varchar(256)", "timestamp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = align_to_columns(&header, &content, &columns, &types);
        assert_eq!(rows, vec![vec![Value::from("rent"), Value::Null, Value::Null]]);
    }

    fn gsheet_table(target_sql: &str) -> WhereScape {
        instance(
            "load_budget",
            "load",
            &format!(
                "INSERT INTO ws_load_tab VALUES (41, 'load_budget', '{}', '--sheet Sheet1');",
                URL
            ),
            target_sql,
        )
    }

    #[test]
    fn create_metadata() -> Result<()> {
        let mut ws = gsheet_table("");
        let client = FakeClient::new();
        client
            .push_json(200, spreadsheet(&["Sheet1"]))
            .push_json(200, sheet_values());
        gsheet_create_metadata(&mut ws, &client, "token")?;
        let (names, types) = ws.get_columns()?;
        assert_eq!(names, vec!["name", "amount", "paid_on", "dss_record_source", "dss_load_date"]);
        assert_eq!(types[..3], ["text", "numeric", "timestamp"]);
        let rows = ws.query_meta(
            "SELECT lc_src_table, lc_display_name, lc_src_strategy FROM ws_load_col WHERE lc_col_name = 'paid_on'",
            &[],
        )?;
        assert_eq!(rows[0], vec![Value::from("Sheet1"), Value::from("Paid on"), Value::from("Paid on")]);
        Ok(())
    }

    #[test]
    fn load_data() -> Result<()> {
        let mut ws = gsheet_table(
            "CREATE SCHEMA load; CREATE TABLE load.load_budget (name text, amount numeric, paid_on timestamp, dss_record_source varchar, dss_load_date timestamp);",
        );
        ws.push_script_to_meta(
            "INSERT INTO ws_load_col VALUES (41, 'name', '', '', '', '', 'text', 'Y', 'N', 'N', 'Y', 10);
INSERT INTO ws_load_col VALUES (41, 'amount', '', '', '', '', 'numeric', 'Y', 'Y', 'N', 'N', 20);
INSERT INTO ws_load_col VALUES (41, 'paid_on', '', '', '', '', 'timestamp', 'Y', 'N', 'N', 'N', 30);
INSERT INTO ws_load_col VALUES (41, 'dss_record_source', '', '', '', '', 'varchar(256)', 'Y', 'N', 'N', 'Y', 99999991);
INSERT INTO ws_load_col VALUES (41, 'dss_load_date', '', '', '', '', 'timestamp', 'Y', 'N', 'N', 'Y', 99999992);",
        )?;
        let client = FakeClient::new();
        client
            .push_json(200, spreadsheet(&["Sheet1"]))
            .push_json(200, sheet_values());
        assert_eq!(gsheet_load_data(&mut ws, &client, "token")?, 2);
        let rows = ws.query_target(
            "SELECT name, amount, paid_on, dss_record_source FROM load.load_budget ORDER BY name",
            &[],
        )?;
        assert_eq!(rows[0][0], Value::from("food"));
        assert_eq!(rows[0][1], Value::Float(350.5));
        assert_eq!(rows[0][2], Value::Null);
        assert_eq!(
            rows[1][2],
            Value::DateTime(jiff::civil::date(2024, 5, 1).at(0, 0, 0, 0))
        );
        assert_eq!(rows[1][3], Value::from("Budget_2024"));
        Ok(())
    }
}
