use std::collections::HashSet;

use jiff::{
    civil::{Date, DateTime},
    tz::TimeZone,
    Timestamp,
};
use serde_json::{Map, Value as Json};

use crate::db::Value;

/// Postgres column names are at most 63 characters, leave room for a suffix.
const MAX_COLUMN_LENGTH: usize = 59;

fn slugify_column(display_name: &str) -> String {
    let slug = slug::slugify(display_name).replace('-', "_");
    let truncated: String = slug.chars().take(MAX_COLUMN_LENGTH).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Turn display names (e.g. Notion property names or a spreadsheet header) into
/// column names.  Only empty and duplicate names get a numbered suffix.
pub fn create_column_names<S: AsRef<str>>(display_names: &[S]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(display_names.len());
    for (i, display_name) in display_names.iter().enumerate() {
        let mut column = slugify_column(display_name.as_ref());
        if column.is_empty() {
            column = format!("column_{:03}", i + 1);
        }
        if columns.contains(&column) {
            column = format!("{}_{:03}", column, i + 1);
        }
        columns.push(column);
    }
    columns
}

/// Older load tables have a numbered suffix on every column.  Keep using this
/// for those tables, new tables should use [`create_column_names`].
pub fn create_legacy_column_names<S: AsRef<str>>(display_names: &[S]) -> Vec<String> {
    display_names
        .iter()
        .enumerate()
        .map(|(i, display_name)| {
            let mut column = slugify_column(display_name.as_ref());
            if column.is_empty() {
                column = "column".to_string();
            }
            format!("{}_{:03}", column, i + 1)
        })
        .collect()
}

pub fn create_display_names<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    columns
        .iter()
        .map(|column| capitalize(&column.as_ref().replace('_', " ")))
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

fn quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// Builds the statement that replaces the column metadata of a load table.
///
/// All lists that are given should have the same length as the columns.  An
/// empty list means "use the default":
/// - display names default to an empty string,
/// - source columns default to the display name,
/// - comments default to the display name.
///
/// The `dss_record_source` and `dss_load_date` columns are always added.
#[derive(Debug, Clone, Default)]
pub struct MetadataQuery {
    object_key: i64,
    source_table: String,
    columns: Vec<String>,
    display_names: Vec<String>,
    types: Vec<String>,
    comments: Vec<String>,
    source_columns: Vec<String>,
}

impl MetadataQuery {
    pub fn new(object_key: i64, source_table: &str) -> Self {
        MetadataQuery {
            object_key,
            source_table: source_table.to_string(),
            ..Default::default()
        }
    }

    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn display_names<S: AsRef<str>>(mut self, display_names: &[S]) -> Self {
        self.display_names = display_names.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn types<S: AsRef<str>>(mut self, types: &[S]) -> Self {
        self.types = types.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn comments<S: AsRef<str>>(mut self, comments: &[S]) -> Self {
        self.comments = comments.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn source_columns<S: AsRef<str>>(mut self, source_columns: &[S]) -> Self {
        self.source_columns = source_columns.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn build(&self) -> String {
        let key = self.object_key;
        let mut values: Vec<String> = Vec::with_capacity(self.columns.len() + 2);
        for (i, column) in self.columns.iter().enumerate() {
            let data_type = self.types.get(i).map(|s| s.as_str()).unwrap_or("text");
            let (nulls, numeric, additive, attribute) = match data_type {
                "text" | "bool" => ("Y", "N", "N", "Y"),
                "date" | "timestamp" | "varchar(256)" => ("Y", "N", "N", "N"),
                "numeric" | "int" | "bigint" => ("Y", "Y", "N", "N"),
                _ => ("Y", "N", "N", "N"),
            };
            let display_name = self.display_names.get(i).cloned().unwrap_or_default();
            let source_column = if self.source_columns.is_empty() {
                display_name.clone()
            } else {
                self.source_columns.get(i).cloned().unwrap_or_default()
            };
            let comment = if self.comments.is_empty() {
                display_name.clone()
            } else {
                self.comments.get(i).cloned().unwrap_or_default()
            };
            values.push(format!(
                "({}, '{}', '{}', '{}', '{}', '{}', '{}', '{}', '{}', '{}', '{}', '{}')",
                key,
                quote(column),
                quote(&display_name),
                quote(&self.source_table),
                quote(&source_column),
                quote(&comment),
                quote(data_type),
                nulls,
                numeric,
                additive,
                attribute,
                (i + 1) * 10
            ));
        }
        values.push(format!("({}, 'dss_record_source', 'dss record source', null, null, 'Record source.', 'varchar(256)', 'Y', 'N', 'N', 'Y', 99999991)", key));
        values.push(format!("({}, 'dss_load_date', 'dss load date', null, null, 'Load date.', 'timestamp', 'Y', 'N', 'N', 'Y', 99999992)", key));

        format!(
            r#"
DELETE FROM ws_load_col WHERE lc_obj_key = {};
INSERT INTO ws_load_col (lc_obj_key, lc_col_name, lc_display_name, lc_src_table, lc_src_column, lc_src_strategy, lc_data_type, lc_nulls_flag, lc_numeric_flag, lc_additive_flag, lc_attribute_flag, lc_order)
VALUES {};
"#,
            key,
            values.join(",\n")
        )
    }
}

/// Keep only the keys in `keys_to_keep`, e.g. to drop links to avatars.
pub fn filter_dict<S: AsRef<str>>(map: &Map<String, Json>, keys_to_keep: &[S]) -> Map<String, Json> {
    let keep: HashSet<&str> = keys_to_keep.iter().map(|k| k.as_ref()).collect();
    map.iter()
        .filter(|(k, _)| keep.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Flatten nested objects into `parent_child` keys, list items get their
/// index as part of the key, `items_0_name`.  A key equal to `name_to_skip`
/// is not added to the prefix of its children.
pub fn flatten_json(value: &Json, name_to_skip: Option<&str>) -> Map<String, Json> {
    fn flatten(x: &Json, name: String, skip: Option<&str>, out: &mut Map<String, Json>) {
        match x {
            Json::Object(obj) => {
                for (k, v) in obj {
                    let new_name = if skip == Some(k.as_str()) {
                        name.clone()
                    } else {
                        format!("{}{}_", name, k)
                    };
                    flatten(v, new_name, skip, out);
                }
            }
            Json::Array(items) if !items.is_empty() => {
                for (i, v) in items.iter().enumerate() {
                    flatten(v, format!("{}{}_", name, i), skip, out);
                }
            }
            leaf => {
                let key = name.strip_suffix('_').unwrap_or(&name).to_string();
                out.insert(key, leaf.clone());
            }
        }
    }

    let mut out = Map::new();
    flatten(value, String::new(), name_to_skip, &mut out);
    out
}

/// Return a map with exactly the `keys_to_keep`, in that order.  Keys the api
/// didn't return get the value from `overwrite` if present, null otherwise.
pub fn fill_out_empty_keys<S: AsRef<str>>(
    cleaned: &Map<String, Json>,
    keys_to_keep: &[S],
    overwrite: Option<&Map<String, Json>>,
) -> Map<String, Json> {
    let mut out = Map::new();
    for key in keys_to_keep {
        let key = key.as_ref();
        let value = match cleaned.get(key) {
            Some(v) => v.clone(),
            None => overwrite
                .and_then(|o| o.get(key))
                .cloned()
                .unwrap_or(Json::Null),
        };
        out.insert(key.to_string(), value);
    }
    out
}

const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 8] = [
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parse the common date and datetime notations found in api responses and
/// spreadsheets.  Values with an offset are converted to UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Some(ts.to_zoned(TimeZone::UTC).datetime());
    }
    for fmt in DATETIME_FORMATS.iter().filter(|f| f.ends_with("%z")) {
        if let Ok(ts) = jiff::fmt::strtime::parse(fmt, s).and_then(|p| p.to_timestamp()) {
            return Some(ts.to_zoned(TimeZone::UTC).datetime());
        }
    }
    if let Ok(dt) = s.parse::<DateTime>() {
        return Some(dt);
    }
    if let Ok(d) = s.parse::<Date>() {
        return Some(d.to_datetime(jiff::civil::Time::midnight()));
    }
    for fmt in DATETIME_FORMATS.iter().filter(|f| !f.ends_with("%z")) {
        if let Ok(dt) = DateTime::strptime(fmt, s) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = Date::strptime(fmt, s) {
            return Some(d.to_datetime(jiff::civil::Time::midnight()));
        }
    }
    None
}

/// Whether the string can be read as a date.
pub fn is_date(s: &str) -> bool {
    parse_datetime(s).is_some()
}

fn looks_numeric(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
}

/// The type of a spreadsheet cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Int,
    Float,
    Bool,
    DateTime,
    Text,
}

impl CellType {
    pub fn of(cell: &str) -> Option<CellType> {
        let cell = cell.trim();
        if cell.is_empty() {
            return None;
        }
        if looks_numeric(cell) {
            if cell.parse::<i64>().is_ok() {
                return Some(CellType::Int);
            }
            if cell.parse::<f64>().is_ok() {
                return Some(CellType::Float);
            }
        }
        if cell.eq_ignore_ascii_case("true") || cell.eq_ignore_ascii_case("false") {
            return Some(CellType::Bool);
        }
        if is_date(cell) {
            return Some(CellType::DateTime);
        }
        Some(CellType::Text)
    }

    /// Column type for the load table.
    pub fn warehouse_type(&self) -> &'static str {
        match self {
            CellType::Int | CellType::Float => "numeric",
            CellType::DateTime => "timestamp",
            CellType::Bool => "bool",
            CellType::Text => "text",
        }
    }
}

/// The common type of a column of cells, empty cells are ignored.  A mix of
/// integers and floats is a float, any other mix is text.
pub fn infer_cell_type<S: AsRef<str>>(cells: &[S]) -> CellType {
    let mut common: Option<CellType> = None;
    for cell in cells {
        let Some(t) = CellType::of(cell.as_ref()) else {
            continue;
        };
        common = Some(match (common, t) {
            (None, t) => t,
            (Some(c), t) if c == t => c,
            (Some(CellType::Int), CellType::Float) | (Some(CellType::Float), CellType::Int) => {
                CellType::Float
            }
            _ => return CellType::Text,
        });
    }
    common.unwrap_or(CellType::Text)
}

/// Trim a cell and convert it to the value it represents.
pub fn convert_string(s: &str) -> Value {
    let s = s.trim();
    match CellType::of(s) {
        None => Value::Null,
        Some(CellType::Int) => s.parse::<i64>().map(Value::Int).unwrap_or(Value::Null),
        Some(CellType::Float) => s.parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        Some(CellType::Bool) => Value::Bool(s.eq_ignore_ascii_case("true")),
        Some(CellType::DateTime) => parse_datetime(s)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(s.to_string())),
        Some(CellType::Text) => Value::Text(s.to_string()),
    }
}

/// Remove the rows and the columns that have no content at all.  Short rows
/// are padded with empty cells first.
pub fn remove_empty_rows_and_columns(content: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let width = content.iter().map(|r| r.len()).max().unwrap_or(0);
    let rows: Vec<Vec<String>> = content
        .into_iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();
    let keep: Vec<usize> = (0..width)
        .filter(|&j| rows.iter().any(|row| !row[j].trim().is_empty()))
        .collect();
    rows.into_iter()
        .map(|row| keep.iter().map(|&j| row[j].clone()).collect())
        .collect()
}

/// Normalize a date-like value for a timestamp column.  Values that can't be
/// read as a date are passed on unchanged for the database to reject.
pub fn set_date_to_ymd(value: &Value) -> Value {
    match value {
        Value::Text(s) if s.trim().is_empty() => Value::Null,
        Value::Text(s) => match parse_datetime(s) {
            Some(dt) => Value::DateTime(dt),
            None => value.clone(),
        },
        Value::Date(d) => Value::DateTime(d.to_datetime(jiff::civil::Time::midnight())),
        other => other.clone(),
    }
}

/// The type of a field as it comes from a json api.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Int,
    Float,
    Text,
    Date,
    DateTime,
    Boolean,
}

impl SourceType {
    pub fn warehouse_type(&self) -> &'static str {
        match self {
            SourceType::Int | SourceType::Float => "numeric",
            SourceType::Text => "text",
            SourceType::Date => "date",
            SourceType::DateTime => "timestamp",
            SourceType::Boolean => "boolean",
        }
    }

    /// Convert a json value to the database value for this type.  Values that
    /// don't fit become null.
    pub fn coerce(&self, value: &Json) -> Value {
        match (self, value) {
            (_, Json::Null) => Value::Null,
            (SourceType::Int, Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|x| x as i64))
                .map(Value::Int)
                .unwrap_or(Value::Null),
            (SourceType::Int, Json::String(s)) => {
                s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null)
            }
            (SourceType::Int, _) => Value::Null,
            (SourceType::Float, Json::Number(n)) => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            (SourceType::Float, Json::String(s)) => {
                s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null)
            }
            (SourceType::Float, _) => Value::Null,
            (SourceType::Text, Json::String(s)) => Value::Text(s.clone()),
            (SourceType::Text, other) => Value::Text(other.to_string()),
            (SourceType::DateTime, Json::String(s)) => {
                parse_datetime(s).map(Value::DateTime).unwrap_or(Value::Null)
            }
            (SourceType::DateTime, _) => Value::Null,
            (SourceType::Date, Json::String(s)) => s
                .get(..10)
                .and_then(|d| d.parse::<jiff::civil::Date>().ok())
                .map(Value::Date)
                .unwrap_or(Value::Null),
            (SourceType::Date, _) => Value::Null,
            (SourceType::Boolean, Json::Bool(b)) => Value::Bool(*b),
            (SourceType::Boolean, Json::String(s)) => match s.to_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            },
            (SourceType::Boolean, _) => Value::Null,
        }
    }
}

/// Turn flattened api records into rows that follow the column list.
pub fn records_to_rows(records: &[Map<String, Json>], columns: &[(&str, SourceType)]) -> Vec<Vec<Value>> {
    records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|(name, source_type)| {
                    record
                        .get(*name)
                        .map(|v| source_type.coerce(v))
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use jiff::civil::datetime;
    use serde_json::json;

    use super::*;

    #[test]
    fn column_names() {
        let names = create_column_names(&["First Name", "", "first name", "Ünïcode & Co."]);
        assert_eq!(names, vec!["first_name", "column_002", "first_name_003", "unicode_co"]);

        let long = "a".repeat(80);
        assert_eq!(create_column_names(&[long])[0].len(), 59);
    }

    #[test]
    fn legacy_column_names() {
        let names = create_legacy_column_names(&["Name", "", "E-mail"]);
        assert_eq!(names, vec!["name_001", "column_002", "e_mail_003"]);
    }

    #[test]
    fn display_names() {
        assert_eq!(
            create_display_names(&["merge_request_ID", "state"]),
            vec!["Merge request id", "State"]
        );
    }

    #[test]
    fn metadata_query() {
        let sql = MetadataQuery::new(42, "gitlab_api")
            .columns(&["id", "title", "created_at", "score"])
            .display_names(&["Id", "It's a title", "Created at", "Score"])
            .types(&["numeric", "text", "timestamp", "float"])
            .build();
        assert!(sql.contains("DELETE FROM ws_load_col WHERE lc_obj_key = 42;"));
        assert!(sql.contains("(42, 'id', 'Id', 'gitlab_api', 'Id', 'Id', 'numeric', 'Y', 'Y', 'N', 'N', '10')"));
        assert!(sql.contains("(42, 'title', 'It''s a title', 'gitlab_api', 'It''s a title', 'It''s a title', 'text', 'Y', 'N', 'N', 'Y', '20')"));
        assert!(sql.contains("'timestamp', 'Y', 'N', 'N', 'N', '30')"));
        assert!(sql.contains("'float', 'Y', 'N', 'N', 'N', '40')"));
        assert!(sql.contains("'dss_record_source'"));
        assert!(sql.trim_end().ends_with("99999992);"));
    }

    #[test]
    fn metadata_query_without_display_names() {
        let sql = MetadataQuery::new(1, "src")
            .columns(&["a"])
            .types(&["bool"])
            .comments(&["A comment"])
            .build();
        assert!(sql.contains("(1, 'a', '', 'src', '', 'A comment', 'bool', 'Y', 'N', 'N', 'Y', '10')"));
    }

    #[test]
    fn flatten_nested() {
        let value = json!({
            "id": 1,
            "author": {"name": "ann", "email": null},
            "labels": ["a", "b"],
            "assignees": [],
            "links": {},
            "fields": {"summary": "x", "status": {"name": "Done"}}
        });
        let flat = flatten_json(&value, Some("fields"));
        let keys: Vec<&str> = flat.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "id",
                "author_name",
                "author_email",
                "labels_0",
                "labels_1",
                "assignees",
                "summary",
                "status_name"
            ]
        );
        assert_eq!(flat["assignees"], json!([]));
        assert_eq!(flat["status_name"], json!("Done"));
    }

    #[test]
    fn filter_and_fill() {
        let flat = flatten_json(&json!({"b": 2, "a": 1, "z": 0}), None);
        let keys = ["a", "b", "c", "d"];
        let filtered = filter_dict(&flat, &keys);
        assert_eq!(filtered.len(), 2);

        let overwrite = json!({"d": "default"});
        let filled = fill_out_empty_keys(&filtered, &keys, overwrite.as_object());
        let values: Vec<&Json> = filled.values().collect();
        assert_eq!(values, vec![&json!(1), &json!(2), &json!(null), &json!("default")]);
    }

    #[test]
    fn parse_dates() {
        assert_eq!(
            parse_datetime("2024-01-02T10:11:12.000+0100"),
            Some(datetime(2024, 1, 2, 9, 11, 12, 0))
        );
        assert_eq!(
            parse_datetime("2024-01-02T10:11:12Z"),
            Some(datetime(2024, 1, 2, 10, 11, 12, 0))
        );
        assert_eq!(parse_datetime("2024-01-02"), Some(datetime(2024, 1, 2, 0, 0, 0, 0)));
        assert_eq!(parse_datetime("31/12/2023"), Some(datetime(2023, 12, 31, 0, 0, 0, 0)));
        assert!(!is_date("not a date"));
        assert!(!is_date(""));
    }

    #[test]
    fn cell_types() {
        assert_eq!(infer_cell_type(&["1", "", "2"]), CellType::Int);
        assert_eq!(infer_cell_type(&["1", "2.5"]), CellType::Float);
        assert_eq!(infer_cell_type(&["TRUE", "false"]), CellType::Bool);
        assert_eq!(infer_cell_type(&["2024-01-01", "02/01/2024"]), CellType::DateTime);
        assert_eq!(infer_cell_type(&["1", "abc"]), CellType::Text);
        assert_eq!(infer_cell_type(&["nan", "inf"]), CellType::Text);
        assert_eq!(infer_cell_type::<&str>(&[]), CellType::Text);
        assert_eq!(convert_string(" 12 "), Value::Int(12));
        assert_eq!(convert_string(""), Value::Null);
    }

    #[test]
    fn empty_rows_and_columns() {
        let grid = vec![
            vec!["a".to_string(), "".to_string(), "b".to_string()],
            vec!["".to_string(), "".to_string()],
            vec!["1".to_string(), " ".to_string(), "2".to_string(), "".to_string()],
        ];
        let cleaned = remove_empty_rows_and_columns(grid);
        assert_eq!(cleaned, vec![vec!["a", "b"], vec!["1", "2"]]);
    }

    #[test]
    fn date_to_ymd() {
        assert_eq!(
            set_date_to_ymd(&Value::Text("01-02-2024".into())),
            Value::DateTime(datetime(2024, 2, 1, 0, 0, 0, 0))
        );
        assert_eq!(set_date_to_ymd(&Value::Text("".into())), Value::Null);
        assert_eq!(
            set_date_to_ymd(&Value::Text("soon".into())),
            Value::Text("soon".into())
        );
    }

    #[test]
    fn coerce_source_types() {
        assert_eq!(SourceType::Int.coerce(&json!("10001")), Value::Int(10001));
        assert_eq!(SourceType::Int.coerce(&json!("abc")), Value::Null);
        assert_eq!(SourceType::Text.coerce(&json!(5)), Value::Text("5".into()));
        assert_eq!(SourceType::Boolean.coerce(&json!(true)), Value::Bool(true));
        assert_eq!(SourceType::Float.coerce(&json!(0.75)), Value::Float(0.75));
        assert_eq!(
            SourceType::Date.coerce(&json!("2024-05-03")),
            Value::Date(jiff::civil::date(2024, 5, 3))
        );
        assert_eq!(
            SourceType::DateTime.coerce(&json!("2024-05-01T08:00:00.000Z")),
            Value::DateTime(datetime(2024, 5, 1, 8, 0, 0, 0))
        );
    }
}
