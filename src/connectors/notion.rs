use jiff::civil::Date;
use log::info;
use serde_json::{json, Value as Json};

use crate::{
    db::{Row, Value},
    error::{Error, Result},
    helpers::{create_column_names, MetadataQuery},
    http::{HttpClient, Request},
    load::{load_rows, Stopwatch},
    wherescape::WhereScape,
};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Definition and rows of a Notion database.
#[derive(Debug, Clone)]
pub struct NotionDatabase {
    pub title: String,
    pub results: Vec<Json>,
}

pub struct Notion<'a> {
    client: &'a dyn HttpClient,
    key: String,
    base_url: String,
}

impl<'a> Notion<'a> {
    pub fn new(client: &'a dyn HttpClient, key: &str) -> Notion<'a> {
        Notion {
            client,
            key: key.to_string(),
            base_url: NOTION_API.to_string(),
        }
    }

    fn request(&self, request: Request) -> Result<Json> {
        let request = request
            .bearer(&self.key)
            .header("Notion-Version", NOTION_VERSION);
        self.client.send(&request)?.error_for_status("Notion")?.json()
    }

    pub fn retrieve_database(&self, database_id: &str) -> Result<Json> {
        self.request(Request::get(format!("{}/databases/{}", self.base_url, database_id)))
    }

    /// All pages of the database, following `next_cursor`.
    pub fn query_database(&self, database_id: &str) -> Result<Vec<Json>> {
        let url = format!("{}/databases/{}/query", self.base_url, database_id);
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = match &cursor {
                Some(c) => json!({ "start_cursor": c }),
                None => json!({}),
            };
            let response = self.request(Request::post(&url).json(body))?;
            if let Some(page) = response["results"].as_array() {
                results.extend(page.iter().cloned());
            }
            cursor = response["next_cursor"].as_str().map(|s| s.to_string());
            if !response["has_more"].as_bool().unwrap_or(false) || cursor.is_none() {
                break;
            }
        }
        Ok(results)
    }

    pub fn get_database(&self, database_id: &str) -> Result<NotionDatabase> {
        let definition = self.retrieve_database(database_id)?;
        let title = database_title(&definition);
        let results = self.query_database(database_id)?;
        Ok(NotionDatabase { title, results })
    }

    /// Id and title of every database shared with the integration.
    pub fn list_databases(&self) -> Result<Vec<(String, String)>> {
        let body = json!({"filter": {"value": "database", "property": "object"}});
        let response = self.request(Request::post(format!("{}/search", self.base_url)).json(body))?;
        let databases = response["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .map(|db| {
                        (
                            db["id"].as_str().unwrap_or_default().to_string(),
                            database_title(db),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(databases)
    }
}

pub fn database_title(database: &Json) -> String {
    let first = &database["title"][0];
    first["text"]["content"]
        .as_str()
        .or_else(|| first["plain_text"].as_str())
        .unwrap_or("<untitled>")
        .to_string()
}

/// Property names and column types, taken from the first row.
pub fn database_columns(results: &[Json]) -> Result<(Vec<String>, Vec<&'static str>)> {
    let mut columns = Vec::new();
    let mut types = Vec::new();
    let Some(properties) = results.first().and_then(|row| row["properties"].as_object()) else {
        return Ok((columns, types));
    };
    for (name, field) in properties {
        let field_type = field["type"].as_str().unwrap_or_default();
        let column_type = match field_type {
            "select" | "title" | "rich_text" | "multi_select" => "text",
            "date" => "date",
            other => return Err(Error::UnsupportedProperty(other.to_string())),
        };
        columns.push(name.clone());
        types.push(column_type);
    }
    Ok((columns, types))
}

fn first_plain_text(items: &Json) -> Value {
    Value::Text(items[0]["plain_text"].as_str().unwrap_or_default().to_string())
}

fn property_value(field: &Json) -> Result<Value> {
    let value = match field["type"].as_str().unwrap_or_default() {
        "select" => field["select"]["name"]
            .as_str()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "title" => first_plain_text(&field["title"]),
        "rich_text" => first_plain_text(&field["rich_text"]),
        "date" => field["date"]["start"]
            .as_str()
            .and_then(|s| Date::strptime("%Y-%m-%d", s.get(..10).unwrap_or(s)).ok())
            .map(Value::Date)
            .unwrap_or(Value::Null),
        "multi_select" => Value::Text(
            field["multi_select"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item["name"].as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default(),
        ),
        other => return Err(Error::UnsupportedProperty(other.to_string())),
    };
    Ok(value)
}

pub fn database_rows(results: &[Json], columns: &[String]) -> Result<Vec<Row>> {
    results
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|name| {
                    let field = &row["properties"][name.as_str()];
                    if field.is_null() {
                        Ok(Value::Null)
                    } else {
                        property_value(field)
                    }
                })
                .collect()
        })
        .collect()
}

/// The database id is in the file name of the load table, older tables have it
/// in the source url.
fn database_id(ws: &WhereScape) -> Result<String> {
    ws.file_name
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| Some(ws.context.source_url.clone()).filter(|s| !s.is_empty()))
        .ok_or_else(|| Error::Config(format!("no Notion database id for {}", ws.table())))
}

pub fn notion_load_data(ws: &mut WhereScape, client: &dyn HttpClient) -> Result<usize> {
    let stopwatch = Stopwatch::start("notion_load_data");
    let notion = Notion::new(client, &ws.read_parameter("notion_key")?);
    let database = notion.get_database(&database_id(ws)?)?;
    info!("Fetched database definition \"{}\" from Notion", database.title);

    let (display_names, _) = database_columns(&database.results)?;
    let rows = database_rows(&database.results, &display_names)?;
    let n = load_rows(
        ws,
        &create_column_names(&display_names),
        rows,
        &format!("Notion database - {}", database.title),
        stopwatch.started_at(),
    )?;
    ws.main_message = format!("Successfully inserted {} rows in to the load table.", n);
    stopwatch.finish();
    Ok(n)
}

pub fn notion_create_metadata(ws: &mut WhereScape, client: &dyn HttpClient) -> Result<()> {
    let key = ws.require_object_key()?;
    let notion = Notion::new(client, &ws.read_parameter("notion_key")?);
    let database = notion.get_database(&database_id(ws)?)?;
    info!("Fetched database definition \"{}\" from Notion", database.title);

    let (display_names, types) = database_columns(&database.results)?;
    let sql = MetadataQuery::new(key, &format!("Notion database - {}", database.title))
        .columns(&create_column_names(&display_names))
        .display_names(&display_names)
        .types(&types)
        .build();
    ws.push_script_to_meta(&sql)?;
    ws.main_message = format!("Created metadata table for {}.", database.title);
    Ok(())
}

pub fn notion_list_databases(ws: &mut WhereScape, client: &dyn HttpClient) -> Result<Vec<(String, String)>> {
    let notion = Notion::new(client, &ws.read_parameter("notion_key")?);
    let databases = notion.list_databases()?;
    for (id, title) in &databases {
        info!("{} {}", id, title);
    }
    ws.main_message = format!("Found {} Notion databases.", databases.len());
    Ok(databases)
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;

    use super::*;
    use crate::http::fake::FakeClient;
    use crate::wherescape::fixtures::instance;

    fn page(name: &str, status: Option<&str>, due: Option<&str>, tags: &[&str]) -> Json {
        json!({
            "object": "page",
            "properties": {
                "Name": {"type": "title", "title": [{"plain_text": name}]},
                "Status": {"type": "select", "select": status.map(|s| json!({"name": s}))},
                "Due date": {"type": "date", "date": due.map(|d| json!({"start": d}))},
                "Tags": {"type": "multi_select", "multi_select": tags.iter().map(|t| json!({"name": t})).collect::<Vec<_>>()},
                "Notes": {"type": "rich_text", "rich_text": []}
            }
        })
    }

    fn definition() -> Json {
        json!({"object": "database", "title": [{"text": {"content": "Tasks"}, "plain_text": "Tasks"}]})
    }

    #[test]
    fn columns_and_rows() -> Result<()> {
        let results = vec![
            page("Write docs", Some("Done"), Some("2024-05-01"), &["a", "b"]),
            page("Review", None, None, &[]),
        ];
        let (columns, types) = database_columns(&results)?;
        assert_eq!(columns, vec!["Name", "Status", "Due date", "Tags", "Notes"]);
        assert_eq!(types, vec!["text", "text", "date", "text", "text"]);
        let rows = database_rows(&results, &columns)?;
        assert_eq!(
            rows[0],
            vec![
                Value::from("Write docs"),
                Value::from("Done"),
                Value::Date(date(2024, 5, 1)),
                Value::from("a,b"),
                Value::from(""),
            ]
        );
        assert_eq!(rows[1][1], Value::Null);
        assert_eq!(rows[1][2], Value::Null);
        assert_eq!(rows[1][3], Value::from(""));
        Ok(())
    }

    #[test]
    fn unsupported_property() {
        let results = vec![json!({"properties": {"Done": {"type": "checkbox", "checkbox": true}}})];
        assert!(matches!(
            database_columns(&results),
            Err(Error::UnsupportedProperty(t)) if t == "checkbox"
        ));
    }

    #[test]
    fn untitled_database() {
        assert_eq!(database_title(&json!({"title": []})), "<untitled>");
        assert_eq!(database_title(&definition()), "Tasks");
    }

    #[test]
    fn query_follows_cursor() -> Result<()> {
        let client = FakeClient::new();
        client
            .push_json(200, json!({"results": [page("a", None, None, &[])], "has_more": true, "next_cursor": "c1"}))
            .push_json(200, json!({"results": [page("b", None, None, &[])], "has_more": false, "next_cursor": null}));
        let notion = Notion::new(&client, "secret");
        assert_eq!(notion.query_database("abc")?.len(), 2);
        let requests = client.requests.borrow();
        assert_eq!(requests[1].json, Some(json!({"start_cursor": "c1"})));
        assert!(requests[0]
            .headers
            .contains(&("Notion-Version".to_string(), NOTION_VERSION.to_string())));
        Ok(())
    }

    fn notion_table(target_sql: &str) -> WhereScape {
        instance(
            "load_notion_tasks",
            "load",
            "INSERT INTO ws_load_tab VALUES (31, 'load_notion_tasks', '', 'db-123');
INSERT INTO dss_parameter VALUES ('notion_key', 'secret', '');",
            target_sql,
        )
    }

    #[test]
    fn load_data() -> Result<()> {
        let mut ws = notion_table(
            "CREATE SCHEMA load; CREATE TABLE load.load_notion_tasks (name text, status text, due_date date, tags text, notes text, dss_record_source varchar, dss_load_date timestamp);",
        );
        let client = FakeClient::new();
        client
            .push_json(200, definition())
            .push_json(200, json!({"results": [page("Write docs", Some("Done"), Some("2024-05-01"), &["x"])], "has_more": false}));
        assert_eq!(notion_load_data(&mut ws, &client)?, 1);
        assert_eq!(client.urls()[0], "https://api.notion.com/v1/databases/db-123");
        let rows = ws.query_target("SELECT due_date, dss_record_source FROM load.load_notion_tasks", &[])?;
        assert_eq!(rows[0], vec![Value::Date(date(2024, 5, 1)), Value::from("Notion database - Tasks")]);
        Ok(())
    }

    #[test]
    fn create_metadata() -> Result<()> {
        let mut ws = notion_table("");
        let client = FakeClient::new();
        client
            .push_json(200, definition())
            .push_json(200, json!({"results": [page("a", None, None, &[])], "has_more": false}));
        notion_create_metadata(&mut ws, &client)?;
        let (names, types) = ws.get_columns()?;
        assert_eq!(names, vec!["name", "status", "due_date", "tags", "notes", "dss_record_source", "dss_load_date"]);
        assert_eq!(types[2], "date");
        assert_eq!(ws.main_message, "Created metadata table for Tasks.");
        Ok(())
    }

    #[test]
    fn list_databases() -> Result<()> {
        let mut ws = notion_table("");
        let client = FakeClient::new();
        client.push_json(200, json!({"results": [{"id": "db-1", "title": [{"plain_text": "Tasks"}]}]}));
        let databases = notion_list_databases(&mut ws, &client)?;
        assert_eq!(databases, vec![("db-1".to_string(), "Tasks".to_string())]);
        Ok(())
    }
}
