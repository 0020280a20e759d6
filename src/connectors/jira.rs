use log::{info, warn};
use serde_json::{json, Map, Value as Json};

use crate::{
    error::{Error, Result},
    helpers::{
        create_column_names, create_display_names, fill_out_empty_keys, filter_dict, flatten_json,
        parse_datetime, records_to_rows,
        SourceType::{self, Boolean, DateTime, Int, Text},
        MetadataQuery,
    },
    http::{HttpClient, Request},
    load::{load_rows, Stopwatch},
    wherescape::WhereScape,
};

/// Issue fields after flattening with `fields` skipped, so
/// `fields.issuetype.name` becomes `issuetype_name`.
pub const ISSUE_COLUMNS: &[(&str, SourceType)] = &[
    ("id", Int),
    ("key", Text),
    ("issuetype_id", Int),
    ("issuetype_description", Text),
    ("issuetype_name", Text),
    ("project_id", Int),
    ("project_name", Text),
    ("timespent", Int),
    ("resolutiondate", DateTime),
    ("created", DateTime),
    ("priority_name", Text),
    ("priority_id", Int),
    ("updated", DateTime),
    ("status_name", Text),
    ("status_id", Int),
    ("status_statusCategory_id", Int),
    ("status_statusCategory_key", Text),
    ("status_statusCategory_name", Text),
    ("timeoriginalestimate", Int),
    ("duedate", DateTime),
    ("resolution", Text),
    ("status_in_progress_date", DateTime),
];

pub const PROJECT_COLUMNS: &[(&str, SourceType)] = &[
    ("self", Text),
    ("id", Int),
    ("key", Text),
    ("name", Text),
    ("projectTypeKey", Text),
    ("simplified", Boolean),
    ("style", Text),
    ("isPrivate", Boolean),
    ("entityId", Text),
    ("uuid", Text),
];

pub const DEFAULT_SINCE: &str = "-48h";
const MAX_RESULTS: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JiraObject {
    Projects,
    Issues,
}

impl JiraObject {
    pub fn from_table_name(table: &str) -> Result<JiraObject> {
        let table = table.to_lowercase();
        if table.contains("project") {
            Ok(JiraObject::Projects)
        } else if table.contains("issue") {
            Ok(JiraObject::Issues)
        } else {
            Err(Error::UnknownObjectType {
                connector: "Jira".to_string(),
                table,
            })
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            JiraObject::Projects => "projects",
            JiraObject::Issues => "issues",
        }
    }

    fn load_type(&self) -> &'static str {
        match self {
            JiraObject::Projects => "project",
            JiraObject::Issues => "issue",
        }
    }

    pub fn columns(&self) -> &'static [(&'static str, SourceType)] {
        match self {
            JiraObject::Projects => PROJECT_COLUMNS,
            JiraObject::Issues => ISSUE_COLUMNS,
        }
    }

    fn keys(&self) -> Vec<&'static str> {
        self.columns().iter().map(|(k, _)| *k).collect()
    }
}

pub struct Jira<'a> {
    client: &'a dyn HttpClient,
    user: String,
    apikey: String,
    base_url: String,
}

impl<'a> Jira<'a> {
    pub fn new(client: &'a dyn HttpClient, user: &str, apikey: &str, base_url: &str) -> Jira<'a> {
        Jira {
            client,
            user: user.to_string(),
            apikey: apikey.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn make_request(&self, request: Request) -> Result<Json> {
        let request = request
            .basic_auth(&self.user, &self.apikey)
            .header("Content-Type", "application/json");
        let response = self.client.send(&request)?;
        if response.status != 200 {
            return Err(Error::Api {
                api: "JIRA".to_string(),
                status: response.status,
                body: response.body,
            });
        }
        response.json()
    }

    /// All projects as returned by Jira, private ones included.
    fn project_values(&self) -> Result<Vec<Json>> {
        let url = format!("{}/project/search", self.base_url);
        let response = self.make_request(Request::get(url))?;
        Ok(response["values"].as_array().cloned().unwrap_or_default())
    }

    pub fn get_all_projects(&self) -> Result<Vec<Map<String, Json>>> {
        let keys = JiraObject::Projects.keys();
        Ok(self
            .project_values()?
            .iter()
            .filter(|p| !is_private(p))
            .filter_map(|p| p.as_object())
            .map(|p| fill_out_empty_keys(&filter_dict(p, &keys), &keys, None))
            .collect())
    }

    /// `since` takes anything JQL accepts for `created`, e.g. `-48h` or
    /// `2024-05-01`.
    pub fn get_all_issues(&self, since: Option<&str>) -> Result<Vec<Map<String, Json>>> {
        let mut issues = Vec::new();
        for project in self.project_values()?.iter().filter(|p| !is_private(p)) {
            let project_id = match &project["id"] {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            issues.extend(self.get_issue_data_per_project(&project_id, since)?);
        }
        Ok(issues)
    }

    pub fn get_issue_data_per_project(&self, project_id: &str, since: Option<&str>) -> Result<Vec<Map<String, Json>>> {
        let jql = match since {
            Some(since) => format!(
                "project = {} AND (created >= \"{}\" OR updated >= \"{}\")",
                project_id, since, since
            ),
            None => format!("project = {} ORDER BY key", project_id),
        };
        let url = format!("{}/search/jql", self.base_url);
        let mut next_page_token = Json::Null;
        let mut issues = Vec::new();
        loop {
            let payload = json!({
                "jql": jql,
                "maxResults": MAX_RESULTS,
                "nextPageToken": next_page_token,
                "expand": "changelog",
            });
            let response = self.make_request(Request::post(&url).json(payload))?;
            if let Some(errors) = response.get("errorMessages") {
                warn!("{}", errors);
                return Ok(Vec::new());
            }
            if let Some(page) = response["issues"].as_array() {
                issues.extend(page.iter().map(clean_issue));
            }
            if response["isLast"].as_bool().unwrap_or(true) {
                break;
            }
            next_page_token = match response.get("nextPageToken") {
                Some(token @ Json::String(_)) => token.clone(),
                _ => {
                    return Err(Error::Config(format!(
                        "Jira returned no nextPageToken for project {} before the last page",
                        project_id
                    )))
                }
            };
        }
        Ok(issues)
    }
}

fn is_private(project: &Json) -> bool {
    project["isPrivate"].as_bool().unwrap_or(false)
}

/// The first time the issue moved to "In Progress", from its changelog.
pub fn status_in_progress_date(issue: &Json) -> Option<String> {
    let histories = issue["changelog"]["histories"].as_array()?;
    histories
        .iter()
        .filter(|history| {
            history["items"].as_array().is_some_and(|items| {
                items
                    .iter()
                    .any(|item| item["field"] == "status" && item["toString"] == "In Progress")
            })
        })
        .filter_map(|history| history["created"].as_str())
        .min_by_key(|created| parse_datetime(created))
        .map(|s| s.to_string())
}

fn clean_issue(issue: &Json) -> Map<String, Json> {
    let keys = JiraObject::Issues.keys();
    let mut flat = flatten_json(issue, Some("fields"));
    flat.insert(
        "status_in_progress_date".to_string(),
        status_in_progress_date(issue).map(Json::String).unwrap_or(Json::Null),
    );
    fill_out_empty_keys(&filter_dict(&flat, &keys), &keys, None)
}

fn base_url(ws: &WhereScape) -> Result<String> {
    if !ws.context.source_url.is_empty() {
        return Ok(ws.context.source_url.clone());
    }
    ws.read_parameter("jira_base_url")
}

/// Load projects or issues, depending on the name of the load table.  Issues
/// are limited to the ones created or updated after `since`.
pub fn jira_load_data(ws: &mut WhereScape, client: &dyn HttpClient, since: Option<&str>) -> Result<usize> {
    let stopwatch = Stopwatch::start("jira_load_data");
    let object = JiraObject::from_table_name(ws.table())?;
    let user = ws.read_parameter("jira_user")?;
    let apikey = ws.read_parameter("jira_apikey")?;
    let jira = Jira::new(client, &user, &apikey, &base_url(ws)?);

    info!("Requesting data from Jira");
    let records = match object {
        JiraObject::Projects => jira.get_all_projects()?,
        JiraObject::Issues => jira.get_all_issues(since)?,
    };

    let mut n = 0;
    if records.is_empty() {
        warn!("No data received from JIRA");
    } else {
        n = load_rows(
            ws,
            &create_column_names(&object.keys()),
            records_to_rows(&records, object.columns()),
            &format!("Jira api - {}", object.load_type()),
            stopwatch.started_at(),
        )?;
        info!("Successfully inserted {} rows in to the load table.", n);
        ws.main_message = format!("Successfully inserted {} rows in to the load table.", n);
    }
    stopwatch.finish();
    Ok(n)
}

pub fn jira_create_metadata(ws: &mut WhereScape) -> Result<()> {
    let object = JiraObject::from_table_name(ws.table())?;
    let key = ws.require_object_key()?;
    let keys = object.keys();
    let types: Vec<&str> = object.columns().iter().map(|(_, t)| t.warehouse_type()).collect();
    let sql = MetadataQuery::new(key, &format!("Jira api - {}", object.title()))
        .columns(&create_column_names(&keys))
        .display_names(&create_display_names(&keys))
        .types(&types)
        .source_columns(&keys)
        .build();
    ws.push_script_to_meta(&sql)?;
    info!("Metadata table for {} created.", object.title());
    ws.main_message = format!("Created metadata table for {}.", object.title());
    Ok(())
}
