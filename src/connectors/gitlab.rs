//! Load projects, release tags, issues, pipelines and merge requests from the
//! Gitlab REST api.  The object type is picked from the name of the load table.

pub mod columns;

use jiff::Zoned;
use log::{info, warn};
use serde_json::{Map, Value as Json};

use crate::{
    db::Row,
    error::{Error, Result},
    helpers::{
        create_column_names, create_display_names, fill_out_empty_keys, filter_dict, flatten_json,
        records_to_rows, MetadataQuery,
    },
    http::{HttpClient, Request, Response},
    load::{load_rows, Stopwatch},
    wherescape::WhereScape,
};

use self::columns::Columns;

pub const HIGH_WATER_MARK: &str = "gitlab_high_water_mark";
pub const HIGH_WATER_MARK_NEXT: &str = "gitlab_high_water_mark_next";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitlabObject {
    Projects,
    Tags,
    Issues,
    Pipelines,
    MergeRequests,
}

impl GitlabObject {
    /// Table names are matched in this order, so `load_gitlab_project_tags`
    /// loads projects.
    pub fn from_table_name(table: &str) -> Result<GitlabObject> {
        let table = table.to_lowercase();
        let candidates = [
            ("project", GitlabObject::Projects),
            ("tag", GitlabObject::Tags),
            ("issue", GitlabObject::Issues),
            ("pipeline", GitlabObject::Pipelines),
            ("merge_request", GitlabObject::MergeRequests),
        ];
        candidates
            .into_iter()
            .find(|(needle, _)| table.contains(needle))
            .map(|(_, object)| object)
            .ok_or_else(|| Error::UnknownObjectType {
                connector: "Gitlab".to_string(),
                table,
            })
    }

    pub fn title(&self) -> &'static str {
        match self {
            GitlabObject::Projects => "projects",
            GitlabObject::Tags => "tags",
            GitlabObject::Issues => "issues",
            GitlabObject::Pipelines => "pipelines",
            GitlabObject::MergeRequests => "merge_requests",
        }
    }

    pub fn columns(&self) -> Columns {
        match self {
            GitlabObject::Projects => columns::PROJECTS,
            GitlabObject::Tags => columns::TAGS,
            GitlabObject::Issues => columns::ISSUES,
            GitlabObject::Pipelines => columns::PIPELINES,
            GitlabObject::MergeRequests => columns::MERGE_REQUESTS,
        }
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.columns().iter().map(|(name, _)| *name).collect()
    }

    fn order_by(&self) -> &'static str {
        match self {
            GitlabObject::Projects => "id",
            GitlabObject::Tags => "name",
            GitlabObject::Issues => "created_at",
            GitlabObject::Pipelines => "id",
            GitlabObject::MergeRequests => "title",
        }
    }

    fn resource(&self, project_id: i64) -> String {
        match self {
            GitlabObject::Projects => "projects".to_string(),
            GitlabObject::Tags => format!("projects/{}/repository/tags", project_id),
            GitlabObject::Issues => format!("projects/{}/issues", project_id),
            GitlabObject::Pipelines => format!("projects/{}/pipelines", project_id),
            GitlabObject::MergeRequests => format!("projects/{}/merge_requests", project_id),
        }
    }
}

pub struct Gitlab<'a> {
    client: &'a dyn HttpClient,
    access_token: String,
    base_url: String,
    since: Option<String>,
    pub per_page: usize,
}

impl<'a> Gitlab<'a> {
    pub fn new(
        client: &'a dyn HttpClient,
        access_token: &str,
        base_url: &str,
        since: Option<String>,
    ) -> Gitlab<'a> {
        Gitlab {
            client,
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            since: since.filter(|s| !s.is_empty()),
            per_page: 50,
        }
    }

    pub fn format_url(&self, resource: &str, page: usize, simple: bool, order_by: &str, since: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}?order_by={}&sort=asc&simple={}&per_page={}&page={}",
            self.base_url, resource, order_by, simple, self.per_page, page
        );
        if let Some(since) = since {
            url.push_str(&format!("&updated_after={}", since));
        }
        url
    }

    /// Request all pages of a resource and keep the flattened `keys` of
    /// every item.
    pub fn paginate_through_resource(
        &self,
        resource: &str,
        keys: &[&str],
        simple: bool,
        order_by: &str,
        since: Option<&str>,
    ) -> Result<Vec<Map<String, Json>>> {
        let mut records = Vec::new();
        let mut total_pages: usize = 1;
        let mut current_page: usize = 0;
        while current_page < total_pages {
            let url = self.format_url(resource, current_page + 1, simple, order_by, since);
            let response = self
                .client
                .send(&Request::get(&url).bearer(&self.access_token))?;
            if response.status == 403 {
                warn!("{} Forbidden resource, please check the user's rights", url);
                current_page += 1;
                continue;
            }
            let response = response.error_for_status("Gitlab")?;
            let items: Vec<Json> = response.json()?;
            for item in &items {
                let flat = flatten_json(item, None);
                records.push(fill_out_empty_keys(&filter_dict(&flat, keys), keys, None));
            }
            (current_page, total_pages) = next_page(&response, current_page, total_pages);
        }
        Ok(records)
    }

    pub fn get_projects(&self) -> Result<Vec<Map<String, Json>>> {
        let object = GitlabObject::Projects;
        self.paginate_through_resource(
            &object.resource(0),
            &object.keys(),
            true,
            object.order_by(),
            None,
        )
    }

    /// Projects are always loaded in full, the other types are requested per
    /// project and only for changes since the high water mark.
    pub fn get(&self, object: GitlabObject) -> Result<Vec<Map<String, Json>>> {
        let projects = self.get_projects()?;
        if object == GitlabObject::Projects {
            return Ok(projects);
        }
        let mut records = Vec::new();
        for project in &projects {
            let Some(project_id) = project.get("id").and_then(|v| v.as_i64()) else {
                continue;
            };
            records.extend(self.paginate_through_resource(
                &object.resource(project_id),
                &object.keys(),
                false,
                object.order_by(),
                self.since.as_deref(),
            )?);
        }
        info!("Received {} {} from Gitlab", records.len(), object.title());
        Ok(records)
    }
}

/// Work out the page just read and the number of pages from the headers.
fn next_page(response: &Response, current_page: usize, total_pages: usize) -> (usize, usize) {
    let header = |name: &str| {
        response
            .header(name)
            .and_then(|v| v.trim().parse::<usize>().ok())
    };
    match (header("X-Total-Pages"), header("X-Page")) {
        (Some(total), Some(page)) => (page.max(current_page + 1), total),
        _ => match header("X-Next-Page") {
            Some(next) if next > current_page + 1 => (next - 1, next),
            _ => (current_page + 1, total_pages),
        },
    }
}

fn column_names(object: GitlabObject) -> Vec<String> {
    create_column_names(&object.keys())
}

pub fn gitlab_load_data(ws: &mut WhereScape, client: &dyn HttpClient) -> Result<usize> {
    let stopwatch = Stopwatch::start("gitlab_load_data");
    let object = GitlabObject::from_table_name(ws.table())?;
    let access_token = ws.read_parameter("gitlab_access_token")?;
    let base_url = ws.read_parameter("gitlab_base_url")?;
    let since = ws.read_parameter(HIGH_WATER_MARK)?;

    let gitlab = Gitlab::new(client, &access_token, &base_url, Some(since));
    let records = gitlab.get(object)?;
    let rows: Vec<Row> = records_to_rows(&records, object.columns());

    let n = load_rows(
        ws,
        &column_names(object),
        rows,
        &format!("Gitlab api - {}", object.title()),
        stopwatch.started_at(),
    )?;
    ws.main_message = format!("Successfully inserted {} rows in to the load table.", n);
    stopwatch.finish();
    Ok(n)
}

pub fn gitlab_create_metadata(ws: &mut WhereScape) -> Result<()> {
    let object = GitlabObject::from_table_name(ws.table())?;
    let key = ws.require_object_key()?;
    let keys = object.keys();
    let types: Vec<&str> = object
        .columns()
        .iter()
        .map(|(_, t)| t.warehouse_type())
        .collect();
    let sql = MetadataQuery::new(key, &format!("Gitlab api - {}", object.title()))
        .columns(&column_names(object))
        .display_names(&create_display_names(&keys))
        .types(&types)
        .source_columns(&keys)
        .build();
    ws.push_script_to_meta(&sql)?;
    ws.main_message = format!("Created metadata table for {}.", object.title());
    Ok(())
}

/// Remember the start of this run.  It becomes the high water mark once the
/// whole job succeeded, see [`update_high_water_mark`].
pub fn next_high_water_mark(ws: &mut WhereScape, now: &Zoned) -> Result<String> {
    let mark = now.strftime("%Y-%m-%dT%H:%M:%S").to_string();
    ws.write_parameter(HIGH_WATER_MARK_NEXT, &mark, None)?;
    ws.main_message = format!("Next high water mark will be {}", mark);
    Ok(mark)
}

pub fn update_high_water_mark(ws: &mut WhereScape) -> Result<String> {
    let mark = ws.read_parameter(HIGH_WATER_MARK_NEXT)?;
    ws.write_parameter(HIGH_WATER_MARK, &mark, None)?;
    ws.main_message = format!("High water mark is set to {}", mark);
    Ok(mark)
}
