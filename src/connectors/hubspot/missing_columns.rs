use std::collections::HashSet;

use log::{info, warn};

use super::{client::Hubspot, hubspot_get_token, ObjectType};
use crate::{
    db::{Row, Value},
    error::Result,
    helpers::MetadataQuery,
    http::HttpClient,
    load::{DSS_LOAD_DATE, DSS_RECORD_SOURCE},
    wherescape::WhereScape,
};

pub const ENVIRONMENTS_PARAMETER: &str = "hubspot_environments";

const COLUMNS: [&str; 4] = [
    "hubspot_environment",
    "column_name",
    "hubspot_load_table_name",
    "missing_where",
];

const DISPLAY_NAMES: [&str; 4] = [
    "Hubspot environment",
    "Column name",
    "Hubspot load table name",
    "Missing where",
];

const COMMENTS: [&str; 4] = [
    "The Hubspot environment (portal) the column belongs to.",
    "Name of the property or column that is missing.",
    "The WhereScape load table that holds the Hubspot object.",
    "Where the column is missing: wherescape or hubspot.",
];

/// One missing column: environment, column, load table and where it's missing.
pub type MissingColumn = (String, String, String, String);

pub fn load_table_name(environment: &str, object: ObjectType) -> String {
    format!("load_hubspot_{}_{}", environment, object.as_str())
}

/// Properties that have no column and columns that have no property.  The dss
/// columns only live in the warehouse.
pub fn compare_columns<S: AsRef<str>, T: AsRef<str>>(
    hubspot_properties: &[S],
    ws_columns: &[T],
) -> (Vec<String>, Vec<String>) {
    let properties: HashSet<&str> = hubspot_properties.iter().map(|p| p.as_ref()).collect();
    let columns: HashSet<&str> = ws_columns.iter().map(|c| c.as_ref()).collect();
    let missing_in_ws = hubspot_properties
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !columns.contains(p))
        .map(|p| p.to_string())
        .collect();
    let missing_in_hubspot = ws_columns
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| *c != DSS_RECORD_SOURCE && *c != DSS_LOAD_DATE)
        .filter(|c| !properties.contains(c))
        .map(|c| c.to_string())
        .collect();
    (missing_in_ws, missing_in_hubspot)
}

fn ws_columns(ws: &WhereScape, table_name: &str) -> Result<Vec<String>> {
    let rows = ws.query_meta(
        "SELECT lc_col_name FROM ws_load_col JOIN ws_load_tab ON lc_obj_key = lt_obj_key WHERE lt_table_name = ? ORDER BY lc_order",
        &[table_name.into()],
    )?;
    Ok(rows.iter().filter_map(|r| r[0].as_string()).collect())
}

fn environments(ws: &WhereScape, environments: &[String]) -> Result<Vec<String>> {
    if !environments.is_empty() {
        return Ok(environments.to_vec());
    }
    Ok(ws
        .read_parameter(ENVIRONMENTS_PARAMETER)?
        .split(',')
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect())
}

/// Compare the properties of every object type in every environment with the
/// load tables, and add the differences that are new since the last run to
/// the load table.  Without `environment_names` the comma separated
/// `hubspot_environments` parameter is used.
pub fn hubspot_check_missing_columns(
    ws: &mut WhereScape,
    client: &dyn HttpClient,
    environment_names: &[String],
) -> Result<usize> {
    let develop_env = ws.context.develop_env();
    let mut missing: Vec<MissingColumn> = Vec::new();
    for environment in environments(ws, environment_names)? {
        for object in ObjectType::ALL {
            let table_name = load_table_name(&environment, object);
            let token = hubspot_get_token(ws, &table_name, develop_env)?;
            let Some(properties) = Hubspot::new(client, &token).properties(object.as_str())? else {
                info!("No access to {} in {}, skipping", object.as_str(), environment);
                continue;
            };
            let columns = ws_columns(ws, &table_name)?;
            let (missing_in_ws, missing_in_hubspot) = compare_columns(&properties, &columns);
            let rows = missing_in_ws
                .into_iter()
                .map(|c| (c, "wherescape"))
                .chain(missing_in_hubspot.into_iter().map(|c| (c, "hubspot")))
                .map(|(column, place)| {
                    (
                        environment.clone(),
                        column,
                        table_name.clone(),
                        place.to_string(),
                    )
                });
            missing.extend(rows);
        }
    }

    let datastore_table = format!("datastore.ds{}", ws.table().get(4..).unwrap_or_default());
    let known: HashSet<MissingColumn> = ws
        .query_target(
            &format!(
                "select hubspot_environment, column_name, hubspot_load_table_name, missing_where from {}",
                datastore_table
            ),
            &[],
        )?
        .iter()
        .map(|r| {
            (
                r[0].as_string().unwrap_or_default(),
                r[1].as_string().unwrap_or_default(),
                r[2].as_string().unwrap_or_default(),
                r[3].as_string().unwrap_or_default(),
            )
        })
        .collect();

    let new_rows: Vec<Row> = missing
        .into_iter()
        .filter(|m| !known.contains(m))
        .map(|(environment, column, table, place)| {
            warn!("Column {} of {} ({}) is missing in {}", column, table, environment, place);
            vec![
                Value::Text(environment),
                Value::Text(column),
                Value::Text(table),
                Value::Text(place),
            ]
        })
        .collect();

    let sql = format!("insert into {} values (?, ?, ?, ?, null, null)", ws.load_full_name());
    let n = ws.push_many_to_target(&sql, &new_rows)?;
    ws.main_message = format!("Found {} new missing columns.", n);
    Ok(n)
}

pub fn hubspot_create_metadata(ws: &mut WhereScape) -> Result<()> {
    let key = ws.require_object_key()?;
    let sql = MetadataQuery::new(key, "hubspot_api")
        .columns(&COLUMNS)
        .display_names(&DISPLAY_NAMES)
        .types(&["text"; 4])
        .comments(&COMMENTS)
        .source_columns(&["", "", "", ""])
        .build();
    ws.push_script_to_meta(&sql)?;
    ws.main_message = "Metadata updated. Table can be created.".to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::fake::FakeClient;
    use crate::wherescape::fixtures::instance;

    #[test]
    fn compare() {
        let (in_ws, in_hubspot) = compare_columns(
            &["name", "domain", "client_id"],
            &["name", "legacy_id", "dss_load_date", "dss_record_source"],
        );
        assert_eq!(in_ws, vec!["domain", "client_id"]);
        assert_eq!(in_hubspot, vec!["legacy_id"]);
    }

    #[test]
    fn only_new_differences_are_loaded() -> Result<()> {
        let mut ws = instance(
            "load_hubspot_missing_columns",
            "load",
            r#"
INSERT INTO dss_parameter VALUES ('hubspot_access_token_voys', 'voys', '');
INSERT INTO ws_load_tab VALUES (1, 'load_hubspot_voys_companies', '', '');
INSERT INTO ws_load_col VALUES (1, 'name', '', '', '', '', 'text', 'Y', 'N', 'N', 'Y', 10);
INSERT INTO ws_load_col VALUES (1, 'legacy_id', '', '', '', '', 'text', 'Y', 'N', 'N', 'Y', 20);
INSERT INTO ws_load_col VALUES (1, 'dss_load_date', '', '', '', '', 'timestamp', 'Y', 'N', 'N', 'Y', 30);
"#,
            r#"
CREATE SCHEMA load;
CREATE TABLE load.load_hubspot_missing_columns (hubspot_environment VARCHAR, column_name VARCHAR,
    hubspot_load_table_name VARCHAR, missing_where VARCHAR, dss_record_source VARCHAR, dss_load_date TIMESTAMP);
CREATE SCHEMA datastore;
CREATE TABLE datastore.ds_hubspot_missing_columns (hubspot_environment VARCHAR, column_name VARCHAR,
    hubspot_load_table_name VARCHAR, missing_where VARCHAR);
INSERT INTO datastore.ds_hubspot_missing_columns VALUES ('voys', 'legacy_id', 'load_hubspot_voys_companies', 'hubspot');
"#,
        );
        let client = FakeClient::new();
        client
            .push_json(200, json!({"results": [{"name": "name"}, {"name": "domain"}]}))
            .push_json(403, json!({"category": "MISSING_SCOPES"}))
            .push_json(403, json!({"category": "MISSING_SCOPES"}))
            .push_json(403, json!({"category": "MISSING_SCOPES"}));
        let n = hubspot_check_missing_columns(&mut ws, &client, &["voys".to_string()])?;
        assert_eq!(n, 1);
        let rows = ws.query_target(
            "SELECT hubspot_environment, column_name, missing_where, dss_load_date FROM load.load_hubspot_missing_columns",
            &[],
        )?;
        assert_eq!(
            rows,
            vec![vec!["voys".into(), "domain".into(), "wherescape".into(), Value::Null]]
        );
        Ok(())
    }

    #[test]
    fn environments_from_parameter() -> Result<()> {
        let ws = instance(
            "x",
            "load",
            "INSERT INTO dss_parameter VALUES ('hubspot_environments', 'voys, nerds,', '');",
            "",
        );
        assert_eq!(environments(&ws, &[])?, vec!["voys", "nerds"]);
        assert_eq!(environments(&ws, &["dev".to_string()])?, vec!["dev"]);
        Ok(())
    }

    #[test]
    fn create_metadata() -> Result<()> {
        let mut ws = instance(
            "load_hubspot_missing_columns",
            "load",
            "INSERT INTO ws_load_tab VALUES (8, 'load_hubspot_missing_columns', '', '');",
            "",
        );
        hubspot_create_metadata(&mut ws)?;
        let (names, types) = ws.get_columns()?;
        assert_eq!(names[..4], COLUMNS);
        assert_eq!(names.len(), 6);
        assert!(types[..4].iter().all(|t| t == "text"));
        Ok(())
    }
}
