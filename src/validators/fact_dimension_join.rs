use std::path::{Path, PathBuf};

use jiff::Zoned;
use log::info;
use serde::Serialize;

use crate::{error::Result, wherescape::WhereScape};

const FACT_KEY_COLUMNS: &str = "select dt_schema, ft_table_name, fc_col_name from ws_fact_col left join ws_fact_tab on fc_obj_key=ft_obj_key left join ws_obj_object on oo_obj_key=ft_obj_key left join ws_dbc_target on dt_target_key=oo_target_key where fc_key_type='2' order by 1,2";

/// One line of the result file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinCount {
    pub date: String,
    pub table: String,
    pub attribute: String,
    pub count_of_all_records: i64,
    pub count_of_0_key_records: i64,
}

/// Count the fact rows that point to the 0 (unknown) member of a dimension,
/// for every dimension key of every fact table.  Writes
/// `fact_dimension_check_result_{yymmdd}.csv` to `output_dir` and returns its
/// path, or `None` when the repository has no fact tables.
pub fn check_fact_dimension_join(ws: &WhereScape, output_dir: &Path, now: &Zoned) -> Result<Option<PathBuf>> {
    let attributes: Vec<(String, String)> = ws
        .query_meta(FACT_KEY_COLUMNS, &[])?
        .iter()
        .map(|r| {
            let schema = r[0].as_string().unwrap_or_default();
            let table = r[1].as_string().unwrap_or_default();
            (format!("{}.{}", schema, table), r[2].as_string().unwrap_or_default())
        })
        .collect();
    info!("Checking {} dimension keys", attributes.len());

    let date = now.strftime("%y-%m-%d").to_string();
    let mut counts = Vec::with_capacity(attributes.len());
    for (table, column) in attributes {
        let sql = format!(
            "select count(*), count(*) filter (where {} = 0) from {}",
            column, table
        );
        let rows = ws.query_target(&sql, &[])?;
        let (all, zero) = match rows.first() {
            Some(row) => (row[0].as_i64().unwrap_or(0), row[1].as_i64().unwrap_or(0)),
            None => (0, 0),
        };
        counts.push(JoinCount {
            date: date.clone(),
            table,
            attribute: column,
            count_of_all_records: all,
            count_of_0_key_records: zero,
        });
    }
    if counts.is_empty() {
        info!("No fact tables found, nothing to write");
        return Ok(None);
    }

    let path = output_dir.join(format!(
        "fact_dimension_check_result_{}.csv",
        now.strftime("%y%m%d")
    ));
    let mut wtr = csv::Writer::from_path(&path)?;
    for count in &counts {
        wtr.serialize(count)?;
    }
    wtr.flush()?;
    info!("Wrote {} lines to {}", counts.len(), path.display());
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use jiff::civil::datetime;
    use jiff::tz::TimeZone;

    use super::*;
    use crate::wherescape::fixtures::instance;

    const REPOSITORY: &str = r#"
CREATE TABLE ws_fact_tab (ft_obj_key BIGINT, ft_table_name VARCHAR);
CREATE TABLE ws_fact_col (fc_obj_key BIGINT, fc_col_name VARCHAR, fc_key_type VARCHAR);
CREATE TABLE ws_obj_object (oo_obj_key BIGINT, oo_target_key BIGINT);
CREATE TABLE ws_dbc_target (dt_target_key BIGINT, dt_schema VARCHAR);
"#;

    #[test]
    fn count_zero_keys() -> Result<()> {
        let ws = instance(
            "x",
            "load",
            &format!(
                "{}{}",
                REPOSITORY,
                r#"
INSERT INTO ws_fact_tab VALUES (1, 'fact_calls');
INSERT INTO ws_fact_col VALUES (1, 'dim_customer_key', '2'), (1, 'duration', '0');
INSERT INTO ws_obj_object VALUES (1, 5);
INSERT INTO ws_dbc_target VALUES (5, 'star');
"#
            ),
            r#"
CREATE SCHEMA star;
CREATE TABLE star.fact_calls (dim_customer_key BIGINT, duration BIGINT);
INSERT INTO star.fact_calls VALUES (0, 10), (4, 12), (0, 7);
"#,
        );
        let dir = tempfile::tempdir()?;
        let now = datetime(2024, 3, 9, 6, 0, 0, 0).to_zoned(TimeZone::UTC)?;
        let path = check_fact_dimension_join(&ws, dir.path(), &now)?;
        let path = path.expect("a result file");
        assert!(path.ends_with("fact_dimension_check_result_240309.csv"));
        assert_eq!(
            fs::read_to_string(path)?,
            "date,table,attribute,count_of_all_records,count_of_0_key_records\n24-03-09,star.fact_calls,dim_customer_key,3,2\n"
        );
        Ok(())
    }

    #[test]
    fn no_facts_no_file() -> Result<()> {
        let ws = instance("x", "load", REPOSITORY, "");
        let dir = tempfile::tempdir()?;
        assert_eq!(check_fact_dimension_join(&ws, dir.path(), &Zoned::now())?, None);
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
