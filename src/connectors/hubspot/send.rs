use log::{error, info, warn};
use serde_json::{Map, Value as Json};

use super::{
    client::{batches, Hubspot, ObjectInput},
    hubspot_get_token, ObjectType,
};
use crate::{
    db::{Row, Value},
    error::Result,
    http::HttpClient,
    load::{Stopwatch, DSS_LOAD_DATE, DSS_RECORD_SOURCE},
    wherescape::WhereScape,
};

/// Turn the rows of an export table into HubSpot update inputs.  Rows without
/// an id are skipped.
pub fn rows_to_inputs<S: AsRef<str>>(object: ObjectType, columns: &[S], rows: &[Row]) -> Vec<ObjectInput> {
    let id_column = format!("hubspot_{}_id", object.singular());
    let id_index = columns
        .iter()
        .position(|c| c.as_ref() == id_column)
        .or_else(|| columns.iter().position(|c| c.as_ref() == "hubspot_id"));
    let Some(id_index) = id_index else {
        error!("No {} or hubspot_id column found", id_column);
        return Vec::new();
    };

    let mut inputs = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(id) = row.get(id_index).and_then(|v| v.as_string()) else {
            warn!("Skipping a row without {}", id_column);
            continue;
        };
        let mut properties = Map::new();
        for (i, column) in columns.iter().enumerate() {
            let column = column.as_ref();
            if i == id_index || column == DSS_RECORD_SOURCE || column == DSS_LOAD_DATE {
                continue;
            }
            let value = match row.get(i) {
                None | Some(Value::Null) => Json::Null,
                Some(v) => Json::String(v.to_string()),
            };
            properties.insert(column.to_string(), value);
        }
        inputs.push(ObjectInput { id, properties });
    }
    inputs
}

/// Send the rows of the current table to HubSpot.  Failed batches are logged
/// and the remaining batches are still sent.  Returns the number of objects
/// HubSpot accepted.
pub fn hubspot_load_data(ws: &mut WhereScape, client: &dyn HttpClient) -> Result<usize> {
    let stopwatch = Stopwatch::start("hubspot_load_data");
    let object = ObjectType::from_table_name(ws.table())?;
    let token = hubspot_get_token(ws, ws.table(), ws.context.develop_env())?;
    let hubspot = Hubspot::new(client, &token);

    let (columns, _) = ws.get_columns()?;
    let rows = ws.query_target(&format!("select * from {}.{}", ws.schema(), ws.table()), &[])?;
    let inputs = rows_to_inputs(object, &columns, &rows);
    info!("Sending {} {} to Hubspot", inputs.len(), object.as_str());

    let mut sent = 0;
    let mut failed = 0;
    for batch in batches(&inputs) {
        let res = match batch.as_slice() {
            [single] => hubspot.update(object.as_str(), single),
            _ => hubspot.batch_update(object.as_str(), &batch),
        };
        match res {
            Ok(()) => sent += batch.len(),
            Err(e) => {
                failed += batch.len();
                error!("Updating {} {} failed: {}", batch.len(), object.as_str(), e);
            }
        }
    }
    ws.main_message = if failed == 0 {
        format!("Sent {} {} to Hubspot.", sent, object.as_str())
    } else {
        format!("Sent {} {} to Hubspot, {} failed.", sent, object.as_str(), failed)
    };
    stopwatch.finish();
    Ok(sent)
}
