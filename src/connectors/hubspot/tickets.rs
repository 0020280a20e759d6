use std::collections::HashMap;

use log::{error, info, warn};
use serde_json::{Map, Value as Json};

use super::client::{batches, create_filter, CrmObject, Hubspot, ObjectInput};
use crate::{error::Result, http::HttpClient, wherescape::WhereScape};

pub const TICKET_PROPERTIES: [&str; 6] = [
    "content",
    "hubspot_owner_id",
    "nerds_customer_id",
    "nerds_ticket_id",
    "nerds_agent",
    "notes",
];

/// Text properties that are combined when two tickets both have them.
const CONCATENATED: [&str; 2] = ["content", "notes"];

const ANONYMOUS_EMAIL: &str = "anoniem@voys.nerds.nl";
/// Placeholder customer of the support desk, never linked to a company.
const PLACEHOLDER_CUSTOMER_ID: &str = "123327";

fn token(ws: &WhereScape, parameter: &str) -> Result<Option<String>> {
    let token = ws.read_parameter(parameter)?;
    if token.is_empty() {
        error!("No access token found in parameter {}", parameter);
        return Ok(None);
    }
    Ok(Some(token))
}

/// Groups of tickets with the same `nerds_ticket_id`, in the order the ids
/// were first seen.  Groups of one are left out.
pub fn get_double_tickets(tickets: Vec<CrmObject>) -> Vec<Vec<CrmObject>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<CrmObject>> = HashMap::new();
    for ticket in tickets {
        let Some(nerds_id) = ticket.property("nerds_ticket_id").map(|s| s.to_string()) else {
            continue;
        };
        if !groups.contains_key(&nerds_id) {
            order.push(nerds_id.clone());
        }
        groups.entry(nerds_id).or_default().push(ticket);
    }
    order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .filter(|group| group.len() > 1)
        .collect()
}

/// Fold the other tickets of a group into the first one.  Empty properties
/// of the kept ticket are filled in, differing notes and content are joined.
pub fn merge_tickets(group: &[CrmObject]) -> Option<CrmObject> {
    let (first, others) = group.split_first()?;
    let mut kept = first.clone();
    for other in others {
        for name in TICKET_PROPERTIES {
            let Some(value) = other.property(name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let merged = match kept.property(name).filter(|v| !v.is_empty()) {
                None => value.to_string(),
                Some(current) if CONCATENATED.contains(&name) && !current.contains(value) => {
                    format!("{}\n\n{}", current, value)
                }
                Some(_) => continue,
            };
            kept.properties.insert(name.to_string(), Some(merged));
        }
    }
    Some(kept)
}

fn update_input(ticket: &CrmObject) -> ObjectInput {
    let properties: Map<String, Json> = TICKET_PROPERTIES
        .iter()
        .filter_map(|name| {
            ticket
                .property(name)
                .map(|v| (name.to_string(), Json::String(v.to_string())))
        })
        .collect();
    ObjectInput {
        id: ticket.id.clone(),
        properties,
    }
}

/// Merge tickets that were created twice for the same support desk ticket.
/// The kept tickets are updated first, the duplicates are only archived when
/// every update went through.  Returns the number of tickets updated.
pub fn merge_double_tickets(ws: &mut WhereScape, client: &dyn HttpClient, parameter: &str) -> Result<usize> {
    let Some(token) = token(ws, parameter)? else {
        return Ok(0);
    };
    let hubspot = Hubspot::new(client, &token);
    let groups = get_double_tickets(hubspot.get_all("tickets", &TICKET_PROPERTIES)?);
    info!("Found {} tickets with duplicates", groups.len());

    let mut updates = Vec::with_capacity(groups.len());
    let mut to_archive = Vec::new();
    for group in &groups {
        if let Some(kept) = merge_tickets(group) {
            updates.push(update_input(&kept));
            to_archive.extend(group[1..].iter().map(|t| t.id.clone()));
        }
    }

    let mut updated = 0;
    for batch in batches(&updates) {
        if let Err(e) = hubspot.batch_update("tickets", &batch) {
            error!(
                "Updating tickets failed after {} of {} updates, nothing is archived: {}",
                updated,
                updates.len(),
                e
            );
            ws.main_message = format!(
                "Updated {} of {} merged tickets, archived no duplicates.",
                updated,
                updates.len()
            );
            return Ok(updated);
        }
        updated += batch.len();
    }
    for batch in batches(&to_archive) {
        hubspot.batch_archive("tickets", &batch)?;
    }
    ws.main_message = format!(
        "Merged {} tickets, archived {} duplicates.",
        updates.len(),
        to_archive.len()
    );
    Ok(updates.len())
}

/// Link tickets of anonymous callers to the company of the customer id the
/// support desk recorded.  Returns the number of new associations.
pub fn update_company_association(
    ws: &mut WhereScape,
    client: &dyn HttpClient,
    parameter: &str,
) -> Result<usize> {
    let Some(token) = token(ws, parameter)? else {
        return Ok(0);
    };
    let hubspot = Hubspot::new(client, &token);
    let filters = [
        create_filter("nerds_customer_email", "EQ", Some(ANONYMOUS_EMAIL)),
        create_filter("nerds_customer_id", "HAS_PROPERTY", None),
        create_filter("nerds_customer_id", "NEQ", Some(PLACEHOLDER_CUSTOMER_ID)),
    ];
    let tickets = hubspot.search("tickets", &filters, &["nerds_customer_id"])?;
    info!("Checking the company of {} tickets", tickets.len());

    let mut associated = 0;
    for ticket in &tickets {
        let Some(customer_id) = ticket.property("nerds_customer_id") else {
            continue;
        };
        let mut has_company = false;
        for company_id in hubspot.get_associations("tickets", &ticket.id, "companies")? {
            let company = hubspot.get_object("companies", &company_id, &["client_id"])?;
            if company.property("client_id") == Some(customer_id) {
                has_company = true;
                break;
            }
        }
        if has_company {
            continue;
        }
        if customer_id.is_empty() || !customer_id.chars().all(|c| c.is_ascii_digit()) {
            warn!("Ticket {} has a non numeric customer id {}", ticket.id, customer_id);
            continue;
        }
        let companies = hubspot.search(
            "companies",
            &[create_filter("client_id", "EQ", Some(customer_id))],
            &["client_id"],
        )?;
        match companies.as_slice() {
            [company] => {
                hubspot.create_association(
                    "companies",
                    &company.id,
                    "tickets",
                    &ticket.id,
                    "primary_company_to_ticket",
                )?;
                associated += 1;
            }
            [] => warn!("No company found with client_id {}", customer_id),
            _ => warn!("{} companies found with client_id {}", companies.len(), customer_id),
        }
    }
    ws.main_message = format!("Associated {} tickets with their company.", associated);
    Ok(associated)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::{fake::FakeClient, Method};
    use crate::wherescape::fixtures::instance;

    fn ticket(id: &str, properties: Json) -> CrmObject {
        serde_json::from_value(json!({"id": id, "properties": properties})).unwrap()
    }

    fn with_token() -> WhereScape {
        instance(
            "x",
            "load",
            "INSERT INTO dss_parameter VALUES ('hubspot_access_token_nerds', 'pat', '');",
            "",
        )
    }

    #[test]
    fn doubles_by_nerds_ticket_id() {
        let groups = get_double_tickets(vec![
            ticket("1", json!({"nerds_ticket_id": "a"})),
            ticket("2", json!({"nerds_ticket_id": "b"})),
            ticket("3", json!({"nerds_ticket_id": "a"})),
            ticket("4", json!({"nerds_ticket_id": null})),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[test]
    fn merge_fills_and_joins() {
        let merged = merge_tickets(&[
            ticket("1", json!({"nerds_ticket_id": "a", "notes": "called back", "nerds_agent": null, "content": "x"})),
            ticket("2", json!({"nerds_ticket_id": "a", "notes": "resolved", "nerds_agent": "kim", "content": "x"})),
        ])
        .unwrap();
        assert_eq!(merged.id, "1");
        assert_eq!(merged.property("notes"), Some("called back\n\nresolved"));
        assert_eq!(merged.property("nerds_agent"), Some("kim"));
        assert_eq!(merged.property("content"), Some("x"));
        assert!(merge_tickets(&[]).is_none());
    }

    #[test]
    fn merge_then_archive() -> Result<()> {
        let mut ws = with_token();
        let client = FakeClient::new();
        client
            .push_json(
                200,
                json!({"results": [
                    {"id": "1", "properties": {"nerds_ticket_id": "a", "notes": "one"}},
                    {"id": "2", "properties": {"nerds_ticket_id": "a", "notes": "two"}},
                    {"id": "3", "properties": {"nerds_ticket_id": "c"}}
                ]}),
            )
            .push_json(200, json!({"status": "COMPLETE"}))
            .push_json(204, json!(null));
        assert_eq!(merge_double_tickets(&mut ws, &client, "hubspot_access_token_nerds")?, 1);

        let requests = client.requests.borrow();
        assert_eq!(requests.len(), 3);
        let update = requests[1].json.clone().unwrap_or_default();
        assert_eq!(update["inputs"][0]["id"], "1");
        assert_eq!(update["inputs"][0]["properties"]["notes"], "one\n\ntwo");
        assert!(requests[2].url.ends_with("/tickets/batch/archive"));
        assert_eq!(requests[2].json, Some(json!({"inputs": [{"id": "2"}]})));
        assert_eq!(ws.main_message, "Merged 1 tickets, archived 1 duplicates.");
        Ok(())
    }

    #[test]
    fn failed_update_archives_nothing() -> Result<()> {
        let mut ws = with_token();
        let client = FakeClient::new();
        client
            .push_json(
                200,
                json!({"results": [
                    {"id": "1", "properties": {"nerds_ticket_id": "a"}},
                    {"id": "2", "properties": {"nerds_ticket_id": "a"}}
                ]}),
            )
            .push_json(400, json!({"message": "bad input"}));
        assert_eq!(merge_double_tickets(&mut ws, &client, "hubspot_access_token_nerds")?, 0);
        assert_eq!(client.urls().len(), 2);
        assert_eq!(ws.main_message, "Updated 0 of 1 merged tickets, archived no duplicates.");
        Ok(())
    }

    #[test]
    fn later_failed_batch_reports_applied_updates() -> Result<()> {
        let mut ws = with_token();
        let tickets: Vec<Json> = (0..101)
            .flat_map(|i| {
                let nerds_id = format!("n{}", i);
                vec![
                    json!({"id": format!("{}", 2 * i), "properties": {"nerds_ticket_id": nerds_id}}),
                    json!({"id": format!("{}", 2 * i + 1), "properties": {"nerds_ticket_id": nerds_id}}),
                ]
            })
            .collect();
        let client = FakeClient::new();
        client
            .push_json(200, json!({"results": tickets}))
            .push_json(200, json!({"status": "COMPLETE"}))
            .push_json(500, json!({"message": "internal error"}));
        assert_eq!(merge_double_tickets(&mut ws, &client, "hubspot_access_token_nerds")?, 100);
        let urls = client.urls();
        assert_eq!(urls.len(), 3);
        assert!(urls.iter().all(|u| !u.ends_with("/batch/archive")));
        assert_eq!(ws.main_message, "Updated 100 of 101 merged tickets, archived no duplicates.");
        Ok(())
    }

    #[test]
    fn missing_token() -> Result<()> {
        let mut ws = with_token();
        let client = FakeClient::new();
        assert_eq!(update_company_association(&mut ws, &client, "hubspot_access_token_x")?, 0);
        assert!(client.urls().is_empty());
        Ok(())
    }

    #[test]
    fn associate_company() -> Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ws = with_token();
        let client = FakeClient::new();
        client
            // tickets
            .push_json(
                200,
                json!({"results": [
                    {"id": "10", "properties": {"nerds_customer_id": "42"}},
                    {"id": "11", "properties": {"nerds_customer_id": "43"}},
                    {"id": "12", "properties": {"nerds_customer_id": "abc"}}
                ]}),
            )
            // ticket 10 is already linked to the right company
            .push_json(200, json!({"results": [{"toObjectId": 900}]}))
            .push_json(200, json!({"id": "900", "properties": {"client_id": "42"}}))
            // ticket 11 has no company yet, one match
            .push_json(200, json!({"results": []}))
            .push_json(200, json!({"results": [{"id": "901", "properties": {"client_id": "43"}}]}))
            .push_json(200, json!({}))
            // ticket 12 has a non numeric id
            .push_json(200, json!({"results": []}));
        assert_eq!(update_company_association(&mut ws, &client, "hubspot_access_token_nerds")?, 1);

        let requests = client.requests.borrow();
        assert_eq!(requests.len(), 7);
        let body = requests[0].json.clone().unwrap_or_default();
        assert_eq!(
            body["filterGroups"][0]["filters"][2],
            json!({"propertyName": "nerds_customer_id", "operator": "NEQ", "value": "123327"})
        );
        assert_eq!(requests[5].method, Method::Put);
        assert!(requests[5].url.ends_with("/companies/901/associations/tickets/11/primary_company_to_ticket"));
        Ok(())
    }
}
