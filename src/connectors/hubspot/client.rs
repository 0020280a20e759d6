use std::collections::BTreeMap;

use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::{
    error::{Error, Result},
    http::{HttpClient, Method, Request},
};

const HUBSPOT_API: &str = "https://api.hubapi.com";
/// HubSpot rejects batches with more inputs.
pub const MAX_BATCH_SIZE: usize = 100;

/// A company, contact, deal or ticket.  HubSpot sends every property as a
/// string or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmObject {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Option<String>>,
}

impl CrmObject {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_deref())
    }
}

/// One input of a batch update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInput {
    pub id: String,
    pub properties: serde_json::Map<String, Json>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

pub fn create_filter(property_name: &str, operator: &str, value: Option<&str>) -> Filter {
    Filter {
        property_name: property_name.to_string(),
        operator: operator.to_string(),
        value: value.map(|v| v.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<CrmObject>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

impl Page {
    fn after(&self) -> Option<String> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.clone())
    }
}

pub struct Hubspot<'a> {
    client: &'a dyn HttpClient,
    access_token: String,
    base_url: String,
}

impl<'a> Hubspot<'a> {
    pub fn new(client: &'a dyn HttpClient, access_token: &str) -> Hubspot<'a> {
        Hubspot {
            client,
            access_token: access_token.to_string(),
            base_url: HUBSPOT_API.to_string(),
        }
    }

    fn send(&self, request: Request) -> Result<Json> {
        let response = self
            .client
            .send(&request.bearer(&self.access_token))?
            .error_for_status("Hubspot")?;
        if response.body.trim().is_empty() {
            return Ok(Json::Null);
        }
        response.json()
    }

    fn objects_url(&self, object: &str) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, object)
    }

    /// All objects of a type with the given properties.
    pub fn get_all(&self, object: &str, properties: &[&str]) -> Result<Vec<CrmObject>> {
        let mut objects = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut url = format!(
                "{}?limit=100&archived=false&properties={}",
                self.objects_url(object),
                properties.join(",")
            );
            if let Some(after) = &after {
                url.push_str(&format!("&after={}", after));
            }
            let page: Page = serde_json::from_value(self.send(Request::get(url))?)?;
            after = page.after();
            objects.extend(page.results);
            if after.is_none() {
                break;
            }
        }
        info!("Received {} {} from Hubspot", objects.len(), object);
        Ok(objects)
    }

    pub fn get_object(&self, object: &str, id: &str, properties: &[&str]) -> Result<CrmObject> {
        let url = format!(
            "{}/{}?properties={}",
            self.objects_url(object),
            id,
            properties.join(",")
        );
        Ok(serde_json::from_value(self.send(Request::get(url))?)?)
    }

    pub fn update(&self, object: &str, input: &ObjectInput) -> Result<()> {
        let url = format!("{}/{}", self.objects_url(object), input.id);
        let body = json!({ "properties": input.properties });
        self.send(Request::new(Method::Patch, url).json(body))?;
        Ok(())
    }

    pub fn batch_update(&self, object: &str, inputs: &[ObjectInput]) -> Result<()> {
        check_batch_size(inputs.len())?;
        let url = format!("{}/batch/update", self.objects_url(object));
        self.send(Request::post(url).json(json!({ "inputs": inputs })))?;
        Ok(())
    }

    pub fn batch_archive(&self, object: &str, ids: &[String]) -> Result<()> {
        check_batch_size(ids.len())?;
        if ids.is_empty() {
            return Ok(());
        }
        let inputs: Vec<Json> = ids.iter().map(|id| json!({ "id": id })).collect();
        let url = format!("{}/batch/archive", self.objects_url(object));
        self.send(Request::post(url).json(json!({ "inputs": inputs })))?;
        Ok(())
    }

    /// Objects matching all filters.
    pub fn search(&self, object: &str, filters: &[Filter], properties: &[&str]) -> Result<Vec<CrmObject>> {
        let url = format!("{}/search", self.objects_url(object));
        let mut objects = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut body = json!({
                "filterGroups": [{ "filters": filters }],
                "properties": properties,
                "limit": 100,
            });
            if let Some(after) = &after {
                body["after"] = json!(after);
            }
            let page: Page = serde_json::from_value(self.send(Request::post(&url).json(body))?)?;
            after = page.after();
            objects.extend(page.results);
            if after.is_none() {
                break;
            }
        }
        Ok(objects)
    }

    /// Names of the properties of an object type.  `None` when the token has
    /// no access to the type.
    pub fn properties(&self, object: &str) -> Result<Option<Vec<String>>> {
        let url = format!("{}/crm/v3/properties/{}?archived=false", self.base_url, object);
        match self.send(Request::get(url)) {
            Ok(response) => Ok(Some(
                response["results"]
                    .as_array()
                    .map(|results| {
                        results
                            .iter()
                            .filter_map(|p| p["name"].as_str())
                            .map(|s| s.to_string())
                            .collect()
                    })
                    .unwrap_or_default(),
            )),
            Err(Error::Api { status: 403, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Ids of the `to` objects associated with an object.
    pub fn get_associations(&self, from: &str, id: &str, to: &str) -> Result<Vec<String>> {
        let url = format!("{}/crm/v4/objects/{}/{}/associations/{}", self.base_url, from, id, to);
        let response = self.send(Request::get(url))?;
        Ok(response["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .map(|r| match &r["toObjectId"] {
                        Json::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn create_association(
        &self,
        from: &str,
        from_id: &str,
        to: &str,
        to_id: &str,
        association_type: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/{}/associations/{}/{}/{}",
            self.objects_url(from),
            from_id,
            to,
            to_id,
            association_type
        );
        self.send(Request::new(Method::Put, url))?;
        Ok(())
    }
}

fn check_batch_size(size: usize) -> Result<()> {
    if size > MAX_BATCH_SIZE {
        return Err(Error::Config(format!(
            "a Hubspot batch takes at most {} inputs, got {}",
            MAX_BATCH_SIZE, size
        )));
    }
    Ok(())
}

/// Split ids or inputs into batches HubSpot accepts.
pub fn batches<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    items
        .iter()
        .cloned()
        .chunks(MAX_BATCH_SIZE)
        .into_iter()
        .map(|chunk| chunk.collect())
        .collect()
}
